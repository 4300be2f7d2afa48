use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// CSI and OSC sequences, plus bracket remnants like `[K` or `[[[` left
/// behind when the escape byte itself was lost.
pub static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[\??[0-9;]*[A-Za-z]|\x1b\].*?\x07|\[+\??(?:\d*;?)*[ABCDEFGHJKPSTfmnsuhl]")
        .expect("ANSI_ESCAPE is a compile-time constant")
});

/// A prompt terminator glyph with at most one trailing space.
pub static PROMPT_TERMINATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[$#%>➜❯ᐅ❮›»▶λ∴⟩⟫⮞→➤➔⇒] ?").expect("PROMPT_TERMINATOR is a compile-time constant")
});

/// Commands that run another command given as their argument.
pub static PREFIX_COMMANDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "sudo", "time", "env", "nice", "nohup", "strace", "ltrace", "doas", "pkexec", "command", "builtin", "exec",
    ]
    .into_iter()
    .collect()
});

pub static SHELL_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "if", "then", "else", "elif", "fi", "for", "do", "done", "while", "until", "case", "esac", "select", "in",
        "function", "{", "}", "[[", "]]", "(", ")",
    ]
    .into_iter()
    .collect()
});

/// Keywords readline can glue to the next command on continuation lines,
/// longest first so `done` wins over `do`.
pub const GLUED_KEYWORDS: &[&str] = &["then", "else", "elif", "done", "esac", "do", "fi", "in"];

/// Glued keywords short enough to start ordinary command names (`docker`,
/// `find`, `install`).
pub const SHORT_GLUED_KEYWORDS: &[&str] = &["do", "fi", "in"];

pub const PIPELINE_SEPARATORS: &[char] = &['|', ';', '&'];
