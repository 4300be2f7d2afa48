use crate::detection::patterns::{
    ANSI_ESCAPE, GLUED_KEYWORDS, PIPELINE_SEPARATORS, PREFIX_COMMANDS, PROMPT_TERMINATOR, SHELL_KEYWORDS,
    SHORT_GLUED_KEYWORDS,
};
use crate::ports::highlight::{HighlightRegistry, HELP_CONTEXT};
use crate::ports::settings::{SettingsExt, SettingsProvider, IGNORED_COMMANDS_KEY};
use crate::ports::surface::{cursor_line, TerminalSurface};
use crate::terminal::model::TerminalId;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectedCommand {
    /// Program token as typed, path and leading dots removed.
    pub program: String,
    /// Highlight context key: the lowercased program, or the help context.
    pub context: String,
    /// Command text after the prompt.
    pub full_command: String,
    pub is_help: bool,
}

pub fn strip_escapes(line: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(line, "")
}

/// Text after the last prompt terminator, or the whole line when there is
/// none.
pub fn command_text(clean_line: &str) -> &str {
    match PROMPT_TERMINATOR.find_iter(clean_line).last() {
        Some(m) => clean_line[m.end()..].trim(),
        None => clean_line.trim(),
    }
}

fn is_known(word: &str, ignored: &HashSet<String>, triggers: &HashSet<String>) -> bool {
    let lower = word.to_lowercase();
    ignored.contains(&lower) || triggers.contains(&lower)
}

/// Undo readline gluing a keyword onto the next command (`thenecho`).
/// Long keywords are stripped whenever an ASCII letter follows and the glued
/// word is not a known command itself. `do`, `fi` and `in` also start real
/// names (`docker`, `find`, `install`), so they are stripped only when the
/// remainder is a known command.
pub fn repair_glued_keyword<'a>(candidate: &'a str, ignored: &HashSet<String>, triggers: &HashSet<String>) -> &'a str {
    let first_word = candidate.split_whitespace().next().unwrap_or("");
    if is_known(first_word, ignored, triggers) {
        return candidate;
    }
    for keyword in GLUED_KEYWORDS {
        let Some(head) = candidate.get(..keyword.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(keyword) {
            continue;
        }
        let rest = &candidate[keyword.len()..];
        if !rest.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
            continue;
        }
        if SHORT_GLUED_KEYWORDS.contains(keyword) {
            let rest_word = rest.split_whitespace().next().unwrap_or("");
            if !is_known(rest_word, ignored, triggers) {
                continue;
            }
        }
        return rest;
    }
    candidate
}

/// Last non-empty stage of a pipeline or command list.
pub fn last_segment(candidate: &str) -> &str {
    candidate
        .split(PIPELINE_SEPARATORS)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .last()
        .unwrap_or(candidate)
}

fn clean_token(token: &str) -> &str {
    let name = token.rsplit('/').next().unwrap_or(token);
    name.trim_start_matches('.')
}

/// Pick the program a segment runs. Ignored commands and known triggers
/// win immediately; otherwise the first plausible token is the fallback.
pub fn select_program<'a>(segment: &'a str, ignored: &HashSet<String>, triggers: &HashSet<String>) -> Option<&'a str> {
    let mut fallback = None;
    for token in segment.split_whitespace() {
        if token.starts_with('-') {
            continue;
        }
        if token.contains('=') && !token.contains('/') {
            continue;
        }
        let cleaned = clean_token(token);
        if cleaned.is_empty() {
            continue;
        }
        let lower = cleaned.to_lowercase();
        if PREFIX_COMMANDS.contains(lower.as_str()) || SHELL_KEYWORDS.contains(lower.as_str()) {
            continue;
        }
        if ignored.contains(&lower) || triggers.contains(&lower) {
            return Some(cleaned);
        }
        fallback.get_or_insert(cleaned);
    }
    fallback
}

pub fn is_help_command(candidate: &str) -> bool {
    let tokens: Vec<String> = candidate.split_whitespace().map(str::to_lowercase).collect();
    if tokens.iter().any(|t| t == "--help" || t == "-h") {
        return true;
    }
    matches!(tokens.first().map(String::as_str), Some("help") | Some("man"))
}

/// Infer the foreground command from a submitted screen line. `None` means
/// nothing usable was found and the highlight context stays as it is.
pub fn detect(line: &str, ignored: &HashSet<String>, triggers: &HashSet<String>) -> Option<DetectedCommand> {
    let clean = strip_escapes(line);
    let candidate = command_text(&clean);
    if candidate.is_empty() {
        return None;
    }
    let candidate = repair_glued_keyword(candidate, ignored, triggers);
    let program = select_program(last_segment(candidate), ignored, triggers)?;
    let is_help = is_help_command(candidate);
    Some(DetectedCommand {
        program: program.to_string(),
        context: if is_help {
            HELP_CONTEXT.to_string()
        } else {
            program.to_lowercase()
        },
        full_command: candidate.to_string(),
        is_help,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitKeyCode {
    Return,
    KeypadEnter,
    Other,
}

/// A key press as reported by the surface, reduced to what detection needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitKey {
    pub code: SubmitKeyCode,
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
}

impl SubmitKey {
    pub fn enter() -> Self {
        Self {
            code: SubmitKeyCode::Return,
            shift: false,
            ctrl: false,
            alt: false,
        }
    }

    /// Enter with no modifier held.
    pub fn is_plain_enter(&self) -> bool {
        matches!(self.code, SubmitKeyCode::Return | SubmitKeyCode::KeypadEnter) && !(self.shift || self.ctrl || self.alt)
    }
}

/// Pushes a highlight context to the highlighter whenever the user submits
/// a command line.
pub struct CommandDetector {
    highlight: Arc<dyn HighlightRegistry>,
    settings: Arc<dyn SettingsProvider>,
}

impl std::fmt::Debug for CommandDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDetector").finish_non_exhaustive()
    }
}

impl CommandDetector {
    pub fn new(highlight: Arc<dyn HighlightRegistry>, settings: Arc<dyn SettingsProvider>) -> Self {
        Self { highlight, settings }
    }

    #[instrument(skip(self, line), fields(terminal_id = id))]
    pub fn on_line_submitted(&self, id: TerminalId, line: &str) -> Option<DetectedCommand> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let ignored = self.settings.get_string_set(IGNORED_COMMANDS_KEY);
        let triggers = self.highlight.all_known_triggers();
        let detected = detect(line, &ignored, &triggers);
        match &detected {
            Some(command) => {
                debug!(program = %command.program, context = %command.context, "Detected command");
                self.highlight.set_context(&command.context, id, &command.full_command);
            }
            None => debug!("No command found on submitted line"),
        }
        detected
    }

    /// Key handler hook: on a plain Enter, read the cursor row and detect.
    /// Never blocks the key from reaching the terminal.
    pub fn on_key_pressed(&self, id: TerminalId, surface: &dyn TerminalSurface, key: SubmitKey) -> Option<DetectedCommand> {
        if !key.is_plain_enter() {
            return None;
        }
        match cursor_line(surface) {
            Some(line) => self.on_line_submitted(id, &line),
            None => {
                debug!(terminal_id = id, "Could not read cursor line for command detection");
                None
            }
        }
    }
}
