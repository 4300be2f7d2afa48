use anyhow::{Context, Result};
use std::sync::Arc;
use terminal_session_engine::config::Config;
use terminal_session_engine::detection::CommandDetector;
use terminal_session_engine::ports::{BufferSurface, MemorySettings, StaticHighlightRegistry, TerminalSurface};
use terminal_session_engine::process::{ProcessInspector, SysinfoInspector};
use terminal_session_engine::terminal::{TerminalIdentifier, TerminalKind, TerminalRegistry};
use terminal_session_engine::tracking::ManualSshTracker;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt::format::FmtSpan, FmtSubscriber};

fn setup_logging(log_level_str: &str) {
    let level = match log_level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("terminal_session_engine={},session_engine={}", level, level)));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Optionally follows the shell `WATCH_PID` and reports manual `ssh`
/// sessions started inside it, one JSON object per change on stdout.
fn spawn_manual_ssh_watch(config: &Config) -> Result<()> {
    let Some(raw_pid) = std::env::var("WATCH_PID").ok().filter(|s| !s.trim().is_empty()) else {
        return Ok(());
    };
    let pid: u32 = raw_pid.trim().parse().with_context(|| format!("Invalid WATCH_PID: {}", raw_pid))?;
    let inspector = match SysinfoInspector::new() {
        Ok(inspector) => inspector,
        Err(e) => {
            tracing::warn!(error = %e, "WATCH_PID ignored");
            return Ok(());
        }
    };

    let registry = Arc::new(TerminalRegistry::new());
    let surface: Arc<dyn TerminalSurface> = Arc::new(BufferSurface::new(80));
    let id = registry.register(&surface, TerminalKind::Local, TerminalIdentifier::Label(format!("pid {}", pid)));
    registry.update_process(id, pid);
    let tracker = ManualSshTracker::new(registry.clone(), Some(Arc::new(inspector) as Arc<dyn ProcessInspector>));
    tracker.track(id);
    tracing::info!(pid, "Watching shell for manual SSH sessions");

    let period = config.manual_ssh_poll_interval;
    tokio::spawn(async move {
        // The registry holds the surface weakly.
        let _surface = surface;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for (_, state) in tracker.poll_all() {
                match serde_json::to_string(&state) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::error!(error = %e, "Failed to serialize manual SSH state"),
                }
            }
        }
    });
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    setup_logging(&config.log_level);

    tracing::info!(version = %env!("CARGO_PKG_VERSION"), "Starting session-engine");
    tracing::debug!("Loaded configuration: {:?}", config);

    if which::which("ssh").is_err() {
        tracing::warn!("ssh is not installed or not in PATH. Remote sessions will fail to spawn.");
    }

    spawn_manual_ssh_watch(&config)?;

    let triggers = std::env::var("HIGHLIGHT_TRIGGERS").unwrap_or_default();
    let highlight = Arc::new(StaticHighlightRegistry::new(
        triggers.split(',').map(str::trim).filter(|t| !t.is_empty()),
    ));
    let detector = CommandDetector::new(highlight, Arc::new(MemorySettings::new()));

    // Each stdin line is treated as a submitted prompt line.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if let Some(detected) = detector.on_line_submitted(0, &line) {
            println!("{}", serde_json::to_string(&detected)?);
        }
    }

    tracing::info!("Input closed, shutting down.");
    Ok(())
}
