pub mod config;
pub mod cursor;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod selector;
pub mod tailer;
pub mod zone;

pub use decoder::LineEvent;
pub use error::TailError;
pub use selector::{CandidateFolders, LogFolder};
pub use tailer::{LogTailer, Subscriber, TailEvent};

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

/// Tail the game's daily chat log and print each line as it is written.
#[derive(Parser, Debug)]
#[command(name = "chat-tail", version)]
pub struct Args {
    /// Config file (TOML). Missing file = defaults.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// First candidate root folder
    #[arg(long)]
    pub primary: Option<PathBuf>,

    /// Fallback candidate root folder
    #[arg(long)]
    pub secondary: Option<PathBuf>,

    /// Always read from this log folder
    #[arg(long)]
    pub custom: Option<String>,

    /// Read today's file from the beginning instead of skipping history
    #[arg(long)]
    pub from_start: bool,

    /// Print JSON lines instead of tab-separated text
    #[arg(long)]
    pub json: bool,

    /// Write the rolling diagnostics log here instead of stderr
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Save the merged configuration back to the config file
    #[arg(long)]
    pub write_config: bool,
}

impl Args {
    /// Flags override whatever the config file said.
    pub fn apply(&self, cfg: &mut config::TailConfig) {
        if let Some(p) = &self.primary {
            cfg.primary_root = p.clone();
        }
        if let Some(p) = &self.secondary {
            cfg.secondary_root = p.clone();
        }
        if let Some(c) = &self.custom {
            cfg.custom_folder = c.clone();
        }
        if self.from_start {
            cfg.start_at_end = false;
        }
        if let Some(d) = &self.log_dir {
            cfg.log_dir = d.clone();
        }
    }
}

// ---------------------------------------------------------------------------
// Stdout subscriber
// ---------------------------------------------------------------------------

struct StdoutSubscriber {
    json: bool,
}

impl StdoutSubscriber {
    fn emit(&self, event: &TailEvent) {
        let text = if self.json {
            match serde_json::to_string(event) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Could not serialise event: {}", e);
                    return;
                }
            }
        } else {
            match event {
                TailEvent::Line(l) => {
                    format!("{}\t{}", l.timestamp.format("%Y-%m-%d %H:%M:%S"), l.payload)
                }
                TailEvent::ZoneChanged => "-- zone changed --".to_owned(),
            }
        };
        // A closed pipe (e.g. `| head`) is not worth a panic.
        let _ = writeln!(std::io::stdout().lock(), "{}", text);
    }
}

impl Subscriber for StdoutSubscriber {
    fn on_line(&mut self, event: LineEvent) {
        self.emit(&TailEvent::Line(event));
    }

    fn on_zone_changed(&mut self) {
        self.emit(&TailEvent::ZoneChanged);
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// stdout carries chat lines, so diagnostics go to stderr or, when a log
/// directory is configured, to a daily-rotated file there.
fn init_logging(log_dir: &Path) {
    let filter = || {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(
            "chat_tail_lib=info"
                .parse()
                .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
    };

    if log_dir.as_os_str().is_empty() {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .init();
        return;
    }

    let _ = std::fs::create_dir_all(log_dir);
    let file_appender = tracing_appender::rolling::daily(log_dir, "chat-tail.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard flushes and stops the writer; it must live as long
    // as the process.
    std::mem::forget(guard);

    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
}

/// Send panics to the diagnostics log, tagged with the panicking thread, so a
/// dead poll task is visible even when stderr is not.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string payload>")
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let thread = std::thread::current();
        tracing::error!(
            thread = thread.name().unwrap_or("<unnamed>"),
            location = %info.location().map_or_else(|| "?".to_owned(), |l| l.to_string()),
            "chat-tail panicked: {}",
            panic_message(info.payload())
        );
        default_hook(info);
    }));
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_FILE));
    let mut cfg = config::load_or_default(&config_path)?;
    args.apply(&mut cfg);

    init_logging(&cfg.log_dir);
    install_panic_hook();

    if args.write_config {
        config::save(&cfg, &config_path)
            .with_context(|| format!("saving config to {}", config_path.display()))?;
        tracing::info!("Config saved to {}", config_path.display());
    }

    if cfg.primary_root.as_os_str().is_empty()
        && cfg.secondary_root.as_os_str().is_empty()
        && cfg.custom_folder().is_none()
    {
        anyhow::bail!(
            "no log folders configured: set primary_root/secondary_root in {} or pass --primary/--secondary/--custom",
            config_path.display()
        );
    }

    let tailer = LogTailer::spawn(&cfg, Box::new(StdoutSubscriber { json: args.json }));
    tracing::info!(
        "chat-tail {} watching {:?} / {:?}",
        env!("CARGO_PKG_VERSION"),
        tailer.folders().primary.logs,
        tailer.folders().secondary.logs
    );
    tailer.start();

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!("Ctrl-C received — shutting down");

    tailer.stop();
    tailer.shutdown().await;
    Ok(())
}
