/// Tailer configuration, persisted as TOML, `chat-tail.toml` by default.
///
/// Every field has a default so a partial file (or no file at all) is valid.
/// The two candidate roots are normally filled in by whoever knows the
/// platform layout (installer, launcher script, CLI flags); this crate never
/// guesses them.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::selector::{CandidateFolders, LogFolder};

pub const DEFAULT_CONFIG_FILE: &str = "chat-tail.toml";

// ---------------------------------------------------------------------------
// TailConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TailConfig {
    /// First candidate root (e.g. the per-user documents folder).
    #[serde(default)]
    pub primary_root: PathBuf,

    /// Fallback candidate root (e.g. the install folder).
    #[serde(default)]
    pub secondary_root: PathBuf,

    /// Subfolder under each root that holds the `Chat-YY-MM-DD.log` files.
    #[serde(default = "default_log_subfolder")]
    pub log_subfolder: String,

    /// Folder that always wins selection when non-empty.
    #[serde(default)]
    pub custom_folder: String,

    /// File in the log folder whose modification signals a zone change.
    #[serde(default = "default_settings_file")]
    pub settings_file: String,

    /// Skip content already in the file on the first connect.
    #[serde(default = "default_true")]
    pub start_at_end: bool,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How often the authoritative folder is re-checked while connected.
    #[serde(default = "default_reevaluate_secs")]
    pub reevaluate_secs: u64,

    /// Directory for the rolling diagnostics log. Empty = stderr.
    #[serde(default)]
    pub log_dir: PathBuf,
}

fn default_log_subfolder() -> String { "Logs".to_owned() }
fn default_settings_file() -> String { "settings.ini".to_owned() }
fn default_true() -> bool { true }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_reevaluate_secs() -> u64 { 30 }

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            primary_root:     PathBuf::new(),
            secondary_root:   PathBuf::new(),
            log_subfolder:    default_log_subfolder(),
            custom_folder:    String::new(),
            settings_file:    default_settings_file(),
            start_at_end:     true,
            poll_interval_ms: default_poll_interval_ms(),
            reevaluate_secs:  default_reevaluate_secs(),
            log_dir:          PathBuf::new(),
        }
    }
}

impl TailConfig {
    pub fn folders(&self) -> CandidateFolders {
        CandidateFolders {
            primary:   LogFolder::new(&self.primary_root, &self.log_subfolder),
            secondary: LogFolder::new(&self.secondary_root, &self.log_subfolder),
        }
    }

    /// Tick cadence, never zero.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn reevaluate_interval(&self) -> Duration {
        Duration::from_secs(self.reevaluate_secs)
    }

    /// The override as a path, `None` when blank.
    pub fn custom_folder(&self) -> Option<PathBuf> {
        let trimmed = self.custom_folder.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

pub fn load_or_default(path: &Path) -> Result<TailConfig> {
    if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: TailConfig = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Config parse error in {}: {}", path.display(), e))?;
        Ok(cfg)
    } else {
        tracing::debug!("No config at {:?}, using defaults", path);
        Ok(TailConfig::default())
    }
}

pub fn save(config: &TailConfig, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let raw = toml::to_string_pretty(config)
        .map_err(|e| anyhow::anyhow!("Config serialize error: {}", e))?;
    std::fs::write(path, raw)?;
    Ok(())
}
