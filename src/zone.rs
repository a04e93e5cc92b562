/// Watches the authoritative log folder for changes to the game's settings
/// file, which the client rewrites whenever the player changes zone.
///
/// Watch the directory rather than the file: the client replaces the file
/// on save, and a file-level watch would go stale after the first rename.
/// Event paths are matched by file name only, since some back ends report
/// canonicalised paths.
///
/// The signal is best-effort. `notify` delivers events on its own thread;
/// they are forwarded over a channel and inspected on the poll task, so
/// `on_zone_changed` runs in the same serialized context as `on_line`.
use anyhow::Result;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::mpsc::UnboundedSender;

pub type FsEvent = notify::Result<Event>;

pub struct ZoneWatch {
    _watcher:      RecommendedWatcher,
    settings_path: PathBuf,
    last_modified: Option<SystemTime>,
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl ZoneWatch {
    /// Start watching `folder` (non-recursively) for `settings_file`.
    pub fn open(folder: &Path, settings_file: &str, tx: UnboundedSender<FsEvent>) -> Result<Self> {
        let settings_path = folder.join(settings_file);

        let mut watcher = RecommendedWatcher::new(
            move |res: FsEvent| {
                let _ = tx.send(res); // receiver gone: poll loop shutting down
            },
            notify::Config::default(),
        )?;
        watcher.watch(folder, RecursiveMode::NonRecursive)?;

        tracing::debug!("Zone watch on {:?}", settings_path);
        Ok(Self {
            _watcher: watcher,
            last_modified: modified(&settings_path),
            settings_path,
        })
    }

    /// Returns `true` when `event` touched the settings file and its
    /// modification time differs from the last one seen.
    pub fn changed(&mut self, event: &Event) -> bool {
        let relevant = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
            && event.paths.iter().any(|p| p.file_name() == self.settings_path.file_name());
        if !relevant {
            return false;
        }

        let now = modified(&self.settings_path);
        if now.is_none() || now == self.last_modified {
            return false;
        }
        self.last_modified = now;
        true
    }
}
