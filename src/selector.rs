/// Chooses which folder's daily chat log is the one being written.
///
/// The game can write into either of two locations (for example a
/// per-user documents folder and the install folder) and may switch between
/// them without notice. The folder whose `Chat-YY-MM-DD.log` for today was
/// modified most recently is taken to be authoritative.
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

// ---------------------------------------------------------------------------
// Candidate folders
// ---------------------------------------------------------------------------

/// One candidate root and the subfolder inside it that holds the chat logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFolder {
    pub root: PathBuf,
    pub logs: PathBuf,
}

impl LogFolder {
    pub fn new(root: impl Into<PathBuf>, subfolder: &str) -> Self {
        let root = root.into();
        let logs = if subfolder.is_empty() { root.clone() } else { root.join(subfolder) };
        Self { root, logs }
    }
}

/// The two resolved candidate locations: primary first, fallback second.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFolders {
    pub primary:   LogFolder,
    pub secondary: LogFolder,
}

// ---------------------------------------------------------------------------
// LogSource
// ---------------------------------------------------------------------------

/// File name of the chat log for `day`, e.g. `Chat-24-03-05.log`.
pub fn log_file_name(day: NaiveDate) -> String {
    day.format("Chat-%y-%m-%d.log").to_string()
}

/// A selected folder plus the path of its log file for one local date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSource {
    pub folder: PathBuf,
    pub day:    NaiveDate,
    pub path:   PathBuf,
}

impl LogSource {
    pub fn new(folder: impl Into<PathBuf>, day: NaiveDate) -> Self {
        let folder = folder.into();
        let path = folder.join(log_file_name(day));
        Self { folder, day, path }
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Modification time of `folder`'s log for `day`, `None` if it cannot be read.
/// `None` orders below every `Some`, i.e. a missing file is the oldest.
fn modified(folder: &Path, day: NaiveDate) -> Option<SystemTime> {
    std::fs::metadata(folder.join(log_file_name(day)))
        .and_then(|m| m.modified())
        .ok()
}

/// Returns the authoritative log folder for `day`.
///
/// A non-empty `custom` override wins without touching the file system.
/// Otherwise the folder whose log file is newest wins; equal times go to
/// `folder_a`. `None` when neither folder has a log for `day`.
pub fn select(
    custom:   Option<&Path>,
    folder_a: &Path,
    folder_b: &Path,
    day:      NaiveDate,
) -> Option<PathBuf> {
    if let Some(custom) = custom.filter(|p| !p.as_os_str().is_empty()) {
        return Some(custom.to_path_buf());
    }

    let a = modified(folder_a, day);
    let b = modified(folder_b, day);

    let selected = match (a, b) {
        (None, None) => None,
        (a, b) if a >= b => Some(folder_a.to_path_buf()),
        _ => Some(folder_b.to_path_buf()),
    };

    tracing::debug!("select: {:?} (a={:?}, b={:?})", selected, a, b);
    selected
}
