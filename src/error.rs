/// Failure taxonomy for the tailing engine.
///
/// None of these ever reach a subscriber. The poll loop turns each one into
/// a local recovery step: retry on the next tick, or drop the cursor and
/// reconnect.
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TailError {
    /// Expected log file is absent (game not running yet, new day not written).
    #[error("log file not found: {0}")]
    NotFound(PathBuf),

    /// Sharing violation, permission hiccup or any other I/O failure.
    #[error("transient I/O failure on {path}: {source}")]
    Transient {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File shrank below the read offset, or the path was recreated under us.
    /// Either way it is treated as rotation in place.
    #[error("log file truncated or replaced: length {len}, offset {offset}")]
    Truncated { len: u64, offset: u64 },

    /// Line failed the positional header check or held an invalid date.
    #[error("malformed log line")]
    MalformedLine,
}

impl TailError {
    pub(crate) fn from_io(path: &std::path::Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::Transient { path: path.to_path_buf(), source: err }
        }
    }
}
