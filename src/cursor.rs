/// Read cursor into one chat log file.
///
/// Holds an open handle and the byte offset consumed so far. Each poll reads
/// exactly the bytes between that offset and the handle's current length.
///
/// The game keeps writing (and may truncate) the same path while we read.
/// `File::open` on Windows requests FILE_SHARE_READ | FILE_SHARE_WRITE |
/// FILE_SHARE_DELETE, so holding the handle never blocks the writer.
///
/// Rotation in place: if the file shrank below our offset, or the path now
/// names a different file than the one we hold, we report
/// `TailError::Truncated` and let the engine reconnect from byte 0, rather
/// than seeking backwards on a handle that may no longer match the path.
/// A path that vanished reports `TailError::NotFound`.
use crate::error::TailError;
use std::fs::{File, Metadata};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct Cursor {
    file:   File,
    path:   PathBuf,
    offset: u64,
}

impl Cursor {
    /// Open `path` for shared reading. With `seek_to_end` the content already
    /// in the file is skipped; otherwise reading starts at byte 0.
    pub fn connect(path: &Path, seek_to_end: bool) -> Result<Self, TailError> {
        let file = File::open(path).map_err(|e| TailError::from_io(path, e))?;

        let offset = if seek_to_end {
            file.metadata().map_err(|e| TailError::from_io(path, e))?.len()
        } else {
            0
        };

        tracing::debug!("Cursor opened {:?} at byte {}", path, offset);
        Ok(Self { file, path: path.to_path_buf(), offset })
    }

    /// Bytes appended since the last call. Empty when nothing new was written.
    pub fn read_new_bytes(&mut self) -> Result<Vec<u8>, TailError> {
        let held = self
            .file
            .metadata()
            .map_err(|e| TailError::from_io(&self.path, e))?;
        let on_disk = std::fs::metadata(&self.path).map_err(|e| TailError::from_io(&self.path, e))?;

        if replaced(&held, &on_disk) {
            return Err(TailError::Truncated { len: on_disk.len(), offset: self.offset });
        }

        let file_len = held.len();
        if file_len < self.offset {
            return Err(TailError::Truncated { len: file_len, offset: self.offset });
        }
        if file_len == self.offset {
            return Ok(Vec::new());
        }

        self.file
            .seek(SeekFrom::Start(self.offset))
            .map_err(|e| TailError::from_io(&self.path, e))?;

        let want = file_len - self.offset;
        let mut buf = Vec::with_capacity(want as usize);
        (&mut self.file)
            .take(want)
            .read_to_end(&mut buf)
            .map_err(|e| TailError::from_io(&self.path, e))?;

        // Advance only by what was actually read; a short read is picked up
        // on the next poll.
        self.offset += buf.len() as u64;
        Ok(buf)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Release the handle. Dropping the cursor has the same effect.
    pub fn close(self) {
        tracing::debug!("Cursor closed {:?} at byte {}", self.path, self.offset);
    }
}

/// Whether the path was deleted or renamed away and recreated while we held
/// the old file open.
#[cfg(unix)]
fn replaced(held: &Metadata, on_disk: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    held.dev() != on_disk.dev() || held.ino() != on_disk.ino()
}

/// No stable file identity in std here; a path shorter than our handle can
/// only be a different file.
#[cfg(not(unix))]
fn replaced(held: &Metadata, on_disk: &Metadata) -> bool {
    on_disk.len() < held.len()
}
