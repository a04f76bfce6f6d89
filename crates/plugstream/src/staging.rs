//! Temporary-file staging for file-delivery modes.

use std::io::{self, Write};
use std::path::Path;

use tempfile::{NamedTempFile, TempPath};

/// Side-buffer that materializes stream content as a local file.
///
/// Written only while the owning stream is non-terminal. On success the
/// file is closed and handed off exactly once via [`close`](Self::close);
/// dropping an unclosed staging (error or cancel path) deletes the file.
#[derive(Debug)]
pub struct FileStaging {
    file: NamedTempFile,
}

impl FileStaging {
    pub fn create() -> io::Result<Self> {
        Ok(Self {
            file: NamedTempFile::new()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)
    }

    /// Flush and detach the finished file. The returned path still deletes
    /// the file when dropped, so the owner must retain it for as long as
    /// the consumer may use it.
    pub fn close(mut self) -> io::Result<TempPath> {
        self.file.flush()?;
        Ok(self.file.into_temp_path())
    }
}
