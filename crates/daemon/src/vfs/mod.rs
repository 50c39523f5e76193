//! In-memory virtual filesystem.
//!
//! A [`Snapshot`] is an immutable tree of files and directories materialized
//! from one commit. It has no real disk paths; everything is addressed by a
//! clean relative path (`""` or `"."` is the root).

use std::io;
use std::time::SystemTime;

use bytes::Bytes;

pub mod snapshot;

pub use snapshot::{Snapshot, SnapshotBuilder, SnapshotRef};

/// Kind of filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

/// Metadata for a single entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Base name of the entry (empty for the root).
    pub name: String,
    pub kind: FileKind,
    /// Size in bytes (0 for directories).
    pub size: u64,
    pub modified: SystemTime,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

/// An opened entry: its metadata plus, for files, the full contents.
#[derive(Debug, Clone)]
pub struct VfsFile {
    pub info: FileInfo,
    pub contents: Bytes,
}

/// Read-only filesystem interface.
///
/// `read_dir` always returns the complete set of entries; callers that want
/// fewer must truncate themselves.
pub trait VirtualFs: Send + Sync {
    /// Open a file or directory by path.
    fn open(&self, path: &str) -> io::Result<VfsFile>;

    /// Get metadata for a file or directory.
    fn stat(&self, path: &str) -> io::Result<FileInfo>;

    /// List every entry of a directory, sorted by name.
    fn read_dir(&self, path: &str) -> io::Result<Vec<FileInfo>>;
}

impl<T: VirtualFs + ?Sized> VirtualFs for std::sync::Arc<T> {
    fn open(&self, path: &str) -> io::Result<VfsFile> {
        (**self).open(path)
    }

    fn stat(&self, path: &str) -> io::Result<FileInfo> {
        (**self).stat(path)
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<FileInfo>> {
        (**self).read_dir(path)
    }
}
