//! Immutable point-in-time file tree.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::time::SystemTime;

use bytes::Bytes;

use super::{FileInfo, FileKind, VfsFile, VirtualFs};

/// The reference a snapshot was materialized from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    /// Branch being tracked, if any.
    pub branch: Option<String>,
    /// Full commit id.
    pub commit: String,
}

/// An immutable in-memory tree.
///
/// Every entry shares the snapshot's modification time (the commit time).
#[derive(Debug, Clone)]
pub struct Snapshot {
    reference: Option<SnapshotRef>,
    modified: SystemTime,
    files: BTreeMap<String, Bytes>,
    /// Directory path -> child names. The root is `""`.
    dirs: BTreeMap<String, BTreeSet<String>>,
}

impl Default for Snapshot {
    fn default() -> Self {
        SnapshotBuilder::new().build()
    }
}

impl Snapshot {
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::new()
    }

    pub fn reference(&self) -> Option<&SnapshotRef> {
        self.reference.as_ref()
    }

    /// Commit id the tree was built from.
    pub fn commit_id(&self) -> Option<&str> {
        self.reference.as_ref().map(|reference| reference.commit.as_str())
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Paths of all regular files, sorted.
    pub fn file_paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Contents of a regular file.
    pub fn contents(&self, path: &str) -> Option<&Bytes> {
        self.files.get(key(path))
    }

    fn info(&self, path: &str) -> Option<FileInfo> {
        let path = key(path);
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        if let Some(contents) = self.files.get(path) {
            return Some(FileInfo {
                name,
                kind: FileKind::File,
                size: contents.len() as u64,
                modified: self.modified,
            });
        }
        self.dirs.contains_key(path).then(|| FileInfo {
            name,
            kind: FileKind::Directory,
            size: 0,
            modified: self.modified,
        })
    }
}

impl VirtualFs for Snapshot {
    fn open(&self, path: &str) -> io::Result<VfsFile> {
        let info = self.stat(path)?;
        let contents = self.files.get(key(path)).cloned().unwrap_or_default();
        Ok(VfsFile { info, contents })
    }

    fn stat(&self, path: &str) -> io::Result<FileInfo> {
        self.info(path).ok_or_else(|| not_found(path))
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<FileInfo>> {
        let dir = key(path);
        let Some(children) = self.dirs.get(dir) else {
            if self.files.contains_key(dir) {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("not a directory: {path}"),
                ));
            }
            return Err(not_found(path));
        };

        children
            .iter()
            .map(|child| {
                let child_path =
                    if dir.is_empty() { child.clone() } else { format!("{dir}/{child}") };
                self.info(&child_path).ok_or_else(|| not_found(&child_path))
            })
            .collect()
    }
}

/// Incrementally assembles a [`Snapshot`].
#[derive(Debug)]
pub struct SnapshotBuilder {
    reference: Option<SnapshotRef>,
    modified: SystemTime,
    files: BTreeMap<String, Bytes>,
    dirs: BTreeMap<String, BTreeSet<String>>,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        let mut dirs = BTreeMap::new();
        dirs.insert(String::new(), BTreeSet::new());
        Self { reference: None, modified: SystemTime::UNIX_EPOCH, files: BTreeMap::new(), dirs }
    }

    pub fn reference(mut self, reference: SnapshotRef) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn modified_at(mut self, modified: SystemTime) -> Self {
        self.modified = modified;
        self
    }

    /// Add a file, creating missing parent directories.
    pub fn file(mut self, path: &str, contents: impl Into<Bytes>) -> Self {
        self.insert_file(path, contents);
        self
    }

    pub fn insert_file(&mut self, path: &str, contents: impl Into<Bytes>) {
        self.link(path);
        self.files.insert(path.to_string(), contents.into());
    }

    /// Add an (possibly empty) directory, creating missing parents.
    pub fn insert_dir(&mut self, path: &str) {
        self.link(path);
        self.dirs.entry(path.to_string()).or_default();
    }

    fn link(&mut self, path: &str) {
        let mut parent = String::new();
        for segment in path.split('/') {
            self.dirs.entry(parent.clone()).or_default().insert(segment.to_string());
            if !parent.is_empty() {
                parent.push('/');
            }
            parent.push_str(segment);
        }
    }

    pub fn build(self) -> Snapshot {
        Snapshot {
            reference: self.reference,
            modified: self.modified,
            files: self.files,
            dirs: self.dirs,
        }
    }
}

fn key(path: &str) -> &str {
    if path == "." {
        ""
    } else {
        path
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("not found: {path}"))
}
