// Filesystem adapter: maps request paths onto a virtual filesystem.
//
// Rewrites `/` to the index document, rejects anything that is not a clean
// relative path, and wraps opened entries so they also answer stat and
// bounded directory listing.

use std::io;

use bytes::Bytes;
use gitserve_common::path::request_path;
use thiserror::Error;
use tracing::debug;

use crate::vfs::{FileInfo, VfsFile, VirtualFs};

/// Document served for `/`.
pub const INDEX_DOCUMENT: &str = "index.html";

#[derive(Debug, Error)]
pub enum AdapterError {
    /// Invalid request path or missing entry.
    #[error("file not found: {0}")]
    NotFound(String),

    /// Any other filesystem failure, passed through unchanged.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl AdapterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Serves entries of a [`VirtualFs`] by request path.
#[derive(Debug, Clone)]
pub struct FsAdapter<F> {
    fs: F,
    index_document: String,
}

impl<F: VirtualFs + Clone> FsAdapter<F> {
    pub fn new(fs: F) -> Self {
        Self { fs, index_document: INDEX_DOCUMENT.to_string() }
    }

    pub fn with_index_document(mut self, index_document: impl Into<String>) -> Self {
        self.index_document = index_document.into();
        self
    }

    pub fn index_document(&self) -> &str {
        &self.index_document
    }

    /// Open the entry behind an HTTP request path such as `/css/site.css`.
    ///
    /// Never panics on hostile input: every path that fails validation is
    /// reported as [`AdapterError::NotFound`].
    pub fn open(&self, name: &str) -> Result<ServedFile<F>, AdapterError> {
        let path = if name == "/" {
            self.index_document.as_str()
        } else {
            request_path(name).map_err(|error| {
                debug!(path = %name, %error, "rejected request path");
                AdapterError::NotFound(name.to_string())
            })?
        };

        let file = self.fs.open(path).map_err(|error| classify(path, error))?;
        Ok(ServedFile { fs: self.fs.clone(), name: path.to_string(), file })
    }
}

/// An opened entry that also answers stat and directory listing.
#[derive(Debug, Clone)]
pub struct ServedFile<F> {
    fs: F,
    name: String,
    file: VfsFile,
}

impl<F: VirtualFs> ServedFile<F> {
    /// Filesystem-relative path the request resolved to.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contents(&self) -> &Bytes {
        &self.file.contents
    }

    /// Fresh metadata for the resolved path, looked up on the filesystem
    /// rather than taken from the open handle.
    pub fn stat(&self) -> Result<FileInfo, AdapterError> {
        self.fs.stat(&self.name).map_err(|error| classify(&self.name, error))
    }

    /// List the directory, returning at most `limit` entries.
    ///
    /// The filesystem always yields the full listing; it is truncated here.
    /// Truncation saturates: a limit above the entry count returns every
    /// entry, and `None` or `Some(0)` means no limit.
    pub fn read_dir(&self, limit: Option<usize>) -> Result<Vec<FileInfo>, AdapterError> {
        let mut entries = self.fs.read_dir(&self.name).map_err(|error| classify(&self.name, error))?;
        if let Some(limit) = limit.filter(|limit| *limit > 0) {
            entries.truncate(limit);
        }
        Ok(entries)
    }
}

fn classify(path: &str, error: io::Error) -> AdapterError {
    if error.kind() == io::ErrorKind::NotFound {
        AdapterError::NotFound(path.to_string())
    } else {
        AdapterError::Io(error)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::SystemTime;

    use super::*;
    use crate::vfs::{FileKind, Snapshot};

    fn adapter() -> FsAdapter<Arc<Snapshot>> {
        let snapshot = Snapshot::builder()
            .file("index.html", "hello")
            .file("css/site.css", "body {}")
            .file("docs/a.md", "a")
            .file("docs/b.md", "b")
            .file("docs/c.md", "c")
            .build();
        FsAdapter::new(Arc::new(snapshot))
    }

    #[test]
    fn root_is_rewritten_to_index_document() {
        let file = adapter().open("/").expect("root should open");
        assert_eq!(file.name(), "index.html");
        assert_eq!(file.contents().as_ref(), b"hello");
    }

    #[test]
    fn custom_index_document() {
        let snapshot = Snapshot::builder().file("home.htm", "home").build();
        let adapter = FsAdapter::new(Arc::new(snapshot)).with_index_document("home.htm");
        assert_eq!(adapter.open("/").unwrap().contents().as_ref(), b"home");
    }

    #[test]
    fn nested_path_opens_with_leading_slash_stripped() {
        let file = adapter().open("/css/site.css").expect("file should open");
        assert_eq!(file.name(), "css/site.css");
        assert_eq!(file.contents().as_ref(), b"body {}");
    }

    #[test]
    fn invalid_paths_are_not_found() {
        let adapter = adapter();
        for path in ["/../etc/passwd", "//etc/passwd", "/docs//a.md", "/docs/./a.md", "", "/docs/"] {
            let error = adapter.open(path).expect_err("invalid path should fail");
            assert!(error.is_not_found(), "{path:?} should be not-found, got {error:?}");
        }
    }

    #[test]
    fn missing_file_is_not_found() {
        let error = adapter().open("/missing.txt").expect_err("missing file should fail");
        assert!(error.is_not_found());
    }

    #[test]
    fn missing_index_is_not_found() {
        let adapter = FsAdapter::new(Arc::new(Snapshot::builder().file("a.txt", "a").build()));
        assert!(adapter.open("/").expect_err("no index").is_not_found());
    }

    #[test]
    fn read_dir_truncates_to_limit() {
        let dir = adapter().open("/docs").unwrap();
        let entries = dir.read_dir(Some(2)).unwrap();
        let names: Vec<&str> = entries.iter().map(|info| info.name.as_str()).collect();
        assert_eq!(names, vec!["a.md", "b.md"]);
    }

    #[test]
    fn read_dir_limit_equal_to_count_returns_all() {
        let dir = adapter().open("/docs").unwrap();
        assert_eq!(dir.read_dir(Some(3)).unwrap().len(), 3);
    }

    #[test]
    fn read_dir_limit_above_count_returns_all_without_error() {
        let dir = adapter().open("/docs").unwrap();
        assert_eq!(dir.read_dir(Some(100)).unwrap().len(), 3);
    }

    #[test]
    fn read_dir_without_limit_returns_all() {
        let dir = adapter().open("/docs").unwrap();
        assert_eq!(dir.read_dir(None).unwrap().len(), 3);
        assert_eq!(dir.read_dir(Some(0)).unwrap().len(), 3);
    }

    #[test]
    fn read_dir_on_file_propagates_io_error() {
        let file = adapter().open("/index.html").unwrap();
        let error = file.read_dir(Some(10)).expect_err("file has no listing");
        assert!(matches!(error, AdapterError::Io(ref io) if io.kind() == io::ErrorKind::NotADirectory));
    }

    /// Filesystem whose open handle and stat deliberately disagree.
    #[derive(Clone)]
    struct CountingFs {
        stats: Arc<AtomicUsize>,
    }

    impl VirtualFs for CountingFs {
        fn open(&self, _path: &str) -> io::Result<VfsFile> {
            Ok(VfsFile {
                info: FileInfo {
                    name: "stale".into(),
                    kind: FileKind::File,
                    size: 1,
                    modified: SystemTime::UNIX_EPOCH,
                },
                contents: Bytes::from_static(b"x"),
            })
        }

        fn stat(&self, path: &str) -> io::Result<FileInfo> {
            self.stats.fetch_add(1, Ordering::SeqCst);
            Ok(FileInfo {
                name: path.into(),
                kind: FileKind::File,
                size: 42,
                modified: SystemTime::UNIX_EPOCH,
            })
        }

        fn read_dir(&self, _path: &str) -> io::Result<Vec<FileInfo>> {
            Err(io::Error::other("backend unavailable"))
        }
    }

    #[test]
    fn stat_queries_filesystem_by_resolved_name() {
        let fs = CountingFs { stats: Arc::new(AtomicUsize::new(0)) };
        let file = FsAdapter::new(fs.clone()).open("/fresh.txt").unwrap();

        let info = file.stat().unwrap();
        assert_eq!(info.name, "fresh.txt");
        assert_eq!(info.size, 42);
        assert_eq!(fs.stats.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn other_io_errors_are_passed_through() {
        let fs = CountingFs { stats: Arc::new(AtomicUsize::new(0)) };
        let file = FsAdapter::new(fs).open("/fresh.txt").unwrap();
        let error = file.read_dir(None).expect_err("backend error");
        assert!(!error.is_not_found());
        assert_eq!(error.to_string(), "backend unavailable");
    }
}
