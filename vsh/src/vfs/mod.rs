//! Virtual filesystem collaborator
//!
//! The shell never touches the host filesystem. Everything it reads, lists or
//! writes goes through a [`FileSystem`] implementation supplied by the
//! embedding application. [`MemoryFs`] is the in-process reference backend.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

mod memory;

pub use memory::MemoryFs;

pub type FsResult<T> = Result<T, FsError>;

/// Errors surfaced by a [`FileSystem`].
///
/// The display text is the bare reason so callers can format
/// `cmd: path: reason` the way shell diagnostics read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("No such file or directory")]
    NotFound(String),

    #[error("File exists")]
    AlreadyExists(String),

    #[error("Not a directory")]
    NotDirectory(String),

    #[error("Is a directory")]
    IsDirectory(String),

    #[error("Directory not empty")]
    DirectoryNotEmpty(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl FsError {
    pub fn not_found(path: &str) -> Self {
        Self::NotFound(path.to_string())
    }

    pub fn already_exists(path: &str) -> Self {
        Self::AlreadyExists(path.to_string())
    }

    pub fn not_directory(path: &str) -> Self {
        Self::NotDirectory(path.to_string())
    }

    pub fn is_directory(path: &str) -> Self {
        Self::IsDirectory(path.to_string())
    }

    pub fn invalid_argument(msg: &str) -> Self {
        Self::InvalidArgument(msg.to_string())
    }

    /// The path the error refers to, when it has one.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::NotFound(p)
            | Self::AlreadyExists(p)
            | Self::NotDirectory(p)
            | Self::IsDirectory(p)
            | Self::DirectoryNotEmpty(p) => Some(p),
            Self::InvalidArgument(_) => None,
        }
    }

    /// `path: reason`, or just the reason when there is no path.
    pub fn describe(&self) -> String {
        match self.path() {
            Some(path) => format!("{path}: {self}"),
            None => self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace existing content (create if missing)
    Truncate,
    /// Append to existing content (create if missing)
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    /// Seconds since the Unix epoch
    pub mtime: u64,
}

#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read_file(&self, path: &str) -> FsResult<Bytes>;

    async fn write_file(&self, path: &str, content: &[u8], mode: WriteMode) -> FsResult<()>;

    async fn stat(&self, path: &str) -> FsResult<FileInfo>;

    /// Entries directly below `path`, sorted by name. Never includes `.` or `..`.
    async fn list_directory(&self, path: &str) -> FsResult<Vec<FileInfo>>;

    async fn exists(&self, path: &str) -> bool {
        self.stat(path).await.is_ok()
    }

    async fn create_dir(&self, path: &str) -> FsResult<()>;

    /// Remove a file or an empty directory.
    async fn remove(&self, path: &str) -> FsResult<()>;
}

/// Collapse `.`, `..` and duplicate slashes of an absolute path.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Resolve `path` against the working directory `cwd`.
pub fn resolve_path(cwd: &str, path: &str) -> String {
    if path.starts_with('/') {
        normalize_path(path)
    } else if cwd == "/" {
        normalize_path(&format!("/{path}"))
    } else {
        normalize_path(&format!("{cwd}/{path}"))
    }
}

/// Parent directory of a normalized absolute path, `None` for the root.
pub fn parent_path(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rsplit_once('/') {
        Some(("", _)) => Some("/".to_string()),
        Some((parent, _)) => Some(parent.to_string()),
        None => Some("/".to_string()),
    }
}

/// Join a directory and an entry name without doubling the root slash.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{}/{name}", dir.trim_end_matches('/'))
    }
}
