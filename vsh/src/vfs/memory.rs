use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use super::{
    join_path, normalize_path, parent_path, FileInfo, FileSystem, FsError, FsResult, WriteMode,
};

#[derive(Debug, Clone)]
enum MemEntry {
    File { content: Vec<u8>, mtime: u64 },
    Dir { mtime: u64 },
}

impl MemEntry {
    fn to_file_info(&self, path: &str) -> FileInfo {
        let name = path.rsplit('/').next().unwrap_or_default();
        let (size, is_dir, mtime) = match self {
            Self::File { content, mtime } => (content.len() as u64, false, *mtime),
            Self::Dir { mtime } => (0, true, *mtime),
        };
        FileInfo {
            path: path.to_string(),
            name: if name.is_empty() { "/".to_string() } else { name.to_string() },
            size,
            is_dir,
            mtime,
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// In-memory tree keyed by normalized absolute path.
pub struct MemoryFs {
    entries: RwLock<BTreeMap<String, MemEntry>>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    #[must_use]
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert("/".to_string(), MemEntry::Dir { mtime: now_secs() });
        Self {
            entries: RwLock::new(entries),
        }
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, BTreeMap<String, MemEntry>> {
        self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, BTreeMap<String, MemEntry>> {
        self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Create a directory and any missing parents.
    pub fn create_dir_all(&self, path: &str) -> FsResult<()> {
        let path = normalize_path(path);
        let mut entries = self.write_entries();
        let mut current = String::from("/");
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = join_path(&current, segment);
            match entries.get(&current) {
                Some(MemEntry::Dir { .. }) => {}
                Some(MemEntry::File { .. }) => return Err(FsError::not_directory(&current)),
                None => {
                    entries.insert(current.clone(), MemEntry::Dir { mtime: now_secs() });
                }
            }
        }
        Ok(())
    }

    /// Write a file, creating parent directories. Used to seed a tree.
    pub fn insert_file(&self, path: &str, content: impl Into<Vec<u8>>) -> FsResult<()> {
        let path = normalize_path(path);
        if let Some(parent) = parent_path(&path) {
            self.create_dir_all(&parent)?;
        }
        let mut entries = self.write_entries();
        if let Some(MemEntry::Dir { .. }) = entries.get(&path) {
            return Err(FsError::is_directory(&path));
        }
        entries.insert(
            path,
            MemEntry::File {
                content: content.into(),
                mtime: now_secs(),
            },
        );
        Ok(())
    }

    fn require_parent_dir(
        entries: &BTreeMap<String, MemEntry>,
        path: &str,
    ) -> FsResult<()> {
        let parent = parent_path(path).ok_or_else(|| FsError::invalid_argument("root path"))?;
        match entries.get(&parent) {
            Some(MemEntry::Dir { .. }) => Ok(()),
            Some(MemEntry::File { .. }) => Err(FsError::not_directory(&parent)),
            None => Err(FsError::not_found(path)),
        }
    }

    fn has_children(entries: &BTreeMap<String, MemEntry>, path: &str) -> bool {
        let prefix = join_path(path, "");
        entries
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }
}

#[async_trait]
impl FileSystem for MemoryFs {
    async fn read_file(&self, path: &str) -> FsResult<Bytes> {
        let path = normalize_path(path);
        let entries = self.read_entries();
        match entries.get(&path) {
            Some(MemEntry::File { content, .. }) => Ok(Bytes::copy_from_slice(content)),
            Some(MemEntry::Dir { .. }) => Err(FsError::is_directory(&path)),
            None => Err(FsError::not_found(&path)),
        }
    }

    async fn write_file(&self, path: &str, content: &[u8], mode: WriteMode) -> FsResult<()> {
        let path = normalize_path(path);
        let mut entries = self.write_entries();
        Self::require_parent_dir(&entries, &path)?;
        let mtime = now_secs();

        match entries.get_mut(&path) {
            Some(MemEntry::Dir { .. }) => Err(FsError::is_directory(&path)),
            Some(MemEntry::File { content: existing, mtime: m }) => {
                if mode == WriteMode::Truncate {
                    existing.clear();
                }
                existing.extend_from_slice(content);
                *m = mtime;
                Ok(())
            }
            None => {
                entries.insert(
                    path,
                    MemEntry::File {
                        content: content.to_vec(),
                        mtime,
                    },
                );
                Ok(())
            }
        }
    }

    async fn stat(&self, path: &str) -> FsResult<FileInfo> {
        let path = normalize_path(path);
        let entries = self.read_entries();
        entries
            .get(&path)
            .map(|e| e.to_file_info(&path))
            .ok_or_else(|| FsError::not_found(&path))
    }

    async fn list_directory(&self, path: &str) -> FsResult<Vec<FileInfo>> {
        let path = normalize_path(path);
        let entries = self.read_entries();

        match entries.get(&path) {
            Some(MemEntry::Dir { .. }) => {}
            Some(MemEntry::File { .. }) => return Err(FsError::not_directory(&path)),
            None => return Err(FsError::not_found(&path)),
        }

        let prefix = join_path(&path, "");
        let children = entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| !k[prefix.len()..].contains('/'))
            .map(|(k, e)| e.to_file_info(k))
            .collect();
        Ok(children)
    }

    async fn create_dir(&self, path: &str) -> FsResult<()> {
        let path = normalize_path(path);
        let mut entries = self.write_entries();
        if entries.contains_key(&path) {
            return Err(FsError::already_exists(&path));
        }
        Self::require_parent_dir(&entries, &path)?;
        entries.insert(path, MemEntry::Dir { mtime: now_secs() });
        Ok(())
    }

    async fn remove(&self, path: &str) -> FsResult<()> {
        let path = normalize_path(path);
        if path == "/" {
            return Err(FsError::invalid_argument("cannot remove root"));
        }
        let mut entries = self.write_entries();
        match entries.get(&path) {
            None => return Err(FsError::not_found(&path)),
            Some(MemEntry::Dir { .. }) if Self::has_children(&entries, &path) => {
                return Err(FsError::DirectoryNotEmpty(path));
            }
            Some(_) => {}
        }
        entries.remove(&path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_read() {
        let fs = MemoryFs::new();
        fs.write_file("/a.txt", b"hello", WriteMode::Truncate).await.unwrap();
        fs.write_file("/a.txt", b" world", WriteMode::Append).await.unwrap();
        assert_eq!(fs.read_file("/a.txt").await.unwrap(), Bytes::from("hello world"));

        fs.write_file("/a.txt", b"x", WriteMode::Truncate).await.unwrap();
        assert_eq!(fs.read_file("/a.txt").await.unwrap(), Bytes::from("x"));
    }

    #[tokio::test]
    async fn test_write_requires_parent() {
        let fs = MemoryFs::new();
        let err = fs.write_file("/missing/a.txt", b"x", WriteMode::Truncate).await.unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_directory_is_shallow_and_sorted() {
        let fs = MemoryFs::new();
        fs.insert_file("/d/b.txt", "b").unwrap();
        fs.insert_file("/d/a.txt", "a").unwrap();
        fs.insert_file("/d/sub/c.txt", "c").unwrap();
        fs.insert_file("/dd/x", "x").unwrap();

        let names: Vec<String> = fs
            .list_directory("/d")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
    }

    #[tokio::test]
    async fn test_remove_non_empty_dir_fails() {
        let fs = MemoryFs::new();
        fs.insert_file("/d/a", "a").unwrap();
        assert!(matches!(fs.remove("/d").await, Err(FsError::DirectoryNotEmpty(_))));
        fs.remove("/d/a").await.unwrap();
        fs.remove("/d").await.unwrap();
        assert!(!fs.exists("/d").await);
    }

    #[tokio::test]
    async fn test_stat() {
        let fs = MemoryFs::new();
        fs.create_dir("/docs").await.unwrap();
        fs.insert_file("/docs/readme", "1234").unwrap();
        let info = fs.stat("/docs/readme").await.unwrap();
        assert_eq!(info.name, "readme");
        assert_eq!(info.size, 4);
        assert!(!info.is_dir);
        assert!(fs.stat("/docs").await.unwrap().is_dir);
        assert!(matches!(fs.create_dir("/docs").await, Err(FsError::AlreadyExists(_))));
    }
}
