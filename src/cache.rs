use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{CacheConfig, WritePolicy};
use crate::error::Result;

const FILE_PREFIX: &str = "img_";
const FILE_EXTENSION: &str = "jpg";
const PARTIAL_SUFFIX: &str = "part";

/// Flat directory of `img_<index>.jpg` files.
///
/// All operations are blocking; async callers go through `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    policy: WritePolicy,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>, policy: WritePolicy) -> Self {
        Self {
            dir: dir.into(),
            policy,
        }
    }

    pub fn from_config(cfg: &CacheConfig) -> Self {
        Self::new(cfg.directory.clone(), cfg.write_policy)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn policy(&self) -> WritePolicy {
        self.policy
    }

    pub fn file_name(index: usize) -> String {
        format!("{FILE_PREFIX}{index}.{FILE_EXTENSION}")
    }

    pub fn path_for(&self, index: usize) -> PathBuf {
        self.dir.join(Self::file_name(index))
    }

    /// Removes every `img_*` file. A missing directory is already clear.
    pub fn clear(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let is_ours = name.to_str().is_some_and(|n| n.starts_with(FILE_PREFIX));
            if !is_ours || !entry.file_type()?.is_file() {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!(path = %entry.path().display(), "cache: file vanished during clear");
                }
                Err(err) => return Err(err.into()),
            }
        }
        info!(dir = %self.dir.display(), removed, "cache cleared");
        Ok(removed)
    }

    /// Cached images ordered by their numeric index.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut indexed = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(index) = name.to_str().and_then(parse_index) {
                indexed.push((index, entry.path()));
            }
        }
        indexed.sort();
        Ok(indexed.into_iter().map(|(_, path)| path).collect())
    }

    /// Writes `bytes` as the image for `index` and returns its path.
    pub fn save(&self, index: usize, bytes: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(index);
        if self.policy == WritePolicy::SkipExisting && path.is_file() {
            debug!(path = %path.display(), "cache: keeping existing file");
            return Ok(path);
        }
        let partial = self
            .dir
            .join(format!("{}.{PARTIAL_SUFFIX}", Self::file_name(index)));
        fs::write(&partial, bytes)?;
        if let Err(err) = fs::rename(&partial, &path) {
            let _ = fs::remove_file(&partial);
            return Err(err.into());
        }
        debug!(path = %path.display(), bytes = bytes.len(), "cache: saved");
        Ok(path)
    }
}

fn parse_index(name: &str) -> Option<usize> {
    let digits = name
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_EXTENSION)?
        .strip_suffix('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_directory_is_empty_and_clear() {
        let tmp = tempdir().unwrap();
        let store = CacheStore::new(tmp.path().join("absent"), WritePolicy::Overwrite);
        assert!(store.list().unwrap().is_empty());
        assert_eq!(store.clear().unwrap(), 0);
    }

    #[test]
    fn list_orders_by_numeric_index() {
        let tmp = tempdir().unwrap();
        let store = CacheStore::new(tmp.path(), WritePolicy::Overwrite);
        for index in [10, 2, 0, 1] {
            store.save(index, b"x").unwrap();
        }
        let names: Vec<String> = store
            .list()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["img_0.jpg", "img_1.jpg", "img_2.jpg", "img_10.jpg"]);
    }

    #[test]
    fn list_ignores_foreign_and_partial_files() {
        let tmp = tempdir().unwrap();
        let store = CacheStore::new(tmp.path(), WritePolicy::Overwrite);
        store.save(3, b"x").unwrap();
        fs::write(tmp.path().join("img_4.jpg.part"), b"half").unwrap();
        fs::write(tmp.path().join("img_.jpg"), b"x").unwrap();
        fs::write(tmp.path().join("img_x.jpg"), b"x").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"x").unwrap();
        fs::create_dir(tmp.path().join("img_5.jpg")).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed, vec![tmp.path().join("img_3.jpg")]);
    }

    #[test]
    fn clear_only_touches_cache_files() {
        let tmp = tempdir().unwrap();
        let store = CacheStore::new(tmp.path(), WritePolicy::Overwrite);
        store.save(0, b"a").unwrap();
        store.save(1, b"b").unwrap();
        fs::write(tmp.path().join("img_9.jpg.part"), b"half").unwrap();
        fs::write(tmp.path().join("keep.txt"), b"k").unwrap();

        assert_eq!(store.clear().unwrap(), 3);
        assert!(store.list().unwrap().is_empty());
        assert!(tmp.path().join("keep.txt").exists());
    }

    #[test]
    fn overwrite_policy_replaces_contents() {
        let tmp = tempdir().unwrap();
        let store = CacheStore::new(tmp.path(), WritePolicy::Overwrite);
        let path = store.save(0, b"old").unwrap();
        store.save(0, b"new").unwrap();
        assert_eq!(fs::read(path).unwrap(), b"new");
        assert!(!tmp.path().join("img_0.jpg.part").exists());
    }

    #[test]
    fn skip_existing_policy_keeps_contents() {
        let tmp = tempdir().unwrap();
        let store = CacheStore::new(tmp.path(), WritePolicy::SkipExisting);
        let path = store.save(0, b"old").unwrap();
        let again = store.save(0, b"new").unwrap();
        assert_eq!(path, again);
        assert_eq!(fs::read(path).unwrap(), b"old");
    }

    #[test]
    fn save_creates_nested_directory() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("a").join("b");
        let store = CacheStore::new(&dir, WritePolicy::Overwrite);
        let path = store.save(7, b"x").unwrap();
        assert_eq!(path, dir.join("img_7.jpg"));
        assert!(path.is_file());
    }
}
