use super::StateStore;
use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// State keys stored as files directly under a directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl StateStore for DirStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.key_path(key);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(format!("Failed to read state file {:?}", path)),
        }
    }

    fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.root)
            .context(format!("Failed to create state directory {:?}", self.root))?;

        let path = self.key_path(key);
        fs::write(&path, data).context(format!("Failed to write state file {:?}", path))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.key_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(format!("Failed to remove state file {:?}", path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{read_default, read_string};
    use tempfile::TempDir;

    #[test]
    fn test_read_missing_key() {
        let temp = TempDir::new().unwrap();
        let store = DirStore::new(temp.path());
        assert!(store.read("next").unwrap().is_none());
        assert!(!store.exists("next"));
    }

    #[test]
    fn test_write_creates_directory() {
        let temp = TempDir::new().unwrap();
        let store = DirStore::new(temp.path().join(".ayup"));

        store.write("cmd", b"[\"python\"]").unwrap();
        assert_eq!(
            fs::read_to_string(temp.path().join(".ayup/cmd")).unwrap(),
            "[\"python\"]"
        );

        store.remove("cmd").unwrap();
        store.remove("cmd").unwrap();
        assert!(!store.exists("cmd"));
    }

    #[test]
    fn test_read_default_persists() {
        let temp = TempDir::new().unwrap();
        let store = DirStore::new(temp.path());

        assert_eq!(read_default(&store, "version", "1.0.0").unwrap(), "1.0.0");
        assert_eq!(read_string(&store, "version").unwrap().as_deref(), Some("1.0.0"));
        assert_eq!(read_default(&store, "version", "2.0.0").unwrap(), "1.0.0");
    }
}
