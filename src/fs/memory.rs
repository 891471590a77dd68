use super::StateStore;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// In-memory store for tests.
pub struct MemoryStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
    root: PathBuf,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_root(PathBuf::from("/mock/.ayup"))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            root,
        }
    }

    pub fn add_file(&self, key: &str, content: &str) {
        if let Ok(mut files) = self.files.write() {
            files.insert(key.to_string(), content.as_bytes().to_vec());
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .files
            .read()
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let files = self.files.read().map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(files.get(key).cloned())
    }

    fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut files = self.files.write().map_err(|_| anyhow!("memory store lock poisoned"))?;
        files.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut files = self.files.write().map_err(|_| anyhow!("memory store lock poisoned"))?;
        files.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        store.add_file("first", "builtin:python");
        store.write("next", b"nil").unwrap();

        assert_eq!(store.keys(), vec!["first", "next"]);
        assert_eq!(store.read("next").unwrap().unwrap(), b"nil");

        store.remove("next").unwrap();
        assert!(!store.exists("next"));
        assert_eq!(store.root(), Path::new("/mock/.ayup"));
    }
}
