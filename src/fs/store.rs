use anyhow::{Context, Result};
use std::path::Path;

/// Key/value view of a pipeline state directory.
pub trait StateStore: Send + Sync {
    fn root(&self) -> &Path;

    /// Returns `None` when the key has never been written.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn write(&self, key: &str, data: &[u8]) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    fn exists(&self, key: &str) -> bool {
        matches!(self.read(key), Ok(Some(_)))
    }
}

pub fn read_string(store: &dyn StateStore, key: &str) -> Result<Option<String>> {
    match store.read(key)? {
        Some(bytes) => {
            let text = String::from_utf8(bytes)
                .with_context(|| format!("State file {} is not valid UTF-8", key))?;
            Ok(Some(text))
        }
        None => Ok(None),
    }
}

/// Reads `key`, writing `default` first if it is missing.
pub fn read_default(store: &dyn StateStore, key: &str, default: &str) -> Result<String> {
    if let Some(text) = read_string(store, key)? {
        return Ok(text);
    }

    store.write(key, default.as_bytes())?;
    Ok(default.to_string())
}
