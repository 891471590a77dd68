use anyhow::Context as _;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

use crate::error::Result;

/// Dotenv file an extern assistant may ship alongside its source.
pub const ENV_FILE: &str = ".ayup-env";

/// Reads a dotenv file and deletes it.
///
/// A missing file yields no variables, so a second call after a successful
/// one returns nothing.
pub fn load_env(path: &Path) -> Result<BTreeMap<String, String>> {
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(e) if e.not_found() => {
            debug!(path = ?path, "no env file");
            return Ok(BTreeMap::new());
        }
        Err(e) => return Err(anyhow::Error::new(e).context(format!("open {:?}", path)).into()),
    };

    let mut vars = BTreeMap::new();
    for item in iter {
        let (key, value) = item.with_context(|| format!("parse {:?}", path))?;
        vars.insert(key, value);
    }

    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(anyhow::Error::new(e).context(format!("remove {:?}", path)).into()),
    }

    debug!(path = ?path, count = vars.len(), "loaded env file");
    Ok(vars)
}
