use anyhow::Context as _;
use sha2::{Digest, Sha256};
use tracing::info;

use super::Server;
use crate::assist::{full_name, load_name, Kind};
use crate::error::Result;
use crate::fs::remove_dir_if_exists;

impl Server {
    /// Full names of every registered assistant, sorted.
    pub fn assistants_list(&self) -> Vec<String> {
        self.registry.list().iter().map(|a| a.name()).collect()
    }

    /// Keeps the uploaded assistant bundle as a local assistant and returns
    /// its full name. The bundle is stored under the SHA-256 of its name, so
    /// pushing the same name again replaces it.
    pub fn assistants_push(&self) -> Result<String> {
        let name = load_name(&self.config.assistant_dir)?;
        let digest = hex::encode(Sha256::digest(name.as_bytes()));
        let path = self.config.local_assistants_dir.join(digest);

        remove_dir_if_exists(&path)?;
        std::fs::create_dir_all(&self.config.local_assistants_dir)
            .with_context(|| format!("create {:?}", self.config.local_assistants_dir))?;
        std::fs::rename(&self.config.assistant_dir, &path).with_context(|| {
            format!("rename {:?} to {:?}", self.config.assistant_dir, path)
        })?;

        let full = full_name(Kind::Local, &name);
        self.registry.del(&full);
        self.registry.register_dir(Kind::Local, &path)?;
        self.set_assistant_uploaded(false);

        info!(assistant = %full, path = ?path, "stored pushed assistant");
        Ok(full)
    }
}
