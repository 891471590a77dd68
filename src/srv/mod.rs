//! The server side of an assist session.
//!
//! One [`Server`] owns the on-disk layout from [`ServerConfig`] and the
//! assistant [`Registry`]. It assumes a single session at a time.

mod assist;
mod assistants;
mod auth;
mod reply;

pub use auth::{AllowAll, AuthorizedPeers, Peer, PeerAuth};
pub use reply::report_error;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::assist::Kind;
use crate::assistants::Registry;
use crate::buildkit::BuildExecutor;
use crate::config::ServerConfig;
use crate::error::{AssistError, Result};

pub struct Server {
    config: ServerConfig,
    registry: Arc<Registry>,
    executor: Arc<dyn BuildExecutor>,
    auth: Arc<dyn PeerAuth>,
    assistant_uploaded: AtomicBool,
}

impl Server {
    /// Creates the directory layout and registers the builtin, remote and
    /// previously pushed assistants.
    pub fn new(config: ServerConfig, executor: Arc<dyn BuildExecutor>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| AssistError::validation(e.to_string()))?;
        config.ensure_dirs()?;

        let registry = Registry::new();
        if let Some(dir) = &config.remote_assistants_dir {
            registry.register_dirs(Kind::Remote, dir)?;
        }
        registry.register_dirs(Kind::Local, &config.local_assistants_dir)?;

        let auth = Arc::new(AuthorizedPeers::new(config.authorized_clients.clone()));
        info!(
            assistants = registry.list().len(),
            authorized_clients = auth.len(),
            "server ready"
        );

        Ok(Self {
            config,
            registry: Arc::new(registry),
            executor,
            auth,
            assistant_uploaded: AtomicBool::new(false),
        })
    }

    pub fn with_auth(mut self, auth: Arc<dyn PeerAuth>) -> Self {
        self.auth = auth;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Records whether the last upload included an assistant bundle in
    /// `assistant_dir`. While set, each session re-registers it.
    pub fn set_assistant_uploaded(&self, uploaded: bool) {
        self.assistant_uploaded.store(uploaded, Ordering::SeqCst);
    }

    fn assistant_uploaded(&self) -> bool {
        self.assistant_uploaded.load(Ordering::SeqCst)
    }
}
