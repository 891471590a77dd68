use anyhow::Result;
use async_trait::async_trait;
use nix::sys::signal::Signal;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

use super::{Definition, Platform, SolveStatus};

/// Exit code reported when the executor could not determine the real one.
pub const UNKNOWN_EXIT_STATUS: u32 = 255;

#[derive(Clone)]
pub struct SolveRequest {
    pub definition: Definition,
    /// Directories served for `local://<name>` sources.
    pub local_mounts: BTreeMap<String, PathBuf>,
    /// Values for secrets referenced by name from exec steps.
    pub secrets: BTreeMap<String, Vec<u8>>,
    /// Export the result filesystem into this directory.
    pub export_dir: Option<PathBuf>,
}

impl SolveRequest {
    pub fn new(definition: Definition) -> Self {
        Self {
            definition,
            local_mounts: BTreeMap::new(),
            secrets: BTreeMap::new(),
            export_dir: None,
        }
    }

    pub fn with_local(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.local_mounts.insert(name.to_string(), path.into());
        self
    }

    pub fn with_secrets(mut self, secrets: BTreeMap<String, Vec<u8>>) -> Self {
        self.secrets.extend(secrets);
        self
    }

    pub fn with_export(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = Some(dir.into());
        self
    }
}

impl fmt::Debug for SolveRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolveRequest")
            .field("definition", &self.definition.digest())
            .field("local_mounts", &self.local_mounts)
            .field("secrets", &self.secrets.keys().collect::<Vec<_>>())
            .field("export_dir", &self.export_dir)
            .finish()
    }
}

/// Runtime configuration carried by an image: its own metadata when it
/// comes from a registry, or what a Dockerfile declares on top of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageConfig {
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub working_dir: String,
    pub env: Vec<(String, String)>,
    /// As written, e.g. `8080`, `53/udp` or `8000-8010/tcp`.
    pub exposed_ports: Vec<String>,
    pub user: Option<String>,
}

/// Handle to a solved filesystem held by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolvedRef {
    pub id: String,
    pub digest: String,
}

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub cwd: String,
    pub args: Vec<String>,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: u32,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

pub type ProcessOutput = Pin<Box<dyn AsyncRead + Send>>;

#[async_trait]
pub trait ProcessControl: Send + Sync {
    async fn signal(&self, signal: Signal) -> Result<()>;

    async fn wait(&self) -> Result<ExitStatus>;
}

/// A process started inside a solved filesystem.
pub struct Process {
    pub stdout: Option<ProcessOutput>,
    pub stderr: Option<ProcessOutput>,
    pub control: Arc<dyn ProcessControl>,
}

/// The build engine that turns graphs into filesystems and runs programs in them.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Solves the graph, streaming progress on `status` until it returns.
    async fn solve(
        &self,
        request: SolveRequest,
        status: mpsc::Sender<SolveStatus>,
    ) -> Result<SolvedRef>;

    async fn read_file(&self, solved: &SolvedRef, path: &str) -> Result<Vec<u8>>;

    async fn start(&self, solved: &SolvedRef, request: StartRequest) -> Result<Process>;

    /// Fetches the config of a registry image for `platform`.
    async fn resolve_image_config(&self, reference: &str, platform: &Platform)
        -> Result<ImageConfig>;
}
