//! Scriptable executor for exercising assistants without a build engine.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use nix::sys::signal::Signal;
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

use super::{
    BuildExecutor, ExitStatus, ImageConfig, Platform, Process, ProcessControl, SolveRequest,
    SolveStatus, SolvedRef, StartRequest,
};

/// How a scripted process ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockExit {
    Code(u32),
    /// Runs until it receives `signal`, then exits with `code`.
    OnSignal { signal: Signal, code: u32 },
    /// Ignores every signal.
    Never,
}

#[derive(Debug, Clone)]
pub struct MockProcess {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit: MockExit,
}

impl MockProcess {
    pub fn exits(code: u32) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit: MockExit::Code(code),
        }
    }

    pub fn with_stdout(mut self, text: &str) -> Self {
        self.stdout = text.as_bytes().to_vec();
        self
    }

    pub fn with_stderr(mut self, text: &str) -> Self {
        self.stderr = text.as_bytes().to_vec();
        self
    }
}

/// Files materialised into the export directory of the next exporting solve.
#[derive(Debug, Clone, Default)]
pub struct MockExport {
    dirs: Vec<String>,
    files: Vec<(String, Vec<u8>)>,
}

impl MockExport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir(mut self, path: &str) -> Self {
        self.dirs.push(path.to_string());
        self
    }

    pub fn file(mut self, path: &str, contents: &str) -> Self {
        self.files.push((path.to_string(), contents.as_bytes().to_vec()));
        self
    }
}

#[derive(Default)]
pub struct MockExecutor {
    solves: Mutex<Vec<SolveRequest>>,
    statuses: Mutex<VecDeque<Vec<SolveStatus>>>,
    solve_errors: Mutex<VecDeque<String>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    exports: Mutex<VecDeque<MockExport>>,
    processes: Mutex<VecDeque<MockProcess>>,
    started: Mutex<Vec<StartRequest>>,
    signals: Arc<Mutex<Vec<Signal>>>,
    image_configs: Mutex<HashMap<String, ImageConfig>>,
    resolved: Mutex<Vec<String>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status batches streamed by the next solve.
    pub fn push_status(&self, batches: Vec<SolveStatus>) {
        self.statuses.lock().unwrap().push_back(batches);
    }

    pub fn fail_next_solve(&self, message: &str) {
        self.solve_errors.lock().unwrap().push_back(message.to_string());
    }

    pub fn add_file(&self, path: &str, contents: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.as_bytes().to_vec());
    }

    pub fn push_export(&self, export: MockExport) {
        self.exports.lock().unwrap().push_back(export);
    }

    pub fn push_process(&self, process: MockProcess) {
        self.processes.lock().unwrap().push_back(process);
    }

    /// Config returned for `reference`. Unknown images resolve to an empty config.
    pub fn add_image_config(&self, reference: &str, config: ImageConfig) {
        self.image_configs
            .lock()
            .unwrap()
            .insert(reference.to_string(), config);
    }

    /// References looked up through `resolve_image_config`, in order.
    pub fn resolved_images(&self) -> Vec<String> {
        self.resolved.lock().unwrap().clone()
    }

    pub fn solves(&self) -> Vec<SolveRequest> {
        self.solves.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<StartRequest> {
        self.started.lock().unwrap().clone()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap().clone()
    }

    fn write_export(&self, request: &SolveRequest) -> Result<()> {
        let Some(dir) = &request.export_dir else {
            return Ok(());
        };
        let Some(export) = self.exports.lock().unwrap().pop_front() else {
            return Ok(());
        };

        for sub in &export.dirs {
            std::fs::create_dir_all(dir.join(sub))?;
        }
        for (path, contents) in &export.files {
            let target = dir.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, contents)
                .with_context(|| format!("mock export of {:?}", target))?;
        }
        Ok(())
    }
}

#[async_trait]
impl BuildExecutor for MockExecutor {
    async fn solve(
        &self,
        request: SolveRequest,
        status: mpsc::Sender<SolveStatus>,
    ) -> Result<SolvedRef> {
        let digest = request.definition.digest().to_string();
        self.solves.lock().unwrap().push(request.clone());

        let batches = self.statuses.lock().unwrap().pop_front().unwrap_or_default();
        for batch in batches {
            let _ = status.send(batch).await;
        }

        if let Some(message) = self.solve_errors.lock().unwrap().pop_front() {
            return Err(anyhow!(message));
        }

        self.write_export(&request)?;

        let id = format!("mock-{}", self.solves.lock().unwrap().len());
        Ok(SolvedRef { id, digest })
    }

    async fn read_file(&self, _solved: &SolvedRef, path: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("{}: no such file in solved filesystem", path))
    }

    async fn resolve_image_config(
        &self,
        reference: &str,
        _platform: &Platform,
    ) -> Result<ImageConfig> {
        self.resolved.lock().unwrap().push(reference.to_string());
        Ok(self
            .image_configs
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .unwrap_or_default())
    }

    async fn start(&self, _solved: &SolvedRef, request: StartRequest) -> Result<Process> {
        self.started.lock().unwrap().push(request);

        let script = self
            .processes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| MockProcess::exits(0));

        let (done, _) = watch::channel(match script.exit {
            MockExit::Code(code) => Some(code),
            _ => None,
        });

        Ok(Process {
            stdout: Some(Box::pin(Cursor::new(script.stdout))),
            stderr: Some(Box::pin(Cursor::new(script.stderr))),
            control: Arc::new(MockControl {
                exit: script.exit,
                signals: self.signals.clone(),
                done,
            }),
        })
    }
}

struct MockControl {
    exit: MockExit,
    signals: Arc<Mutex<Vec<Signal>>>,
    done: watch::Sender<Option<u32>>,
}

#[async_trait]
impl ProcessControl for MockControl {
    async fn signal(&self, signal: Signal) -> Result<()> {
        self.signals.lock().unwrap().push(signal);

        if let MockExit::OnSignal { signal: stop, code } = self.exit {
            if stop == signal {
                self.done.send_replace(Some(code));
            }
        }
        Ok(())
    }

    async fn wait(&self) -> Result<ExitStatus> {
        let mut rx = self.done.subscribe();
        loop {
            if let Some(code) = *rx.borrow_and_update() {
                return Ok(ExitStatus { code });
            }
            rx.changed().await.context("mock process dropped")?;
        }
    }
}
