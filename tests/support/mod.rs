#![allow(dead_code)]

use ayup::buildkit::MockExecutor;
use ayup::protocol::{channel_transport, ActReply, ActReq, ClientEnd};
use ayup::srv::Peer;
use ayup::{AssistError, Server, ServerConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A server rooted in a temporary directory with a scripted executor.
pub struct TestServer {
    pub server: Server,
    pub executor: Arc<MockExecutor>,
    temp: TempDir,
}

impl TestServer {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut ServerConfig)) -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = ServerConfig::with_root(temp.path());
        adjust(&mut config);

        let executor = Arc::new(MockExecutor::new());
        let server = Server::new(config, executor.clone()).unwrap();

        Self {
            server,
            executor,
            temp,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn app(&self) -> PathBuf {
        self.server.config().app_dir.clone()
    }

    pub fn write_app_file(&self, name: &str, contents: &str) {
        let path = self.app().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    pub fn read_state_file(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.server.config().state_dir.join(key)).ok()
    }

    /// Runs a session whose client sends `requests` up front and then
    /// stays connected until the server finishes.
    pub async fn run(&self, requests: Vec<ActReq>) -> Session {
        let (client, reqs, replies) = channel_transport();
        for req in requests {
            client.send(req).unwrap();
        }

        let result = self
            .server
            .assist(&Peer::Local, Box::new(reqs), Box::new(replies))
            .await;

        Session::collect(client, result)
    }
}

pub struct Session {
    pub result: Result<(), AssistError>,
    pub replies: Vec<ActReply>,
}

impl Session {
    pub fn collect(mut client: ClientEnd, result: Result<(), AssistError>) -> Self {
        let mut replies = Vec::new();
        while let Ok(reply) = client.replies.try_recv() {
            replies.push(reply);
        }
        Self { result, replies }
    }

    pub fn logs(&self) -> Vec<String> {
        self.replies
            .iter()
            .filter_map(|r| r.log_text().map(str::to_string))
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.replies
            .iter()
            .filter_map(|r| r.error_text().map(str::to_string))
            .collect()
    }

    pub fn is_done(&self) -> bool {
        self.replies.last().map(|r| r.is_done()).unwrap_or(false)
    }
}

pub fn start() -> ActReq {
    ActReq::default()
}

#[allow(dead_code)]
pub fn get_ayup_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.join("ayup")
}
