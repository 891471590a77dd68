//! Concrete assistants and the registry that names them.

pub mod dockerfile;
mod exec;
mod external;
mod python;
mod registry;

pub use dockerfile::DockerfileAssistant;
pub use exec::ExecAssistant;
pub use external::ExternAssistant;
pub use python::{detect_system_packages, PythonAssistant};
pub use registry::Registry;

#[cfg(test)]
pub(crate) mod testing {
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    use super::Registry;
    use crate::assist::{Context, State};
    use crate::buildkit::{MockExecutor, Platform};
    use crate::protocol::{channel_transport, spawn_receiver, ActReply, ClientEnd, Outbound};

    /// An app, state and scratch directory wired to a mock executor.
    pub struct Harness {
        pub ctx: Context,
        pub client: ClientEnd,
        pub executor: Arc<MockExecutor>,
        pub registry: Arc<Registry>,
        temp: TempDir,
    }

    impl Harness {
        pub fn new() -> Self {
            let temp = TempDir::new().unwrap();
            for dir in ["app", "state", "scratch"] {
                std::fs::create_dir_all(temp.path().join(dir)).unwrap();
            }

            let executor = Arc::new(MockExecutor::new());
            let (client, requests, replies) = channel_transport();
            let ctx = Context::new(
                Outbound::new(Box::new(replies)),
                spawn_receiver(Box::new(requests)),
                executor.clone(),
                temp.path().join("app"),
                temp.path().join("state"),
                temp.path().join("scratch"),
            );

            Self {
                ctx,
                client,
                executor,
                registry: Arc::new(Registry::new()),
                temp,
            }
        }

        pub fn root(&self) -> PathBuf {
            self.temp.path().to_path_buf()
        }

        pub fn app(&self) -> PathBuf {
            self.temp.path().join("app")
        }

        pub fn state_dir(&self) -> PathBuf {
            self.temp.path().join("state")
        }

        pub fn scratch(&self) -> PathBuf {
            self.temp.path().join("scratch")
        }

        pub fn state(&self) -> State {
            State::new(
                self.app().join(".ayup"),
                self.state_dir(),
                self.registry.clone(),
            )
            .with_platform(Platform::linux_amd64())
        }

        pub fn drain(&mut self) -> Vec<ActReply> {
            let mut replies = Vec::new();
            while let Ok(reply) = self.client.replies.try_recv() {
                replies.push(reply);
            }
            replies
        }
    }
}
