//! ayup - a build assistant pipeline
//!
//! A client uploads an application source tree and opens one bidirectional
//! assist stream. The server walks the tree through a chain of assistants:
//! each one inspects the source and the persisted pipeline state, may ask the
//! user a question, produces a build graph or runs the result, and names the
//! assistant that should run next.
//!
//! # Core Concepts
//!
//! - **Assistant**: a step that claims (`may_work`) and transforms (`assist`)
//!   the pipeline [`State`]. Builtins cover Dockerfiles, Python apps and
//!   running the built image; external assistants run inside a sandbox.
//! - **State**: the files under `.ayup` (`next`, `cmd`, `workingdir`, ...)
//!   plus the in-memory build graph.
//! - **Build executor**: the [`buildkit::BuildExecutor`] seam that solves
//!   build graphs and starts processes.
//!
//! # Example Usage
//!
//! ```no_run
//! use ayup::{MockExecutor, Server, ServerConfig};
//! use ayup::srv::Peer;
//! use ayup::protocol::{channel_transport, ActReq};
//! use std::sync::Arc;
//!
//! async fn run() -> Result<(), ayup::AssistError> {
//!     let server = Server::new(ServerConfig::default(), Arc::new(MockExecutor::new()))?;
//!     let (client, requests, replies) = channel_transport();
//!
//!     client.send(ActReq::default())?;
//!     server
//!         .assist(&Peer::Local, Box::new(requests), Box::new(replies))
//!         .await
//! }
//! ```
//!
//! # Project Structure
//!
//! - [`srv`]: session orchestration, authorization, assistant upload
//! - [`assist`]: the assistant trait, session context and pipeline state
//! - [`assistants`]: builtin and external assistants and their registry
//! - [`buildkit`]: build graph types, status rendering, executor seam
//! - [`protocol`]: wire messages and stream plumbing

pub mod assist;
pub mod assistants;
pub mod buildkit;
pub mod cli;
pub mod config;
pub mod error;
pub mod fs;
pub mod protocol;
pub mod srv;
pub mod util;
pub mod version;

pub use assist::{Assistant, AssistantRef, Context, Kind, State};
pub use assistants::Registry;
pub use buildkit::{BuildExecutor, MockExecutor};
pub use config::{ConfigError, ExitPolicy, ServerConfig};
pub use error::{AssistError, Result};
pub use srv::Server;
pub use util::{init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name_is_ayup() {
        assert_eq!(NAME, "ayup");
    }
}
