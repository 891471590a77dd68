//! The assistant contract and the state assistants pass along.
//!
//! An assistant inspects the application and the pipeline [`State`], decides
//! whether it applies ([`Assistant::may_work`]) and transforms the state
//! ([`Assistant::assist`]), naming the assistant that should run after it.

mod cancel;
mod context;
mod env;
mod state;

pub use cancel::CancelEscalation;
pub use context::{Context, LogHook};
pub use env::{load_env, ENV_FILE};
pub use state::{keys, State};

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{AssistError, Result};

/// Name stored in a pointer file when no assistant should run.
pub const NIL: &str = "nil";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Builtin,
    Local,
    Remote,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Builtin => "builtin",
            Kind::Local => "local",
            Kind::Remote => "remote",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = AssistError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "builtin" => Ok(Kind::Builtin),
            "local" => Ok(Kind::Local),
            "remote" => Ok(Kind::Remote),
            other => Err(AssistError::validation(format!(
                "Invalid assistant kind: {}",
                other
            ))),
        }
    }
}

pub fn full_name(kind: Kind, name: &str) -> String {
    format!("{}:{}", kind, name)
}

/// Splits `kind:name`. Returns `None` for [`NIL`].
pub fn parse_full_name(full: &str) -> Result<Option<(Kind, String)>> {
    let full = full.trim();
    if full == NIL {
        return Ok(None);
    }

    let (kind, name) = full
        .split_once(':')
        .ok_or_else(|| AssistError::validation("No ':' in assistant name"))?;

    if name.is_empty() {
        return Err(AssistError::validation(format!(
            "Empty assistant name in '{}'",
            full
        )));
    }

    Ok(Some((kind.parse()?, name.to_string())))
}

/// Reads the `name` file of an assistant directory.
pub fn load_name(dir: &Path) -> Result<String> {
    let path = dir.join("name");
    let name = std::fs::read_to_string(&path).map_err(|e| {
        AssistError::validation(format!("Could not read assistant name from {:?}: {}", path, e))
    })?;

    let name = name.trim();
    if name.is_empty() {
        return Err(AssistError::validation(format!(
            "Assistant name file {:?} is empty",
            path
        )));
    }

    Ok(name.to_string())
}

pub type AssistantRef = Arc<dyn Assistant>;

#[async_trait]
pub trait Assistant: Send + Sync {
    /// Full name, `kind:name`.
    fn name(&self) -> String;

    /// Whether this assistant can handle the application. Must not change
    /// persisted state. `Ok(false)` means "not applicable".
    async fn may_work(&self, ctx: &Context, state: &State) -> Result<bool>;

    /// Transforms the state. On success the returned state names the next
    /// assistant, or none to end the chain.
    async fn assist(&self, ctx: &Context, state: State) -> Result<State>;
}

impl fmt::Debug for dyn Assistant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Assistant({})", self.name())
    }
}

/// Resolves pointer file contents to assistants.
pub trait AssistantLookup: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<AssistantRef>>;
}
