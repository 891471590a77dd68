use anyhow::Context as _;
use semver::Version;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use super::{AssistantLookup, AssistantRef, NIL};
use crate::buildkit::{Definition, Platform};
use crate::error::{AssistError, Result};
use crate::fs::{read_default, read_string, DirStore, StateStore};
use crate::version::{default_version, parse_version};

/// File names inside the state directory.
pub mod keys {
    pub const VERSION: &str = "version";
    pub const FIRST: &str = "first";
    pub const NEXT: &str = "next";
    pub const CMD: &str = "cmd";
    pub const WORKING_DIR: &str = "workingdir";
    pub const PORTS: &str = "ports";
    pub const LOG: &str = "log";
}

const DEFAULT_WORKING_DIR: &str = "/app";

/// Pipeline state for one session.
///
/// Setters write the state file first and then update memory, so a failed
/// write leaves the in-memory value untouched. The build graph is never
/// persisted.
#[derive(Clone)]
pub struct State {
    /// Where the state directory lives when no session owns it.
    pub src_path: PathBuf,
    /// Where the state directory lives while the session runs.
    pub path: PathBuf,
    store: Arc<dyn StateStore>,
    registry: Arc<dyn AssistantLookup>,
    version: Option<Version>,
    build_graph: Option<Arc<Definition>>,
    platform: Platform,
    first_step: bool,
    next: Option<AssistantRef>,
    working_dir: String,
    cmd: Vec<String>,
    ports: Vec<u16>,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("src_path", &self.src_path)
            .field("path", &self.path)
            .field("version", &self.version)
            .field("build_graph", &self.build_graph)
            .field("platform", &self.platform)
            .field("first_step", &self.first_step)
            .field("has_next", &self.next.is_some())
            .field("working_dir", &self.working_dir)
            .field("cmd", &self.cmd)
            .field("ports", &self.ports)
            .finish_non_exhaustive()
    }
}

impl State {
    pub fn new(
        src_path: impl Into<PathBuf>,
        path: impl Into<PathBuf>,
        registry: Arc<dyn AssistantLookup>,
    ) -> Self {
        let path = path.into();
        let store = Arc::new(DirStore::new(path.clone()));
        Self::with_store(src_path, path, store, registry)
    }

    pub fn with_store(
        src_path: impl Into<PathBuf>,
        path: impl Into<PathBuf>,
        store: Arc<dyn StateStore>,
        registry: Arc<dyn AssistantLookup>,
    ) -> Self {
        Self {
            src_path: src_path.into(),
            path: path.into(),
            store,
            registry,
            version: None,
            build_graph: None,
            platform: Platform::host(),
            first_step: true,
            next: None,
            working_dir: String::new(),
            cmd: Vec::new(),
            ports: Vec::new(),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    /// Loads the version marker, writing the current version if it is missing.
    pub fn version(&mut self) -> Result<&Version> {
        if self.version.is_none() {
            let text = read_default(
                self.store.as_ref(),
                keys::VERSION,
                &default_version().to_string(),
            )?;
            let version = parse_version(&text)?;
            debug!(version = %version, "state version");
            self.version = Some(version);
        }

        self.version
            .as_ref()
            .ok_or_else(|| AssistError::Internal(anyhow::anyhow!("version not loaded")))
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn is_first_step(&self) -> bool {
        self.first_step
    }

    pub fn next(&self) -> Option<&AssistantRef> {
        self.next.as_ref()
    }

    pub fn set_next(&mut self, next: Option<AssistantRef>) -> Result<()> {
        let name = next.as_ref().map(|a| a.name()).unwrap_or_else(|| NIL.to_string());
        debug!(next = %name, "state set next");

        self.store.write(keys::NEXT, name.as_bytes())?;
        self.next = next;
        Ok(())
    }

    pub fn build_graph(&self) -> Option<&Arc<Definition>> {
        self.build_graph.as_ref()
    }

    pub fn set_build_graph(&mut self, definition: Definition) {
        self.build_graph = Some(Arc::new(definition));
    }

    /// `/app` until a working directory has been set.
    pub fn working_dir(&self) -> &str {
        if self.working_dir.is_empty() {
            DEFAULT_WORKING_DIR
        } else {
            &self.working_dir
        }
    }

    pub fn set_working_dir(&mut self, dir: &str) -> Result<()> {
        self.store.write(keys::WORKING_DIR, dir.as_bytes())?;
        self.working_dir = dir.to_string();
        Ok(())
    }

    pub fn cmd(&self) -> &[String] {
        &self.cmd
    }

    pub fn set_cmd(&mut self, cmd: Vec<String>) -> Result<()> {
        debug!(cmd = ?cmd, "state set cmd");
        let data = serde_json::to_vec(&cmd).context("json encode cmd")?;
        self.store.write(keys::CMD, &data)?;
        self.cmd = cmd;
        Ok(())
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Fails without writing anything if a port is outside 1..=65535.
    pub fn set_ports(&mut self, ports: &[u32]) -> Result<()> {
        let ports = to_port_numbers(ports.iter().map(|p| i64::from(*p)))?;
        let data = serde_json::to_vec(&ports).context("json encode ports")?;
        self.store.write(keys::PORTS, &data)?;
        self.ports = ports;
        Ok(())
    }

    /// Reconciles memory with the state directory.
    ///
    /// The first call resets `next` to nil on disk and follows `first`;
    /// later calls follow `next`. A missing pointer file leaves the current
    /// successor alone. `cmd`, `workingdir` and `ports` are then re-read if
    /// present.
    pub fn load_state(&mut self) -> Result<()> {
        if self.first_step {
            self.first_step = false;
            self.store.write(keys::NEXT, NIL.as_bytes())?;
            self.load_next_from(keys::FIRST)?;
        } else {
            self.load_next_from(keys::NEXT)?;
        }

        if let Some(text) = read_string(self.store.as_ref(), keys::CMD)? {
            let cmd: Vec<String> = serde_json::from_str(&text).context("json decode cmd")?;
            debug!(old = ?self.cmd, new = ?cmd, "load state cmd");
            self.cmd = cmd;
        }

        if let Some(dir) = read_string(self.store.as_ref(), keys::WORKING_DIR)? {
            debug!(old = %self.working_dir, new = %dir, "load state workingdir");
            self.working_dir = dir;
        }

        if let Some(text) = read_string(self.store.as_ref(), keys::PORTS)? {
            let raw: Vec<i64> = serde_json::from_str(&text).context("json decode ports")?;
            let ports = to_port_numbers(raw)?;
            debug!(old = ?self.ports, new = ?ports, "load state ports");
            self.ports = ports;
        }

        Ok(())
    }

    fn load_next_from(&mut self, key: &str) -> Result<()> {
        let Some(name) = read_string(self.store.as_ref(), key)? else {
            return Ok(());
        };

        let old = self
            .next
            .as_ref()
            .map(|a| a.name())
            .unwrap_or_else(|| NIL.to_string());
        debug!(from = key, old = %old, new = %name.trim(), "load state next");

        self.next = self.registry.get(&name)?;
        Ok(())
    }
}

fn to_port_numbers(ports: impl IntoIterator<Item = i64>) -> Result<Vec<u16>> {
    ports
        .into_iter()
        .map(|p| {
            if (1..=65535).contains(&p) {
                Ok(p as u16)
            } else {
                Err(AssistError::validation(format!(
                    "{} is outside the port number range",
                    p
                )))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assist::{Assistant, Context};
    use crate::fs::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct Named(&'static str);

    #[async_trait]
    impl Assistant for Named {
        fn name(&self) -> String {
            self.0.to_string()
        }

        async fn may_work(&self, _ctx: &Context, _state: &State) -> Result<bool> {
            Ok(true)
        }

        async fn assist(&self, _ctx: &Context, state: State) -> Result<State> {
            Ok(state)
        }
    }

    struct Lookup(HashMap<&'static str, AssistantRef>);

    impl Lookup {
        fn new() -> Arc<Self> {
            let mut map: HashMap<&'static str, AssistantRef> = HashMap::new();
            map.insert("builtin:python", Arc::new(Named("builtin:python")));
            map.insert("builtin:exec", Arc::new(Named("builtin:exec")));
            Arc::new(Self(map))
        }
    }

    impl AssistantLookup for Lookup {
        fn get(&self, name: &str) -> Result<Option<AssistantRef>> {
            let name = name.trim();
            if name == NIL {
                return Ok(None);
            }
            self.0
                .get(name)
                .cloned()
                .map(Some)
                .ok_or_else(|| AssistError::validation(format!("Assistant not found: {}", name)))
        }
    }

    fn dir_state(temp: &TempDir) -> State {
        State::new(temp.path().join("src"), temp.path().join("state"), Lookup::new())
    }

    #[test]
    fn test_working_dir_default() {
        let temp = TempDir::new().unwrap();
        let mut state = dir_state(&temp);
        assert_eq!(state.working_dir(), "/app");

        state.set_working_dir("/srv").unwrap();
        assert_eq!(state.working_dir(), "/srv");
        state.set_working_dir("/").unwrap();
        assert_eq!(state.working_dir(), "/");
    }

    #[test]
    fn test_cmd_and_ports_survive_reload() {
        let temp = TempDir::new().unwrap();
        let mut state = dir_state(&temp);
        state
            .set_cmd(vec!["python".to_string(), "__main__.py".to_string()])
            .unwrap();
        state.set_ports(&[5000, 8080]).unwrap();
        state.set_working_dir("/app").unwrap();

        let mut fresh = dir_state(&temp);
        fresh.load_state().unwrap();
        assert_eq!(fresh.cmd(), ["python", "__main__.py"]);
        assert_eq!(fresh.ports(), [5000, 8080]);
        assert_eq!(fresh.working_dir(), "/app");
    }

    #[test]
    fn test_invalid_ports_are_not_persisted() {
        let temp = TempDir::new().unwrap();
        let mut state = dir_state(&temp);
        state.set_ports(&[80]).unwrap();

        for bad in [0, 65536, 70000] {
            let err = state.set_ports(&[8080, bad]).unwrap_err();
            assert!(matches!(err, AssistError::Validation(_)));
            assert_eq!(err.to_string(), format!("{} is outside the port number range", bad));
        }

        assert_eq!(state.ports(), [80]);
        assert_eq!(
            std::fs::read_to_string(temp.path().join("state/ports")).unwrap(),
            "[80]"
        );
    }

    #[test]
    fn test_out_of_range_ports_on_disk_fail_load() {
        let store = Arc::new(MemoryStore::new());
        store.add_file(keys::PORTS, "[-1]");
        let mut state = State::with_store("/src", "/state", store, Lookup::new());

        assert!(matches!(state.load_state(), Err(AssistError::Validation(_))));
    }

    #[test]
    fn test_first_load_follows_first_and_clears_next() {
        let store = Arc::new(MemoryStore::new());
        store.add_file(keys::FIRST, "builtin:python\n");
        store.add_file(keys::NEXT, "builtin:exec");

        let mut state = State::with_store("/src", "/state", store.clone(), Lookup::new());
        assert!(state.is_first_step());
        state.load_state().unwrap();

        assert!(!state.is_first_step());
        assert_eq!(state.next().unwrap().name(), "builtin:python");
        assert_eq!(store.read(keys::NEXT).unwrap().unwrap(), b"nil");

        store.add_file(keys::NEXT, "builtin:exec");
        state.load_state().unwrap();
        assert_eq!(state.next().unwrap().name(), "builtin:exec");
    }

    #[test]
    fn test_first_load_without_pointer() {
        let store = Arc::new(MemoryStore::new());
        let mut state = State::with_store("/src", "/state", store, Lookup::new());
        state.load_state().unwrap();
        assert!(state.next().is_none());
    }

    #[test]
    fn test_unknown_pointer_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        store.add_file(keys::FIRST, "remote:missing");
        let mut state = State::with_store("/src", "/state", store, Lookup::new());

        let err = state.load_state().unwrap_err();
        assert_eq!(err.to_string(), "Assistant not found: remote:missing");
    }

    #[test]
    fn test_set_next_persists_name() {
        let store = Arc::new(MemoryStore::new());
        let mut state = State::with_store("/src", "/state", store.clone(), Lookup::new());

        state.set_next(Some(Arc::new(Named("builtin:exec")))).unwrap();
        assert_eq!(store.read(keys::NEXT).unwrap().unwrap(), b"builtin:exec");

        state.set_next(None).unwrap();
        assert_eq!(store.read(keys::NEXT).unwrap().unwrap(), b"nil");
        assert!(state.next().is_none());
    }

    #[test]
    fn test_version_defaults_and_sticks() {
        let store = Arc::new(MemoryStore::new());
        let mut state = State::with_store("/src", "/state", store.clone(), Lookup::new());

        let version = state.version().unwrap().clone();
        assert_eq!(version, default_version());
        assert_eq!(
            store.read(keys::VERSION).unwrap().unwrap(),
            version.to_string().into_bytes()
        );

        store.add_file(keys::VERSION, "9.9.9");
        assert_eq!(state.version().unwrap(), &version);
    }

    #[test]
    fn test_build_graph_is_memory_only() {
        let temp = TempDir::new().unwrap();
        let mut state = dir_state(&temp);

        let mut b = crate::buildkit::GraphBuilder::new(Platform::linux_amd64());
        let base = b.image("alpine");
        state.set_build_graph(b.build(&base).unwrap());
        assert!(state.build_graph().is_some());

        let mut fresh = dir_state(&temp);
        fresh.load_state().unwrap();
        assert!(fresh.build_graph().is_none());
    }
}
