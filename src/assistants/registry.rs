use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use super::{DockerfileAssistant, ExecAssistant, ExternAssistant, PythonAssistant};
use crate::assist::{full_name, load_name, parse_full_name, AssistantLookup, AssistantRef, Kind};
use crate::error::{AssistError, Result};

/// Assistants keyed by full name.
pub struct Registry {
    assistants: RwLock<HashMap<String, AssistantRef>>,
}

impl Registry {
    /// A registry holding the builtin assistants.
    pub fn new() -> Self {
        let registry = Self::empty();
        let builtins: [AssistantRef; 3] = [
            Arc::new(DockerfileAssistant),
            Arc::new(ExecAssistant),
            Arc::new(PythonAssistant),
        ];

        let mut map = registry.write();
        for assistant in builtins {
            map.insert(assistant.name(), assistant);
        }
        drop(map);

        registry
    }

    pub fn empty() -> Self {
        Self {
            assistants: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, AssistantRef>> {
        self.assistants.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, AssistantRef>> {
        self.assistants.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, assistant: AssistantRef) -> Result<AssistantRef> {
        let name = assistant.name();
        let mut map = self.write();

        if map.contains_key(&name) {
            return Err(AssistError::validation(format!(
                "assistant already exists: {}",
                name
            )));
        }

        debug!(assistant = %name, "registered assistant");
        map.insert(name, assistant.clone());
        Ok(assistant)
    }

    /// Registers the assistant in `path`, named by its `name` file.
    pub fn register_dir(&self, kind: Kind, path: &Path) -> Result<AssistantRef> {
        let name = load_name(path)?;
        let assistant = Arc::new(ExternAssistant::new(kind, &name, path));
        info!(assistant = %full_name(kind, &name), path = ?path, "registering assistant directory");
        self.register(assistant)
    }

    /// Registers every non-hidden directory directly under `root`.
    pub fn register_dirs(&self, kind: Kind, root: &Path) -> Result<Vec<AssistantRef>> {
        let entries = std::fs::read_dir(root).map_err(|e| {
            AssistError::Internal(anyhow::Error::new(e).context(format!("read dir {:?}", root)))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !entry.file_type()?.is_dir() {
                continue;
            }
            paths.push(entry.path());
        }
        paths.sort();

        paths
            .iter()
            .map(|path| self.register_dir(kind, path))
            .collect()
    }

    /// Looks up `kind:name`. `nil` resolves to no assistant.
    pub fn get(&self, name: &str) -> Result<Option<AssistantRef>> {
        let Some((kind, short)) = parse_full_name(name)? else {
            return Ok(None);
        };

        let full = full_name(kind, &short);
        self.read()
            .get(&full)
            .cloned()
            .map(Some)
            .ok_or_else(|| AssistError::validation(format!("Assistant not found: {}", full)))
    }

    /// All assistants, sorted by name.
    pub fn list(&self) -> Vec<AssistantRef> {
        let mut list: Vec<AssistantRef> = self.read().values().cloned().collect();
        list.sort_by_key(|a| a.name());
        list
    }

    pub fn del(&self, full_name: &str) -> Option<AssistantRef> {
        let removed = self.write().remove(full_name.trim());
        if removed.is_some() {
            debug!(assistant = %full_name, "unregistered assistant");
        }
        removed
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl AssistantLookup for Registry {
    fn get(&self, name: &str) -> Result<Option<AssistantRef>> {
        Registry::get(self, name)
    }
}
