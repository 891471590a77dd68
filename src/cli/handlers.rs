use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use super::commands::{AssistantsCommand, StateCommand};
use crate::assist::{keys, parse_full_name, Kind, NIL};
use crate::assistants::Registry;
use crate::config::ServerConfig;
use crate::error::{AssistError, Result};
use crate::fs::{read_string, DirStore, StateStore};

const STATE_DIR: &str = ".ayup";

pub fn handle_state(command: &StateCommand, quiet: bool) -> i32 {
    let result = match command {
        StateCommand::Show { path } => show_assistant(&project_dir(path)).map(|name| {
            match name {
                Some(name) => println!("{}", name),
                None => {
                    if !quiet {
                        info!("No first assistant set. One will be selected at runtime.");
                    }
                    println!("{}", NIL);
                }
            }
        }),
        StateCommand::SetAssistant { name, path } => {
            set_assistant(&project_dir(path), name).map(|()| {
                if !quiet {
                    println!("Set assistant: {}", name.trim());
                }
            })
        }
    };

    exit_code(result)
}

pub fn handle_assistants(command: &AssistantsCommand) -> i32 {
    let result = match command {
        AssistantsCommand::List { dir } => {
            let mut config = ServerConfig::default();
            if let Some(dir) = dir {
                config.local_assistants_dir = dir.clone();
            }

            list_assistants(&config).map(|names| {
                for name in names {
                    println!("{}", name);
                }
            })
        }
    };

    exit_code(result)
}

fn exit_code(result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn project_dir(path: &Option<PathBuf>) -> PathBuf {
    path.clone().unwrap_or_else(|| PathBuf::from("."))
}

/// The recorded first assistant of the project at `path`, if any.
pub fn show_assistant(path: &Path) -> Result<Option<String>> {
    let store = DirStore::new(path.join(STATE_DIR));
    let first = read_string(&store, keys::FIRST)?;

    Ok(first
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty() && name != NIL))
}

/// Validates `name` and records it as the first assistant.
pub fn set_assistant(path: &Path, name: &str) -> Result<()> {
    let name = name.trim();

    if name != NIL && name.matches(':').count() != 1 {
        return Err(AssistError::validation(
            "Assistant name does not appear to be valid, it should have the type of assistant \
             (builtin, local or remote) followed by a ':' and the name like 'builtin:dockerfile'",
        ));
    }
    parse_full_name(name)?;

    let store = DirStore::new(path.join(STATE_DIR));
    store.write(keys::FIRST, name.as_bytes())?;
    debug!(assistant = %name, path = ?path, "first assistant recorded");
    Ok(())
}

/// Names the registry holds for the configured assistant directories.
/// Directories that do not exist yet are skipped.
pub fn list_assistants(config: &ServerConfig) -> Result<Vec<String>> {
    let registry = Registry::new();

    if let Some(dir) = &config.remote_assistants_dir {
        if dir.is_dir() {
            registry.register_dirs(Kind::Remote, dir)?;
        }
    }
    if config.local_assistants_dir.is_dir() {
        registry.register_dirs(Kind::Local, &config.local_assistants_dir)?;
    }

    Ok(registry.list().iter().map(|a| a.name()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use yare::parameterized;

    #[test]
    fn test_show_without_state() {
        let temp = TempDir::new().unwrap();
        assert_eq!(show_assistant(temp.path()).unwrap(), None);
    }

    #[test]
    fn test_set_then_show() {
        let temp = TempDir::new().unwrap();
        set_assistant(temp.path(), "builtin:dockerfile").unwrap();

        assert_eq!(
            std::fs::read_to_string(temp.path().join(".ayup/first")).unwrap(),
            "builtin:dockerfile"
        );
        assert_eq!(
            show_assistant(temp.path()).unwrap(),
            Some("builtin:dockerfile".to_string())
        );
    }

    #[test]
    fn test_set_nil_clears() {
        let temp = TempDir::new().unwrap();
        set_assistant(temp.path(), "local:mine").unwrap();
        set_assistant(temp.path(), "nil").unwrap();

        assert_eq!(show_assistant(temp.path()).unwrap(), None);
    }

    #[parameterized(
        no_colon = { "dockerfile" },
        two_colons = { "builtin:a:b" },
        unknown_kind = { "cloud:thing" },
        empty_name = { "builtin:" },
    )]
    fn test_set_rejects_invalid_name(name: &str) {
        let temp = TempDir::new().unwrap();
        let err = set_assistant(temp.path(), name).unwrap_err();

        assert!(matches!(err, AssistError::Validation(_)));
        assert!(!temp.path().join(".ayup/first").exists());
    }

    #[test]
    fn test_list_includes_builtins_and_local() {
        let temp = TempDir::new().unwrap();
        let mut config = ServerConfig::with_root(temp.path());
        let bundle = config.local_assistants_dir.join("abc");
        std::fs::create_dir_all(&bundle).unwrap();
        std::fs::write(bundle.join("name"), "mine\n").unwrap();
        config.remote_assistants_dir = Some(temp.path().join("missing"));

        let names = list_assistants(&config).unwrap();
        assert_eq!(
            names,
            vec![
                "builtin:dockerfile",
                "builtin:exec",
                "builtin:python",
                "local:mine"
            ]
        );
    }
}
