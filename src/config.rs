use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use thiserror::Error;

const DEFAULT_LOG_LEVEL: &str = "info";
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

/// How the exit code of an executed application is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitPolicy {
    /// Any non-zero exit code fails the session.
    #[default]
    Strict,
    /// Only exit codes at or above the executor's unknown-exit sentinel fail.
    UnknownOnly,
}

impl ExitPolicy {
    pub fn is_failure(&self, code: u32) -> bool {
        match self {
            Self::Strict => code != 0,
            Self::UnknownOnly => code >= crate::buildkit::UNKNOWN_EXIT_STATUS,
        }
    }
}

impl FromStr for ExitPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "unknown-only" | "unknown_only" => Ok(Self::UnknownOnly),
            other => Err(ConfigError::ParseError {
                field: "AYUP_EXIT_POLICY".to_string(),
                error: format!("unknown policy '{}', expected strict or unknown-only", other),
            }),
        }
    }
}

impl fmt::Display for ExitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::UnknownOnly => write!(f, "unknown-only"),
        }
    }
}

/// Server side directory layout and policy.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub root: PathBuf,
    /// Where the synced application source lives between sessions.
    pub app_dir: PathBuf,
    /// Pipeline state directory inside the synced source (`<app>/.ayup`).
    pub state_dir: PathBuf,
    /// Where the state directory is moved while a session owns it.
    pub tracked_state_dir: PathBuf,
    pub scratch_dir: PathBuf,
    /// Upload target for an assistant bundle pushed by the client.
    pub assistant_dir: PathBuf,
    pub local_assistants_dir: PathBuf,
    pub remote_assistants_dir: Option<PathBuf>,
    pub authorized_clients: Vec<String>,
    pub exit_policy: ExitPolicy,
    pub log_level: String,
    /// `AYUP_EXIT_POLICY` as read, checked by `validate`.
    exit_policy_env: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let root = env::var("AYUP_ROOT")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("ayup"));

        let mut config = Self::with_root(root);

        if let Ok(dir) = env::var("AYUP_LOCAL_ASSISTANTS_DIR") {
            config.local_assistants_dir = PathBuf::from(dir);
        }

        config.remote_assistants_dir = env::var("AYUP_ASSISTANTS_DIR")
            .ok()
            .filter(|d| !d.is_empty())
            .map(PathBuf::from);

        config.authorized_clients = env::var("AYUP_P2P_AUTHORIZED_CLIENTS")
            .map(|v| parse_peer_list(&v))
            .unwrap_or_default();

        if let Ok(policy) = env::var("AYUP_EXIT_POLICY") {
            config.exit_policy = policy.parse().unwrap_or_default();
            config.exit_policy_env = Some(policy);
        }

        config.log_level = env::var("AYUP_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        config
    }
}

impl ServerConfig {
    /// Layout rooted at `root` without consulting the environment.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let tmp = root.join("tmp");
        let app_dir = tmp.join("app");

        Self {
            state_dir: app_dir.join(".ayup"),
            app_dir,
            tracked_state_dir: tmp.join("state"),
            scratch_dir: tmp.join("scratch"),
            assistant_dir: tmp.join("assist"),
            local_assistants_dir: root.join("assistants"),
            remote_assistants_dir: None,
            authorized_clients: Vec::new(),
            exit_policy: ExitPolicy::default(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            exit_policy_env: None,
            root,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}. Valid options: {}",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if let Some(policy) = &self.exit_policy_env {
            policy.parse::<ExitPolicy>()?;
        }

        if self.authorized_clients.iter().any(|p| p.is_empty()) {
            return Err(ConfigError::ValidationFailed(
                "AYUP_P2P_AUTHORIZED_CLIENTS contains an empty peer id".to_string(),
            ));
        }

        Ok(())
    }

    pub fn ensure_dirs(&self) -> anyhow::Result<()> {
        for dir in [
            &self.app_dir,
            &self.scratch_dir,
            &self.assistant_dir,
            &self.local_assistants_dir,
        ] {
            create_dir(dir)?;
        }

        if let Some(parent) = self.tracked_state_dir.parent() {
            create_dir(parent)?;
        }

        Ok(())
    }
}

fn create_dir(dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create directory {:?}", dir))
}

fn parse_peer_list(value: &str) -> Vec<String> {
    if value.trim().is_empty() {
        return Vec::new();
    }

    value.split(',').map(|p| p.trim().to_string()).collect()
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Ayup Server Configuration:")?;
        writeln!(f, "  Root: {}", self.root.display())?;
        writeln!(f, "  App: {}", self.app_dir.display())?;
        writeln!(f, "  Local assistants: {}", self.local_assistants_dir.display())?;
        match &self.remote_assistants_dir {
            Some(dir) => writeln!(f, "  Remote assistants: {}", dir.display())?,
            None => writeln!(f, "  Remote assistants: none")?,
        }
        writeln!(f, "  Authorized clients: {}", self.authorized_clients.len())?;
        writeln!(f, "  Exit policy: {}", self.exit_policy)?;
        write!(f, "  Log level: {}", self.log_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use yare::parameterized;

    fn clear_env() {
        for var in [
            "AYUP_ROOT",
            "AYUP_LOCAL_ASSISTANTS_DIR",
            "AYUP_ASSISTANTS_DIR",
            "AYUP_P2P_AUTHORIZED_CLIENTS",
            "AYUP_EXIT_POLICY",
            "AYUP_LOG_LEVEL",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_default_layout() {
        clear_env();
        env::set_var("AYUP_ROOT", "/srv/ayup");

        let config = ServerConfig::default();
        assert_eq!(config.app_dir, PathBuf::from("/srv/ayup/tmp/app"));
        assert_eq!(config.state_dir, PathBuf::from("/srv/ayup/tmp/app/.ayup"));
        assert_eq!(config.tracked_state_dir, PathBuf::from("/srv/ayup/tmp/state"));
        assert_eq!(config.scratch_dir, PathBuf::from("/srv/ayup/tmp/scratch"));
        assert_eq!(config.assistant_dir, PathBuf::from("/srv/ayup/tmp/assist"));
        assert_eq!(config.local_assistants_dir, PathBuf::from("/srv/ayup/assistants"));
        assert!(config.remote_assistants_dir.is_none());
        assert_eq!(config.exit_policy, ExitPolicy::Strict);
        assert!(config.validate().is_ok());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        env::set_var("AYUP_ASSISTANTS_DIR", "/opt/assistants");
        env::set_var("AYUP_P2P_AUTHORIZED_CLIENTS", "peer-a, peer-b");
        env::set_var("AYUP_EXIT_POLICY", "unknown-only");
        env::set_var("AYUP_LOG_LEVEL", "DEBUG");

        let config = ServerConfig::default();
        assert_eq!(config.remote_assistants_dir, Some(PathBuf::from("/opt/assistants")));
        assert_eq!(config.authorized_clients, vec!["peer-a", "peer-b"]);
        assert_eq!(config.exit_policy, ExitPolicy::UnknownOnly);
        assert_eq!(config.log_level, "debug");

        clear_env();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ServerConfig::with_root("/tmp/x");
        config.log_level = "loud".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationFailed(_))));

        let mut config = ServerConfig::with_root("/tmp/x");
        config.authorized_clients = parse_peer_list("a,,b");
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_misspelled_exit_policy_fails_validation() {
        clear_env();
        env::set_var("AYUP_EXIT_POLICY", "unknown-onyl");

        let config = ServerConfig::default();
        match config.validate() {
            Err(ConfigError::ParseError { field, error }) => {
                assert_eq!(field, "AYUP_EXIT_POLICY");
                assert!(error.contains("unknown-onyl"));
            }
            other => panic!("expected a parse error, got {:?}", other),
        }

        clear_env();
    }

    #[parameterized(
        strict_zero = { ExitPolicy::Strict, 0, false },
        strict_one = { ExitPolicy::Strict, 1, true },
        unknown_one = { ExitPolicy::UnknownOnly, 1, false },
        unknown_sentinel = { ExitPolicy::UnknownOnly, 255, true },
        unknown_above = { ExitPolicy::UnknownOnly, 300, true },
    )]
    fn test_exit_policy(policy: ExitPolicy, code: u32, fails: bool) {
        assert_eq!(policy.is_failure(code), fails);
    }

    #[test]
    fn test_exit_policy_parse() {
        assert_eq!("Strict".parse::<ExitPolicy>().unwrap(), ExitPolicy::Strict);
        assert!("lenient".parse::<ExitPolicy>().is_err());
    }
}
