//! Structured logging setup.
//!
//! Built on `tracing-subscriber`: an `EnvFilter` honouring `RUST_LOG`, and
//! either human readable or JSON lines on stderr. Initialisation happens at
//! most once per process.
//!
//! ```no_run
//! use ayup::util::logging;
//!
//! logging::init_from_env();
//! tracing::info!(assistant = "builtin:python", "next assistant");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Crates whose chatter is capped at `warn` unless `RUST_LOG` says otherwise.
const NOISY: [&str; 3] = ["h2", "hyper", "tower"];

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,

    /// One JSON object per line instead of the console format.
    pub use_json: bool,

    /// Include the module target (e.g. `ayup::srv`).
    pub include_target: bool,

    /// Include file and line number.
    pub include_location: bool,

    pub include_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
            include_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }
}

/// Parses a level name, case-insensitively. Unknown names fall back to INFO
/// with a note on stderr, since logging is not set up yet at this point.
pub fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

fn build_filter(level: Level) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env();

    if env::var("RUST_LOG").is_err() {
        let directives = std::iter::once(format!("ayup={}", level))
            .chain(NOISY.iter().map(|name| format!("{}=warn", name)));

        for directive in directives {
            match directive.parse::<Directive>() {
                Ok(d) => filter = filter.add_directive(d),
                Err(e) => eprintln!("Ignoring log directive '{}': {}", directive, e),
            }
        }
    }

    filter
}

/// Installs the global subscriber. Later calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level);

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_thread_ids(config.include_thread_ids)
                        .with_thread_names(config.include_thread_ids),
                )
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_thread_ids(config.include_thread_ids)
                        .with_thread_names(config.include_thread_ids),
                )
                .init();
        }
    });
}

/// Settings from `AYUP_LOG_LEVEL` and `AYUP_LOG_JSON`.
pub fn config_from_env() -> LoggingConfig {
    let level_str = env::var("AYUP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let use_json = env::var("AYUP_LOG_JSON")
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);

    LoggingConfig {
        level: parse_level(&level_str),
        use_json,
        ..Default::default()
    }
}

/// Installs the global subscriber configured from the environment.
pub fn init_from_env() {
    init_logging(config_from_env());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use yare::parameterized;

    #[parameterized(
        trace = { "trace", Level::TRACE },
        debug_mixed_case = { "Debug", Level::DEBUG },
        info_upper = { "INFO", Level::INFO },
        warn = { "warn", Level::WARN },
        error = { "error", Level::ERROR },
        invalid = { "verbose", Level::INFO },
        empty = { "", Level::INFO },
    )]
    fn test_parse_level(input: &str, expected: Level) {
        assert_eq!(parse_level(input), expected);
    }

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.use_json);
        assert!(config.include_target);
        assert!(!config.include_location);
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        env::set_var("AYUP_LOG_LEVEL", "WARN");
        env::set_var("AYUP_LOG_JSON", "true");
        let config = config_from_env();
        assert_eq!(config.level, Level::WARN);
        assert!(config.use_json);

        env::remove_var("AYUP_LOG_LEVEL");
        env::set_var("AYUP_LOG_JSON", "yes");
        let config = config_from_env();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.use_json);

        env::remove_var("AYUP_LOG_JSON");
    }

    #[test]
    fn test_filter_targets_crate() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let filter = build_filter(Level::DEBUG).to_string().to_lowercase();
        assert!(filter.contains("ayup=debug"));
        assert!(filter.contains("hyper=warn"));
    }
}
