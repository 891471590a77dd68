//! Session version marker.
//!
//! The version is stored as plain semver text in the state directory so that
//! out-of-process assistants can check which layout they are dealing with.

use semver::Version;

use crate::error::{AssistError, Result};

/// Version written when the state directory has no marker yet.
pub fn default_version() -> Version {
    // CARGO_PKG_VERSION is always valid semver
    Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or_else(|_| Version::new(0, 0, 1))
}

pub fn parse_version(text: &str) -> Result<Version> {
    let text = text.trim();
    let version = Version::parse(text)
        .map_err(|e| AssistError::validation(format!("invalid version '{}': {}", text, e)))?;

    if version == Version::new(0, 0, 0) {
        return Err(AssistError::validation("version 0.0.0 is not allowed"));
    }

    Ok(version)
}
