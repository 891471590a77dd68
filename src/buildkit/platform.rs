use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target platform for a build graph, in OCI terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: &str, architecture: &str) -> Self {
        Self {
            os: os.to_string(),
            architecture: architecture.to_string(),
            variant: None,
        }
    }

    pub fn linux_amd64() -> Self {
        Self::new("linux", "amd64")
    }

    /// Linux on the architecture this binary was built for.
    pub fn host() -> Self {
        match std::env::consts::ARCH {
            "x86_64" => Self::linux_amd64(),
            "aarch64" => Self::new("linux", "arm64"),
            "arm" => Self {
                variant: Some("v7".to_string()),
                ..Self::new("linux", "arm")
            },
            "riscv64" => Self::new("linux", "riscv64"),
            "s390x" => Self::new("linux", "s390x"),
            "powerpc64" => Self::new("linux", "ppc64le"),
            other => Self::new("linux", other),
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::host()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [os, arch] if !os.is_empty() && !arch.is_empty() => Ok(Self::new(os, arch)),
            [os, arch, variant] if !os.is_empty() && !arch.is_empty() => Ok(Self {
                variant: Some(variant.to_string()),
                ..Self::new(os, arch)
            }),
            _ => Err(format!("invalid platform '{}', expected os/arch[/variant]", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_text() {
        assert_eq!(Platform::linux_amd64().to_string(), "linux/amd64");

        let arm: Platform = "linux/arm/v7".parse().unwrap();
        assert_eq!(arm.variant.as_deref(), Some("v7"));
        assert_eq!(arm.to_string(), "linux/arm/v7");

        assert!("linux".parse::<Platform>().is_err());
    }

    #[test]
    fn test_host_is_linux() {
        assert_eq!(Platform::host().os, "linux");
    }
}
