//! Platform detection for the sdkm toolchain manager.
//!
//! Release artifacts are published per operating system, and every SDK name
//! carries an architecture variant suffix (`64bit`, `32bit`, `arm64`). This
//! module detects both for the running host.
//!
//! ## Supported Platforms
//!
//! - Linux, macOS and Windows
//! - `x86_64` (`64bit`), `x86` (`32bit`) and `aarch64` (`arm64`)

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operating system an artifact is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    /// Linux
    Linux,
    /// macOS
    Macos,
    /// Windows
    Windows,
}

impl Os {
    /// Returns the OS name used in artifact URLs.
    #[must_use = "returns the OS string without side effects"]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Macos => "macos",
            Self::Windows => "windows",
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Os {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(Self::Linux),
            "macos" | "mac" | "darwin" => Ok(Self::Macos),
            "windows" | "win" => Ok(Self::Windows),
            other => bail!("Unknown operating system '{other}'. Expected linux, macos or windows"),
        }
    }
}

/// Architecture variant suffix carried by SDK names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arch {
    /// `x86_64`
    #[serde(rename = "64bit")]
    Bits64,
    /// `x86`
    #[serde(rename = "32bit")]
    Bits32,
    /// `aarch64`
    #[serde(rename = "arm64")]
    Arm64,
}

impl Arch {
    /// Returns the suffix used in SDK names (e.g. `sdk-1.38.33-upstream-64bit`).
    #[must_use = "returns the arch string without side effects"]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bits64 => "64bit",
            Self::Bits32 => "32bit",
            Self::Arm64 => "arm64",
        }
    }

    /// Parses an architecture suffix, returning `None` for anything else.
    #[must_use]
    pub fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "64bit" => Some(Self::Bits64),
            "32bit" => Some(Self::Bits32),
            "arm64" => Some(Self::Arm64),
            _ => None,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Arch {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match Self::from_suffix(s) {
            Some(arch) => Ok(arch),
            None => bail!("Unknown architecture '{s}'. Expected 64bit, 32bit or arm64"),
        }
    }
}

/// The host an artifact is being installed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    /// Operating system.
    pub os: Os,
    /// Architecture variant.
    pub arch: Arch,
}

impl Platform {
    /// Creates a platform from its parts.
    #[must_use]
    pub const fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Detects the current platform based on compile-time configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the current OS/architecture combination is not supported.
    pub fn detect() -> Result<Self> {
        let os = match std::env::consts::OS {
            "linux" => Os::Linux,
            "macos" => Os::Macos,
            "windows" => Os::Windows,
            other => bail!(
                "Unsupported operating system: {other}. \
                 Supported systems are: linux, macos, windows"
            ),
        };

        let arch = match std::env::consts::ARCH {
            "x86_64" => Arch::Bits64,
            "x86" => Arch::Bits32,
            "aarch64" => Arch::Arm64,
            other => bail!(
                "Unsupported architecture: {other}. \
                 Supported architectures are: x86_64, x86, aarch64"
            ),
        };

        Ok(Self::new(os, arch))
    }

    /// Returns a copy of this platform with a different architecture.
    #[must_use]
    pub const fn with_arch(self, arch: Arch) -> Self {
        Self { os: self.os, arch }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}
