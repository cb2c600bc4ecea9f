//! Runtime settings for sdkm.
//!
//! Values are layered, later sources winning:
//!
//! 1. Built-in defaults
//! 2. `<SDKM_HOME>/config.toml`
//! 3. Environment variables
//!
//! ## Configuration File
//!
//! ```toml
//! dist_server = "https://mirror.example/sdk"
//! fetch_timeout = 600
//! arch = "arm64"
//! ```
//!
//! ## Environment Variables
//!
//! - `SDKM_DIST_SERVER` - Distribution server URL or local mirror directory
//! - `SDKM_FETCH_TIMEOUT` - Fetch timeout in seconds
//! - `SDKM_ARCH` - Architecture variant (`64bit`, `32bit`, `arm64`)
//!
//! Empty or whitespace-only values are treated as unset.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::errors::SdkmError;
use crate::toolchain::paths::ToolchainPaths;
use crate::toolchain::platform::{Arch, Platform};

/// Environment variable overriding the distribution server.
pub const DIST_SERVER_ENV: &str = "SDKM_DIST_SERVER";

/// Environment variable overriding the fetch timeout, in seconds.
pub const FETCH_TIMEOUT_ENV: &str = "SDKM_FETCH_TIMEOUT";

/// Environment variable overriding the detected architecture.
pub const ARCH_ENV: &str = "SDKM_ARCH";

const DEFAULT_DIST_SERVER: &str = "https://releases.sdkm.dev";

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 300;

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSettings {
    dist_server: Option<String>,
    fetch_timeout: Option<u64>,
    arch: Option<Arch>,
}

/// Effective settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    /// State directory layout.
    pub paths: ToolchainPaths,
    /// Distribution server URL or mirror directory.
    pub dist_server: String,
    /// Upper bound for every fetch.
    pub fetch_timeout: Duration,
    /// Host OS with the effective architecture.
    pub platform: Platform,
}

impl Settings {
    /// Loads settings for the current process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory cannot be determined, the
    /// platform is unsupported, or a configuration value is invalid.
    pub fn load() -> Result<Self> {
        let paths = ToolchainPaths::new()?;
        Self::load_from(paths, Platform::detect()?, |key| std::env::var(key).ok())
    }

    /// Loads settings with an explicit root, host platform and environment.
    ///
    /// # Errors
    ///
    /// Returns [`SdkmError::Config`] if `config.toml` or an environment value
    /// is invalid.
    pub fn load_from(
        paths: ToolchainPaths,
        host: Platform,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let file = read_file_settings(&paths)?;
        let lookup = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let dist_server = lookup(DIST_SERVER_ENV)
            .or(file.dist_server)
            .unwrap_or_else(|| DEFAULT_DIST_SERVER.to_string());

        let fetch_timeout = match lookup(FETCH_TIMEOUT_ENV) {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                SdkmError::config(format!(
                    "{FETCH_TIMEOUT_ENV} must be a whole number of seconds, got '{raw}'"
                ))
            })?,
            None => file.fetch_timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
        };
        if fetch_timeout == 0 {
            return Err(SdkmError::config("fetch timeout must be greater than zero").into());
        }

        let arch = match lookup(ARCH_ENV) {
            Some(raw) => raw
                .parse::<Arch>()
                .map_err(|e| SdkmError::config(format!("{ARCH_ENV}: {e}")))?,
            None => file.arch.unwrap_or(host.arch),
        };

        let settings = Self {
            paths,
            dist_server,
            fetch_timeout: Duration::from_secs(fetch_timeout),
            platform: host.with_arch(arch),
        };
        debug!(
            root = %settings.paths.root.display(),
            dist_server = %settings.dist_server,
            platform = %settings.platform,
            "settings loaded"
        );
        Ok(settings)
    }
}

fn read_file_settings(paths: &ToolchainPaths) -> Result<FileSettings> {
    let path = paths.config_file();
    if !path.is_file() {
        return Ok(FileSettings::default());
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&text).map_err(|e| {
        SdkmError::config(format!("invalid {}: {}", path.display(), e.message())).into()
    })
}
