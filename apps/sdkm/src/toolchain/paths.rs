//! Path management for the sdkm state directory.
//!
//! The default root directory is `~/.sdkm/`, which can be overridden by
//! setting the `SDKM_HOME` environment variable.
//!
//! ## Directory Structure
//!
//! ```text
//! ~/.sdkm/                          # Root directory (or SDKM_HOME)
//!   config.toml                     # Optional settings
//!   releases-tags.json              # Cached release manifest
//!   installed.json                  # Installed set
//!   active.toml                     # Live active configuration
//!   active.toml.old                 # Previous active configuration
//!   toolchains/
//!     sdk-1.38.33-fastcomp-64bit/   # One directory per identity key
//!     node-12.18.1-64bit/
//!     .sdk-1.40.1-upstream-64bit.partial/   # Staging during install
//!   downloads/                      # Fetched archives
//! ```

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Environment variable to override the default state directory.
pub const SDKM_HOME_ENV: &str = "SDKM_HOME";

const CONFIG_FILE: &str = "config.toml";
const MANIFEST_FILE: &str = "releases-tags.json";
const INSTALLED_FILE: &str = "installed.json";
const ACTIVE_FILE: &str = "active.toml";
const ACTIVE_BACKUP_FILE: &str = "active.toml.old";

/// Suffix of staging directories created next to install directories.
const STAGING_SUFFIX: &str = ".partial";

/// Number of hex digits of the URL digest used to prefix download file names.
const DOWNLOAD_DIGEST_LEN: usize = 16;

/// Represents a date and time calculated from a Unix timestamp.
struct DateTime {
    year: u64,
    month: u64,
    day: u64,
    hours: u64,
    minutes: u64,
    seconds: u64,
}

impl DateTime {
    /// Creates a `DateTime` from a Unix timestamp.
    fn from_timestamp(timestamp: u64) -> Self {
        let days_since_epoch = timestamp / 86400;
        let secs_today = timestamp % 86400;

        let hours = secs_today / 3600;
        let minutes = (secs_today % 3600) / 60;
        let seconds = secs_today % 60;

        let mut year = 1970;
        let mut remaining_days = days_since_epoch;

        loop {
            let days_in_year = if is_leap_year(year) { 366 } else { 365 };
            if remaining_days < days_in_year {
                break;
            }
            remaining_days -= days_in_year;
            year += 1;
        }

        let mut month: u64 = 0;
        for (i, &days) in month_lengths(year).iter().enumerate() {
            if remaining_days < days {
                month = (i + 1) as u64;
                break;
            }
            remaining_days -= days;
        }

        Self {
            year,
            month,
            day: remaining_days + 1,
            hours,
            minutes,
            seconds,
        }
    }
}

fn month_lengths(year: u64) -> [u64; 12] {
    if is_leap_year(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    }
}

/// Checks if a year is a leap year.
fn is_leap_year(year: u64) -> bool {
    (year.is_multiple_of(4) && !year.is_multiple_of(100)) || year.is_multiple_of(400)
}

fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Formats a Unix timestamp as an ISO 8601 datetime string (YYYY-MM-DDTHH:MM:SSZ).
fn format_timestamp_iso8601(timestamp: u64) -> String {
    let dt = DateTime::from_timestamp(timestamp);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        dt.year, dt.month, dt.day, dt.hours, dt.minutes, dt.seconds
    )
}

/// Returns the current time as an ISO 8601 datetime string.
#[must_use = "returns the timestamp without side effects"]
pub fn now_iso8601() -> String {
    format_timestamp_iso8601(unix_now())
}

/// Turns an ISO 8601 timestamp into a relative string such as "2 days ago".
///
/// Only the date part is considered. Unparseable input is returned unchanged.
#[must_use = "returns formatted time without side effects"]
pub fn relative_time(timestamp: &str) -> String {
    let date = timestamp.split('T').next().unwrap_or(timestamp);
    let parts: Vec<&str> = date.split('-').collect();
    if parts.len() != 3 {
        return timestamp.to_string();
    }

    let (Ok(year), Ok(month), Ok(day)) = (
        parts[0].parse::<u64>(),
        parts[1].parse::<u64>(),
        parts[2].parse::<u64>(),
    ) else {
        return timestamp.to_string();
    };
    if !(1..=12).contains(&month) || day == 0 || year < 1970 {
        return timestamp.to_string();
    }

    let mut total_days: u64 = (1970..year)
        .map(|y| if is_leap_year(y) { 366 } else { 365 })
        .sum();

    #[allow(clippy::cast_possible_truncation)]
    let month_index = (month as usize).saturating_sub(1);
    total_days += month_lengths(year).iter().take(month_index).sum::<u64>();
    total_days += day - 1;

    let diff_days = unix_now().saturating_sub(total_days * 86400) / 86400;

    match diff_days {
        0 => "today".to_string(),
        1 => "yesterday".to_string(),
        2..=6 => format!("{diff_days} days ago"),
        7..=13 => "1 week ago".to_string(),
        14..=20 => "2 weeks ago".to_string(),
        21..=27 => "3 weeks ago".to_string(),
        28..=59 => "1 month ago".to_string(),
        60..=89 => "2 months ago".to_string(),
        90..=364 => format!("{} months ago", diff_days / 30),
        _ => format!("{} years ago", diff_days / 365),
    }
}

/// Whether `name` can be used as an install directory name: non-empty, a
/// single path component and not hidden.
#[must_use]
pub fn is_identity_key(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\'])
}

/// Manages paths under the sdkm state directory.
///
/// All on-disk locations are derived here so that the store, installer and
/// commands agree on the layout.
#[derive(Debug, Clone)]
pub struct ToolchainPaths {
    /// Root directory for all state (`~/.sdkm` or `SDKM_HOME`).
    pub root: PathBuf,
    /// Directory containing one subdirectory per installed identity.
    pub toolchains: PathBuf,
    /// Directory for fetched archives.
    pub downloads: PathBuf,
}

impl ToolchainPaths {
    /// Creates a new `ToolchainPaths` instance.
    ///
    /// The root directory is determined by:
    /// 1. The `SDKM_HOME` environment variable if set and non-empty
    /// 2. On Windows: `%APPDATA%\sdkm`
    /// 3. On Unix: `~/.sdkm` in the user's home directory
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self> {
        let from_env = std::env::var(SDKM_HOME_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty());

        let root = if let Some(home) = from_env {
            PathBuf::from(home.trim())
        } else {
            #[cfg(windows)]
            {
                dirs::data_dir()
                    .context("Cannot determine AppData directory. Set SDKM_HOME environment variable.")?
                    .join("sdkm")
            }
            #[cfg(not(windows))]
            {
                dirs::home_dir()
                    .context("Cannot determine home directory. Set SDKM_HOME environment variable.")?
                    .join(".sdkm")
            }
        };

        Ok(Self::with_root(root))
    }

    /// Creates a new `ToolchainPaths` instance with a specific root directory.
    #[must_use = "returns new paths instance without side effects"]
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            toolchains: root.join("toolchains"),
            downloads: root.join("downloads"),
            root,
        }
    }

    /// Install directory for an identity key.
    #[must_use = "returns the path without side effects"]
    pub fn toolchain_dir(&self, key: &str) -> PathBuf {
        self.toolchains.join(key)
    }

    /// Staging directory an install is extracted into before it is moved in place.
    #[must_use = "returns the path without side effects"]
    pub fn staging_dir(&self, key: &str) -> PathBuf {
        self.toolchains.join(format!(".{key}{STAGING_SUFFIX}"))
    }

    /// Deterministic download location for a URL.
    ///
    /// The file name is prefixed with a digest of the whole URL, so two
    /// artifacts sharing a file name never collide.
    #[must_use = "returns the path without side effects"]
    pub fn download_path(&self, url: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        let file_name = url
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("artifact");
        self.downloads
            .join(format!("{}-{file_name}", &digest[..DOWNLOAD_DIGEST_LEN]))
    }

    /// Optional settings file.
    #[must_use = "returns the path without side effects"]
    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Cached release manifest.
    #[must_use = "returns the path without side effects"]
    pub fn manifest_file(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Persisted installed set.
    #[must_use = "returns the path without side effects"]
    pub fn installed_file(&self) -> PathBuf {
        self.root.join(INSTALLED_FILE)
    }

    /// Live active configuration.
    #[must_use = "returns the path without side effects"]
    pub fn active_file(&self) -> PathBuf {
        self.root.join(ACTIVE_FILE)
    }

    /// Single-generation backup of the active configuration.
    #[must_use = "returns the path without side effects"]
    pub fn active_backup_file(&self) -> PathBuf {
        self.root.join(ACTIVE_BACKUP_FILE)
    }

    /// Ensures the root, toolchains and downloads directories exist.
    ///
    /// # Errors
    ///
    /// Returns an error if any directory cannot be created.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.root, &self.toolchains, &self.downloads] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}
