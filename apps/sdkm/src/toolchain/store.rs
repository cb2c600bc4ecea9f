//! Persisted state: installed set, active configuration and cached manifest.
//!
//! Components never touch these files directly; they receive a
//! [`StateStore`]. [`FsStateStore`] keeps state under the sdkm root and
//! [`MemoryStateStore`] keeps it in memory for tests.
//!
//! Every write that replaces a live record goes through a temporary sibling
//! file and a rename, so readers see either the old or the new content.
//!
//! Two sdkm processes mutating the same root concurrently are not supported;
//! there is no lock file and callers must serialise invocations themselves.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::{Mutex, MutexGuard};

use super::catalog::{ArtifactIdentity, Backend};
use super::manifest::ReleaseManifest;
use super::paths::ToolchainPaths;
use super::platform::Arch;
use crate::errors::SdkmError;

/// One installed identity, as recorded in `installed.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledEntry {
    /// Identity key (also the install directory name).
    pub name: String,
    /// SDK backend; absent for tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<Backend>,
    /// Architecture variant.
    pub arch: Arch,
    /// Release version, if the identity has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Release hash that was installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_hash: Option<String>,
    /// ISO 8601 install time.
    pub installed_at: String,
}

impl InstalledEntry {
    /// Builds the record for a freshly verified install.
    #[must_use]
    pub fn new(identity: &ArtifactIdentity, installed_at: impl Into<String>) -> Self {
        Self {
            name: identity.key().to_string(),
            backend: identity.backend,
            arch: identity.arch,
            version: identity.version.as_ref().map(ToString::to_string),
            release_hash: identity.release_hash.clone(),
            installed_at: installed_at.into(),
        }
    }

    /// Whether this record was installed from exactly the artifact `identity`
    /// resolves to. Un-pinned identities never match.
    #[must_use]
    pub fn matches_release(&self, identity: &ArtifactIdentity) -> bool {
        self.name == identity.key()
            && self.release_hash.is_some()
            && self.release_hash == identity.release_hash
    }
}

/// Installed identities keyed by identity key.
pub type InstalledSet = BTreeMap<String, InstalledEntry>;

/// The live activation record, serialised as `active.toml`.
///
/// `binaryen_root` is only present for the upstream backend and
/// `fastcomp_root` only for the legacy one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveConfig {
    /// Identity key of the active toolchain.
    pub identity: String,
    /// Install directory.
    pub root: PathBuf,
    /// SDK backend; absent for tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<Backend>,
    /// Directory holding the compiler binaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llvm_root: Option<PathBuf>,
    /// Upstream-only marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binaryen_root: Option<PathBuf>,
    /// Legacy-only marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fastcomp_root: Option<PathBuf>,
    /// Cache of built system libraries owned by the toolchain.
    pub cache: PathBuf,
}

impl ActiveConfig {
    /// Composes the record for an installed entry living in `root`.
    #[must_use]
    pub fn for_entry(entry: &InstalledEntry, root: PathBuf) -> Self {
        let (llvm_root, binaryen_root, fastcomp_root) = match entry.backend {
            Some(Backend::Upstream) => (Some(root.join("bin")), Some(root.clone()), None),
            Some(Backend::Fastcomp) => (
                Some(root.join("fastcomp").join("bin")),
                None,
                Some(root.join("fastcomp")),
            ),
            None => (None, None, None),
        };
        Self {
            identity: entry.name.clone(),
            cache: root.join("emscripten").join("cache"),
            root,
            backend: entry.backend,
            llvm_root,
            binaryen_root,
            fastcomp_root,
        }
    }

    /// Checks the backend markers are mutually exclusive and consistent.
    ///
    /// # Errors
    ///
    /// Returns [`SdkmError::Config`] describing the inconsistency.
    pub fn validate(&self) -> Result<(), SdkmError> {
        let consistent = match self.backend {
            Some(Backend::Upstream) => self.fastcomp_root.is_none(),
            Some(Backend::Fastcomp) => self.binaryen_root.is_none(),
            None => self.binaryen_root.is_none() && self.fastcomp_root.is_none(),
        };
        if consistent {
            Ok(())
        } else {
            Err(SdkmError::config(format!(
                "active configuration for {} carries markers for both backends",
                self.identity
            )))
        }
    }
}

/// Access to persisted state.
pub trait StateStore {
    /// Loads the installed set; empty when nothing was ever installed.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read or parsed.
    fn load_installed(&self) -> Result<InstalledSet>;

    /// Adds or replaces one installed entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn record_installed(&self, entry: InstalledEntry) -> Result<()>;

    /// Removes one installed entry, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn remove_installed(&self, key: &str) -> Result<bool>;

    /// Reads the live active configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read or parsed.
    fn read_active(&self) -> Result<Option<ActiveConfig>>;

    /// Reads the backup of the previous active configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read or parsed.
    fn read_backup(&self) -> Result<Option<ActiveConfig>>;

    /// Overwrites the single backup slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup cannot be written.
    fn write_backup(&self, config: &ActiveConfig) -> Result<()>;

    /// Atomically replaces the live active configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn replace_active(&self, config: &ActiveConfig) -> Result<()>;

    /// Reads the cached manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache exists but cannot be read or parsed.
    fn read_manifest(&self) -> Result<Option<ReleaseManifest>>;

    /// Replaces the cached manifest wholesale.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be written.
    fn replace_manifest(&self, manifest: &ReleaseManifest) -> Result<()>;
}

/// Writes `contents` to a temporary sibling of `path` and renames it into place.
fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| SdkmError::io("Failed to create directory", parent, e))?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    std::fs::write(&tmp, contents)
        .map_err(|e| SdkmError::io("Failed to write temporary file", &tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        std::fs::remove_file(&tmp).ok();
        return Err(SdkmError::io("Failed to move file into place", path, e).into());
    }
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SdkmError::io("Failed to read file", path, e).into()),
    }
}

/// State kept as files under the sdkm root.
#[derive(Debug, Clone)]
pub struct FsStateStore {
    paths: ToolchainPaths,
}

impl FsStateStore {
    /// Creates a store rooted at `paths.root`.
    #[must_use]
    pub fn new(paths: ToolchainPaths) -> Self {
        Self { paths }
    }

    fn read_config(path: &Path) -> Result<Option<ActiveConfig>> {
        let Some(text) = read_optional(path)? else {
            return Ok(None);
        };
        let config: ActiveConfig = toml::from_str(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(Some(config))
    }

    fn write_config(path: &Path, config: &ActiveConfig) -> Result<()> {
        config.validate()?;
        let text = toml::to_string(config).context("Failed to serialize active configuration")?;
        atomic_write(path, &text)
    }

    fn write_installed(&self, installed: &InstalledSet) -> Result<()> {
        let text = serde_json::to_string_pretty(installed)
            .context("Failed to serialize installed set")?;
        atomic_write(&self.paths.installed_file(), &text)
    }
}

impl StateStore for FsStateStore {
    fn load_installed(&self) -> Result<InstalledSet> {
        let path = self.paths.installed_file();
        match read_optional(&path)? {
            Some(text) => serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse {}", path.display())),
            None => Ok(InstalledSet::new()),
        }
    }

    fn record_installed(&self, entry: InstalledEntry) -> Result<()> {
        let mut installed = self.load_installed()?;
        installed.insert(entry.name.clone(), entry);
        self.write_installed(&installed)
    }

    fn remove_installed(&self, key: &str) -> Result<bool> {
        let mut installed = self.load_installed()?;
        let existed = installed.remove(key).is_some();
        if existed {
            self.write_installed(&installed)?;
        }
        Ok(existed)
    }

    fn read_active(&self) -> Result<Option<ActiveConfig>> {
        Self::read_config(&self.paths.active_file())
    }

    fn read_backup(&self) -> Result<Option<ActiveConfig>> {
        Self::read_config(&self.paths.active_backup_file())
    }

    fn write_backup(&self, config: &ActiveConfig) -> Result<()> {
        Self::write_config(&self.paths.active_backup_file(), config)
    }

    fn replace_active(&self, config: &ActiveConfig) -> Result<()> {
        Self::write_config(&self.paths.active_file(), config)
    }

    fn read_manifest(&self) -> Result<Option<ReleaseManifest>> {
        let path = self.paths.manifest_file();
        let Some(text) = read_optional(&path)? else {
            return Ok(None);
        };
        let manifest = ReleaseManifest::parse(&text)
            .with_context(|| format!("Cached manifest {} is invalid; run 'sdkm update-tags'", path.display()))?;
        Ok(Some(manifest))
    }

    fn replace_manifest(&self, manifest: &ReleaseManifest) -> Result<()> {
        let text =
            serde_json::to_string_pretty(manifest).context("Failed to serialize manifest")?;
        atomic_write(&self.paths.manifest_file(), &text)
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
struct MemoryState {
    installed: InstalledSet,
    active: Option<ActiveConfig>,
    backup: Option<ActiveConfig>,
    manifest: Option<ReleaseManifest>,
}

/// State kept in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<MemoryState>,
}

#[cfg(test)]
impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
impl StateStore for MemoryStateStore {
    fn load_installed(&self) -> Result<InstalledSet> {
        Ok(self.lock().installed.clone())
    }

    fn record_installed(&self, entry: InstalledEntry) -> Result<()> {
        self.lock().installed.insert(entry.name.clone(), entry);
        Ok(())
    }

    fn remove_installed(&self, key: &str) -> Result<bool> {
        Ok(self.lock().installed.remove(key).is_some())
    }

    fn read_active(&self) -> Result<Option<ActiveConfig>> {
        Ok(self.lock().active.clone())
    }

    fn read_backup(&self) -> Result<Option<ActiveConfig>> {
        Ok(self.lock().backup.clone())
    }

    fn write_backup(&self, config: &ActiveConfig) -> Result<()> {
        self.lock().backup = Some(config.clone());
        Ok(())
    }

    fn replace_active(&self, config: &ActiveConfig) -> Result<()> {
        config.validate()?;
        self.lock().active = Some(config.clone());
        Ok(())
    }

    fn read_manifest(&self) -> Result<Option<ReleaseManifest>> {
        Ok(self.lock().manifest.clone())
    }

    fn replace_manifest(&self, manifest: &ReleaseManifest) -> Result<()> {
        self.lock().manifest = Some(manifest.clone());
        Ok(())
    }
}
