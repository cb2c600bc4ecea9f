//! Switching the active toolchain.
//!
//! Activation writes the current record to the single backup slot and then
//! replaces `active.toml` through a temporary file and a rename. A crash in
//! between can leave the backup updated without the new record applied, never
//! a half-written live record.

use anyhow::{Context, Result, anyhow, bail};
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info};

use super::paths::ToolchainPaths;
use super::store::{ActiveConfig, StateStore};
use crate::errors::SdkmError;

/// Entry script of an SDK, relative to its install directory.
#[cfg(windows)]
const ENTRY_SCRIPT: &str = "emscripten/emcc.bat";
#[cfg(not(windows))]
const ENTRY_SCRIPT: &str = "emscripten/emcc";

/// Reads and swaps the active configuration.
pub struct ActivationManager<'a, S> {
    paths: &'a ToolchainPaths,
    store: &'a S,
}

impl<'a, S: StateStore> ActivationManager<'a, S> {
    /// Creates a manager for the toolchains under `paths`.
    #[must_use]
    pub fn new(paths: &'a ToolchainPaths, store: &'a S) -> Self {
        Self { paths, store }
    }

    /// Makes an installed identity the active one.
    ///
    /// # Errors
    ///
    /// Returns [`SdkmError::NotInstalled`] if `key` is not in the installed
    /// set or its directory is gone, and [`SdkmError::NotAnSdk`] if it names a
    /// tool. The active configuration is untouched in both cases.
    pub fn activate(&self, key: &str) -> Result<ActiveConfig> {
        let installed = self.store.load_installed()?;
        let entry = installed
            .get(key)
            .ok_or_else(|| SdkmError::not_installed(key))?;
        if entry.backend.is_none() {
            return Err(SdkmError::not_an_sdk(key).into());
        }

        let root = self.paths.toolchain_dir(key);
        if !root.is_dir() {
            return Err(SdkmError::not_installed(key).into());
        }

        let config = ActiveConfig::for_entry(entry, root);

        if let Some(current) = self.store.read_active()? {
            debug!(previous = %current.identity, "backing up active configuration");
            self.store.write_backup(&current)?;
        }
        self.store
            .replace_active(&config)
            .with_context(|| format!("Failed to activate {key}"))?;

        info!(identity = key, "activated");
        Ok(config)
    }

    /// Returns the live configuration, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but is unreadable.
    pub fn active(&self) -> Result<Option<ActiveConfig>> {
        self.store.read_active()
    }

    /// Runs the active toolchain's `--clear-cache` and checks the cache
    /// directory is gone afterwards. Returns the cleared path.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is active, the entry script cannot be
    /// run or exits unsuccessfully, or the cache still exists.
    pub fn clear_cache(&self) -> Result<PathBuf> {
        let config = self
            .store
            .read_active()?
            .ok_or_else(|| anyhow!("No active toolchain. Run 'sdkm activate <version>' first."))?;

        let entry_script = config.root.join(ENTRY_SCRIPT);
        if !entry_script.is_file() {
            bail!(
                "{} has no entry script at {}",
                config.identity,
                entry_script.display()
            );
        }

        debug!(script = %entry_script.display(), "clearing cache");
        let status = Command::new(&entry_script)
            .arg("--clear-cache")
            .status()
            .with_context(|| format!("Failed to run {}", entry_script.display()))?;
        if !status.success() {
            bail!("{} --clear-cache failed: {status}", entry_script.display());
        }

        if config.cache.exists() {
            bail!(
                "Cache directory {} still exists after clear-cache",
                config.cache.display()
            );
        }
        Ok(config.cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::catalog::{ArtifactIdentity, Backend};
    use crate::toolchain::platform::Arch;
    use crate::toolchain::store::{InstalledEntry, MemoryStateStore};
    use semver::Version;

    fn temp_paths(name: &str) -> ToolchainPaths {
        let dir =
            std::env::temp_dir().join(format!("sdkm_test_{}_{}", name, rand::random::<u64>()));
        ToolchainPaths::with_root(dir)
    }

    /// Registers a fake install and returns its key.
    fn install(
        paths: &ToolchainPaths,
        store: &MemoryStateStore,
        version: (u64, u64, u64),
        backend: Backend,
    ) -> String {
        let identity = ArtifactIdentity::release(
            Version::new(version.0, version.1, version.2),
            backend,
            Arch::Bits64,
            "abc",
        );
        let dir = paths.toolchain_dir(identity.key());
        std::fs::create_dir_all(dir.join("emscripten")).unwrap();
        store
            .record_installed(InstalledEntry::new(&identity, "2026-01-01T00:00:00Z"))
            .unwrap();
        identity.key().to_string()
    }

    #[test]
    fn activating_uninstalled_identity_leaves_config_unchanged() {
        let paths = temp_paths("activate_missing");
        let store = MemoryStateStore::new();
        let key = install(&paths, &store, (1, 40, 1), Backend::Upstream);
        let manager = ActivationManager::new(&paths, &store);
        let before = manager.activate(&key).unwrap();

        let err = manager.activate("sdk-1.38.33-fastcomp-64bit").unwrap_err();

        assert!(matches!(
            crate::errors::find_sdkm_error(&err),
            Some(SdkmError::NotInstalled { identity }) if identity == "sdk-1.38.33-fastcomp-64bit"
        ));
        assert_eq!(store.read_active().unwrap(), Some(before));

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[test]
    fn backup_holds_previous_config_after_two_activations() {
        let paths = temp_paths("activate_backup");
        let store = MemoryStateStore::new();
        let first = install(&paths, &store, (1, 38, 33), Backend::Fastcomp);
        let second = install(&paths, &store, (1, 40, 1), Backend::Upstream);
        let manager = ActivationManager::new(&paths, &store);

        let a = manager.activate(&first).unwrap();
        assert_eq!(store.read_backup().unwrap(), None);
        let b = manager.activate(&second).unwrap();

        assert_eq!(store.read_backup().unwrap(), Some(a));
        assert_eq!(manager.active().unwrap(), Some(b));

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[test]
    fn activation_sets_exactly_one_backend_marker() {
        let paths = temp_paths("activate_markers");
        let store = MemoryStateStore::new();
        let fastcomp = install(&paths, &store, (1, 38, 33), Backend::Fastcomp);
        let upstream = install(&paths, &store, (1, 40, 1), Backend::Upstream);
        let manager = ActivationManager::new(&paths, &store);

        let config = manager.activate(&fastcomp).unwrap();
        assert!(config.fastcomp_root.is_some());
        assert!(config.binaryen_root.is_none());

        let config = manager.activate(&upstream).unwrap();
        assert!(config.binaryen_root.is_some());
        assert!(config.fastcomp_root.is_none());

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[test]
    fn activating_a_tool_is_refused_and_keeps_active_sdk() {
        let paths = temp_paths("activate_tool");
        let store = MemoryStateStore::new();
        let sdk = install(&paths, &store, (1, 40, 1), Backend::Upstream);
        let tool = ArtifactIdentity::tool("node-12.18.1-64bit", Arch::Bits64, None);
        std::fs::create_dir_all(paths.toolchain_dir(tool.key()).join("bin")).unwrap();
        store
            .record_installed(InstalledEntry::new(&tool, "2026-01-01T00:00:00Z"))
            .unwrap();
        let manager = ActivationManager::new(&paths, &store);
        let active = manager.activate(&sdk).unwrap();

        let err = manager.activate(tool.key()).unwrap_err();

        assert!(matches!(
            crate::errors::find_sdkm_error(&err),
            Some(SdkmError::NotAnSdk { identity }) if identity == "node-12.18.1-64bit"
        ));
        assert_eq!(store.read_active().unwrap(), Some(active));
        assert_eq!(store.read_backup().unwrap(), None);

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[test]
    fn recorded_entry_without_directory_is_not_installed() {
        let paths = temp_paths("activate_no_dir");
        let store = MemoryStateStore::new();
        let key = install(&paths, &store, (1, 40, 1), Backend::Upstream);
        std::fs::remove_dir_all(paths.toolchain_dir(&key)).unwrap();

        let err = ActivationManager::new(&paths, &store)
            .activate(&key)
            .unwrap_err();

        assert!(err.to_string().contains("is not installed"));
        assert_eq!(store.read_active().unwrap(), None);

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[test]
    fn clear_cache_without_active_toolchain_fails() {
        let paths = temp_paths("clear_cache_none");
        let store = MemoryStateStore::new();

        let err = ActivationManager::new(&paths, &store)
            .clear_cache()
            .unwrap_err();

        assert!(err.to_string().contains("No active toolchain"));
    }

    #[cfg(unix)]
    mod unix_clear_cache {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn write_entry_script(root: &std::path::Path, body: &str) {
            let script = root.join(ENTRY_SCRIPT);
            std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        #[test]
        fn clear_cache_removes_cache_directory() {
            let paths = temp_paths("clear_cache_ok");
            let store = MemoryStateStore::new();
            let key = install(&paths, &store, (1, 40, 1), Backend::Upstream);
            let manager = ActivationManager::new(&paths, &store);
            let config = manager.activate(&key).unwrap();
            std::fs::create_dir_all(config.cache.join("sysroot")).unwrap();
            write_entry_script(&config.root, r#"rm -rf "$(dirname "$0")/cache""#);

            let cleared = manager.clear_cache().unwrap();

            assert_eq!(cleared, config.cache);
            assert!(!config.cache.exists());

            std::fs::remove_dir_all(&paths.root).ok();
        }

        #[test]
        fn clear_cache_fails_when_cache_survives() {
            let paths = temp_paths("clear_cache_survives");
            let store = MemoryStateStore::new();
            let key = install(&paths, &store, (1, 40, 1), Backend::Upstream);
            let manager = ActivationManager::new(&paths, &store);
            let config = manager.activate(&key).unwrap();
            std::fs::create_dir_all(&config.cache).unwrap();
            write_entry_script(&config.root, "exit 0");

            let err = manager.clear_cache().unwrap_err();

            assert!(err.to_string().contains("still exists"));

            std::fs::remove_dir_all(&paths.root).ok();
        }
    }
}
