//! Installing and removing toolchain identities.
//!
//! An install runs fetch, extract, verify and register in that order. The
//! installed set only ever gains an entry after the payload has been verified
//! in its final location, so a failed or interrupted install leaves the set
//! exactly as it was.

use anyhow::{Context, Result};
use futures_util::future::join_all;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::archive::Extractor;
use super::catalog::{ArtifactIdentity, Resolution};
use super::fetcher::{FetchOptions, Fetcher};
use super::paths::{ToolchainPaths, is_identity_key, now_iso8601};
use super::platform::Os;
use super::policy::BackendPolicy;
use super::store::{InstalledEntry, StateStore};
use crate::errors::SdkmError;

/// What [`Installer::install`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The same release was already installed; nothing was fetched.
    Skipped,
    /// The artifact was fetched, verified and registered.
    Installed,
}

/// Fetches, unpacks and registers identities.
pub struct Installer<'a, S, F, E> {
    paths: &'a ToolchainPaths,
    store: &'a S,
    fetcher: &'a F,
    extractor: &'a E,
    dist_server: &'a str,
    os: Os,
}

impl<'a, S: StateStore, F: Fetcher, E: Extractor> Installer<'a, S, F, E> {
    /// Creates an installer fetching `os` builds from `dist_server`.
    #[must_use]
    pub fn new(
        paths: &'a ToolchainPaths,
        store: &'a S,
        fetcher: &'a F,
        extractor: &'a E,
        dist_server: &'a str,
        os: Os,
    ) -> Self {
        Self {
            paths,
            store,
            fetcher,
            extractor,
            dist_server,
            os,
        }
    }

    /// Installs the resolved identity unless the same release is already in
    /// place.
    ///
    /// # Errors
    ///
    /// - [`SdkmError::DeprecatedBackend`] before any fetch for frozen builds
    /// - [`SdkmError::Download`] if the fetch fails, times out or is cancelled
    /// - [`SdkmError::CorruptArchive`] if extraction or verification fails
    pub async fn install(
        &self,
        resolution: &Resolution,
        options: &FetchOptions,
    ) -> Result<InstallOutcome> {
        let identity = &resolution.identity;
        BackendPolicy.check_identity(identity)?;

        let key = identity.key();
        let install_dir = self.paths.toolchain_dir(key);
        let installed = self.store.load_installed()?;
        if let Some(entry) = installed.get(key)
            && entry.matches_release(identity)
            && install_dir.is_dir()
        {
            debug!(identity = %identity, "already installed");
            return Ok(InstallOutcome::Skipped);
        }

        let url = identity.artifact_url(self.dist_server, self.os);
        info!(identity = %identity, %url, "fetching artifact");
        let archive = self
            .fetcher
            .fetch(&url, &self.paths.download_path(&url), options)
            .await?;

        let placed = self.place(identity, &archive);
        std::fs::remove_file(&archive).ok();
        placed?;

        self.store
            .record_installed(InstalledEntry::new(identity, now_iso8601()))
            .with_context(|| format!("Failed to record installation of {identity}"))?;
        info!(identity = %identity, "installed");
        Ok(InstallOutcome::Installed)
    }

    /// Extracts into staging, verifies, then swaps staging into place.
    fn place(&self, identity: &ArtifactIdentity, archive: &Path) -> Result<()> {
        let key = identity.key();
        let staging = self.paths.staging_dir(key);
        if staging.exists() {
            remove_dir(&staging)?;
        }

        let fallback_name = if identity.is_sdk() {
            key
        } else {
            identity.tool_base()
        };
        if let Err(e) = self.extractor.extract(archive, &staging, fallback_name) {
            std::fs::remove_dir_all(&staging).ok();
            return Err(
                SdkmError::corrupt_archive(key, format!("extraction failed: {e:#}")).into(),
            );
        }

        let outputs = identity.mandatory_outputs();
        if !outputs.iter().any(|output| staging.join(output).exists()) {
            std::fs::remove_dir_all(&staging).ok();
            let expected = outputs
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(" or ");
            return Err(SdkmError::corrupt_archive(key, format!("missing {expected}")).into());
        }

        let install_dir = self.paths.toolchain_dir(key);
        if install_dir.exists() {
            remove_dir(&install_dir)?;
        }
        std::fs::rename(&staging, &install_dir)
            .map_err(|e| SdkmError::io("Failed to move install into place", &install_dir, e))?;
        Ok(())
    }

    /// Removes an installed identity: its directory, staging leftovers and
    /// its installed-set entry.
    ///
    /// # Errors
    ///
    /// Returns [`SdkmError::NotInstalled`] if none of these exist.
    pub fn uninstall(&self, key: &str) -> Result<()> {
        if !is_identity_key(key) {
            return Err(SdkmError::not_installed(key).into());
        }

        let mut found = false;
        for dir in [self.paths.toolchain_dir(key), self.paths.staging_dir(key)] {
            if dir.exists() {
                remove_dir(&dir)?;
                found = true;
            }
        }
        found |= self.store.remove_installed(key)?;

        if !found {
            return Err(SdkmError::not_installed(key).into());
        }
        info!(identity = key, "uninstalled");
        Ok(())
    }

    /// Fetches several artifacts concurrently without registering anything.
    ///
    /// Every target is policy-checked before the first fetch starts. A failed
    /// fetch does not abort its siblings: all of them run to completion, then
    /// the downloaded paths are returned in target order.
    ///
    /// # Errors
    ///
    /// Fails with the policy error, or with the first download error in
    /// target order.
    pub async fn prefetch(
        &self,
        targets: &[(ArtifactIdentity, Os)],
        options: &FetchOptions,
    ) -> Result<Vec<PathBuf>> {
        for (identity, _) in targets {
            BackendPolicy.check_identity(identity)?;
        }

        let fetches = targets.iter().map(|(identity, os)| {
            let url = identity.artifact_url(self.dist_server, *os);
            let dest = self.paths.download_path(&url);
            async move { self.fetcher.fetch(&url, &dest, options).await }
        });

        let results = join_all(fetches).await;
        let mut downloaded = Vec::with_capacity(results.len());
        for result in results {
            downloaded.push(result?);
        }
        Ok(downloaded)
    }
}

fn remove_dir(path: &Path) -> Result<()> {
    std::fs::remove_dir_all(path)
        .map_err(|e| SdkmError::io("Failed to remove directory", path, e).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::cancel::CancelToken;
    use crate::toolchain::catalog::VersionCatalog;
    use crate::toolchain::manifest::ReleaseManifest;
    use crate::toolchain::platform::Arch;
    use crate::toolchain::store::MemoryStateStore;
    use crate::toolchain::testing::{CountingFetcher, ScriptedExtractor};
    use std::time::Duration;

    const DIST: &str = "https://dist.example";

    fn temp_paths(name: &str) -> ToolchainPaths {
        let dir =
            std::env::temp_dir().join(format!("sdkm_test_{}_{}", name, rand::random::<u64>()));
        ToolchainPaths::with_root(dir)
    }

    fn manifest(latest_hash: &str) -> ReleaseManifest {
        ReleaseManifest::parse(&format!(
            r#"{{
                "latest": "1.40.1",
                "releases": {{ "1.40.1": "{latest_hash}", "1.38.33": "c58ec3cd" }},
                "tot": "9a2e4ab9",
                "tools": {{ "node-12.18.1-64bit": null }}
            }}"#
        ))
        .unwrap()
    }

    fn resolve(input: &str, manifest: &ReleaseManifest) -> Resolution {
        VersionCatalog::new(Arch::Bits64)
            .resolve_str(input, manifest)
            .unwrap()
    }

    fn options() -> FetchOptions {
        FetchOptions::new(Duration::from_secs(5), CancelToken::new())
    }

    #[tokio::test]
    async fn second_pinned_install_is_skipped_without_fetching() {
        let paths = temp_paths("install_skip");
        let store = MemoryStateStore::new();
        let fetcher = CountingFetcher::new();
        let extractor = ScriptedExtractor::sdk();
        let installer = Installer::new(&paths, &store, &fetcher, &extractor, DIST, Os::Linux);
        let resolution = resolve("1.38.33", &manifest("aaa"));

        let first = installer.install(&resolution, &options()).await.unwrap();
        let second = installer.install(&resolution, &options()).await.unwrap();

        assert_eq!(first, InstallOutcome::Installed);
        assert_eq!(second, InstallOutcome::Skipped);
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(
            fetcher.urls(),
            vec!["https://dist.example/builds/linux/c58ec3cd/fastcomp-64bit.tar.gz"]
        );

        let installed = store.load_installed().unwrap();
        let entry = &installed["sdk-1.38.33-fastcomp-64bit"];
        assert_eq!(entry.release_hash.as_deref(), Some("c58ec3cd"));
        assert!(
            paths
                .toolchain_dir("sdk-1.38.33-fastcomp-64bit")
                .join("emscripten/emcc")
                .exists()
        );
        assert!(!paths.staging_dir("sdk-1.38.33-fastcomp-64bit").exists());

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[tokio::test]
    async fn rolling_alias_refetches_after_manifest_change() {
        let paths = temp_paths("install_rolling");
        let store = MemoryStateStore::new();
        let fetcher = CountingFetcher::new();
        let extractor = ScriptedExtractor::sdk();
        let installer = Installer::new(&paths, &store, &fetcher, &extractor, DIST, Os::Linux);

        let before = resolve("latest", &manifest("aaa"));
        installer.install(&before, &options()).await.unwrap();
        let unchanged = installer.install(&before, &options()).await.unwrap();
        assert_eq!(unchanged, InstallOutcome::Skipped);

        let after = resolve("latest", &manifest("bbb"));
        assert_eq!(before.identity.key(), after.identity.key());
        let outcome = installer.install(&after, &options()).await.unwrap();

        assert_eq!(outcome, InstallOutcome::Installed);
        assert_eq!(fetcher.calls(), 2);
        let installed = store.load_installed().unwrap();
        assert_eq!(
            installed["sdk-1.40.1-upstream-64bit"].release_hash.as_deref(),
            Some("bbb")
        );

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[tokio::test]
    async fn unpinned_tool_is_always_fetched() {
        let paths = temp_paths("install_tool");
        let store = MemoryStateStore::new();
        let fetcher = CountingFetcher::new();
        let extractor = ScriptedExtractor::with_files(&["bin/node"]);
        let installer = Installer::new(&paths, &store, &fetcher, &extractor, DIST, Os::Macos);
        let resolution = resolve("node-12.18.1-64bit", &manifest("aaa"));

        installer.install(&resolution, &options()).await.unwrap();
        let again = installer.install(&resolution, &options()).await.unwrap();

        assert_eq!(again, InstallOutcome::Installed);
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(
            fetcher.urls()[0],
            "https://dist.example/tools/macos/node-12.18.1-64bit.tar.gz"
        );

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[tokio::test]
    async fn missing_outputs_are_corrupt_and_nothing_is_registered() {
        let paths = temp_paths("install_corrupt");
        let store = MemoryStateStore::new();
        let fetcher = CountingFetcher::new();
        let extractor = ScriptedExtractor::with_files(&["README"]);
        let installer = Installer::new(&paths, &store, &fetcher, &extractor, DIST, Os::Linux);
        let resolution = resolve("1.38.33", &manifest("aaa"));

        let err = installer.install(&resolution, &options()).await.unwrap_err();

        let sdkm = crate::errors::find_sdkm_error(&err).expect("typed error");
        assert!(matches!(sdkm, SdkmError::CorruptArchive { identity, .. } if identity == "sdk-1.38.33-fastcomp-64bit"));
        assert!(store.load_installed().unwrap().is_empty());
        assert!(!paths.toolchain_dir("sdk-1.38.33-fastcomp-64bit").exists());
        assert!(!paths.staging_dir("sdk-1.38.33-fastcomp-64bit").exists());
        assert_eq!(std::fs::read_dir(&paths.downloads).unwrap().count(), 0);

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[tokio::test]
    async fn extraction_failure_is_corrupt() {
        let paths = temp_paths("install_extract_fail");
        let store = MemoryStateStore::new();
        let fetcher = CountingFetcher::new();
        let extractor = ScriptedExtractor::failing();
        let installer = Installer::new(&paths, &store, &fetcher, &extractor, DIST, Os::Linux);
        let resolution = resolve("1.40.1", &manifest("aaa"));

        let err = installer.install(&resolution, &options()).await.unwrap_err();

        assert_eq!(crate::errors::find_sdkm_error(&err).map(SdkmError::exit_code), Some(5));
        assert!(store.load_installed().unwrap().is_empty());

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[tokio::test]
    async fn download_failure_leaves_installed_set_untouched() {
        let paths = temp_paths("install_download_fail");
        let store = MemoryStateStore::new();
        let fetcher = CountingFetcher::failing();
        let extractor = ScriptedExtractor::sdk();
        let installer = Installer::new(&paths, &store, &fetcher, &extractor, DIST, Os::Linux);
        let resolution = resolve("1.40.1", &manifest("aaa"));

        let err = installer.install(&resolution, &options()).await.unwrap_err();

        assert!(matches!(
            crate::errors::find_sdkm_error(&err),
            Some(SdkmError::Download { .. })
        ));
        assert!(store.load_installed().unwrap().is_empty());
        assert!(!paths.toolchain_dir("sdk-1.40.1-upstream-64bit").exists());

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[tokio::test]
    async fn frozen_backend_is_rejected_without_fetching() {
        let paths = temp_paths("install_frozen");
        let store = MemoryStateStore::new();
        let fetcher = CountingFetcher::new();
        let extractor = ScriptedExtractor::sdk();
        let installer = Installer::new(&paths, &store, &fetcher, &extractor, DIST, Os::Linux);
        let resolution = resolve("sdk-releases-fastcomp-9a2e4ab9-64bit", &manifest("aaa"));

        let err = installer.install(&resolution, &options()).await.unwrap_err();

        assert!(matches!(
            crate::errors::find_sdkm_error(&err),
            Some(SdkmError::DeprecatedBackend { .. })
        ));
        assert_eq!(fetcher.calls(), 0);

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[tokio::test]
    async fn uninstall_removes_directory_and_record() {
        let paths = temp_paths("uninstall");
        let store = MemoryStateStore::new();
        let fetcher = CountingFetcher::new();
        let extractor = ScriptedExtractor::sdk();
        let installer = Installer::new(&paths, &store, &fetcher, &extractor, DIST, Os::Linux);
        let resolution = resolve("1.40.1", &manifest("aaa"));
        installer.install(&resolution, &options()).await.unwrap();

        installer.uninstall("sdk-1.40.1-upstream-64bit").unwrap();

        assert!(!paths.toolchain_dir("sdk-1.40.1-upstream-64bit").exists());
        assert!(store.load_installed().unwrap().is_empty());

        let err = installer.uninstall("sdk-1.40.1-upstream-64bit").unwrap_err();
        assert!(matches!(
            crate::errors::find_sdkm_error(&err),
            Some(SdkmError::NotInstalled { .. })
        ));

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[tokio::test]
    async fn prefetch_fetches_every_target_without_registering() {
        let paths = temp_paths("prefetch");
        let store = MemoryStateStore::new();
        let fetcher = CountingFetcher::new();
        let extractor = ScriptedExtractor::sdk();
        let installer = Installer::new(&paths, &store, &fetcher, &extractor, DIST, Os::Linux);
        let identity = resolve("1.40.1", &manifest("aaa")).identity;

        let downloaded = installer
            .prefetch(
                &[(identity.clone(), Os::Linux), (identity, Os::Windows)],
                &options(),
            )
            .await
            .unwrap();

        assert_eq!(downloaded.len(), 2);
        assert_ne!(downloaded[0], downloaded[1]);
        assert!(downloaded.iter().all(|p| p.exists()));
        assert_eq!(fetcher.calls(), 2);
        assert!(store.load_installed().unwrap().is_empty());

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[tokio::test]
    async fn prefetch_failure_lets_sibling_fetches_finish() {
        let paths = temp_paths("prefetch_partial");
        let store = MemoryStateStore::new();
        let fetcher = CountingFetcher::failing_for("/windows/");
        let extractor = ScriptedExtractor::sdk();
        let installer = Installer::new(&paths, &store, &fetcher, &extractor, DIST, Os::Linux);
        let identity = resolve("1.40.1", &manifest("aaa")).identity;
        let linux_url = identity.artifact_url(DIST, Os::Linux);

        let err = installer
            .prefetch(
                &[(identity.clone(), Os::Windows), (identity, Os::Linux)],
                &options(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            crate::errors::find_sdkm_error(&err),
            Some(SdkmError::Download { target, .. }) if target.contains("/windows/")
        ));
        assert_eq!(fetcher.calls(), 2);
        assert!(paths.download_path(&linux_url).exists());
        let leftovers = std::fs::read_dir(&paths.downloads)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .count();
        assert_eq!(leftovers, 0);

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[tokio::test]
    async fn cancelled_install_registers_nothing() {
        let paths = temp_paths("install_cancelled");
        let store = MemoryStateStore::new();
        let fetcher = CountingFetcher::new();
        let extractor = ScriptedExtractor::sdk();
        let installer = Installer::new(&paths, &store, &fetcher, &extractor, DIST, Os::Linux);
        let resolution = resolve("1.40.1", &manifest("aaa"));
        let options = options();
        options.cancel.cancel();

        let err = installer.install(&resolution, &options).await.unwrap_err();

        assert!(err.to_string().contains("cancelled"));
        assert!(matches!(
            crate::errors::find_sdkm_error(&err),
            Some(SdkmError::Download { .. })
        ));
        assert!(store.load_installed().unwrap().is_empty());
        assert!(!paths.toolchain_dir("sdk-1.40.1-upstream-64bit").exists());
        assert!(!paths.staging_dir("sdk-1.40.1-upstream-64bit").exists());

        std::fs::remove_dir_all(&paths.root).ok();
    }
}
