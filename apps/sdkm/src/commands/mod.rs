//! Command modules for the sdkm CLI.
//!
//! ## Toolchain Commands
//!
//! - [`install`] - Resolve and install SDKs or tools
//! - [`activate`] - Make an installed SDK the active one
//! - [`uninstall`] - Remove an installed SDK or tool
//! - [`update`] - Refresh the release manifest
//! - [`list`] - Show available and installed versions
//! - [`clear_cache`] - Clear the active SDK's library cache
//! - [`fetch`] - Download artifacts without installing
//! - [`env`] - Print shell exports for the active SDK

pub mod activate;
pub mod clear_cache;
pub mod env;
pub mod fetch;
pub mod install;
pub mod list;
pub mod uninstall;
pub mod update;

use anyhow::Result;
use std::time::Duration;

use crate::settings::Settings;
use crate::toolchain::manifest::{self, ReleaseManifest};
use crate::toolchain::paths::is_identity_key;
use crate::toolchain::{
    ActivationManager, ArchiveExtractor, CancelToken, FetchOptions, FsStateStore, HttpFetcher,
    Installer, Specifier, StateStore, VersionCatalog,
};

/// Everything a command needs for one invocation.
pub struct Session {
    /// Resolved settings, including the state layout.
    pub settings: Settings,
    /// Persisted state under the sdkm root.
    pub store: FsStateStore,
    fetcher: HttpFetcher,
    extractor: ArchiveExtractor,
    cancel: CancelToken,
}

impl Session {
    /// Loads settings and prepares the state directory.
    ///
    /// # Errors
    ///
    /// Returns an error if settings are invalid or the state directory
    /// cannot be created.
    pub fn open(cancel: &CancelToken) -> Result<Self> {
        let settings = Settings::load()?;
        settings.paths.ensure_directories()?;
        Ok(Self {
            store: FsStateStore::new(settings.paths.clone()),
            fetcher: HttpFetcher::new()?,
            extractor: ArchiveExtractor::new(),
            cancel: cancel.clone(),
            settings,
        })
    }

    /// Fetch limits, with an optional per-command timeout override in seconds.
    #[must_use]
    pub fn fetch_options(&self, timeout_secs: Option<u64>) -> FetchOptions {
        let timeout = timeout_secs.map_or(self.settings.fetch_timeout, Duration::from_secs);
        FetchOptions::new(timeout, self.cancel.clone())
    }

    /// Resolver for the configured architecture.
    #[must_use]
    pub fn catalog(&self) -> VersionCatalog {
        VersionCatalog::new(self.settings.platform.arch)
    }

    /// Installer fetching builds for the host OS from the configured server.
    #[must_use]
    pub fn installer(&self) -> Installer<'_, FsStateStore, HttpFetcher, ArchiveExtractor> {
        Installer::new(
            &self.settings.paths,
            &self.store,
            &self.fetcher,
            &self.extractor,
            &self.settings.dist_server,
            self.settings.platform.os,
        )
    }

    /// Manager for the active configuration.
    #[must_use]
    pub fn activation(&self) -> ActivationManager<'_, FsStateStore> {
        ActivationManager::new(&self.settings.paths, &self.store)
    }

    /// Returns the cached manifest, fetching it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if no manifest is cached and fetching one fails.
    pub async fn manifest(&self, options: &FetchOptions) -> Result<ReleaseManifest> {
        manifest::load_or_refresh(
            &self.store,
            &self.fetcher,
            &self.settings.paths,
            &self.settings.dist_server,
            options,
        )
        .await
    }

    /// Downloads and caches a fresh manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch fails or the document is invalid.
    pub async fn refresh_manifest(&self, options: &FetchOptions) -> Result<ReleaseManifest> {
        manifest::refresh(
            &self.store,
            &self.fetcher,
            &self.settings.paths,
            &self.settings.dist_server,
            options,
        )
        .await
    }

    /// Maps user input to the key of an installed identity.
    ///
    /// Input that already names an installed key is used as is, so removing
    /// or activating an install never depends on the current manifest.
    /// Anything else is resolved through the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::SdkmError::UnknownSpecifier`] if the input cannot be
    /// resolved, or a manifest error if none can be loaded.
    pub async fn installed_key(&self, specifier: &Specifier) -> Result<String> {
        let raw = specifier.raw();
        if is_identity_key(raw)
            && (self.store.load_installed()?.contains_key(raw)
                || self.settings.paths.toolchain_dir(raw).is_dir())
        {
            return Ok(raw.to_string());
        }

        let manifest = self.manifest(&self.fetch_options(None)).await?;
        let resolution = self.catalog().resolve(specifier, &manifest)?;
        Ok(resolution.identity.key().to_string())
    }
}
