//! Toolchain management for the sdkm CLI.
//!
//! This module resolves version specifiers, fetches and installs SDK
//! artifacts, and switches the active SDK.
//!
//! ## Module Structure
//!
//! - [`platform`] - OS and architecture detection
//! - [`paths`] - State directory layout
//! - [`catalog`] - Specifier parsing and resolution
//! - [`manifest`] - Release manifest model and refresh
//! - [`policy`] - Legacy backend gate
//! - [`store`] - Persisted installed set and active configuration
//! - [`cancel`] - Cancellation token for fetches
//! - [`fetcher`] - HTTP and local-mirror downloads
//! - [`archive`] - tar.gz, tar and ZIP extraction
//! - [`installer`] - Install, uninstall and prefetch
//! - [`activation`] - Activation and cache clearing

pub mod activation;
pub mod archive;
pub mod cancel;
pub mod catalog;
pub mod fetcher;
pub mod installer;
pub mod manifest;
pub mod paths;
pub mod platform;
pub mod policy;
pub mod store;

#[cfg(test)]
pub mod testing;

pub use activation::ActivationManager;
pub use archive::ArchiveExtractor;
pub use cancel::CancelToken;
pub use catalog::{Specifier, VersionCatalog};
pub use fetcher::{FetchOptions, HttpFetcher};
pub use installer::{InstallOutcome, Installer};
pub use policy::BackendPolicy;
pub use store::{FsStateStore, StateStore};
