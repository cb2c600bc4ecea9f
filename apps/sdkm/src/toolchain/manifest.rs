//! Release manifest handling for sdkm.
//!
//! The manifest is a single JSON document published at
//! `<dist>/releases-tags.json`. It is cached as `releases-tags.json` under the
//! state directory and only ever replaced wholesale by `sdkm update-tags`.
//!
//! ## Manifest Format
//!
//! ```json
//! {
//!   "latest": "1.40.1",
//!   "aliases": { "latest-upstream": "1.40.1" },
//!   "releases": {
//!     "1.40.1": "536568644fd67d53778f6111fdd5f64ad3f4c539",
//!     "1.38.33": "c58ec3cd40b1306a1bc7f8f7dba2d5ba1ae5ac5b"
//!   },
//!   "tot": "9a2e4ab95f8e7a1b2c3d4e5f60718293a4b5c6d7",
//!   "tools": { "node-12.18.1-64bit": null }
//! }
//! ```
//!
//! `latest` and every alias must name a release listed in `releases`; a
//! document that violates this is rejected and never cached.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::fetcher::{FetchOptions, Fetcher};
use super::paths::{ToolchainPaths, is_identity_key};
use super::store::StateStore;
use crate::errors::SdkmError;

/// Path to the manifest on the distribution server.
const MANIFEST_PATH: &str = "releases-tags.json";

/// The release-tag manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseManifest {
    /// Version the `latest` alias points at.
    pub latest: String,
    /// Extra aliases, each naming a release version.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    /// Release version to release hash.
    pub releases: BTreeMap<String, String>,
    /// Hash of the current tip-of-tree build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tot: Option<String>,
    /// Pinned tools; `null` marks a tool without a release hash.
    #[serde(default)]
    pub tools: BTreeMap<String, Option<String>>,
}

impl ReleaseManifest {
    /// Parses and validates a manifest document.
    ///
    /// # Errors
    ///
    /// Returns [`SdkmError::Manifest`] if the JSON is malformed or the
    /// document fails validation.
    pub fn parse(text: &str) -> Result<Self, SdkmError> {
        let manifest: Self = serde_json::from_str(text)
            .map_err(|e| SdkmError::manifest(format!("invalid manifest JSON: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Checks that `latest` and every alias name a listed release and that
    /// tool names are usable as directory names.
    ///
    /// # Errors
    ///
    /// Returns [`SdkmError::Manifest`] naming the first dangling reference.
    pub fn validate(&self) -> Result<(), SdkmError> {
        if !self.releases.contains_key(&self.latest) {
            return Err(SdkmError::manifest(format!(
                "'latest' points at {} which is not a listed release",
                self.latest
            )));
        }
        for (alias, target) in &self.aliases {
            if !self.releases.contains_key(target) {
                return Err(SdkmError::manifest(format!(
                    "alias '{alias}' points at {target} which is not a listed release"
                )));
            }
        }
        if let Some(tool) = self.tools.keys().find(|name| !is_identity_key(name)) {
            return Err(SdkmError::manifest(format!("invalid tool name '{tool}'")));
        }
        Ok(())
    }

    /// Returns the release hash of a version.
    #[must_use]
    pub fn release_hash(&self, version: &str) -> Option<&str> {
        self.releases.get(version).map(String::as_str)
    }

    /// Reverse-maps a release hash to its version.
    #[must_use]
    pub fn version_for_hash(&self, hash: &str) -> Option<&str> {
        self.releases
            .iter()
            .find(|(_, h)| h.as_str() == hash)
            .map(|(v, _)| v.as_str())
    }

    /// Returns `(version, hash)` pairs sorted by semver (newest first).
    ///
    /// Versions that cannot be parsed as semver are sorted lexicographically
    /// (descending) and placed after valid semver versions.
    #[must_use = "returns sorted version list without side effects"]
    pub fn sorted_releases(&self) -> Vec<(&str, &str)> {
        let mut releases: Vec<(&str, &str)> = self
            .releases
            .iter()
            .map(|(v, h)| (v.as_str(), h.as_str()))
            .collect();
        releases.sort_by(|(a, _), (b, _)| {
            let a_ver = semver::Version::parse(a).ok();
            let b_ver = semver::Version::parse(b).ok();
            match (a_ver, b_ver) {
                (Some(a), Some(b)) => b.cmp(&a),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => b.cmp(a),
            }
        });
        releases
    }
}

/// Returns the manifest URL on a distribution server.
#[must_use]
pub fn manifest_url(dist_server: &str) -> String {
    let server = dist_server.trim().trim_end_matches('/');
    format!("{server}/{MANIFEST_PATH}")
}

/// Downloads, validates and caches a fresh manifest.
///
/// The cached manifest is replaced only after the new document parses and
/// validates, so any failure leaves the previous one authoritative.
///
/// # Errors
///
/// Returns [`SdkmError::Download`] if the document cannot be fetched and
/// [`SdkmError::Manifest`] if it is invalid.
pub async fn refresh<S: StateStore, F: Fetcher>(
    store: &S,
    fetcher: &F,
    paths: &ToolchainPaths,
    dist_server: &str,
    options: &FetchOptions,
) -> Result<ReleaseManifest> {
    let url = manifest_url(dist_server);
    let dest = paths.download_path(&url);
    info!(%url, "refreshing release manifest");

    let fetched = fetcher.fetch(&url, &dest, options).await?;
    let text = std::fs::read_to_string(&fetched)
        .with_context(|| format!("Failed to read manifest from {}", fetched.display()));
    std::fs::remove_file(&fetched).ok();

    let manifest = ReleaseManifest::parse(&text?)
        .with_context(|| format!("Rejected manifest from {url}"))?;
    store.replace_manifest(&manifest)?;
    debug!(releases = manifest.releases.len(), "manifest cached");
    Ok(manifest)
}

/// Returns the cached manifest, fetching it first when none is cached.
///
/// # Errors
///
/// Returns an error if the cache cannot be read or the initial fetch fails.
pub async fn load_or_refresh<S: StateStore, F: Fetcher>(
    store: &S,
    fetcher: &F,
    paths: &ToolchainPaths,
    dist_server: &str,
    options: &FetchOptions,
) -> Result<ReleaseManifest> {
    if let Some(manifest) = store.read_manifest()? {
        return Ok(manifest);
    }
    println!("No cached release manifest, fetching from {dist_server}...");
    refresh(store, fetcher, paths, dist_server, options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::cancel::CancelToken;
    use crate::toolchain::store::MemoryStateStore;
    use crate::toolchain::testing::CountingFetcher;
    use std::time::Duration;

    const DIST: &str = "https://dist.example";

    fn temp_paths(name: &str) -> ToolchainPaths {
        let dir =
            std::env::temp_dir().join(format!("sdkm_test_{}_{}", name, rand::random::<u64>()));
        ToolchainPaths::with_root(dir)
    }

    fn options() -> FetchOptions {
        FetchOptions::new(Duration::from_secs(5), CancelToken::new())
    }

    /// A store that already caches the sample manifest.
    fn cached_store() -> (MemoryStateStore, ReleaseManifest) {
        let store = MemoryStateStore::new();
        let cached = ReleaseManifest::parse(sample_manifest_json()).unwrap();
        store.replace_manifest(&cached).unwrap();
        (store, cached)
    }

    fn sample_manifest_json() -> &'static str {
        r#"{
            "latest": "1.40.1",
            "aliases": { "latest-upstream": "1.40.1" },
            "releases": {
                "1.40.1": "aaa",
                "1.38.33": "bbb",
                "1.9.0": "ccc"
            },
            "tot": "ddd",
            "tools": { "node-12.18.1-64bit": null, "python-3.9.2-64bit": "eee" }
        }"#
    }

    #[test]
    fn parse_manifest_json() {
        let manifest = ReleaseManifest::parse(sample_manifest_json()).expect("Should parse");

        assert_eq!(manifest.latest, "1.40.1");
        assert_eq!(manifest.releases.len(), 3);
        assert_eq!(manifest.tot.as_deref(), Some("ddd"));
        assert_eq!(manifest.tools.get("node-12.18.1-64bit"), Some(&None));
        assert_eq!(
            manifest.tools.get("python-3.9.2-64bit"),
            Some(&Some("eee".to_string()))
        );
    }

    #[test]
    fn optional_sections_default_to_empty() {
        let manifest =
            ReleaseManifest::parse(r#"{ "latest": "1.0.0", "releases": { "1.0.0": "x" } }"#)
                .expect("Should parse");
        assert!(manifest.aliases.is_empty());
        assert!(manifest.tools.is_empty());
        assert!(manifest.tot.is_none());
    }

    #[test]
    fn dangling_latest_is_rejected() {
        let err = ReleaseManifest::parse(r#"{ "latest": "2.0.0", "releases": { "1.0.0": "x" } }"#)
            .unwrap_err();
        assert!(matches!(err, SdkmError::Manifest { .. }));
        assert!(err.to_string().contains("2.0.0"));
    }

    #[test]
    fn dangling_alias_is_rejected() {
        let err = ReleaseManifest::parse(
            r#"{ "latest": "1.0.0", "aliases": { "stable": "0.9.0" }, "releases": { "1.0.0": "x" } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("stable"));
    }

    #[test]
    fn tool_name_with_path_separator_is_rejected() {
        let err = ReleaseManifest::parse(
            r#"{ "latest": "1.0.0", "releases": { "1.0.0": "x" }, "tools": { "../evil": null } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("../evil"));
    }

    #[test]
    fn malformed_json_is_a_manifest_error() {
        let err = ReleaseManifest::parse("{ not json").unwrap_err();
        assert!(matches!(err, SdkmError::Manifest { .. }));
    }

    #[test]
    fn release_hash_and_reverse_lookup() {
        let manifest = ReleaseManifest::parse(sample_manifest_json()).unwrap();
        assert_eq!(manifest.release_hash("1.38.33"), Some("bbb"));
        assert_eq!(manifest.release_hash("9.9.9"), None);
        assert_eq!(manifest.version_for_hash("bbb"), Some("1.38.33"));
        assert_eq!(manifest.version_for_hash("ddd"), None);
    }

    #[test]
    fn sorted_releases_newest_first() {
        let manifest = ReleaseManifest::parse(sample_manifest_json()).unwrap();
        let versions: Vec<&str> = manifest.sorted_releases().iter().map(|(v, _)| *v).collect();
        assert_eq!(versions, vec!["1.40.1", "1.38.33", "1.9.0"]);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_cached_manifest() {
        let paths = temp_paths("manifest_fetch_fail");
        let (store, cached) = cached_store();
        let fetcher = CountingFetcher::failing();

        let err = refresh(&store, &fetcher, &paths, DIST, &options())
            .await
            .unwrap_err();

        assert!(matches!(
            crate::errors::find_sdkm_error(&err),
            Some(SdkmError::Download { .. })
        ));
        assert_eq!(store.read_manifest().unwrap(), Some(cached));

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[tokio::test]
    async fn invalid_document_keeps_cached_manifest() {
        let paths = temp_paths("manifest_invalid");
        let (store, cached) = cached_store();
        let fetcher = CountingFetcher::serving(r#"{ "latest": "9.9.9", "releases": {} }"#);

        let err = refresh(&store, &fetcher, &paths, DIST, &options())
            .await
            .unwrap_err();

        assert!(matches!(
            crate::errors::find_sdkm_error(&err),
            Some(SdkmError::Manifest { .. })
        ));
        assert_eq!(store.read_manifest().unwrap(), Some(cached));
        assert!(!paths.download_path(&manifest_url(DIST)).exists());

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[tokio::test]
    async fn valid_refresh_replaces_cached_manifest() {
        let paths = temp_paths("manifest_refresh");
        let (store, _) = cached_store();
        let fetcher =
            CountingFetcher::serving(r#"{ "latest": "2.0.0", "releases": { "2.0.0": "fff" } }"#);

        let fresh = refresh(&store, &fetcher, &paths, DIST, &options())
            .await
            .unwrap();

        assert_eq!(fresh.latest, "2.0.0");
        assert_eq!(store.read_manifest().unwrap(), Some(fresh));
        assert_eq!(fetcher.urls(), vec!["https://dist.example/releases-tags.json"]);

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[tokio::test]
    async fn load_or_refresh_prefers_cache() {
        let paths = temp_paths("manifest_cached");
        let (store, cached) = cached_store();
        let fetcher = CountingFetcher::failing();

        let manifest = load_or_refresh(&store, &fetcher, &paths, DIST, &options())
            .await
            .unwrap();

        assert_eq!(manifest, cached);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn load_or_refresh_fetches_when_nothing_is_cached() {
        let paths = temp_paths("manifest_first_use");
        let store = MemoryStateStore::new();
        let fetcher = CountingFetcher::serving(sample_manifest_json());

        let manifest = load_or_refresh(&store, &fetcher, &paths, DIST, &options())
            .await
            .unwrap();

        assert_eq!(manifest.latest, "1.40.1");
        assert_eq!(fetcher.calls(), 1);
        assert!(store.read_manifest().unwrap().is_some());

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[test]
    fn manifest_url_trims_trailing_slash() {
        assert_eq!(
            manifest_url("https://dist.example/"),
            "https://dist.example/releases-tags.json"
        );
        assert_eq!(manifest_url("/srv/mirror"), "/srv/mirror/releases-tags.json");
    }
}
