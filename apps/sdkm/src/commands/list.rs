//! List command for the sdkm CLI.
//!
//! Shows every SDK and tool the release manifest offers, marked with its
//! install state, plus installs the manifest no longer lists.
//!
//! ## Usage
//!
//! ```bash
//! sdkm list
//! sdkm list --json
//! ```
//!
//! ## Output Format
//!
//! ```text
//! Aliases:
//!   latest -> sdk-1.40.1-upstream-64bit
//!
//! SDKs:
//!     sdk-tot-upstream-64bit        INSTALLED: 9a2e4ab9
//!   * sdk-1.40.1-upstream-64bit     INSTALLED
//!     sdk-1.38.33-fastcomp-64bit
//!
//! Tools:
//!     node-12.18.1-64bit
//! ```

use anyhow::{Context, Result};
use clap::Args;
use semver::Version;
use serde::Serialize;

use super::Session;
use crate::toolchain::catalog::{ArtifactIdentity, Backend, backend_for_version};
use crate::toolchain::manifest::ReleaseManifest;
use crate::toolchain::paths::relative_time;
use crate::toolchain::platform::Arch;
use crate::toolchain::store::{InstalledEntry, InstalledSet};
use crate::toolchain::{CancelToken, StateStore, VersionCatalog};

/// Number of hash characters shown for a differing install.
const SHORT_HASH_LEN: usize = 8;

/// Arguments for the list command.
#[derive(Args)]
pub struct ListArgs {
    /// Print the listing as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Install state of a listed identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "installed", rename_all = "snake_case")]
pub enum InstallState {
    /// Not installed.
    Absent,
    /// Installed from the release the manifest currently names.
    Installed,
    /// Installed, but from a different build than the manifest names. Holds
    /// the installed build's short hash.
    InstalledOther(String),
}

/// One row of the listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    /// Identity key.
    pub name: String,
    /// Installed state.
    pub state: InstallState,
    /// Whether this is the active identity.
    pub active: bool,
    /// Install time, if installed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<String>,
}

/// Everything `sdkm list` shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listing {
    /// Alias name to identity key.
    pub aliases: Vec<(String, String)>,
    /// SDKs, tip-of-tree first, then releases newest first.
    pub sdks: Vec<ListEntry>,
    /// Pinned tools.
    pub tools: Vec<ListEntry>,
    /// Installed identities the manifest does not list.
    pub unlisted: Vec<ListEntry>,
}

/// Builds the listing from the manifest and the installed set.
///
/// Aliases are shown with their target only, so an install is marked once,
/// under its own key.
#[must_use]
pub fn list_entries(
    manifest: &ReleaseManifest,
    installed: &InstalledSet,
    active: Option<&str>,
    arch: Arch,
) -> Listing {
    let catalog = VersionCatalog::new(arch);
    let entry_for = |identity: &ArtifactIdentity| {
        let record = installed.get(identity.key());
        ListEntry {
            name: identity.key().to_string(),
            state: state_of(record, identity),
            active: active == Some(identity.key()),
            installed_at: record.map(|r| r.installed_at.clone()),
        }
    };

    let mut alias_names = vec!["latest".to_string()];
    if manifest.tot.is_some() {
        alias_names.push("tot".to_string());
    }
    alias_names.extend(manifest.aliases.keys().cloned());
    let aliases = alias_names
        .into_iter()
        .filter_map(|name| {
            let resolution = catalog.resolve_str(&name, manifest).ok()?;
            Some((name, resolution.identity.key().to_string()))
        })
        .collect();

    let mut sdks = Vec::new();
    if let Some(tot) = &manifest.tot {
        let identity = ArtifactIdentity::tip_of_tree(Backend::Upstream, arch, tot.clone());
        sdks.push(entry_for(&identity));
    }
    for (version, hash) in manifest.sorted_releases() {
        let Ok(version) = Version::parse(version) else {
            continue;
        };
        let backend = backend_for_version(&version);
        sdks.push(entry_for(&ArtifactIdentity::release(
            version, backend, arch, hash,
        )));
    }

    let tools: Vec<ListEntry> = manifest
        .tools
        .iter()
        .map(|(name, hash)| entry_for(&ArtifactIdentity::tool(name.clone(), arch, hash.clone())))
        .collect();

    let unlisted = installed
        .values()
        .filter(|record| {
            !sdks.iter().chain(tools.iter()).any(|e| e.name == record.name)
        })
        .map(|record| ListEntry {
            name: record.name.clone(),
            state: InstallState::Installed,
            active: active == Some(record.name.as_str()),
            installed_at: Some(record.installed_at.clone()),
        })
        .collect();

    Listing {
        aliases,
        sdks,
        tools,
        unlisted,
    }
}

fn state_of(record: Option<&InstalledEntry>, identity: &ArtifactIdentity) -> InstallState {
    match record {
        None => InstallState::Absent,
        Some(record) if identity.release_hash.is_none() || record.matches_release(identity) => {
            InstallState::Installed
        }
        Some(record) => InstallState::InstalledOther(record.release_hash.as_deref().map_or_else(
            || "unknown build".to_string(),
            |hash| hash.chars().take(SHORT_HASH_LEN).collect(),
        )),
    }
}

/// Executes the list command.
///
/// # Errors
///
/// Returns an error if no manifest is cached and fetching one fails, or the
/// installed set cannot be read.
pub async fn execute(args: &ListArgs, cancel: &CancelToken) -> Result<()> {
    let session = Session::open(cancel)?;
    let manifest = session.manifest(&session.fetch_options(None)).await?;
    let installed = session.store.load_installed()?;
    let active = session.store.read_active()?.map(|config| config.identity);

    let listing = list_entries(
        &manifest,
        &installed,
        active.as_deref(),
        session.settings.platform.arch,
    );

    if args.json {
        let json =
            serde_json::to_string_pretty(&listing).context("Failed to serialize listing")?;
        println!("{json}");
        return Ok(());
    }

    print_listing(&listing);
    if active.is_none() {
        println!();
        println!("No active SDK. Run 'sdkm activate <version>' to set one.");
    }
    Ok(())
}

fn print_listing(listing: &Listing) {
    println!("Aliases:");
    for (alias, target) in &listing.aliases {
        println!("  {alias} -> {target}");
    }

    print_section("SDKs", &listing.sdks);
    print_section("Tools", &listing.tools);
    if !listing.unlisted.is_empty() {
        print_section("Installed, not in manifest", &listing.unlisted);
    }
}

fn print_section(title: &str, entries: &[ListEntry]) {
    println!();
    println!("{title}:");
    if entries.is_empty() {
        println!("    (none)");
        return;
    }

    let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
    for entry in entries {
        let marker = if entry.active { "*" } else { " " };
        let state = match &entry.state {
            InstallState::Absent => String::new(),
            InstallState::Installed => "INSTALLED".to_string(),
            InstallState::InstalledOther(other) => format!("INSTALLED: {other}"),
        };
        let when = entry
            .installed_at
            .as_deref()
            .map(|at| format!("  ({})", relative_time(at)))
            .unwrap_or_default();
        let line = format!("  {marker} {:<width$}  {state}{when}", entry.name);
        println!("{}", line.trim_end());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(tot: &str) -> ReleaseManifest {
        ReleaseManifest::parse(&format!(
            r#"{{
                "latest": "1.40.1",
                "aliases": {{ "stable": "1.39.20" }},
                "releases": {{ "1.40.1": "aaa", "1.39.20": "bbb", "1.38.33": "ccc" }},
                "tot": "{tot}",
                "tools": {{ "node-12.18.1-64bit": null }}
            }}"#
        ))
        .unwrap()
    }

    fn record(identity: &ArtifactIdentity) -> (String, InstalledEntry) {
        (
            identity.key().to_string(),
            InstalledEntry::new(identity, "2026-01-01T00:00:00Z"),
        )
    }

    fn installed_names(entries: &[ListEntry]) -> Vec<&str> {
        entries
            .iter()
            .filter(|e| e.state != InstallState::Absent)
            .map(|e| e.name.as_str())
            .collect()
    }

    #[test]
    fn single_pinned_install_is_the_only_installed_entry() {
        let identity =
            ArtifactIdentity::release(Version::new(1, 38, 33), Backend::Fastcomp, Arch::Bits64, "ccc");
        let installed: InstalledSet = [record(&identity)].into_iter().collect();

        let listing = list_entries(&manifest("ddd"), &installed, None, Arch::Bits64);

        let mut all = installed_names(&listing.sdks);
        all.extend(installed_names(&listing.tools));
        assert_eq!(all, vec!["sdk-1.38.33-fastcomp-64bit"]);
        assert!(listing.unlisted.is_empty());
    }

    #[test]
    fn sdks_list_tip_of_tree_then_newest_release_first() {
        let listing = list_entries(&manifest("ddd"), &InstalledSet::new(), None, Arch::Bits64);

        let names: Vec<&str> = listing.sdks.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "sdk-tot-upstream-64bit",
                "sdk-1.40.1-upstream-64bit",
                "sdk-1.39.20-upstream-64bit",
                "sdk-1.38.33-fastcomp-64bit",
            ]
        );
        assert_eq!(listing.tools[0].name, "node-12.18.1-64bit");
    }

    #[test]
    fn aliases_point_at_identity_keys() {
        let listing = list_entries(&manifest("ddd"), &InstalledSet::new(), None, Arch::Bits64);

        assert_eq!(
            listing.aliases,
            vec![
                ("latest".to_string(), "sdk-1.40.1-upstream-64bit".to_string()),
                ("tot".to_string(), "sdk-tot-upstream-64bit".to_string()),
                ("stable".to_string(), "sdk-1.39.20-upstream-64bit".to_string()),
            ]
        );
    }

    #[test]
    fn older_tip_of_tree_is_installed_other() {
        let old = ArtifactIdentity::tip_of_tree(Backend::Upstream, Arch::Bits64, "0123456789abcdef");
        let installed: InstalledSet = [record(&old)].into_iter().collect();

        let listing = list_entries(&manifest("fedcba"), &installed, None, Arch::Bits64);

        assert_eq!(
            listing.sdks[0].state,
            InstallState::InstalledOther("01234567".to_string())
        );
    }

    #[test]
    fn active_entry_is_marked_and_unlisted_installs_are_kept() {
        let gone =
            ArtifactIdentity::release(Version::new(1, 37, 0), Backend::Fastcomp, Arch::Bits64, "zzz");
        let installed: InstalledSet = [record(&gone)].into_iter().collect();

        let listing = list_entries(
            &manifest("ddd"),
            &installed,
            Some("sdk-1.37.0-fastcomp-64bit"),
            Arch::Bits64,
        );

        assert_eq!(listing.unlisted.len(), 1);
        assert!(listing.unlisted[0].active);
        assert!(listing.sdks.iter().all(|e| !e.active));
    }

    #[test]
    fn listing_serializes_state_tags() {
        let listing = list_entries(&manifest("ddd"), &InstalledSet::new(), None, Arch::Bits64);

        let json = serde_json::to_value(&listing).unwrap();

        assert_eq!(json["sdks"][0]["state"]["state"], "absent");
        assert_eq!(json["aliases"][0][0], "latest");
    }
}
