//! Version specifiers and their resolution to artifact identities.
//!
//! A specifier is whatever the user typed after `install`, `activate` or
//! `uninstall`. Parsing is purely syntactic and never fails: anything that no
//! rule recognises becomes [`SpecifierForm::Named`] and is looked up in the
//! manifest. Resolution then turns the parsed form into an
//! [`ArtifactIdentity`] using a [`ReleaseManifest`].
//!
//! ## Accepted Forms
//!
//! ```text
//! latest, latest-upstream, latest-fastcomp         rolling aliases
//! tot, tot-upstream, tot-fastcomp                  tip-of-tree aliases
//! 1.38.33                                          bare version
//! 1.38.33-fastcomp, 2.0.0-upstream                 version with backend
//! sdk-1.38.33-upstream-64bit                       full name
//! sdk-tag-1.38.33-64bit, sdk-1.38.33-64bit         full name, backend from cutover
//! sdk-fastcomp-1.38.31-64bit                       legacy full name
//! sdk-tot-upstream-64bit                           tip-of-tree identity key
//! sdk-releases-upstream-<hash>-64bit               hash-pinned full name
//! node-12.18.1-64bit                               tool listed in the manifest
//! ```

use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::manifest::ReleaseManifest;
use super::platform::{Arch, Os};
use crate::errors::SdkmError;

/// Code-generation flavor of an SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Current LLVM backend.
    Upstream,
    /// Legacy backend, frozen at its final release.
    Fastcomp,
}

impl Backend {
    /// Returns the name used in identity keys and artifact URLs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::Fastcomp => "fastcomp",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "upstream" => Some(Self::Upstream),
            "fastcomp" => Some(Self::Fastcomp),
            _ => None,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend used for versions at or above each boundary, in ascending order.
///
/// Releases before 1.39.0 were published with the legacy backend only.
pub static BACKEND_CUTOVER: [(Version, Backend); 2] = [
    (Version::new(0, 0, 0), Backend::Fastcomp),
    (Version::new(1, 39, 0), Backend::Upstream),
];

/// Returns the backend a bare version maps to according to [`BACKEND_CUTOVER`].
#[must_use]
pub fn backend_for_version(version: &Version) -> Backend {
    BACKEND_CUTOVER
        .iter()
        .rev()
        .find(|(start, _)| version >= start)
        .map_or(Backend::Fastcomp, |(_, backend)| *backend)
}

/// Syntactic shape of a specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecifierForm {
    /// `latest`, `latest-upstream` or `latest-fastcomp`.
    Latest {
        /// Backend named by the alias, if any.
        backend: Option<Backend>,
    },
    /// `tot[-<backend>]` or the `sdk-tot-<backend>-<arch>` key.
    TipOfTree {
        /// Backend named by the alias, if any.
        backend: Option<Backend>,
        /// Architecture given in the full key form.
        arch: Option<Arch>,
    },
    /// A bare `X.Y.Z` version.
    Version(Version),
    /// `sdk-[tag-|<backend>-]<version>[-<backend>][-<arch>]` or
    /// `<version>-<backend>`.
    FullName {
        /// Release version.
        version: Version,
        /// Explicit backend, if present.
        backend: Option<Backend>,
        /// Explicit architecture, if present.
        arch: Option<Arch>,
    },
    /// `sdk-releases-<backend>-<hash>-<arch>`.
    ReleaseHash {
        /// Backend of the build.
        backend: Backend,
        /// Release hash to reverse-map through the manifest.
        hash: String,
        /// Architecture variant.
        arch: Arch,
    },
    /// Anything else: a manifest alias or a tool name.
    Named(String),
}

/// A parsed version specifier together with the raw input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specifier {
    raw: String,
    form: SpecifierForm,
}

impl Specifier {
    /// Parses user input. Rules are tried in priority order; unmatched input
    /// becomes [`SpecifierForm::Named`].
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let raw = input.trim().to_string();
        let form = parse_form(&raw);
        Self { raw, form }
    }

    /// The trimmed user input.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The recognised shape.
    #[must_use]
    pub fn form(&self) -> &SpecifierForm {
        &self.form
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_form(raw: &str) -> SpecifierForm {
    if let Some(form) = parse_alias(raw) {
        return form;
    }
    if let Some((version, backend)) = raw.rsplit_once('-')
        && let Some(backend) = Backend::from_token(backend)
        && let Some(version) = release_version(version)
    {
        return SpecifierForm::FullName {
            version,
            backend: Some(backend),
            arch: None,
        };
    }
    if let Some(version) = release_version(raw) {
        return SpecifierForm::Version(version);
    }
    if let Some(rest) = raw.strip_prefix("sdk-releases-")
        && let Some(form) = parse_release_hash(rest)
    {
        return form;
    }
    if let Some(rest) = raw.strip_prefix("sdk-")
        && let Some(form) = parse_full_name(rest)
    {
        return form;
    }
    SpecifierForm::Named(raw.to_string())
}

/// Parses `X.Y.Z` without pre-release or build metadata.
fn release_version(text: &str) -> Option<Version> {
    Version::parse(text)
        .ok()
        .filter(|v| v.pre.is_empty() && v.build.is_empty())
}

fn parse_alias(raw: &str) -> Option<SpecifierForm> {
    let (head, backend) = match raw.split_once('-') {
        Some((head, tail)) => (head, Some(Backend::from_token(tail)?)),
        None => (raw, None),
    };
    match head {
        "latest" => Some(SpecifierForm::Latest { backend }),
        "tot" => Some(SpecifierForm::TipOfTree {
            backend,
            arch: None,
        }),
        _ => None,
    }
}

fn parse_release_hash(rest: &str) -> Option<SpecifierForm> {
    let (backend, rest) = rest.split_once('-')?;
    let (hash, arch) = rest.rsplit_once('-')?;
    if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(SpecifierForm::ReleaseHash {
        backend: Backend::from_token(backend)?,
        hash: hash.to_string(),
        arch: Arch::from_suffix(arch)?,
    })
}

fn parse_full_name(rest: &str) -> Option<SpecifierForm> {
    let mut tokens: Vec<&str> = rest.split('-').collect();

    let arch = match tokens.last().and_then(|t| Arch::from_suffix(t)) {
        Some(arch) => {
            tokens.pop();
            Some(arch)
        }
        None => None,
    };

    match tokens.as_slice() {
        ["tot", backend] => Some(SpecifierForm::TipOfTree {
            backend: Some(Backend::from_token(backend)?),
            arch,
        }),
        ["tag", version] => Some(SpecifierForm::FullName {
            version: release_version(version)?,
            backend: None,
            arch,
        }),
        [version] => Some(SpecifierForm::FullName {
            version: release_version(version)?,
            backend: None,
            arch,
        }),
        [first, second] => {
            if let Some(backend) = Backend::from_token(first) {
                Some(SpecifierForm::FullName {
                    version: release_version(second)?,
                    backend: Some(backend),
                    arch,
                })
            } else {
                Some(SpecifierForm::FullName {
                    version: release_version(first)?,
                    backend: Some(Backend::from_token(second)?),
                    arch,
                })
            }
        }
        _ => None,
    }
}

/// How a specifier was matched, which decides caching behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecifierKind {
    /// Target may change whenever the manifest is refreshed.
    RollingAlias,
    /// Bare version mapped through the cutover table.
    BareVersion,
    /// Full or hash-pinned name.
    FullName,
    /// Pinned tool listed in the manifest.
    Tool,
}

/// A concrete installable payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactIdentity {
    name: String,
    /// SDK backend; `None` for tools.
    pub backend: Option<Backend>,
    /// Architecture variant.
    pub arch: Arch,
    /// Release version; `None` for tip-of-tree builds and tools.
    pub version: Option<Version>,
    /// Release hash; `None` only for un-pinned tools.
    pub release_hash: Option<String>,
}

impl ArtifactIdentity {
    /// A published SDK release.
    #[must_use]
    pub fn release(version: Version, backend: Backend, arch: Arch, hash: impl Into<String>) -> Self {
        Self {
            name: format!("sdk-{version}-{backend}-{arch}"),
            backend: Some(backend),
            arch,
            version: Some(version),
            release_hash: Some(hash.into()),
        }
    }

    /// A tip-of-tree SDK build.
    #[must_use]
    pub fn tip_of_tree(backend: Backend, arch: Arch, hash: impl Into<String>) -> Self {
        Self {
            name: format!("sdk-tot-{backend}-{arch}"),
            backend: Some(backend),
            arch,
            version: None,
            release_hash: Some(hash.into()),
        }
    }

    /// A standalone tool. The architecture comes from the name's suffix when
    /// it carries one.
    #[must_use]
    pub fn tool(name: impl Into<String>, default_arch: Arch, hash: Option<String>) -> Self {
        let name = name.into();
        let arch = name
            .rsplit('-')
            .next()
            .and_then(Arch::from_suffix)
            .unwrap_or(default_arch);
        Self {
            name,
            backend: None,
            arch,
            version: None,
            release_hash: hash,
        }
    }

    /// Stable on-disk directory name.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.name
    }

    /// Whether this identity is an SDK rather than a tool.
    #[must_use]
    pub fn is_sdk(&self) -> bool {
        self.backend.is_some()
    }

    /// Tool name without version or arch (`node-12.18.1-64bit` is `node`).
    #[must_use]
    pub fn tool_base(&self) -> &str {
        self.name.split('-').next().unwrap_or(&self.name)
    }

    /// Paths relative to the install directory of which at least one must
    /// exist after extraction.
    #[must_use]
    pub fn mandatory_outputs(&self) -> Vec<PathBuf> {
        if self.is_sdk() {
            vec![
                PathBuf::from("emscripten").join("emcc"),
                PathBuf::from("bin").join("clang"),
            ]
        } else {
            let base = self.tool_base();
            vec![PathBuf::from("bin").join(base), PathBuf::from(base)]
        }
    }

    /// Download URL of this artifact on a distribution server.
    #[must_use]
    pub fn artifact_url(&self, dist_server: &str, os: Os) -> String {
        let server = dist_server.trim().trim_end_matches('/');
        match (self.backend, self.release_hash.as_deref()) {
            (Some(backend), Some(hash)) => format!(
                "{server}/builds/{os}/{hash}/{backend}-{arch}.tar.gz",
                arch = self.arch
            ),
            _ => format!("{server}/tools/{os}/{}.tar.gz", self.name),
        }
    }
}

impl fmt::Display for ArtifactIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Result of resolving a specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The concrete artifact.
    pub identity: ArtifactIdentity,
    /// Which rule matched.
    pub kind: SpecifierKind,
}

/// Resolves specifiers against a manifest for a fixed architecture.
#[derive(Debug, Clone, Copy)]
pub struct VersionCatalog {
    arch: Arch,
}

impl VersionCatalog {
    /// Creates a catalog resolving SDK names for `arch` when none is given.
    #[must_use]
    pub const fn new(arch: Arch) -> Self {
        Self { arch }
    }

    /// Parses and resolves raw input in one step.
    ///
    /// # Errors
    ///
    /// Returns [`SdkmError::UnknownSpecifier`] if no rule matches.
    pub fn resolve_str(
        &self,
        input: &str,
        manifest: &ReleaseManifest,
    ) -> Result<Resolution, SdkmError> {
        self.resolve(&Specifier::parse(input), manifest)
    }

    /// Resolves a parsed specifier. Pure: the same specifier and manifest
    /// always give the same result.
    ///
    /// # Errors
    ///
    /// Returns [`SdkmError::UnknownSpecifier`] if the specifier names a
    /// release, hash, alias or tool the manifest does not contain.
    pub fn resolve(
        &self,
        specifier: &Specifier,
        manifest: &ReleaseManifest,
    ) -> Result<Resolution, SdkmError> {
        let unknown = || SdkmError::unknown_specifier(specifier.raw());

        let (identity, kind) = match specifier.form() {
            SpecifierForm::Latest { backend } => {
                let version = match backend {
                    Some(b) => manifest
                        .aliases
                        .get(&format!("latest-{b}"))
                        .map_or(manifest.latest.as_str(), String::as_str),
                    None => manifest.latest.as_str(),
                };
                let version = Version::parse(version).map_err(|_| unknown())?;
                let backend = backend.unwrap_or_else(|| backend_for_version(&version));
                (
                    release(manifest, version, backend, self.arch)
                        .ok_or_else(unknown)?,
                    SpecifierKind::RollingAlias,
                )
            }
            SpecifierForm::TipOfTree { backend, arch } => {
                let hash = manifest.tot.as_deref().ok_or_else(unknown)?;
                (
                    ArtifactIdentity::tip_of_tree(
                        backend.unwrap_or(Backend::Upstream),
                        arch.unwrap_or(self.arch),
                        hash,
                    ),
                    SpecifierKind::RollingAlias,
                )
            }
            SpecifierForm::Version(version) => (
                release(
                    manifest,
                    version.clone(),
                    backend_for_version(version),
                    self.arch,
                )
                .ok_or_else(unknown)?,
                SpecifierKind::BareVersion,
            ),
            SpecifierForm::FullName {
                version,
                backend,
                arch,
            } => (
                release(
                    manifest,
                    version.clone(),
                    backend.unwrap_or_else(|| backend_for_version(version)),
                    arch.unwrap_or(self.arch),
                )
                .ok_or_else(unknown)?,
                SpecifierKind::FullName,
            ),
            SpecifierForm::ReleaseHash {
                backend,
                hash,
                arch,
            } => {
                let identity = if let Some(version) = manifest.version_for_hash(hash) {
                    let version = Version::parse(version).map_err(|_| unknown())?;
                    ArtifactIdentity::release(version, *backend, *arch, hash.clone())
                } else if manifest.tot.as_deref() == Some(hash.as_str()) {
                    ArtifactIdentity::tip_of_tree(*backend, *arch, hash.clone())
                } else {
                    return Err(unknown());
                };
                (identity, SpecifierKind::FullName)
            }
            SpecifierForm::Named(name) => {
                if let Some(target) = manifest.aliases.get(name) {
                    let version = Version::parse(target).map_err(|_| unknown())?;
                    let backend = backend_for_version(&version);
                    (
                        release(manifest, version, backend, self.arch)
                            .ok_or_else(unknown)?,
                        SpecifierKind::RollingAlias,
                    )
                } else if let Some(hash) = manifest.tools.get(name) {
                    (
                        ArtifactIdentity::tool(name.clone(), self.arch, hash.clone()),
                        SpecifierKind::Tool,
                    )
                } else {
                    return Err(unknown());
                }
            }
        };

        Ok(Resolution { identity, kind })
    }
}

fn release(
    manifest: &ReleaseManifest,
    version: Version,
    backend: Backend,
    arch: Arch,
) -> Option<ArtifactIdentity> {
    let hash = manifest.release_hash(&version.to_string())?;
    Some(ArtifactIdentity::release(version, backend, arch, hash))
}
