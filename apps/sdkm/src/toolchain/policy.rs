//! Gate for the frozen legacy backend.
//!
//! The fastcomp backend stopped receiving builds after [`FASTCOMP_FINAL`].
//! Requests for a newer fastcomp SDK, or for any rolling fastcomp alias, are
//! refused with [`SdkmError::DeprecatedBackend`] before the manifest is
//! consulted or anything is fetched.

use semver::Version;
use tracing::debug;

use super::catalog::{ArtifactIdentity, Backend, Specifier, SpecifierForm, backend_for_version};
use crate::errors::SdkmError;

/// Last release published with the fastcomp backend.
pub const FASTCOMP_FINAL: Version = Version::new(1, 40, 1);

/// Rejects requests the legacy backend can no longer serve.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendPolicy;

impl BackendPolicy {
    /// Checks a parsed specifier. Needs no manifest.
    ///
    /// Hash-pinned names carry no version, so they pass here and are
    /// re-checked with [`BackendPolicy::check_identity`] after resolution.
    ///
    /// # Errors
    ///
    /// Returns [`SdkmError::DeprecatedBackend`] for `latest-fastcomp`,
    /// `tot-fastcomp` and fastcomp names newer than [`FASTCOMP_FINAL`].
    pub fn check(self, specifier: &Specifier) -> Result<(), SdkmError> {
        let rejected = match specifier.form() {
            SpecifierForm::Latest { backend } | SpecifierForm::TipOfTree { backend, .. } => {
                *backend == Some(Backend::Fastcomp)
            }
            SpecifierForm::Version(version) => {
                backend_for_version(version) == Backend::Fastcomp && *version > FASTCOMP_FINAL
            }
            SpecifierForm::FullName {
                version, backend, ..
            } => {
                let backend = backend.unwrap_or_else(|| backend_for_version(version));
                backend == Backend::Fastcomp && *version > FASTCOMP_FINAL
            }
            SpecifierForm::ReleaseHash { .. } | SpecifierForm::Named(_) => false,
        };

        if rejected {
            debug!(specifier = %specifier, "rejected by backend policy");
            return Err(SdkmError::deprecated_backend(specifier.raw()));
        }
        Ok(())
    }

    /// Checks a resolved identity. Tip-of-tree fastcomp builds have no
    /// release version and are always rejected.
    ///
    /// # Errors
    ///
    /// Returns [`SdkmError::DeprecatedBackend`] if the identity is a fastcomp
    /// SDK without a version or newer than [`FASTCOMP_FINAL`].
    pub fn check_identity(self, identity: &ArtifactIdentity) -> Result<(), SdkmError> {
        if identity.backend != Some(Backend::Fastcomp) {
            return Ok(());
        }
        match &identity.version {
            Some(version) if *version <= FASTCOMP_FINAL => Ok(()),
            _ => Err(SdkmError::deprecated_backend(identity.key())),
        }
    }
}
