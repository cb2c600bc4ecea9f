//! Error types for the sdkm CLI.
//!
//! Commands return `anyhow::Result` and add context as errors bubble up. The
//! failures a caller must tell apart (to pick an exit code or decide whether a
//! retry is safe) are raised as [`SdkmError`] and recovered in `main` by
//! walking the error chain.

use std::path::PathBuf;
use thiserror::Error;

/// Fixed remediation message for requests that target the frozen legacy backend.
pub const FASTCOMP_DEPRECATED_MESSAGE: &str = "The fastcomp backend is not getting new builds or releases. \
     Please use the upstream llvm backend or use an older version than 2.0.0 (such as 1.40.1).";

/// Consolidated error type for sdkm operations.
///
/// Every variant names the specifier or identity it was raised for, so the
/// single line printed by `main` is enough to act on.
#[derive(Debug, Error)]
pub enum SdkmError {
    /// No specifier rule matched the user input.
    #[error(
        "unknown version specifier '{specifier}'. Run 'sdkm list' to see available versions."
    )]
    UnknownSpecifier {
        /// The raw user input.
        specifier: String,
    },

    /// Policy rejection of the legacy backend.
    #[error("cannot use '{specifier}': {}", FASTCOMP_DEPRECATED_MESSAGE)]
    DeprecatedBackend {
        /// The rejected specifier or identity name.
        specifier: String,
    },

    /// Network failure, timeout or cancellation while fetching.
    #[error("download error for {target}: {message}")]
    Download {
        /// URL or identity that was being fetched.
        target: String,
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The extracted payload is missing every mandatory output.
    #[error("corrupt archive for {identity}: {message}")]
    CorruptArchive {
        /// Identity key of the failed install.
        identity: String,
        /// What verification found.
        message: String,
    },

    /// The operation target is not installed.
    #[error("{identity} is not installed. Run 'sdkm install {identity}' first.")]
    NotInstalled {
        /// Identity key or specifier that was looked up.
        identity: String,
    },

    /// Activation target is a tool, which has no toolchain configuration.
    #[error("{identity} is a tool, not an SDK. Only SDKs can be activated.")]
    NotAnSdk {
        /// Identity key of the tool.
        identity: String,
    },

    /// Release manifest could not be loaded, parsed or validated.
    #[error("manifest error: {message}")]
    Manifest {
        /// Description of the manifest error.
        message: String,
    },

    /// Error reading or writing persisted state.
    #[error("I/O error: {message}")]
    Io {
        /// Description of the I/O operation that failed.
        message: String,
        /// Path involved, if any.
        path: Option<PathBuf>,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid settings file or environment override.
    #[error("configuration error: {message}")]
    Config {
        /// Description of what was invalid.
        message: String,
    },
}

impl SdkmError {
    /// Creates a new `UnknownSpecifier` error.
    #[must_use]
    pub fn unknown_specifier(specifier: impl Into<String>) -> Self {
        Self::UnknownSpecifier {
            specifier: specifier.into(),
        }
    }

    /// Creates a new `DeprecatedBackend` error.
    #[must_use]
    pub fn deprecated_backend(specifier: impl Into<String>) -> Self {
        Self::DeprecatedBackend {
            specifier: specifier.into(),
        }
    }

    /// Creates a new `Download` error.
    #[must_use]
    pub fn download(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Download {
            target: target.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new `Download` error with a source error.
    #[must_use]
    pub fn download_with_source(
        target: impl Into<String>,
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Download {
            target: target.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Creates a new `CorruptArchive` error.
    #[must_use]
    pub fn corrupt_archive(identity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorruptArchive {
            identity: identity.into(),
            message: message.into(),
        }
    }

    /// Creates a new `NotInstalled` error.
    #[must_use]
    pub fn not_installed(identity: impl Into<String>) -> Self {
        Self::NotInstalled {
            identity: identity.into(),
        }
    }

    /// Creates a new `NotAnSdk` error.
    #[must_use]
    pub fn not_an_sdk(identity: impl Into<String>) -> Self {
        Self::NotAnSdk {
            identity: identity.into(),
        }
    }

    /// Creates a new `Manifest` error.
    #[must_use]
    pub fn manifest(message: impl Into<String>) -> Self {
        Self::Manifest {
            message: message.into(),
        }
    }

    /// Creates a new `Io` error with the path that was being accessed.
    #[must_use]
    pub fn io(message: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            path: Some(path.into()),
            source,
        }
    }

    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::UnknownSpecifier { .. } => 2,
            Self::DeprecatedBackend { .. } => 3,
            Self::Download { .. } => 4,
            Self::CorruptArchive { .. } => 5,
            Self::NotInstalled { .. } => 6,
            Self::NotAnSdk { .. }
            | Self::Manifest { .. }
            | Self::Io { .. }
            | Self::Config { .. } => 1,
        }
    }

    /// Whether repeating the same command may succeed.
    ///
    /// Only transient download failures qualify; they never mutate state.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Download { .. })
    }
}

/// Finds the first [`SdkmError`] in an `anyhow` error chain.
#[must_use]
pub fn find_sdkm_error(err: &anyhow::Error) -> Option<&SdkmError> {
    err.chain().find_map(|cause| cause.downcast_ref::<SdkmError>())
}
