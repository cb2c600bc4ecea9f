//! Install command for the sdkm CLI.
//!
//! Resolves each specifier against the release manifest and installs the
//! matching prebuilt SDK or tool. Already-installed releases are skipped
//! without touching the network.
//!
//! ## Usage
//!
//! ```bash
//! sdkm install latest                       # Latest upstream SDK
//! sdkm install 1.38.33                      # Bare version, backend from cutover
//! sdkm install sdk-1.40.1-fastcomp-64bit    # Full name
//! sdkm install node-12.18.1-64bit           # Pinned tool
//! ```

use anyhow::Result;
use clap::Args;

use super::Session;
use crate::toolchain::catalog::SpecifierKind;
use crate::toolchain::{BackendPolicy, CancelToken, InstallOutcome, Specifier};

/// Arguments for the install command.
#[derive(Args)]
pub struct InstallArgs {
    /// Versions or tools to install (e.g. "latest", "1.38.33", "node-12.18.1-64bit").
    #[arg(required = true)]
    pub specifiers: Vec<String>,

    /// Build variant for source builds. Prebuilt SDKs ignore it.
    #[arg(long)]
    pub build: Option<String>,

    /// CMake generator for source builds. Prebuilt SDKs ignore it.
    #[arg(long)]
    pub generator: Option<String>,

    /// Fetch timeout in seconds, overriding SDKM_FETCH_TIMEOUT.
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,
}

/// Executes the install command.
///
/// # Process
///
/// 1. Parse every specifier and apply the backend policy
/// 2. Load the release manifest (fetched on first use)
/// 3. Resolve each specifier to an artifact identity
/// 4. Install each identity, skipping releases already in place
///
/// # Errors
///
/// Returns an error if:
/// - A specifier targets the frozen fastcomp backend
/// - A specifier cannot be resolved
/// - A download fails, times out or is cancelled
/// - An archive fails extraction or verification
pub async fn execute(args: &InstallArgs, cancel: &CancelToken) -> Result<()> {
    let specifiers: Vec<Specifier> = args.specifiers.iter().map(|s| Specifier::parse(s)).collect();
    for specifier in &specifiers {
        BackendPolicy.check(specifier)?;
    }

    if let Some(build) = &args.build {
        println!("Note: --build={build} only applies to source builds and is ignored.");
    }
    if let Some(generator) = &args.generator {
        println!("Note: --generator={generator} only applies to source builds and is ignored.");
    }

    let session = Session::open(cancel)?;
    let options = session.fetch_options(args.timeout);
    let manifest = session.manifest(&options).await?;
    let catalog = session.catalog();
    let installer = session.installer();

    for specifier in &specifiers {
        let resolution = catalog.resolve(specifier, &manifest)?;
        let identity = &resolution.identity;
        if resolution.kind == SpecifierKind::RollingAlias {
            println!("{} currently points at {identity}.", specifier.raw());
        }

        match installer.install(&resolution, &options).await? {
            InstallOutcome::Skipped => {
                println!("Skipped {identity}: already installed.");
            }
            InstallOutcome::Installed => {
                println!("Installed {identity}.");
                if identity.is_sdk() {
                    println!("Run 'sdkm activate {identity}' to make it the active SDK.");
                }
            }
        }
    }

    Ok(())
}
