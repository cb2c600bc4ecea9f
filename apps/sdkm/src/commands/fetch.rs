//! Fetch command for the sdkm CLI.
//!
//! Downloads the archives for one specifier into the download cache without
//! installing them. Several operating systems can be fetched at once, which
//! is handy when preparing an offline mirror.
//!
//! ## Usage
//!
//! ```bash
//! sdkm fetch latest
//! sdkm fetch 1.40.1 --os linux --os macos --os windows
//! ```

use anyhow::Result;
use clap::Args;

use super::Session;
use crate::toolchain::platform::Os;
use crate::toolchain::{BackendPolicy, CancelToken, Specifier};

/// Arguments for the fetch command.
#[derive(Args)]
pub struct FetchArgs {
    /// Version or tool to fetch.
    pub specifier: String,

    /// Operating system to fetch for. Repeat for several; defaults to the host.
    #[arg(long = "os", value_name = "OS")]
    pub os: Vec<Os>,

    /// Fetch timeout in seconds, overriding SDKM_FETCH_TIMEOUT.
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,
}

/// Executes the fetch command.
///
/// # Errors
///
/// Returns an error if the specifier is rejected or unknown, or any of the
/// downloads fails.
pub async fn execute(args: &FetchArgs, cancel: &CancelToken) -> Result<()> {
    let specifier = Specifier::parse(&args.specifier);
    BackendPolicy.check(&specifier)?;

    let session = Session::open(cancel)?;
    let options = session.fetch_options(args.timeout);
    let manifest = session.manifest(&options).await?;
    let resolution = session.catalog().resolve(&specifier, &manifest)?;

    let mut systems: Vec<Os> = Vec::new();
    for os in &args.os {
        if !systems.contains(os) {
            systems.push(*os);
        }
    }
    if systems.is_empty() {
        systems.push(session.settings.platform.os);
    }

    let targets: Vec<_> = systems
        .iter()
        .map(|os| (resolution.identity.clone(), *os))
        .collect();

    println!("Fetching {} for {} platform(s)...", resolution.identity, targets.len());
    let paths = session.installer().prefetch(&targets, &options).await?;

    for ((_, os), path) in targets.iter().zip(&paths) {
        println!("  {os}: {}", path.display());
    }

    Ok(())
}
