//! Activate command for the sdkm CLI.
//!
//! Makes an installed SDK the active one by rewriting `active.toml`. The
//! previous record is kept in `active.toml.old`.
//!
//! ## Usage
//!
//! ```bash
//! sdkm activate latest
//! sdkm activate sdk-1.38.33-fastcomp-64bit
//! ```

use anyhow::Result;
use clap::Args;

use super::Session;
use crate::toolchain::{BackendPolicy, CancelToken, Specifier, StateStore};

/// Arguments for the activate command.
#[derive(Args)]
pub struct ActivateArgs {
    /// Version or installed identity to activate.
    pub specifier: String,
}

/// Executes the activate command.
///
/// # Errors
///
/// Returns an error if:
/// - The specifier targets the frozen fastcomp backend
/// - The specifier cannot be resolved
/// - The resolved identity is not installed
/// - The resolved identity is a tool
pub async fn execute(args: &ActivateArgs, cancel: &CancelToken) -> Result<()> {
    let specifier = Specifier::parse(&args.specifier);
    BackendPolicy.check(&specifier)?;

    let session = Session::open(cancel)?;
    let key = session.installed_key(&specifier).await?;
    let had_active = session.store.read_active()?.is_some();
    let config = session.activation().activate(&key)?;

    println!("Activated {}.", config.identity);
    if let Some(backend) = config.backend {
        println!("  backend:  {backend}");
    }
    println!("  root:     {}", config.root.display());
    if had_active && let Some(previous) = session.store.read_backup()? {
        println!("  previous: {}", previous.identity);
    }
    println!(
        "Configuration written to {}",
        session.settings.paths.active_file().display()
    );
    println!("Run 'eval \"$(sdkm env)\"' to update the current shell.");

    Ok(())
}
