//! Uninstall command for the sdkm CLI.
//!
//! Removes an installed SDK or tool and its record.
//!
//! ## Usage
//!
//! ```bash
//! sdkm uninstall 1.38.33
//! sdkm uninstall sdk-1.38.33-fastcomp-64bit
//! ```

use anyhow::Result;
use clap::Args;

use super::Session;
use crate::toolchain::{CancelToken, Specifier, StateStore};

/// Arguments for the uninstall command.
#[derive(Args)]
pub struct UninstallArgs {
    /// Version or installed identity to remove.
    pub specifier: String,
}

/// Executes the uninstall command.
///
/// Uninstalling the active SDK leaves `active.toml` in place; the next
/// `activate` replaces it.
///
/// # Errors
///
/// Returns an error if the specifier cannot be resolved or names nothing
/// that is installed.
pub async fn execute(args: &UninstallArgs, cancel: &CancelToken) -> Result<()> {
    let session = Session::open(cancel)?;
    let key = session.installed_key(&Specifier::parse(&args.specifier)).await?;

    let is_active = session
        .store
        .read_active()?
        .is_some_and(|config| config.identity == key);

    println!("Uninstalling {key}...");
    session.installer().uninstall(&key)?;
    println!("Removed {key}.");

    if is_active {
        println!("Warning: {key} was the active SDK. Run 'sdkm activate <version>' to pick another.");
    }

    Ok(())
}
