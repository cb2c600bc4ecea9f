//! Clear-cache command for the sdkm CLI.
//!
//! Asks the active SDK to drop its cache of built system libraries, then
//! checks the cache directory is really gone.
//!
//! ## Usage
//!
//! ```bash
//! sdkm clear-cache
//! sdkm --clear-cache
//! ```

use anyhow::Result;

use super::Session;
use crate::toolchain::CancelToken;

/// Executes the clear-cache command.
///
/// # Errors
///
/// Returns an error if no SDK is active, its entry script fails, or the
/// cache directory survives the run.
pub fn execute(cancel: &CancelToken) -> Result<()> {
    let session = Session::open(cancel)?;
    let cleared = session.activation().clear_cache()?;
    println!("Cleared cache at {}", cleared.display());
    Ok(())
}
