//! Update command for the sdkm CLI.
//!
//! Downloads the release manifest and replaces the cached copy. A failed
//! download or an invalid document leaves the cached manifest untouched.
//!
//! ## Usage
//!
//! ```bash
//! sdkm update-tags
//! sdkm update
//! ```

use anyhow::Result;

use super::Session;
use crate::toolchain::CancelToken;

/// Executes the update command.
///
/// # Errors
///
/// Returns an error if the manifest cannot be fetched or fails validation.
pub async fn execute(cancel: &CancelToken) -> Result<()> {
    let session = Session::open(cancel)?;

    println!(
        "Fetching release manifest from {}...",
        session.settings.dist_server
    );
    let manifest = session.refresh_manifest(&session.fetch_options(None)).await?;

    println!(
        "Release manifest updated: {} releases, latest is {}.",
        manifest.releases.len(),
        manifest.latest
    );
    if let Some(tot) = &manifest.tot {
        println!("Tip-of-tree build: {tot}");
    }

    Ok(())
}
