#![warn(clippy::pedantic)]

//! # sdkm: toolchain SDK version manager
//!
//! The `sdkm` command resolves version specifiers against a published
//! release manifest, installs prebuilt SDK archives side by side, and
//! switches which installed SDK is active.
//!
//! ## Subcommands
//!
//! - `install` - Install one or more SDKs or tools
//! - `activate` - Make an installed SDK the active one
//! - `uninstall` - Remove an installed SDK or tool
//! - `update-tags` (alias `update`) - Refresh the release manifest
//! - `list` - Show available and installed versions
//! - `clear-cache` - Clear the active SDK's library cache
//! - `fetch` - Download archives without installing
//! - `env` - Print shell exports for the active SDK
//!
//! ## Examples
//!
//! Install and activate the latest release:
//! ```bash
//! sdkm install latest
//! sdkm activate latest
//! ```
//!
//! Pin an older fastcomp release:
//! ```bash
//! sdkm install sdk-1.38.33-fastcomp-64bit
//! ```

mod commands;
mod errors;
mod logging;
mod settings;
mod toolchain;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{activate, clear_cache, env, fetch, install, list, uninstall, update};
use errors::find_sdkm_error;
use toolchain::CancelToken;
use tracing::debug;

/// Toolchain SDK version manager.
///
/// Installs prebuilt SDK releases side by side and switches between them.
#[derive(Parser)]
#[command(
    name = "sdkm",
    author,
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("SDKM_GIT_COMMIT"), ")"),
    about = "Toolchain SDK version manager",
    long_about = "The 'sdkm' command installs prebuilt toolchain SDK releases side by side \
    and switches which one is active. Use 'install' and 'activate' to get started.",
    after_help = "\
SPECIFIERS:
    latest, latest-upstream, latest-fastcomp    Newest release (rolling)
    tot, tot-upstream, tot-fastcomp             Tip-of-tree build (rolling)
    1.38.33                                     Release, backend from cutover
    sdk-1.38.33-fastcomp-64bit                  Full SDK name
    node-12.18.1-64bit                          Pinned tool

EXIT CODES:
    2  Unknown specifier    3  Deprecated backend    4  Download failed
    5  Corrupt archive      6  Not installed         1  Other errors

ENVIRONMENT VARIABLES:
    SDKM_HOME               State directory (default: ~/.sdkm)
    SDKM_DIST_SERVER        Distribution server URL or mirror directory
    SDKM_FETCH_TIMEOUT      Fetch timeout in seconds (default: 300)
    SDKM_ARCH               Architecture variant (64bit, 32bit, arm64)
    SDKM_LOG                Log filter, e.g. sdkm=debug"
)]
pub struct Cli {
    /// Print diagnostic logging to stderr.
    #[clap(long, short, global = true, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,

    /// Clear the active SDK's library cache.
    #[clap(long = "clear-cache", action = clap::ArgAction::SetTrue)]
    pub clear_cache: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands for the sdkm CLI.
#[derive(Subcommand)]
pub enum Commands {
    /// Install SDKs or tools.
    ///
    /// Resolves each specifier against the release manifest and installs the
    /// matching prebuilt archive. Releases already installed are skipped.
    Install(install::InstallArgs),

    /// Make an installed SDK the active one.
    ///
    /// Rewrites the active configuration. The previous one is kept as a
    /// single backup.
    Activate(activate::ActivateArgs),

    /// Remove an installed SDK or tool.
    Uninstall(uninstall::UninstallArgs),

    /// Refresh the release manifest.
    ///
    /// Downloads the manifest of published releases. Rolling aliases such as
    /// 'latest' and 'tot' move only when this runs.
    #[command(name = "update-tags", visible_alias = "update")]
    UpdateTags,

    /// List available and installed versions.
    List(list::ListArgs),

    /// Clear the active SDK's library cache.
    ClearCache,

    /// Download archives into the cache without installing.
    ///
    /// Fetches for several operating systems run concurrently.
    Fetch(fetch::FetchArgs),

    /// Print shell exports for the active SDK.
    Env(env::EnvArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    if let Err(e) = run(cli, &cancel).await {
        let exit_code = handle_error(&e);
        std::process::exit(exit_code);
    }
}

/// Prints an error and returns the exit code for it.
///
/// Typed errors anywhere in the chain select their own code. Everything
/// else exits with 1.
fn handle_error(e: &anyhow::Error) -> i32 {
    eprintln!("Error: {e:#}");
    let Some(err) = find_sdkm_error(e) else {
        return 1;
    };
    if err.is_retriable() {
        eprintln!("Nothing was changed. Re-running the command may succeed.");
    }
    err.exit_code()
}

async fn run(cli: Cli, cancel: &CancelToken) -> Result<()> {
    if cli.clear_cache {
        return clear_cache::execute(cancel);
    }

    match cli.command {
        Some(Commands::Install(args)) => install::execute(&args, cancel).await,
        Some(Commands::Activate(args)) => activate::execute(&args, cancel).await,
        Some(Commands::Uninstall(args)) => uninstall::execute(&args, cancel).await,
        Some(Commands::UpdateTags) => update::execute(cancel).await,
        Some(Commands::List(args)) => list::execute(&args, cancel).await,
        Some(Commands::ClearCache) => clear_cache::execute(cancel),
        Some(Commands::Fetch(args)) => fetch::execute(&args, cancel).await,
        Some(Commands::Env(args)) => env::execute(&args, cancel),
        None => {
            println!("sdkm: toolchain SDK version manager");
            println!();
            println!("Run 'sdkm --help' for usage information.");
            println!("Run 'sdkm install --help' to get started.");
            Ok(())
        }
    }
}
