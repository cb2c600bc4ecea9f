//! Env command for the sdkm CLI.
//!
//! Prints shell statements that put the active SDK on `PATH` and point its
//! cache variables at the right place.
//!
//! ## Usage
//!
//! ```bash
//! eval "$(sdkm env)"
//! sdkm env --shell fish | source
//! ```

use anyhow::{Result, anyhow};
use clap::{Args, ValueEnum};
use std::fmt::Write;
use std::path::{Path, PathBuf};

use super::Session;
use crate::toolchain::CancelToken;
use crate::toolchain::store::ActiveConfig;

/// Shell syntax to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShellKind {
    /// POSIX sh, bash and zsh.
    Sh,
    /// fish.
    Fish,
}

/// Arguments for the env command.
#[derive(Args)]
pub struct EnvArgs {
    /// Shell syntax for the printed statements.
    #[arg(long, value_enum, default_value_t = ShellKind::Sh)]
    pub shell: ShellKind,
}

/// Directories the active SDK puts in front of `PATH`.
fn path_entries(config: &ActiveConfig) -> Vec<PathBuf> {
    let mut entries = vec![config.root.join("emscripten")];
    if let Some(llvm) = &config.llvm_root {
        entries.push(llvm.clone());
    }
    entries
}

/// Renders the export statements for `config`.
#[must_use]
pub fn render(config: &ActiveConfig, shell: ShellKind) -> String {
    let paths = path_entries(config);
    let vars = [
        ("SDKM_ACTIVE", config.identity.clone()),
        ("SDKM_SDK_ROOT", config.root.display().to_string()),
        ("EM_CACHE", config.cache.display().to_string()),
    ];

    let mut out = String::new();
    match shell {
        ShellKind::Sh => {
            let joined: Vec<String> = paths.iter().map(|p| sh_escape(p)).collect();
            let _ = writeln!(out, "export PATH=\"{}:$PATH\"", joined.join(":"));
            for (name, value) in vars {
                let _ = writeln!(out, "export {name}=\"{}\"", sh_escape(Path::new(&value)));
            }
        }
        ShellKind::Fish => {
            let joined: Vec<String> = paths.iter().map(|p| fish_quote(p)).collect();
            let _ = writeln!(out, "set -gx PATH {} $PATH", joined.join(" "));
            for (name, value) in vars {
                let _ = writeln!(out, "set -gx {name} {}", fish_quote(Path::new(&value)));
            }
        }
    }
    out
}

/// Escapes a path for use inside double quotes.
fn sh_escape(path: &Path) -> String {
    path.display()
        .to_string()
        .replace('\\', "\\\\")
        .replace('$', "\\$")
        .replace('`', "\\`")
        .replace('"', "\\\"")
}

/// Single-quotes a path when fish would otherwise expand it.
fn fish_quote(path: &Path) -> String {
    let value = path.display().to_string();
    let needs_quotes = value.chars().any(|c| {
        matches!(
            c,
            ' ' | '$' | '\\' | '\'' | '*' | '?' | '(' | ')' | '[' | ']' | '{' | '}'
        )
    });
    if needs_quotes {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
    } else {
        value
    }
}

/// Executes the env command.
///
/// # Errors
///
/// Returns an error if no SDK is active.
pub fn execute(args: &EnvArgs, cancel: &CancelToken) -> Result<()> {
    let session = Session::open(cancel)?;
    let config = session
        .activation()
        .active()?
        .ok_or_else(|| anyhow!("No active SDK. Run 'sdkm activate <version>' first."))?;

    print!("{}", render(&config, args.shell));
    Ok(())
}
