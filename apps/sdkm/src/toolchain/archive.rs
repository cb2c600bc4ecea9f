//! Archive extraction for downloaded artifacts.
//!
//! The format is detected from the file's leading bytes rather than its name,
//! since downloads are stored under hashed file names. Gzip-compressed tar,
//! plain tar and ZIP archives are unpacked; any other payload is copied into
//! the destination as a single file.
//!
//! If all archive entries share a common root folder it is stripped during
//! extraction (e.g. `sdk-1.38.33/emscripten/emcc` becomes `emscripten/emcc`).
//! Entries with absolute paths or `..` components are refused.

use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tracing::debug;

/// Unpacks a fetched artifact into a directory.
pub trait Extractor {
    /// Extracts `archive` into `dest`, creating `dest` if needed.
    ///
    /// A payload that is not an archive is written as `dest/<fallback_name>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive is unreadable, malformed or tries to
    /// escape `dest`.
    fn extract(&self, archive: &Path, dest: &Path, fallback_name: &str) -> Result<()>;
}

/// Container format detected from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// gzip-compressed tar (`1f 8b`).
    TarGz,
    /// Uncompressed POSIX tar (`ustar` at offset 257).
    Tar,
    /// ZIP (`PK\x03\x04`).
    Zip,
    /// Anything else.
    Raw,
}

impl ArchiveFormat {
    /// Sniffs the format of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or read.
    pub fn detect(path: &Path) -> Result<Self> {
        let mut file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mut header = Vec::with_capacity(262);
        file.by_ref()
            .take(262)
            .read_to_end(&mut header)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self::from_header(&header))
    }

    fn from_header(header: &[u8]) -> Self {
        if header.starts_with(&[0x1f, 0x8b]) {
            Self::TarGz
        } else if header.starts_with(b"PK\x03\x04") || header.starts_with(b"PK\x05\x06") {
            Self::Zip
        } else if header.len() >= 262 && &header[257..262] == b"ustar" {
            Self::Tar
        } else {
            Self::Raw
        }
    }
}

/// Default [`Extractor`] backed by the `tar`, `flate2` and `zip` crates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveExtractor;

impl ArchiveExtractor {
    /// Creates an extractor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for ArchiveExtractor {
    fn extract(&self, archive: &Path, dest: &Path, fallback_name: &str) -> Result<()> {
        let format = ArchiveFormat::detect(archive)?;
        debug!(archive = %archive.display(), ?format, "extracting");

        match format {
            ArchiveFormat::TarGz => extract_tar(archive, dest, true)?,
            ArchiveFormat::Tar => extract_tar(archive, dest, false)?,
            ArchiveFormat::Zip => extract_zip(archive, dest)?,
            ArchiveFormat::Raw => copy_single_file(archive, dest, fallback_name)?,
        }

        set_executable_permissions(dest)
    }
}

/// Rejects absolute paths and paths with parent directory references.
fn ensure_relative(path: &Path) -> Result<()> {
    if path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        bail!(
            "Refusing to extract path with parent directory or absolute reference: {}",
            path.display()
        );
    }
    Ok(())
}

/// Maps an entry path to its output location below `dest`, or `None` for the
/// stripped root folder itself.
fn output_path_for(entry_path: &Path, strip_prefix: Option<&Path>, dest: &Path) -> Option<PathBuf> {
    let relative = match strip_prefix.map(|prefix| entry_path.strip_prefix(prefix)) {
        Some(Ok(p)) if p.as_os_str().is_empty() => return None,
        Some(Ok(p)) => p,
        _ => entry_path,
    };
    Some(dest.join(relative))
}

fn open_tar(archive_path: &Path, gzip: bool) -> Result<Archive<Box<dyn Read>>> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;
    let reader: Box<dyn Read> = if gzip {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Archive::new(reader))
}

/// Extracts a tar archive, optionally gzip-compressed.
fn extract_tar(archive_path: &Path, dest_dir: &Path, gzip: bool) -> Result<()> {
    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory: {}", dest_dir.display()))?;

    let strip_prefix = find_common_root_folder_tar(archive_path, gzip)?;
    let mut archive = open_tar(archive_path, gzip)?;

    for entry in archive
        .entries()
        .with_context(|| format!("Failed to read tar entries: {}", archive_path.display()))?
    {
        let mut entry = entry
            .with_context(|| format!("Failed to read tar entry: {}", archive_path.display()))?;

        let entry_path = entry
            .path()
            .with_context(|| "Failed to get entry path")?
            .into_owned();
        ensure_relative(&entry_path)?;

        let Some(output_path) = output_path_for(&entry_path, strip_prefix.as_deref(), dest_dir)
        else {
            continue;
        };

        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&output_path).with_context(|| {
                format!("Failed to create directory: {}", output_path.display())
            })?;
        } else {
            if let Some(parent) = output_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
            entry
                .unpack(&output_path)
                .with_context(|| format!("Failed to extract: {}", output_path.display()))?;
        }
    }

    Ok(())
}

/// Extracts a ZIP archive.
fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read ZIP archive: {}", archive_path.display()))?;

    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory: {}", dest_dir.display()))?;

    let strip_prefix = find_common_root_folder_zip(&mut archive);

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("Failed to read archive entry {i}"))?;

        let entry_path = entry
            .enclosed_name()
            .with_context(|| format!("Invalid entry path in archive: entry {i}"))?;
        ensure_relative(&entry_path)?;

        let Some(output_path) = output_path_for(&entry_path, strip_prefix.as_deref(), dest_dir)
        else {
            continue;
        };

        if entry.is_dir() {
            std::fs::create_dir_all(&output_path).with_context(|| {
                format!("Failed to create directory: {}", output_path.display())
            })?;
        } else {
            if let Some(parent) = output_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
            let mut outfile = File::create(&output_path)
                .with_context(|| format!("Failed to create file: {}", output_path.display()))?;
            std::io::copy(&mut entry, &mut outfile)
                .with_context(|| format!("Failed to extract: {}", output_path.display()))?;
        }
    }

    Ok(())
}

/// Copies a non-archive payload into `dest_dir` as `name`.
fn copy_single_file(source: &Path, dest_dir: &Path, name: &str) -> Result<()> {
    ensure_relative(Path::new(name))?;
    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory: {}", dest_dir.display()))?;
    let target = dest_dir.join(name);
    std::fs::copy(source, &target)
        .with_context(|| format!("Failed to copy {} to {}", source.display(), target.display()))?;
    mark_executable(&target)
}

/// Tracks the shared first path component across entries.
#[derive(Default)]
struct CommonRoot {
    root: Option<PathBuf>,
    nested: bool,
    diverged: bool,
}

impl CommonRoot {
    fn observe(&mut self, path: &Path) {
        if self.diverged {
            return;
        }
        if path.components().count() > 1 {
            self.nested = true;
        }
        let Some(first) = path.components().next() else {
            return;
        };
        let first = PathBuf::from(first.as_os_str());
        match &self.root {
            None => self.root = Some(first),
            Some(existing) if existing != &first => self.diverged = true,
            Some(_) => {}
        }
    }

    /// The shared root, only if there are nested entries so a lone flat file
    /// is never treated as a containing folder.
    fn finish(self) -> Option<PathBuf> {
        if self.diverged || !self.nested {
            None
        } else {
            self.root
        }
    }
}

fn find_common_root_folder_tar(archive_path: &Path, gzip: bool) -> Result<Option<PathBuf>> {
    let mut archive = open_tar(archive_path, gzip)?;
    let mut common = CommonRoot::default();

    for entry in archive
        .entries()
        .with_context(|| format!("Failed to read tar entries: {}", archive_path.display()))?
    {
        let entry = entry
            .with_context(|| format!("Failed to read tar entry: {}", archive_path.display()))?;
        let path = entry.path().with_context(|| "Failed to get entry path")?;
        common.observe(&path);
    }

    Ok(common.finish())
}

fn find_common_root_folder_zip<R: std::io::Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Option<PathBuf> {
    let mut common = CommonRoot::default();
    for i in 0..archive.len() {
        let entry = archive.by_index(i).ok()?;
        common.observe(&entry.enclosed_name()?);
    }
    common.finish()
}

/// Marks everything under `bin/` plus the `emscripten/emcc` entry script
/// executable (Unix only).
#[cfg(unix)]
fn set_executable_permissions(dir: &Path) -> Result<()> {
    let bin_dir = dir.join("bin");
    if bin_dir.is_dir() {
        let entries = std::fs::read_dir(&bin_dir)
            .with_context(|| format!("Failed to read bin directory: {}", bin_dir.display()))?;
        for entry in entries {
            let path = entry.with_context(|| "Failed to read directory entry")?.path();
            if path.is_file() {
                mark_executable(&path)?;
            }
        }
    }

    let emcc = dir.join("emscripten").join("emcc");
    if emcc.is_file() {
        mark_executable(&emcc)?;
    }

    Ok(())
}

#[cfg(windows)]
#[allow(clippy::unnecessary_wraps)]
fn set_executable_permissions(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = std::fs::metadata(path)
        .with_context(|| format!("Failed to get metadata: {}", path.display()))?
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)
        .with_context(|| format!("Failed to set permissions: {}", path.display()))
}

#[cfg(windows)]
#[allow(clippy::unnecessary_wraps)]
fn mark_executable(_path: &Path) -> Result<()> {
    Ok(())
}
