//! In-process fakes for fetcher and extractor.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};

use super::archive::Extractor;
use super::fetcher::{FetchOptions, Fetcher};
use crate::errors::SdkmError;

/// Fetcher that writes a fixed body for every URL and records each call.
///
/// The body defaults to the requested URL.
#[derive(Debug, Default)]
pub struct CountingFetcher {
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
    fail_matching: Option<String>,
    body: Option<String>,
}

impl CountingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fetcher that answers every URL with `body`.
    pub fn serving(body: &str) -> Self {
        Self {
            body: Some(body.to_string()),
            ..Self::default()
        }
    }

    /// A fetcher whose every call fails with a download error.
    pub fn failing() -> Self {
        Self::failing_for("")
    }

    /// A fetcher that fails only for URLs containing `pattern`.
    pub fn failing_for(pattern: &str) -> Self {
        Self {
            fail_matching: Some(pattern.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl Fetcher for CountingFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        options: &FetchOptions,
    ) -> Result<PathBuf, SdkmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());

        if self
            .fail_matching
            .as_deref()
            .is_some_and(|pattern| url.contains(pattern))
        {
            return Err(SdkmError::download(url, "connection refused"));
        }
        if options.cancel.is_cancelled() {
            return Err(SdkmError::download(url, "cancelled"));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(dest, self.body.as_deref().unwrap_or(url)).unwrap();
        Ok(dest.to_path_buf())
    }
}

/// Extractor that ignores the archive and creates a fixed set of files.
#[derive(Debug, Clone)]
pub struct ScriptedExtractor {
    files: Vec<PathBuf>,
    fail: bool,
}

impl ScriptedExtractor {
    /// Produces a layout that passes SDK verification.
    pub fn sdk() -> Self {
        Self::with_files(&["emscripten/emcc", "bin/clang"])
    }

    pub fn with_files(files: &[&str]) -> Self {
        Self {
            files: files.iter().map(PathBuf::from).collect(),
            fail: false,
        }
    }

    /// Fails as if the archive were unreadable.
    pub fn failing() -> Self {
        Self {
            files: Vec::new(),
            fail: true,
        }
    }
}

impl Extractor for ScriptedExtractor {
    fn extract(&self, _archive: &Path, dest: &Path, _fallback_name: &str) -> Result<()> {
        if self.fail {
            bail!("unexpected end of archive");
        }
        std::fs::create_dir_all(dest)?;
        for file in &self.files {
            let path = dest.join(file);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, b"payload")?;
        }
        Ok(())
    }
}
