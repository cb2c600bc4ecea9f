//! Artifact fetching for sdkm.
//!
//! [`Fetcher`] is the seam the installer and manifest refresh download
//! through. [`HttpFetcher`] is the production implementation:
//!
//! - Streaming HTTP(S) downloads with progress output on a terminal
//! - Automatic retry with exponential backoff (3 attempts)
//! - Downloads to a temporary sibling file, then renames on success
//! - `file://` URLs and plain paths are copied, so a local directory can
//!   mirror the distribution server
//! - Every fetch is bounded by a timeout and a [`CancelToken`]

use std::future::Future;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use futures_util::StreamExt;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::cancel::CancelToken;
use crate::errors::SdkmError;

/// Maximum number of download attempts.
const MAX_RETRIES: u32 = 3;

/// Base delay between retries in milliseconds.
const BASE_RETRY_DELAY_MS: u64 = 1000;

/// User-Agent header for HTTP requests.
const USER_AGENT: &str = concat!("sdkm/", env!("CARGO_PKG_VERSION"));

/// Minimum interval between progress updates in milliseconds.
const PROGRESS_INTERVAL_MS: u128 = 250;

/// Per-fetch limits supplied by the caller.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Upper bound for the whole fetch, retries included.
    pub timeout: Duration,
    /// Cancelled on Ctrl-C.
    pub cancel: CancelToken,
}

impl FetchOptions {
    /// Creates options with the given timeout and token.
    #[must_use]
    pub fn new(timeout: Duration, cancel: CancelToken) -> Self {
        Self { timeout, cancel }
    }
}

/// Retrieves a URL into a local file.
pub trait Fetcher {
    /// Fetches `url` into `dest` and returns the final local path.
    ///
    /// On failure no file is left at `dest` or at any temporary path.
    ///
    /// # Errors
    ///
    /// Returns [`SdkmError::Download`] on network failure, timeout or
    /// cancellation.
    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        options: &FetchOptions,
    ) -> impl Future<Output = Result<PathBuf, SdkmError>> + Send;
}

/// Where a URL points.
#[derive(Debug, PartialEq, Eq)]
enum Source<'a> {
    Remote(&'a str),
    Local(PathBuf),
}

fn classify(url: &str) -> Source<'_> {
    if let Some(path) = url.strip_prefix("file://") {
        Source::Local(PathBuf::from(path))
    } else if url.contains("://") {
        Source::Remote(url)
    } else {
        Source::Local(PathBuf::from(url))
    }
}

/// Temporary sibling used while a download is in flight.
fn temp_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    dest.with_file_name(name)
}

/// In-flight temporary file, removed when dropped.
///
/// A fetch future dropped mid-transfer never reaches its own cleanup, so the
/// guard deletes whatever part was written. After a successful rename the
/// path no longer exists and the removal is a no-op.
struct TempFile {
    path: PathBuf,
}

impl TempFile {
    fn for_dest(dest: &Path) -> Self {
        Self {
            path: temp_path_for(dest),
        }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "discarded partial download"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to discard partial download"),
        }
    }
}

/// HTTP(S) and local-file fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    show_progress: bool,
}

impl HttpFetcher {
    /// Creates a fetcher. Progress is printed only when stdout is a terminal.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            show_progress: std::io::stdout().is_terminal(),
        })
    }

    async fn fetch_inner(&self, url: &str, dest: &Path, temp_path: &Path) -> Result<(), SdkmError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SdkmError::io("Failed to create directory", parent, e))?;
        }

        match classify(url) {
            Source::Local(path) => {
                debug!(source = %path.display(), "copying local artifact");
                copy_local(&path, temp_path).await.map_err(|e| {
                    SdkmError::download_with_source(
                        url,
                        format!("cannot read {}", path.display()),
                        Box::new(e),
                    )
                })?;
            }
            Source::Remote(url) => self.download_with_retries(url, temp_path).await?,
        }

        tokio::fs::rename(temp_path, dest)
            .await
            .map_err(|e| SdkmError::io("Failed to move download into place", dest, e))
    }

    async fn download_with_retries(&self, url: &str, temp_path: &Path) -> Result<(), SdkmError> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = calculate_retry_delay(attempt);
                warn!(
                    %url,
                    attempt = attempt + 1,
                    max = MAX_RETRIES,
                    "retrying download"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match self.download_with_progress(url, temp_path).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(%url, error = %format!("{e:#}"), "download attempt failed");
                    let _ = tokio::fs::remove_file(temp_path).await;
                    last_error = Some(e);
                }
            }
        }

        let error = last_error
            .unwrap_or_else(|| anyhow::anyhow!("Download failed after {MAX_RETRIES} attempts"));
        Err(SdkmError::download_with_source(
            url,
            format!("failed after {MAX_RETRIES} attempts: {error:#}"),
            error.into(),
        ))
    }

    /// Streams one download attempt into `dest`.
    async fn download_with_progress(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to connect to {url}"))?;

        if !response.status().is_success() {
            bail!("HTTP error {}: {url}", response.status());
        }

        let total_size = response.content_length().unwrap_or(0);

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create file: {}", dest.display()))?;

        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        let start_time = Instant::now();
        let mut last_update = Instant::now();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("Failed to read chunk from {url}"))?;
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write to {}", dest.display()))?;
            downloaded += chunk.len() as u64;

            let now = Instant::now();
            if self.show_progress
                && now.duration_since(last_update).as_millis() >= PROGRESS_INTERVAL_MS
            {
                print_progress(downloaded, total_size, start_time.elapsed().as_secs_f64());
                last_update = now;
            }
        }

        file.flush()
            .await
            .with_context(|| format!("Failed to flush {}", dest.display()))?;

        if self.show_progress {
            print_progress(downloaded, total_size, start_time.elapsed().as_secs_f64());
            println!();
        }

        Ok(())
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        options: &FetchOptions,
    ) -> Result<PathBuf, SdkmError> {
        if options.cancel.is_cancelled() {
            return Err(SdkmError::download(url, "cancelled"));
        }

        let temp = TempFile::for_dest(dest);
        let work = tokio::time::timeout(options.timeout, self.fetch_inner(url, dest, &temp.path));

        let result = tokio::select! {
            outcome = work => match outcome {
                Ok(inner) => inner,
                Err(_) => Err(SdkmError::download(
                    url,
                    format!("timed out after {}s", options.timeout.as_secs()),
                )),
            },
            () = options.cancel.cancelled() => Err(SdkmError::download(url, "cancelled")),
        };

        drop(temp);
        result.map(|()| dest.to_path_buf())
    }
}

/// Copies a local file chunk by chunk, so dropping the future stops the copy.
async fn copy_local(source: &Path, dest: &Path) -> std::io::Result<()> {
    let mut reader = tokio::fs::File::open(source).await?;
    let mut writer = tokio::fs::File::create(dest).await?;
    tokio::io::copy(&mut reader, &mut writer).await?;
    writer.flush().await
}

/// Prints a simple text-based progress line.
#[allow(clippy::cast_precision_loss)]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
fn print_progress(downloaded: u64, total: u64, elapsed_secs: f64) {
    let percent = if total > 0 {
        (downloaded as f64 / total as f64 * 100.0) as u8
    } else {
        0
    };
    let speed = if elapsed_secs > 0.0 {
        downloaded as f64 / elapsed_secs
    } else {
        0.0
    };

    print!(
        "\r{}/{} ({percent}%) {}     ",
        format_bytes(downloaded),
        format_bytes(total),
        format_speed(speed)
    );
    let _ = std::io::stdout().flush();
}

/// Formats bytes into a human-readable string (KB, MB, GB).
fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    #[allow(clippy::cast_precision_loss)]
    let bytes_f = bytes as f64;

    if bytes_f >= GB {
        format!("{:.2} GB", bytes_f / GB)
    } else if bytes_f >= MB {
        format!("{:.2} MB", bytes_f / MB)
    } else if bytes_f >= KB {
        format!("{:.2} KB", bytes_f / KB)
    } else {
        format!("{bytes} B")
    }
}

/// Formats speed (bytes/sec) into a human-readable string.
fn format_speed(speed: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;

    if speed >= MB {
        format!("{:.2} MB/s", speed / MB)
    } else if speed >= KB {
        format!("{:.2} KB/s", speed / KB)
    } else {
        format!("{speed:.0} B/s")
    }
}

/// Calculates the retry delay with exponential backoff and jitter.
///
/// The delay doubles with each attempt (1s, 2s, 4s) with +/- 25% jitter.
fn calculate_retry_delay(attempt: u32) -> u64 {
    let base_delay = BASE_RETRY_DELAY_MS * 2u64.pow(attempt);
    let jitter_range = base_delay / 4;
    let jitter = rand::rng().random_range(0..=jitter_range * 2);
    base_delay - jitter_range + jitter
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_test_dir(name: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("sdkm_test_{}_{}", name, rand::random::<u64>()));
        std::fs::create_dir_all(&dir).expect("Should create temp dir");
        dir
    }

    fn options() -> FetchOptions {
        FetchOptions::new(Duration::from_secs(10), CancelToken::new())
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher {
            client: reqwest::Client::new(),
            show_progress: false,
        }
    }

    #[test]
    fn retry_delay_increases_exponentially() {
        let delay_0 = calculate_retry_delay(0);
        let delay_1 = calculate_retry_delay(1);
        let delay_2 = calculate_retry_delay(2);

        assert!(
            (750..=1250).contains(&delay_0),
            "Attempt 0 delay should be ~1000ms with jitter"
        );
        assert!(
            (1500..=2500).contains(&delay_1),
            "Attempt 1 delay should be ~2000ms with jitter"
        );
        assert!(
            (3000..=5000).contains(&delay_2),
            "Attempt 2 delay should be ~4000ms with jitter"
        );
    }

    #[test]
    fn classify_distinguishes_local_and_remote() {
        assert_eq!(
            classify("https://dist.example/a.tar.gz"),
            Source::Remote("https://dist.example/a.tar.gz")
        );
        assert_eq!(
            classify("file:///srv/mirror/a.tar.gz"),
            Source::Local(PathBuf::from("/srv/mirror/a.tar.gz"))
        );
        assert_eq!(
            classify("/srv/mirror/a.tar.gz"),
            Source::Local(PathBuf::from("/srv/mirror/a.tar.gz"))
        );
    }

    #[test]
    fn temp_path_is_sibling_with_tmp_suffix() {
        let temp = temp_path_for(Path::new("/d/abc-fastcomp-64bit.tar.gz"));
        assert_eq!(temp, PathBuf::from("/d/abc-fastcomp-64bit.tar.gz.tmp"));
    }

    #[test]
    fn temp_file_is_removed_on_drop() {
        let dir = temp_test_dir("temp_guard");
        let dest = dir.join("out.tar.gz");
        let guard = TempFile::for_dest(&dest);
        std::fs::write(&guard.path, b"partial").unwrap();

        drop(guard);

        assert!(!temp_path_for(&dest).exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn abandoned_fetch_leaves_no_temp_file() {
        let dir = temp_test_dir("fetch_abandoned");
        let source = dir.join("source.bin");
        std::fs::write(&source, vec![7u8; 4 * 1024 * 1024]).unwrap();
        let dest = dir.join("out.bin");
        let fetcher = fetcher();
        let options = options();

        {
            let url = source.display().to_string();
            let fetch = fetcher.fetch(&url, &dest, &options);
            tokio::pin!(fetch);
            // One poll starts the fetch; the future is then dropped unfinished.
            let _ = futures_util::poll!(fetch.as_mut());
        }

        assert!(!temp_path_for(&dest).exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn format_bytes_picks_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }

    #[tokio::test]
    async fn local_file_is_copied_into_place() {
        let dir = temp_test_dir("fetch_local");
        let source = dir.join("source.tar.gz");
        std::fs::write(&source, b"payload").unwrap();
        let dest = dir.join("downloads").join("out.tar.gz");

        let url = format!("file://{}", source.display());
        let path = fetcher().fetch(&url, &dest, &options()).await.unwrap();

        assert_eq!(path, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
        assert!(!temp_path_for(&dest).exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_local_file_is_download_error_without_leftovers() {
        let dir = temp_test_dir("fetch_missing");
        let dest = dir.join("out.tar.gz");

        let err = fetcher()
            .fetch(&dir.join("nope.tar.gz").display().to_string(), &dest, &options())
            .await
            .unwrap_err();

        assert!(matches!(err, SdkmError::Download { .. }));
        assert!(err.is_retriable());
        assert!(!dest.exists());
        assert!(!temp_path_for(&dest).exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn cancelled_token_aborts_fetch() {
        let dir = temp_test_dir("fetch_cancel");
        let source = dir.join("source.bin");
        std::fs::write(&source, b"x").unwrap();
        let dest = dir.join("out.bin");

        let options = options();
        options.cancel.cancel();
        // With the token already cancelled, either branch may win the race;
        // a cancelled result must leave nothing behind.
        let result = fetcher()
            .fetch(&source.display().to_string(), &dest, &options)
            .await;
        if let Err(e) = result {
            assert!(e.to_string().contains("cancelled"));
            assert!(!dest.exists());
        }

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn unreachable_server_is_download_error() {
        let dir = temp_test_dir("fetch_unreachable");
        let dest = dir.join("out.tar.gz");
        let options = FetchOptions::new(Duration::from_millis(200), CancelToken::new());

        let err = fetcher()
            .fetch("http://127.0.0.1:1/a.tar.gz", &dest, &options)
            .await
            .unwrap_err();

        assert!(matches!(err, SdkmError::Download { .. }));
        assert!(!dest.exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
