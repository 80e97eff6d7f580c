//! Artifact downloader.
//!
//! Streams a remote file into a destination directory in fixed 256 KiB
//! chunks, replacing any file of the same name. Remote failures (HTTP status
//! or transport) are logged and reported as "nothing downloaded" rather than
//! as errors; local filesystem failures are errors.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use kbot_shared::{KbotError, Result};
use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, instrument};
use url::Url;

/// Size of each write to the destination file.
pub const CHUNK_SIZE: usize = 256 * 1024;

/// User-Agent string for download requests.
const USER_AGENT: &str = concat!("kbot/", env!("CARGO_PKG_VERSION"));

/// Layout for start/end timestamps in logs.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for a running download.
pub trait DownloadProgress: Send + Sync {
    /// Called once the response headers are in.
    fn started(&self, file_name: &str, total: Option<u64>);
    /// Called after each chunk is written.
    fn advanced(&self, received: u64, total: Option<u64>);
    /// Called when the file is complete.
    fn finished(&self, summary: &DownloadSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl DownloadProgress for SilentProgress {
    fn started(&self, _file_name: &str, _total: Option<u64>) {}
    fn advanced(&self, _received: u64, _total: Option<u64>) {}
    fn finished(&self, _summary: &DownloadSummary) {}
}

/// Outcome of a completed download.
#[derive(Debug, Clone)]
pub struct DownloadSummary {
    /// Where the file was written.
    pub path: PathBuf,
    /// Bytes written.
    pub bytes: u64,
    /// Wall-clock start.
    pub started_at: DateTime<Local>,
    /// Wall-clock end.
    pub finished_at: DateTime<Local>,
    /// Transfer duration.
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Downloader
// ---------------------------------------------------------------------------

/// Why a transfer stopped early.
enum Failure {
    Status(StatusCode),
    Transport(reqwest::Error),
    Local(KbotError),
}

impl From<KbotError> for Failure {
    fn from(e: KbotError) -> Self {
        Self::Local(e)
    }
}

/// HTTP downloader. No timeout is set beyond the transport defaults.
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| KbotError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Download `url` into `dest_dir`, named after the URL's last path segment.
    ///
    /// Returns `Ok(None)` when the remote side failed; the failure is logged.
    #[instrument(skip(self, progress), fields(dest = %dest_dir.display()))]
    pub async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        progress: &dyn DownloadProgress,
    ) -> Result<Option<DownloadSummary>> {
        let parsed = Url::parse(url)
            .map_err(|e| KbotError::validation(format!("invalid download URL '{url}': {e}")))?;
        let file_name = file_name_from_url(&parsed)?;
        let path = dest_dir.join(&file_name);

        if path.is_file() {
            debug!(path = %path.display(), "removing existing file");
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| KbotError::io(&path, e))?;
        }

        match self.transfer(parsed, &file_name, &path, progress).await {
            Ok(summary) => Ok(Some(summary)),
            Err(Failure::Status(status)) => {
                match status.canonical_reason() {
                    Some(reason) => error!(%url, "download failed because {reason}"),
                    None => error!(%url, "download failed with error code {}", status.as_u16()),
                }
                Ok(None)
            }
            Err(Failure::Transport(e)) => {
                error!(%url, "download failed because {e}");
                Ok(None)
            }
            Err(Failure::Local(e)) => Err(e),
        }
    }

    async fn transfer(
        &self,
        url: Url,
        file_name: &str,
        path: &Path,
        progress: &dyn DownloadProgress,
    ) -> std::result::Result<DownloadSummary, Failure> {
        let mut response = self.client.get(url).send().await.map_err(Failure::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Failure::Status(status));
        }

        let total = response.content_length();
        match total {
            Some(len) => info!(
                "downloading file size is {:.2}M",
                len as f64 / 1024.0 / 1024.0
            ),
            None => info!("server did not report a file size"),
        }

        let file = File::create(path)
            .await
            .map_err(|e| KbotError::io(path, e))?;
        let mut sink = ChunkedSink::new(file, path, total);

        let started_at = Local::now();
        let start = Instant::now();
        info!(
            "start downloading {file_name} at {}",
            started_at.format(TIMESTAMP_FORMAT)
        );
        progress.started(file_name, total);

        while let Some(bytes) = response.chunk().await.map_err(Failure::Transport)? {
            sink.push(&bytes, progress).await?;
        }
        let bytes = sink.finish(progress).await?;

        let finished_at = Local::now();
        let elapsed = start.elapsed();
        info!(
            "end downloading {file_name} at {}",
            finished_at.format(TIMESTAMP_FORMAT)
        );
        info!("totally spent {}", format_elapsed(elapsed));

        let summary = DownloadSummary {
            path: path.to_path_buf(),
            bytes,
            started_at,
            finished_at,
            elapsed,
        };
        progress.finished(&summary);
        Ok(summary)
    }
}

/// Buffers network reads and writes them out in [`CHUNK_SIZE`] pieces.
struct ChunkedSink<'a> {
    file: File,
    path: &'a Path,
    pending: Vec<u8>,
    written: u64,
    total: Option<u64>,
}

impl<'a> ChunkedSink<'a> {
    fn new(file: File, path: &'a Path, total: Option<u64>) -> Self {
        Self {
            file,
            path,
            pending: Vec::with_capacity(CHUNK_SIZE),
            written: 0,
            total,
        }
    }

    async fn push(&mut self, bytes: &[u8], progress: &dyn DownloadProgress) -> Result<()> {
        self.pending.extend_from_slice(bytes);
        while self.pending.len() >= CHUNK_SIZE {
            let rest = self.pending.split_off(CHUNK_SIZE);
            let chunk = std::mem::replace(&mut self.pending, rest);
            self.write(&chunk, progress).await?;
        }
        Ok(())
    }

    async fn finish(mut self, progress: &dyn DownloadProgress) -> Result<u64> {
        if !self.pending.is_empty() {
            let chunk = std::mem::take(&mut self.pending);
            self.write(&chunk, progress).await?;
        }
        self.file
            .flush()
            .await
            .map_err(|e| KbotError::io(self.path, e))?;
        Ok(self.written)
    }

    async fn write(&mut self, chunk: &[u8], progress: &dyn DownloadProgress) -> Result<()> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| KbotError::io(self.path, e))?;
        self.written += chunk.len() as u64;

        match self.total {
            Some(total) if total > 0 => debug!(
                "downloading... {:.2}%",
                self.written as f64 / total as f64 * 100.0
            ),
            _ => debug!(bytes = self.written, "downloading..."),
        }
        progress.advanced(self.written, self.total);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Local file name for a download: the URL's last path segment.
pub fn file_name_from_url(url: &Url) -> Result<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| KbotError::validation(format!("URL has no file name: {url}")))
}

/// Render a duration as `HH:MM:SS`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kbot-download-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    /// Records every progress callback.
    #[derive(Default)]
    struct Recorder {
        started: Mutex<Option<(String, Option<u64>)>>,
        steps: Mutex<Vec<u64>>,
        finished: Mutex<Option<u64>>,
    }

    impl DownloadProgress for Recorder {
        fn started(&self, file_name: &str, total: Option<u64>) {
            *self.started.lock().unwrap() = Some((file_name.to_string(), total));
        }
        fn advanced(&self, received: u64, _total: Option<u64>) {
            self.steps.lock().unwrap().push(received);
        }
        fn finished(&self, summary: &DownloadSummary) {
            *self.finished.lock().unwrap() = Some(summary.bytes);
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_file_name_from_url() {
        let url = Url::parse("http://download.example.com/work/tasks/1/kernel-3.10.0.x86_64.rpm")
            .unwrap();
        assert_eq!(file_name_from_url(&url).unwrap(), "kernel-3.10.0.x86_64.rpm");

        let url = Url::parse("http://download.example.com/work/").unwrap();
        assert!(file_name_from_url(&url).is_err());
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_elapsed(Duration::from_secs(3_725)), "01:02:05");
        assert_eq!(format_elapsed(Duration::from_millis(59_999)), "00:00:59");
    }

    #[tokio::test]
    async fn test_download_replaces_existing_file() {
        let server = MockServer::start().await;
        let body = payload(CHUNK_SIZE * 2 + 12_345);

        Mock::given(method("GET"))
            .and(path("/work/kernel.rpm"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = temp_dir();
        std::fs::write(dir.join("kernel.rpm"), b"stale content from an earlier run").unwrap();

        let recorder = Recorder::default();
        let url = format!("{}/work/kernel.rpm", server.uri());
        let summary = Downloader::new()
            .unwrap()
            .download(&url, &dir, &recorder)
            .await
            .unwrap()
            .expect("download should succeed");

        assert_eq!(summary.bytes, body.len() as u64);
        assert_eq!(std::fs::read(dir.join("kernel.rpm")).unwrap(), body);

        let started = recorder.started.lock().unwrap().clone();
        assert_eq!(started, Some(("kernel.rpm".to_string(), Some(body.len() as u64))));
        let steps = recorder.steps.lock().unwrap().clone();
        assert_eq!(
            steps,
            vec![CHUNK_SIZE as u64, 2 * CHUNK_SIZE as u64, body.len() as u64]
        );
        assert_eq!(*recorder.finished.lock().unwrap(), Some(body.len() as u64));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_download_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(Vec::<u8>::new()))
            .mount(&server)
            .await;

        let dir = temp_dir();
        let url = format!("{}/empty.rpm", server.uri());
        let summary = Downloader::new()
            .unwrap()
            .download(&url, &dir, &SilentProgress)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary.bytes, 0);
        assert!(std::fs::read(dir.join("empty.rpm")).unwrap().is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_http_error_is_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = temp_dir();
        std::fs::write(dir.join("missing.rpm"), b"old").unwrap();

        let url = format!("{}/missing.rpm", server.uri());
        let outcome = Downloader::new()
            .unwrap()
            .download(&url, &dir, &SilentProgress)
            .await
            .unwrap();

        assert!(outcome.is_none());
        // The stale file is removed before the request goes out.
        assert!(!dir.join("missing.rpm").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_transport_error_is_not_fatal() {
        let dir = temp_dir();
        let outcome = Downloader::new()
            .unwrap()
            .download("http://127.0.0.1:1/kernel.rpm", &dir, &SilentProgress)
            .await
            .unwrap();
        assert!(outcome.is_none());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_missing_destination_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload(10)))
            .mount(&server)
            .await;

        let dir = std::env::temp_dir().join(format!("kbot-missing-{}", uuid::Uuid::now_v7()));
        let url = format!("{}/kernel.rpm", server.uri());
        let err = Downloader::new()
            .unwrap()
            .download(&url, &dir, &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, KbotError::Io { .. }));
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let err = Downloader::new()
            .unwrap()
            .download("not a url", Path::new("."), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, KbotError::Validation { .. }));
    }
}
