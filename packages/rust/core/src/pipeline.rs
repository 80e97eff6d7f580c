//! End-to-end flows.
//!
//! - `fetch_kernel`: build name + task → artifact URLs → (optionally) files on disk.
//! - `send_report`: result directory → metadata → composed report → email.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{error, info, instrument, warn};
use url::Url;

use kbot_brew::BrewClient;
use kbot_download::{DownloadProgress, DownloadSummary, Downloader};
use kbot_report::{ComposeOptions, Report};
use kbot_shared::{BrewConfig, KbotError, ReportConfig, Result};

// ---------------------------------------------------------------------------
// Kernel fetch
// ---------------------------------------------------------------------------

/// Configuration for `fetch_kernel`.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Build name, e.g. `kernel-3.10.0-825.el7`.
    pub name: String,
    /// Hub XML-RPC endpoint.
    pub api: Url,
    /// Parent build task.
    pub task_id: i64,
    /// Download the resolved artifacts.
    pub download: bool,
    /// Destination directory for downloads.
    pub dest: PathBuf,
    /// Log build metadata, tags, and bug IDs first.
    pub info: bool,
    pub brew: BrewConfig,
}

/// What `fetch_kernel` resolved and fetched.
#[derive(Debug, Default)]
pub struct FetchResult {
    /// Resolved artifact URLs, in hub order.
    pub urls: Vec<String>,
    /// Completed downloads.
    pub downloaded: Vec<DownloadSummary>,
    /// URLs whose download failed remotely.
    pub failed: Vec<String>,
}

/// Resolve the build's artifact URLs and optionally download them.
#[instrument(skip_all, fields(build = %config.name, task_id = config.task_id))]
pub async fn fetch_kernel(
    config: &FetchConfig,
    progress: &dyn DownloadProgress,
) -> Result<FetchResult> {
    let start = Instant::now();
    let client = BrewClient::new(&config.name, config.api.clone(), config.brew.clone())?;

    if config.info {
        log_build_info(&client).await?;
    }

    let mut result = FetchResult {
        urls: client.download_urls(config.task_id).await?,
        ..Default::default()
    };

    if config.download {
        let downloader = Downloader::new()?;
        for url in &result.urls {
            match downloader.download(url, &config.dest, progress).await? {
                Some(summary) => result.downloaded.push(summary),
                None => result.failed.push(url.clone()),
            }
        }
    }

    info!(
        urls = result.urls.len(),
        downloaded = result.downloaded.len(),
        failed = result.failed.len(),
        elapsed_ms = start.elapsed().as_millis(),
        "fetch complete"
    );
    Ok(result)
}

async fn log_build_info(client: &BrewClient) -> Result<()> {
    let build = client.build().await?;
    info!(
        id = build.id,
        nvr = %build.nvr,
        owner = %build.owner,
        task_id = ?build.task_id,
        start_time = %build.start_time,
        "build"
    );

    let tags = client.tags().await?;
    info!(?tags, "tags");

    match client.bugs().await {
        Ok(bugs) => info!(?bugs, "bugs"),
        Err(KbotError::NoChangelogEntry { .. }) => warn!("no changelog entry, no bug IDs"),
        Err(e) => return Err(e),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Report mail
// ---------------------------------------------------------------------------

/// Configuration for `send_report`.
#[derive(Debug, Clone)]
pub struct MailConfig {
    /// Directory holding the result files.
    pub results_dir: PathBuf,
    /// Sender address.
    pub sender: String,
    /// SMTP relay, `host` or `host:port`.
    pub relay: String,
    /// Task URL prefix; the task id is appended.
    pub task_url: String,
    /// Hypervisor platform code.
    pub platform_code: String,
    /// Compose and render only.
    pub dry_run: bool,
    pub report: ReportConfig,
}

/// How `send_report` finished.
#[derive(Debug)]
pub enum MailOutcome {
    Sent(Report),
    /// Not sent; carries the rendered message.
    DryRun { report: Report, rendered: String },
}

/// Scan results, compose the owner report, and mail it.
///
/// An empty or malformed result set is an error here; callers decide whether
/// to treat it as fatal (see `KbotError::is_empty_result`).
#[instrument(skip_all, fields(dir = %config.results_dir.display()))]
pub async fn send_report(config: &MailConfig) -> Result<MailOutcome> {
    let metadata = kbot_report::scan(&config.results_dir, &config.report.hypervisors)?;
    if metadata.is_empty() {
        return Err(KbotError::NoResults {
            path: config.results_dir.clone(),
        });
    }
    info!(files = metadata.len(), "results collected");

    let opts = ComposeOptions {
        sender: &config.sender,
        task_url: &config.task_url,
        platform_code: &config.platform_code,
        platforms: &config.report.platforms,
    };
    let report = kbot_report::compose(&metadata, &opts)?;
    info!(to = %report.to, subject = %report.subject, "report composed");

    let message = kbot_report::build_message(&report)?;
    if config.dry_run {
        let rendered = String::from_utf8_lossy(&message.formatted()).into_owned();
        return Ok(MailOutcome::DryRun { report, rendered });
    }

    if let Err(e) = kbot_report::send(message, &config.relay).await {
        error!(error = %e, relay = %config.relay, "sending email failed");
        return Err(e);
    }
    Ok(MailOutcome::Sent(report))
}
