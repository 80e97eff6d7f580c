//! CLI definition, tracing setup, and the fetch command.

use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use kbot_core::{FetchConfig, fetch_kernel};
use kbot_download::{DownloadProgress, DownloadSummary};
use kbot_shared::{AppConfig, load_config, load_config_from};
use tracing::{debug, info};
use url::Url;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// kbot: find a kernel build's RPMs on Brew and download them.
#[derive(Parser)]
#[command(
    name = "kbot",
    version,
    about = "Resolve the RPMs a Brew build task produced and optionally download them.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Build name, e.g. kernel-3.10.0-825.el7.
    pub kernel_name: String,

    /// Brew hub XML-RPC endpoint.
    pub brew_api: String,

    /// Parent build task ID.
    #[arg(long)]
    pub id: i64,

    /// Download the resolved RPMs.
    #[arg(long)]
    pub download: bool,

    /// Download directory.
    #[arg(long, default_value = "./")]
    pub path: PathBuf,

    /// Log build metadata, tags, and bug IDs first.
    #[arg(long)]
    pub info: bool,

    /// Sub-task architecture (overrides config).
    #[arg(long)]
    pub arch: Option<String>,

    /// Download URL prefix (overrides config).
    #[arg(long)]
    pub url_prefix: Option<String>,

    /// Config file (defaults to ~/.kbot/kbot.toml).
    #[arg(long, env = "KBOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    // `kbot` also matches the `kbot_*` library targets.
    let filter = match cli.verbose {
        0 => "kbot=info",
        1 => "kbot=debug",
        _ => "kbot=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(arch) = &cli.arch {
        config.brew.arch = arch.clone();
    }
    if let Some(prefix) = &cli.url_prefix {
        config.brew.url_prefix = prefix.clone();
    }
    debug!(config = %serde_json::to_string(&config)?, "resolved config");
    Ok(config)
}

/// Resolve, print, and optionally download the build's RPMs.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;

    let api = Url::parse(&cli.brew_api)
        .map_err(|e| eyre!("invalid Brew API URL '{}': {e}", cli.brew_api))?;

    let fetch = FetchConfig {
        name: cli.kernel_name.clone(),
        api,
        task_id: cli.id,
        download: cli.download,
        dest: cli.path.clone(),
        info: cli.info,
        brew: config.brew,
    };

    info!(build = %fetch.name, task_id = fetch.task_id, "resolving RPMs");

    let reporter = CliProgress::new();
    let result = fetch_kernel(&fetch, &reporter).await?;

    for url in &result.urls {
        println!("{url}");
    }

    if cli.download {
        println!();
        for summary in &result.downloaded {
            println!(
                "  {}  {} bytes  {:.1}s",
                summary.path.display(),
                summary.bytes,
                summary.elapsed.as_secs_f64()
            );
        }
        for url in &result.failed {
            println!("  failed: {url}");
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Download progress on an indicatif bar, one bar per file.
struct CliProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliProgress {
    fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn style(sized: bool) -> ProgressStyle {
        let template = if sized {
            "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})"
        } else {
            "{spinner:.cyan} {msg} {bytes}"
        };
        ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    }
}

impl DownloadProgress for CliProgress {
    fn started(&self, file_name: &str, total: Option<u64>) {
        let bar = match total {
            Some(len) => ProgressBar::new(len),
            None => ProgressBar::no_length(),
        };
        bar.set_style(Self::style(total.is_some()));
        bar.set_message(file_name.to_string());
        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(bar);
        }
    }

    fn advanced(&self, received: u64, _total: Option<u64>) {
        if let Some(bar) = self.bar.lock().ok().as_deref().and_then(Option::as_ref) {
            bar.set_position(received);
        }
    }

    fn finished(&self, summary: &DownloadSummary) {
        let bar = self.bar.lock().ok().and_then(|mut slot| slot.take());
        if let Some(bar) = bar {
            bar.finish_with_message(format!("{} done", summary.path.display()));
        }
    }
}
