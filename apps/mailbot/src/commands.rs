//! CLI definition, tracing setup, and the report command.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Result;
use kbot_core::{MailConfig, MailOutcome, send_report};
use kbot_shared::{AppConfig, load_config, load_config_from};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// mailbot: mail the owner of a kernel build its CI test report.
#[derive(Parser)]
#[command(
    name = "mailbot",
    version,
    about = "Compose a CI test report from JUnit result files and mail it to the build owner.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Directory holding the JUnit result files.
    #[arg(long)]
    pub path: PathBuf,

    /// Sender address; the owner's address uses its domain.
    #[arg(long)]
    pub mail: String,

    /// SMTP relay, host or host:port.
    #[arg(long)]
    pub smtp: String,

    /// Build task URL prefix; the task ID is appended.
    #[arg(long)]
    pub task: String,

    /// Hypervisor platform code (1 = Hyper-V, 2 = ESXi, 3 = both).
    #[arg(long)]
    pub hv: String,

    /// Print the composed message instead of sending it.
    #[arg(long)]
    pub dry_run: bool,

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

    let filter = match cli.verbose {
        0 => "mailbot=info,kbot=info",
        1 => "mailbot=debug,kbot=debug",
        _ => "mailbot=trace,kbot=trace",
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
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    debug!(config = %serde_json::to_string(&config)?, "resolved config");
    Ok(config)
}

/// Compose and send the report.
///
/// An empty or malformed result set is logged and the run still succeeds,
/// so a surrounding CI job can go on with its cleanup.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;

    let mail = MailConfig {
        results_dir: cli.path,
        sender: cli.mail,
        relay: cli.smtp,
        task_url: cli.task,
        platform_code: cli.hv,
        dry_run: cli.dry_run,
        report: config.report,
    };

    match send_report(&mail).await {
        Ok(MailOutcome::Sent(report)) => {
            info!(to = %report.to, cc = %report.cc, subject = %report.subject, "report mailed");
            Ok(())
        }
        Ok(MailOutcome::DryRun { rendered, .. }) => {
            println!("{rendered}");
            Ok(())
        }
        Err(e) if e.is_empty_result() => {
            warn!(error = %e, "sending email fail, no usable results");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
