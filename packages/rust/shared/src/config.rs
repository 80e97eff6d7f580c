//! Application configuration for kbot.
//!
//! User config lives at `~/.kbot/kbot.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KbotError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "kbot.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".kbot";

// ---------------------------------------------------------------------------
// Config structs (matching kbot.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Build service settings.
    #[serde(default)]
    pub brew: BrewConfig,

    /// Test report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// `[brew]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrewConfig {
    /// Prefix joined with a task result path to form a download URL.
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,

    /// Architecture of the sub-task whose artifacts are downloaded.
    #[serde(default = "default_arch")]
    pub arch: String,
}

impl Default for BrewConfig {
    fn default() -> Self {
        Self {
            url_prefix: default_url_prefix(),
            arch: default_arch(),
        }
    }
}

fn default_url_prefix() -> String {
    "http://download.eng.bos.redhat.com/brewroot/work/".into()
}
fn default_arch() -> String {
    "x86_64".into()
}

/// `[report]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Host identifier (as found in result file names) to display name.
    #[serde(default = "default_hypervisors")]
    pub hypervisors: BTreeMap<String, String>,

    /// Hypervisor platform code (`--hv`) to the label used in the subject.
    #[serde(default = "default_platforms")]
    pub platforms: BTreeMap<String, String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            hypervisors: default_hypervisors(),
            platforms: default_platforms(),
        }
    }
}

fn default_hypervisors() -> BTreeMap<String, String> {
    [
        ("2016-AUTO", "Windows Server 2016"),
        ("2012R2-AUTO", "Windows Server 2012R2"),
        ("2012-72-132", "Windows Server 2012"),
        ("10.73.196.97", "VMWare ESXi 6.7"),
        ("10.73.72.129", "VMWare ESXi 6.5"),
        ("10.73.196.236", "VMWare ESXi 6.0"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_platforms() -> BTreeMap<String, String> {
    [("1", "Hyper-V"), ("2", "ESXi"), ("3", "Hyper-V and ESXi")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.kbot/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| KbotError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.kbot/kbot.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| KbotError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| KbotError::config(format!("failed to parse {}: {e}", path.display())))
}
