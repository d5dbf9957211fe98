//! Process-wide configuration (§6 "Configuration"; ambient, out of scope
//! for the spec's own component table but specified here in the teacher's
//! idiom: `directories` for the config-dir lookup, `toml` + `serde` for the
//! file itself, CLI flags layered on top in `cli.rs`).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

pub const ORGANIZATION: &str = "MASH Conformance Working Group";
pub const APPLICATION: &str = "mash-conformance";
pub const CONFIG_FILE: &str = "Harness.toml";

fn project_dirs() -> Result<ProjectDirs, anyhow::Error> {
    ProjectDirs::from("", ORGANIZATION, APPLICATION)
        .ok_or_else(|| anyhow::anyhow!("could not determine the user's home directory"))
}

pub fn default_config_path() -> Result<PathBuf, anyhow::Error> {
    Ok(project_dirs()?.config_dir().join(CONFIG_FILE))
}

/// `output_format` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Text,
    Json,
    Junit,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Text
    }
}

/// Process-wide recognized configuration keys (§6). Every field here
/// corresponds 1:1 to the spec's configuration table; no additional keys
/// are invented.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub target: SocketAddr,
    #[serde(default)]
    pub mode: Option<String>,
    pub test_dir: PathBuf,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub pics_file: Option<PathBuf>,
    #[serde(default)]
    pub setup_code: Option<String>,
    #[serde(default)]
    pub enable_key: Option<String>,
    #[serde(default)]
    pub client_identity: Option<PathBuf>,
    #[serde(default)]
    pub server_identity: Option<PathBuf>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    #[serde(default)]
    pub debug: bool,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl HarnessConfig {
    pub fn load(path: &Path) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
        let config: HarnessConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Whether a DUT reset target + enable-key are both configured, the
    /// precondition for baseline snapshot/reset behavior throughout the
    /// coordinator (§4.I steps 3, 15, TeardownTest step 1).
    pub fn reset_configured(&self) -> bool {
        self.enable_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}
