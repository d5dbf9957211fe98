//! Thin CLI wiring (§6 "Configuration"), in the shape of `zeekoe`'s own
//! `src/cli.rs`: a `structopt`-derived surface that does only enough to
//! assemble a [`HarnessConfig`] and hand it to the coordinator. It does not
//! itself parse YAML test cases or render a report — those stay behind the
//! `testcase::Source` / `report::Renderer` seams.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use structopt::StructOpt;

use crate::config::{default_config_path, HarnessConfig, OutputFormat};

#[derive(Debug, StructOpt)]
#[structopt(name = "mash-conformance", about = "MASH protocol conformance test harness")]
pub struct Cli {
    /// Path to a Harness.toml configuration file; defaults to the
    /// platform config directory (`directories::ProjectDirs`).
    #[structopt(long, parse(from_os_str))]
    pub config: Option<PathBuf>,

    /// Address of the device under test.
    #[structopt(long)]
    pub target: Option<SocketAddr>,

    /// Commissioning mode hint passed through to the dialer/PASE layer.
    #[structopt(long)]
    pub mode: Option<String>,

    /// Directory of test-case files.
    #[structopt(long, parse(from_os_str))]
    pub test_dir: Option<PathBuf>,

    /// Glob pattern selecting which test cases to run within `test_dir`.
    #[structopt(long)]
    pub pattern: Option<String>,

    /// Per-invoke deadline, e.g. "30s" (`humantime` syntax).
    #[structopt(long)]
    pub timeout: Option<String>,

    /// Where to write the rendered report; stdout if omitted.
    #[structopt(long, parse(from_os_str))]
    pub output: Option<PathBuf>,

    /// Report output format.
    #[structopt(long)]
    pub output_format: Option<OutputFormatArg>,

    /// PICS (Protocol Implementation Conformance Statement) file path.
    #[structopt(long, parse(from_os_str))]
    pub pics_file: Option<PathBuf>,

    /// Setup code used for PASE commissioning.
    #[structopt(long)]
    pub setup_code: Option<String>,

    /// Enable key authorizing privileged TestControl triggers.
    #[structopt(long)]
    pub enable_key: Option<String>,

    /// Client TLS identity (cert+key) path.
    #[structopt(long, parse(from_os_str))]
    pub client_identity: Option<PathBuf>,

    /// Server TLS identity (cert+key) path.
    #[structopt(long, parse(from_os_str))]
    pub server_identity: Option<PathBuf>,

    /// Skip server certificate verification (debug builds only, §4.B).
    #[structopt(long)]
    pub insecure_skip_verify: bool,

    /// Enable verbose (debug-level) logging.
    #[structopt(long)]
    pub debug: bool,
}

/// A `FromStr`-able mirror of [`OutputFormat`] for `structopt` parsing.
#[derive(Debug, Clone, Copy)]
pub struct OutputFormatArg(pub OutputFormat);

impl std::str::FromStr for OutputFormatArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(OutputFormatArg(OutputFormat::Text)),
            "json" => Ok(OutputFormatArg(OutputFormat::Json)),
            "junit" => Ok(OutputFormatArg(OutputFormat::Junit)),
            other => Err(format!("unrecognized output format: {other}")),
        }
    }
}

impl Cli {
    /// Load the on-disk config (if any) and overlay CLI-supplied overrides
    /// on top, the way `zeekoe`'s `Config::load` is layered under its own
    /// `structopt` flags in `src/main.rs`.
    pub fn resolve_config(&self) -> Result<HarnessConfig, anyhow::Error> {
        let config_path = match &self.config {
            Some(path) => path.clone(),
            None => default_config_path()?,
        };

        let mut base = HarnessConfig::load(&config_path).unwrap_or(HarnessConfig {
            target: "127.0.0.1:4433".parse().unwrap(),
            mode: None,
            test_dir: PathBuf::from("tests"),
            pattern: None,
            timeout: Duration::from_secs(30),
            output: None,
            output_format: OutputFormat::Text,
            pics_file: None,
            setup_code: None,
            enable_key: None,
            client_identity: None,
            server_identity: None,
            insecure_skip_verify: false,
            debug: false,
        });

        if let Some(target) = self.target {
            base.target = target;
        }
        if let Some(mode) = &self.mode {
            base.mode = Some(mode.clone());
        }
        if let Some(test_dir) = &self.test_dir {
            base.test_dir = test_dir.clone();
        }
        if let Some(pattern) = &self.pattern {
            base.pattern = Some(pattern.clone());
        }
        if let Some(timeout_str) = &self.timeout {
            base.timeout = humantime::parse_duration(timeout_str)
                .map_err(|e| anyhow::anyhow!("invalid --timeout {timeout_str:?}: {e}"))?;
        }
        if let Some(output) = &self.output {
            base.output = Some(output.clone());
        }
        if let Some(format) = self.output_format {
            base.output_format = format.0;
        }
        if let Some(pics_file) = &self.pics_file {
            base.pics_file = Some(pics_file.clone());
        }
        if let Some(setup_code) = &self.setup_code {
            base.setup_code = Some(setup_code.clone());
        }
        if let Some(enable_key) = &self.enable_key {
            base.enable_key = Some(enable_key.clone());
        }
        if let Some(client_identity) = &self.client_identity {
            base.client_identity = Some(client_identity.clone());
        }
        if let Some(server_identity) = &self.server_identity {
            base.server_identity = Some(server_identity.clone());
        }
        base.insecure_skip_verify |= self.insecure_skip_verify;
        base.debug |= self.debug;

        Ok(base)
    }
}
