//! `discover` — captures a complete inventory of an OCI tenancy into a
//! single self-describing JSON snapshot (§6.1).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tracing::{error, info};

use oci_core::discovery::{CliRunner, OciCli, Orchestrator};
use oci_core::{init_tracing, level_from_flags, read_tenancy_ocid, SnapshotStore};

/// Tag namespaces ignored in every tenancy discovery run (§3.1).
const IGNORED_TAG_NAMESPACES: &[&str] = &["Oracle-Tags"];

const DEFAULT_CLI_BINARY: &str = "oci";

#[derive(Parser)]
#[command(name = "discover")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Capture a complete inventory of an OCI tenancy into a JSON snapshot")]
struct Cli {
    /// OCI CLI profile to use
    #[arg(short = 'p', long, env = "OCI_PROFILE", default_value = "DEFAULT")]
    profile: String,

    /// Path to the OCI CLI config file
    #[arg(short = 'c', long, env = "OCI_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Snapshot output file path
    #[arg(short = 'o', long, env = "OCI_SNAPSHOT_OUTPUT")]
    output: Option<PathBuf>,

    /// Read timeout (seconds) for each OCI CLI invocation; 0 means the CLI's own default
    #[arg(short = 't', long, default_value_t = 0)]
    timeout: u64,

    /// Only emit ERROR-level logs
    #[arg(short = 'q', long, conflicts_with = "verbose")]
    quiet: bool,

    /// Emit DEBUG-level logs
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Emit newline-delimited JSON log lines
    #[arg(long, env = "OCI_LOG_FORMAT")]
    json: bool,
}

fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".oci").join("config")
}

fn default_output_path(profile: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d%H%M%S");
    let file_name = format!("snapshot-{}-{stamp}.json", profile.to_lowercase());
    let script_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    script_dir.join(file_name)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let level = level_from_flags(cli.quiet, cli.verbose);
    init_tracing(cli.json, level);

    match run(cli).await {
        Ok(0) => std::process::exit(0),
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!("Error: {err:#}");
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let output_path = cli.output.unwrap_or_else(|| default_output_path(&cli.profile));

    let tenancy_ocid = read_tenancy_ocid(&config_path, &cli.profile)
        .context("unable to discover tenancy OCID")?;
    info!(event = "discover.start", profile = %cli.profile, output = %output_path.display());

    let cli_runner: Arc<dyn OciCli> = Arc::new(CliRunner {
        cli_binary: DEFAULT_CLI_BINARY.to_string(),
        profile: cli.profile.clone(),
        read_timeout: if cli.timeout == 0 {
            None
        } else {
            Some(std::time::Duration::from_secs(cli.timeout))
        },
    });

    let store = SnapshotStore::new(&output_path);
    let ignored: Vec<String> = IGNORED_TAG_NAMESPACES.iter().map(|s| s.to_string()).collect();

    let orchestrator = Orchestrator::new(cli_runner, store, cli.profile.clone(), tenancy_ocid, ignored);
    let exit_code = orchestrator.run().await.context("discovery run failed")?;

    if exit_code == 0 {
        info!(event = "discover.finished", output = %output_path.display());
    } else {
        info!(event = "discover.finished_with_partial_failures", output = %output_path.display());
    }

    Ok(exit_code)
}
