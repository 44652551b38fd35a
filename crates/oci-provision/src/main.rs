//! `instance-provision` — launches exactly one compute instance across a
//! rotating set of availability domains, retrying through capacity,
//! throttle, and transient failures (§6.2).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use oci_core::discovery::{CliRunner, OciCli};
use oci_core::provisioning::{discover_availability_domains, render_all_specs, LaunchCli, ProvisionOutcome, ProvisioningEngine};
use oci_core::{init_tracing, level_from_flags, resolve_lock_base_dir, CliError, OciError, ProcessLock};

const DEFAULT_CLI_BINARY: &str = "oci";
const SCRIPT_NAME: &str = "instance-provision";

#[derive(Parser)]
#[command(name = "instance-provision")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Launch a compute instance across a rotating set of availability domains")]
struct Cli {
    /// Path to the launch spec template (JSON, may contain {{AD_NUMBER}})
    #[arg(short = 's', long)]
    spec: PathBuf,

    /// OCI CLI profile to use
    #[arg(short = 'p', long, env = "OCI_PROFILE", default_value = "DEFAULT")]
    profile: String,

    /// Path to the OCI CLI config file
    #[arg(short = 'c', long, env = "OCI_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Write the launched instance JSON here instead of stdout
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Read timeout (seconds) for each OCI CLI invocation; 0 means the CLI's own default
    #[arg(short = 't', long, default_value_t = 0)]
    timeout: u64,

    /// Render specs and log the commands that would run, without launching
    #[arg(long)]
    dry_run: bool,

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

/// Drives `oci compute instance launch --from-json file://<rendered spec>`
/// for one availability domain.
struct LaunchRunner {
    cli_binary: String,
    profile: String,
    read_timeout: Option<std::time::Duration>,
}

#[async_trait::async_trait]
impl LaunchCli for LaunchRunner {
    async fn launch(
        &self,
        _ad: u32,
        spec_path: &std::path::Path,
    ) -> std::result::Result<serde_json::Value, CliError> {
        let args = vec![
            "compute".to_string(),
            "instance".to_string(),
            "launch".to_string(),
            "--from-json".to_string(),
            format!("file://{}", spec_path.display()),
        ];
        oci_core::invoke(&self.cli_binary, &args, &self.profile, self.read_timeout).await
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let level = level_from_flags(cli.quiet, cli.verbose);
    init_tracing(cli.json, level);

    let result = tokio::select! {
        result = run(cli) => result,
        _ = sigterm() => {
            info!(event = "provision.signal", signal = "SIGTERM");
            std::process::exit(143);
        }
        _ = sigint() => {
            info!(event = "provision.signal", signal = "SIGINT");
            std::process::exit(130);
        }
    };

    match result {
        Ok(0) => std::process::exit(0),
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!("Error: {err:#}");
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}

#[cfg(unix)]
async fn sigterm() {
    let mut stream = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    stream.recv().await;
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}

async fn sigint() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn run(cli: Cli) -> Result<i32> {
    let template = std::fs::read_to_string(&cli.spec)
        .with_context(|| format!("unable to read launch spec {}", cli.spec.display()))?;
    serde_json::from_str::<serde_json::Value>(&template)
        .context("launch spec is not valid JSON")?;

    let base_dir = resolve_lock_base_dir();
    let _lock = ProcessLock::acquire(&base_dir, SCRIPT_NAME).map_err(|err| match err {
        OciError::LockHeld(pid) => {
            anyhow::anyhow!("another instance is already running (PID {pid})")
        }
        other => other.into(),
    })?;

    let cli_runner: std::sync::Arc<dyn OciCli> = std::sync::Arc::new(CliRunner {
        cli_binary: DEFAULT_CLI_BINARY.to_string(),
        profile: cli.profile.clone(),
        read_timeout: if cli.timeout == 0 {
            None
        } else {
            Some(std::time::Duration::from_secs(cli.timeout))
        },
    });

    let ads = discover_availability_domains(cli_runner.as_ref())
        .await
        .context("unable to enumerate availability domains")?;
    info!(event = "provision.ads_discovered", count = ads.len());

    let spec_dir = std::env::temp_dir();
    let rendered = render_all_specs(&template, &ads, &spec_dir).context("invalid launch spec template")?;
    let spec_paths: std::collections::HashMap<u32, PathBuf> = rendered
        .iter()
        .map(|(&ad, (_, tmp))| (ad, tmp.path().to_path_buf()))
        .collect();

    if cli.dry_run {
        for ad in &ads {
            let (value, _) = &rendered[ad];
            info!(event = "provision.dry_run_spec", ad = ad, spec = %value);
            info!(
                event = "provision.dry_run_command",
                ad = ad,
                command = format!(
                    "oci compute instance launch --from-json file://{} --profile {}",
                    spec_paths[ad].display(),
                    cli.profile
                )
            );
        }
        return Ok(0);
    }

    let read_timeout = if cli.timeout == 0 {
        None
    } else {
        Some(std::time::Duration::from_secs(cli.timeout))
    };
    let launch_runner = LaunchRunner {
        cli_binary: DEFAULT_CLI_BINARY.to_string(),
        profile: cli.profile.clone(),
        read_timeout,
    };

    let engine = ProvisioningEngine::new(&launch_runner, ads, spec_paths);
    let outcome = engine.run().await?;

    match outcome {
        ProvisionOutcome::Launched(instance) => {
            let rendered = serde_json::to_string_pretty(&instance)?;
            match &cli.output {
                Some(path) => std::fs::write(path, &rendered)
                    .with_context(|| format!("unable to write instance JSON to {}", path.display()))?,
                None => println!("{rendered}"),
            }
            info!(event = "provision.launched");
            Ok(0)
        }
        ProvisionOutcome::DryRun => Ok(0),
    }
}
