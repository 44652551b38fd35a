//! Discovery Orchestrator — drives the extraction phases, fans out
//! section extractors concurrently within a phase, and aggregates
//! partial failures without aborting the run.
//!
//! Grounded on `aivcs-core::parallel::fork_agent_parallel`'s
//! `tokio::spawn` + collect-`JoinHandle`s shape, generalised from "spawn
//! N identical fork tasks" to "spawn a named list of distinct per-section
//! extractor futures, one phase at a time".

pub mod certs;
pub mod dns;
pub mod iam;
pub mod network;
pub mod storage;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::cli_invoke::{self, CliError};
use crate::error::{OciError, Result};
use crate::events;
use crate::snapshot::SnapshotStore;

/// Abstraction over "run the OCI CLI with these args and get JSON or a
/// structured error back". Lets section extractors be driven by a fake
/// implementation in tests instead of a real subprocess.
#[async_trait::async_trait]
pub trait OciCli: Send + Sync {
    async fn invoke(&self, args: Vec<String>) -> std::result::Result<Value, CliError>;
}

/// The production [`OciCli`], backed by a real subprocess invocation of
/// the external OCI CLI binary.
pub struct CliRunner {
    pub cli_binary: String,
    pub profile: String,
    pub read_timeout: Option<Duration>,
}

#[async_trait::async_trait]
impl OciCli for CliRunner {
    async fn invoke(&self, args: Vec<String>) -> std::result::Result<Value, CliError> {
        cli_invoke::invoke(&self.cli_binary, &args, &self.profile, self.read_timeout).await
    }
}

/// The result of one section extractor: the JSON fragment to splice into
/// the snapshot at the section's pointer, an exit code (`0` iff every
/// nested fetch within the section succeeded), and the ordered
/// diagnostics describing any partial failures (§4.3, §7).
#[derive(Debug, Clone)]
pub struct ExtractorOutcome {
    pub fragment: Value,
    pub exit_code: i32,
    pub diagnostics: Vec<String>,
}

impl ExtractorOutcome {
    /// A clean outcome: no diagnostics, exit code 0.
    pub fn ok(fragment: Value) -> Self {
        Self {
            fragment,
            exit_code: 0,
            diagnostics: Vec::new(),
        }
    }

    /// Build an outcome from an array fragment plus an exit code and
    /// diagnostics collected by [`collect_over_ids`] / [`attach_children`].
    pub fn from_array(items: Vec<Value>, exit_code: i32, diagnostics: Vec<String>) -> Self {
        Self {
            fragment: Value::Array(items),
            exit_code,
            diagnostics,
        }
    }

    /// Newline-joined diagnostic message, per §7's log line convention.
    pub fn message(&self) -> String {
        self.diagnostics.join("\n")
    }
}

/// Run `list_fn` once per id in `ids`, flattening each call's array
/// result. A failure for one id appends a diagnostic line and continues
/// with the remaining ids (§4.3): the loop never aborts early, and the
/// returned exit code is `0` iff every id succeeded.
pub async fn collect_over_ids<F, Fut>(ids: &[String], mut list_fn: F) -> (Vec<Value>, i32, Vec<String>)
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = std::result::Result<Vec<Value>, CliError>>,
{
    let mut items = Vec::new();
    let mut diagnostics = Vec::new();

    for id in ids {
        match list_fn(id.clone()).await {
            Ok(mut found) => items.append(&mut found),
            Err(e) => diagnostics.push(format!("unable to list resources for {id}: {e}")),
        }
    }

    let exit_code = if diagnostics.is_empty() { 0 } else { 1 };
    (items, exit_code, diagnostics)
}

/// For each object in `parents`, fetch its `key` children and nest them
/// under that key. A failed child fetch for one parent yields an empty
/// array for that parent (never omission, per §3.1's invariant) and
/// appends a diagnostic; the loop continues to the remaining parents.
pub async fn attach_children<F, Fut>(parents: &mut [Value], key: &str, mut fetch_children: F) -> (i32, Vec<String>)
where
    F: FnMut(&Value) -> Fut,
    Fut: Future<Output = std::result::Result<Vec<Value>, CliError>>,
{
    let mut diagnostics = Vec::new();

    for parent in parents.iter_mut() {
        let result = fetch_children(parent).await;
        let (children, failure) = match result {
            Ok(children) => (children, None),
            Err(e) => (Vec::new(), Some(e)),
        };

        if let Some(obj) = parent.as_object_mut() {
            obj.insert(key.to_string(), Value::Array(children));
        }

        if let Some(e) = failure {
            let parent_id = parent.get("id").and_then(Value::as_str).unwrap_or("<unknown>");
            diagnostics.push(format!("unable to list {key} for {parent_id}: {e}"));
        }
    }

    let exit_code = if diagnostics.is_empty() { 0 } else { 1 };
    (exit_code, diagnostics)
}

type BoxedExtraction = Pin<Box<dyn Future<Output = Result<ExtractorOutcome>> + Send>>;

/// One dispatched unit of work within a phase: a label (for logging) and
/// the JSON pointer its result splices into.
pub struct Job {
    pub label: &'static str,
    pub pointer: &'static str,
    pub work: BoxedExtraction,
}

impl Job {
    pub fn new(
        label: &'static str,
        pointer: &'static str,
        work: impl Future<Output = Result<ExtractorOutcome>> + Send + 'static,
    ) -> Self {
        Self {
            label,
            pointer,
            work: Box::pin(work),
        }
    }
}

/// Drives the ordered discovery phases against a snapshot store.
pub struct Orchestrator {
    cli: Arc<dyn OciCli>,
    store: SnapshotStore,
    profile: String,
    tenancy_ocid: String,
    ignored_namespaces: Vec<String>,
}

impl Orchestrator {
    pub fn new(
        cli: Arc<dyn OciCli>,
        store: SnapshotStore,
        profile: impl Into<String>,
        tenancy_ocid: impl Into<String>,
        ignored_namespaces: Vec<String>,
    ) -> Self {
        Self {
            cli,
            store,
            profile: profile.into(),
            tenancy_ocid: tenancy_ocid.into(),
            ignored_namespaces,
        }
    }

    /// Run all phases in order. Returns the combined exit code: `0` iff
    /// every section in every phase returned `0`.
    pub async fn run(&self) -> Result<i32> {
        self.store
            .init(&self.profile, &self.tenancy_ocid, &self.ignored_namespaces)
            .await?;

        let mut any_failed = false;

        // Phase: tenancy metadata (sequential).
        events::emit_phase_started("tenancy");
        let tenancy_start = Instant::now();
        let outcome = iam::capture_tenancy_metadata(self.cli.as_ref(), &self.tenancy_ocid).await?;
        self.store.write_section(".iam.tenancy", outcome.fragment.clone()).await?;
        events::emit_section_finished("tenancy", outcome.exit_code, Some(&outcome.message()));
        any_failed |= outcome.exit_code != 0;
        events::emit_phase_finished("tenancy", tenancy_start.elapsed().as_millis() as u64, if outcome.exit_code != 0 { 1 } else { 0 });

        // Phase: IAM (concurrent).
        let tenancy_id = self.tenancy_ocid.clone();
        let cli = Arc::clone(&self.cli);
        let ns = self.ignored_namespaces.clone();
        let jobs = vec![
            Job::new("tags", ".iam.\"tag-namespaces\"", {
                let cli = Arc::clone(&cli);
                let tenancy_id = tenancy_id.clone();
                async move { iam::extract_tag_namespaces(cli.as_ref(), &tenancy_id, &ns).await }
            }),
            Job::new("policies", ".iam.policies", {
                let cli = Arc::clone(&cli);
                let tenancy_id = tenancy_id.clone();
                async move { iam::extract_policies(cli.as_ref(), &[tenancy_id]).await }
            }),
            Job::new("users", ".iam.users", {
                let cli = Arc::clone(&cli);
                let tenancy_id = tenancy_id.clone();
                async move { iam::extract_users(cli.as_ref(), &tenancy_id).await }
            }),
            Job::new("groups", ".iam.groups", {
                let cli = Arc::clone(&cli);
                let tenancy_id = tenancy_id.clone();
                async move { iam::extract_groups(cli.as_ref(), &tenancy_id).await }
            }),
            Job::new("dynamic-groups", ".iam.\"dynamic-groups\"", {
                let cli = Arc::clone(&cli);
                let tenancy_id = tenancy_id.clone();
                async move { iam::extract_dynamic_groups(cli.as_ref(), &tenancy_id).await }
            }),
            Job::new("identity-domains", ".iam.\"identity-domains\"", {
                let cli = Arc::clone(&cli);
                let tenancy_id = tenancy_id.clone();
                async move { iam::extract_identity_domains(cli.as_ref(), &tenancy_id).await }
            }),
            Job::new("compartments", ".iam.compartments", {
                let cli = Arc::clone(&cli);
                let tenancy_id = tenancy_id.clone();
                async move { iam::extract_compartments(cli.as_ref(), &tenancy_id).await }
            }),
        ];
        any_failed |= self.dispatch_phase("iam", jobs).await?;

        // Network phase (concurrent) reads the compartment set written by
        // the IAM phase's `compartments` section.
        let compartment_ids = self.store.read_compartment_ids().await?;
        let jobs = vec![
            Job::new("vcns", ".network.vcns", {
                let cli = Arc::clone(&cli);
                let ids = compartment_ids.clone();
                async move { network::extract_vcns(cli.as_ref(), &ids).await }
            }),
            Job::new("drgs", ".network.drgs", {
                let cli = Arc::clone(&cli);
                let ids = compartment_ids.clone();
                async move { network::extract_drgs(cli.as_ref(), &ids).await }
            }),
            Job::new("nsgs", ".network.nsgs", {
                let cli = Arc::clone(&cli);
                let ids = compartment_ids.clone();
                async move { network::extract_nsgs(cli.as_ref(), &ids).await }
            }),
            Job::new("public-ips", ".network.\"public-ips\"", {
                let cli = Arc::clone(&cli);
                let ids = compartment_ids.clone();
                async move { network::extract_public_ips(cli.as_ref(), &ids).await }
            }),
            Job::new("load-balancers", ".network.\"load-balancers\"", {
                let cli = Arc::clone(&cli);
                let ids = compartment_ids.clone();
                async move { network::extract_load_balancers(cli.as_ref(), &ids).await }
            }),
        ];
        any_failed |= self.dispatch_phase("network", jobs).await?;

        // DNS (sequential).
        let outcome = dns::extract_zones(self.cli.as_ref(), &compartment_ids).await?;
        self.store.write_section(".dns.zones", outcome.fragment.clone()).await?;
        events::emit_section_finished("dns", outcome.exit_code, Some(&outcome.message()));
        any_failed |= outcome.exit_code != 0;

        // Certificates (sequential).
        let outcome = certs::extract_certificates(self.cli.as_ref(), &compartment_ids).await?;
        self.store
            .write_section(".certificates.\"ssl-certificates\"", outcome.fragment.clone())
            .await?;
        events::emit_section_finished("certificates", outcome.exit_code, Some(&outcome.message()));
        any_failed |= outcome.exit_code != 0;

        // Object storage buckets (sequential).
        let outcome = storage::extract_buckets(self.cli.as_ref(), &compartment_ids).await?;
        self.store.write_section(".storage.buckets", outcome.fragment.clone()).await?;
        events::emit_section_finished("storage", outcome.exit_code, Some(&outcome.message()));
        any_failed |= outcome.exit_code != 0;

        Ok(if any_failed { 1 } else { 0 })
    }

    /// Spawn every job in `jobs` as its own task, wait for all of them
    /// (fan-out/fan-in), splice each result into the snapshot, and log a
    /// success/failure line per section. A task's panic or error does not
    /// cancel its siblings. Returns whether any section in this phase
    /// failed.
    async fn dispatch_phase(&self, phase: &str, jobs: Vec<Job>) -> Result<bool> {
        events::emit_phase_started(phase);
        let start = Instant::now();

        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let label = job.label;
            let pointer = job.pointer;
            let work = job.work;
            handles.push(tokio::spawn(async move { (label, pointer, work.await) }));
        }

        let mut any_failed = false;
        let mut failed_sections = 0usize;

        for handle in handles {
            let (label, pointer, result) = handle
                .await
                .map_err(|e| OciError::SpliceFailed { pointer: phase.to_string(), reason: e.to_string() })?;

            match result {
                Ok(outcome) => {
                    self.store.write_section(pointer, outcome.fragment.clone()).await?;
                    let message = outcome.message();
                    events::emit_section_finished(label, outcome.exit_code, Some(&message));
                    if outcome.exit_code != 0 {
                        any_failed = true;
                        failed_sections += 1;
                    }
                }
                Err(e) => {
                    any_failed = true;
                    failed_sections += 1;
                    events::emit_section_finished(label, 1, Some(&e.to_string()));
                }
            }
        }

        events::emit_phase_finished(phase, start.elapsed().as_millis() as u64, failed_sections);
        Ok(any_failed)
    }
}
