//! OCI Tenancy Toolkit — Core Library
//!
//! The CLI invocation layer, snapshot store, discovery orchestrator and
//! its section extractors, and the provisioning engine, all re-exported
//! for the `oci-discover` and `oci-provision` binaries.

pub mod cli_invoke;
pub mod discovery;
pub mod error;
pub mod events;
pub mod json_pointer;
pub mod provisioning;
pub mod snapshot;
pub mod telemetry;

pub use cli_invoke::{
    build_array_query, build_query, extract_preamble, invoke, parse_cli_error, read_tenancy_ocid,
    CliError,
};

pub use discovery::{CliRunner, ExtractorOutcome, OciCli, Orchestrator};

pub use error::{OciError, Result};

pub use json_pointer::JsonPointer;

pub use provisioning::classify::{classify_failure, classify_success, Token};
pub use provisioning::lock::{resolve_lock_base_dir, ProcessLock};
pub use provisioning::{
    discover_availability_domains, render_all_specs, render_spec_for_ad, LaunchCli, ProvisionOutcome,
    ProvisioningEngine,
};

pub use snapshot::{cleanup_stray_artifacts, skeleton, FileMutex, SnapshotStore, SCHEMA_ID};

pub use telemetry::{init_tracing, level_from_flags};

/// Toolkit version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
