//! Structured lifecycle event emission for discovery and provisioning runs.
//!
//! Not a metrics subsystem — these are `info!`-level log lines with an
//! `event = "..."` field, the same convention `aivcs_core::obs` used for
//! run lifecycle events, generalised to phases and provisioning cycles.

use tracing::{info, warn};

/// Emit: a discovery phase started.
pub fn emit_phase_started(phase: &str) {
    info!(event = "discovery.phase_started", phase = %phase);
}

/// Emit: a discovery phase finished, with the number of sections that
/// reported a nonzero exit code.
pub fn emit_phase_finished(phase: &str, duration_ms: u64, failed_sections: usize) {
    info!(
        event = "discovery.phase_finished",
        phase = %phase,
        duration_ms = duration_ms,
        failed_sections = failed_sections,
    );
}

/// Emit: a single section extractor finished.
pub fn emit_section_finished(section: &str, exit_code: i32, message: Option<&str>) {
    if exit_code == 0 {
        info!(event = "discovery.section_finished", section = %section, exit_code = exit_code);
    } else {
        warn!(
            event = "discovery.section_finished",
            section = %section,
            exit_code = exit_code,
            message = message.unwrap_or(""),
        );
    }
}

/// Emit: a provisioning cycle completed.
pub fn emit_cycle_completed(cycle: u32, throttled: bool, total_errors: u32, backoff_attempts: u32) {
    info!(
        event = "provisioning.cycle_completed",
        cycle = cycle,
        throttled = throttled,
        total_errors = total_errors,
        backoff_attempts = backoff_attempts,
    );
}

/// Emit: the provisioning engine is sleeping between cycles.
pub fn emit_backoff_sleep(cycle: u32, sleep_secs: u64, backoff_attempts: u32) {
    info!(
        event = "provisioning.backoff_sleep",
        cycle = cycle,
        sleep_secs = sleep_secs,
        backoff_attempts = backoff_attempts,
    );
}

/// Emit: an availability-domain attempt was classified.
pub fn emit_ad_attempt(ad: u32, token: &str) {
    info!(event = "provisioning.ad_attempt", ad = ad, token = %token);
}
