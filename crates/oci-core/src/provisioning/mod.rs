//! Provisioning Engine — launches exactly one compute instance across a
//! rotating set of availability domains, retrying through capacity,
//! throttle, and transient failures with decorrelated-jitter backoff
//! (§4.5).
//!
//! Grounded on `aivcs-core::sandbox::execution::execute_with_controls`'s
//! timeout + retry + exponential backoff loop shape, generalised from a
//! single-target retry to a per-cycle fan-out over an ordered AD list.

pub mod backoff;
pub mod classify;
pub mod lock;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::cli_invoke::CliError;
use crate::error::{OciError, Result};
use crate::events;
use classify::Token;

/// Abstraction over "attempt a launch against this AD's rendered spec".
/// Lets the retry loop be driven by a fake in tests instead of a real
/// `oci compute instance launch` subprocess.
#[async_trait::async_trait]
pub trait LaunchCli: Send + Sync {
    async fn launch(&self, ad: u32, spec_path: &Path) -> std::result::Result<Value, CliError>;
}

/// The human-readable preamble driving §4.5.1's classification, read
/// straight off the already-parsed [`CliError`] rather than re-derived
/// from its `Display` string (which would never match the `Error:\s*(.*)`
/// fallback regex and would misclassify every failure as EMPTY).
///
/// Only a `NonJsonResponse` carries a genuinely empty/missing preamble
/// (it's what `cli_invoke::invoke` synthesises when no output was
/// captured at all); any other code means the CLI returned a structured
/// error body, so a non-empty preamble is synthesised from its message
/// (or the code itself) to let the code/status rules in
/// [`classify::classify_failure`] run instead of short-circuiting to
/// `Token::Empty`.
fn preamble_of(err: &CliError) -> Option<String> {
    if err.code == "NonJsonResponse" {
        return err.message.clone().filter(|m| !m.trim().is_empty());
    }
    Some(err.message.clone().unwrap_or_else(|| err.code.clone()))
}

/// Parse the trailing AD number out of an availability-domain name of
/// the form `<prefix>-AD-<n>` (e.g. `NMou:US-ASHBURN-AD-1`). Returns
/// `None` for names that don't carry the `-AD-<digits>` suffix.
fn parse_ad_number(name: &str) -> Option<u32> {
    let (_, suffix) = name.rsplit_once("-AD-")?;
    suffix.parse().ok()
}

/// List the tenancy's availability domains via `oci iam
/// availability-domain list` and return their AD numbers in ascending
/// order. This is the rotating set the provisioning loop iterates each
/// cycle (§2 data flow, §4.5).
pub async fn discover_availability_domains(
    cli: &dyn crate::discovery::OciCli,
) -> Result<Vec<u32>> {
    let args = {
        let mut a = vec!["iam".to_string(), "availability-domain".to_string(), "list".to_string()];
        a.extend(crate::cli_invoke::build_array_query(&["name"]));
        a
    };

    let value = cli.invoke(args).await.map_err(OciError::CliInvocation)?;
    let entries = value.as_array().cloned().unwrap_or_default();

    let mut ads: Vec<u32> = entries
        .iter()
        .filter_map(|e| e.get("name").and_then(Value::as_str))
        .filter_map(parse_ad_number)
        .collect();
    ads.sort_unstable();
    ads.dedup();
    Ok(ads)
}

/// Replace every `{{AD_NUMBER}}` occurrence in `template` with `ad`,
/// then re-validate the result as JSON (§3.3, §4.5 pre-flight step 2).
pub fn render_spec_for_ad(template: &str, ad: u32) -> Result<Value> {
    let rendered = template.replace("{{AD_NUMBER}}", &ad.to_string());
    serde_json::from_str(&rendered).map_err(|e| OciError::InvalidLaunchSpec(e.to_string()))
}

/// Render a spec for every AD in `ads`, writing each to its own tempfile
/// keyed by AD number. The template itself must already be valid JSON
/// (pre-flight step 1); each rendered variant is independently
/// re-validated.
pub fn render_all_specs(
    template: &str,
    ads: &[u32],
    dir: &Path,
) -> Result<HashMap<u32, (Value, NamedTempFile)>> {
    serde_json::from_str::<Value>(template).map_err(|e| OciError::InvalidLaunchSpec(e.to_string()))?;

    let mut out = HashMap::with_capacity(ads.len());
    for &ad in ads {
        let rendered = render_spec_for_ad(template, ad)?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| OciError::TempFile(e.to_string()))?;
        serde_json::to_writer_pretty(&mut tmp, &rendered)?;
        out.insert(ad, (rendered, tmp));
    }
    Ok(out)
}

/// Outcome of one full provisioning run (§4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The instance launched; carries the raw instance JSON.
    Launched(Value),
    /// Pre-flight only (`--dry-run`): rendered specs were valid and no
    /// attempt was made.
    DryRun,
}

/// Process-local provisioning run state (§3.4).
#[derive(Debug, Clone, Copy)]
struct RunState {
    cycle: u32,
    total_errors: u32,
    backoff_attempts: u32,
}

impl RunState {
    fn new() -> Self {
        Self {
            cycle: 0,
            total_errors: 0,
            backoff_attempts: 0,
        }
    }
}

/// Drives the retry loop described in §4.5's main-loop pseudocode against
/// a rendered per-AD spec set, a [`LaunchCli`], and an injectable sleep
/// function (tests substitute a no-op sleep so the suite runs instantly).
pub struct ProvisioningEngine<'a> {
    cli: &'a dyn LaunchCli,
    ads: Vec<u32>,
    spec_paths: HashMap<u32, PathBuf>,
}

impl<'a> ProvisioningEngine<'a> {
    pub fn new(cli: &'a dyn LaunchCli, ads: Vec<u32>, spec_paths: HashMap<u32, PathBuf>) -> Self {
        Self { cli, ads, spec_paths }
    }

    /// Run the main loop to completion: either a success (`Ok(Launched)`)
    /// or a fatal error (AUTH/CONFIG classification, `MAX_CYCLES`
    /// exhausted, or the transient-error cap breached).
    pub async fn run(&self) -> Result<ProvisionOutcome> {
        let mut state = RunState::new();
        let error_cap = self.ads.len() as u32 * backoff::MAX_ERROR_CYCLES;
        let mut rng = rand::thread_rng();

        while state.cycle < backoff::MAX_CYCLES {
            state.cycle += 1;
            let mut throttled = false;
            let mut cycle_errors = 0u32;

            for (idx, &ad) in self.ads.iter().enumerate() {
                let path = self
                    .spec_paths
                    .get(&ad)
                    .expect("every configured AD has a rendered spec path");

                match self.cli.launch(ad, path).await {
                    Ok(instance) => {
                        events::emit_ad_attempt(ad, Token::Ok.as_str());
                        return Ok(ProvisionOutcome::Launched(instance));
                    }
                    Err(err) => {
                        let token = classify::classify_failure(preamble_of(&err).as_deref(), &err);
                        events::emit_ad_attempt(ad, token.as_str());

                        if token.is_fatal() {
                            return Err(match token {
                                Token::Auth => OciError::Auth(err.to_string()),
                                Token::Config => OciError::Config(err.to_string()),
                                _ => unreachable!("is_fatal only true for Auth/Config"),
                            });
                        }

                        match token {
                            Token::Empty | Token::Unknown => {
                                state.total_errors += 1;
                                cycle_errors += 1;
                            }
                            Token::Timeout => {
                                state.total_errors += 1;
                            }
                            Token::Throttle => {
                                throttled = true;
                            }
                            Token::State | Token::Capacity => {}
                            Token::Ok | Token::Auth | Token::Config => unreachable!(),
                        }

                        if state.total_errors >= error_cap {
                            return Err(OciError::TooManyTransientErrors {
                                total: state.total_errors,
                                limit: error_cap,
                            });
                        }
                    }
                }

                let is_last_ad = idx + 1 == self.ads.len();
                if !is_last_ad {
                    let sleep_secs = backoff::inter_ad_sleep_secs(&mut rng);
                    tokio::time::sleep(std::time::Duration::from_secs(sleep_secs)).await;
                }
            }

            state.backoff_attempts = backoff::update_backoff_attempts(state.backoff_attempts, throttled);
            if cycle_errors == 0 {
                state.total_errors = 0;
            }

            events::emit_cycle_completed(state.cycle, throttled, state.total_errors, state.backoff_attempts);

            let sleep_secs = backoff::compute_adaptive_sleep(state.backoff_attempts, &mut rng);
            events::emit_backoff_sleep(state.cycle, sleep_secs, state.backoff_attempts);
            tokio::time::sleep(std::time::Duration::from_secs(sleep_secs)).await;
        }

        Err(OciError::MaxCyclesReached(backoff::MAX_CYCLES))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[test]
    fn parse_ad_number_extracts_trailing_digits() {
        assert_eq!(parse_ad_number("NMou:US-ASHBURN-AD-1"), Some(1));
        assert_eq!(parse_ad_number("NMou:US-ASHBURN-AD-3"), Some(3));
        assert_eq!(parse_ad_number("garbage"), None);
    }

    struct FakeAdListCli;

    #[async_trait::async_trait]
    impl crate::discovery::OciCli for FakeAdListCli {
        async fn invoke(&self, _args: Vec<String>) -> std::result::Result<Value, CliError> {
            Ok(json!([
                {"name": "NMou:US-ASHBURN-AD-2"},
                {"name": "NMou:US-ASHBURN-AD-1"},
                {"name": "NMou:US-ASHBURN-AD-3"},
            ]))
        }
    }

    #[tokio::test]
    async fn discover_availability_domains_sorts_ascending() {
        let ads = discover_availability_domains(&FakeAdListCli).await.unwrap();
        assert_eq!(ads, vec![1, 2, 3]);
    }

    #[test]
    fn render_spec_substitutes_ad_number_and_stays_valid_json() {
        let template = r#"{"availabilityDomain": "AD-{{AD_NUMBER}}", "shape": "VM.Standard.E4.Flex"}"#;
        let rendered = render_spec_for_ad(template, 2).unwrap();
        assert_eq!(rendered["availabilityDomain"], "AD-2");
    }

    #[test]
    fn render_spec_rejects_template_that_renders_to_invalid_json() {
        // No closing brace after substitution -- still invalid JSON.
        let template = r#"{"ad": {{AD_NUMBER}}"#;
        assert!(render_spec_for_ad(template, 1).is_err());
    }

    #[test]
    fn render_all_specs_writes_one_tempfile_per_ad() {
        let dir = tempfile::tempdir().unwrap();
        let template = r#"{"ad": "{{AD_NUMBER}}"}"#;
        let rendered = render_all_specs(template, &[1, 2, 3], dir.path()).unwrap();
        assert_eq!(rendered.len(), 3);
        for (&ad, (value, tmp)) in rendered.iter() {
            assert_eq!(value["ad"], ad.to_string());
            assert!(tmp.path().exists());
        }
    }

    struct ScriptedCli {
        // One scripted outcome per AD per call; consumed in order.
        script: Mutex<HashMap<u32, Vec<std::result::Result<Value, CliError>>>>,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl LaunchCli for ScriptedCli {
        async fn launch(&self, ad: u32, _spec_path: &Path) -> std::result::Result<Value, CliError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let queue = script.get_mut(&ad).expect("scripted AD");
            assert!(!queue.is_empty(), "ran out of scripted outcomes for AD {ad}");
            queue.remove(0)
        }
    }

    fn cli_err(code: &str, message: &str, status: u32) -> CliError {
        CliError {
            code: code.to_string(),
            message: Some(message.to_string()),
            status,
        }
    }

    fn spec_paths(ads: &[u32]) -> HashMap<u32, PathBuf> {
        ads.iter().map(|&ad| (ad, PathBuf::from(format!("/tmp/spec-{ad}.json")))).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_second_ad_first_cycle_scenario_3() {
        let cli = ScriptedCli {
            script: Mutex::new(HashMap::from([
                (1, vec![Err(cli_err("InternalError", "out of host capacity", 500))]),
                (2, vec![Ok(json!({"id": "ocid1.instance..new"}))]),
            ])),
            calls: AtomicU32::new(0),
        };

        let engine = ProvisioningEngine::new(&cli, vec![1, 2], spec_paths(&[1, 2]));
        let outcome = engine.run().await.unwrap();
        assert_eq!(outcome, ProvisionOutcome::Launched(json!({"id": "ocid1.instance..new"})));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_auth_error_stops_immediately_scenario_5() {
        let cli = ScriptedCli {
            script: Mutex::new(HashMap::from([(
                1,
                vec![Err(cli_err("NotAuthenticated", "bad token", 401))],
            )])),
            calls: AtomicU32::new(0),
        };

        let engine = ProvisioningEngine::new(&cli, vec![1, 2], spec_paths(&[1, 2]));
        let result = engine.run().await;
        assert!(matches!(result, Err(OciError::Auth(_))));
        // AD-2 must never have been attempted.
        assert_eq!(cli.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn too_many_transient_errors_is_fatal() {
        let limit = backoff::MAX_ERROR_CYCLES; // single AD -> cap == MAX_ERROR_CYCLES
        let mut queue = Vec::new();
        for _ in 0..(limit + 1) {
            queue.push(Err(cli_err("Unknown", "mystery failure", 500)));
        }
        let cli = ScriptedCli {
            script: Mutex::new(HashMap::from([(1, queue)])),
            calls: AtomicU32::new(0),
        };

        let engine = ProvisioningEngine::new(&cli, vec![1], spec_paths(&[1]));
        let result = engine.run().await;
        assert!(matches!(result, Err(OciError::TooManyTransientErrors { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn state_and_capacity_tokens_continue_without_incrementing_total_errors() {
        let cli = ScriptedCli {
            script: Mutex::new(HashMap::from([(
                1,
                vec![
                    Err(cli_err("IncorrectState", "busy", 409)),
                    Err(cli_err("InternalError", "out of capacity", 500)),
                    Ok(json!({"id": "ocid1.instance..x"})),
                ],
            )])),
            calls: AtomicU32::new(0),
        };

        let engine = ProvisioningEngine::new(&cli, vec![1], spec_paths(&[1]));
        let outcome = engine.run().await.unwrap();
        assert_eq!(outcome, ProvisionOutcome::Launched(json!({"id": "ocid1.instance..x"})));
        assert_eq!(cli.calls.load(Ordering::SeqCst), 3);
    }
}
