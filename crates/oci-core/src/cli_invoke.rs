//! CLI Invocation Layer — runs the external OCI CLI and classifies its
//! output into parsed JSON or a structured [`CliError`].
//!
//! Grounded on `aivcs-ci::runner::CiRunner::execute_stage`'s
//! `tokio::process::Command` + `Stdio::piped()` +
//! `tokio::time::timeout(...).await` shape, generalised from "run one CI
//! stage" to "run one OCI CLI invocation and parse its JSON contract".

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tokio::process::Command;

/// A structured CLI failure: either a parsed OCI error body or a
/// synthesized `NonJsonResponse`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("cli error: code={code} status={status} message={message:?}")]
pub struct CliError {
    pub code: String,
    pub message: Option<String>,
    pub status: u32,
}

impl CliError {
    fn non_json(raw: &str) -> Self {
        let truncated: String = raw.chars().take(150).collect();
        CliError {
            code: "NonJsonResponse".to_string(),
            message: Some(truncated),
            status: 500,
        }
    }
}

/// Parse an OCI CLI error body per §4.1: locate the first `{`, decode the
/// suffix as JSON, and extract `code`/`message`/`status` with defaults.
/// Falls back to a synthetic `NonJsonResponse` when no `{` is present or
/// the suffix fails to decode.
pub fn parse_cli_error(raw: &str) -> CliError {
    let Some(brace_idx) = raw.find('{') else {
        return CliError {
            code: "NonJsonResponse".to_string(),
            message: if raw.trim().is_empty() {
                None
            } else {
                Some(raw.trim().to_string())
            },
            status: 500,
        };
    };

    let suffix = &raw[brace_idx..];
    match serde_json::from_str::<Value>(suffix) {
        Ok(value) => {
            let code = value
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string();
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .map(|s| s.to_string());
            let status = value
                .get("status")
                .and_then(Value::as_u64)
                .map(|s| s as u32)
                .unwrap_or(500);
            CliError {
                code,
                message,
                status,
            }
        }
        Err(_) => CliError::non_json(raw),
    }
}

/// Extract a human-readable preamble from raw stderr/stdout text, per
/// §4.1: the first stderr line, or failing that, a regex match of the
/// form `Error: (.*)`.
pub fn extract_preamble(stderr: &str, stdout: &str) -> Option<String> {
    if let Some(line) = stderr.lines().find(|l| !l.trim().is_empty()) {
        return Some(line.trim().to_string());
    }
    let re = Regex::new(r"Error:\s*(.*)").expect("static regex is valid");
    re.captures(stdout)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Build the `--query data.{f1:f1,f2:f2,...}` flags for a scalar
/// projection, or `["--query", "data"]` when no fields are given.
pub fn build_query(fields: &[&str]) -> Vec<String> {
    if fields.is_empty() {
        return vec!["--query".to_string(), "data".to_string()];
    }
    let projection = fields
        .iter()
        .map(|f| format!("{f}:{f}"))
        .collect::<Vec<_>>()
        .join(",");
    vec!["--query".to_string(), format!("data.{{{projection}}}")]
}

/// Build the `--query data[].{f1:f1,...} --all` flags for an array
/// projection, enabling CLI-side pagination.
pub fn build_array_query(fields: &[&str]) -> Vec<String> {
    let projection = fields
        .iter()
        .map(|f| format!("{f}:{f}"))
        .collect::<Vec<_>>()
        .join(",");
    let query = if fields.is_empty() {
        "data[]".to_string()
    } else {
        format!("data[].{{{projection}}}")
    };
    vec!["--query".to_string(), query, "--all".to_string()]
}

/// Run `<cli> <args> --profile <profile> --output json [--read-timeout
/// secs]` and return the parsed JSON value, or a [`CliError`] derived
/// from stderr/stdout on a nonzero exit.
///
/// Exit 0 with empty stdout is normalised per §4.1: an empty array when
/// the original query targeted `data[]`, otherwise an empty object.
pub async fn invoke(
    cli_binary: &str,
    args: &[String],
    profile: &str,
    read_timeout: Option<Duration>,
) -> Result<Value, CliError> {
    let mut full_args: Vec<String> = args.to_vec();
    full_args.push("--profile".to_string());
    full_args.push(profile.to_string());
    full_args.push("--output".to_string());
    full_args.push("json".to_string());
    if let Some(timeout) = read_timeout {
        full_args.push("--read-timeout".to_string());
        full_args.push(timeout.as_secs().to_string());
    }

    let child = Command::new(cli_binary)
        .args(&full_args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| CliError {
            code: "SpawnFailed".to_string(),
            message: Some(e.to_string()),
            status: 500,
        })?;

    let output = match read_timeout {
        Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| CliError {
                code: "Timeout".to_string(),
                message: Some("cli invocation timed out".to_string()),
                status: 408,
            })?
            .map_err(|e| CliError {
                code: "WaitFailed".to_string(),
                message: Some(e.to_string()),
                status: 500,
            })?,
        None => child.wait_with_output().await.map_err(|e| CliError {
            code: "WaitFailed".to_string(),
            message: Some(e.to_string()),
            status: 500,
        })?,
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if output.status.success() {
        if stdout.trim().is_empty() {
            let is_array_query = args.iter().any(|a| a.contains("data[]"));
            return Ok(if is_array_query {
                Value::Array(vec![])
            } else {
                Value::Object(Default::default())
            });
        }
        return serde_json::from_str(&stdout).map_err(|e| CliError {
            code: "MalformedJson".to_string(),
            message: Some(e.to_string()),
            status: 500,
        });
    }

    let preamble = extract_preamble(&stderr, &stdout);
    match preamble {
        Some(text) => Err(parse_cli_error(&text)),
        None => Err(CliError::non_json(&stdout)),
    }
}

/// Read the tenancy OCID out of an OCI config file for a given profile.
///
/// The config file is a shell-style INI: `[PROFILE]` section headers and
/// `key = value` lines. Locates the first `tenancy = ...` line after the
/// matching `[PROFILE]` header and before the next section header.
pub fn read_tenancy_ocid(config_path: &Path, profile: &str) -> crate::error::Result<String> {
    use crate::error::OciError;

    let contents = std::fs::read_to_string(config_path)
        .map_err(|_| OciError::ConfigFileNotFound(config_path.display().to_string()))?;

    let sections = parse_ini_sections(&contents);
    let section = sections
        .get(profile)
        .ok_or_else(|| OciError::TenancyLineMissing(profile.to_string()))?;

    let tenancy_re = Regex::new(r"^\s*tenancy\s*=\s*(.*)$").expect("static regex is valid");
    for line in section {
        if let Some(caps) = tenancy_re.captures(line) {
            let value = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            if value.is_empty() {
                return Err(OciError::EmptyOcid(profile.to_string()));
            }
            return Ok(value.to_string());
        }
    }

    Err(OciError::TenancyLineMissing(profile.to_string()))
}

fn parse_ini_sections(contents: &str) -> HashMap<String, Vec<String>> {
    let mut sections: HashMap<String, Vec<String>> = HashMap::new();
    let mut current: Option<String> = None;

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.starts_with('[') && line.ends_with(']') {
            current = Some(line[1..line.len() - 1].to_string());
            sections.entry(current.clone().unwrap()).or_default();
            continue;
        }
        if let Some(name) = &current {
            sections.entry(name.clone()).or_default().push(line.to_string());
        }
    }

    sections
}
