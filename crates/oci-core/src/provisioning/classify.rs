//! Error classification table for availability-domain launch attempts
//! (§4.5.1). Turns a `(code, message, http_status)` triple — or a clean
//! success — into a [`Token`] that drives the retry loop's recovery
//! policy.
//!
//! Grounded on `aivcs-core::sandbox::engine::evaluate_tool_request`'s
//! ordered rule-matching → verdict shape, generalised from a sandbox
//! policy table to the launch-error priority table in §4.5.1.

use crate::cli_invoke::CliError;

/// The classification outcome for one AD attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// CLI exit 0 — the instance launched.
    Ok,
    /// No preamble / no output captured from a failing invocation.
    Empty,
    /// Message contains "timed out".
    Timeout,
    /// `NotAuthenticated` or HTTP 401 — fatal, stop immediately.
    Auth,
    /// `NotAuthorizedOrNotFound` / `InvalidParameter` / `LimitExceeded` — fatal.
    Config,
    /// `IncorrectState` or HTTP 409 — continue to the next AD/cycle.
    State,
    /// `InternalError` with a capacity-shaped message — continue.
    Capacity,
    /// HTTP 429 or `TooManyRequests` — marks the cycle throttled.
    Throttle,
    /// None of the above.
    Unknown,
}

impl Token {
    pub fn as_str(&self) -> &'static str {
        match self {
            Token::Ok => "OK",
            Token::Empty => "EMPTY",
            Token::Timeout => "TIMEOUT",
            Token::Auth => "AUTH",
            Token::Config => "CONFIG",
            Token::State => "STATE",
            Token::Capacity => "CAPACITY",
            Token::Throttle => "THROTTLE",
            Token::Unknown => "UNKNOWN",
        }
    }

    /// `true` for AUTH/CONFIG — the classification that must abort the
    /// whole provisioning run rather than continue to the next AD.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Token::Auth | Token::Config)
    }
}

/// Classify a successful launch.
pub fn classify_success() -> Token {
    Token::Ok
}

/// Classify a CLI failure per the §4.5.1 priority table. `preamble` is
/// the extracted human-readable prefix (may be empty/missing, which maps
/// to [`Token::Empty`] ahead of every other rule).
pub fn classify_failure(preamble: Option<&str>, err: &CliError) -> Token {
    let Some(preamble) = preamble.filter(|p| !p.trim().is_empty()) else {
        return Token::Empty;
    };

    if preamble.to_lowercase().contains("timed out") {
        return Token::Timeout;
    }
    if err.code == "NotAuthenticated" || err.status == 401 {
        return Token::Auth;
    }
    if matches!(err.code.as_str(), "NotAuthorizedOrNotFound" | "InvalidParameter" | "LimitExceeded") {
        return Token::Config;
    }
    if err.code == "IncorrectState" || err.status == 409 {
        return Token::State;
    }
    if err.code == "InternalError" {
        let msg = err.message.as_deref().unwrap_or(preamble).to_lowercase();
        if msg.contains("out") || msg.contains("capacity") {
            return Token::Capacity;
        }
    }
    if err.status == 429 || err.code == "TooManyRequests" {
        return Token::Throttle;
    }

    Token::Unknown
}
