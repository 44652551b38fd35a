//! Domain-level error taxonomy for the OCI tenancy toolkit.

/// Errors produced by the discovery and provisioning engines.
#[derive(Debug, thiserror::Error)]
pub enum OciError {
    #[error("config file not found: {0}")]
    ConfigFileNotFound(String),

    #[error("tenancy line missing for profile {0}")]
    TenancyLineMissing(String),

    #[error("empty OCID for profile {0}")]
    EmptyOcid(String),

    #[error("cli invocation failed: {0}")]
    CliInvocation(#[from] crate::cli_invoke::CliError),

    #[error("invalid json pointer: {0}")]
    InvalidPointer(String),

    #[error("splice failed at {pointer}: {reason}")]
    SpliceFailed { pointer: String, reason: String },

    #[error("lock timeout acquiring {0}")]
    LockTimeout(String),

    #[error("tempfile error: {0}")]
    TempFile(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid launch spec: {0}")]
    InvalidLaunchSpec(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("max cycles reached ({0})")]
    MaxCyclesReached(u32),

    #[error("too many transient errors ({total} >= {limit})")]
    TooManyTransientErrors { total: u32, limit: u32 },

    #[error("another instance is already running (PID {0})")]
    LockHeld(u32),
}

/// Result type for toolkit operations.
pub type Result<T> = std::result::Result<T, OciError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_descriptive() {
        let err = OciError::EmptyOcid("DEFAULT".to_string());
        assert!(err.to_string().contains("DEFAULT"));

        let err = OciError::LockHeld(4242);
        assert!(err.to_string().contains("4242"));

        let err = OciError::MaxCyclesReached(5000);
        assert!(err.to_string().contains("5000"));
    }

    #[test]
    fn too_many_transient_errors_renders_both_numbers() {
        let err = OciError::TooManyTransientErrors {
            total: 30,
            limit: 25,
        };
        let msg = err.to_string();
        assert!(msg.contains("30"));
        assert!(msg.contains("25"));
    }
}
