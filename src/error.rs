/// Unified error types for keygate
use thiserror::Error;

/// Main error type for the key resolution pipeline
#[derive(Error, Debug)]
pub enum KeygateError {
    /// Malformed mapping, invalid TTL, invalid log level
    #[error("Configuration error: {0}")]
    Config(String),

    /// The account matched neither an exact mapping nor the wildcard
    #[error("No identities mapped for account {0:?}")]
    NoIdentities(String),

    /// Every mapped identity failed and no cached fallback existed
    #[error("All identities failed: {0}")]
    AllIdentitiesFailed(String),

    /// A line destined for the sshd authorization stream did not carry a
    /// recognized key algorithm. Unconditionally fatal (fail secure).
    #[error("Invalid key format: {0:?}")]
    InvalidKeyFormat(String),

    /// Local account or home directory could not be resolved
    #[error("Account lookup failed: {0}")]
    AccountLookup(String),

    /// The overall resolution exceeded the caller's deadline
    #[error("Key resolution timed out after {0}s")]
    Timeout(u64),

    /// Cache filesystem errors
    #[error("Cache error: {0}")]
    Cache(String),

    /// Internal errors (client construction and the like)
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeygateError {
    /// Process exit code reported to the invoking daemon. sshd treats any
    /// non-zero status as "no keys from this command".
    pub fn exit_code(&self) -> u8 {
        match self {
            KeygateError::InvalidKeyFormat(_) => 2,
            KeygateError::Config(_) => 3,
            KeygateError::NoIdentities(_)
            | KeygateError::AllIdentitiesFailed(_)
            | KeygateError::Timeout(_) => 4,
            KeygateError::AccountLookup(_) => 5,
            KeygateError::Cache(_) | KeygateError::Internal(_) | KeygateError::Io(_) => 1,
        }
    }
}

/// Result type alias for keygate operations
pub type KeygateResult<T> = Result<T, KeygateError>;
