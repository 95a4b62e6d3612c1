//! Error types for the sniper

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the sniper
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),

    #[error("Invalid keypair: {0}")]
    InvalidKeypair(String),

    // Network errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Stream connection failed: {0}")]
    StreamConnection(String),

    #[error("Stream disconnected")]
    StreamDisconnected,

    // Decoding errors
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // Trading errors
    #[error("Quote failed: {0}")]
    Quote(String),

    #[error("Transaction build failed: {0}")]
    TransactionBuild(String),

    #[error("Transaction send failed: {0}")]
    TransactionSend(String),

    #[error("Confirmation timed out after {0}ms")]
    ConfirmationTimeout(u64),

    #[error("Execution failed after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },

    #[error("Insufficient balance: {available}SOL available, {required}SOL required")]
    InsufficientBalance { available: f64, required: f64 },

    // Risk errors
    #[error("Trade blocked: {}", reasons.join("; "))]
    RiskBlocked { reasons: Vec<String> },

    // Position errors
    #[error("Position already open: {0}")]
    PositionExists(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Rpc(_)
                | Error::RpcTimeout(_)
                | Error::Http(_)
                | Error::StreamConnection(_)
                | Error::StreamDisconnected
                | Error::Quote(_)
                | Error::TransactionSend(_)
                | Error::ConfirmationTimeout(_)
        )
    }

    /// Denied admission, not a fault
    pub fn is_risk_block(&self) -> bool {
        matches!(self, Error::RiskBlocked { .. })
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Error::Rpc(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Http(format!("request timed out: {}", e))
        } else {
            Error::Http(e.to_string())
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Http("502".into()).is_retryable());
        assert!(Error::StreamDisconnected.is_retryable());
        assert!(Error::ConfirmationTimeout(30_000).is_retryable());
        assert!(!Error::ConfigValidation("bad".into()).is_retryable());
        assert!(!Error::RiskBlocked { reasons: vec![] }.is_retryable());
    }

    #[test]
    fn test_risk_blocked_message_joins_reasons() {
        let err = Error::RiskBlocked {
            reasons: vec!["a".to_string(), "b".to_string()],
        };
        assert!(err.is_risk_block());
        assert_eq!(err.to_string(), "Trade blocked: a; b");
    }

    #[test]
    fn test_retries_exhausted_keeps_last_error() {
        let err = Error::RetriesExhausted {
            attempts: 3,
            last: Box::new(Error::TransactionSend("blockhash not found".into())),
        };
        assert!(err.to_string().contains("3 attempt(s)"));
        assert!(err.to_string().contains("blockhash not found"));
    }
}
