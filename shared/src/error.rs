//! # Error Types for the BlockIAM Client
//!
//! One error enum covers the whole workspace. Variants are grouped by the
//! fault class they belong to so callers can decide what is fatal, what is
//! reported, and what may be retried.

use thiserror::Error;

/// Main error type for the entire client
#[derive(Error, Debug)]
pub enum IamError {
    // =========================================================================
    // CONFIGURATION FAULTS (fatal at startup)
    // =========================================================================

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Missing required environment variable
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    // =========================================================================
    // CONNECTIVITY FAULTS
    // =========================================================================

    /// Ledger node unreachable or returned a transport-level failure
    #[error("Failed to reach ledger at '{endpoint}': {reason}")]
    Connectivity { endpoint: String, reason: String },

    /// Transaction was sent but no receipt arrived in time
    #[error("No receipt for transaction {transaction_id} after {timeout_secs} seconds")]
    ReceiptTimeout {
        transaction_id: String,
        timeout_secs: u64,
    },

    // =========================================================================
    // CONTRACT FAULTS
    // =========================================================================

    /// Contract call rejected or returned something unexpected
    #[error("Contract error: {0}")]
    Contract(String),

    /// Capability table entry could not be parsed
    #[error("Unknown contract capability '{name}': {reason}")]
    UnknownCapability { name: String, reason: String },

    /// ABI encoding or decoding failed
    #[error("ABI error: {0}")]
    Abi(String),

    // =========================================================================
    // STORAGE FAULTS
    // =========================================================================

    /// Local cache unavailable, corrupt, or a statement failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Cache operation requested while the cache is turned off
    #[error("Local cache is disabled")]
    CacheDisabled,

    // =========================================================================
    // VALIDATION FAULTS
    // =========================================================================

    /// Malformed address supplied by the caller
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // =========================================================================
    // GENERIC
    // =========================================================================

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias using IamError
pub type IamResult<T> = Result<T, IamError>;

// =============================================================================
// ERROR CONVERSIONS
// =============================================================================

impl From<rusqlite::Error> for IamError {
    fn from(err: rusqlite::Error) -> Self {
        IamError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for IamError {
    fn from(err: serde_json::Error) -> Self {
        IamError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for IamError {
    fn from(err: std::io::Error) -> Self {
        IamError::Storage(err.to_string())
    }
}

impl From<hex::FromHexError> for IamError {
    fn from(err: hex::FromHexError) -> Self {
        IamError::Abi(err.to_string())
    }
}

impl From<reqwest::Error> for IamError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown".into());
        IamError::Connectivity {
            endpoint,
            reason: err.to_string(),
        }
    }
}

// =============================================================================
// ERROR CATEGORIES (for logging)
// =============================================================================

impl IamError {
    /// Get the fault class for logging
    pub fn category(&self) -> &'static str {
        match self {
            IamError::Configuration(_) | IamError::MissingEnvVar(_) => "config",

            IamError::Connectivity { .. } | IamError::ReceiptTimeout { .. } => "connectivity",

            IamError::Contract(_) | IamError::UnknownCapability { .. } | IamError::Abi(_) => {
                "contract"
            }

            IamError::Storage(_) | IamError::CacheDisabled => "storage",

            IamError::InvalidAddress(_) => "validation",

            IamError::Serialization(_) => "internal",
        }
    }

    /// Check if the error is worth retrying by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IamError::Connectivity { .. } | IamError::ReceiptTimeout { .. } | IamError::Storage(_)
        )
    }

    /// Whether this fault must stop the process at startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, IamError::Configuration(_) | IamError::MissingEnvVar(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let err = IamError::InvalidAddress("0x12".into());
        assert_eq!(err.category(), "validation");

        let err = IamError::Storage("disk I/O error".into());
        assert_eq!(err.category(), "storage");

        let err = IamError::UnknownCapability {
            name: "check_access".into(),
            reason: "missing '('".into(),
        };
        assert_eq!(err.category(), "contract");
    }

    #[test]
    fn test_is_retryable() {
        let err = IamError::Connectivity {
            endpoint: "http://127.0.0.1:8545".into(),
            reason: "connection refused".into(),
        };
        assert!(err.is_retryable());

        let err = IamError::InvalidAddress("bad".into());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_sqlite_error_maps_to_storage() {
        let err: IamError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err.category(), "storage");
        assert!(!err.is_fatal());
    }
}
