//! Error taxonomy
//!
//! [`ConfigError`] is fatal at startup. [`ChainError`] is raised by the ports and is always
//! converted into an `Error` record by the state machine; it never escapes the scheduler.

use std::{path::PathBuf, time::Duration};
use thiserror::Error;

/// Invalid or missing configuration. The process does not start.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path of the config file
        path: PathBuf,
        /// Underlying io error
        source: std::io::Error,
    },
    /// Config file is not valid TOML for the expected schema
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    /// A field is missing or out of range
    #[error("invalid `{field}`: {reason}")]
    Invalid {
        /// Dotted field name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid { field, reason: reason.into() }
    }
}

/// Failure talking to the chain through one of the ports.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// RPC unreachable or the request failed after retries
    #[error("rpc unavailable: {0}")]
    Connectivity(String),
    /// RPC serves a different chain than configured
    #[error("wrong chain id: expected {expected}, got {actual}")]
    WrongChain {
        /// Configured chain id
        expected: u64,
        /// Chain id reported by the node
        actual: u64,
    },
    /// Gas estimation rejected the call; nothing was submitted
    #[error("gas estimation failed: {0}")]
    GasEstimation(String),
    /// Submitted transaction was not observed in a block within the timeout.
    /// It may still land later.
    #[error("transaction {tx} not confirmed within {timeout:?}")]
    ConfirmationTimeout {
        /// Reference of the pending transaction
        tx: String,
        /// Timeout that elapsed
        timeout: Duration,
    },
    /// Contract returned data that could not be decoded
    #[error("malformed contract response: {0}")]
    Decode(String),
    /// The call needs a contract that is not configured
    #[error("{0} contract address not configured")]
    MissingContract(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ChainError::WrongChain { expected: 613419, actual: 1 };
        assert_eq!(err.to_string(), "wrong chain id: expected 613419, got 1");

        let err = ChainError::ConfirmationTimeout {
            tx: "0xab".to_string(),
            timeout: Duration::from_secs(300),
        };
        assert_eq!(err.to_string(), "transaction 0xab not confirmed within 300s");

        let err = ConfigError::invalid("gas.gas_limit_multiplier", "must be >= 1");
        assert_eq!(err.to_string(), "invalid `gas.gas_limit_multiplier`: must be >= 1");
    }
}
