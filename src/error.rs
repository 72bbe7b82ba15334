//! Error types for wallet sessions and ledger transactions

use thiserror::Error;

use crate::types::ChainId;

/// Orchestration error type
///
/// `Clone` so a failure can be carried inside an immutable
/// [`TransactionOutcome`](crate::TransactionOutcome) snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No signing environment is installed
    #[error("No wallet provider found; install a signing extension to continue")]
    ProviderAbsent,

    /// The user declined the request in their wallet
    #[error("Request declined in wallet: {0}")]
    UserRejected(String),

    /// No live session (never connected, or invalidated by an account/network change)
    #[error("Wallet not connected: {0}")]
    NotConnected(String),

    /// Session network differs from the deployment network
    #[error("Wrong network: expected chain {expected}, wallet is on chain {actual}")]
    WrongNetwork { expected: ChainId, actual: ChainId },

    /// Amount cannot be represented exactly in base units
    #[error("Amount {amount} needs {decimals} decimal places, ledger supports {max}")]
    PrecisionLoss {
        amount: String,
        decimals: u32,
        max: u32,
    },

    /// Transaction was included but the expected event was not emitted
    #[error("Transaction {hash} confirmed without a {event} event")]
    EventMissing { event: String, hash: String },

    /// Confirmation wait exceeded; real outcome unknown
    #[error("No confirmation for {hash} within {timeout_ms}ms; final status is unknown")]
    Timeout { hash: String, timeout_ms: u64 },

    /// Ledger-reported execution failure
    #[error("Execution reverted: {0}")]
    ExecutionReverted(String),

    /// Record does not exist on the ledger
    #[error("Listing {0} not found")]
    NotFound(u64),

    /// Malformed monetary amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Malformed account or contract address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Malformed call argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Ledger response did not have the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Transport-level failure talking to the ledger
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors detected locally before any signer or ledger round trip
    pub fn is_fail_fast(&self) -> bool {
        matches!(
            self,
            Error::ProviderAbsent
                | Error::NotConnected(_)
                | Error::WrongNetwork { .. }
                | Error::PrecisionLoss { .. }
                | Error::InvalidAmount(_)
                | Error::InvalidAddress(_)
                | Error::InvalidArgument(_)
                | Error::Config(_)
        )
    }

    /// Errors that can only be known after the signer or network responded
    pub fn requires_round_trip(&self) -> bool {
        matches!(
            self,
            Error::UserRejected(_)
                | Error::Timeout { .. }
                | Error::ExecutionReverted(_)
                | Error::EventMissing { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_fast_classification() {
        assert!(Error::NotConnected("no session".into()).is_fail_fast());
        assert!(Error::WrongNetwork {
            expected: ChainId(1),
            actual: ChainId(5)
        }
        .is_fail_fast());
        assert!(!Error::ExecutionReverted("out of gas".into()).is_fail_fast());
        assert!(Error::Timeout {
            hash: "0xabc".into(),
            timeout_ms: 10
        }
        .requires_round_trip());
        assert!(!Error::ProviderAbsent.requires_round_trip());
    }

    #[test]
    fn test_messages_distinguish_decline_from_revert() {
        let declined = Error::UserRejected("User denied transaction signature".into()).to_string();
        let reverted = Error::ExecutionReverted("Listing not available".into()).to_string();
        assert!(declined.contains("declined"));
        assert!(reverted.contains("reverted"));
        assert_ne!(declined, reverted);
    }
}
