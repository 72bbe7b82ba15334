//! Transaction outcomes
//!
//! Every orchestrated write resolves to exactly one [`TransactionOutcome`].
//! Callers branch on it; nothing is thrown past the orchestrator.

use crate::types::TxHash;
use crate::Error;

/// Terminal result of one orchestrated write
///
/// A snapshot: it is never updated after it is returned, even if the
/// network later settles a timed-out transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Included, with the id emitted by the contract
    Confirmed {
        hash: TxHash,
        block_number: u64,
        emitted_id: u64,
        gas_used: u64,
    },

    /// The user or wallet declined to sign; nothing was submitted
    Rejected { reason: String },

    /// Failed locally, at the network, or with unknown final status
    Failed { reason: Error },
}

/// What the caller should offer the user next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    /// Nothing to do
    None,
    /// Ask the user to sign again
    ReSign,
    /// Input or listing state must change before retrying
    FixInput,
    /// Outcome unknown; check the ledger later before resubmitting
    PollLater,
    /// Connect (or reconnect) the wallet on the right network
    Reconnect,
    /// Unexpected ledger or client behavior
    Investigate,
}

impl TransactionOutcome {
    /// Classify an orchestration error
    pub fn from_error(error: Error) -> Self {
        match error {
            Error::UserRejected(reason) => TransactionOutcome::Rejected { reason },
            reason => TransactionOutcome::Failed { reason },
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, TransactionOutcome::Confirmed { .. })
    }

    pub fn emitted_id(&self) -> Option<u64> {
        match self {
            TransactionOutcome::Confirmed { emitted_id, .. } => Some(*emitted_id),
            _ => None,
        }
    }

    pub fn hash(&self) -> Option<&TxHash> {
        match self {
            TransactionOutcome::Confirmed { hash, .. } => Some(hash),
            _ => None,
        }
    }

    /// Failure reason, if the outcome is `Failed`
    pub fn error(&self) -> Option<&Error> {
        match self {
            TransactionOutcome::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn follow_up(&self) -> FollowUp {
        match self {
            TransactionOutcome::Confirmed { .. } => FollowUp::None,
            TransactionOutcome::Rejected { .. } => FollowUp::ReSign,
            TransactionOutcome::Failed { reason } => match reason {
                Error::Timeout { .. } => FollowUp::PollLater,
                Error::ProviderAbsent | Error::NotConnected(_) | Error::WrongNetwork { .. } => {
                    FollowUp::Reconnect
                }
                Error::ExecutionReverted(_)
                | Error::PrecisionLoss { .. }
                | Error::InvalidAmount(_)
                | Error::InvalidAddress(_)
                | Error::InvalidArgument(_)
                | Error::NotFound(_) => FollowUp::FixInput,
                Error::UserRejected(_) => FollowUp::ReSign,
                Error::EventMissing { .. }
                | Error::Decode(_)
                | Error::Transport(_)
                | Error::Config(_)
                | Error::Internal(_) => FollowUp::Investigate,
            },
        }
    }

    /// Human-readable summary for the user
    pub fn summary(&self) -> String {
        match self {
            TransactionOutcome::Confirmed {
                hash,
                block_number,
                emitted_id,
                gas_used,
            } => format!(
                "Confirmed in block {} (transaction {}, id {}, gas used {})",
                block_number, hash, emitted_id, gas_used
            ),
            TransactionOutcome::Rejected { reason } => {
                format!("You declined the transaction in your wallet: {}", reason)
            }
            TransactionOutcome::Failed { reason } => match reason {
                Error::Timeout { hash, .. } => format!(
                    "Transaction {} was submitted but not confirmed in time. \
                     Its final status is unknown; check again before resubmitting.",
                    hash
                ),
                Error::ExecutionReverted(why) => {
                    format!("The network rejected the transaction: {}", why)
                }
                other => other.to_string(),
            },
        }
    }
}

impl From<Error> for TransactionOutcome {
    fn from(error: Error) -> Self {
        Self::from_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_rejection_is_not_a_failure() {
        let outcome = TransactionOutcome::from_error(Error::UserRejected("denied".into()));
        assert_eq!(
            outcome,
            TransactionOutcome::Rejected {
                reason: "denied".into()
            }
        );
        assert_eq!(outcome.follow_up(), FollowUp::ReSign);
        assert!(outcome.error().is_none());
    }

    #[test]
    fn test_follow_ups_are_distinct() {
        let declined = TransactionOutcome::from_error(Error::UserRejected("denied".into()));
        let reverted =
            TransactionOutcome::from_error(Error::ExecutionReverted("Listing not available".into()));
        let unknown = TransactionOutcome::from_error(Error::Timeout {
            hash: "0xfeed".into(),
            timeout_ms: 5_000,
        });

        assert_eq!(reverted.follow_up(), FollowUp::FixInput);
        assert_eq!(unknown.follow_up(), FollowUp::PollLater);
        assert_ne!(declined.summary(), reverted.summary());
        assert!(unknown.summary().contains("unknown"));
        assert!(unknown.summary().contains("0xfeed"));
    }

    #[test]
    fn test_confirmed_accessors() {
        let outcome = TransactionOutcome::Confirmed {
            hash: TxHash("0xabc".into()),
            block_number: 9,
            emitted_id: 4,
            gas_used: 52_000,
        };
        assert!(outcome.is_confirmed());
        assert_eq!(outcome.emitted_id(), Some(4));
        assert_eq!(outcome.follow_up(), FollowUp::None);
        assert!(outcome.summary().contains("gas used 52000"));
    }

    #[test]
    fn test_event_missing_needs_investigation() {
        let outcome = TransactionOutcome::from_error(Error::EventMissing {
            event: "ListingCreated".into(),
            hash: "0x1".into(),
        });
        assert_eq!(outcome.emitted_id(), None);
        assert_eq!(outcome.follow_up(), FollowUp::Investigate);
    }
}
