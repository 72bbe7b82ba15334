//! Transaction pre-flight
//!
//! Builds a write before it reaches the signer: snapshots the session,
//! checks the network, and encodes the call. Everything here is local, so
//! configuration-shape errors cost no round trip.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::gateway::{ContractGateway, EncodedCall, TransactionRequest};
use crate::provider::{ProviderSession, Session};
use crate::{Error, Result};

/// A request that passed pre-flight and may be handed to the signer
#[derive(Debug, Clone)]
pub(crate) struct PreparedSubmission {
    /// Session snapshot the write will be signed under
    pub session: Session,

    /// Encoded call
    pub call: EncodedCall,

    /// Preparation timestamp (Unix milliseconds)
    pub prepared_at: u64,
}

/// Pre-flight validation for writes
pub(crate) struct SubmissionHandler {
    session: Arc<ProviderSession>,

    /// Current time provider (for testing)
    current_time_fn: Box<dyn Fn() -> u64 + Send + Sync>,
}

impl SubmissionHandler {
    pub fn new(session: Arc<ProviderSession>) -> Self {
        Self {
            session,
            current_time_fn: Box::new(crate::lifecycle::unix_millis),
        }
    }

    /// Set the current time function (for testing)
    pub fn with_time_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        self.current_time_fn = Box::new(f);
        self
    }

    /// Validate and encode a request
    ///
    /// Checks, in order:
    /// 1. a live session exists
    /// 2. the session is on the contract's network
    /// 3. the arguments and attached value encode exactly
    pub fn prepare(
        &self,
        gateway: &ContractGateway,
        request: &TransactionRequest,
    ) -> Result<PreparedSubmission> {
        let session = self.session.require().map_err(|e| {
            debug!("Refusing {} without a wallet session", request.method());
            e
        })?;

        let expected = gateway.expected_network();
        if session.chain_id != expected {
            warn!(
                "Refusing {}: wallet on chain {}, contract on chain {}",
                request.method(),
                session.chain_id,
                expected
            );
            return Err(Error::WrongNetwork {
                expected,
                actual: session.chain_id,
            });
        }

        let call = gateway.encode(request)?;
        debug!(
            "Prepared {} for {} with value {}",
            call.method, session.account, call.value
        );

        Ok(PreparedSubmission {
            session,
            call,
            prepared_at: (self.current_time_fn)(),
        })
    }
}
