//! Transaction orchestrator
//!
//! Drives each write through `Building -> AwaitingSignature -> Submitted`
//! to a terminal outcome, and is the only surface the application uses.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::gateway::{ContractGateway, TransactionRequest};
use crate::ledger::LedgerClient;
use crate::lifecycle::{LifecycleManager, LifecycleStatistics, OrchestrationStatus, RunId, RunLifecycle};
use crate::outcome::TransactionOutcome;
use crate::provider::{ProviderSession, Session};
use crate::submission::SubmissionHandler;
use crate::types::{Listing, ListingFields, ListingId};
use crate::units::Amount;
use crate::{Error, OrchestratorConfig, Result};

/// Transaction orchestrator
///
/// Each call to [`run`](Self::run) makes at most one submission attempt and
/// returns a fresh [`TransactionOutcome`]. Writes are never retried here;
/// resubmitting a paid write is the caller's decision.
pub struct TransactionOrchestrator {
    config: OrchestratorConfig,
    session: Arc<ProviderSession>,
    gateway: ContractGateway,
    submission_handler: SubmissionHandler,
    lifecycle_manager: LifecycleManager,
}

impl TransactionOrchestrator {
    pub fn new(config: OrchestratorConfig, session: Arc<ProviderSession>, ledger: LedgerClient) -> Self {
        let gateway = ContractGateway::new(
            ledger,
            session.clone(),
            config.contract_address.clone(),
            config.network,
        );
        let submission_handler = SubmissionHandler::new(session.clone());
        let lifecycle_manager =
            LifecycleManager::new(config.max_tracked_transactions, config.max_finalized_age_ms);

        Self {
            config,
            session,
            gateway,
            submission_handler,
            lifecycle_manager,
        }
    }

    /// Set the clock used for lifecycle and pre-flight timestamps (for testing)
    pub fn with_time_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> u64 + Clone + Send + Sync + 'static,
    {
        self.submission_handler = self.submission_handler.with_time_fn(f.clone());
        self.lifecycle_manager = self.lifecycle_manager.with_time_fn(f);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Connect the wallet, establishing a fresh session
    pub async fn connect(&self) -> Result<Session> {
        self.session.connect().await
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.session.snapshot()
    }

    /// Balance of the connected account, in display units
    pub async fn account_balance(&self) -> Result<Amount> {
        let session = self.session.require()?;
        self.gateway.ledger().get_balance(&session.account).await
    }

    /// Publish a new listing
    pub async fn submit_listing(&self, fields: ListingFields) -> TransactionOutcome {
        let details = match serde_json::to_string(&fields.details) {
            Ok(details) => details,
            Err(e) => return TransactionOutcome::from_error(e.into()),
        };
        let request =
            TransactionRequest::create_listing(fields.property_address, fields.monthly_rent, details);
        self.run(request).await
    }

    /// Sign a lease on `listing_id`, paying one month's rent as deposit
    pub async fn submit_lease(
        &self,
        listing_id: ListingId,
        duration_months: u32,
        monthly_rent: Amount,
    ) -> TransactionOutcome {
        let request = TransactionRequest::sign_lease(listing_id, duration_months, monthly_rent);
        self.run(request).await
    }

    /// Read one listing from the ledger
    pub async fn fetch_listing(&self, id: ListingId) -> Result<Listing> {
        self.gateway.get_listing(id).await
    }

    /// Read all listings; order is the ledger's and only meaningful for display
    pub async fn fetch_all_listings(&self) -> Result<Vec<Listing>> {
        self.gateway.get_all_listings().await
    }

    /// Orchestrate one write
    pub async fn run(&self, request: TransactionRequest) -> TransactionOutcome {
        self.run_tracked(request).await.1
    }

    /// Orchestrate one write and return its lifecycle id with the outcome
    pub async fn run_tracked(&self, request: TransactionRequest) -> (Option<RunId>, TransactionOutcome) {
        let method = request.method();
        info!("Orchestrating {}", method);

        let run_id = match self.lifecycle_manager.register(method) {
            Ok(run_id) => run_id,
            Err(e) => {
                error!("Cannot track {}: {}", method, e);
                return (None, TransactionOutcome::from_error(e));
            }
        };

        // Building: local checks only, no suspension point
        let prepared = match self.submission_handler.prepare(&self.gateway, &request) {
            Ok(prepared) => prepared,
            Err(e) => return (Some(run_id), self.finish(run_id, e)),
        };

        debug!("{} prepared at {}", run_id, prepared.prepared_at);

        // AwaitingSignature
        self.track(self.lifecycle_manager.mark_awaiting_signature(run_id));
        let pending = match self.gateway.submit(&prepared.session, &prepared.call).await {
            Ok(pending) => pending,
            Err(e) => {
                let e = self.signer_error(&prepared.session, e);
                return (Some(run_id), self.finish(run_id, e));
            }
        };

        // Submitted
        self.track(self.lifecycle_manager.mark_submitted(run_id, &pending.hash));
        let timeout = self.config.confirmation_timeout();
        let receipt = match tokio::time::timeout(timeout, self.gateway.await_receipt(&pending)).await {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => return (Some(run_id), self.finish(run_id, e)),
            Err(_) => {
                let e = Error::Timeout {
                    hash: pending.hash.to_string(),
                    timeout_ms: self.config.confirmation_timeout_ms,
                };
                return (Some(run_id), self.finish(run_id, e));
            }
        };

        let emitted_id = match ContractGateway::emitted_id(method, &receipt) {
            Ok(id) => id,
            Err(e) => return (Some(run_id), self.finish(run_id, e)),
        };

        self.track(self.lifecycle_manager.mark_confirmed(
            run_id,
            receipt.block_number,
            receipt.gas_used,
            emitted_id,
        ));
        info!(
            "{} confirmed as {} in block {}",
            method, receipt.transaction_hash, receipt.block_number
        );

        (
            Some(run_id),
            TransactionOutcome::Confirmed {
                hash: receipt.transaction_hash,
                block_number: receipt.block_number,
                emitted_id,
                gas_used: receipt.gas_used,
            },
        )
    }

    fn finish(&self, run_id: RunId, e: Error) -> TransactionOutcome {
        let transition = match &e {
            Error::UserRejected(reason) => self.lifecycle_manager.mark_rejected(run_id, reason.clone()),
            other => self.lifecycle_manager.mark_failed(run_id, other),
        };
        self.track(transition);

        if let Error::Timeout { hash, .. } = &e {
            warn!("{} outcome unknown; {} may still be included", run_id, hash);
        }
        TransactionOutcome::from_error(e)
    }

    /// A signer failure under a session that went stale while prompting is
    /// reported as a wallet change, not as whatever the signer said
    fn signer_error(&self, session: &Session, e: Error) -> Error {
        if matches!(e, Error::UserRejected(_)) || self.session.is_current(session) {
            return e;
        }
        debug!("Signer failed after the wallet changed: {}", e);
        Error::NotConnected("wallet account or network changed while awaiting signature".to_string())
    }

    fn track(&self, transition: Result<()>) {
        if let Err(e) = transition {
            debug!("Lifecycle bookkeeping skipped: {}", e);
        }
    }

    pub fn get_run_status(&self, run_id: RunId) -> Option<OrchestrationStatus> {
        self.lifecycle_manager.get_status(run_id)
    }

    pub fn get_run_lifecycle(&self, run_id: RunId) -> Option<RunLifecycle> {
        self.lifecycle_manager.get_lifecycle(run_id)
    }

    /// Runs still waiting on the signer or the network
    pub fn in_flight_runs(&self) -> Vec<RunId> {
        self.lifecycle_manager.in_flight()
    }

    pub fn get_statistics(&self) -> LifecycleStatistics {
        self.lifecycle_manager.get_statistics()
    }

    /// Prune old finalized lifecycle records
    pub fn run_cleanup(&self) -> usize {
        let pruned = self
            .lifecycle_manager
            .prune_finalized(self.config.max_finalized_age_ms);
        if pruned > 0 {
            info!("Pruned {} finalized runs", pruned);
        }
        pruned
    }

    /// Spawn periodic lifecycle cleanup
    pub fn start_background_tasks(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let orchestrator = Arc::downgrade(&self);
        let interval = std::time::Duration::from_millis(self.config.cleanup_interval_ms);

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match orchestrator.upgrade() {
                    Some(orchestrator) => {
                        orchestrator.run_cleanup();
                    }
                    None => break,
                }
            }
        });

        info!("Transaction orchestrator background tasks started");
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::FollowUp;
    use crate::simulated::SimulatedChain;
    use crate::types::{Address, ChainId, PropertyDetails};
    use std::time::Duration;

    const ALICE: &str = "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb0";
    const BOB: &str = "0x8ba1f109551bD432803012645Ac136ddd64DBA72";
    const CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    fn orchestrator(chain: &Arc<SimulatedChain>, timeout_ms: u64) -> TransactionOrchestrator {
        let config = OrchestratorConfig::new(Address::parse(CONTRACT).unwrap(), ChainId(31337))
            .with_confirmation_timeout_ms(timeout_ms);
        TransactionOrchestrator::new(
            config,
            ProviderSession::with_backend(chain.clone()),
            LedgerClient::new(chain.clone()),
        )
    }

    fn connected_chain() -> Arc<SimulatedChain> {
        SimulatedChain::builder()
            .accounts(vec![ALICE])
            .chain_id(31337)
            .build()
    }

    fn fields(address: &str, rent: u64) -> ListingFields {
        ListingFields {
            property_address: address.to_string(),
            monthly_rent: Amount::from_whole(rent),
            details: PropertyDetails {
                bedrooms: 3,
                ..PropertyDetails::default()
            },
        }
    }

    #[tokio::test]
    async fn test_create_listing_then_fetch() {
        let chain = connected_chain();
        let orchestrator = orchestrator(&chain, 5_000);
        orchestrator.connect().await.unwrap();

        let outcome = orchestrator
            .run(TransactionRequest::create_listing(
                "123 Example St",
                Amount::from_whole(1200),
                r#"{"bedrooms":3}"#,
            ))
            .await;
        let id = match &outcome {
            TransactionOutcome::Confirmed { emitted_id, .. } => *emitted_id,
            other => panic!("expected confirmation, got {:?}", other),
        };

        let listing = orchestrator.fetch_listing(ListingId(id)).await.unwrap();
        assert_eq!(listing.monthly_rent, Amount::from_whole(1200));
        assert!(listing.is_available);
        assert_eq!(listing.property_address, "123 Example St");
        assert_eq!(listing.owner, Address::parse(ALICE).unwrap());
    }

    #[tokio::test]
    async fn test_submit_listing_serializes_details() {
        let chain = connected_chain();
        let orchestrator = orchestrator(&chain, 5_000);
        orchestrator.connect().await.unwrap();

        let outcome = orchestrator.submit_listing(fields("456 State St", 950)).await;
        assert!(outcome.is_confirmed());

        let listings = orchestrator.fetch_all_listings().await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].property_details().unwrap().bedrooms, 3);
    }

    #[tokio::test]
    async fn test_sign_lease_while_disconnected() {
        let chain = connected_chain();
        let orchestrator = orchestrator(&chain, 5_000);

        let outcome = orchestrator
            .submit_lease(ListingId(7), 12, Amount::from_whole(950))
            .await;
        assert!(matches!(
            outcome,
            TransactionOutcome::Failed {
                reason: Error::NotConnected(_)
            }
        ));
        assert_eq!(outcome.follow_up(), FollowUp::Reconnect);
        assert_eq!(chain.signature_requests(), 0);
    }

    #[tokio::test]
    async fn test_lease_attaches_one_month_for_any_duration() {
        let chain = connected_chain();
        let orchestrator = orchestrator(&chain, 5_000);
        orchestrator.connect().await.unwrap();

        let rent = Amount::parse("950.5").unwrap();
        for (i, months) in [1u32, 6, 12, 24].into_iter().enumerate() {
            let listing = orchestrator
                .run(TransactionRequest::create_listing(format!("{} Grant St", i), rent, "{}"))
                .await;
            let listing_id = ListingId(listing.emitted_id().unwrap());

            let lease = orchestrator.submit_lease(listing_id, months, rent).await;
            assert!(lease.is_confirmed(), "lease for {} months: {:?}", months, lease);
        }

        let lease_values: Vec<_> = chain
            .sent_transactions()
            .into_iter()
            .filter(|tx| tx.method == "signLease")
            .map(|tx| tx.value)
            .collect();
        assert_eq!(lease_values.len(), 4);
        assert!(lease_values
            .iter()
            .all(|v| *v == rent.to_base_units().unwrap()));
    }

    #[tokio::test]
    async fn test_declined_signature_creates_nothing() {
        let chain = connected_chain();
        let orchestrator = orchestrator(&chain, 5_000);
        orchestrator.connect().await.unwrap();
        chain.decline_signatures(true);

        let (run_id, outcome) = orchestrator
            .run_tracked(TransactionRequest::create_listing(
                "123 Example St",
                Amount::from_whole(1200),
                "{}",
            ))
            .await;
        assert!(matches!(outcome, TransactionOutcome::Rejected { .. }));
        assert_eq!(outcome.follow_up(), FollowUp::ReSign);
        assert_eq!(
            orchestrator.get_run_status(run_id.unwrap()),
            Some(OrchestrationStatus::Rejected)
        );

        assert!(orchestrator.fetch_all_listings().await.unwrap().is_empty());
        assert!(matches!(
            orchestrator.fetch_listing(ListingId(1)).await,
            Err(Error::NotFound(1))
        ));
    }

    #[tokio::test]
    async fn test_missing_event_is_not_confirmed() {
        let chain = connected_chain();
        let orchestrator = orchestrator(&chain, 5_000);
        orchestrator.connect().await.unwrap();
        chain.omit_events(true);

        let outcome = orchestrator.submit_listing(fields("789 Grant St", 1500)).await;
        assert!(matches!(
            outcome,
            TransactionOutcome::Failed {
                reason: Error::EventMissing { .. }
            }
        ));
        assert_eq!(outcome.emitted_id(), None);
        // included on chain all the same
        assert_eq!(chain.listing_count(), 1);
    }

    #[tokio::test]
    async fn test_revert_is_reported_without_retry() {
        let chain = connected_chain();
        let orchestrator = orchestrator(&chain, 5_000);
        orchestrator.connect().await.unwrap();

        let listing = orchestrator.submit_listing(fields("321 Salisbury St", 850)).await;
        let listing_id = ListingId(listing.emitted_id().unwrap());
        assert!(orchestrator
            .submit_lease(listing_id, 12, Amount::from_whole(850))
            .await
            .is_confirmed());

        let again = orchestrator
            .submit_lease(listing_id, 12, Amount::from_whole(850))
            .await;
        assert_eq!(
            again,
            TransactionOutcome::Failed {
                reason: Error::ExecutionReverted("Listing not available".to_string())
            }
        );
        assert_eq!(again.follow_up(), FollowUp::FixInput);
        // one attempt per call: create + two leases
        assert_eq!(chain.sent_transactions().len(), 3);
    }

    #[tokio::test]
    async fn test_wrong_network_never_reaches_signer() {
        let chain = SimulatedChain::builder().chain_id(1).build();
        let orchestrator = orchestrator(&chain, 5_000);
        orchestrator.connect().await.unwrap();

        let outcome = orchestrator.submit_listing(fields("1 Main St", 1000)).await;
        assert_eq!(
            outcome,
            TransactionOutcome::Failed {
                reason: Error::WrongNetwork {
                    expected: ChainId(31337),
                    actual: ChainId(1)
                }
            }
        );
        assert_eq!(chain.signature_requests(), 0);
    }

    #[tokio::test]
    async fn test_precision_loss_never_reaches_signer() {
        let chain = connected_chain();
        let orchestrator = orchestrator(&chain, 5_000);
        orchestrator.connect().await.unwrap();

        let rent = Amount::parse("0.0000000000000000001").unwrap();
        let outcome = orchestrator.submit_lease(ListingId(1), 12, rent).await;
        assert!(matches!(
            outcome,
            TransactionOutcome::Failed {
                reason: Error::PrecisionLoss { .. }
            }
        ));
        assert_eq!(chain.signature_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_outcome_is_final() {
        let chain = connected_chain();
        let orchestrator = orchestrator(&chain, 1_000);
        orchestrator.connect().await.unwrap();
        chain.hold_confirmations(true);

        let (run_id, outcome) = orchestrator
            .run_tracked(TransactionRequest::create_listing(
                "123 Example St",
                Amount::from_whole(1200),
                "{}",
            ))
            .await;
        let run_id = run_id.unwrap();
        assert!(matches!(
            outcome,
            TransactionOutcome::Failed {
                reason: Error::Timeout { timeout_ms: 1_000, .. }
            }
        ));
        assert_eq!(outcome.follow_up(), FollowUp::PollLater);
        let snapshot = outcome.clone();

        // the network settles it after we gave up
        chain.release_confirmations();
        tokio::task::yield_now().await;

        assert_eq!(outcome, snapshot);
        assert_eq!(orchestrator.get_run_status(run_id), Some(OrchestrationStatus::Failed));
        assert_eq!(orchestrator.get_run_lifecycle(run_id).unwrap().emitted_id, None);
        assert_eq!(orchestrator.fetch_all_listings().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_runs_confirm_out_of_order() {
        let chain = connected_chain();
        let orchestrator = orchestrator(&chain, 60_000);
        orchestrator.connect().await.unwrap();
        chain.hold_confirmations(true);

        let release = async {
            while chain.pending_count() < 2 {
                tokio::task::yield_now().await;
            }
            chain.release_confirmations_reversed();
        };
        let (first, second, _) = tokio::join!(
            orchestrator.submit_listing(fields("1 First St", 1000)),
            orchestrator.submit_listing(fields("2 Second St", 2000)),
            release,
        );

        let first_id = first.emitted_id().unwrap();
        let second_id = second.emitted_id().unwrap();
        assert_ne!(first_id, second_id);

        // each run got the id its own transaction emitted
        let first_listing = orchestrator.fetch_listing(ListingId(first_id)).await.unwrap();
        let second_listing = orchestrator.fetch_listing(ListingId(second_id)).await.unwrap();
        assert_eq!(first_listing.property_address, "1 First St");
        assert_eq!(second_listing.property_address, "2 Second St");
        assert_eq!(orchestrator.get_statistics().confirmed_count, 2);
    }

    #[tokio::test]
    async fn test_serialized_signer_does_not_deadlock() {
        let chain = connected_chain();
        chain.signature_delay(Some(Duration::from_millis(5)));
        let orchestrator = orchestrator(&chain, 60_000);
        orchestrator.connect().await.unwrap();

        let (a, b, c) = tokio::join!(
            orchestrator.submit_listing(fields("1 A St", 100)),
            orchestrator.submit_listing(fields("2 B St", 200)),
            orchestrator.submit_listing(fields("3 C St", 300)),
        );
        assert!(a.is_confirmed() && b.is_confirmed() && c.is_confirmed());
        assert_eq!(chain.signature_requests(), 3);
    }

    #[tokio::test]
    async fn test_account_change_requires_reconnect() {
        let chain = connected_chain();
        let orchestrator = orchestrator(&chain, 5_000);
        orchestrator.connect().await.unwrap();

        chain.switch_account(Address::parse(BOB).unwrap());
        for _ in 0..10 {
            if !orchestrator.is_connected() {
                break;
            }
            tokio::task::yield_now().await;
        }

        let outcome = orchestrator.submit_listing(fields("1 Main St", 1000)).await;
        assert!(matches!(
            outcome,
            TransactionOutcome::Failed {
                reason: Error::NotConnected(_)
            }
        ));
        assert_eq!(chain.signature_requests(), 0);

        orchestrator.connect().await.unwrap();
        assert!(orchestrator
            .submit_listing(fields("1 Main St", 1000))
            .await
            .is_confirmed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wallet_change_while_awaiting_signature() {
        let chain = connected_chain();
        chain.signature_delay(Some(Duration::from_millis(20)));
        let orchestrator = orchestrator(&chain, 60_000);
        orchestrator.connect().await.unwrap();

        let switch = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            chain.switch_account(Address::parse(BOB).unwrap());
        };
        let (first, second, _) = tokio::join!(
            orchestrator.submit_listing(fields("1 First St", 1000)),
            orchestrator.submit_listing(fields("2 Second St", 2000)),
            switch,
        );

        for outcome in [first, second] {
            assert!(
                matches!(
                    outcome,
                    TransactionOutcome::Failed {
                        reason: Error::NotConnected(_)
                    }
                ),
                "unexpected outcome {:?}",
                outcome
            );
            assert_eq!(outcome.follow_up(), FollowUp::Reconnect);
        }
        assert!(chain.sent_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_injected_clock_and_in_flight_runs() {
        let chain = connected_chain();
        chain.hold_confirmations(true);
        let orchestrator = orchestrator(&chain, 60_000).with_time_fn(|| 7_000);
        orchestrator.connect().await.unwrap();

        let release = async {
            while chain.pending_count() < 1 {
                tokio::task::yield_now().await;
            }
            assert_eq!(orchestrator.in_flight_runs().len(), 1);
            chain.release_confirmations();
        };
        let ((run_id, outcome), _) = tokio::join!(
            orchestrator.run_tracked(TransactionRequest::create_listing(
                "1 Main St",
                Amount::from_whole(1000),
                "{}",
            )),
            release,
        );
        assert!(outcome.is_confirmed());

        let lifecycle = orchestrator.get_run_lifecycle(run_id.unwrap()).unwrap();
        assert_eq!(lifecycle.started_at, 7_000);
        assert_eq!(lifecycle.finalized_at, Some(7_000));
        assert!(orchestrator.in_flight_runs().is_empty());
    }

    #[tokio::test]
    async fn test_account_balance() {
        let chain = connected_chain();
        let alice = Address::parse(ALICE).unwrap();
        chain.set_balance(&alice, Amount::from_whole(3).to_base_units().unwrap());
        let orchestrator = orchestrator(&chain, 5_000);

        assert!(orchestrator.account_balance().await.is_err());
        orchestrator.connect().await.unwrap();
        assert_eq!(orchestrator.account_balance().await.unwrap(), Amount::from_whole(3));
    }

    #[tokio::test]
    async fn test_cleanup_prunes_nothing_fresh() {
        let chain = connected_chain();
        let orchestrator = orchestrator(&chain, 5_000);
        let _ = orchestrator.submit_listing(fields("1 Main St", 1000)).await;
        assert_eq!(orchestrator.get_statistics().failed_count, 1);
        assert_eq!(orchestrator.run_cleanup(), 0);
    }
}
