//! In-memory wallet and ledger
//!
//! [`SimulatedChain`] implements both [`SignerBackend`] and [`LedgerTransport`]
//! with just enough of the rental contract to exercise the client: listings,
//! leases with a one-month deposit, and the `ListingCreated` / `LeaseSigned`
//! events. Knobs let tests decline signatures, hold confirmations, drop
//! events, and force reverts. It is injected explicitly and is never a
//! fallback for a missing provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::gateway::{LEASE_SIGNED_EVENT, LISTING_CREATED_EVENT};
use crate::ledger::{EventLog, LedgerTransport, Receipt, SendOptions};
use crate::provider::{ProviderEvent, SignerBackend};
use crate::types::{Address, ChainId, Lease, LeaseId, ListingId, TxHash};
use crate::units::{Amount, BaseUnits};
use crate::{Error, Result};

/// Hardhat's first development account
pub const DEFAULT_ACCOUNT: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
pub const DEFAULT_CHAIN_ID: u64 = 31337;

const CREATE_LISTING_GAS: u64 = 120_000;
const SIGN_LEASE_GAS: u64 = 85_000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Record of a signed write, for assertions
#[derive(Debug, Clone, PartialEq)]
pub struct SentTransaction {
    pub hash: TxHash,
    pub method: String,
    pub args: Vec<Value>,
    pub from: Address,
    pub value: BaseUnits,
}

#[derive(Debug, Clone)]
struct StoredListing {
    id: u64,
    owner: Address,
    property_address: String,
    monthly_rent: BaseUnits,
    is_available: bool,
    details: String,
}

impl StoredListing {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id.to_string(),
            "owner": self.owner.to_string(),
            "propertyAddress": self.property_address,
            "monthlyRent": self.monthly_rent.to_string(),
            "isAvailable": self.is_available,
            "details": self.details,
        })
    }
}

#[derive(Debug, Clone)]
struct StoredLease {
    id: u64,
    listing_id: u64,
    tenant: Address,
    duration_months: u32,
    deposit: BaseUnits,
}

#[derive(Debug, Default)]
struct Knobs {
    decline_connect: bool,
    decline_signatures: bool,
    hold_confirmations: bool,
    omit_events: bool,
    force_revert: Option<String>,
    signature_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct ChainState {
    accounts: Vec<Address>,
    chain_id: u64,
    balances: HashMap<Address, BaseUnits>,
    listings: Vec<StoredListing>,
    leases: Vec<StoredLease>,
    block_number: u64,
    nonce: u64,
    pending: Vec<SentTransaction>,
    receipts: HashMap<TxHash, std::result::Result<Receipt, String>>,
    sent: Vec<SentTransaction>,
}

/// Builder for [`SimulatedChain`]
pub struct SimulatedChainBuilder {
    accounts: Vec<Address>,
    chain_id: u64,
}

impl SimulatedChainBuilder {
    /// Wallet accounts; the first is active. Malformed entries are skipped.
    pub fn accounts<I, S>(mut self, accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.accounts = accounts
            .into_iter()
            .filter_map(|a| match Address::parse(a.as_ref()) {
                Ok(address) => Some(address),
                Err(e) => {
                    warn!("Skipping simulated account: {}", e);
                    None
                }
            })
            .collect();
        self
    }

    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn build(self) -> Arc<SimulatedChain> {
        let (events, _) = broadcast::channel(16);
        let (blocks, _) = watch::channel(0);
        Arc::new(SimulatedChain {
            state: Mutex::new(ChainState {
                accounts: self.accounts,
                chain_id: self.chain_id,
                ..ChainState::default()
            }),
            knobs: Mutex::new(Knobs::default()),
            signer_gate: tokio::sync::Mutex::new(()),
            signature_requests: AtomicUsize::new(0),
            events,
            blocks,
        })
    }
}

/// Simulated wallet + ledger
pub struct SimulatedChain {
    state: Mutex<ChainState>,
    knobs: Mutex<Knobs>,
    /// One signature prompt at a time, like a browser wallet
    signer_gate: tokio::sync::Mutex<()>,
    signature_requests: AtomicUsize,
    events: broadcast::Sender<ProviderEvent>,
    /// Bumped whenever receipts become available
    blocks: watch::Sender<u64>,
}

impl SimulatedChain {
    pub fn builder() -> SimulatedChainBuilder {
        SimulatedChainBuilder {
            accounts: Address::parse(DEFAULT_ACCOUNT).into_iter().collect(),
            chain_id: DEFAULT_CHAIN_ID,
        }
    }

    pub fn decline_connect(&self, decline: bool) {
        lock(&self.knobs).decline_connect = decline;
    }

    pub fn decline_signatures(&self, decline: bool) {
        lock(&self.knobs).decline_signatures = decline;
    }

    /// Leave submitted transactions pending until released
    pub fn hold_confirmations(&self, hold: bool) {
        lock(&self.knobs).hold_confirmations = hold;
    }

    /// Include transactions without emitting their events
    pub fn omit_events(&self, omit: bool) {
        lock(&self.knobs).omit_events = omit;
    }

    /// Revert every subsequent transaction with `reason`
    pub fn force_revert(&self, reason: Option<&str>) {
        lock(&self.knobs).force_revert = reason.map(str::to_string);
    }

    /// Time the simulated user takes to approve a signature
    pub fn signature_delay(&self, delay: Option<Duration>) {
        lock(&self.knobs).signature_delay = delay;
    }

    /// Switch the active account and notify subscribers
    pub fn switch_account(&self, account: Address) {
        lock(&self.state).accounts = vec![account.clone()];
        let _ = self.events.send(ProviderEvent::AccountsChanged(vec![account]));
    }

    /// Switch networks and notify subscribers
    pub fn switch_chain(&self, chain_id: ChainId) {
        lock(&self.state).chain_id = chain_id.0;
        let _ = self.events.send(ProviderEvent::ChainChanged(chain_id));
    }

    pub fn set_balance(&self, account: &Address, units: BaseUnits) {
        lock(&self.state).balances.insert(account.clone(), units);
    }

    /// Number of signature prompts shown so far
    pub fn signature_requests(&self) -> usize {
        self.signature_requests.load(Ordering::SeqCst)
    }

    /// Every write accepted into the pending pool, in submission order
    pub fn sent_transactions(&self) -> Vec<SentTransaction> {
        lock(&self.state).sent.clone()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }

    pub fn listing_count(&self) -> usize {
        lock(&self.state).listings.len()
    }

    pub fn lease(&self, id: LeaseId) -> Option<Lease> {
        lock(&self.state)
            .leases
            .iter()
            .find(|l| l.id == id.0)
            .map(|l| Lease {
                id: LeaseId(l.id),
                listing_id: ListingId(l.listing_id),
                tenant: l.tenant.clone(),
                duration_months: l.duration_months,
                security_deposit: Amount::from_base_units(l.deposit),
            })
    }

    /// Stop holding and include every pending transaction in submission order
    pub fn release_confirmations(&self) {
        lock(&self.knobs).hold_confirmations = false;
        self.mine_pending(false);
    }

    /// Include every pending transaction, newest first
    pub fn release_confirmations_reversed(&self) {
        lock(&self.knobs).hold_confirmations = false;
        self.mine_pending(true);
    }

    fn mine_pending(&self, reversed: bool) {
        let (omit_events, force_revert) = {
            let knobs = lock(&self.knobs);
            (knobs.omit_events, knobs.force_revert.clone())
        };

        let height = {
            let mut state = lock(&self.state);
            let mut pending = std::mem::take(&mut state.pending);
            if reversed {
                pending.reverse();
            }
            for tx in pending {
                let result = match &force_revert {
                    Some(reason) => Err(reason.clone()),
                    None => state.execute(&tx, omit_events),
                };
                if let Err(reason) = &result {
                    debug!("Simulated {} reverted: {}", tx.hash, reason);
                }
                state.receipts.insert(tx.hash.clone(), result);
            }
            state.block_number
        };

        self.blocks.send_replace(height);
    }
}

impl ChainState {
    fn execute(&mut self, tx: &SentTransaction, omit_events: bool) -> std::result::Result<Receipt, String> {
        let arg = |i: usize| -> std::result::Result<String, String> {
            match tx.args.get(i) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(Value::Number(n)) => Ok(n.to_string()),
                _ => Err(format!("missing argument {}", i)),
            }
        };

        let (event, gas_used) = match tx.method.as_str() {
            "createListing" => {
                let monthly_rent: BaseUnits = arg(1)?.parse().map_err(|e: Error| e.to_string())?;
                let id = self.listings.len() as u64 + 1;
                self.listings.push(StoredListing {
                    id,
                    owner: tx.from.clone(),
                    property_address: arg(0)?,
                    monthly_rent,
                    is_available: true,
                    details: arg(2)?,
                });
                (event(LISTING_CREATED_EVENT, "listingId", id), CREATE_LISTING_GAS)
            }
            "signLease" => {
                let listing_id: u64 = arg(0)?.parse().map_err(|_| "bad listing id".to_string())?;
                let duration_months: u32 = arg(1)?.parse().map_err(|_| "bad duration".to_string())?;
                let listing = self
                    .listings
                    .iter_mut()
                    .find(|l| l.id == listing_id)
                    .ok_or_else(|| "Listing does not exist".to_string())?;
                if !listing.is_available {
                    return Err("Listing not available".to_string());
                }
                if tx.value != listing.monthly_rent {
                    return Err("Incorrect security deposit".to_string());
                }
                listing.is_available = false;

                let id = self.leases.len() as u64 + 1;
                self.leases.push(StoredLease {
                    id,
                    listing_id,
                    tenant: tx.from.clone(),
                    duration_months,
                    deposit: tx.value,
                });
                (event(LEASE_SIGNED_EVENT, "leaseId", id), SIGN_LEASE_GAS)
            }
            other => return Err(format!("unknown method {}", other)),
        };

        self.block_number += 1;
        Ok(Receipt {
            transaction_hash: tx.hash.clone(),
            block_number: self.block_number,
            gas_used,
            events: if omit_events { Vec::new() } else { vec![event] },
        })
    }
}

fn event(name: &str, field: &str, id: u64) -> EventLog {
    let mut return_values = Map::new();
    return_values.insert(field.to_string(), Value::String(id.to_string()));
    EventLog {
        name: name.to_string(),
        return_values,
    }
}

#[async_trait]
impl SignerBackend for SimulatedChain {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        if lock(&self.knobs).decline_connect {
            return Err(Error::UserRejected("User rejected the request.".to_string()));
        }
        Ok(lock(&self.state).accounts.clone())
    }

    async fn chain_id(&self) -> Result<ChainId> {
        Ok(ChainId(lock(&self.state).chain_id))
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl LedgerTransport for SimulatedChain {
    async fn chain_id(&self) -> Result<ChainId> {
        Ok(ChainId(lock(&self.state).chain_id))
    }

    async fn get_balance(&self, address: &Address) -> Result<BaseUnits> {
        Ok(lock(&self.state)
            .balances
            .get(address)
            .copied()
            .unwrap_or_default())
    }

    async fn call(&self, _contract: &Address, method: &str, args: &[Value]) -> Result<Value> {
        let state = lock(&self.state);
        match method {
            "getListing" => {
                let id = match args.first() {
                    Some(Value::String(s)) => s.parse::<u64>().ok(),
                    Some(Value::Number(n)) => n.as_u64(),
                    _ => None,
                }
                .ok_or_else(|| Error::Transport("getListing expects a uint256".to_string()))?;

                state
                    .listings
                    .iter()
                    .find(|l| l.id == id)
                    .map(StoredListing::to_json)
                    .ok_or_else(|| Error::ExecutionReverted("Listing does not exist".to_string()))
            }
            "getAllListings" => Ok(Value::Array(
                state.listings.iter().map(StoredListing::to_json).collect(),
            )),
            other => Err(Error::Transport(format!("unknown view method {}", other))),
        }
    }

    async fn send(
        &self,
        _contract: &Address,
        method: &str,
        args: &[Value],
        options: &SendOptions,
    ) -> Result<TxHash> {
        let _prompt = self.signer_gate.lock().await;
        self.signature_requests.fetch_add(1, Ordering::SeqCst);

        let delay = lock(&self.knobs).signature_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (decline, hold) = {
            let knobs = lock(&self.knobs);
            (knobs.decline_signatures, knobs.hold_confirmations)
        };
        if decline {
            return Err(Error::UserRejected(
                "User denied transaction signature.".to_string(),
            ));
        }

        let hash = {
            let mut state = lock(&self.state);
            if !state.accounts.contains(&options.from) {
                return Err(Error::Transport(format!(
                    "account {} is not managed by this wallet",
                    options.from
                )));
            }

            state.nonce += 1;
            let hash = TxHash(format!("0x{:064x}", state.nonce));
            let tx = SentTransaction {
                hash: hash.clone(),
                method: method.to_string(),
                args: args.to_vec(),
                from: options.from.clone(),
                value: options.value,
            };
            state.sent.push(tx.clone());
            state.pending.push(tx);
            hash
        };

        if !hold {
            self.mine_pending(false);
        }
        Ok(hash)
    }

    async fn wait_for_receipt(&self, hash: &TxHash) -> Result<Receipt> {
        let mut blocks = self.blocks.subscribe();
        loop {
            let ready = lock(&self.state).receipts.get(hash).cloned();
            if let Some(result) = ready {
                return result.map_err(Error::ExecutionReverted);
            }
            if blocks.changed().await.is_err() {
                return Err(Error::Transport("simulated chain shut down".to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    fn options(chain: &SimulatedChain, value: u128) -> SendOptions {
        SendOptions {
            from: lock(&chain.state).accounts[0].clone(),
            value: BaseUnits(value),
        }
    }

    #[tokio::test]
    async fn test_held_transactions_confirm_on_release() {
        let chain = SimulatedChain::builder().build();
        let contract = Address::parse(CONTRACT).unwrap();
        chain.hold_confirmations(true);

        let args = vec![json!("1 Main St"), json!("1000"), json!("{}")];
        let hash = chain
            .send(&contract, "createListing", &args, &options(&chain, 0))
            .await
            .unwrap();
        assert_eq!(chain.pending_count(), 1);
        assert_eq!(chain.listing_count(), 0);

        chain.release_confirmations();
        let receipt = chain.wait_for_receipt(&hash).await.unwrap();
        assert_eq!(receipt.block_number, 1);
        assert!(receipt.event(LISTING_CREATED_EVENT).is_some());
        assert_eq!(chain.listing_count(), 1);
    }

    #[tokio::test]
    async fn test_deposit_must_match_rent() {
        let chain = SimulatedChain::builder().build();
        let contract = Address::parse(CONTRACT).unwrap();

        let create = vec![json!("1 Main St"), json!("1000"), json!("{}")];
        chain
            .send(&contract, "createListing", &create, &options(&chain, 0))
            .await
            .unwrap();

        let lease = vec![json!("1"), json!("12")];
        let short = chain
            .send(&contract, "signLease", &lease, &options(&chain, 999))
            .await
            .unwrap();
        assert_eq!(
            chain.wait_for_receipt(&short).await,
            Err(Error::ExecutionReverted("Incorrect security deposit".to_string()))
        );

        let exact = chain
            .send(&contract, "signLease", &lease, &options(&chain, 1000))
            .await
            .unwrap();
        assert!(chain.wait_for_receipt(&exact).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_sender_is_refused() {
        let chain = SimulatedChain::builder().build();
        let stranger = SendOptions {
            from: Address::parse("0x0000000000000000000000000000000000000001").unwrap(),
            value: BaseUnits::zero(),
        };
        let result = chain
            .send(&Address::parse(CONTRACT).unwrap(), "createListing", &[], &stranger)
            .await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(chain.sent_transactions().is_empty());
    }
}
