//! Ledger client
//!
//! Typed handle over the remote ledger: network id, balances, unit
//! conversion, and the raw read/write boundary the contract gateway uses.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::types::{Address, ChainId, TxHash};
use crate::units::{Amount, BaseUnits};
use crate::Result;

/// Event emitted by a confirmed transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    pub name: String,
    #[serde(default)]
    pub return_values: Map<String, Value>,
}

/// Inclusion receipt for a submitted transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub gas_used: u64,
    #[serde(default)]
    pub events: Vec<EventLog>,
}

impl Receipt {
    /// First event with the given name
    pub fn event(&self, name: &str) -> Option<&EventLog> {
        self.events.iter().find(|e| e.name == name)
    }
}

/// Sender and attached value for a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOptions {
    pub from: Address,
    pub value: BaseUnits,
}

/// Ledger read/write boundary
///
/// `send` covers the signature prompt and acceptance into the pending pool;
/// `wait_for_receipt` resolves once inclusion is observed.
#[async_trait]
pub trait LedgerTransport: Send + Sync {
    /// Network the ledger endpoint serves
    async fn chain_id(&self) -> Result<ChainId>;

    /// Balance in base units
    async fn get_balance(&self, address: &Address) -> Result<BaseUnits>;

    /// Read-only contract call; no signature, no value
    async fn call(&self, contract: &Address, method: &str, args: &[Value]) -> Result<Value>;

    /// Signed contract call
    ///
    /// Fails with `UserRejected` if the signer declines.
    async fn send(
        &self,
        contract: &Address,
        method: &str,
        args: &[Value],
        options: &SendOptions,
    ) -> Result<TxHash>;

    /// Wait for inclusion of a submitted transaction
    ///
    /// Fails with `ExecutionReverted` if the ledger reports a failed execution.
    async fn wait_for_receipt(&self, hash: &TxHash) -> Result<Receipt>;
}

/// Ledger client
#[derive(Clone)]
pub struct LedgerClient {
    transport: Arc<dyn LedgerTransport>,
}

impl LedgerClient {
    pub fn new(transport: Arc<dyn LedgerTransport>) -> Self {
        Self { transport }
    }

    /// Network id reported by the ledger endpoint
    pub async fn network_id(&self) -> Result<ChainId> {
        self.transport.chain_id().await
    }

    /// Balance of `address` in display units
    pub async fn get_balance(&self, address: &Address) -> Result<Amount> {
        let units = self.transport.get_balance(address).await?;
        debug!("Balance of {}: {} base units", address, units);
        Ok(self.to_display_units(units))
    }

    pub fn to_base_units(&self, amount: &Amount) -> Result<BaseUnits> {
        amount.to_base_units()
    }

    pub fn to_display_units(&self, units: BaseUnits) -> Amount {
        Amount::from_base_units(units)
    }

    pub async fn call(&self, contract: &Address, method: &str, args: &[Value]) -> Result<Value> {
        debug!("Calling {} on {}", method, contract);
        self.transport.call(contract, method, args).await
    }

    pub async fn send(
        &self,
        contract: &Address,
        method: &str,
        args: &[Value],
        options: &SendOptions,
    ) -> Result<TxHash> {
        debug!(
            "Sending {} to {} from {} with value {}",
            method, contract, options.from, options.value
        );
        self.transport.send(contract, method, args, options).await
    }

    pub async fn wait_for_receipt(&self, hash: &TxHash) -> Result<Receipt> {
        self.transport.wait_for_receipt(hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedChain;

    const ALICE: &str = "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb0";

    #[tokio::test]
    async fn test_balance_in_display_units() {
        let alice = Address::parse(ALICE).unwrap();
        let chain = SimulatedChain::builder().accounts(vec![ALICE]).build();
        chain.set_balance(&alice, Amount::parse("2.5").unwrap().to_base_units().unwrap());

        let client = LedgerClient::new(chain);
        assert_eq!(client.get_balance(&alice).await.unwrap(), Amount::parse("2.5").unwrap());
    }

    #[tokio::test]
    async fn test_network_id() {
        let chain = SimulatedChain::builder().chain_id(11155111).build();
        let client = LedgerClient::new(chain);
        assert_eq!(client.network_id().await.unwrap(), ChainId(11155111));
    }

    #[test]
    fn test_receipt_event_lookup() {
        let receipt: Receipt = serde_json::from_value(serde_json::json!({
            "transaction_hash": "0xabc",
            "block_number": 7,
            "gas_used": 21000,
            "events": [{"name": "ListingCreated", "return_values": {"listingId": "3"}}]
        }))
        .unwrap();

        assert!(receipt.event("ListingCreated").is_some());
        assert!(receipt.event("LeaseSigned").is_none());
    }
}
