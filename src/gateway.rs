//! Rental contract gateway
//!
//! Binds the deployed rental contract's interface to the ledger client and
//! exposes domain operations instead of raw calls. The binding is resolved
//! lazily, once per gateway, and reused.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::ledger::{LedgerClient, Receipt, SendOptions};
use crate::provider::{ProviderSession, Session};
use crate::types::{deserialize_uint_id, Address, ChainId, Listing, ListingId, TxHash};
use crate::units::{Amount, BaseUnits};
use crate::{Error, Result};

pub const LISTING_CREATED_EVENT: &str = "ListingCreated";
pub const LEASE_SIGNED_EVENT: &str = "LeaseSigned";

/// State-changing contract methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractMethod {
    CreateListing,
    SignLease,
}

impl ContractMethod {
    /// ABI method name
    pub fn name(&self) -> &'static str {
        match self {
            ContractMethod::CreateListing => "createListing",
            ContractMethod::SignLease => "signLease",
        }
    }

    /// Event and field carrying the id this method emits
    pub fn emitted_event(&self) -> (&'static str, &'static str) {
        match self {
            ContractMethod::CreateListing => (LISTING_CREATED_EVENT, "listingId"),
            ContractMethod::SignLease => (LEASE_SIGNED_EVENT, "leaseId"),
        }
    }
}

impl std::fmt::Display for ContractMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed arguments for a contract write
#[derive(Debug, Clone, PartialEq)]
pub enum ContractCall {
    CreateListing {
        property_address: String,
        monthly_rent: Amount,
        /// Opaque JSON metadata
        details: String,
    },
    SignLease {
        listing_id: ListingId,
        duration_months: u32,
    },
}

/// A single write to orchestrate
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRequest {
    pub call: ContractCall,
    pub value_attached: Amount,
}

impl TransactionRequest {
    pub fn create_listing(
        property_address: impl Into<String>,
        monthly_rent: Amount,
        details: impl Into<String>,
    ) -> Self {
        Self {
            call: ContractCall::CreateListing {
                property_address: property_address.into(),
                monthly_rent,
                details: details.into(),
            },
            value_attached: Amount::zero(),
        }
    }

    /// Lease request with the security deposit attached
    ///
    /// The deposit is exactly one month's rent regardless of duration.
    pub fn sign_lease(listing_id: ListingId, duration_months: u32, monthly_rent: Amount) -> Self {
        Self {
            call: ContractCall::SignLease {
                listing_id,
                duration_months,
            },
            value_attached: monthly_rent,
        }
    }

    pub fn method(&self) -> ContractMethod {
        match self.call {
            ContractCall::CreateListing { .. } => ContractMethod::CreateListing,
            ContractCall::SignLease { .. } => ContractMethod::SignLease,
        }
    }
}

/// Wire-ready call: ABI arguments and attached value in base units
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EncodedCall {
    pub method: ContractMethod,
    pub args: Vec<Value>,
    pub value: BaseUnits,
}

/// Write accepted into the pending pool, not yet final
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingWrite {
    pub method: ContractMethod,
    pub hash: TxHash,
    pub from: Address,
}

#[derive(Debug, Clone)]
struct ContractBinding {
    address: Address,
    network: ChainId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawListing {
    #[serde(deserialize_with = "deserialize_uint_id")]
    id: u64,
    owner: Address,
    property_address: String,
    monthly_rent: BaseUnits,
    is_available: bool,
    #[serde(default)]
    details: String,
}

impl RawListing {
    fn into_listing(self) -> Listing {
        Listing {
            id: ListingId(self.id),
            owner: self.owner,
            property_address: self.property_address,
            monthly_rent: Amount::from_base_units(self.monthly_rent),
            is_available: self.is_available,
            details: self.details,
        }
    }
}

/// Contract gateway
///
/// Crate-internal: writes go through the orchestrator, which owns the
/// confirmation timeout and lifecycle tracking.
pub(crate) struct ContractGateway {
    ledger: LedgerClient,
    session: Arc<ProviderSession>,
    contract_address: Address,
    network: ChainId,
    binding: OnceCell<ContractBinding>,
}

impl ContractGateway {
    pub fn new(
        ledger: LedgerClient,
        session: Arc<ProviderSession>,
        contract_address: Address,
        network: ChainId,
    ) -> Self {
        Self {
            ledger,
            session,
            contract_address,
            network,
            binding: OnceCell::new(),
        }
    }

    /// Network the contract is deployed on
    pub fn expected_network(&self) -> ChainId {
        self.network
    }

    #[cfg(test)]
    pub fn is_bound(&self) -> bool {
        self.binding.initialized()
    }

    pub fn ledger(&self) -> &LedgerClient {
        &self.ledger
    }

    async fn bind(&self) -> Result<&ContractBinding> {
        self.binding
            .get_or_try_init(|| async {
                let actual = self.ledger.network_id().await?;
                if actual != self.network {
                    warn!(
                        "Ledger endpoint is on chain {}, contract is deployed on {}",
                        actual, self.network
                    );
                    return Err(Error::WrongNetwork {
                        expected: self.network,
                        actual,
                    });
                }
                info!(
                    "Bound rental contract {} on chain {}",
                    self.contract_address, self.network
                );
                Ok(ContractBinding {
                    address: self.contract_address.clone(),
                    network: self.network,
                })
            })
            .await
    }

    /// Coerce a request into ABI arguments
    ///
    /// Pure; fails before any round trip on amounts that cannot be
    /// represented exactly in base units.
    pub fn encode(&self, request: &TransactionRequest) -> Result<EncodedCall> {
        let args = match &request.call {
            ContractCall::CreateListing {
                property_address,
                monthly_rent,
                details,
            } => {
                serde_json::from_str::<Value>(details).map_err(|e| {
                    Error::InvalidArgument(format!("listing details are not JSON: {}", e))
                })?;
                vec![
                    Value::String(property_address.clone()),
                    Value::String(monthly_rent.to_base_units()?.to_string()),
                    Value::String(details.clone()),
                ]
            }
            ContractCall::SignLease {
                listing_id,
                duration_months,
            } => {
                if *duration_months == 0 {
                    return Err(Error::InvalidArgument(
                        "lease duration must be at least one month".to_string(),
                    ));
                }
                vec![
                    Value::String(listing_id.0.to_string()),
                    Value::String(duration_months.to_string()),
                ]
            }
        };

        Ok(EncodedCall {
            method: request.method(),
            args,
            value: request.value_attached.to_base_units()?,
        })
    }

    /// Hand an encoded call to the signer and the pending pool
    ///
    /// `session` must still be the live session; a snapshot invalidated by an
    /// account or network change is refused before the signer is prompted.
    pub async fn submit(&self, session: &Session, call: &EncodedCall) -> Result<PendingWrite> {
        let binding = self.bind().await?;
        if session.chain_id != binding.network {
            return Err(Error::WrongNetwork {
                expected: binding.network,
                actual: session.chain_id,
            });
        }
        if !self.session.is_current(session) {
            return Err(Error::NotConnected(
                "wallet account or network changed; reconnect before signing".to_string(),
            ));
        }

        let options = SendOptions {
            from: session.account.clone(),
            value: call.value,
        };
        let hash = self
            .ledger
            .send(&binding.address, call.method.name(), &call.args, &options)
            .await?;

        debug!("{} accepted as {}", call.method, hash);
        Ok(PendingWrite {
            method: call.method,
            hash,
            from: options.from,
        })
    }

    /// Wait for a pending write to be included
    pub async fn await_receipt(&self, pending: &PendingWrite) -> Result<Receipt> {
        debug!(
            "Waiting for {} from {} ({})",
            pending.method, pending.from, pending.hash
        );
        self.ledger.wait_for_receipt(&pending.hash).await
    }

    /// Id emitted by a confirmed write
    ///
    /// A receipt without the expected event is `EventMissing`, never a
    /// default id.
    pub fn emitted_id(method: ContractMethod, receipt: &Receipt) -> Result<u64> {
        let (event_name, field) = method.emitted_event();
        let missing = || Error::EventMissing {
            event: event_name.to_string(),
            hash: receipt.transaction_hash.to_string(),
        };

        let value = receipt
            .event(event_name)
            .and_then(|event| event.return_values.get(field))
            .ok_or_else(missing)?;

        match value {
            Value::String(s) => s.parse::<u64>().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
        .ok_or_else(|| Error::Decode(format!("{}.{} is not an id: {}", event_name, field, value)))
    }

    /// Read one listing
    pub async fn get_listing(&self, id: ListingId) -> Result<Listing> {
        self.session.require()?;
        let binding = self.bind().await?;

        let raw = match self
            .ledger
            .call(&binding.address, "getListing", &[Value::String(id.0.to_string())])
            .await
        {
            Ok(raw) => raw,
            Err(Error::ExecutionReverted(reason)) => {
                debug!("getListing({}) reverted: {}", id, reason);
                return Err(Error::NotFound(id.0));
            }
            Err(e) => return Err(e),
        };

        let listing = serde_json::from_value::<RawListing>(raw)?.into_listing();
        // unset storage slots decode as a zero-owner listing
        if listing.owner.is_zero() {
            return Err(Error::NotFound(id.0));
        }
        Ok(listing)
    }

    /// Read every listing in ledger order
    pub async fn get_all_listings(&self) -> Result<Vec<Listing>> {
        self.session.require()?;
        let binding = self.bind().await?;

        let raw = self.ledger.call(&binding.address, "getAllListings", &[]).await?;
        let listings = serde_json::from_value::<Vec<RawListing>>(raw)?
            .into_iter()
            .map(RawListing::into_listing)
            .collect::<Vec<_>>();

        debug!("Fetched {} listings", listings.len());
        Ok(listings)
    }
}
