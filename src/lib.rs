//! # Rental Ledger
//!
//! Wallet sessions and on-chain transaction orchestration for a rental
//! listing contract.
//!
//! This crate provides:
//! - Wallet session management with account/network change invalidation
//! - Exact decimal amounts and base-unit conversion
//! - Typed access to the rental contract (`createListing`, `signLease`)
//! - Transaction orchestration from signing through confirmation or timeout
//! - Per-run lifecycle tracking and statistics
//! - An application state reducer for orchestration outcomes
//! - A simulated wallet and ledger for tests and demos

#![warn(missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]
#![allow(missing_docs)] // Internal implementation details

mod config;
mod error;
mod gateway;
mod ledger;
mod lifecycle;
mod orchestrator;
mod outcome;
mod provider;
mod state;
mod submission;
mod types;
mod units;

pub mod simulated;

pub use config::{OrchestratorConfig, CHAIN_ID_ENV, CONFIRMATION_TIMEOUT_ENV, CONTRACT_ADDRESS_ENV};
pub use error::{Error, Result};
pub use gateway::{
    ContractCall, ContractMethod, TransactionRequest, LEASE_SIGNED_EVENT, LISTING_CREATED_EVENT,
};
pub use ledger::{EventLog, LedgerClient, LedgerTransport, Receipt, SendOptions};
pub use lifecycle::{LifecycleStatistics, OrchestrationStatus, RunId, RunLifecycle};
pub use orchestrator::TransactionOrchestrator;
pub use outcome::{FollowUp, TransactionOutcome};
pub use provider::{ProviderEvent, ProviderSession, Session, SignerBackend};
pub use state::{Action, AppState};
pub use types::{
    Address, ChainId, Lease, LeaseId, Listing, ListingFields, ListingId, PropertyDetails, TxHash,
    DEFAULT_LEASE_MONTHS,
};
pub use units::{Amount, BaseUnits, BASE_UNIT_DECIMALS};
