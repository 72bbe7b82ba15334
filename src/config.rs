//! Deployment configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{Address, ChainId};
use crate::{Error, Result};

pub const CONTRACT_ADDRESS_ENV: &str = "RENTAL_CONTRACT_ADDRESS";
pub const CHAIN_ID_ENV: &str = "RENTAL_CHAIN_ID";
pub const CONFIRMATION_TIMEOUT_ENV: &str = "RENTAL_CONFIRMATION_TIMEOUT_MS";

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Deployed rental contract, fixed per deployment
    pub contract_address: Address,

    /// Chain the contract is deployed on
    pub network: ChainId,

    /// Upper bound on waiting for inclusion (milliseconds)
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,

    /// Maximum number of orchestration records to track
    #[serde(default = "default_max_tracked_transactions")]
    pub max_tracked_transactions: usize,

    /// Age after which finalized records are pruned (milliseconds)
    #[serde(default = "default_max_finalized_age_ms")]
    pub max_finalized_age_ms: u64,

    /// Interval for background cleanup (milliseconds)
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
}

fn default_confirmation_timeout_ms() -> u64 {
    120_000
}

fn default_max_tracked_transactions() -> usize {
    10_000
}

fn default_max_finalized_age_ms() -> u64 {
    3_600_000 // 1 hour
}

fn default_cleanup_interval_ms() -> u64 {
    60_000
}

impl OrchestratorConfig {
    pub fn new(contract_address: Address, network: ChainId) -> Self {
        Self {
            contract_address,
            network,
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
            max_tracked_transactions: default_max_tracked_transactions(),
            max_finalized_age_ms: default_max_finalized_age_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
        }
    }

    pub fn with_confirmation_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.confirmation_timeout_ms = timeout_ms;
        self
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    /// Build from `RENTAL_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| Error::Config(format!("{} is not set", key)))
        };

        let contract_address = Address::parse(&required(CONTRACT_ADDRESS_ENV)?)
            .map_err(|e| Error::Config(format!("{}: {}", CONTRACT_ADDRESS_ENV, e)))?;
        let network = required(CHAIN_ID_ENV)?
            .parse::<u64>()
            .map(ChainId)
            .map_err(|e| Error::Config(format!("{}: {}", CHAIN_ID_ENV, e)))?;

        let mut config = Self::new(contract_address, network);
        if let Some(raw) = lookup(CONFIRMATION_TIMEOUT_ENV) {
            config.confirmation_timeout_ms = raw
                .parse()
                .map_err(|e| Error::Config(format!("{}: {}", CONFIRMATION_TIMEOUT_ENV, e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.contract_address.is_zero() {
            return Err(Error::Config("contract address is the zero address".to_string()));
        }
        if self.confirmation_timeout_ms == 0 {
            return Err(Error::Config("confirmation timeout must be positive".to_string()));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(Error::Config("cleanup interval must be positive".to_string()));
        }
        if self.max_tracked_transactions == 0 {
            return Err(Error::Config("max_tracked_transactions must be positive".to_string()));
        }
        Ok(())
    }
}
