//! Orchestration lifecycle tracking
//!
//! Records each write from building through its terminal outcome. Terminal
//! records are frozen: a late confirmation cannot rewrite a run that already
//! failed or timed out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::gateway::ContractMethod;
use crate::types::TxHash;
use crate::{Error, Result};

pub(crate) fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Identifier for one orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(pub u64);

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Orchestration state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationStatus {
    /// Request is being validated and encoded
    Building,

    /// Waiting on the signer
    AwaitingSignature,

    /// Accepted into the pending pool; outcome not yet final
    Submitted,

    /// Included, emitted id extracted
    Confirmed,

    /// Signer declined
    Rejected,

    /// Failed before or after submission (including timeouts)
    Failed,
}

impl OrchestrationStatus {
    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestrationStatus::Confirmed
                | OrchestrationStatus::Rejected
                | OrchestrationStatus::Failed
        )
    }

    /// Whether a transition from `self` to `next` is allowed
    pub fn can_transition_to(&self, next: OrchestrationStatus) -> bool {
        use OrchestrationStatus::*;
        matches!(
            (self, next),
            (Building, AwaitingSignature)
                | (Building, Failed)
                | (AwaitingSignature, Submitted)
                | (AwaitingSignature, Rejected)
                | (AwaitingSignature, Failed)
                | (Submitted, Confirmed)
                | (Submitted, Failed)
        )
    }
}

impl std::fmt::Display for OrchestrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestrationStatus::Building => write!(f, "Building"),
            OrchestrationStatus::AwaitingSignature => write!(f, "AwaitingSignature"),
            OrchestrationStatus::Submitted => write!(f, "Submitted"),
            OrchestrationStatus::Confirmed => write!(f, "Confirmed"),
            OrchestrationStatus::Rejected => write!(f, "Rejected"),
            OrchestrationStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Lifecycle record for one run
#[derive(Debug, Clone)]
pub struct RunLifecycle {
    pub run_id: RunId,
    pub method: ContractMethod,
    pub status: OrchestrationStatus,

    /// Start timestamp (Unix milliseconds)
    pub started_at: u64,

    /// Pool acceptance timestamp (Unix milliseconds)
    pub submitted_at: Option<u64>,

    /// Finalization timestamp (Unix milliseconds)
    pub finalized_at: Option<u64>,

    pub hash: Option<TxHash>,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub emitted_id: Option<u64>,
    pub error: Option<String>,
}

impl RunLifecycle {
    fn new(run_id: RunId, method: ContractMethod, started_at: u64) -> Self {
        Self {
            run_id,
            method,
            status: OrchestrationStatus::Building,
            started_at,
            submitted_at: None,
            finalized_at: None,
            hash: None,
            block_number: None,
            gas_used: None,
            emitted_id: None,
            error: None,
        }
    }

    /// Total time from start to finalization (milliseconds)
    pub fn total_time_ms(&self) -> Option<u64> {
        self.finalized_at.map(|fin| fin.saturating_sub(self.started_at))
    }

    /// Time spent waiting for inclusion (milliseconds)
    pub fn confirmation_time_ms(&self) -> Option<u64> {
        match (self.submitted_at, self.finalized_at) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }
}

/// Lifecycle manager
pub(crate) struct LifecycleManager {
    runs: Arc<DashMap<RunId, RunLifecycle>>,
    next_id: AtomicU64,
    max_tracked: usize,
    max_finalized_age_ms: u64,

    /// Current time provider (for testing)
    current_time_fn: Box<dyn Fn() -> u64 + Send + Sync>,
}

impl LifecycleManager {
    pub fn new(max_tracked: usize, max_finalized_age_ms: u64) -> Self {
        Self {
            runs: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            max_tracked,
            max_finalized_age_ms,
            current_time_fn: Box::new(unix_millis),
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

    /// Start tracking a new run in `Building`
    pub fn register(&self, method: ContractMethod) -> Result<RunId> {
        if self.runs.len() >= self.max_tracked {
            self.prune_finalized(self.max_finalized_age_ms);
            if self.runs.len() >= self.max_tracked && !self.evict_oldest_finalized() {
                return Err(Error::Internal(format!(
                    "Maximum in-flight transactions reached: {}",
                    self.max_tracked
                )));
            }
        }

        let run_id = RunId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let timestamp = (self.current_time_fn)();
        self.runs
            .insert(run_id, RunLifecycle::new(run_id, method, timestamp));
        debug!("Registered {} for {}", run_id, method);

        Ok(run_id)
    }

    fn transition<F>(&self, run_id: RunId, next: OrchestrationStatus, apply: F) -> Result<()>
    where
        F: FnOnce(&mut RunLifecycle, u64),
    {
        let timestamp = (self.current_time_fn)();
        let mut run = self
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| Error::Internal(format!("{} is not tracked", run_id)))?;

        if !run.status.can_transition_to(next) {
            warn!(
                "Ignoring {} transition {} -> {}",
                run_id, run.status, next
            );
            return Err(Error::Internal(format!(
                "{} cannot move from {} to {}",
                run_id, run.status, next
            )));
        }

        run.status = next;
        if next.is_terminal() {
            run.finalized_at = Some(timestamp);
        }
        apply(&mut run, timestamp);
        Ok(())
    }

    pub fn mark_awaiting_signature(&self, run_id: RunId) -> Result<()> {
        self.transition(run_id, OrchestrationStatus::AwaitingSignature, |_, _| {})?;
        debug!("{} awaiting signature", run_id);
        Ok(())
    }

    pub fn mark_submitted(&self, run_id: RunId, hash: &TxHash) -> Result<()> {
        self.transition(run_id, OrchestrationStatus::Submitted, |run, ts| {
            run.submitted_at = Some(ts);
            run.hash = Some(hash.clone());
        })?;
        debug!("{} submitted as {}", run_id, hash);
        Ok(())
    }

    pub fn mark_confirmed(
        &self,
        run_id: RunId,
        block_number: u64,
        gas_used: u64,
        emitted_id: u64,
    ) -> Result<()> {
        self.transition(run_id, OrchestrationStatus::Confirmed, |run, _| {
            run.block_number = Some(block_number);
            run.gas_used = Some(gas_used);
            run.emitted_id = Some(emitted_id);
        })?;
        info!(
            "{} confirmed in block {} (gas: {}, id: {})",
            run_id, block_number, gas_used, emitted_id
        );
        Ok(())
    }

    pub fn mark_rejected(&self, run_id: RunId, reason: String) -> Result<()> {
        self.transition(run_id, OrchestrationStatus::Rejected, |run, _| {
            run.error = Some(reason.clone());
        })?;
        warn!("{} rejected: {}", run_id, reason);
        Ok(())
    }

    pub fn mark_failed(&self, run_id: RunId, error: &Error) -> Result<()> {
        self.transition(run_id, OrchestrationStatus::Failed, |run, _| {
            run.error = Some(error.to_string());
        })?;
        warn!("{} failed: {}", run_id, error);
        Ok(())
    }

    pub fn get_status(&self, run_id: RunId) -> Option<OrchestrationStatus> {
        self.runs.get(&run_id).map(|run| run.status)
    }

    pub fn get_lifecycle(&self, run_id: RunId) -> Option<RunLifecycle> {
        self.runs.get(&run_id).map(|run| run.clone())
    }

    /// Runs not yet in a terminal state
    pub fn in_flight(&self) -> Vec<RunId> {
        self.runs
            .iter()
            .filter(|entry| !entry.value().status.is_terminal())
            .map(|entry| *entry.key())
            .collect()
    }

    /// Remove finalized runs older than the given age (milliseconds)
    pub fn prune_finalized(&self, max_age_ms: u64) -> usize {
        let cutoff_time = (self.current_time_fn)().saturating_sub(max_age_ms);

        let to_remove: Vec<RunId> = self
            .runs
            .iter()
            .filter(|entry| {
                let run = entry.value();
                run.status.is_terminal()
                    && run.finalized_at.map(|t| t <= cutoff_time).unwrap_or(false)
            })
            .map(|entry| *entry.key())
            .collect();

        let count = to_remove.len();
        for run_id in to_remove {
            self.runs.remove(&run_id);
        }

        if count > 0 {
            debug!("Pruned {} finalized runs", count);
        }
        count
    }

    /// Drop the single longest-finalized run to make room
    fn evict_oldest_finalized(&self) -> bool {
        let oldest = self
            .runs
            .iter()
            .filter_map(|entry| {
                let run = entry.value();
                match (run.status.is_terminal(), run.finalized_at) {
                    (true, Some(at)) => Some((at, *entry.key())),
                    _ => None,
                }
            })
            .min();

        match oldest {
            Some((_, run_id)) => {
                self.runs.remove(&run_id);
                debug!("Evicted {} to stay within capacity", run_id);
                true
            }
            None => false,
        }
    }

    pub fn get_statistics(&self) -> LifecycleStatistics {
        let mut stats = LifecycleStatistics::default();

        for entry in self.runs.iter() {
            let run = entry.value();
            match run.status {
                OrchestrationStatus::Building => stats.building_count += 1,
                OrchestrationStatus::AwaitingSignature => stats.awaiting_signature_count += 1,
                OrchestrationStatus::Submitted => stats.submitted_count += 1,
                OrchestrationStatus::Confirmed => stats.confirmed_count += 1,
                OrchestrationStatus::Rejected => stats.rejected_count += 1,
                OrchestrationStatus::Failed => stats.failed_count += 1,
            }

            if let Some(time) = run.confirmation_time_ms() {
                stats.total_confirmation_ms += time;
                stats.confirmation_sample_count += 1;
            }
        }

        stats.total_count = self.runs.len();
        stats
    }
}

/// Lifecycle statistics
#[derive(Debug, Clone, Default)]
pub struct LifecycleStatistics {
    pub total_count: usize,
    pub building_count: usize,
    pub awaiting_signature_count: usize,
    pub submitted_count: usize,
    pub confirmed_count: usize,
    pub rejected_count: usize,
    pub failed_count: usize,

    /// Sum of submit-to-final latency (milliseconds)
    pub total_confirmation_ms: u64,
    pub confirmation_sample_count: usize,
}

impl LifecycleStatistics {
    /// Average submit-to-final latency (milliseconds)
    pub fn average_confirmation_ms(&self) -> Option<f64> {
        if self.confirmation_sample_count > 0 {
            Some(self.total_confirmation_ms as f64 / self.confirmation_sample_count as f64)
        } else {
            None
        }
    }

    /// Confirmed share of finalized runs (0.0 to 1.0)
    pub fn success_rate(&self) -> f64 {
        let finalized = self.confirmed_count + self.failed_count + self.rejected_count;
        if finalized > 0 {
            self.confirmed_count as f64 / finalized as f64
        } else {
            0.0
        }
    }
}
