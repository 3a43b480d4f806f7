//! Action state machine
//!
//! Both action kinds follow the same shape: read state, gate, execute one or more dependent
//! transactions, verify, record. A run never returns an error; every failure is folded into the
//! returned [`ActionRecord`].

mod extend;
mod restake;

use crate::{
    clock::Clock,
    config::{GasPolicy, RestakerConfig},
    error::ChainError,
    ports::{ChainQuery, TransactionPort},
    types::{ActionKind, ActionRecord, ActionStatus},
};
use alloy_primitives::{Address, U256};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{error, info, warn};

macro_rules! log_outcome {
    ($target:literal, $record:expr) => {
        match $record.status {
            ActionStatus::Error => error!(
                target: $target,
                tx = %$record.transaction_ref,
                "Run failed: {}",
                $record.detail
            ),
            ActionStatus::Reverted => warn!(
                target: $target,
                tx = %$record.transaction_ref,
                "Run reverted: {}",
                $record.detail
            ),
            status => info!(target: $target, %status, "{}", $record.summary()),
        }
    };
}

/// Per-run parameters derived from the configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSettings {
    /// Managed wallet
    pub wallet: Address,
    /// Chain id the RPC endpoint must report
    pub chain_id: u64,
    /// Minimum pending reward worth restaking (wei)
    pub min_reward_threshold: U256,
    /// Gas ceiling and limit policy
    pub gas: GasPolicy,
    /// Lock end times are floored to multiples of this many seconds
    pub time_quantum_secs: u64,
    /// Bound on every confirmation wait
    pub confirmation_timeout: Duration,
    /// Replace submit and confirm with a synthesized estimate
    pub dry_run: bool,
}

impl From<&RestakerConfig> for ActionSettings {
    fn from(config: &RestakerConfig) -> Self {
        Self {
            wallet: config.wallet,
            chain_id: config.network.chain_id,
            min_reward_threshold: config.min_reward_threshold,
            gas: config.gas,
            time_quantum_secs: config.time_quantum_secs,
            confirmation_timeout: config.confirmation_timeout,
            dry_run: config.dry_run,
        }
    }
}

/// Executes restake and lock-extend runs against the chain ports
#[derive(Clone)]
pub struct ActionMachine {
    query: Arc<dyn ChainQuery>,
    txs: Arc<dyn TransactionPort>,
    clock: Arc<dyn Clock>,
    settings: ActionSettings,
}

impl std::fmt::Debug for ActionMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionMachine").field("settings", &self.settings).finish_non_exhaustive()
    }
}

impl ActionMachine {
    /// Creates a machine over the given ports
    pub fn new(
        query: Arc<dyn ChainQuery>,
        txs: Arc<dyn TransactionPort>,
        clock: Arc<dyn Clock>,
        settings: ActionSettings,
    ) -> Self {
        Self { query, txs, clock, settings }
    }

    /// Run parameters
    pub const fn settings(&self) -> &ActionSettings {
        &self.settings
    }

    /// Executes one run of `kind`, records metrics and logs the outcome
    pub async fn run(&self, kind: ActionKind) -> ActionRecord {
        let started = Instant::now();
        let record = match kind {
            ActionKind::Restake => self.restake().await,
            ActionKind::LockExtend => self.extend_lock().await,
        };
        crate::metrics::record_action(kind, record.status, started.elapsed());

        match kind {
            ActionKind::Restake => log_outcome!("restake", record),
            ActionKind::LockExtend => log_outcome!("lock_extend", record),
        }
        record
    }

    /// Fails with [`ChainError::WrongChain`] when the endpoint serves another chain
    async fn ensure_chain(&self) -> Result<(), ChainError> {
        let actual = self.query.chain_id().await?;
        if actual != self.settings.chain_id {
            return Err(ChainError::WrongChain { expected: self.settings.chain_id, actual });
        }
        Ok(())
    }

    /// Record with every quantity zeroed, finished now
    fn blank_record(
        &self,
        kind: ActionKind,
        status: ActionStatus,
        detail: impl Into<String>,
    ) -> ActionRecord {
        ActionRecord {
            timestamp: self.clock.now(),
            kind,
            amount: U256::ZERO,
            state_before: U256::ZERO,
            state_after: U256::ZERO,
            transaction_ref: String::new(),
            gas_used: 0,
            gas_cost: U256::ZERO,
            status,
            detail: detail.into(),
        }
    }
}

/// Fee paid for `gas_used` units at `gas_price`
fn gas_cost(gas_used: u64, gas_price: u128) -> U256 {
    U256::from(gas_used) * U256::from(gas_price)
}

/// Gwei rendering for log and record details
fn format_gwei(wei: u128) -> String {
    match alloy_primitives::utils::format_units(U256::from(wei), "gwei") {
        Ok(s) if s.contains('.') => s.trim_end_matches('0').trim_end_matches('.').to_string(),
        Ok(s) => s,
        Err(_) => wei.to_string(),
    }
}
