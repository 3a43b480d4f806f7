//! In-memory fakes of the chain ports

use crate::{
    error::ChainError,
    ports::{ChainQuery, Confirmation, ContractCall, TransactionPort, TransactionRef},
    types::{EpochState, LockInfo},
};
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

/// Chain id reported by [`MockChain`] unless overridden
pub const MOCK_CHAIN_ID: u64 = 613419;

/// Mutable on-chain state of the single managed wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainState {
    /// Chain id served
    pub chain_id: u64,
    /// Accrued, unrealized reward
    pub pending_reward: U256,
    /// Realized reward waiting to be compounded
    pub realized_reward: U256,
    /// Staked amount
    pub stake: U256,
    /// Lock position
    pub lock: LockInfo,
    /// Epoch position
    pub epochs: EpochState,
    /// Network gas price
    pub gas_price: u128,
    /// Next nonce
    pub nonce: u64,
    /// Amount a realize step pays out; `None` pays out the whole pending reward
    pub realize_yield: Option<U256>,
    /// When set every read fails with a connectivity error
    pub fail_reads: bool,
    /// When set the next confirmed call turns `fail_reads` on
    pub fail_reads_after_confirm: bool,
}

impl Default for ChainState {
    fn default() -> Self {
        Self {
            chain_id: MOCK_CHAIN_ID,
            pending_reward: U256::ZERO,
            realized_reward: U256::ZERO,
            stake: U256::ZERO,
            lock: LockInfo { locked: U256::ZERO, lock_end: 0, max_duration: 0 },
            epochs: EpochState { current_epoch: 0, user_last_claimed_epoch: 0 },
            gas_price: 1_000_000_000,
            nonce: 0,
            realize_yield: None,
            fail_reads: false,
            fail_reads_after_confirm: false,
        }
    }
}

/// Fake [`ChainQuery`] over a [`ChainState`]
#[derive(Debug, Default)]
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    /// Copy of the current state
    pub fn state(&self) -> ChainState {
        self.state.lock().clone()
    }

    /// Mutates the state in place
    pub fn update(&self, f: impl FnOnce(&mut ChainState)) {
        f(&mut self.state.lock());
    }

    /// Sets the pending reward
    pub fn set_pending_reward(&self, amount: U256) {
        self.update(|s| s.pending_reward = amount);
    }

    /// Sets the stake
    pub fn set_stake(&self, amount: U256) {
        self.update(|s| s.stake = amount);
    }

    /// Sets the gas price
    pub fn set_gas_price(&self, wei: u128) {
        self.update(|s| s.gas_price = wei);
    }

    /// Sets the lock position
    pub fn set_lock(&self, lock: LockInfo) {
        self.update(|s| s.lock = lock);
    }

    /// Sets the epoch position
    pub fn set_epochs(&self, current: u64, claimed: u64) {
        self.update(|s| {
            s.epochs = EpochState { current_epoch: current, user_last_claimed_epoch: claimed }
        });
    }

    /// Makes every read fail
    pub fn fail_reads(&self, fail: bool) {
        self.update(|s| s.fail_reads = fail);
    }

    /// Caps what the next realize steps pay out
    pub fn set_realize_yield(&self, amount: Option<U256>) {
        self.update(|s| s.realize_yield = amount);
    }

    fn read<T>(&self, f: impl FnOnce(&ChainState) -> T) -> Result<T, ChainError> {
        let state = self.state.lock();
        if state.fail_reads {
            return Err(ChainError::Connectivity("mock rpc unreachable".to_string()));
        }
        Ok(f(&state))
    }

    /// Applies a confirmed call
    fn apply(&self, call: &ContractCall) {
        self.update(|s| {
            match *call {
                ContractCall::RealizeReward { .. } => {
                    let paid = s.realize_yield.unwrap_or(s.pending_reward).min(s.pending_reward);
                    s.pending_reward -= paid;
                    s.realized_reward += paid;
                }
                ContractCall::CompoundReward { .. } => {
                    s.stake += s.realized_reward;
                    s.realized_reward = U256::ZERO;
                }
                ContractCall::ExtendLock { unlock_time, .. } => s.lock.lock_end = unlock_time,
            }
            s.nonce += 1;
            if s.fail_reads_after_confirm {
                s.fail_reads = true;
                s.fail_reads_after_confirm = false;
            }
        });
    }
}

#[async_trait]
impl ChainQuery for MockChain {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.read(|s| s.chain_id)
    }

    async fn pending_reward(&self, _wallet: Address) -> Result<U256, ChainError> {
        self.read(|s| s.pending_reward)
    }

    async fn realized_reward(&self, _wallet: Address) -> Result<U256, ChainError> {
        self.read(|s| s.realized_reward)
    }

    async fn stake(&self, _wallet: Address) -> Result<U256, ChainError> {
        self.read(|s| s.stake)
    }

    async fn lock_status(&self, _wallet: Address) -> Result<LockInfo, ChainError> {
        self.read(|s| s.lock)
    }

    async fn epoch_state(&self, _wallet: Address) -> Result<EpochState, ChainError> {
        self.read(|s| s.epochs)
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.read(|s| s.gas_price)
    }

    async fn nonce(&self, _wallet: Address) -> Result<u64, ChainError> {
        self.read(|s| s.nonce)
    }
}

/// Scripted outcome of the next submitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedReceipt {
    /// Included and executed
    Success,
    /// Included but reverted
    Reverted,
    /// Never observed within the timeout
    Timeout,
}

/// A call the fake accepted for submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedCall {
    /// The call
    pub call: ContractCall,
    /// Nonce used
    pub nonce: u64,
    /// Gas limit used
    pub gas_limit: u64,
    /// Gas price used
    pub gas_price: u128,
}

#[derive(Debug, Default)]
struct TxLog {
    receipts: VecDeque<ScriptedReceipt>,
    submitted: Vec<SubmittedCall>,
    in_flight: HashMap<String, (ContractCall, ScriptedReceipt)>,
    estimates: Vec<(ContractCall, u64)>,
    fail_estimation: bool,
}

/// Fake [`TransactionPort`] replaying FIFO scripted receipts against a [`MockChain`].
///
/// With no script left every transaction succeeds.
#[derive(Debug)]
pub struct MockTransactions {
    chain: Arc<MockChain>,
    gas_estimate: u64,
    gas_used: u64,
    log: Mutex<TxLog>,
}

impl MockTransactions {
    /// Fake estimating 100k gas and consuming 80k per transaction
    pub fn new(chain: Arc<MockChain>) -> Self {
        Self { chain, gas_estimate: 100_000, gas_used: 80_000, log: Mutex::default() }
    }

    /// Overrides estimated and consumed gas
    pub fn with_gas(mut self, estimate: u64, used: u64) -> Self {
        self.gas_estimate = estimate;
        self.gas_used = used;
        self
    }

    /// Queues receipts for the next submissions, in order
    pub fn script(&self, receipts: impl IntoIterator<Item = ScriptedReceipt>) {
        self.log.lock().receipts.extend(receipts);
    }

    /// Makes every estimation fail
    pub fn fail_estimation(&self, fail: bool) {
        self.log.lock().fail_estimation = fail;
    }

    /// Every submitted call, in order
    pub fn submitted(&self) -> Vec<SubmittedCall> {
        self.log.lock().submitted.clone()
    }

    /// Every estimated call with its nonce, in order
    pub fn estimates(&self) -> Vec<(ContractCall, u64)> {
        self.log.lock().estimates.clone()
    }
}

#[async_trait]
impl TransactionPort for MockTransactions {
    async fn estimate_gas(&self, call: &ContractCall, nonce: u64) -> Result<u64, ChainError> {
        let mut log = self.log.lock();
        log.estimates.push((*call, nonce));
        if log.fail_estimation {
            return Err(ChainError::GasEstimation(format!("{}: execution reverted", call.name())));
        }
        Ok(self.gas_estimate)
    }

    async fn submit(
        &self,
        call: &ContractCall,
        nonce: u64,
        gas_limit: u64,
        gas_price: u128,
    ) -> Result<TransactionRef, ChainError> {
        let mut log = self.log.lock();
        let receipt = log.receipts.pop_front().unwrap_or(ScriptedReceipt::Success);
        log.submitted.push(SubmittedCall { call: *call, nonce, gas_limit, gas_price });
        let tx = format!("0x{:064x}", log.submitted.len());
        log.in_flight.insert(tx.clone(), (*call, receipt));
        Ok(TransactionRef(tx))
    }

    async fn wait_for_confirmation(
        &self,
        tx: &TransactionRef,
        timeout: Duration,
    ) -> Result<Confirmation, ChainError> {
        let entry = self.log.lock().in_flight.remove(&tx.0);
        match entry {
            None => Err(ChainError::Connectivity(format!("unknown transaction {tx}"))),
            Some((_, ScriptedReceipt::Timeout)) => {
                Err(ChainError::ConfirmationTimeout { tx: tx.0.clone(), timeout })
            }
            Some((_, ScriptedReceipt::Reverted)) => {
                self.chain.update(|s| s.nonce += 1);
                Ok(Confirmation { success: false, gas_used: self.gas_used })
            }
            Some((call, ScriptedReceipt::Success)) => {
                self.chain.apply(&call);
                Ok(Confirmation { success: true, gas_used: self.gas_used })
            }
        }
    }
}
