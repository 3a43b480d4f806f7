//! Ports consumed and exposed by the orchestrator
//!
//! The chain is reached only through [`ChainQuery`] (reads) and [`TransactionPort`]
//! (estimate, submit, confirm). Users are reached only through [`NotificationSink`].

use crate::{
    error::ChainError,
    types::{EpochState, LockInfo, Notification},
};
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use std::{fmt, time::Duration};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// Read-only access to on-chain state of one wallet
#[async_trait]
pub trait ChainQuery: Send + Sync {
    /// Chain id served by the RPC endpoint
    async fn chain_id(&self) -> Result<u64, ChainError>;

    /// Reward accrued but not yet realized
    async fn pending_reward(&self, wallet: Address) -> Result<U256, ChainError>;

    /// Reward realized and available to move into stake
    async fn realized_reward(&self, wallet: Address) -> Result<U256, ChainError>;

    /// Staked amount
    async fn stake(&self, wallet: Address) -> Result<U256, ChainError>;

    /// Time-lock position
    async fn lock_status(&self, wallet: Address) -> Result<LockInfo, ChainError>;

    /// Vesting epoch position
    async fn epoch_state(&self, wallet: Address) -> Result<EpochState, ChainError>;

    /// Current network gas price (wei)
    async fn gas_price(&self) -> Result<u128, ChainError>;

    /// Next nonce of the wallet
    async fn nonce(&self, wallet: Address) -> Result<u64, ChainError>;
}

/// Contract call issued by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractCall {
    /// Zero-value stake that realizes the pending reward
    RealizeReward {
        /// Sender
        from: Address,
    },
    /// Moves the realized reward of `from` into stake
    CompoundReward {
        /// Sender and beneficiary
        from: Address,
    },
    /// Pushes the lock end of `from` out to `unlock_time`
    ExtendLock {
        /// Sender
        from: Address,
        /// New lock end (unix seconds)
        unlock_time: u64,
    },
}

impl ContractCall {
    /// Sender of the call
    pub const fn from(&self) -> Address {
        match self {
            Self::RealizeReward { from } |
            Self::CompoundReward { from } |
            Self::ExtendLock { from, .. } => *from,
        }
    }

    /// Short name used in logs
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RealizeReward { .. } => "createStake",
            Self::CompoundReward { .. } => "addRewardToStake",
            Self::ExtendLock { .. } => "increaseUnlockTime",
        }
    }
}

/// Opaque reference of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionRef(pub String);

impl fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inclusion receipt of a submitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    /// Whether execution succeeded
    pub success: bool,
    /// Gas consumed
    pub gas_used: u64,
}

/// Mutating access to the chain
#[async_trait]
pub trait TransactionPort: Send + Sync {
    /// Estimates the gas for `call` at `nonce`
    async fn estimate_gas(&self, call: &ContractCall, nonce: u64) -> Result<u64, ChainError>;

    /// Submits `call` and returns its reference without waiting for inclusion
    async fn submit(
        &self,
        call: &ContractCall,
        nonce: u64,
        gas_limit: u64,
        gas_price: u128,
    ) -> Result<TransactionRef, ChainError>;

    /// Blocks until `tx` is included, or fails with [`ChainError::ConfirmationTimeout`]
    async fn wait_for_confirmation(
        &self,
        tx: &TransactionRef,
        timeout: Duration,
    ) -> Result<Confirmation, ChainError>;
}

/// Fire-and-forget user notification
pub trait NotificationSink: Send + Sync + fmt::Debug {
    /// Delivers `notification`; failures are logged and otherwise ignored
    fn notify(&self, notification: &Notification);
}

/// Sink writing notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, notification: &Notification) {
        crate::metrics::record_notification();
        info!(target: "notify", title = %notification.title, "{}", notification.message);
    }
}

/// Sink forwarding notifications to a UI collaborator over a channel
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: UnboundedSender<Notification>,
}

impl ChannelNotifier {
    /// Creates a sink sending into `tx`
    pub const fn new(tx: UnboundedSender<Notification>) -> Self {
        Self { tx }
    }
}

impl NotificationSink for ChannelNotifier {
    fn notify(&self, notification: &Notification) {
        crate::metrics::record_notification();
        if let Err(e) = self.tx.send(notification.clone()) {
            warn!(target: "notify", title = %e.0.title, "Notification receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn test_channel_notifier_forwards() {
        let (tx, mut rx) = unbounded_channel();
        let sink = ChannelNotifier::new(tx);

        sink.notify(&Notification::new("Vesting Rewards Available", "2 epoch(s) behind"));
        let received = rx.try_recv().unwrap();
        assert_eq!(received.title, "Vesting Rewards Available");
    }

    #[test]
    fn test_channel_notifier_ignores_dropped_receiver() {
        let (tx, rx) = unbounded_channel();
        drop(rx);
        let sink = ChannelNotifier::new(tx);

        // must not panic
        sink.notify(&Notification::new("t", "m"));
    }
}
