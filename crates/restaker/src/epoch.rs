//! Epoch Watcher
//!
//! Emits one "new vesting rewards" notification per protocol epoch. The watermark stops repeated
//! notifications while the user has not claimed yet.

use crate::{
    clock::Clock, error::ChainError, ports::ChainQuery, types::Notification,
    watermark::WatermarkStore,
};
use alloy_primitives::Address;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Title of the vesting notification
pub const VESTING_TITLE: &str = "Vesting Rewards Available";

/// Failure of one epoch check
#[derive(Debug, Error)]
pub enum EpochCheckError {
    /// Chain read failed; nothing was notified
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// Watermark could not be persisted; the notification is withheld
    #[error("failed to persist watermark: {0:#}")]
    Watermark(#[from] anyhow::Error),
}

/// Compares the current epoch with the last claimed and last notified epochs
#[derive(Clone)]
pub struct EpochWatcher {
    query: Arc<dyn ChainQuery>,
    watermark: Arc<WatermarkStore>,
    clock: Arc<dyn Clock>,
    wallet: Address,
}

impl std::fmt::Debug for EpochWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochWatcher")
            .field("wallet", &self.wallet)
            .field("watermark", &self.watermark)
            .finish_non_exhaustive()
    }
}

impl EpochWatcher {
    /// Creates a watcher for `wallet`
    pub fn new(
        query: Arc<dyn ChainQuery>,
        watermark: Arc<WatermarkStore>,
        clock: Arc<dyn Clock>,
        wallet: Address,
    ) -> Self {
        Self { query, watermark, clock, wallet }
    }

    /// Returns a notification if a new epoch became claimable since the last one notified.
    ///
    /// The watermark is persisted before the notification is returned, so a crash can lose a
    /// notification but never repeat one.
    pub async fn check_and_maybe_notify(&self) -> Result<Option<Notification>, EpochCheckError> {
        let state = self.query.epoch_state(self.wallet).await?;
        let watermark = self.watermark.get();
        debug!(
            target: "epoch_watcher",
            current = state.current_epoch,
            claimed = state.user_last_claimed_epoch,
            watermark,
            "Read epoch state"
        );

        if !state.has_new() || state.current_epoch <= watermark {
            return Ok(None);
        }

        self.watermark.advance(state.current_epoch, self.clock.now())?;
        let behind = state.epochs_behind();
        info!(target: "epoch_watcher", epoch = state.current_epoch, behind, "New vesting epoch");
        Ok(Some(Notification::new(
            VESTING_TITLE,
            format!(
                "Epoch {} is claimable. You are {behind} epoch(s) behind.",
                state.current_epoch
            ),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, test_utils::MockChain};
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn watcher(chain: &Arc<MockChain>, dir: &TempDir) -> (EpochWatcher, Arc<WatermarkStore>) {
        let watermark = Arc::new(WatermarkStore::open(dir.path().join("w.json")));
        let watcher = EpochWatcher::new(
            chain.clone(),
            watermark.clone(),
            Arc::new(ManualClock::at_unix(1_700_000_000)),
            Address::repeat_byte(0xaa),
        );
        (watcher, watermark)
    }

    #[tokio::test]
    async fn test_notifies_once_per_epoch() {
        let dir = TempDir::new().unwrap();
        let chain = Arc::new(MockChain::default());
        chain.set_epochs(10, 8);
        let (watcher, watermark) = watcher(&chain, &dir);

        let first = watcher.check_and_maybe_notify().await.unwrap();
        assert_matches!(
            first,
            Some(ref n) if n.title == VESTING_TITLE && n.message.contains("2 epoch(s)")
        );
        assert_eq!(watermark.get(), 10);

        assert_eq!(watcher.check_and_maybe_notify().await.unwrap(), None);
        assert_eq!(watermark.get(), 10);

        chain.set_epochs(11, 8);
        assert!(watcher.check_and_maybe_notify().await.unwrap().is_some());
        assert_eq!(watermark.get(), 11);
    }

    #[tokio::test]
    async fn test_nothing_claimable() {
        let dir = TempDir::new().unwrap();
        let chain = Arc::new(MockChain::default());
        chain.set_epochs(10, 10);
        let (watcher, watermark) = watcher(&chain, &dir);

        assert_eq!(watcher.check_and_maybe_notify().await.unwrap(), None);
        assert_eq!(watermark.get(), 0);
    }

    #[tokio::test]
    async fn test_chain_failure_leaves_watermark() {
        let dir = TempDir::new().unwrap();
        let chain = Arc::new(MockChain::default());
        chain.set_epochs(10, 8);
        chain.fail_reads(true);
        let (watcher, watermark) = watcher(&chain, &dir);

        assert_matches!(watcher.check_and_maybe_notify().await, Err(EpochCheckError::Chain(_)));
        assert_eq!(watermark.get(), 0);
    }
}
