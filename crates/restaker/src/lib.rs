//! Restaker
//!
//! Orchestrates recurring on-chain actions for a single wallet against a staking and vesting
//! protocol: claiming and re-depositing rewards, extending a time-lock to its maximum duration
//! and watching for newly unlocked vesting epochs.

/// Injectable wall clock
pub mod clock;
/// Configuration loading and normalization
pub mod config;
/// Epoch watcher for vesting reward notifications
pub mod epoch;
/// Error taxonomy shared by the ports and the state machine
pub mod error;
/// Alloy based chain adapter implementing both ports
pub mod eth_client;
/// Action eligibility gate
pub mod gate;
/// Scheduled jobs wiring the machine and the watcher into the scheduler
pub mod jobs;
/// Append-only action ledger
pub mod ledger;
/// Action state machine
pub mod machine;
mod metrics;
/// Chain query, transaction and notification ports
pub mod ports;
/// Recurring scheduler with overlap guard and shared run queue
pub mod scheduler;
/// Derived statistics over the ledger
pub mod stats;
/// Shared data model
pub mod types;
/// Persisted vesting watermark
pub mod watermark;

/// Fake ports for tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RestakerConfig;
pub use epoch::EpochWatcher;
pub use error::{ChainError, ConfigError};
pub use eth_client::EthHttpCli;
pub use gate::{DecisionReason, EligibilityDecision, EligibilityGate};
pub use jobs::{ActionJob, EpochJob};
pub use ledger::ActionLedger;
pub use machine::{ActionMachine, ActionSettings};
pub use ports::{ChainQuery, NotificationSink, TransactionPort};
pub use scheduler::{
    RunQueue, RunSlot, ScheduledJob, Scheduler, SchedulerStatus, TriggerOutcome,
};
pub use stats::LedgerStats;
pub use types::{ActionKind, ActionRecord, ActionStatus, LockStatus, Notification};
pub use watermark::WatermarkStore;
