//! Scheduled jobs
//!
//! [`ActionJob`] runs the state machine, appends the record to the ledger and notifies the user.
//! [`EpochJob`] runs the epoch watcher and forwards its notification.

use crate::{
    epoch::EpochWatcher,
    gate::DecisionReason,
    ledger::ActionLedger,
    machine::ActionMachine,
    ports::NotificationSink,
    scheduler::ScheduledJob,
    types::{truncate, ActionKind, ActionRecord, ActionStatus, Notification},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// One action kind run through the machine, then recorded and notified
#[derive(Debug, Clone)]
pub struct ActionJob {
    machine: ActionMachine,
    kind: ActionKind,
    ledger: Arc<ActionLedger>,
    sink: Arc<dyn NotificationSink>,
    explorer: Option<String>,
}

impl ActionJob {
    /// Creates a job running `kind`
    pub fn new(
        machine: ActionMachine,
        kind: ActionKind,
        ledger: Arc<ActionLedger>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self { machine, kind, ledger, sink, explorer: None }
    }

    /// Logs explorer links for submitted transactions
    pub fn with_explorer(mut self, explorer: Option<String>) -> Self {
        self.explorer = explorer.map(|e| e.trim_end_matches('/').to_string());
        self
    }

    /// Action kind run by this job
    pub const fn kind(&self) -> ActionKind {
        self.kind
    }
}

/// User notification for a finished record, if it warrants one
pub fn notification_for(record: &ActionRecord) -> Option<Notification> {
    let title = match (record.kind, record.status) {
        (ActionKind::Restake, ActionStatus::Success) => "Restaked".to_string(),
        (ActionKind::LockExtend, ActionStatus::Success) => "Lock Extended".to_string(),
        (ActionKind::LockExtend, ActionStatus::Skipped)
            if record.detail == DecisionReason::AlreadyMax.to_string() =>
        {
            "Already at Max".to_string()
        }
        (kind, ActionStatus::Error | ActionStatus::Reverted) => format!("{} Failed", kind.title()),
        _ => return None,
    };
    let message = match record.status {
        ActionStatus::Error | ActionStatus::Reverted => {
            truncate(&record.detail, ActionRecord::USER_MESSAGE_LEN)
        }
        _ => record.summary(),
    };
    Some(Notification::new(title, message))
}

#[async_trait]
impl ScheduledJob for ActionJob {
    type Output = ActionRecord;

    fn name(&self) -> &'static str {
        match self.kind {
            ActionKind::Restake => "restake",
            ActionKind::LockExtend => "lock_extend",
        }
    }

    async fn run(&self) -> ActionRecord {
        let record = self.machine.run(self.kind).await;

        if let Err(err) = self.ledger.append(&record) {
            warn!(
                target: "ledger",
                kind = %record.kind,
                status = %record.status,
                "Failed to record action: {err:#}"
            );
        }

        if let Some(explorer) = &self.explorer {
            for tx in record.transaction_ref.split(';').filter(|tx| !tx.is_empty()) {
                info!(target: "restake", "View: {explorer}/tx/{tx}");
            }
        }

        if let Some(notification) = notification_for(&record) {
            self.sink.notify(&notification);
        }
        record
    }
}

/// Vesting epoch check with notification forwarding
#[derive(Debug, Clone)]
pub struct EpochJob {
    watcher: EpochWatcher,
    sink: Arc<dyn NotificationSink>,
}

impl EpochJob {
    /// Creates the job
    pub fn new(watcher: EpochWatcher, sink: Arc<dyn NotificationSink>) -> Self {
        Self { watcher, sink }
    }
}

#[async_trait]
impl ScheduledJob for EpochJob {
    type Output = Option<Notification>;

    fn name(&self) -> &'static str {
        "epoch_watcher"
    }

    async fn run(&self) -> Option<Notification> {
        match self.watcher.check_and_maybe_notify().await {
            Ok(Some(notification)) => {
                self.sink.notify(&notification);
                Some(notification)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(target: "epoch_watcher", %err, "Epoch check failed");
                None
            }
        }
    }
}
