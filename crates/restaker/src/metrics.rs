use crate::types::{ActionKind, ActionStatus};
use metrics::{counter, histogram};
use std::time::Duration;

/// Records a finished action run
pub(crate) fn record_action(kind: ActionKind, status: ActionStatus, elapsed: Duration) {
    counter!("restaker_actions_total", "kind" => kind.as_str(), "status" => status.as_str())
        .increment(1);
    histogram!("restaker_action_duration_seconds", "kind" => kind.as_str())
        .record(elapsed.as_secs_f64());
}

/// Records a trigger dropped because another run held the slot
pub(crate) fn record_overlap_skipped(job: &'static str) {
    counter!("restaker_overlap_skipped_total", "job" => job).increment(1);
}

/// Records a delivered notification
pub(crate) fn record_notification() {
    counter!("restaker_notifications_total").increment(1);
}
