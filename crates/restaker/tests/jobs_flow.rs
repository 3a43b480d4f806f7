//! Scheduled jobs wired to the ledger, the watermark and the notification channel

use alloy_primitives::{utils::parse_ether, Address, U256};
use assert_matches::assert_matches;
use restaker::{
    config::GasPolicy,
    ports::ChannelNotifier,
    test_utils::{MockChain, MockTransactions, MOCK_CHAIN_ID},
    types::LockInfo,
    ActionJob, ActionKind, ActionLedger, ActionMachine, ActionSettings, ActionStatus, EpochJob,
    EpochWatcher, LedgerStats, ManualClock, RunQueue, RunSlot, Scheduler, TriggerOutcome,
    WatermarkStore,
};
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

const GWEI: u128 = 1_000_000_000;
const NOW: i64 = 1_700_000_000;

struct Harness {
    chain: Arc<MockChain>,
    clock: Arc<ManualClock>,
    ledger: Arc<ActionLedger>,
    machine: ActionMachine,
    notifier: Arc<ChannelNotifier>,
    notifications: UnboundedReceiver<restaker::Notification>,
    _dir: TempDir,
}

fn harness() -> Harness {
    harness_with(false)
}

fn harness_with(dry_run: bool) -> Harness {
    let dir = TempDir::new().unwrap();
    let chain = Arc::new(MockChain::default());
    chain.set_pending_reward(parse_ether("2").unwrap());
    chain.set_stake(parse_ether("50").unwrap());
    let txs = Arc::new(MockTransactions::new(chain.clone()));
    let clock = Arc::new(ManualClock::at_unix(NOW));
    let machine = ActionMachine::new(
        chain.clone(),
        txs,
        clock.clone(),
        ActionSettings {
            wallet: Address::repeat_byte(0x42),
            chain_id: MOCK_CHAIN_ID,
            min_reward_threshold: parse_ether("0.1").unwrap(),
            gas: GasPolicy {
                max_gas_price: 50 * GWEI,
                gas_limit_multiplier: 1.2,
                gas_limit_buffer: 20_000,
            },
            time_quantum_secs: 7 * 86_400,
            confirmation_timeout: Duration::from_secs(300),
            dry_run,
        },
    );
    let (tx, notifications) = unbounded_channel();
    Harness {
        chain,
        clock,
        ledger: Arc::new(ActionLedger::new(dir.path().join("history.csv"))),
        machine,
        notifier: Arc::new(ChannelNotifier::new(tx)),
        notifications,
        _dir: dir,
    }
}

impl Harness {
    fn job(&self, kind: ActionKind) -> ActionJob {
        ActionJob::new(self.machine.clone(), kind, self.ledger.clone(), self.notifier.clone())
    }
}

#[tokio::test]
async fn test_successful_restakes_are_recorded_in_order() {
    let mut h = harness();
    let scheduler = Scheduler::new(h.job(ActionKind::Restake), h.clock.clone());

    let mut produced = Vec::new();
    for _ in 0..3 {
        let outcome = scheduler.run_now().await;
        let TriggerOutcome::Completed(record) = outcome else { panic!("run was skipped") };
        assert_eq!(record.status, ActionStatus::Success);
        produced.push(record);

        h.clock.advance(chrono::TimeDelta::hours(6));
        h.chain.set_pending_reward(parse_ether("1").unwrap());
    }

    assert_eq!(h.ledger.load_all().unwrap(), produced);

    let notification = h.notifications.try_recv().unwrap();
    assert_eq!(notification.title, "Restaked");

    let stats = LedgerStats::compute(&h.ledger.load_all().unwrap());
    assert_eq!(stats.successful_restakes, 3);
    assert_eq!(stats.total_restaked, parse_ether("4").unwrap());
    assert_eq!(stats.latest_stake, Some(parse_ether("54").unwrap()));
    assert_eq!(stats.intervals.unwrap().avg_hours, 6.0);

    let status = scheduler.status();
    assert_eq!(status.last_result.map(|r| r.status), Some(ActionStatus::Success));
}

#[tokio::test]
async fn test_below_threshold_leaves_ledger_unchanged() {
    let mut h = harness();
    h.chain.set_pending_reward(parse_ether("0.05").unwrap());
    let scheduler = Scheduler::new(h.job(ActionKind::Restake), h.clock.clone());

    let outcome = scheduler.run_now().await;

    assert_matches!(outcome, TriggerOutcome::Completed(ref r) if r.status == ActionStatus::Skipped);
    assert!(!h.ledger.path().exists());
    assert!(h.notifications.try_recv().is_err());
}

#[tokio::test]
async fn test_already_max_notifies_without_recording() {
    let mut h = harness();
    h.chain.set_lock(LockInfo {
        locked: U256::from(10u64),
        lock_end: NOW as u64 + 1460 * 86_400,
        max_duration: 1460 * 86_400,
    });
    let scheduler = Scheduler::new(h.job(ActionKind::LockExtend), h.clock.clone());

    scheduler.run_now().await;

    assert_eq!(h.notifications.try_recv().unwrap().title, "Already at Max");
    assert!(h.ledger.load_all().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_run_is_recorded_and_notified() {
    let mut h = harness();
    h.chain.update(|s| s.chain_id = 5);
    let scheduler = Scheduler::new(h.job(ActionKind::Restake), h.clock.clone());

    scheduler.run_now().await;

    let records = h.ledger.load_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ActionStatus::Error);
    let notification = h.notifications.try_recv().unwrap();
    assert_eq!(notification.title, "Restake Failed");
    assert!(notification.message.chars().count() <= 60);
}

#[tokio::test(start_paused = true)]
async fn test_action_schedulers_share_one_slot() {
    let h = harness();
    let slot = RunSlot::new();
    let restake = Scheduler::with_slot(h.job(ActionKind::Restake), h.clock.clone(), slot.clone());
    let extend = Scheduler::with_slot(h.job(ActionKind::LockExtend), h.clock.clone(), slot.clone());

    let held = slot.try_acquire().unwrap();
    assert_eq!(restake.run_now().await, TriggerOutcome::Skipped);
    assert_eq!(extend.run_now().await, TriggerOutcome::Skipped);
    drop(held);

    assert_matches!(restake.run_now().await, TriggerOutcome::Completed(_));
}

#[tokio::test(start_paused = true)]
async fn test_serialized_action_schedulers_both_record() {
    let h = harness();
    h.chain.set_lock(LockInfo {
        locked: U256::from(10u64),
        lock_end: NOW as u64 + 30 * 86_400,
        max_duration: 1460 * 86_400,
    });
    let queue = Arc::new(RunQueue::default());
    let restake =
        Scheduler::serialized(h.job(ActionKind::Restake), h.clock.clone(), queue.clone());
    let extend = Scheduler::serialized(h.job(ActionKind::LockExtend), h.clock.clone(), queue);

    restake.start(Duration::from_secs(3600));
    extend.start(Duration::from_secs(86_400));
    tokio::time::sleep(Duration::from_secs(3 * 86_400 + 60)).await;
    restake.stop();
    extend.stop();

    // later runs are below threshold or already at max and are not recorded
    let kinds: Vec<_> =
        h.ledger.load_all().unwrap().into_iter().map(|r| (r.kind, r.status)).collect();
    assert_eq!(kinds.len(), 2);
    assert!(kinds.contains(&(ActionKind::Restake, ActionStatus::Success)));
    assert!(kinds.contains(&(ActionKind::LockExtend, ActionStatus::Success)));
    assert_matches!(
        extend.status().last_result,
        Some(ref r) if r.status == ActionStatus::Skipped
    );
}

#[tokio::test]
async fn test_dry_run_is_recorded_without_submitting() {
    let mut h = harness_with(true);
    let scheduler = Scheduler::new(h.job(ActionKind::Restake), h.clock.clone());

    let outcome = scheduler.run_now().await;

    assert_matches!(outcome, TriggerOutcome::Completed(ref r) if r.status == ActionStatus::DryRun);
    let records = h.ledger.load_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ActionStatus::DryRun);
    assert!(records[0].transaction_ref.is_empty());
    assert_eq!(h.chain.state().stake, parse_ether("50").unwrap());
    assert!(h.notifications.try_recv().is_err());
}

#[tokio::test]
async fn test_epoch_job_forwards_once() {
    let mut h = harness();
    h.chain.set_epochs(4, 1);
    let dir = TempDir::new().unwrap();
    let watcher = EpochWatcher::new(
        h.chain.clone(),
        Arc::new(WatermarkStore::open(dir.path().join("vesting_watermark.json"))),
        h.clock.clone(),
        Address::repeat_byte(0x42),
    );
    let scheduler = Scheduler::new(EpochJob::new(watcher, h.notifier.clone()), h.clock.clone());

    assert_matches!(scheduler.run_now().await, TriggerOutcome::Completed(Some(_)));
    assert_matches!(scheduler.run_now().await, TriggerOutcome::Completed(None));

    assert!(h.notifications.try_recv().unwrap().message.contains("3 epoch(s)"));
    assert!(h.notifications.try_recv().is_err());
}
