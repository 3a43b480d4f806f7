//! Recurring Scheduler
//!
//! A scheduler is `Stopped` or `Running`. While running, one timer task fires the job
//! immediately and then every interval. Timer ticks and manual triggers funnel into the same
//! [`RunSlot`]; a trigger arriving while the slot is taken is dropped, not queued.
//!
//! Schedulers built with [`Scheduler::serialized`] additionally wait their turn on a shared
//! [`RunQueue`] before running, so different jobs touching the same wallet never overlap and
//! never starve each other when their ticks coincide.
//!
//! Runs are spawned off the timer task, so stopping the scheduler only cancels future ticks and
//! never an in-flight run.

use crate::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

/// Shortest timer period accepted by [`Scheduler::start`]
pub const MIN_PERIOD: Duration = Duration::from_secs(1);

/// FIFO turn lock shared by schedulers whose runs must not overlap
pub type RunQueue = tokio::sync::Mutex<()>;

/// Mutual exclusion flag for "run already in progress"
#[derive(Debug, Default)]
pub struct RunSlot {
    busy: AtomicBool,
}

impl RunSlot {
    /// Creates a free slot
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Takes the slot, or returns `None` if a run is in flight
    pub fn try_acquire(self: &Arc<Self>) -> Option<RunGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { slot: Arc::clone(self) })
    }

    /// Whether a run currently holds the slot
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the slot on drop
#[derive(Debug)]
pub struct RunGuard {
    slot: Arc<RunSlot>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.slot.busy.store(false, Ordering::Release);
    }
}

/// Unit of work driven by a [`Scheduler`]
#[async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    /// Result kept as the scheduler's last result
    type Output: Clone + fmt::Debug + Send + Sync + 'static;

    /// Name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Executes one run. Must not fail; failures are part of the output.
    async fn run(&self) -> Self::Output;
}

/// Result of a trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome<O> {
    /// The job ran to completion
    Completed(O),
    /// Another run held the slot; this trigger was dropped
    Skipped,
}

/// Snapshot of the scheduler state
#[derive(Debug, Clone)]
pub struct SchedulerStatus<O> {
    /// Whether the timer is armed
    pub running: bool,
    /// When the last completed run finished
    pub last_run: Option<DateTime<Utc>>,
    /// Output of the last completed run
    pub last_result: Option<O>,
    /// When the timer fires next, if running
    pub next_run: Option<DateTime<Utc>>,
}

struct State<O> {
    timer: Option<JoinHandle<()>>,
    last_run: Option<DateTime<Utc>>,
    last_result: Option<O>,
    next_run: Option<DateTime<Utc>>,
}

struct Shared<J: ScheduledJob> {
    job: J,
    slot: Arc<RunSlot>,
    queue: Option<Arc<RunQueue>>,
    clock: Arc<dyn Clock>,
    state: Mutex<State<J::Output>>,
}

impl<J: ScheduledJob> Shared<J> {
    async fn execute(&self) -> TriggerOutcome<J::Output> {
        let Some(_guard) = self.slot.try_acquire() else {
            info!(target: "scheduler", job = self.job.name(), "skipped: overlapping run");
            crate::metrics::record_overlap_skipped(self.job.name());
            return TriggerOutcome::Skipped;
        };
        let _turn = match &self.queue {
            Some(queue) => Some(queue.lock().await),
            None => None,
        };

        debug!(target: "scheduler", job = self.job.name(), "Run started");
        let output = self.job.run().await;

        let mut state = self.state.lock();
        state.last_run = Some(self.clock.now());
        state.last_result = Some(output.clone());
        TriggerOutcome::Completed(output)
    }
}

/// Drives one job on a recurring timer plus manual triggers
pub struct Scheduler<J: ScheduledJob> {
    shared: Arc<Shared<J>>,
}

impl<J: ScheduledJob> fmt::Debug for Scheduler<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("job", &self.shared.job.name())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl<J: ScheduledJob> Scheduler<J> {
    /// Scheduler with its own run slot
    pub fn new(job: J, clock: Arc<dyn Clock>) -> Self {
        Self::with_slot(job, clock, RunSlot::new())
    }

    /// Scheduler sharing `slot` with other schedulers
    pub fn with_slot(job: J, clock: Arc<dyn Clock>, slot: Arc<RunSlot>) -> Self {
        Self::build(job, clock, slot, None)
    }

    /// Scheduler with its own run slot that waits for `queue` before each run.
    ///
    /// Overlapping triggers of this job are still dropped; triggers of other jobs on the same
    /// queue are run one after the other in arrival order.
    pub fn serialized(job: J, clock: Arc<dyn Clock>, queue: Arc<RunQueue>) -> Self {
        Self::build(job, clock, RunSlot::new(), Some(queue))
    }

    fn build(
        job: J,
        clock: Arc<dyn Clock>,
        slot: Arc<RunSlot>,
        queue: Option<Arc<RunQueue>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                job,
                slot,
                queue,
                clock,
                state: Mutex::new(State {
                    timer: None,
                    last_run: None,
                    last_result: None,
                    next_run: None,
                }),
            }),
        }
    }

    /// The scheduled job
    pub fn job(&self) -> &J {
        &self.shared.job
    }

    /// Arms the timer: one run now, then one every `period`. Restarts if already running.
    /// Periods shorter than [`MIN_PERIOD`] are raised to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, period: Duration) {
        self.stop();

        let period = if period < MIN_PERIOD {
            warn!(
                target: "scheduler",
                job = self.shared.job.name(),
                ?period,
                "Period too short, using {MIN_PERIOD:?}"
            );
            MIN_PERIOD
        } else {
            period
        };

        let shared = Arc::clone(&self.shared);
        let step = TimeDelta::from_std(period).unwrap_or(TimeDelta::MAX);
        let timer = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                shared.state.lock().next_run = shared.clock.now().checked_add_signed(step);

                let run = Arc::clone(&shared);
                tokio::spawn(async move {
                    run.execute().await;
                });
            }
        });

        self.shared.state.lock().timer = Some(timer);
        info!(target: "scheduler", job = self.shared.job.name(), ?period, "Scheduler started");
    }

    /// Cancels the timer. An in-flight run finishes normally.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
            state.next_run = None;
            info!(target: "scheduler", job = self.shared.job.name(), "Scheduler stopped");
        }
    }

    /// Runs the job now, unless a run is in flight. Allowed while stopped.
    pub async fn run_now(&self) -> TriggerOutcome<J::Output> {
        self.shared.execute().await
    }

    /// Whether a run of this job is in flight or waiting for its turn
    pub fn is_busy(&self) -> bool {
        self.shared.slot.is_busy()
    }

    /// Whether the timer is armed
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().timer.is_some()
    }

    /// Current status
    pub fn status(&self) -> SchedulerStatus<J::Output> {
        let state = self.shared.state.lock();
        SchedulerStatus {
            running: state.timer.is_some(),
            last_run: state.last_run,
            last_result: state.last_result.clone(),
            next_run: state.next_run,
        }
    }
}

impl<J: ScheduledJob> Drop for Scheduler<J> {
    fn drop(&mut self) {
        if let Some(timer) = self.shared.state.lock().timer.take() {
            timer.abort();
        }
    }
}
