//! Shared data model

use alloy_primitives::{utils::format_ether, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Kind of logical action executed by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionKind {
    /// Realize pending reward and move it into stake
    Restake,
    /// Extend the time-lock to the maximum reachable end time
    LockExtend,
}

impl ActionKind {
    /// Stable identifier used in the ledger
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Restake => "Restake",
            Self::LockExtend => "LockExtend",
        }
    }

    /// Title used in user-facing notifications
    pub const fn title(&self) -> &'static str {
        match self {
            Self::Restake => "Restake",
            Self::LockExtend => "Lock Extend",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Restake" => Ok(Self::Restake),
            "LockExtend" => Ok(Self::LockExtend),
            other => Err(format!("unknown action kind: {other}")),
        }
    }
}

/// Outcome of one action run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionStatus {
    /// All transactions confirmed and the resulting state was re-read
    Success,
    /// The eligibility gate declined the action
    Skipped,
    /// The realize step confirmed but paid out nothing
    NoOp,
    /// Network gas price above the configured ceiling
    GasTooHigh,
    /// A submitted transaction was included but rejected by the protocol
    Reverted,
    /// Network, estimation or confirmation failure
    Error,
    /// Simulated run, nothing was submitted
    DryRun,
}

impl ActionStatus {
    /// Stable identifier used in the ledger
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Skipped => "Skipped",
            Self::NoOp => "NoOp",
            Self::GasTooHigh => "GasTooHigh",
            Self::Reverted => "Reverted",
            Self::Error => "Error",
            Self::DryRun => "DryRun",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Success" => Self::Success,
            "Skipped" => Self::Skipped,
            "NoOp" => Self::NoOp,
            "GasTooHigh" => Self::GasTooHigh,
            "Reverted" => Self::Reverted,
            "Error" => Self::Error,
            "DryRun" => Self::DryRun,
            other => return Err(format!("unknown action status: {other}")),
        })
    }
}

/// One attempted action. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    /// When the run finished
    pub timestamp: DateTime<Utc>,
    /// Action kind
    pub kind: ActionKind,
    /// Realized reward moved into stake (wei), zero for lock extensions
    pub amount: U256,
    /// Stake (wei) or lock end (unix seconds) before the run
    pub state_before: U256,
    /// Stake (wei) or lock end (unix seconds) after the run, as observed on-chain on success
    pub state_after: U256,
    /// Transaction hashes joined by `;`, empty for simulated or gated runs
    pub transaction_ref: String,
    /// Gas consumed by all confirmed transactions of the run
    pub gas_used: u64,
    /// Fee paid for `gas_used` (wei)
    pub gas_cost: U256,
    /// Run outcome
    pub status: ActionStatus,
    /// Human-readable reason or error message
    pub detail: String,
}

impl ActionRecord {
    /// Maximum length of the error message surfaced to the user
    pub const USER_MESSAGE_LEN: usize = 60;

    /// Whether the record goes into the ledger. Gate skips are reported but not persisted.
    pub const fn is_persisted(&self) -> bool {
        !matches!(self.status, ActionStatus::Skipped)
    }

    /// Short human-readable summary, without transaction internals
    pub fn summary(&self) -> String {
        match (self.kind, self.status) {
            (ActionKind::Restake, ActionStatus::Success) => {
                format!(
                    "Restaked {} (stake now {})",
                    format_ether(self.amount),
                    format_ether(self.state_after)
                )
            }
            (ActionKind::LockExtend, ActionStatus::Success) => {
                format!("Lock extended to {}", format_unix(self.state_after))
            }
            (ActionKind::Restake, ActionStatus::DryRun) => {
                format!("Dry run: would restake {}", format_ether(self.amount))
            }
            (ActionKind::LockExtend, ActionStatus::DryRun) => {
                format!("Dry run: would extend lock to {}", format_unix(self.state_after))
            }
            (_, ActionStatus::Error) => truncate(&self.detail, Self::USER_MESSAGE_LEN),
            _ => self.detail.clone(),
        }
    }
}

fn format_unix(value: U256) -> String {
    u64::try_from(value)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| value.to_string())
}

/// Truncates to at most `max` characters, appending an ellipsis when shortened
pub fn truncate(message: &str, max: usize) -> String {
    if message.chars().count() <= max {
        return message.to_string();
    }
    let mut out: String = message.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Raw lock position as reported by the escrow contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockInfo {
    /// Locked amount (wei)
    pub locked: U256,
    /// Current lock end (unix seconds)
    pub lock_end: u64,
    /// Protocol maximum lock duration (seconds)
    pub max_duration: u64,
}

/// Lock position derived against the current time. Never cached across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStatus {
    /// Locked amount (wei)
    pub locked_amount: U256,
    /// Current lock end (unix seconds)
    pub lock_end_time: u64,
    /// `now + max_duration`, floored to the protocol time quantum
    pub max_reachable_end_time: u64,
    /// Whether the lock can be pushed further out
    pub can_extend: bool,
    /// Seconds the lock can be extended by, zero when it cannot
    pub extendable_by: u64,
}

impl LockStatus {
    /// Derives the status of `info` at `now`, rounding down to multiples of `quantum` seconds
    pub fn compute(info: LockInfo, now: u64, quantum: u64) -> Self {
        let horizon = now.saturating_add(info.max_duration);
        let max_reachable_end_time =
            if quantum == 0 { horizon } else { (horizon / quantum) * quantum };
        let can_extend = max_reachable_end_time > info.lock_end;
        Self {
            locked_amount: info.locked,
            lock_end_time: info.lock_end,
            max_reachable_end_time,
            can_extend,
            extendable_by: max_reachable_end_time.saturating_sub(info.lock_end),
        }
    }

    /// Whether there is any position to extend
    pub fn has_lock(&self) -> bool {
        !self.locked_amount.is_zero()
    }
}

/// Vesting epoch position of the wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochState {
    /// Protocol epoch
    pub current_epoch: u64,
    /// Last epoch the wallet claimed
    pub user_last_claimed_epoch: u64,
}

impl EpochState {
    /// Number of unclaimed epochs
    pub const fn epochs_behind(&self) -> u64 {
        self.current_epoch.saturating_sub(self.user_last_claimed_epoch)
    }

    /// Whether any epoch is claimable
    pub const fn has_new(&self) -> bool {
        self.epochs_behind() > 0
    }
}

/// User-facing notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Short title
    pub title: String,
    /// Body
    pub message: String,
}

impl Notification {
    /// Creates a notification
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self { title: title.into(), message: message.into() }
    }
}
