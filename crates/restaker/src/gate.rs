//! Eligibility gate
//!
//! Pure decision over on-chain state, configured thresholds and the network gas price. No
//! network access, no side effects.

use crate::types::{ActionStatus, LockStatus};
use alloy_primitives::U256;
use std::fmt;

/// Why the gate admitted or declined an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionReason {
    /// All checks passed
    Eligible,
    /// Pending reward below the configured minimum
    BelowThreshold,
    /// Network gas price above the configured ceiling
    GasTooHigh,
    /// Lock already ends at the maximum reachable time
    AlreadyMax,
    /// Wallet has no locked position
    NoLock,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eligible => "eligible",
            Self::BelowThreshold => "pending reward below threshold",
            Self::GasTooHigh => "gas price above ceiling",
            Self::AlreadyMax => "lock already at maximum",
            Self::NoLock => "no active lock",
        })
    }
}

/// Result of a gate evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityDecision {
    /// Whether the action should go ahead
    pub proceed: bool,
    /// Reason for the decision
    pub reason: DecisionReason,
}

impl EligibilityDecision {
    /// Admitting decision
    pub const PROCEED: Self = Self { proceed: true, reason: DecisionReason::Eligible };

    /// Declining decision
    pub const fn skip(reason: DecisionReason) -> Self {
        Self { proceed: false, reason }
    }

    /// Status recorded for a declined decision, `None` when admitted
    pub const fn skip_status(&self) -> Option<ActionStatus> {
        match self.reason {
            DecisionReason::Eligible => None,
            DecisionReason::GasTooHigh => Some(ActionStatus::GasTooHigh),
            DecisionReason::BelowThreshold |
            DecisionReason::AlreadyMax |
            DecisionReason::NoLock => Some(ActionStatus::Skipped),
        }
    }
}

/// Stateless eligibility checks
#[derive(Debug, Clone, Copy, Default)]
pub struct EligibilityGate;

impl EligibilityGate {
    /// Restake gate. The threshold is checked before the gas price.
    pub fn evaluate(
        pending_reward: U256,
        min_threshold: U256,
        current_gas_price: u128,
        max_gas_price: u128,
    ) -> EligibilityDecision {
        if pending_reward < min_threshold {
            EligibilityDecision::skip(DecisionReason::BelowThreshold)
        } else if current_gas_price > max_gas_price {
            EligibilityDecision::skip(DecisionReason::GasTooHigh)
        } else {
            EligibilityDecision::PROCEED
        }
    }

    /// Lock-extend gate. Gas is checked later, after the target end time is computed.
    pub fn evaluate_lock(status: &LockStatus) -> EligibilityDecision {
        if !status.has_lock() {
            EligibilityDecision::skip(DecisionReason::NoLock)
        } else if !status.can_extend {
            EligibilityDecision::skip(DecisionReason::AlreadyMax)
        } else {
            EligibilityDecision::PROCEED
        }
    }
}
