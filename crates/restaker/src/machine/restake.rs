//! Restake: realize the pending reward (T1), then move the realized amount into stake (T2).
//!
//! The sequence is an explicit transition table over [`Phase`]. The pure [`transition`] function
//! maps the current phase and an [`Observation`] to the next phase and the [`Effect`] the driver
//! must perform; the driver only performs effects and feeds their results back in.

use super::{format_gwei, gas_cost, ActionMachine};
use crate::{
    error::ChainError,
    gate::{DecisionReason, EligibilityGate},
    ports::{Confirmation, ContractCall, TransactionRef},
    types::{ActionKind, ActionRecord, ActionStatus},
};
use alloy_primitives::{utils::format_ether, Address, U256};
use tracing::debug;

/// One of the two dependent transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Realize,
    Compound,
}

impl Step {
    const fn call(self, from: Address) -> ContractCall {
        match self {
            Self::Realize => ContractCall::RealizeReward { from },
            Self::Compound => ContractCall::CompoundReward { from },
        }
    }

    /// T2 always uses the nonce right after T1
    const fn nonce_offset(self) -> u64 {
        match self {
            Self::Realize => 0,
            Self::Compound => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// T1 is being submitted
    Realizing,
    /// T1 submitted, waiting for its receipt
    AwaitingRealize,
    /// T1 confirmed, realized balance requested
    Verifying,
    /// T2 is being submitted
    Compounding,
    /// T2 submitted, waiting for its receipt
    AwaitingCompound,
    /// T2 confirmed, stake requested
    Settling,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Observation {
    Submitted(TransactionRef),
    Confirmed(Confirmation),
    RealizedBalance(U256),
    StakeBalance(U256),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Effect {
    Submit(Step),
    AwaitConfirmation(TransactionRef),
    ReadRealized,
    ReadStake,
    Finish(ActionStatus, String),
}

/// Facts gathered by the run; kept on every exit path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Progress {
    pub(crate) tx_refs: Vec<TransactionRef>,
    pub(crate) gas_used: u64,
    pub(crate) realized: U256,
    pub(crate) stake_after: Option<U256>,
}

impl Progress {
    fn transaction_ref(&self) -> String {
        self.tx_refs.iter().map(|tx| tx.0.as_str()).collect::<Vec<_>>().join(";")
    }
}

pub(crate) const START: (Phase, Effect) = (Phase::Realizing, Effect::Submit(Step::Realize));

pub(crate) fn transition(
    phase: Phase,
    observation: Observation,
    progress: &mut Progress,
) -> (Phase, Effect) {
    match (phase, observation) {
        (Phase::Realizing, Observation::Submitted(tx)) => {
            progress.tx_refs.push(tx.clone());
            (Phase::AwaitingRealize, Effect::AwaitConfirmation(tx))
        }
        (Phase::AwaitingRealize, Observation::Confirmed(receipt)) => {
            progress.gas_used = progress.gas_used.saturating_add(receipt.gas_used);
            if receipt.success {
                (Phase::Verifying, Effect::ReadRealized)
            } else {
                let detail = "realize transaction (createStake) reverted".to_string();
                (Phase::Done, Effect::Finish(ActionStatus::Reverted, detail))
            }
        }
        (Phase::Verifying, Observation::RealizedBalance(realized)) if realized.is_zero() => {
            let detail = "realize step confirmed but no reward was realized".to_string();
            (Phase::Done, Effect::Finish(ActionStatus::NoOp, detail))
        }
        (Phase::Verifying, Observation::RealizedBalance(realized)) => {
            progress.realized = realized;
            (Phase::Compounding, Effect::Submit(Step::Compound))
        }
        (Phase::Compounding, Observation::Submitted(tx)) => {
            progress.tx_refs.push(tx.clone());
            (Phase::AwaitingCompound, Effect::AwaitConfirmation(tx))
        }
        (Phase::AwaitingCompound, Observation::Confirmed(receipt)) => {
            progress.gas_used = progress.gas_used.saturating_add(receipt.gas_used);
            if receipt.success {
                (Phase::Settling, Effect::ReadStake)
            } else {
                let detail = "compound transaction (addRewardToStake) reverted".to_string();
                (Phase::Done, Effect::Finish(ActionStatus::Reverted, detail))
            }
        }
        (Phase::Settling, Observation::StakeBalance(stake)) => {
            progress.stake_after = Some(stake);
            let detail = format!("restaked {}", format_ether(progress.realized));
            (Phase::Done, Effect::Finish(ActionStatus::Success, detail))
        }
        (phase, observation) => {
            let detail = format!("unexpected {observation:?} while {phase:?}");
            (Phase::Done, Effect::Finish(ActionStatus::Error, detail))
        }
    }
}

/// State read before the gate
#[derive(Debug, Clone, Copy)]
struct Snapshot {
    pending: U256,
    stake: U256,
    gas_price: u128,
}

impl ActionMachine {
    /// Runs one restake and returns its record
    pub async fn restake(&self) -> ActionRecord {
        if let Err(e) = self.ensure_chain().await {
            return self.blank_record(ActionKind::Restake, ActionStatus::Error, e.to_string());
        }

        let snapshot = match self.read_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return self.blank_record(ActionKind::Restake, ActionStatus::Error, e.to_string())
            }
        };
        debug!(
            target: "restake",
            pending = %format_ether(snapshot.pending),
            stake = %format_ether(snapshot.stake),
            gas_price_gwei = %format_gwei(snapshot.gas_price),
            "Read restake state"
        );

        let decision = EligibilityGate::evaluate(
            snapshot.pending,
            self.settings.min_reward_threshold,
            snapshot.gas_price,
            self.settings.gas.max_gas_price,
        );
        if let Some(status) = decision.skip_status() {
            let detail = match decision.reason {
                DecisionReason::GasTooHigh => format!(
                    "gas price {} gwei above ceiling {} gwei",
                    format_gwei(snapshot.gas_price),
                    format_gwei(self.settings.gas.max_gas_price)
                ),
                reason => format!(
                    "{reason}: pending {} < {}",
                    format_ether(snapshot.pending),
                    format_ether(self.settings.min_reward_threshold)
                ),
            };
            return self.restake_record(status, &snapshot, &Progress::default(), detail);
        }

        let nonce = match self.query.nonce(self.settings.wallet).await {
            Ok(nonce) => nonce,
            Err(e) => {
                return self.restake_record(
                    ActionStatus::Error,
                    &snapshot,
                    &Progress::default(),
                    e.to_string(),
                )
            }
        };

        if self.settings.dry_run {
            self.simulate_restake(&snapshot, nonce).await
        } else {
            self.drive_restake(&snapshot, nonce).await
        }
    }

    async fn read_snapshot(&self) -> Result<Snapshot, ChainError> {
        let wallet = self.settings.wallet;
        Ok(Snapshot {
            pending: self.query.pending_reward(wallet).await?,
            stake: self.query.stake(wallet).await?,
            gas_price: self.query.gas_price().await?,
        })
    }

    async fn drive_restake(&self, snapshot: &Snapshot, nonce: u64) -> ActionRecord {
        let wallet = self.settings.wallet;
        let mut progress = Progress::default();
        let (mut phase, mut effect) = START;

        loop {
            let observation = match effect {
                Effect::Finish(status, detail) => {
                    return self.restake_record(status, snapshot, &progress, detail)
                }
                Effect::Submit(step) => self
                    .submit_step(step, nonce, snapshot.gas_price)
                    .await
                    .map(Observation::Submitted),
                Effect::AwaitConfirmation(tx) => self
                    .txs
                    .wait_for_confirmation(&tx, self.settings.confirmation_timeout)
                    .await
                    .map(Observation::Confirmed),
                Effect::ReadRealized => {
                    self.query.realized_reward(wallet).await.map(Observation::RealizedBalance)
                }
                Effect::ReadStake => self.query.stake(wallet).await.map(Observation::StakeBalance),
            };

            match observation {
                Ok(observation) => (phase, effect) = transition(phase, observation, &mut progress),
                Err(e) => {
                    let detail = e.to_string();
                    return self.restake_record(ActionStatus::Error, snapshot, &progress, detail)
                }
            }
        }
    }

    async fn submit_step(
        &self,
        step: Step,
        base_nonce: u64,
        gas_price: u128,
    ) -> Result<TransactionRef, ChainError> {
        let call = step.call(self.settings.wallet);
        let nonce = base_nonce + step.nonce_offset();
        let estimate = self.txs.estimate_gas(&call, nonce).await?;
        let gas_limit = self.settings.gas.gas_limit(estimate);
        debug!(
            target: "restake",
            call = call.name(),
            nonce,
            estimate,
            gas_limit,
            "Submitting step"
        );
        self.txs.submit(&call, nonce, gas_limit, gas_price).await
    }

    /// Estimates both steps and synthesizes the outcome without submitting
    async fn simulate_restake(&self, snapshot: &Snapshot, nonce: u64) -> ActionRecord {
        let mut gas_used = 0u64;
        for step in [Step::Realize, Step::Compound] {
            let call = step.call(self.settings.wallet);
            match self.txs.estimate_gas(&call, nonce + step.nonce_offset()).await {
                Ok(estimate) => {
                    gas_used = gas_used.saturating_add(self.settings.gas.gas_limit(estimate))
                }
                Err(e) => {
                    return self.restake_record(
                        ActionStatus::Error,
                        snapshot,
                        &Progress::default(),
                        e.to_string(),
                    )
                }
            }
        }

        let mut record = self.blank_record(
            ActionKind::Restake,
            ActionStatus::DryRun,
            format!("would restake {}", format_ether(snapshot.pending)),
        );
        record.amount = snapshot.pending;
        record.state_before = snapshot.stake;
        record.state_after = snapshot.stake.saturating_add(snapshot.pending);
        record.gas_used = gas_used;
        record.gas_cost = gas_cost(gas_used, snapshot.gas_price);
        record
    }

    fn restake_record(
        &self,
        status: ActionStatus,
        snapshot: &Snapshot,
        progress: &Progress,
        detail: String,
    ) -> ActionRecord {
        let mut record = self.blank_record(ActionKind::Restake, status, detail);
        record.state_before = snapshot.stake;
        record.state_after = progress.stake_after.unwrap_or(snapshot.stake);
        if status == ActionStatus::Success {
            record.amount = progress.realized;
        }
        record.transaction_ref = progress.transaction_ref();
        record.gas_used = progress.gas_used;
        record.gas_cost = gas_cost(progress.gas_used, snapshot.gas_price);
        record
    }
}
