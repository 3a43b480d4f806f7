//! Lock extension: push the lock end out to the maximum reachable, quantized time.

use super::{format_gwei, gas_cost, ActionMachine};
use crate::{
    gate::EligibilityGate,
    ports::{ContractCall, TransactionRef},
    types::{ActionKind, ActionRecord, ActionStatus, LockStatus},
};
use alloy_primitives::U256;
use tracing::debug;

impl ActionMachine {
    /// Derives the lock status of the wallet at the current time
    pub async fn lock_status(&self) -> Result<LockStatus, crate::error::ChainError> {
        let info = self.query.lock_status(self.settings.wallet).await?;
        Ok(LockStatus::compute(info, self.clock.unix_seconds(), self.settings.time_quantum_secs))
    }

    /// Runs one lock extension and returns its record
    pub async fn extend_lock(&self) -> ActionRecord {
        let kind = ActionKind::LockExtend;
        if let Err(e) = self.ensure_chain().await {
            return self.blank_record(kind, ActionStatus::Error, e.to_string());
        }

        let status = match self.lock_status().await {
            Ok(status) => status,
            Err(e) => return self.blank_record(kind, ActionStatus::Error, e.to_string()),
        };
        let before = U256::from(status.lock_end_time);
        let target = status.max_reachable_end_time;
        let record = |status: ActionStatus, detail: String| {
            let mut record = self.blank_record(kind, status, detail);
            record.state_before = before;
            record.state_after = before;
            record
        };

        let decision = EligibilityGate::evaluate_lock(&status);
        if let Some(skip) = decision.skip_status() {
            return record(skip, decision.reason.to_string());
        }
        debug!(
            target: "lock_extend",
            lock_end = status.lock_end_time,
            target,
            extendable_by = status.extendable_by,
            "Lock can be extended"
        );

        let gas_price = match self.query.gas_price().await {
            Ok(price) => price,
            Err(e) => return record(ActionStatus::Error, e.to_string()),
        };
        if gas_price > self.settings.gas.max_gas_price {
            return record(
                ActionStatus::GasTooHigh,
                format!(
                    "gas price {} gwei above ceiling {} gwei",
                    format_gwei(gas_price),
                    format_gwei(self.settings.gas.max_gas_price)
                ),
            );
        }

        let call = ContractCall::ExtendLock { from: self.settings.wallet, unlock_time: target };
        let nonce = match self.query.nonce(self.settings.wallet).await {
            Ok(nonce) => nonce,
            Err(e) => return record(ActionStatus::Error, e.to_string()),
        };
        let gas_limit = match self.txs.estimate_gas(&call, nonce).await {
            Ok(estimate) => self.settings.gas.gas_limit(estimate),
            Err(e) => return record(ActionStatus::Error, e.to_string()),
        };

        if self.settings.dry_run {
            let mut simulated =
                record(ActionStatus::DryRun, format!("would extend lock to {target}"));
            simulated.state_after = U256::from(target);
            simulated.gas_used = gas_limit;
            simulated.gas_cost = gas_cost(gas_limit, gas_price);
            return simulated;
        }

        let tx: TransactionRef = match self.txs.submit(&call, nonce, gas_limit, gas_price).await {
            Ok(tx) => tx,
            Err(e) => return record(ActionStatus::Error, e.to_string()),
        };
        let receipt =
            match self.txs.wait_for_confirmation(&tx, self.settings.confirmation_timeout).await {
                Ok(receipt) => receipt,
                Err(e) => {
                    let mut failed = record(ActionStatus::Error, e.to_string());
                    failed.transaction_ref = tx.0;
                    return failed;
                }
            };

        let mut finished = if !receipt.success {
            let detail = "extend transaction (increaseUnlockTime) reverted";
            record(ActionStatus::Reverted, detail.to_string())
        } else {
            // report the lock end the chain actually holds now
            match self.query.lock_status(self.settings.wallet).await {
                Ok(after) => {
                    let mut done = record(
                        ActionStatus::Success,
                        format!("lock extended to {}", after.lock_end),
                    );
                    done.state_after = U256::from(after.lock_end);
                    done
                }
                Err(e) => record(
                    ActionStatus::Error,
                    format!("extension confirmed but lock re-read failed: {e}"),
                ),
            }
        };
        finished.transaction_ref = tx.0;
        finished.gas_used = receipt.gas_used;
        finished.gas_cost = gas_cost(receipt.gas_used, gas_price);
        finished
    }
}

#[cfg(test)]
mod tests {
    use crate::types::{LockInfo, LockStatus};
    use alloy_primitives::U256;

    #[test]
    fn test_target_rounds_to_week_boundary() {
        const DAY: u64 = 86_400;
        let now = 1_700_000_123;
        let info = LockInfo {
            locked: U256::from(1u64),
            lock_end: now + 10 * DAY,
            max_duration: 1460 * DAY,
        };

        let status = LockStatus::compute(info, now, 7 * DAY);
        assert_eq!(status.max_reachable_end_time, ((now + 1460 * DAY) / (7 * DAY)) * (7 * DAY));
    }
}
