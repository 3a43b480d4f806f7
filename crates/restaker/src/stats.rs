//! Ledger statistics for the dashboard and the `stats` command

use crate::types::{ActionKind, ActionRecord, ActionStatus};
use alloy_primitives::{utils::format_ether, I256, U256};
use chrono::NaiveDate;
use std::{collections::BTreeMap, fmt};

/// Spacing between successful restakes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalStats {
    /// Shortest gap in hours
    pub min_hours: f64,
    /// Mean gap in hours
    pub avg_hours: f64,
    /// Longest gap in hours
    pub max_hours: f64,
}

/// Per-day, per-status aggregate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DailyTotal {
    /// Number of records
    pub count: usize,
    /// Sum of amounts
    pub amount: U256,
    /// Sum of gas costs
    pub gas_cost: U256,
}

/// Summary over the whole ledger
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerStats {
    /// Records considered
    pub total_records: usize,
    /// Successful restakes
    pub successful_restakes: usize,
    /// Sum of restaked amounts
    pub total_restaked: U256,
    /// Gas paid by successful restakes
    pub total_gas_cost: U256,
    /// Stake before the first successful restake
    pub initial_stake: Option<U256>,
    /// Stake after the last successful restake
    pub latest_stake: Option<U256>,
    /// Gaps between successful restakes, when there are at least two
    pub intervals: Option<IntervalStats>,
    /// Totals grouped by day and status
    pub daily: BTreeMap<(NaiveDate, ActionStatus), DailyTotal>,
    /// Most recent record of any kind
    pub last_action: Option<ActionRecord>,
}

impl LedgerStats {
    /// Computes statistics over `records`, which must be in ledger order
    pub fn compute(records: &[ActionRecord]) -> Self {
        let mut stats = Self { total_records: records.len(), ..Default::default() };

        let restakes: Vec<&ActionRecord> = records
            .iter()
            .filter(|r| r.kind == ActionKind::Restake && r.status == ActionStatus::Success)
            .collect();
        stats.successful_restakes = restakes.len();
        for record in &restakes {
            stats.total_restaked += record.amount;
            stats.total_gas_cost += record.gas_cost;
        }
        stats.initial_stake = restakes.first().map(|r| r.state_before);
        stats.latest_stake = restakes.last().map(|r| r.state_after);

        let gaps: Vec<f64> = restakes
            .windows(2)
            .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_seconds() as f64 / 3600.0)
            .collect();
        if !gaps.is_empty() {
            stats.intervals = Some(IntervalStats {
                min_hours: gaps.iter().copied().fold(f64::INFINITY, f64::min),
                avg_hours: gaps.iter().sum::<f64>() / gaps.len() as f64,
                max_hours: gaps.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            });
        }

        for record in records {
            let day =
                stats.daily.entry((record.timestamp.date_naive(), record.status)).or_default();
            day.count += 1;
            day.amount += record.amount;
            day.gas_cost += record.gas_cost;
        }
        stats.last_action = records.last().cloned();
        stats
    }

    /// Latest minus initial stake
    pub fn growth(&self) -> Option<I256> {
        Some(signed(self.latest_stake?) - signed(self.initial_stake?))
    }

    /// Growth relative to the initial stake, in percent
    pub fn growth_percent(&self) -> Option<f64> {
        let initial = ether_f64(self.initial_stake?);
        if initial == 0.0 {
            return None;
        }
        Some((ether_f64(self.latest_stake?) - initial) / initial * 100.0)
    }

    /// Restaked amount minus gas paid
    pub fn net_gain(&self) -> I256 {
        signed(self.total_restaked) - signed(self.total_gas_cost)
    }
}

fn signed(value: U256) -> I256 {
    I256::try_from(value).unwrap_or(I256::MAX)
}

fn ether_f64(value: U256) -> f64 {
    format_ether(value).parse().unwrap_or(0.0)
}

fn format_signed_ether(value: I256) -> String {
    let magnitude = format_ether(value.unsigned_abs());
    if value.is_negative() {
        format!("-{magnitude}")
    } else {
        magnitude
    }
}

impl fmt::Display for LedgerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Records:             {}", self.total_records)?;
        writeln!(f, "Successful restakes: {}", self.successful_restakes)?;
        writeln!(f, "Total restaked:      {}", format_ether(self.total_restaked))?;
        writeln!(f, "Total gas cost:      {}", format_ether(self.total_gas_cost))?;
        writeln!(f, "Net gain:            {}", format_signed_ether(self.net_gain()))?;
        if let (Some(initial), Some(latest)) = (self.initial_stake, self.latest_stake) {
            writeln!(f, "Initial stake:       {}", format_ether(initial))?;
            writeln!(f, "Latest stake:        {}", format_ether(latest))?;
            if let Some(growth) = self.growth() {
                write!(f, "Growth:              {}", format_signed_ether(growth))?;
                match self.growth_percent() {
                    Some(pct) => writeln!(f, " ({pct:.2}%)")?,
                    None => writeln!(f)?,
                }
            }
        }
        if let Some(intervals) = self.intervals {
            writeln!(
                f,
                "Interval (h):        min {:.1} / avg {:.1} / max {:.1}",
                intervals.min_hours, intervals.avg_hours, intervals.max_hours
            )?;
        }
        for ((day, status), total) in &self.daily {
            writeln!(
                f,
                "  {day} {:<10} x{:<3} amount {} gas {}",
                status.as_str(),
                total.count,
                format_ether(total.amount),
                format_ether(total.gas_cost)
            )?;
        }
        if let Some(last) = &self.last_action {
            writeln!(
                f,
                "Last action:         {} {} at {}",
                last.kind, last.status, last.timestamp
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::utils::parse_ether;
    use chrono::{DateTime, Utc};

    fn restake(
        at: i64,
        status: ActionStatus,
        amount: &str,
        before: &str,
        after: &str,
    ) -> ActionRecord {
        ActionRecord {
            timestamp: DateTime::<Utc>::from_timestamp(at, 0).unwrap(),
            kind: ActionKind::Restake,
            amount: parse_ether(amount).unwrap(),
            state_before: parse_ether(before).unwrap(),
            state_after: parse_ether(after).unwrap(),
            transaction_ref: String::new(),
            gas_used: 100_000,
            gas_cost: parse_ether("0.01").unwrap(),
            status,
            detail: String::new(),
        }
    }

    #[test]
    fn test_summary() {
        let t0 = 1_700_000_000;
        let records = vec![
            restake(t0, ActionStatus::Success, "1", "100", "101"),
            restake(t0 + 3600, ActionStatus::Error, "0", "101", "101"),
            restake(t0 + 2 * 3600, ActionStatus::Success, "2", "101", "103"),
            restake(t0 + 8 * 3600, ActionStatus::Success, "1", "103", "104"),
        ];

        let stats = LedgerStats::compute(&records);
        assert_eq!(stats.total_records, 4);
        assert_eq!(stats.successful_restakes, 3);
        assert_eq!(stats.total_restaked, parse_ether("4").unwrap());
        assert_eq!(stats.total_gas_cost, parse_ether("0.03").unwrap());
        assert_eq!(stats.initial_stake, Some(parse_ether("100").unwrap()));
        assert_eq!(stats.latest_stake, Some(parse_ether("104").unwrap()));
        assert_eq!(stats.growth(), Some(I256::try_from(parse_ether("4").unwrap()).unwrap()));
        assert!((stats.growth_percent().unwrap() - 4.0).abs() < 1e-9);
        assert_eq!(stats.net_gain(), I256::try_from(parse_ether("3.97").unwrap()).unwrap());

        let intervals = stats.intervals.unwrap();
        assert_eq!(intervals.min_hours, 2.0);
        assert_eq!(intervals.max_hours, 6.0);
        assert_eq!(intervals.avg_hours, 4.0);

        let day = DateTime::<Utc>::from_timestamp(t0, 0).unwrap().date_naive();
        assert_eq!(stats.daily[&(day, ActionStatus::Error)].count, 1);
        assert_eq!(stats.last_action.as_ref().map(|r| r.status), Some(ActionStatus::Success));
        assert!(stats.to_string().contains("Successful restakes: 3"));
    }

    #[test]
    fn test_empty_ledger() {
        let stats = LedgerStats::compute(&[]);
        assert_eq!(stats.successful_restakes, 0);
        assert_eq!(stats.growth(), None);
        assert_eq!(stats.intervals, None);
        assert_eq!(stats.net_gain(), I256::ZERO);
    }
}
