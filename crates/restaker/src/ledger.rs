//! Action Ledger
//!
//! Append-only CSV history of action records. Every append takes an exclusive advisory lock on
//! the file and writes the whole row in a single call, so concurrent appenders never interleave.
//! Readers take a shared lock.

use crate::types::{ActionKind, ActionRecord, ActionStatus};
use alloy_primitives::{
    utils::{format_ether, parse_ether},
    U256,
};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use fs2::FileExt;
use std::{
    fs::{self, File, OpenOptions},
    io::{Read, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Column header, written once when the file is created
pub const HEADER: &str = concat!(
    "timestamp,kind,amount,state_before,state_after,",
    "transaction_ref,gas_used,gas_cost,status,detail"
);

const COLUMNS: usize = 10;

/// CSV backed action history
#[derive(Debug, Clone)]
pub struct ActionLedger {
    path: PathBuf,
}

impl ActionLedger {
    /// Ledger stored at `path`; the file is created on first append
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the ledger file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `record` if it is persistable. Returns whether a row was written.
    pub fn append(&self, record: &ActionRecord) -> Result<bool> {
        if !record.is_persisted() {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open ledger: {}", self.path.display()))?;
        FileExt::lock_exclusive(&file)
            .with_context(|| format!("Failed to lock ledger: {}", self.path.display()))?;

        let result = (|| {
            let mut buf = String::new();
            if file.metadata()?.len() == 0 {
                buf.push_str(HEADER);
                buf.push('\n');
            }
            buf.push_str(&encode_row(record));
            buf.push('\n');
            file.write_all(buf.as_bytes())?;
            file.flush()
        })();
        let _ = FileExt::unlock(&file);
        result.with_context(|| format!("Failed to append to ledger: {}", self.path.display()))?;

        debug!(
            target: "ledger",
            kind = %record.kind,
            status = %record.status,
            path = %self.path.display(),
            "Appended action record"
        );
        Ok(true)
    }

    /// Loads every record in file order. A missing file is an empty ledger.
    ///
    /// Rows that fail to parse are logged and skipped.
    pub fn load_all(&self) -> Result<Vec<ActionRecord>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to open ledger: {}", self.path.display()))
            }
        };
        FileExt::lock_shared(&file)
            .with_context(|| format!("Failed to lock ledger: {}", self.path.display()))?;
        let mut content = String::new();
        let read = file.read_to_string(&mut content);
        let _ = FileExt::unlock(&file);
        read.with_context(|| format!("Failed to read ledger: {}", self.path.display()))?;

        let mut records = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.is_empty() || (idx == 0 && line == HEADER) {
                continue;
            }
            match decode_row(line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(target: "ledger", line = idx + 1, %err, "Skipping malformed ledger row")
                }
            }
        }
        Ok(records)
    }

    /// Most recent record, optionally restricted to one kind
    pub fn last(&self, kind: Option<ActionKind>) -> Result<Option<ActionRecord>> {
        Ok(self.load_all()?.into_iter().rev().find(|r| kind.is_none_or(|k| r.kind == k)))
    }
}

/// Amount columns are ether decimals; lock states are unix seconds
fn encode_state(kind: ActionKind, value: U256) -> String {
    match kind {
        ActionKind::Restake => format_ether(value),
        ActionKind::LockExtend => value.to_string(),
    }
}

fn decode_state(kind: ActionKind, value: &str) -> Result<U256> {
    match kind {
        ActionKind::Restake => parse_ether(value).map_err(|e| anyhow!("bad amount {value:?}: {e}")),
        ActionKind::LockExtend => {
            value.parse::<U256>().map_err(|e| anyhow!("bad lock time {value:?}: {e}"))
        }
    }
}

fn encode_row(record: &ActionRecord) -> String {
    let fields = [
        record.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        record.kind.as_str().to_string(),
        format_ether(record.amount),
        encode_state(record.kind, record.state_before),
        encode_state(record.kind, record.state_after),
        record.transaction_ref.clone(),
        record.gas_used.to_string(),
        format_ether(record.gas_cost),
        record.status.as_str().to_string(),
        record.detail.clone(),
    ];
    fields.iter().map(|f| quote(f)).collect::<Vec<_>>().join(",")
}

fn decode_row(line: &str) -> Result<ActionRecord> {
    let fields = split_row(line)?;
    // trailing columns from newer writers are ignored
    if fields.len() < COLUMNS {
        bail!("expected {COLUMNS} columns, found {}", fields.len());
    }

    let timestamp = DateTime::parse_from_rfc3339(&fields[0])
        .with_context(|| format!("bad timestamp {:?}", fields[0]))?
        .with_timezone(&Utc);
    let kind: ActionKind = fields[1].parse().map_err(|e: String| anyhow!(e))?;
    let status: ActionStatus = fields[8].parse().map_err(|e: String| anyhow!(e))?;

    Ok(ActionRecord {
        timestamp,
        kind,
        amount: parse_ether(&fields[2]).map_err(|e| anyhow!("bad amount {:?}: {e}", fields[2]))?,
        state_before: decode_state(kind, &fields[3])?,
        state_after: decode_state(kind, &fields[4])?,
        transaction_ref: fields[5].clone(),
        gas_used: fields[6].parse().with_context(|| format!("bad gas used {:?}", fields[6]))?,
        gas_cost: parse_ether(&fields[7])
            .map_err(|e| anyhow!("bad gas cost {:?}: {e}", fields[7]))?,
        status,
        detail: fields[9].clone(),
    })
}

fn quote(field: &str) -> String {
    let flat = field.replace(['\r', '\n'], " ");
    if flat.contains([',', '"']) {
        format!("\"{}\"", flat.replace('"', "\"\""))
    } else {
        flat
    }
}

fn split_row(line: &str) -> Result<Vec<String>> {
    let mut fields = Vec::with_capacity(COLUMNS);
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                chars.next();
                current.push('"');
            }
            ('"', true) => in_quotes = false,
            ('"', false) if current.is_empty() => in_quotes = true,
            (',', false) => fields.push(std::mem::take(&mut current)),
            (c, _) => current.push(c),
        }
    }
    if in_quotes {
        bail!("unterminated quoted field");
    }
    fields.push(current);
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(kind: ActionKind, status: ActionStatus, detail: &str) -> ActionRecord {
        ActionRecord {
            timestamp: DateTime::from_timestamp(1_700_000_000, 123_000_000).unwrap(),
            kind,
            amount: parse_ether("2.5").unwrap(),
            state_before: parse_ether("100").unwrap(),
            state_after: parse_ether("102.5").unwrap(),
            transaction_ref: "0xaa;0xbb".to_string(),
            gas_used: 210_000,
            gas_cost: U256::from(2_100_000_000_000_000u64),
            status,
            detail: detail.to_string(),
        }
    }

    #[test]
    fn test_append_and_load() {
        let dir = TempDir::new().unwrap();
        let ledger = ActionLedger::new(dir.path().join("data").join("history.csv"));

        let first = record(ActionKind::Restake, ActionStatus::Success, "Restaked");
        let second =
            record(ActionKind::Restake, ActionStatus::Error, "rpc said \"no\", twice\nthen hung");
        assert!(ledger.append(&first).unwrap());
        assert!(ledger.append(&second).unwrap());

        let content = fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(content.lines().next(), Some(HEADER));
        assert_eq!(content.lines().count(), 3);

        let loaded = ledger.load_all().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], first);
        assert_eq!(loaded[1].detail, "rpc said \"no\", twice then hung");
    }

    #[test]
    fn test_skipped_not_persisted() {
        let dir = TempDir::new().unwrap();
        let ledger = ActionLedger::new(dir.path().join("history.csv"));

        let skipped = record(ActionKind::Restake, ActionStatus::Skipped, "below threshold");
        assert!(!ledger.append(&skipped).unwrap());
        assert!(!ledger.path().exists());
        assert!(ledger.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_lock_states_stored_as_unix_seconds() {
        let dir = TempDir::new().unwrap();
        let ledger = ActionLedger::new(dir.path().join("history.csv"));

        let mut extend = record(ActionKind::LockExtend, ActionStatus::Success, "Lock extended");
        extend.amount = U256::ZERO;
        extend.state_before = U256::from(1_800_000_000u64);
        extend.state_after = U256::from(1_826_000_000u64);
        ledger.append(&extend).unwrap();

        let content = fs::read_to_string(ledger.path()).unwrap();
        assert!(content.contains(",1800000000,1826000000,"));
        assert_eq!(ledger.last(Some(ActionKind::LockExtend)).unwrap(), Some(extend));
        assert_eq!(ledger.last(Some(ActionKind::Restake)).unwrap(), None);
    }

    #[test]
    fn test_malformed_rows_skipped() {
        let dir = TempDir::new().unwrap();
        let ledger = ActionLedger::new(dir.path().join("history.csv"));
        let noop = record(ActionKind::Restake, ActionStatus::NoOp, "nothing realized");
        ledger.append(&noop).unwrap();

        let mut file = OpenOptions::new().append(true).open(ledger.path()).unwrap();
        writeln!(file, "garbage,row").unwrap();

        assert_eq!(ledger.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_split_row_quotes() {
        assert_eq!(split_row(r#"a,"b,c","d""e",f"#).unwrap(), vec!["a", "b,c", "d\"e", "f"]);
        assert!(split_row(r#"a,"b"#).is_err());
    }
}
