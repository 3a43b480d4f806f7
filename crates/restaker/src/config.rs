//! Configuration
//!
//! The TOML file is deserialized into a loose raw shape and normalized exactly once into
//! [`RestakerConfig`]: intervals become a single [`Duration`], decimal amounts become wei and
//! addresses are parsed. Nothing downstream branches on the raw representation.

use crate::error::ConfigError;
use alloy_primitives::{
    utils::{parse_ether, parse_units},
    Address, U256,
};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;

/// Environment variable overriding `network.rpc_url`
pub const ENV_RPC_URL: &str = "RESTAKER_RPC_URL";
/// Environment variable overriding `wallet.address`
pub const ENV_WALLET: &str = "RESTAKER_WALLET";
/// Environment variable overriding `contracts.staking`
pub const ENV_STAKING_CONTRACT: &str = "RESTAKER_STAKING_CONTRACT";

const HOUR: u64 = 3_600;
const DAY: u64 = 24 * HOUR;
/// Escrow locks round down to week boundaries
pub const DEFAULT_TIME_QUANTUM_SECS: u64 = 7 * DAY;
const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 300;
const DEFAULT_GAS_LIMIT_BUFFER: u64 = 20_000;

/// Normalized configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RestakerConfig {
    /// RPC endpoint and expected chain
    pub network: NetworkConfig,
    /// Managed wallet
    pub wallet: Address,
    /// Protocol contracts
    pub contracts: ContractAddresses,
    /// Restake schedule
    pub restake: Schedule,
    /// Minimum pending reward worth restaking (wei)
    pub min_reward_threshold: U256,
    /// Lock-extend schedule
    pub lock_extend: Schedule,
    /// Lock end times are floored to multiples of this many seconds
    pub time_quantum_secs: u64,
    /// Vesting epoch check schedule
    pub vesting: Schedule,
    /// Gas policy
    pub gas: GasPolicy,
    /// Ledger and watermark locations
    pub storage: StoragePaths,
    /// Simulate submissions
    pub dry_run: bool,
    /// Bound on every confirmation wait
    pub confirmation_timeout: Duration,
}

/// RPC endpoint and chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// HTTP RPC url
    pub rpc_url: String,
    /// Expected chain id
    pub chain_id: u64,
    /// Block explorer base url, for log links
    pub explorer: Option<String>,
}

/// Contract addresses; each is only required by the feature that uses it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContractAddresses {
    /// Staking contract
    pub staking: Option<Address>,
    /// Voting escrow holding the time-lock
    pub voting_escrow: Option<Address>,
    /// Vesting reward distributor
    pub reward_distributor: Option<Address>,
}

/// Whether and how often a job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Job enabled
    pub enabled: bool,
    /// Period between runs
    pub interval: Duration,
}

/// Gas policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasPolicy {
    /// Ceiling above which actions are deferred (wei)
    pub max_gas_price: u128,
    /// Multiplier applied to gas estimates, at least 1
    pub gas_limit_multiplier: f64,
    /// Fixed headroom added after the multiplier
    pub gas_limit_buffer: u64,
}

impl GasPolicy {
    /// Gas limit for an estimate: `floor(estimate * multiplier) + buffer`, saturating at
    /// `u64::MAX`
    pub fn gas_limit(&self, estimate: u64) -> u64 {
        let scaled = (estimate as f64) * self.gas_limit_multiplier;
        (scaled as u64).saturating_add(self.gas_limit_buffer)
    }
}

/// Persistence locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    /// Append-only action ledger
    pub ledger_file: PathBuf,
    /// Vesting watermark
    pub watermark_file: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    network: RawNetwork,
    #[serde(default)]
    wallet: RawWallet,
    #[serde(default)]
    contracts: RawContracts,
    #[serde(default)]
    restake: RawRestake,
    #[serde(default)]
    lock_extend: RawLockExtend,
    #[serde(default)]
    vesting: RawVesting,
    #[serde(default)]
    gas: RawGas,
    #[serde(default)]
    storage: RawStorage,
    #[serde(default)]
    dry_run: bool,
    confirmation_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawNetwork {
    #[serde(default)]
    rpc_url: String,
    chain_id: u64,
    explorer: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawWallet {
    address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawContracts {
    staking: Option<String>,
    voting_escrow: Option<String>,
    reward_distributor: Option<String>,
}

/// Interval in any of the historical units
#[derive(Debug, Default, Deserialize)]
struct RawInterval {
    interval_seconds: Option<u64>,
    interval_hours: Option<u64>,
    interval_days: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRestake {
    enabled: Option<bool>,
    min_reward_threshold: Option<DecimalInput>,
    #[serde(flatten)]
    interval: RawInterval,
}

#[derive(Debug, Default, Deserialize)]
struct RawLockExtend {
    enabled: Option<bool>,
    time_quantum_secs: Option<u64>,
    #[serde(flatten)]
    interval: RawInterval,
}

#[derive(Debug, Default, Deserialize)]
struct RawVesting {
    enabled: Option<bool>,
    #[serde(flatten)]
    interval: RawInterval,
}

#[derive(Debug, Default, Deserialize)]
struct RawGas {
    max_gas_price_gwei: Option<DecimalInput>,
    gas_limit_multiplier: Option<f64>,
    gas_limit_buffer: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStorage {
    data_dir: Option<PathBuf>,
    ledger_file: Option<PathBuf>,
    watermark_file: Option<PathBuf>,
}

/// Decimal accepted either as a string or as a TOML number
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum DecimalInput {
    Text(String),
    Integer(u64),
    Float(f64),
}

impl DecimalInput {
    fn into_text(self) -> String {
        match self {
            Self::Text(s) => s.trim().to_string(),
            Self::Integer(n) => n.to_string(),
            Self::Float(f) => f.to_string(),
        }
    }
}

impl RestakerConfig {
    /// Loads and normalizes the config file, applying environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config = Self::from_toml_str(&content, |key| std::env::var(key).ok())?;
        debug!(target: "config", path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parses and normalizes `content`; `env` resolves override variables
    pub fn from_toml_str(
        content: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content)?;

        let rpc_url = env(ENV_RPC_URL).unwrap_or(raw.network.rpc_url);
        if rpc_url.trim().is_empty() {
            return Err(ConfigError::invalid("network.rpc_url", "missing"));
        }
        url::Url::parse(&rpc_url)
            .map_err(|e| ConfigError::invalid("network.rpc_url", e.to_string()))?;

        let wallet = env(ENV_WALLET)
            .or(raw.wallet.address)
            .ok_or_else(|| ConfigError::invalid("wallet.address", "missing"))?;
        let wallet = parse_address("wallet.address", &wallet)?;

        let contracts = ContractAddresses {
            staking: env(ENV_STAKING_CONTRACT)
                .or(raw.contracts.staking)
                .map(|s| parse_address("contracts.staking", &s))
                .transpose()?,
            voting_escrow: raw
                .contracts
                .voting_escrow
                .map(|s| parse_address("contracts.voting_escrow", &s))
                .transpose()?,
            reward_distributor: raw
                .contracts
                .reward_distributor
                .map(|s| parse_address("contracts.reward_distributor", &s))
                .transpose()?,
        };

        let restake = Schedule {
            enabled: raw.restake.enabled.unwrap_or(true),
            interval: normalize_interval("restake.interval", &raw.restake.interval, HOUR)?,
        };
        let lock_extend = Schedule {
            enabled: raw.lock_extend.enabled.unwrap_or(false),
            interval: normalize_interval("lock_extend.interval", &raw.lock_extend.interval, DAY)?,
        };
        let vesting = Schedule {
            enabled: raw.vesting.enabled.unwrap_or(false),
            interval: normalize_interval("vesting.interval", &raw.vesting.interval, DAY)?,
        };

        if restake.enabled && contracts.staking.is_none() {
            return Err(ConfigError::invalid(
                "contracts.staking",
                "required when restake is enabled",
            ));
        }
        if lock_extend.enabled && contracts.voting_escrow.is_none() {
            return Err(ConfigError::invalid(
                "contracts.voting_escrow",
                "required when lock_extend is enabled",
            ));
        }
        if vesting.enabled && contracts.reward_distributor.is_none() {
            return Err(ConfigError::invalid(
                "contracts.reward_distributor",
                "required when vesting is enabled",
            ));
        }

        let threshold = raw.restake.min_reward_threshold.map(DecimalInput::into_text);
        let min_reward_threshold = parse_ether_amount(
            "restake.min_reward_threshold",
            threshold.as_deref().unwrap_or("0.1"),
        )?;

        let time_quantum_secs =
            raw.lock_extend.time_quantum_secs.unwrap_or(DEFAULT_TIME_QUANTUM_SECS);
        if time_quantum_secs == 0 {
            return Err(ConfigError::invalid("lock_extend.time_quantum_secs", "must be > 0"));
        }

        let gas = GasPolicy {
            max_gas_price: parse_gwei(
                "gas.max_gas_price_gwei",
                raw.gas.max_gas_price_gwei.map(DecimalInput::into_text).as_deref().unwrap_or("50"),
            )?,
            gas_limit_multiplier: raw.gas.gas_limit_multiplier.unwrap_or(1.25),
            gas_limit_buffer: raw.gas.gas_limit_buffer.unwrap_or(DEFAULT_GAS_LIMIT_BUFFER),
        };
        if !gas.gas_limit_multiplier.is_finite() || gas.gas_limit_multiplier < 1.0 {
            return Err(ConfigError::invalid("gas.gas_limit_multiplier", "must be >= 1"));
        }

        let data_dir = raw.storage.data_dir.unwrap_or_else(|| PathBuf::from("data"));
        let storage = StoragePaths {
            ledger_file: raw.storage.ledger_file.unwrap_or_else(|| data_dir.join("history.csv")),
            watermark_file: raw
                .storage
                .watermark_file
                .unwrap_or_else(|| data_dir.join("vesting_watermark.json")),
        };

        let confirmation_timeout = Duration::from_secs(
            raw.confirmation_timeout_secs.unwrap_or(DEFAULT_CONFIRMATION_TIMEOUT_SECS),
        );
        if confirmation_timeout.is_zero() {
            return Err(ConfigError::invalid("confirmation_timeout_secs", "must be > 0"));
        }

        Ok(Self {
            network: NetworkConfig {
                rpc_url,
                chain_id: raw.network.chain_id,
                explorer: raw.network.explorer,
            },
            wallet,
            contracts,
            restake,
            min_reward_threshold,
            lock_extend,
            time_quantum_secs,
            vesting,
            gas,
            storage,
            dry_run: raw.dry_run,
            confirmation_timeout,
        })
    }
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, ConfigError> {
    value.trim().parse::<Address>().map_err(|e| ConfigError::invalid(field, e.to_string()))
}

fn parse_ether_amount(field: &'static str, value: &str) -> Result<U256, ConfigError> {
    if value.starts_with('-') {
        return Err(ConfigError::invalid(field, "must not be negative"));
    }
    parse_ether(value).map_err(|e| ConfigError::invalid(field, e.to_string()))
}

fn parse_gwei(field: &'static str, value: &str) -> Result<u128, ConfigError> {
    if value.starts_with('-') {
        return Err(ConfigError::invalid(field, "must not be negative"));
    }
    let wei: U256 =
        parse_units(value, "gwei").map_err(|e| ConfigError::invalid(field, e.to_string()))?.into();
    u128::try_from(wei).map_err(|_| ConfigError::invalid(field, "out of range"))
}

fn normalize_interval(
    field: &'static str,
    raw: &RawInterval,
    default_secs: u64,
) -> Result<Duration, ConfigError> {
    let candidates = [
        raw.interval_seconds,
        raw.interval_hours.map(|h| h.saturating_mul(HOUR)),
        raw.interval_days.map(|d| d.saturating_mul(DAY)),
    ];
    let mut given = candidates.into_iter().flatten();
    let secs = match (given.next(), given.next()) {
        (None, _) => default_secs,
        (Some(secs), None) => secs,
        (Some(_), Some(_)) => {
            return Err(ConfigError::invalid(field, "set only one of seconds, hours or days"))
        }
    };
    if secs == 0 {
        return Err(ConfigError::invalid(field, "must be > 0"));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const MINIMAL: &str = r#"
        [network]
        rpc_url = "https://rpc.example.com"
        chain_id = 613419

        [wallet]
        address = "0x85830f211C5534eABAFd83b346eb61128a6995c9"

        [contracts]
        staking = "0x90B07E15Cfb173726de904ca548dd96f73c12428"
    "#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let config = RestakerConfig::from_toml_str(MINIMAL, no_env).unwrap();
        assert_eq!(config.network.chain_id, 613419);
        assert!(config.restake.enabled);
        assert_eq!(config.restake.interval, Duration::from_secs(3600));
        assert!(!config.lock_extend.enabled);
        assert_eq!(config.min_reward_threshold, parse_ether("0.1").unwrap());
        assert_eq!(config.gas.max_gas_price, 50_000_000_000);
        assert_eq!(config.confirmation_timeout, Duration::from_secs(300));
        assert_eq!(config.storage.ledger_file, PathBuf::from("data/history.csv"));
        assert!(!config.dry_run);
    }

    #[test]
    fn test_interval_units_normalize() {
        let content =
            format!("{MINIMAL}\n[restake]\ninterval_hours = 6\n[vesting]\ninterval_days = 1\n");
        let config = RestakerConfig::from_toml_str(&content, no_env).unwrap();
        assert_eq!(config.restake.interval, Duration::from_secs(6 * 3600));
        assert_eq!(config.vesting.interval, Duration::from_secs(86_400));

        let content = format!("{MINIMAL}\n[restake]\ninterval_seconds = 90\n");
        let config = RestakerConfig::from_toml_str(&content, no_env).unwrap();
        assert_eq!(config.restake.interval, Duration::from_secs(90));
    }

    #[test]
    fn test_conflicting_interval_units_rejected() {
        let content = format!("{MINIMAL}\n[restake]\ninterval_hours = 6\ninterval_days = 1\n");
        let err = RestakerConfig::from_toml_str(&content, no_env).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { field: "restake.interval", .. });
    }

    #[test]
    fn test_zero_interval_rejected() {
        let content = format!("{MINIMAL}\n[restake]\ninterval_seconds = 0\n");
        assert!(RestakerConfig::from_toml_str(&content, no_env).is_err());
    }

    #[test]
    fn test_decimals_as_string_or_number() {
        let content = format!(
            "{MINIMAL}\n[restake]\nmin_reward_threshold = \"0.25\"\n\
             [gas]\nmax_gas_price_gwei = 12.5\n"
        );
        let config = RestakerConfig::from_toml_str(&content, no_env).unwrap();
        assert_eq!(config.min_reward_threshold, parse_ether("0.25").unwrap());
        assert_eq!(config.gas.max_gas_price, 12_500_000_000);
    }

    #[test]
    fn test_multiplier_below_one_rejected() {
        let content = format!("{MINIMAL}\n[gas]\ngas_limit_multiplier = 0.9\n");
        let err = RestakerConfig::from_toml_str(&content, no_env).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { field: "gas.gas_limit_multiplier", .. });
    }

    #[test]
    fn test_bad_contract_address_rejected() {
        let content = MINIMAL.replace("0x90B07E15Cfb173726de904ca548dd96f73c12428", "0x1234");
        let err = RestakerConfig::from_toml_str(&content, no_env).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { field: "contracts.staking", .. });
    }

    #[test]
    fn test_enabled_feature_requires_contract() {
        let content = format!("{MINIMAL}\n[lock_extend]\nenabled = true\n");
        let err = RestakerConfig::from_toml_str(&content, no_env).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { field: "contracts.voting_escrow", .. });
    }

    #[test]
    fn test_env_overrides() {
        let env = |key: &str| match key {
            ENV_RPC_URL => Some("http://localhost:8545".to_string()),
            _ => None,
        };
        let config = RestakerConfig::from_toml_str(MINIMAL, env).unwrap();
        assert_eq!(config.network.rpc_url, "http://localhost:8545");
    }

    #[test]
    fn test_example_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config.example.toml");
        let content = fs::read_to_string(path).unwrap();
        let config = RestakerConfig::from_toml_str(&content, no_env).unwrap();
        assert_eq!(config.restake.interval, Duration::from_secs(3600));
        assert_eq!(config.lock_extend.interval, Duration::from_secs(86_400));
        assert_eq!(config.storage.watermark_file, PathBuf::from("data/vesting_watermark.json"));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = RestakerConfig::load(Path::new("/nonexistent/restaker.toml")).unwrap_err();
        assert_matches!(err, ConfigError::Read { .. });
    }

    #[test]
    fn test_gas_limit_policy() {
        let policy =
            GasPolicy { max_gas_price: 0, gas_limit_multiplier: 1.25, gas_limit_buffer: 20_000 };
        assert_eq!(policy.gas_limit(100_000), 145_000);
        assert_eq!(policy.gas_limit(u64::MAX), u64::MAX);
        assert_eq!(policy.gas_limit(u64::MAX - 10_000), u64::MAX);
    }
}
