//! Ethereum HTTP client implementing the chain ports

use crate::{
    config::ContractAddresses,
    error::ChainError,
    ports::{ChainQuery, Confirmation, ContractCall, TransactionPort, TransactionRef},
    types::{EpochState, LockInfo},
};
use alloy_network::Ethereum;
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_provider::{Provider, ProviderBuilder, RootProvider};
use alloy_rpc_types::TransactionRequest;
use alloy_sol_macro::sol;
use alloy_sol_types::SolCall;
use anyhow::{Context as AnyhowContext, Result};
use async_trait::async_trait;
use reqwest::ClientBuilder;
use std::{sync::Arc, time::Instant};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};
use url::Url;

sol! {
    interface IStaking {
        function createStake() external payable;
        function addRewardToStake(address user) external;
        function showPendingReward(address account) external view returns (uint256);
        function getStake(address user) external view returns (uint256);
        function rewards(address account) external view returns (uint256);
    }

    interface IVotingEscrow {
        function MAXTIME() external view returns (uint256);
        function locked(address addr) external view returns (uint256);
        function lockEnd(address addr) external view returns (uint256);
        function increaseUnlockTime(uint256 newUnlockTime) external;
    }

    interface IRewardDistributor {
        function currentEpoch() external view returns (uint256);
        function userLastClaimedEpoch(address user) external view returns (uint256);
    }
}

/// Provider performance metrics
#[derive(Debug, Default, Clone)]
pub struct ProviderMetrics {
    /// Number of requests sent
    pub requests_sent: u64,
    /// Number of successful requests
    pub requests_succeeded: u64,
    /// Number of failed requests
    pub requests_failed: u64,
    /// Total latency time (milliseconds)
    pub total_latency_ms: u64,
}

impl ProviderMetrics {
    /// Average latency in milliseconds, 0 before the first request
    pub fn average_latency_ms(&self) -> f64 {
        if self.requests_sent > 0 {
            self.total_latency_ms as f64 / self.requests_sent as f64
        } else {
            0.0
        }
    }
}

/// Retry configuration for read requests. Submissions are never retried.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries
    pub max_retries: usize,
    /// Base delay time
    pub base_delay: Duration,
    /// Maximum delay time
    pub max_delay: Duration,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

/// Alloy backed adapter for the staking, escrow and distributor contracts.
///
/// Transactions are signed by the node through `eth_sendTransaction`; the wallet must be
/// unlocked on the RPC endpoint.
#[derive(Clone, Debug)]
pub struct EthHttpCli {
    provider: RootProvider<Ethereum>,
    contracts: ContractAddresses,
    metrics: Arc<tokio::sync::Mutex<ProviderMetrics>>,
    retry_config: RetryConfig,
    receipt_poll_interval: Duration,
}

impl EthHttpCli {
    /// Creates a client for `rpc_url` talking to `contracts`
    ///
    /// # Errors
    /// * Returns an error if the URL cannot be parsed or client cannot be built
    pub fn new(rpc_url: &str, contracts: ContractAddresses) -> Result<Self> {
        debug!(target: "eth_client", "Creating EthHttpCli for URL: {}", rpc_url);

        let url =
            Url::parse(rpc_url).with_context(|| format!("Failed to parse RPC URL: {}", rpc_url))?;

        let client_builder = ClientBuilder::new().no_proxy().use_rustls_tls();
        let client = client_builder.build().with_context(|| "Failed to build HTTP client")?;

        let provider: RootProvider<Ethereum> =
            ProviderBuilder::default().connect_reqwest(client, url);

        Ok(Self {
            provider,
            contracts,
            metrics: Arc::new(tokio::sync::Mutex::new(ProviderMetrics::default())),
            retry_config: RetryConfig::default(),
            receipt_poll_interval: Duration::from_secs(2),
        })
    }

    fn staking(&self) -> Result<Address, ChainError> {
        self.contracts.staking.ok_or(ChainError::MissingContract("staking"))
    }

    fn voting_escrow(&self) -> Result<Address, ChainError> {
        self.contracts.voting_escrow.ok_or(ChainError::MissingContract("voting escrow"))
    }

    fn reward_distributor(&self) -> Result<Address, ChainError> {
        self.contracts.reward_distributor.ok_or(ChainError::MissingContract("reward distributor"))
    }

    /// Executes a read-only contract call and decodes its single return value
    async fn view<C>(&self, to: Address, call: C) -> Result<C::Return, ChainError>
    where
        C: SolCall + Send,
        C::Return: Send,
    {
        let input = Bytes::from(call.abi_encode());
        let start = Instant::now();

        let result = self
            .retry_with_backoff(|| async {
                let tx = TransactionRequest::default().to(to).input(input.clone().into());
                self.provider.call(tx).await
            })
            .await;

        self.update_metrics(result.is_ok(), start.elapsed()).await;

        let data = result?;
        C::abi_decode_returns(&data)
            .map_err(|e| ChainError::Decode(format!("{}: {e}", C::SIGNATURE)))
    }

    /// Builds the unsigned request for `call`
    fn request(&self, call: &ContractCall) -> Result<TransactionRequest, ChainError> {
        let (to, input): (Address, Vec<u8>) = match *call {
            ContractCall::RealizeReward { .. } => {
                (self.staking()?, IStaking::createStakeCall {}.abi_encode())
            }
            ContractCall::CompoundReward { from } => {
                (self.staking()?, IStaking::addRewardToStakeCall { user: from }.abi_encode())
            }
            ContractCall::ExtendLock { unlock_time, .. } => (
                self.voting_escrow()?,
                IVotingEscrow::increaseUnlockTimeCall { newUnlockTime: U256::from(unlock_time) }
                    .abi_encode(),
            ),
        };
        Ok(TransactionRequest::default()
            .from(call.from())
            .to(to)
            .input(Bytes::from(input).into())
            .value(U256::ZERO))
    }

    /// Retries an operation with exponential backoff
    ///
    /// # Errors
    /// * Returns [`ChainError::Connectivity`] if all retry attempts fail
    async fn retry_with_backoff<F, Fut, T>(&self, mut operation: F) -> Result<T, ChainError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, alloy_transport::TransportError>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.retry_config.max_retries {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(
                            target: "eth_client",
                            "Operation succeeded on attempt {}",
                            attempt + 1
                        );
                    }
                    return Ok(result);
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.retry_config.max_retries {
                        let delay = std::cmp::min(
                            Duration::from_millis(
                                (self.retry_config.base_delay.as_millis() as f64 *
                                    self.retry_config.backoff_multiplier.powi(attempt as i32))
                                    as u64,
                            ),
                            self.retry_config.max_delay,
                        );
                        warn!(
                            target: "eth_client",
                            "Operation failed on attempt {}, retrying in {:?}: {:?}",
                            attempt + 1,
                            delay,
                            last_error
                        );
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(ChainError::Connectivity(format!(
            "failed after {} attempts: {}",
            self.retry_config.max_retries + 1,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn update_metrics(&self, success: bool, latency: Duration) {
        let mut metrics = self.metrics.lock().await;
        metrics.requests_sent += 1;

        if success {
            metrics.requests_succeeded += 1;
        } else {
            metrics.requests_failed += 1;
        }

        // Ensure at least 1ms latency is recorded to avoid 0 latency in very fast environments
        let latency_ms = std::cmp::max(1, latency.as_millis() as u64);
        metrics.total_latency_ms += latency_ms;
    }

    /// Gets a copy of the current performance metrics
    pub async fn get_metrics(&self) -> ProviderMetrics {
        self.metrics.lock().await.clone()
    }
}

fn to_u64(field: &str, value: U256) -> Result<u64, ChainError> {
    u64::try_from(value).map_err(|_| ChainError::Decode(format!("{field} out of range: {value}")))
}

#[async_trait]
impl ChainQuery for EthHttpCli {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        let start = Instant::now();
        let result = self.retry_with_backoff(|| async { self.provider.get_chain_id().await }).await;
        self.update_metrics(result.is_ok(), start.elapsed()).await;
        result
    }

    async fn pending_reward(&self, wallet: Address) -> Result<U256, ChainError> {
        self.view(self.staking()?, IStaking::showPendingRewardCall { account: wallet }).await
    }

    async fn realized_reward(&self, wallet: Address) -> Result<U256, ChainError> {
        self.view(self.staking()?, IStaking::rewardsCall { account: wallet }).await
    }

    async fn stake(&self, wallet: Address) -> Result<U256, ChainError> {
        self.view(self.staking()?, IStaking::getStakeCall { user: wallet }).await
    }

    async fn lock_status(&self, wallet: Address) -> Result<LockInfo, ChainError> {
        let escrow = self.voting_escrow()?;
        let locked = self.view(escrow, IVotingEscrow::lockedCall { addr: wallet }).await?;
        let lock_end = self.view(escrow, IVotingEscrow::lockEndCall { addr: wallet }).await?;
        let max_duration = self.view(escrow, IVotingEscrow::MAXTIMECall {}).await?;
        Ok(LockInfo {
            locked,
            lock_end: to_u64("lockEnd", lock_end)?,
            max_duration: to_u64("MAXTIME", max_duration)?,
        })
    }

    async fn epoch_state(&self, wallet: Address) -> Result<EpochState, ChainError> {
        let distributor = self.reward_distributor()?;
        let current = self.view(distributor, IRewardDistributor::currentEpochCall {}).await?;
        let claimed = self
            .view(distributor, IRewardDistributor::userLastClaimedEpochCall { user: wallet })
            .await?;
        Ok(EpochState {
            current_epoch: to_u64("currentEpoch", current)?,
            user_last_claimed_epoch: to_u64("userLastClaimedEpoch", claimed)?,
        })
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        let start = Instant::now();
        let result =
            self.retry_with_backoff(|| async { self.provider.get_gas_price().await }).await;
        self.update_metrics(result.is_ok(), start.elapsed()).await;
        result
    }

    async fn nonce(&self, wallet: Address) -> Result<u64, ChainError> {
        let start = Instant::now();
        let result = self
            .retry_with_backoff(|| async { self.provider.get_transaction_count(wallet).await })
            .await;
        self.update_metrics(result.is_ok(), start.elapsed()).await;
        result
    }
}

#[async_trait]
impl TransactionPort for EthHttpCli {
    async fn estimate_gas(&self, call: &ContractCall, nonce: u64) -> Result<u64, ChainError> {
        let tx = self.request(call)?.nonce(nonce);
        let start = Instant::now();
        let result = self.provider.estimate_gas(tx).await;
        self.update_metrics(result.is_ok(), start.elapsed()).await;
        result.map_err(|e| ChainError::GasEstimation(format!("{}: {e}", call.name())))
    }

    async fn submit(
        &self,
        call: &ContractCall,
        nonce: u64,
        gas_limit: u64,
        gas_price: u128,
    ) -> Result<TransactionRef, ChainError> {
        let tx = self.request(call)?.nonce(nonce).gas_limit(gas_limit).gas_price(gas_price);
        let start = Instant::now();
        let result = self.provider.send_transaction(tx).await;
        self.update_metrics(result.is_ok(), start.elapsed()).await;

        let pending = result.map_err(|e| {
            ChainError::Connectivity(format!("failed to submit {}: {e}", call.name()))
        })?;
        let hash = *pending.tx_hash();
        info!(
            target: "eth_client",
            call = call.name(),
            %hash,
            nonce,
            gas_limit,
            "Submitted transaction"
        );
        Ok(TransactionRef(hash.to_string()))
    }

    async fn wait_for_confirmation(
        &self,
        tx: &TransactionRef,
        timeout: Duration,
    ) -> Result<Confirmation, ChainError> {
        let hash: B256 =
            tx.0.parse().map_err(|_| ChainError::Decode(format!("bad transaction hash {tx}")))?;

        let poll = async {
            loop {
                match self.provider.get_transaction_receipt(hash).await {
                    Ok(Some(receipt)) => {
                        return Confirmation {
                            success: receipt.status(),
                            gas_used: receipt.gas_used,
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        debug!(target: "eth_client", %hash, error = %e, "Receipt poll failed")
                    }
                }
                sleep(self.receipt_poll_interval).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| ChainError::ConfirmationTimeout { tx: tx.0.clone(), timeout })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> EthHttpCli {
        EthHttpCli::new(
            "http://127.0.0.1:8545",
            ContractAddresses {
                staking: Some(Address::repeat_byte(0x11)),
                voting_escrow: None,
                reward_distributor: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_bad_url() {
        assert!(EthHttpCli::new("not a url", ContractAddresses::default()).is_err());
    }

    #[test]
    fn test_realize_request_is_zero_value_create_stake() {
        let from = Address::repeat_byte(0x22);
        let tx = client().request(&ContractCall::RealizeReward { from }).unwrap();

        assert_eq!(tx.from, Some(from));
        assert_eq!(tx.value, Some(U256::ZERO));
        let input = tx.input.input().unwrap();
        assert_eq!(&input[..4], IStaking::createStakeCall::SELECTOR.as_slice());
    }

    #[test]
    fn test_missing_contract() {
        let call = ContractCall::ExtendLock { from: Address::ZERO, unlock_time: 1 };
        assert_eq!(
            client().request(&call).unwrap_err(),
            ChainError::MissingContract("voting escrow")
        );
    }

    #[test]
    fn test_average_latency() {
        let metrics = ProviderMetrics {
            requests_sent: 4,
            requests_succeeded: 4,
            requests_failed: 0,
            total_latency_ms: 10,
        };
        assert_eq!(metrics.average_latency_ms(), 2.5);
        assert_eq!(ProviderMetrics::default().average_latency_ms(), 0.0);
    }
}
