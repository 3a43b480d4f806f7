//! clap [Parser](clap::Parser) and command dispatch

use alloy_primitives::utils::format_ether;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use restaker::{
    ports::TracingNotifier, ActionJob, ActionKind, ActionLedger, ActionMachine, ActionSettings,
    ChainQuery, Clock, EpochJob, EpochWatcher, EthHttpCli, LedgerStats, NotificationSink,
    RestakerConfig, RunQueue, ScheduledJob, Scheduler, SystemClock, WatermarkStore,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::info;

/// Restakes rewards, keeps the lock at its maximum and watches vesting epochs for one wallet.
#[derive(Debug, Parser)]
#[command(name = "restaker", version, about)]
pub(crate) struct Cli {
    /// Path of the TOML config file
    #[arg(long, short, env = "RESTAKER_CONFIG", default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Estimate and record, never submit
    #[arg(long, global = true)]
    dry_run: bool,

    /// Directory for the ledger and watermark files, overriding the config
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Commands {
    /// Run every enabled job on its schedule until Ctrl-C (default)
    Run,
    /// Restake once now
    Restake,
    /// Extend the lock once now
    Extend,
    /// Check vesting epochs once now
    Vesting,
    /// Print on-chain position and the last recorded action
    Status,
    /// Print ledger statistics
    Stats,
}

impl Cli {
    pub(crate) async fn run(self) -> Result<()> {
        let mut config = RestakerConfig::load(&self.config)?;
        config.dry_run |= self.dry_run;
        if let Some(dir) = &self.data_dir {
            config.storage.ledger_file = relocate(dir, &config.storage.ledger_file);
            config.storage.watermark_file = relocate(dir, &config.storage.watermark_file);
        }

        let app = App::new(config)?;
        match self.command.unwrap_or(Commands::Run) {
            Commands::Run => app.run_daemon().await,
            Commands::Restake => app.run_once(ActionKind::Restake).await,
            Commands::Extend => app.run_once(ActionKind::LockExtend).await,
            Commands::Vesting => app.check_vesting().await,
            Commands::Status => app.print_status().await,
            Commands::Stats => app.print_stats(),
        }
    }
}

fn relocate(dir: &Path, file: &Path) -> PathBuf {
    match file.file_name() {
        Some(name) => dir.join(name),
        None => dir.to_path_buf(),
    }
}

struct App {
    config: RestakerConfig,
    client: Arc<EthHttpCli>,
    clock: Arc<dyn Clock>,
    ledger: Arc<ActionLedger>,
    sink: Arc<dyn NotificationSink>,
}

impl App {
    fn new(config: RestakerConfig) -> Result<Self> {
        let client = Arc::new(EthHttpCli::new(&config.network.rpc_url, config.contracts)?);
        info!(
            target: "restaker",
            rpc_url = %config.network.rpc_url,
            chain_id = config.network.chain_id,
            wallet = %config.wallet,
            dry_run = config.dry_run,
            "restaker configured"
        );
        Ok(Self {
            ledger: Arc::new(ActionLedger::new(config.storage.ledger_file.clone())),
            client,
            clock: Arc::new(SystemClock),
            sink: Arc::new(TracingNotifier),
            config,
        })
    }

    fn machine(&self) -> ActionMachine {
        ActionMachine::new(
            self.client.clone(),
            self.client.clone(),
            self.clock.clone(),
            ActionSettings::from(&self.config),
        )
    }

    fn action_job(&self, kind: ActionKind) -> ActionJob {
        ActionJob::new(self.machine(), kind, self.ledger.clone(), self.sink.clone())
            .with_explorer(self.config.network.explorer.clone())
    }

    fn epoch_job(&self) -> EpochJob {
        let watcher = EpochWatcher::new(
            self.client.clone(),
            Arc::new(WatermarkStore::open(self.config.storage.watermark_file.clone())),
            self.clock.clone(),
            self.config.wallet,
        );
        EpochJob::new(watcher, self.sink.clone())
    }

    async fn run_daemon(&self) -> Result<()> {
        // restake and lock extension share the wallet nonce, so they take turns
        let action_queue = Arc::new(RunQueue::default());
        let mut action_schedulers = Vec::new();
        for (kind, schedule) in [
            (ActionKind::Restake, self.config.restake),
            (ActionKind::LockExtend, self.config.lock_extend),
        ] {
            if schedule.enabled {
                let scheduler = Scheduler::serialized(
                    self.action_job(kind),
                    self.clock.clone(),
                    action_queue.clone(),
                );
                scheduler.start(schedule.interval);
                action_schedulers.push(scheduler);
            }
        }

        let vesting = self.config.vesting.enabled.then(|| {
            let scheduler = Scheduler::new(self.epoch_job(), self.clock.clone());
            scheduler.start(self.config.vesting.interval);
            scheduler
        });

        if action_schedulers.is_empty() && vesting.is_none() {
            bail!("no job enabled; enable restake, lock_extend or vesting in the config");
        }

        tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
        info!(target: "restaker", "Shutdown requested, stopping schedulers");
        action_schedulers.iter().for_each(Scheduler::stop);
        if let Some(vesting) = &vesting {
            vesting.stop();
        }

        // in-flight runs are never aborted
        while action_schedulers.iter().any(Scheduler::is_busy) ||
            vesting.as_ref().is_some_and(Scheduler::is_busy)
        {
            info!(target: "restaker", "Waiting for the in-flight run to finish");
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        Ok(())
    }

    async fn run_once(&self, kind: ActionKind) -> Result<()> {
        let record = self.action_job(kind).run().await;
        println!("{} {}: {}", record.kind, record.status, record.summary());
        if !record.transaction_ref.is_empty() {
            println!("transactions: {}", record.transaction_ref);
        }
        Ok(())
    }

    async fn check_vesting(&self) -> Result<()> {
        match self.epoch_job().run().await {
            Some(notification) => println!("{}: {}", notification.title, notification.message),
            None => println!("No new vesting epoch"),
        }
        Ok(())
    }

    async fn print_status(&self) -> Result<()> {
        let wallet = self.config.wallet;
        let client = &self.client;

        println!("Wallet:         {wallet}");
        println!("Chain id:       {}", client.chain_id().await?);
        println!("Gas price:      {} wei", client.gas_price().await?);

        if self.config.contracts.staking.is_some() {
            println!("Stake:          {}", format_ether(client.stake(wallet).await?));
            println!("Pending reward: {}", format_ether(client.pending_reward(wallet).await?));
            println!("Realized:       {}", format_ether(client.realized_reward(wallet).await?));
        }
        if self.config.contracts.voting_escrow.is_some() {
            let lock = self.machine().lock_status().await?;
            println!("Locked:         {}", format_ether(lock.locked_amount));
            println!("Lock end:       {}", lock.lock_end_time);
            println!("Max reachable:  {}", lock.max_reachable_end_time);
            println!("Extendable by:  {}s", lock.extendable_by);
        }
        if self.config.contracts.reward_distributor.is_some() {
            let epochs = client.epoch_state(wallet).await?;
            println!(
                "Epoch:          {} (claimed {}, {} behind)",
                epochs.current_epoch,
                epochs.user_last_claimed_epoch,
                epochs.epochs_behind()
            );
        }

        match self.ledger.last(None)? {
            Some(last) => println!(
                "Last action:    {} {} at {}: {}",
                last.kind,
                last.status,
                last.timestamp,
                last.summary()
            ),
            None => println!("Last action:    none"),
        }

        let metrics = client.get_metrics().await;
        info!(
            target: "eth_client",
            sent = metrics.requests_sent,
            failed = metrics.requests_failed,
            avg_latency_ms = metrics.average_latency_ms(),
            "RPC usage"
        );
        Ok(())
    }

    fn print_stats(&self) -> Result<()> {
        let records = self.ledger.load_all()?;
        print!("{}", LedgerStats::compute(&records));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults_to_run() {
        let cli = Cli::try_parse_from(["restaker"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.config, PathBuf::from("config.toml"));
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let args = ["restaker", "restake", "--dry-run", "--data-dir", "/tmp/r"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.command, Some(Commands::Restake));
        assert!(cli.dry_run);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/r")));
    }

    #[test]
    fn test_relocate_keeps_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let moved = relocate(dir.path(), Path::new("data/history.csv"));
        assert_eq!(moved, dir.path().join("history.csv"));
    }
}
