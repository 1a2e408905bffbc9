//! Application state management.

use crate::config::AppConfig;
use meterbot_alerts::{
    AlertGate, AlertPolicy, CommandHandler, GroupStore, Notifier, NotifyError, OneBotConfig,
    OneBotNotifier, StoreError, SweepSummary, Sweeper, SwitchStore,
};
use meterbot_billing::{BalanceSource, BillingClient, BillingConfig, QueryError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("Billing client: {0}")]
    Billing(#[from] QueryError),
    #[error("OneBot client: {0}")]
    Notify(#[from] NotifyError),
}

/// Sweep counters plus uptime.
#[derive(Debug, Clone)]
pub struct StatsSummary {
    pub sweep: SweepSummary,
    pub uptime_secs: u64,
}

/// Application state shared across components.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<GroupStore>,
    pub gate: Arc<AlertGate>,
    pub sweeper: Sweeper,
    pub commands: CommandHandler,
    pub notifier: Arc<dyn Notifier>,
    running: AtomicBool,
    shutdown: Notify,
    started_at: Instant,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire components around the given transport and balance source.
    pub async fn new(
        config: AppConfig,
        source: Arc<dyn BalanceSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, StartupError> {
        let policy = AlertPolicy::from(&config.alerts);
        let store = Arc::new(GroupStore::open(&config.data_dir).await?);
        let switches = Arc::new(SwitchStore::new(&config.switch_file));
        let gate = Arc::new(AlertGate::hydrate(store.clone(), policy.interval).await);

        let sweeper = Sweeper::new(store.clone(), source.clone(), gate.clone(), policy);
        let commands = CommandHandler::new(
            store.clone(),
            switches,
            source,
            notifier.clone(),
            config.owner_ids(),
        );

        Ok(Self {
            config,
            store,
            gate,
            sweeper,
            commands,
            notifier,
            running: AtomicBool::new(true),
            shutdown: Notify::new(),
            started_at: Instant::now(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    /// Resolves once `stop` is called.
    pub async fn stopped(&self) {
        let notified = self.shutdown.notified();
        if !self.is_running() {
            return;
        }
        notified.await;
    }

    pub async fn run_sweep(&self) {
        self.sweeper.run_sweep(self.notifier.as_ref()).await;
    }

    pub fn stats_summary(&self) -> StatsSummary {
        StatsSummary {
            sweep: self.sweeper.stats().summary(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

/// Build state with the HTTP billing client and the OneBot notifier.
pub async fn create_state(config: AppConfig) -> Result<SharedState, StartupError> {
    let source = Arc::new(BillingClient::new(BillingConfig::from(&config.billing))?);
    let notifier = Arc::new(OneBotNotifier::new(OneBotConfig::from(&config.onebot))?);
    Ok(Arc::new(AppState::new(config, source, notifier).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use meterbot_core::{AccountBalance, AccountId, GroupId, UserId};
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use std::time::Duration;

    struct LowBalance;

    #[async_trait]
    impl BalanceSource for LowBalance {
        async fn fetch(&self, account: &AccountId) -> Result<AccountBalance, QueryError> {
            Ok(AccountBalance {
                account_id: account.clone(),
                balance: dec!(5),
                user_number: None,
                user_name: None,
                address: None,
                customer_name: None,
                fetched_at: Utc::now(),
            })
        }
    }

    #[derive(Default)]
    struct Outbox(Mutex<Vec<(String, String)>>);

    #[async_trait]
    impl Notifier for Outbox {
        async fn send_group_message(&self, group: &GroupId, text: &str) -> Result<(), NotifyError> {
            self.0
                .lock()
                .unwrap()
                .push((group.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn test_config(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.data_dir = dir.join("groups");
        config.switch_file = dir.join("switch.json");
        config.alerts.send_pause_ms = 0;
        config.owners = vec!["9".into()];
        config
    }

    #[tokio::test]
    async fn test_state_sweeps_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = Arc::new(Outbox::default());
        let state = AppState::new(test_config(dir.path()), Arc::new(LowBalance), outbox.clone())
            .await
            .unwrap();
        state
            .store
            .bind(&GroupId::from("1001"), &UserId::from("2002"), &AccountId::from("ext-9"))
            .await
            .unwrap();

        state.run_sweep().await;
        state.run_sweep().await;

        assert_eq!(outbox.0.lock().unwrap().len(), 1);
        let summary = state.stats_summary();
        assert_eq!(summary.sweep.sweeps, 2);
        assert_eq!(summary.sweep.alerts_sent, 1);
        assert!(state
            .gate
            .last_alert(&GroupId::from("1001"), &UserId::from("2002"))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_stop_wakes_waiters() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(
            AppState::new(
                test_config(dir.path()),
                Arc::new(LowBalance),
                Arc::new(Outbox::default()),
            )
            .await
            .unwrap(),
        );
        assert!(state.is_running());

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.stopped().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        state.stop();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!state.is_running());
        state.stopped().await;
    }

    #[tokio::test]
    async fn test_create_state_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let state = create_state(test_config(dir.path())).await.unwrap();
        assert!(state.store.list_groups().await.is_empty());
        assert!(dir.path().join("groups").is_dir());
    }
}
