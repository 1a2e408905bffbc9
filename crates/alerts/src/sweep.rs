//! The balance sweep.
//!
//! One pass over every binding of every group, strictly sequential: one
//! lookup in flight at a time and a fixed pause after each notification.
//! Failures are per binding; a sweep never stops early.

use crate::config::AlertPolicy;
use crate::gate::AlertGate;
use crate::notifier::{format_low_balance_message, Notifier, NotifyError};
use crate::store::{GroupStore, StoreError};
use chrono::{DateTime, Utc};
use meterbot_billing::{BalanceSource, QueryError};
use meterbot_core::{AccountId, BalanceSnapshot, GroupId, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Why one binding produced no alert this sweep.
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Balance lookup failed: {0}")]
    Fetch(#[from] QueryError),
    #[error("Alert state could not be stored: {0}")]
    Store(#[from] StoreError),
    #[error("Notification failed: {0}")]
    Notify(#[from] NotifyError),
}

/// What happened to one binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    AboveThreshold,
    Suppressed,
    Alerted,
}

/// Counters across all sweeps since startup.
#[derive(Debug, Default)]
pub struct SweepStats {
    pub sweeps: AtomicU64,
    pub bindings_checked: AtomicU64,
    pub alerts_sent: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub other_failures: AtomicU64,
}

impl SweepStats {
    pub fn summary(&self) -> SweepSummary {
        SweepSummary {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            bindings_checked: self.bindings_checked.load(Ordering::Relaxed),
            alerts_sent: self.alerts_sent.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            other_failures: self.other_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub sweeps: u64,
    pub bindings_checked: u64,
    pub alerts_sent: u64,
    pub fetch_failures: u64,
    pub other_failures: u64,
}

pub struct Sweeper {
    store: Arc<GroupStore>,
    source: Arc<dyn BalanceSource>,
    gate: Arc<AlertGate>,
    policy: AlertPolicy,
    stats: SweepStats,
}

impl Sweeper {
    pub fn new(
        store: Arc<GroupStore>,
        source: Arc<dyn BalanceSource>,
        gate: Arc<AlertGate>,
        policy: AlertPolicy,
    ) -> Self {
        Self {
            store,
            source,
            gate,
            policy,
            stats: SweepStats::default(),
        }
    }

    pub fn stats(&self) -> &SweepStats {
        &self.stats
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    /// Run one sweep now.
    pub async fn run_sweep(&self, notifier: &dyn Notifier) {
        self.run_sweep_at(notifier, Utc::now()).await
    }

    /// Run one sweep, treating `now` as the time of every alert decision.
    pub async fn run_sweep_at(&self, notifier: &dyn Notifier, now: DateTime<Utc>) {
        let before = self.stats.summary();
        let groups = self.store.list_groups().await;
        debug!(groups = groups.len(), "Sweep started");

        for group in &groups {
            for (user, account) in self.store.all_bindings(group).await {
                self.stats.bindings_checked.fetch_add(1, Ordering::Relaxed);

                match self.check_binding(notifier, group, &user, &account, now).await {
                    Ok(Outcome::Alerted) => {
                        self.stats.alerts_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(_) => {}
                    Err(SweepError::Fetch(e)) => {
                        self.stats.fetch_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            group = %group,
                            user = %user,
                            transient = e.is_transient(),
                            error = %e,
                            "Skipping binding: balance lookup failed"
                        );
                    }
                    Err(e) => {
                        self.stats.other_failures.fetch_add(1, Ordering::Relaxed);
                        error!(group = %group, user = %user, error = %e, "Skipping binding");
                    }
                }
            }
        }

        self.stats.sweeps.fetch_add(1, Ordering::Relaxed);
        let after = self.stats.summary();
        info!(
            groups = groups.len(),
            checked = after.bindings_checked - before.bindings_checked,
            alerts = after.alerts_sent - before.alerts_sent,
            fetch_failures = after.fetch_failures - before.fetch_failures,
            "Sweep finished"
        );
    }

    async fn check_binding(
        &self,
        notifier: &dyn Notifier,
        group: &GroupId,
        user: &UserId,
        account: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<Outcome, SweepError> {
        let lookup = self.source.fetch(account).await?;
        let snapshot = BalanceSnapshot::new(user.clone(), &lookup);

        if !snapshot.is_below(self.policy.threshold) {
            return Ok(Outcome::AboveThreshold);
        }
        if !self.gate.should_alert(group, user, now).await? {
            return Ok(Outcome::Suppressed);
        }

        let text = format_low_balance_message(user, snapshot.balance, self.policy.threshold);
        let sent = notifier.send_group_message(group, &text).await;
        if !self.policy.send_pause.is_zero() {
            tokio::time::sleep(self.policy.send_pause).await;
        }
        sent?;

        info!(group = %group, user = %user, balance = %snapshot.balance, "Low balance alert sent");
        Ok(Outcome::Alerted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone};
    use meterbot_core::AccountBalance;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Balances keyed by account; unknown accounts are not found.
    #[derive(Default)]
    struct FakeBilling {
        balances: Mutex<HashMap<String, Result<Decimal, fn() -> QueryError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeBilling {
        fn with(self, account: &str, balance: Decimal) -> Self {
            self.balances
                .lock()
                .unwrap()
                .insert(account.to_string(), Ok(balance));
            self
        }

        fn failing(self, account: &str, err: fn() -> QueryError) -> Self {
            self.balances
                .lock()
                .unwrap()
                .insert(account.to_string(), Err(err));
            self
        }
    }

    #[async_trait]
    impl BalanceSource for FakeBilling {
        async fn fetch(&self, account: &AccountId) -> Result<AccountBalance, QueryError> {
            self.calls.lock().unwrap().push(account.to_string());
            let balance = match self.balances.lock().unwrap().get(account.as_str()) {
                Some(Ok(balance)) => *balance,
                Some(Err(err)) => return Err(err()),
                None => return Err(QueryError::NotFound),
            };
            Ok(AccountBalance {
                account_id: account.clone(),
                balance,
                user_number: None,
                user_name: None,
                address: None,
                customer_name: None,
                fetched_at: Utc::now(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_group_message(&self, group: &GroupId, text: &str) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .unwrap()
                .push((group.to_string(), text.to_string()));
            if self.fail {
                return Err(NotifyError::Rejected {
                    status: "failed".into(),
                    retcode: 100,
                    message: "muted".into(),
                });
            }
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<GroupStore>,
        billing: Arc<FakeBilling>,
        sweeper: Sweeper,
    }

    async fn fixture(billing: FakeBilling, bindings: &[(&str, &str, &str)]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(GroupStore::open(dir.path()).await.unwrap());
        for (group, user, account) in bindings {
            store
                .bind(&GroupId::from(*group), &UserId::from(*user), &AccountId::from(*account))
                .await
                .unwrap();
        }

        let policy = AlertPolicy::default().with_send_pause(Duration::ZERO);
        let gate = Arc::new(AlertGate::hydrate(store.clone(), policy.interval).await);
        let billing = Arc::new(billing);
        let sweeper = Sweeper::new(store.clone(), billing.clone(), gate, policy);
        Fixture {
            _dir: dir,
            store,
            billing,
            sweeper,
        }
    }

    #[tokio::test]
    async fn test_low_balance_alerts_once_and_records_time() {
        let fx = fixture(
            FakeBilling::default().with("ext-9", dec!(15.50)),
            &[("1001", "2002", "ext-9")],
        )
        .await;
        let notifier = RecordingNotifier::default();

        fx.sweeper.run_sweep_at(&notifier, t0()).await;

        let sent = notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "1001");
        assert!(sent[0].1.contains("15.50"));
        assert!(sent[0].1.contains("低于 30"));

        let doc = fx.store.load(&GroupId::from("1001")).await;
        assert_eq!(doc.last_alert(&UserId::from("2002")), Some(t0()));
    }

    #[tokio::test]
    async fn test_second_sweep_within_interval_is_silent() {
        let fx = fixture(
            FakeBilling::default().with("ext-9", dec!(15.50)),
            &[("1001", "2002", "ext-9")],
        )
        .await;
        let notifier = RecordingNotifier::default();

        fx.sweeper.run_sweep_at(&notifier, t0()).await;
        let path = fx.store.dir().join("1001.json");
        let before = std::fs::read_to_string(&path).unwrap();

        fx.sweeper
            .run_sweep_at(&notifier, t0() + TimeDelta::hours(1))
            .await;

        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_alerts_again_after_cooldown() {
        let fx = fixture(
            FakeBilling::default().with("ext-9", dec!(15.50)),
            &[("1001", "2002", "ext-9")],
        )
        .await;
        let notifier = RecordingNotifier::default();
        let later = t0() + TimeDelta::hours(25);

        fx.sweeper.run_sweep_at(&notifier, t0()).await;
        fx.sweeper.run_sweep_at(&notifier, later).await;

        assert_eq!(notifier.sent.lock().unwrap().len(), 2);
        let doc = fx.store.load(&GroupId::from("1001")).await;
        assert_eq!(doc.last_alert(&UserId::from("2002")), Some(later));
    }

    #[tokio::test]
    async fn test_threshold_boundary() {
        let fx = fixture(
            FakeBilling::default()
                .with("at-threshold", dec!(30.00))
                .with("just-below", dec!(29.99)),
            &[("1001", "2002", "at-threshold"), ("1001", "3003", "just-below")],
        )
        .await;
        let notifier = RecordingNotifier::default();

        fx.sweeper.run_sweep_at(&notifier, t0()).await;

        let sent = notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("qq=3003"));
        let doc = fx.store.load(&GroupId::from("1001")).await;
        assert_eq!(doc.last_alert(&UserId::from("2002")), None);
    }

    #[tokio::test]
    async fn test_fetch_failure_does_not_stop_sweep() {
        let fx = fixture(
            FakeBilling::default()
                .failing("timeout", || QueryError::Timeout)
                .failing("broken", || QueryError::Malformed("eof".into()))
                .with("low", dec!(3)),
            &[
                ("1001", "1", "timeout"),
                ("1001", "2", "broken"),
                ("1001", "3", "missing"),
                ("1002", "4", "low"),
            ],
        )
        .await;
        let notifier = RecordingNotifier::default();

        fx.sweeper.run_sweep_at(&notifier, t0()).await;

        assert_eq!(fx.billing.calls.lock().unwrap().len(), 4);
        let sent = notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "1002");
        assert!(sent[0].1.contains("qq=4"));

        let summary = fx.sweeper.stats().summary();
        assert_eq!(summary.sweeps, 1);
        assert_eq!(summary.bindings_checked, 4);
        assert_eq!(summary.fetch_failures, 3);
        assert_eq!(summary.alerts_sent, 1);
    }

    #[tokio::test]
    async fn test_failed_notification_still_consumes_grant() {
        let fx = fixture(
            FakeBilling::default().with("ext-9", dec!(1)),
            &[("1001", "2002", "ext-9")],
        )
        .await;
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };

        fx.sweeper.run_sweep_at(&notifier, t0()).await;
        fx.sweeper
            .run_sweep_at(&notifier, t0() + TimeDelta::minutes(5))
            .await;

        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
        assert_eq!(fx.sweeper.stats().summary().other_failures, 1);
    }

    #[tokio::test]
    async fn test_empty_store_sweeps_nothing() {
        let fx = fixture(FakeBilling::default(), &[]).await;
        let notifier = RecordingNotifier::default();

        fx.sweeper.run_sweep_at(&notifier, t0()).await;

        assert!(notifier.sent.lock().unwrap().is_empty());
        assert!(fx.billing.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pauses_after_each_notification() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(GroupStore::open(dir.path()).await.unwrap());
        for user in ["1", "2", "3"] {
            store
                .bind(&GroupId::from("1001"), &UserId::from(user), &AccountId::from(user))
                .await
                .unwrap();
        }
        let billing = FakeBilling::default()
            .with("1", dec!(1))
            .with("2", dec!(100))
            .with("3", dec!(2));
        let policy = AlertPolicy::default();
        let gate = Arc::new(AlertGate::hydrate(store.clone(), policy.interval).await);
        let sweeper = Sweeper::new(store, Arc::new(billing), gate, policy);
        let notifier = RecordingNotifier::default();

        let started = tokio::time::Instant::now();
        sweeper.run_sweep_at(&notifier, t0()).await;

        assert_eq!(notifier.sent.lock().unwrap().len(), 2);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
