//! Alert gate: at most one alert per group member per interval.
//!
//! The gate keeps a ledger of last-alert times, hydrated from the store at
//! startup. A grant is written through to the store before it is reported, so
//! a restart never forgets an alert that was allowed to go out.

use crate::store::{GroupStore, StoreError};
use chrono::{DateTime, TimeDelta, Utc};
use meterbot_core::{GroupId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

type Ledger = HashMap<(GroupId, UserId), DateTime<Utc>>;

/// True when an alert may fire: never alerted, or strictly more than
/// `interval` since the last one.
pub fn cooldown_elapsed(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: TimeDelta) -> bool {
    match last {
        None => true,
        Some(last) => now - last > interval,
    }
}

pub struct AlertGate {
    store: Arc<GroupStore>,
    interval: TimeDelta,
    ledger: Mutex<Ledger>,
}

impl AlertGate {
    /// Build a gate whose ledger mirrors every alert time currently on disk.
    pub async fn hydrate(store: Arc<GroupStore>, interval: TimeDelta) -> Self {
        let mut ledger = Ledger::new();
        for group in store.list_groups().await {
            let document = store.load(&group).await;
            for (user, at) in document.last_alert_time {
                ledger.insert((group.clone(), user), at);
            }
        }
        info!(entries = ledger.len(), "Alert ledger hydrated");

        Self {
            store,
            interval,
            ledger: Mutex::new(ledger),
        }
    }

    pub fn interval(&self) -> TimeDelta {
        self.interval
    }

    /// Decide whether `user` in `group` may be alerted at `now`.
    ///
    /// A `true` answer has already been persisted. If persisting fails the
    /// grant is withdrawn and the error returned; the ledger is left unchanged.
    pub async fn should_alert(
        &self,
        group: &GroupId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut ledger = self.ledger.lock().await;
        let key = (group.clone(), user.clone());
        let last = ledger.get(&key).copied();

        if !cooldown_elapsed(last, now, self.interval) {
            debug!(group = %group, user = %user, last = ?last, "Alert suppressed by cooldown");
            return Ok(false);
        }

        self.store.record_alert(group, user, now).await?;
        ledger.insert(key, now);
        Ok(true)
    }

    pub async fn last_alert(&self, group: &GroupId, user: &UserId) -> Option<DateTime<Utc>> {
        self.ledger
            .lock()
            .await
            .get(&(group.clone(), user.clone()))
            .copied()
    }
}
