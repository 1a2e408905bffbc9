//! The per-group persisted document.

use crate::timestamp;
use crate::{AccountId, UserId};
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

/// Bindings and alert history for one chat group.
///
/// Always written as a whole; there are no partial-field updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupDocument {
    /// User id -> billing account id.
    pub bindings: BTreeMap<UserId, AccountId>,
    /// User id -> time of the last low-balance alert.
    #[serde(serialize_with = "serialize_timestamps")]
    pub last_alert_time: BTreeMap<UserId, DateTime<Utc>>,
}

impl GroupDocument {
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty() && self.last_alert_time.is_empty()
    }

    /// Insert or overwrite a binding.
    pub fn bind(&mut self, user: UserId, account: AccountId) {
        self.bindings.insert(user, account);
    }

    /// Remove a binding. Returns false when the user had none.
    pub fn unbind(&mut self, user: &UserId) -> bool {
        self.bindings.remove(user).is_some()
    }

    pub fn binding(&self, user: &UserId) -> Option<&AccountId> {
        self.bindings.get(user)
    }

    pub fn last_alert(&self, user: &UserId) -> Option<DateTime<Utc>> {
        self.last_alert_time.get(user).copied()
    }

    pub fn record_alert(&mut self, user: UserId, at: DateTime<Utc>) {
        self.last_alert_time.insert(user, at);
    }
}

fn serialize_timestamps<S>(
    map: &BTreeMap<UserId, DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut out = serializer.serialize_map(Some(map.len()))?;
    for (user, at) in map {
        out.serialize_entry(user, &timestamp::encode(at))?;
    }
    out.end()
}

/// A document as found on disk, before timestamps are validated.
///
/// Either section may be missing; timestamp values are kept as raw JSON so a
/// single bad entry does not reject the whole document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGroupDocument {
    #[serde(default)]
    pub bindings: BTreeMap<UserId, AccountId>,
    #[serde(default)]
    pub last_alert_time: BTreeMap<UserId, serde_json::Value>,
}

/// An alert timestamp that could not be decoded and was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedTimestamp {
    pub user: UserId,
    pub raw: String,
}

impl RawGroupDocument {
    /// Decode timestamps, dropping entries that do not parse.
    pub fn decode(self) -> (GroupDocument, Vec<RejectedTimestamp>) {
        let mut rejected = Vec::new();
        let mut last_alert_time = BTreeMap::new();

        for (user, value) in self.last_alert_time {
            match value.as_str().and_then(timestamp::decode) {
                Some(at) => {
                    last_alert_time.insert(user, at);
                }
                None => rejected.push(RejectedTimestamp {
                    user,
                    raw: value.to_string(),
                }),
            }
        }

        let document = GroupDocument {
            bindings: self.bindings,
            last_alert_time,
        };
        (document, rejected)
    }
}
