//! Per-group feature switch.
//!
//! A single JSON object maps group id to on/off. Groups that were never
//! switched on are off.

use crate::store::{write_json, StoreError};
use meterbot_core::GroupId;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{error, info};

pub struct SwitchStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SwitchStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> BTreeMap<GroupId, bool> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                error!(path = %self.path.display(), error = %e, "Corrupt switch file, treating all groups as off");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to read switch file");
                BTreeMap::new()
            }
        }
    }

    pub async fn is_enabled(&self, group: &GroupId) -> bool {
        self.load().await.get(group).copied().unwrap_or(false)
    }

    pub async fn set(&self, group: &GroupId, enabled: bool) -> Result<(), StoreError> {
        self.modify(group, |_| enabled).await.map(|_| ())
    }

    /// Flip the switch and return the new state.
    pub async fn toggle(&self, group: &GroupId) -> Result<bool, StoreError> {
        self.modify(group, |enabled| !enabled).await
    }

    async fn modify(
        &self,
        group: &GroupId,
        f: impl FnOnce(bool) -> bool,
    ) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let mut switches = self.load().await;
        let enabled = f(switches.get(group).copied().unwrap_or(false));
        switches.insert(group.clone(), enabled);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        write_json(&self.path, &switches).await?;
        info!(group = %group, enabled, "Group switch updated");
        Ok(enabled)
    }
}
