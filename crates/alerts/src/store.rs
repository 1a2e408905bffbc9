//! JSON document storage, one file per chat group.
//!
//! `<dir>/<group_id>.json` holds that group's bindings and alert history. A
//! missing, empty or unreadable file is an empty document. Every mutation is a
//! whole-document read-modify-write under a per-group lock, and files are
//! replaced atomically through a sibling temp file.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use meterbot_core::{AccountId, GroupDocument, GroupId, RawGroupDocument, UserId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, warn};

const EXTENSION: &str = "json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Invalid group id for storage: {0:?}")]
    InvalidGroup(String),
}

/// Per-group document store.
pub struct GroupStore {
    dir: PathBuf,
    locks: DashMap<GroupId, Arc<Mutex<()>>>,
}

impl GroupStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Write {
                path: dir.clone(),
                source,
            })?;
        Ok(Self {
            dir,
            locks: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, group: &GroupId) -> Result<PathBuf, StoreError> {
        let name = group.as_str();
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(|c| matches!(c, '/' | '\\' | '\0'))
        {
            return Err(StoreError::InvalidGroup(name.to_string()));
        }
        Ok(self.dir.join(format!("{name}.{EXTENSION}")))
    }

    /// Serialize read-modify-write cycles for one group.
    pub async fn lock(&self, group: &GroupId) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(group.clone()).or_default().clone();
        lock.lock_owned().await
    }

    /// Load a group's document. Never fails; problems are logged and yield an
    /// empty document.
    pub async fn load(&self, group: &GroupId) -> GroupDocument {
        let path = match self.path(group) {
            Ok(path) => path,
            Err(e) => {
                warn!(group = %group, error = %e, "Refusing to load document");
                return GroupDocument::default();
            }
        };

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return GroupDocument::default(),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read group document");
                return GroupDocument::default();
            }
        };

        if text.trim().is_empty() {
            return GroupDocument::default();
        }

        let raw: RawGroupDocument = match serde_json::from_str(&text) {
            Ok(raw) => raw,
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    "Corrupt group document, treating as empty"
                );
                return GroupDocument::default();
            }
        };

        let (document, rejected) = raw.decode();
        for entry in rejected {
            warn!(
                group = %group,
                user = %entry.user,
                value = %entry.raw,
                "Dropping unparseable alert timestamp"
            );
        }
        document
    }

    /// Replace a group's document.
    pub async fn save(&self, group: &GroupId, document: &GroupDocument) -> Result<(), StoreError> {
        let path = self.path(group)?;
        write_json(&path, document).await?;
        debug!(group = %group, bindings = document.bindings.len(), "Saved group document");
        Ok(())
    }

    /// Read-modify-write under the group lock. The document is written back
    /// only if `f` changed it.
    pub async fn update<T>(
        &self,
        group: &GroupId,
        f: impl FnOnce(&mut GroupDocument) -> T,
    ) -> Result<T, StoreError> {
        let _guard = self.lock(group).await;
        let mut document = self.load(group).await;
        let before = document.clone();
        let out = f(&mut document);
        if document != before {
            self.save(group, &document).await?;
        }
        Ok(out)
    }

    /// Groups that have a document on disk.
    pub async fn list_groups(&self) -> BTreeSet<GroupId> {
        let mut groups = BTreeSet::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(dir = %self.dir.display(), error = %e, "Failed to list data directory");
                return groups;
            }
        };

        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                        continue;
                    }
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        groups.insert(GroupId::from(stem));
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = %self.dir.display(), error = %e, "Stopped listing data directory early");
                    break;
                }
            }
        }

        groups
    }

    /// Bind (or rebind) a user to a billing account.
    pub async fn bind(
        &self,
        group: &GroupId,
        user: &UserId,
        account: &AccountId,
    ) -> Result<(), StoreError> {
        self.update(group, |doc| doc.bind(user.clone(), account.clone()))
            .await
    }

    /// Remove a binding. Returns false, without writing, when there was none.
    pub async fn unbind(&self, group: &GroupId, user: &UserId) -> Result<bool, StoreError> {
        self.update(group, |doc| doc.unbind(user)).await
    }

    pub async fn binding(&self, group: &GroupId, user: &UserId) -> Option<AccountId> {
        self.load(group).await.binding(user).cloned()
    }

    pub async fn all_bindings(&self, group: &GroupId) -> BTreeMap<UserId, AccountId> {
        self.load(group).await.bindings
    }

    /// Persist the time of an alert for a group member.
    pub async fn record_alert(
        &self,
        group: &GroupId,
        user: &UserId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.update(group, |doc| doc.record_alert(user.clone(), at))
            .await
    }
}

/// Pretty-print `value` with four-space indentation and atomically replace `path`.
pub(crate) async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let write = async {
        tokio::fs::write(&tmp, &buf).await?;
        tokio::fs::rename(&tmp, path).await
    };
    write.await.map_err(|source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    })
}
