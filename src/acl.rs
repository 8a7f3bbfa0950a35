// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Access-List Cache
//!
//! Keeps the device's allow-list in sync with the datalog of the ACL role
//! account. Every record of that account points to a complete allow-list
//! document; the newest one that parses is the current list.
//!
//! The list lives in a `watch` channel as an immutable [`AccessList`]
//! snapshot. The watcher task is the only writer and swaps whole snapshots,
//! so readers see either the old list with its sequence number or the new
//! one, never a mix. A document that cannot be fetched or parsed leaves the
//! previous snapshot in place.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::blockchain::{IdentityHandle, LedgerClient, LedgerRecord};
use crate::content::ContentStore;
use crate::error::{ContentError, SetupError};
use crate::identity::IdentityResolver;
use crate::watcher::{RecordHandler, RecordWatcher, WatcherHandle, WatcherStatus};

/// A set of allowed identifiers and the record it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessList {
    ids: HashSet<String>,
    sequence: Option<u64>,
}

impl AccessList {
    pub fn new(ids: impl IntoIterator<Item = String>, sequence: Option<u64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            sequence,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Sequence number of the source record; `None` before the first one.
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Identifiers in sorted order.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.ids.iter().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Identifier {
    Text(String),
    Number(u64),
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        match id {
            Identifier::Text(text) => text,
            Identifier::Number(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AllowListDocument {
    allowed_ids: Vec<Identifier>,
}

/// Parse an allow-list document: `{"allowed_ids": [...]}`.
///
/// Numeric identifiers are accepted and kept in their decimal form.
pub fn parse_allow_list(bytes: &[u8]) -> Result<HashSet<String>, ContentError> {
    let document: AllowListDocument =
        serde_json::from_slice(bytes).map_err(|e| ContentError::Parse(format!("allow-list: {e}")))?;
    Ok(document.allowed_ids.into_iter().map(String::from).collect())
}

async fn load_access_list<S: ContentStore>(
    store: &S,
    record: &LedgerRecord,
) -> Result<AccessList, ContentError> {
    let reference = record.content_ref()?;
    let bytes = store.fetch(&reference).await?;
    let ids = parse_allow_list(&bytes)?;
    Ok(AccessList {
        ids,
        sequence: Some(record.sequence),
    })
}

/// Watcher handler that swaps in each new allow-list.
struct AclUpdater<S> {
    store: Arc<S>,
    snapshot: watch::Sender<Arc<AccessList>>,
}

impl<S: ContentStore> RecordHandler for AclUpdater<S> {
    async fn handle(&mut self, record: &LedgerRecord) -> Result<(), ContentError> {
        let list = load_access_list(self.store.as_ref(), record).await?;
        let (sequence, entries) = (list.sequence, list.len());

        let replaced = self.snapshot.send_if_modified(|current| {
            if list.sequence > current.sequence {
                *current = Arc::new(list);
                true
            } else {
                false
            }
        });

        if replaced {
            info!(sequence = ?sequence, entries, content = %record.payload, "Allow-list updated");
        }
        Ok(())
    }
}

/// Locally cached allow-list of one device identity.
pub struct AccessListCache {
    account: Address,
    snapshot: watch::Receiver<Arc<AccessList>>,
    watcher: WatcherHandle,
}

impl AccessListCache {
    /// Resolve the ACL account of `identity`, load its current allow-list
    /// and start following updates.
    ///
    /// Fails if the identity or role cannot be resolved. A missing or
    /// unusable initial document starts the cache empty.
    pub async fn start<C: LedgerClient, S: ContentStore>(
        client: Arc<C>,
        store: Arc<S>,
        identity: IdentityHandle,
        acl_role: &str,
        poll_interval: Duration,
    ) -> Result<Self, SetupError> {
        let account = IdentityResolver::new(client.clone())
            .resolve_role(identity, acl_role)
            .await?;

        let latest = client.latest_record(account).await?;
        let initial = match &latest {
            None => {
                info!(%account, "No allow-list published yet, starting empty");
                AccessList::default()
            }
            Some(record) => match load_access_list(store.as_ref(), record).await {
                Ok(list) => {
                    info!(%account, sequence = record.sequence, entries = list.len(), "Loaded allow-list");
                    list
                }
                Err(e) => {
                    warn!(
                        %account,
                        sequence = record.sequence,
                        error = %e,
                        "Current allow-list unusable, starting empty"
                    );
                    AccessList::default()
                }
            },
        };

        let (tx, rx) = watch::channel(Arc::new(initial));
        let watcher = RecordWatcher::new(client, account)
            .with_poll_interval(poll_interval)
            .starting_after(latest.map(|r| r.sequence))
            .spawn(AclUpdater {
                store,
                snapshot: tx,
            });

        Ok(Self {
            account,
            snapshot: rx,
            watcher,
        })
    }

    /// Whether `id` is on the current allow-list.
    pub fn is_allowed(&self, id: &str) -> bool {
        self.snapshot.borrow().contains(id)
    }

    pub fn snapshot(&self) -> Arc<AccessList> {
        self.snapshot.borrow().clone()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.snapshot.borrow().sequence()
    }

    /// The ACL role account being followed.
    pub fn account(&self) -> Address {
        self.account
    }

    /// Receiver notified whenever the allow-list is replaced.
    pub fn subscribe(&self) -> watch::Receiver<Arc<AccessList>> {
        self.snapshot.clone()
    }

    pub fn watcher_status(&self) -> WatcherStatus {
        self.watcher.status()
    }

    /// Stop following updates. The last snapshot stays readable until drop.
    pub async fn shutdown(self) {
        self.watcher.shutdown().await;
    }
}
