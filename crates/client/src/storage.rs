// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key/value persistence behind a small trait.
//!
//! The default store keeps everything in memory and can snapshot itself
//! to a JSON file; consumers only see the trait, so tests and alternate
//! backends drop in without touching callers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

/// Well-known key layout.
pub mod keys {
    /// Local identity record.
    pub const IDENTITY: &str = "core:spn/identity";
    /// Observable status, read-only for consumers.
    pub const STATUS: &str = "runtime:spn/status";
    /// Wipeable cache prefix.
    pub const CACHE_PREFIX: &str = "cache:spn/";

    /// Prefix holding a named map's hub records.
    pub fn map_prefix(map: &str) -> String {
        format!("core:spn/map/{map}/hubs/")
    }

    /// Key for one hub record in a named map.
    pub fn map_hub(map: &str, hub: &str) -> String {
        format!("core:spn/map/{map}/hubs/{hub}")
    }
}

/// Change stream element.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Put { key: String, value: Value },
    Deleted { key: String },
}

impl StoreEvent {
    fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Deleted { key } => key,
        }
    }
}

/// The persistence contract used across the client.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;
    async fn put(&self, key: &str, value: Value) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
    /// All records whose key starts with `prefix`, in key order.
    async fn query(&self, prefix: &str) -> anyhow::Result<Vec<(String, Value)>>;
    /// Change stream for keys under `prefix`.
    fn subscribe(&self, prefix: &str) -> mpsc::Receiver<StoreEvent>;
}

/// Delete every record under `prefix`. Used to wipe the overlay caches.
pub async fn wipe_prefix(store: &dyn Storage, prefix: &str) -> anyhow::Result<usize> {
    let records = store.query(prefix).await?;
    let count = records.len();
    for (key, _) in records {
        store.delete(&key).await?;
    }
    Ok(count)
}

/// In-memory store with an optional JSON snapshot file.
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, Value>>,
    events: broadcast::Sender<StoreEvent>,
    snapshot: Option<PathBuf>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self { records: RwLock::new(BTreeMap::new()), events, snapshot: None }
    }

    /// Load from `path` when it exists; later [`MemoryStore::persist`]
    /// calls write back to the same file.
    pub fn with_file(path: &Path) -> anyhow::Result<Self> {
        let mut store = Self::new();
        store.snapshot = Some(path.to_owned());
        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let records: BTreeMap<String, Value> = serde_json::from_str(&raw)?;
            *store.records.write() = records;
        }
        Ok(store)
    }

    /// Write the snapshot file, if one is configured.
    pub fn persist(&self) -> anyhow::Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let records = self.records.read();
        let raw = serde_json::to_string_pretty(&*records)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    fn publish(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.records.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.records.write().insert(key.to_owned(), value.clone());
        self.publish(StoreEvent::Put { key: key.to_owned(), value });
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        if self.records.write().remove(key).is_some() {
            self.publish(StoreEvent::Deleted { key: key.to_owned() });
        }
        Ok(())
    }

    async fn query(&self, prefix: &str) -> anyhow::Result<Vec<(String, Value)>> {
        let records = self.records.read();
        Ok(records
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn subscribe(&self, prefix: &str) -> mpsc::Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel(64);
        let mut events = self.events.subscribe();
        let prefix = prefix.to_owned();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if event.key().starts_with(&prefix) && tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
