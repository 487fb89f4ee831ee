// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gossip ingest and relay.
//!
//! Every verified message either supersedes the stored record (and is
//! relayed split-horizon to all other live sessions) or is discarded as
//! stale. Accepted raw messages are written through to storage so a
//! restart starts from the last known topology and peers can be served
//! a full dump.

pub mod wire;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::map::{Map, UpdateOutcome};
use crate::storage::{keys, Storage};
use crate::terminal::{OpReply, Terminal, TerminalEvents};
use wire::{GossipRecord, WireError};

/// Shared gossip hub: one per client instance.
pub struct Gossip {
    map: Arc<Map>,
    storage: Arc<dyn Storage>,
    trusted_owners: HashSet<String>,
    sessions: RwLock<HashMap<Uuid, Arc<dyn Terminal>>>,
}

impl Gossip {
    pub fn new(map: Arc<Map>, storage: Arc<dyn Storage>, trusted_owners: HashSet<String>) -> Self {
        Self { map, storage, trusted_owners, sessions: RwLock::new(HashMap::new()) }
    }

    /// Replay stored raw messages into the map. Called once at startup.
    pub async fn load_from_storage(&self) -> anyhow::Result<usize> {
        let records = self.storage.query(&keys::map_prefix(self.map.name())).await?;
        let mut loaded = 0;
        for (key, value) in records {
            for field in ["announcement", "status"] {
                let Some(raw_b64) = value.get(field).and_then(|v| v.as_str()) else {
                    continue;
                };
                let Ok(raw) = B64.decode(raw_b64) else {
                    warn!(key, field, "undecodable stored gossip record, skipping");
                    continue;
                };
                match self.ingest(&raw, None).await {
                    Ok(UpdateOutcome::Accepted) => loaded += 1,
                    Ok(_) => {}
                    Err(e) => warn!(key, field, err = %e, "stored gossip record rejected"),
                }
            }
        }
        Ok(loaded)
    }

    /// Verify and apply one raw message.
    ///
    /// `from` names the session the message arrived on, so the relay can
    /// skip it. Stale messages return [`UpdateOutcome::Stale`], a debug
    /// event, not an error.
    pub async fn ingest(&self, raw: &[u8], from: Option<Uuid>) -> Result<UpdateOutcome, WireError> {
        let message = wire::decode(raw, |id| {
            self.map.get(id).map(|hub| hub.announcement.public_key.clone())
        })?;

        let outcome = match &message.record {
            GossipRecord::Announcement(announcement) => {
                let trusted = self.trusted_owners.contains(&announcement.owner);
                self.map.update_announcement(message.hub.clone(), announcement.clone(), trusted)
            }
            GossipRecord::Status(status) => self.map.update_status(&message.hub, status.clone()),
        };

        match outcome {
            UpdateOutcome::Accepted => {
                self.persist(&message).await;
                self.relay(&message.raw, from).await;
            }
            UpdateOutcome::Stale => {
                debug!(hub = %message.hub, ts = message.timestamp, "old gossip data discarded");
            }
            UpdateOutcome::Unknown => {
                debug!(hub = %message.hub, "status for unknown hub dropped");
            }
        }
        Ok(outcome)
    }

    async fn persist(&self, message: &wire::GossipMessage) {
        let key = keys::map_hub(self.map.name(), message.hub.as_str());
        let mut record = match self.storage.get(&key).await {
            Ok(Some(value)) => value,
            _ => json!({}),
        };
        let field = match message.kind {
            wire::GossipKind::Announcement => "announcement",
            wire::GossipKind::Status => "status",
        };
        record[field] = json!(B64.encode(&message.raw));
        if let Err(e) = self.storage.put(&key, record).await {
            warn!(hub = %message.hub, err = %e, "failed to persist gossip record");
        }
    }

    /// Split-horizon relay: every live session except the origin.
    async fn relay(&self, raw: &Bytes, from: Option<Uuid>) {
        let targets: Vec<(Uuid, Arc<dyn Terminal>)> = self
            .sessions
            .read()
            .iter()
            .filter(|(id, _)| Some(**id) != from)
            .map(|(id, terminal)| (*id, Arc::clone(terminal)))
            .collect();
        for (id, terminal) in targets {
            if let Err(e) = terminal.send_gossip(raw.clone()).await {
                debug!(session = %id, err = %e, "gossip relay failed");
            }
        }
    }

    /// Push every stored raw message to one peer.
    pub async fn dump_to(&self, terminal: &Arc<dyn Terminal>) {
        let records = match self.storage.query(&keys::map_prefix(self.map.name())).await {
            Ok(records) => records,
            Err(e) => {
                warn!(err = %e, "gossip dump query failed");
                return;
            }
        };
        for (_, value) in records {
            for field in ["announcement", "status"] {
                let Some(raw_b64) = value.get(field).and_then(|v| v.as_str()) else {
                    continue;
                };
                let Ok(raw) = B64.decode(raw_b64) else { continue };
                if terminal.send_gossip(Bytes::from(raw)).await.is_err() {
                    return;
                }
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Drive gossip for one live session until shutdown.
    ///
    /// Registers the session for relaying, queries the peer for its view,
    /// answers the peer's queries with our dump, and feeds every incoming
    /// message through [`Gossip::ingest`].
    pub async fn run_session(
        self: Arc<Self>,
        session: Uuid,
        terminal: Arc<dyn Terminal>,
        mut events: TerminalEvents,
        shutdown: CancellationToken,
    ) {
        self.sessions.write().insert(session, Arc::clone(&terminal));

        match terminal.query_peer().await {
            OpReply::Ack => {}
            other => debug!(session = %session, reply = ?other, "gossip query not acknowledged"),
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                maybe = events.gossip_rx.recv() => match maybe {
                    Some(raw) => {
                        if let Err(e) = self.ingest(&raw, Some(session)).await {
                            debug!(session = %session, err = %e, "gossip message rejected");
                        }
                    }
                    None => break,
                },
                maybe = events.query_rx.recv() => match maybe {
                    Some(()) => self.dump_to(&terminal).await,
                    None => break,
                },
            }
        }

        self.sessions.write().remove(&session);
    }
}

#[cfg(test)]
#[path = "gossip_tests.rs"]
mod tests;
