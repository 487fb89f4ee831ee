// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The topology map: every known hub plus the single Home pointer.
//!
//! One lock guards the whole map. Writers hold it briefly; readers either
//! do a point lookup or take a snapshot and iterate outside the lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use crate::node::{epoch_ms, Hub, HubAnnouncement, HubId, HubStatus};

/// Result of feeding a record into the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The record was newer than anything stored and replaced it.
    Accepted,
    /// An equal-or-newer record is already stored. Not an error.
    Stale,
    /// A status arrived for a hub with no announcement; nothing to verify
    /// against, so the record is dropped.
    Unknown,
}

/// The Home pointer: which hub the live session is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Home {
    pub hub: HubId,
    pub session: Uuid,
}

#[derive(Default)]
struct MapInner {
    hubs: HashMap<HubId, Arc<Hub>>,
    failing_until: HashMap<HubId, Instant>,
    home: Option<Home>,
}

/// Shared read/write view of the overlay topology.
pub struct Map {
    name: String,
    inner: RwLock<MapInner>,
}

impl Map {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), inner: RwLock::new(MapInner::default()) }
    }

    /// Map name; selects the persistence prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.inner.read().hubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().hubs.is_empty()
    }

    pub fn get(&self, id: &HubId) -> Option<Arc<Hub>> {
        self.inner.read().hubs.get(id).cloned()
    }

    /// Clone out all hubs so iteration happens outside the lock.
    pub fn snapshot(&self) -> Vec<Arc<Hub>> {
        self.inner.read().hubs.values().cloned().collect()
    }

    /// Insert or supersede a hub announcement.
    ///
    /// `trusted` is the caller's verdict on the announced owner. A newer
    /// announcement carries over the stored status; an older one is stale.
    pub fn update_announcement(
        &self,
        id: HubId,
        announcement: HubAnnouncement,
        trusted: bool,
    ) -> UpdateOutcome {
        let mut inner = self.inner.write();
        let status = match inner.hubs.get(&id) {
            Some(existing) => {
                if existing.announcement.timestamp >= announcement.timestamp {
                    return UpdateOutcome::Stale;
                }
                existing.status.clone()
            }
            None => None,
        };
        inner.hubs.insert(id.clone(), Arc::new(Hub { id, announcement, status, trusted }));
        UpdateOutcome::Accepted
    }

    /// Supersede a hub's status. The announcement record is kept as-is.
    pub fn update_status(&self, id: &HubId, status: HubStatus) -> UpdateOutcome {
        let mut inner = self.inner.write();
        let Some(existing) = inner.hubs.get(id) else {
            return UpdateOutcome::Unknown;
        };
        if let Some(stored) = &existing.status {
            if stored.timestamp >= status.timestamp {
                return UpdateOutcome::Stale;
            }
        }
        let updated = Hub { status: Some(status), ..(**existing).clone() };
        inner.hubs.insert(id.clone(), Arc::new(updated));
        UpdateOutcome::Accepted
    }

    /// Mark a hub as failing until the given instant.
    pub fn mark_failing(&self, id: &HubId, until: Instant) {
        self.inner.write().failing_until.insert(id.clone(), until);
    }

    /// Drop every failing mark. Used after a suspected machine sleep, when
    /// stale failures say nothing about current hub health.
    pub fn clear_failing_all(&self) {
        self.inner.write().failing_until.clear();
    }

    /// Ids currently marked failing, for snapshot-based filtering.
    pub fn failing_snapshot(&self, now: Instant) -> std::collections::HashSet<HubId> {
        self.inner
            .read()
            .failing_until
            .iter()
            .filter(|(_, until)| **until > now)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn is_failing(&self, id: &HubId, now: Instant) -> bool {
        match self.inner.read().failing_until.get(id) {
            Some(until) => *until > now,
            None => false,
        }
    }

    /// Point the Home at a hub. Fails when the hub is unknown.
    pub fn set_home(&self, hub: HubId, session: Uuid) -> bool {
        let mut inner = self.inner.write();
        if !inner.hubs.contains_key(&hub) {
            return false;
        }
        inner.home = Some(Home { hub, session });
        true
    }

    pub fn clear_home(&self) {
        self.inner.write().home = None;
    }

    pub fn home(&self) -> Option<Home> {
        self.inner.read().home.clone()
    }

    /// Drop hubs whose records have all expired, returning their ids.
    /// The Home hub is never pruned while a session references it.
    pub fn prune(&self) -> Vec<HubId> {
        let now_ms = epoch_ms();
        let mut inner = self.inner.write();
        let home = inner.home.as_ref().map(|h| h.hub.clone());
        let mut removed = Vec::new();
        inner.hubs.retain(|id, hub| {
            let keep = Some(id) == home.as_ref() || !hub.expired(now_ms);
            if !keep {
                removed.push(id.clone());
            }
            keep
        });
        let MapInner { hubs, failing_until, .. } = &mut *inner;
        failing_until.retain(|id, _| hubs.contains_key(id));
        removed
    }
}

#[cfg(test)]
#[path = "map_tests.rs"]
mod tests;
