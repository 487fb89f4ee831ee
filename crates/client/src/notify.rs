// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyed user-visible notifications.
//!
//! A notification id stays active until resolved; raising it again with
//! the same message is a no-op, so a failing reconnect loop produces one
//! notification instead of one per attempt.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Stable notification ids used by the session manager.
pub mod ids {
    pub const ALL_HOME_HUBS_EXCLUDED: &str = "all-home-hubs-excluded";
    pub const MAP_REINIT_SUGGESTED: &str = "map-reinit-suggested";
    pub const LOGIN_REQUIRED: &str = "account-login-required";
    pub const ACCOUNT_NOT_ELIGIBLE: &str = "account-not-eligible";
    pub const PACKAGE_LACKS_FEATURE: &str = "account-package-lacks-feature";
    pub const TOKENS_EXHAUSTED: &str = "account-tokens-exhausted";
    pub const CONNECTION_TROUBLE: &str = "connection-trouble";
}

/// One user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    /// Optional remediation hint (e.g. the setting to change).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// Deduplicating notification hub.
pub struct Notifier {
    active: Mutex<HashMap<String, Notification>>,
    tx: broadcast::Sender<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(32);
        Self { active: Mutex::new(HashMap::new()), tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Raise a notification. Returns `false` when an identical one is
    /// already active.
    pub fn raise(&self, notification: Notification) -> bool {
        let mut active = self.active.lock();
        if active.get(&notification.id) == Some(&notification) {
            return false;
        }
        active.insert(notification.id.clone(), notification.clone());
        drop(active);
        let _ = self.tx.send(notification);
        true
    }

    /// Resolve (remove) a notification by id.
    pub fn resolve(&self, id: &str) {
        self.active.lock().remove(id);
    }

    pub fn active(&self) -> Vec<Notification> {
        let mut list: Vec<Notification> = self.active.lock().values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }
}

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
