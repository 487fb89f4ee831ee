// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Observable client status and the event fan-out.
//!
//! Every mutation pushes the full record to `watch` subscribers; discrete
//! happenings (connected, config changes) additionally go out on a
//! broadcast channel.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::node::{epoch_ms, HubId};

/// Coarse connection state shown to consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    #[default]
    Disabled,
    Connecting,
    Connected,
    Failed,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }
}

/// Details published while a session is live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedInfo {
    pub hub: HubId,
    pub name: String,
    pub ip: IpAddr,
    /// Coarsened address safe for display surfaces.
    pub masked_ip: String,
    pub transport: String,
    pub country: String,
    /// Unix milliseconds.
    pub since: u64,
    /// Last measured ping round-trip, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtt_ms: Option<u64>,
}

/// The full observable record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientStatus {
    pub state: ClientState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected: Option<ConnectedInfo>,
    /// Short reason while in the failed state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Discrete events fanned out to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    Connected { hub: HubId, name: String, country: String },
    ConfigChanged { key: String },
    Migrated { from: String, to: String },
    Deleted { key: String },
}

/// Shared status holder.
pub struct StatusFeed {
    status_tx: watch::Sender<ClientStatus>,
    event_tx: broadcast::Sender<Event>,
}

impl Default for StatusFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusFeed {
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(ClientStatus::default());
        let (event_tx, _) = broadcast::channel(64);
        Self { status_tx, event_tx }
    }

    pub fn current(&self) -> ClientStatus {
        self.status_tx.borrow().clone()
    }

    /// Watch the full record; the receiver sees every mutation.
    pub fn watch(&self) -> watch::Receiver<ClientStatus> {
        self.status_tx.subscribe()
    }

    /// Subscribe to discrete events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    pub fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    pub fn set_connecting(&self) {
        self.status_tx.send_modify(|status| {
            status.state = ClientState::Connecting;
            status.connected = None;
            status.failure = None;
        });
    }

    pub fn set_failed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.status_tx.send_modify(|status| {
            status.state = ClientState::Failed;
            status.connected = None;
            status.failure = Some(reason);
        });
    }

    pub fn set_disabled(&self) {
        self.status_tx.send_modify(|status| {
            *status = ClientStatus::default();
        });
    }

    /// Publish the connected record and emit the `connected` event.
    pub fn set_connected(&self, info: ConnectedInfo) {
        let event = Event::Connected {
            hub: info.hub.clone(),
            name: info.name.clone(),
            country: info.country.clone(),
        };
        self.status_tx.send_modify(|status| {
            status.state = ClientState::Connected;
            status.connected = Some(info);
            status.failure = None;
        });
        self.emit(event);
    }

    /// Update the live round-trip measurement. No-op unless connected.
    pub fn record_rtt(&self, rtt_ms: u64) {
        self.status_tx.send_if_modified(|status| match &mut status.connected {
            Some(info) => {
                info.rtt_ms = Some(rtt_ms);
                true
            }
            None => false,
        });
    }
}

/// Coarsen an address for display: the host bits are zeroed.
pub fn mask_ip(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            format!("{}.{}.{}.0/24", octets[0], octets[1], octets[2])
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            format!("{:x}:{:x}:{:x}::/48", segments[0], segments[1], segments[2])
        }
    }
}

/// Build the connected record for a freshly armed session.
pub fn connected_info(
    hub: HubId,
    name: String,
    ip: IpAddr,
    transport: String,
    country: String,
) -> ConnectedInfo {
    ConnectedInfo {
        masked_ip: mask_ip(&ip),
        hub,
        name,
        ip,
        transport,
        country,
        since: epoch_ms(),
        rtt_ms: None,
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
