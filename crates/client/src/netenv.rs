// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Network-environment contract consumed by the session manager and the
//! sluice, plus the level-triggered flag used for change signals.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::node::GeoPoint;

/// Coarse connectivity verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineStatus {
    Online,
    /// Connected to something, but the internet is not reachable
    /// (captive portal, DNS-less link).
    Limited,
    Offline,
}

/// Level-triggered signal flag.
///
/// `set` latches until consumed; waiters see the level, not an edge, so a
/// signal raised during a reconnect is observed by the next loop pass
/// instead of being lost.
#[derive(Default)]
pub struct Flag {
    raised: AtomicBool,
    notify: Notify,
}

impl Flag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.raised.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Clear the flag, reporting whether it was set. Draining is
    /// idempotent.
    pub fn consume(&self) -> bool {
        self.raised.swap(false, Ordering::AcqRel)
    }

    /// Wait until the flag is set. Returns immediately when it already is.
    pub async fn wait(&self) {
        loop {
            if self.is_set() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// External network-environment monitor.
#[async_trait::async_trait]
pub trait NetworkEnv: Send + Sync {
    async fn online_status(&self) -> OnlineStatus;
    /// Level-triggered "the network changed" flag.
    fn network_changed(&self) -> &Flag;
    fn ipv6_enabled(&self) -> bool;
    /// Is `ip` one of this host's own addresses?
    fn is_my_ip(&self, ip: &IpAddr) -> bool;
    /// Best-estimated public exit locations (IPv4, IPv6).
    async fn internet_location(&self) -> (Option<GeoPoint>, Option<GeoPoint>);
    /// Ask the monitor to re-probe the environment soon.
    fn request_rescan(&self);
}

/// Minimal host-local implementation.
///
/// Good enough for running against a real overlay; deployments with a
/// richer monitor inject their own [`NetworkEnv`].
pub struct LocalNetworkEnv {
    changed: Flag,
    ipv6: bool,
}

impl Default for LocalNetworkEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalNetworkEnv {
    pub fn new() -> Self {
        let ipv6 = std::net::UdpSocket::bind("[::1]:0").is_ok();
        Self { changed: Flag::new(), ipv6 }
    }
}

#[async_trait::async_trait]
impl NetworkEnv for LocalNetworkEnv {
    async fn online_status(&self) -> OnlineStatus {
        OnlineStatus::Online
    }

    fn network_changed(&self) -> &Flag {
        &self.changed
    }

    fn ipv6_enabled(&self) -> bool {
        self.ipv6
    }

    fn is_my_ip(&self, ip: &IpAddr) -> bool {
        ip.is_loopback()
    }

    async fn internet_location(&self) -> (Option<GeoPoint>, Option<GeoPoint>) {
        (None, None)
    }

    fn request_rescan(&self) {
        tracing::debug!("network re-scan requested");
    }
}

#[cfg(test)]
#[path = "netenv_tests.rs"]
mod tests;
