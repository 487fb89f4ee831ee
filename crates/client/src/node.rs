// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hub records: announcements, statuses, and lanes.
//!
//! A hub is a peer in the overlay. Its identity is immutable; newer signed
//! records supersede older ones whole; nothing is mutated in place.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How long a signed status stays usable after its timestamp.
pub const STATUS_LIFETIME_MS: u64 = 60 * 60 * 1000;

/// How long an announcement stays usable after its timestamp.
pub const ANNOUNCEMENT_LIFETIME_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Stable hub identity, derived from the hub's Ed25519 public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HubId(String);

impl HubId {
    /// Derive the id from a raw public key: first 16 bytes of SHA-256, hex.
    pub fn from_public_key(key: &[u8]) -> Self {
        let digest = Sha256::digest(key);
        let mut out = String::with_capacity(32);
        for byte in &digest[..16] {
            out.push_str(&format!("{byte:02x}"));
        }
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HubId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for HubId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Transport protocol a hub announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Raw TCP framing.
    Tcp,
    /// WebSocket over an HTTP upgrade.
    Ws,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Ws => f.write_str("ws"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "ws" => Ok(Self::Ws),
            other => Err(format!("unknown transport: {other}")),
        }
    }
}

/// One announced way to reach a hub: protocol, port, and an optional
/// path (WebSocket endpoints only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportEndpoint {
    pub protocol: TransportKind,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl fmt::Display for TransportEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}:{}{}", self.protocol, self.port, path),
            None => write!(f, "{}:{}", self.protocol, self.port),
        }
    }
}

impl FromStr for TransportEndpoint {
    type Err = String;

    /// Parses `tcp:17` or `ws:80/entry`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (protocol, rest) = s.split_once(':').ok_or("expected <protocol>:<port>")?;
        let protocol: TransportKind = protocol.parse()?;
        let (port, path) = match rest.find('/') {
            Some(at) => (&rest[..at], Some(rest[at..].to_owned())),
            None => (rest, None),
        };
        let port: u16 = port.parse().map_err(|_| format!("bad port: {port}"))?;
        Ok(Self { protocol, port, path })
    }
}

/// Geographic point used for entry ranking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Great-circle distance to `other` in kilometers.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// Long-lived signed descriptor for a hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubAnnouncement {
    /// Base64-encoded Ed25519 public key. The hub id is derived from it.
    pub public_key: String,
    pub name: String,
    /// Announced transports, in the hub's preference order.
    pub transports: Vec<TransportEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<std::net::Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<std::net::Ipv6Addr>,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
    /// Continent code (e.g. "EU").
    pub continent: String,
    /// Autonomous system number of the announced addresses.
    pub asn: u32,
    /// Verified-owner string, empty when unverified.
    #[serde(default)]
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coords: Option<GeoPoint>,
    /// Unix milliseconds. Monotonic per hub id.
    pub timestamp: u64,
}

/// A directed peering edge to another hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lane {
    pub peer: HubId,
    pub latency_ms: u32,
    pub capacity_kbps: u32,
}

/// Short-lived signed load/lane/flag record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubStatus {
    /// Utilization 0–100.
    pub load: u8,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub lanes: Vec<Lane>,
    /// Unix milliseconds. Monotonic per hub id.
    pub timestamp: u64,
}

impl HubStatus {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

/// A known overlay peer: identity plus the latest signed records.
#[derive(Debug, Clone)]
pub struct Hub {
    pub id: HubId,
    pub announcement: HubAnnouncement,
    pub status: Option<HubStatus>,
    /// Owner is in the configured trusted-owners set.
    pub trusted: bool,
}

impl Hub {
    /// Announced addresses, IPv4 first.
    pub fn addresses(&self) -> Vec<IpAddr> {
        let mut out = Vec::with_capacity(2);
        if let Some(v4) = self.announcement.ipv4 {
            out.push(IpAddr::V4(v4));
        }
        if let Some(v6) = self.announcement.ipv6 {
            out.push(IpAddr::V6(v6));
        }
        out
    }

    /// A hub is reachable if it announces at least one transport and one address.
    pub fn reachable(&self) -> bool {
        !self.announcement.transports.is_empty() && !self.addresses().is_empty()
    }

    /// A hub is usable as an entry unless its status flags it offline.
    pub fn online(&self) -> bool {
        match &self.status {
            Some(status) => !status.has_flag("offline"),
            None => true,
        }
    }

    /// Highest timestamp across the stored records.
    pub fn last_seen(&self) -> u64 {
        let status_ts = self.status.as_ref().map(|s| s.timestamp).unwrap_or(0);
        self.announcement.timestamp.max(status_ts)
    }

    /// True when the freshest record has outlived its lifetime.
    pub fn expired(&self, now_ms: u64) -> bool {
        let ann_dead = self.announcement.timestamp + ANNOUNCEMENT_LIFETIME_MS < now_ms;
        let status_dead = match &self.status {
            Some(status) => status.timestamp + STATUS_LIFETIME_MS < now_ms,
            None => true,
        };
        ann_dead && status_dead
    }

    /// Status freshness check used by the entry selector.
    pub fn status_fresh(&self, now_ms: u64) -> bool {
        match &self.status {
            Some(status) => status.timestamp + STATUS_LIFETIME_MS >= now_ms,
            None => false,
        }
    }
}

/// Return the current UTC time as milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
