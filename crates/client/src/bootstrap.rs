// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bootstrap seeding: a single `--bootstrap-hub` URI or a JSON/YAML list
//! file.
//!
//! Bootstrap records enter the map with the lowest possible timestamp so
//! any signed announcement learned over gossip supersedes them.

use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::map::{Map, UpdateOutcome};
use crate::node::{GeoPoint, HubAnnouncement, HubId, TransportEndpoint};

/// One seed entry, as written in bootstrap files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Endpoint strings, e.g. `"tcp:717"` or `"ws:80/entry"`.
    pub transports: Vec<String>,
    #[serde(default)]
    pub ipv4: Option<Ipv4Addr>,
    #[serde(default)]
    pub ipv6: Option<Ipv6Addr>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub continent: Option<String>,
    #[serde(default)]
    pub asn: Option<u32>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub coords: Option<GeoPoint>,
}

impl BootstrapEntry {
    fn into_announcement(self) -> Result<(HubId, HubAnnouncement), String> {
        if self.ipv4.is_none() && self.ipv6.is_none() {
            return Err("entry announces no address".into());
        }
        let mut transports = Vec::with_capacity(self.transports.len());
        for raw in &self.transports {
            transports.push(raw.parse::<TransportEndpoint>()?);
        }
        if transports.is_empty() {
            return Err("entry announces no transport".into());
        }
        let id = HubId::from(self.id);
        let announcement = HubAnnouncement {
            public_key: self.public_key.unwrap_or_default(),
            name: self.name.unwrap_or_else(|| id.as_str().to_owned()),
            transports,
            ipv4: self.ipv4,
            ipv6: self.ipv6,
            country: self.country.unwrap_or_default(),
            continent: self.continent.unwrap_or_default(),
            asn: self.asn.unwrap_or_default(),
            owner: self.owner.unwrap_or_default(),
            coords: self.coords,
            // Below any real gossip, so signed records always win.
            timestamp: 1,
        };
        Ok((id, announcement))
    }
}

/// Parse a `--bootstrap-hub` URI: `tcp://203.0.113.7:717#<hub-id>`.
pub fn parse_bootstrap_uri(uri: &str) -> anyhow::Result<BootstrapEntry> {
    let (rest, id) = uri
        .split_once('#')
        .ok_or_else(|| anyhow::anyhow!("bootstrap uri is missing the #<hub-id> fragment"))?;
    if id.is_empty() {
        anyhow::bail!("bootstrap uri has an empty hub id");
    }
    let (scheme, addr) = rest
        .split_once("://")
        .ok_or_else(|| anyhow::anyhow!("bootstrap uri is missing the transport scheme"))?;
    let addr: std::net::SocketAddr = addr
        .parse()
        .map_err(|_| anyhow::anyhow!("bootstrap uri needs an <ip>:<port> address, got {addr:?}"))?;

    let (ipv4, ipv6) = match addr.ip() {
        std::net::IpAddr::V4(v4) => (Some(v4), None),
        std::net::IpAddr::V6(v6) => (None, Some(v6)),
    };
    Ok(BootstrapEntry {
        id: id.to_owned(),
        name: None,
        transports: vec![format!("{scheme}:{}", addr.port())],
        ipv4,
        ipv6,
        country: None,
        continent: None,
        asn: None,
        owner: None,
        public_key: None,
        coords: None,
    })
}

/// Load a bootstrap list. YAML for `.yaml`/`.yml`, JSON otherwise.
pub async fn load_file(path: &Path) -> anyhow::Result<Vec<BootstrapEntry>> {
    let raw = tokio::fs::read_to_string(path).await?;
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);
    let entries = if is_yaml {
        serde_yaml::from_str(&raw)?
    } else {
        serde_json::from_str(&raw)?
    };
    Ok(entries)
}

/// Seed the map. Returns how many entries were inserted.
pub fn apply(map: &Map, entries: Vec<BootstrapEntry>, trusted_owners: &HashSet<String>) -> usize {
    let mut inserted = 0;
    for entry in entries {
        match entry.into_announcement() {
            Ok((id, announcement)) => {
                let trusted = trusted_owners.contains(&announcement.owner);
                match map.update_announcement(id.clone(), announcement, trusted) {
                    UpdateOutcome::Accepted => inserted += 1,
                    outcome => debug!(hub = %id, ?outcome, "bootstrap entry skipped"),
                }
            }
            Err(reason) => warn!(reason, "invalid bootstrap entry ignored"),
        }
    }
    inserted
}

#[cfg(test)]
#[path = "bootstrap_tests.rs"]
mod tests;
