// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Entry-node selection.
//!
//! Selection is three pure passes over a map snapshot (health filter,
//! policy filter, ranking), so each is testable with table-driven cases.
//! The closest acceptable entry minimizes how far the caller's real
//! address travels across the open internet; the load penalty spreads
//! clients away from hot hubs and the jitter de-synchronizes them.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use rand::Rng;
use tokio::time::Instant;

use crate::map::Map;
use crate::node::{epoch_ms, GeoPoint, Hub, HubId};
use crate::policy::Policy;

/// Distance charged to hubs (or callers) without known coordinates.
const UNKNOWN_DISTANCE_KM: f64 = 20_000.0;

/// Flat cost added to hubs at or above the high-load threshold.
const HIGH_LOAD_PENALTY: f64 = 10_000.0;

/// Load at which the flat penalty kicks in.
const HIGH_LOAD_THRESHOLD: u8 = 80;

/// Per-point cost for declared load below the threshold.
const LOAD_WEIGHT: f64 = 10.0;

/// Upper bound of the random de-synchronization jitter, in cost units.
const JITTER: f64 = 50.0;

/// Why selection produced no candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectError {
    /// The map holds no hubs at all; caller should bootstrap and retry.
    EmptyMap,
    /// Hubs exist but none is currently healthy or reachable.
    NoReachableCandidates,
    /// Healthy hubs exist but the user policy (or trust settings) removed
    /// every one of them.
    AllCandidatesExcluded,
}

impl fmt::Display for SelectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMap => f.write_str("the map is empty"),
            Self::NoReachableCandidates => f.write_str("no hub is currently reachable"),
            Self::AllCandidatesExcluded => {
                f.write_str("every home hub is excluded by the current settings")
            }
        }
    }
}

impl std::error::Error for SelectError {}

/// Caller-side inputs to one selection.
#[derive(Debug, Clone)]
pub struct SelectInput<'a> {
    pub policy: &'a Policy,
    /// Best-estimated location of the caller's IPv4 exit.
    pub loc4: Option<GeoPoint>,
    /// Best-estimated location of the caller's IPv6 exit.
    pub loc6: Option<GeoPoint>,
    /// Tunnel length the caller intends to build.
    pub hops_required: u8,
    /// Whether community (unverified-owner) hubs may serve as entry.
    pub use_community: bool,
}

/// A ranked entry candidate.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub hub: Arc<Hub>,
    pub cost: f64,
}

/// Rank usable entry hubs, best first.
pub fn select_entry(map: &Map, input: &SelectInput<'_>) -> Result<Vec<Candidate>, SelectError> {
    let snapshot = map.snapshot();
    if snapshot.is_empty() {
        return Err(SelectError::EmptyMap);
    }

    let failing = map.failing_snapshot(Instant::now());
    let healthy = filter_healthy(&snapshot, &failing, epoch_ms());
    if healthy.is_empty() {
        return Err(SelectError::NoReachableCandidates);
    }

    let allowed = filter_policy(healthy, input);
    if allowed.is_empty() {
        return Err(SelectError::AllCandidatesExcluded);
    }

    let mut rng = rand::rng();
    Ok(rank(allowed, input, |ceil| rng.random_range(0.0..ceil)))
}

/// Pass 1: is the hub usable at all, independent of user settings?
///
/// Keeps hubs that are online, announce a transport and an address, can
/// route onward (a reported status with zero lanes means isolated), and
/// are not sitting out a failure mark. A hub whose status has gone stale
/// is dropped; a hub that never reported a status is kept (bootstrap
/// entries have none yet).
pub fn filter_healthy(
    snapshot: &[Arc<Hub>],
    failing: &HashSet<HubId>,
    now_ms: u64,
) -> Vec<Arc<Hub>> {
    snapshot
        .iter()
        .filter(|hub| {
            hub.reachable()
                && hub.online()
                && !failing.contains(&hub.id)
                && match &hub.status {
                    Some(status) => {
                        hub.status_fresh(now_ms)
                            && !status.lanes.is_empty()
                            && !status.has_flag("private")
                    }
                    None => true,
                }
        })
        .cloned()
        .collect()
}

/// Pass 2: is the hub allowed by user settings?
///
/// Applies the rule list, then the community toggle, then the trusted-only
/// gate for short tunnels.
pub fn filter_policy(hubs: Vec<Arc<Hub>>, input: &SelectInput<'_>) -> Vec<Arc<Hub>> {
    hubs.into_iter()
        .filter(|hub| input.policy.permits(hub))
        .filter(|hub| input.use_community || hub.trusted)
        .filter(|hub| input.hops_required >= 2 || hub.trusted)
        .collect()
}

/// Pass 3: order by cost, cheapest first; ties break on the stable id.
pub fn rank(
    hubs: Vec<Arc<Hub>>,
    input: &SelectInput<'_>,
    mut jitter: impl FnMut(f64) -> f64,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = hubs
        .into_iter()
        .map(|hub| {
            let cost = distance_cost(&hub, input) + load_cost(&hub) + jitter(JITTER);
            Candidate { hub, cost }
        })
        .collect();
    candidates.sort_by(|a, b| a.cost.total_cmp(&b.cost).then_with(|| a.hub.id.cmp(&b.hub.id)));
    candidates
}

fn distance_cost(hub: &Hub, input: &SelectInput<'_>) -> f64 {
    let Some(coords) = hub.announcement.coords else {
        return UNKNOWN_DISTANCE_KM;
    };
    let d4 = input.loc4.map(|loc| loc.distance_km(&coords));
    let d6 = input.loc6.map(|loc| loc.distance_km(&coords));
    match (d4, d6) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => UNKNOWN_DISTANCE_KM,
    }
}

fn load_cost(hub: &Hub) -> f64 {
    let load = hub.status.as_ref().map(|s| s.load).unwrap_or(0);
    if load >= HIGH_LOAD_THRESHOLD {
        HIGH_LOAD_PENALTY
    } else {
        f64::from(load) * LOAD_WEIGHT
    }
}

#[cfg(test)]
#[path = "navigator_tests.rs"]
mod tests;
