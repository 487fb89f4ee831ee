// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Candidate iteration for (D) open-session.
//!
//! Candidates arrive in selector order; for each one we try its
//! announced transports crossed with its addresses. The first
//! authenticated terminal wins and the rest are discarded. A candidate
//! whose every attempt fails sits out the next five minutes.

use std::net::IpAddr;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::instance::Instance;
use crate::navigator::Candidate;
use crate::node::{Hub, TransportEndpoint};
use crate::ship::ShipError;
use crate::terminal::{Terminal, TerminalError, TerminalEvents};

/// Bound on one launch-plus-handshake attempt.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on the whole candidate iteration.
pub const CONNECT_DEADLINE: Duration = Duration::from_secs(300);

/// How long a failed candidate is sidelined.
pub const FAILING_DURATION: Duration = Duration::from_secs(300);

/// A freshly authenticated session pipe.
pub struct OpenedSession {
    pub hub: std::sync::Arc<Hub>,
    pub ip: IpAddr,
    pub endpoint: TransportEndpoint,
    pub terminal: std::sync::Arc<dyn Terminal>,
    pub events: TerminalEvents,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Every candidate failed or the deadline passed.
    NoCandidateReachable,
    Cancelled,
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoCandidateReachable => f.write_str("no entry candidate could be reached"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Try candidates in order until one authenticates.
pub async fn open_session(
    instance: &Instance,
    candidates: Vec<Candidate>,
    scope: &CancellationToken,
) -> Result<OpenedSession, ConnectError> {
    let deadline = Instant::now() + CONNECT_DEADLINE;

    for candidate in candidates {
        let hub = candidate.hub;
        debug!(hub = %hub.id, cost = candidate.cost, "trying entry candidate");

        for endpoint in hub.announcement.transports.clone() {
            for ip in attempt_ips(&hub, instance.netenv.ipv6_enabled()) {
                if scope.is_cancelled() || instance.shutdown.is_cancelled() {
                    return Err(ConnectError::Cancelled);
                }
                let now = Instant::now();
                if now >= deadline {
                    debug!("connect deadline reached");
                    return Err(ConnectError::NoCandidateReachable);
                }
                let budget = ATTEMPT_TIMEOUT.min(deadline - now);

                match tokio::time::timeout(budget, attempt(instance, &hub, &endpoint, ip, scope))
                    .await
                {
                    Ok(Ok((terminal, events))) => {
                        debug!(hub = %hub.id, %ip, transport = %endpoint, "entry session opened");
                        return Ok(OpenedSession { hub, ip, endpoint, terminal, events });
                    }
                    Ok(Err(AttemptError::Cancelled)) => return Err(ConnectError::Cancelled),
                    Ok(Err(e)) => {
                        debug!(hub = %hub.id, %ip, transport = %endpoint, err = %e, "attempt failed");
                    }
                    Err(_) => {
                        debug!(hub = %hub.id, %ip, transport = %endpoint, "attempt timed out");
                    }
                }
            }
        }

        // Nothing on this hub worked; sideline it and move on.
        instance.map.mark_failing(&hub.id, Instant::now() + FAILING_DURATION);
    }

    Err(ConnectError::NoCandidateReachable)
}

fn attempt_ips(hub: &Hub, ipv6_enabled: bool) -> Vec<IpAddr> {
    hub.addresses()
        .into_iter()
        .filter(|ip| ipv6_enabled || ip.is_ipv4())
        .collect()
}

enum AttemptError {
    Ship(ShipError),
    Terminal(TerminalError),
    Cancelled,
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ship(e) => write!(f, "transport: {e}"),
            Self::Terminal(e) => write!(f, "terminal: {e}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

async fn attempt(
    instance: &Instance,
    hub: &std::sync::Arc<Hub>,
    endpoint: &TransportEndpoint,
    ip: IpAddr,
    scope: &CancellationToken,
) -> Result<(std::sync::Arc<dyn Terminal>, TerminalEvents), AttemptError> {
    let ship = instance.ships.launch(scope, hub, endpoint, ip).await.map_err(|e| match e {
        ShipError::Cancelled => AttemptError::Cancelled,
        other => AttemptError::Ship(other),
    })?;

    instance.terminals.establish(ship, &instance.identity, scope).await.map_err(|e| match e {
        TerminalError::Cancelled => AttemptError::Cancelled,
        other => AttemptError::Terminal(other),
    })
}

#[cfg(test)]
#[path = "connect_tests.rs"]
mod tests;
