// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session manager driver: establish, maintain, recover.
//!
//! One task per instance runs this loop, so at most one reconnect is in
//! flight at any time. Signals that arrive mid-cycle stay latched in
//! their level-triggered sources and are drained at the top of the next
//! pass, which is how simultaneous network-change and health-failure
//! collapse into a single reconnect.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::account::GateError;
use crate::config::OVERLAY_FEATURE;
use crate::instance::Instance;
use crate::navigator::{select_entry, Candidate, SelectError, SelectInput};
use crate::netenv::OnlineStatus;
use crate::node::Hub;
use crate::notify::{ids, Notification};
use crate::status::connected_info;
use crate::terminal::Terminal;

use super::connect::{self, ConnectError, FAILING_DURATION, OpenedSession};
use super::step::{step, Signal, State, Verdict};

/// Backoff between failed connect cycles.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Spacing of connectivity re-checks while offline.
const NETWORK_RECHECK: Duration = Duration::from_secs(2);

/// Bound on waiting for the gossip task during teardown.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A live, armed session.
pub struct Established {
    pub session_id: Uuid,
    pub hub: Arc<Hub>,
    pub terminal: Arc<dyn Terminal>,
    scope: CancellationToken,
    gossip_task: JoinHandle<()>,
}

/// Why establishment failed.
#[derive(Debug)]
pub enum EstablishError {
    Account(GateError),
    /// The policy removed every candidate.
    Policy,
    /// The map is empty or nothing in it is reachable; carries how many
    /// consecutive cycles have ended this way.
    TopologyStale(SelectError, u32),
    /// No candidate could be connected.
    Connect(ConnectError),
    Shutdown,
}

/// How the maintenance loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintainExit {
    Reconnect,
    Shutdown,
}

/// Run the session manager until shutdown.
pub async fn run(instance: Arc<Instance>) {
    info!(id = %instance.identity.id(), "session manager starting");
    instance.status.set_connecting();
    let mut stale_failures = 0u32;

    loop {
        if instance.shutdown.is_cancelled() {
            break;
        }
        match establish(&instance, &mut stale_failures).await {
            Ok(established) => {
                resolve_connect_notifications(&instance);
                info!(hub = %established.hub.id, session = %established.session_id, "connected");

                let exit = maintain(&instance, &established).await;
                teardown(&instance, established).await;
                match exit {
                    MaintainExit::Shutdown => break,
                    MaintainExit::Reconnect => {
                        instance.status.set_connecting();
                        if !pause(&instance, RETRY_DELAY).await {
                            break;
                        }
                    }
                }
            }
            Err(EstablishError::Shutdown) => break,
            Err(error) => {
                report_failure(&instance, &error);
                if !pause(&instance, RETRY_DELAY).await {
                    break;
                }
            }
        }
    }

    instance.status.set_disabled();
    info!("session manager stopped");
}

/// Sleep, but wake early on shutdown or a manual trigger (settings
/// changes trigger so a fixed policy retries without the full backoff).
/// Returns `false` when shutting down.
async fn pause(instance: &Instance, delay: Duration) -> bool {
    tokio::select! {
        _ = instance.shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
        _ = instance.health.triggered() => true,
    }
}

/// Steps (A) through (E): produce an armed session or a typed failure.
///
/// Public so harnesses can drive one cycle at a time; [`run`] is the
/// production driver.
pub async fn establish(
    instance: &Arc<Instance>,
    stale_failures: &mut u32,
) -> Result<Established, EstablishError> {
    let mut state = State::CheckNetwork;
    let mut bootstrap_tried = false;
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut opened: Option<(OpenedSession, CancellationToken)> = None;

    loop {
        if instance.shutdown.is_cancelled() {
            return Err(EstablishError::Shutdown);
        }
        match state {
            // (A) Never advance without connectivity.
            State::CheckNetwork => {
                let online =
                    matches!(instance.netenv.online_status().await, OnlineStatus::Online);
                let signal = if online { Signal::Proceed } else { Signal::NetworkDown };
                let (next, verdict) = step(state, signal);
                state = next;
                if verdict == Verdict::Retry {
                    debug!("offline, waiting for connectivity");
                    if !pause(instance, NETWORK_RECHECK).await {
                        return Err(EstablishError::Shutdown);
                    }
                }
            }

            // (B) Admission.
            State::CheckAccount => match instance.gate.check(OVERLAY_FEATURE).await {
                Ok(()) => {
                    let (next, _) = step(state, Signal::Proceed);
                    state = next;
                }
                Err(e) => {
                    let _ = step(state, Signal::AccountRejected);
                    return Err(EstablishError::Account(e));
                }
            },

            // (C) Candidate selection, with one bootstrap-and-retry on a
            // stale topology.
            State::SelectEntry => {
                let policy = instance.policy();
                let (loc4, loc6) = instance.netenv.internet_location().await;
                let input = SelectInput {
                    policy: &policy,
                    loc4,
                    loc6,
                    hops_required: instance.config.hops,
                    use_community: instance.config.use_community(),
                };
                match select_entry(&instance.map, &input) {
                    Ok(list) => {
                        *stale_failures = 0;
                        debug!(candidates = list.len(), "entry candidates selected");
                        candidates = list;
                        let (next, _) = step(state, Signal::Proceed);
                        state = next;
                    }
                    Err(SelectError::AllCandidatesExcluded) => {
                        let _ = step(state, Signal::SelectFailed);
                        return Err(EstablishError::Policy);
                    }
                    Err(stale) => {
                        if !bootstrap_tried {
                            bootstrap_tried = true;
                            match instance.bootstrap_map().await {
                                Ok(inserted) => {
                                    debug!(inserted, "bootstrap triggered by {stale}");
                                    continue;
                                }
                                Err(e) => warn!(err = %e, "bootstrap failed"),
                            }
                        }
                        *stale_failures += 1;
                        let _ = step(state, Signal::SelectFailed);
                        return Err(EstablishError::TopologyStale(stale, *stale_failures));
                    }
                }
            }

            // (D) Candidate iteration.
            State::OpenSession => {
                let scope = instance.shutdown.child_token();
                match connect::open_session(instance, std::mem::take(&mut candidates), &scope)
                    .await
                {
                    Ok(open) => {
                        opened = Some((open, scope));
                        let (next, _) = step(state, Signal::Proceed);
                        state = next;
                    }
                    Err(ConnectError::Cancelled) => {
                        scope.cancel();
                        let _ = step(state, Signal::ConnectFailed);
                        return Err(EstablishError::Shutdown);
                    }
                    Err(e) => {
                        scope.cancel();
                        let _ = step(state, Signal::ConnectFailed);
                        return Err(EstablishError::Connect(e));
                    }
                }
            }

            // (E) Publish and arm.
            State::ArmStatus => {
                let Some((open, scope)) = opened.take() else {
                    return Err(EstablishError::Shutdown);
                };
                return Ok(arm(instance, open, scope));
            }

            State::Ready | State::Teardown => return Err(EstablishError::Shutdown),
        }
    }
}

/// Publish the connected status, point the Home, and start gossip.
fn arm(instance: &Arc<Instance>, open: OpenedSession, scope: CancellationToken) -> Established {
    let session_id = Uuid::new_v4();
    instance.map.set_home(open.hub.id.clone(), session_id);
    if !instance.gate.consume_token() {
        // The gate admitted us moments ago; an empty ledger here only
        // means the refill raced. The session proceeds.
        debug!("no token left to consume at arm time");
    }

    instance.status.set_connected(connected_info(
        open.hub.id.clone(),
        open.hub.announcement.name.clone(),
        open.ip,
        open.endpoint.protocol.to_string(),
        open.hub.announcement.country.clone(),
    ));

    let gossip_task = tokio::spawn(Arc::clone(&instance.gossip).run_session(
        session_id,
        Arc::clone(&open.terminal),
        open.events,
        scope.clone(),
    ));

    // The handshake just completed, which is as good as a ping.
    instance.health.record_check();

    let _ = step(State::ArmStatus, Signal::Proceed);
    Established { session_id, hub: open.hub, terminal: open.terminal, scope, gossip_task }
}

/// The maintenance loop: select on every wake source, drain the
/// level-triggered ones, run (F) health-check, re-verify the account.
pub async fn maintain(instance: &Arc<Instance>, session: &Established) -> MaintainExit {
    let mut errors_rx = session.terminal.errors();

    loop {
        tokio::select! {
            _ = instance.shutdown.cancelled() => {
                let _ = step(State::Ready, Signal::Shutdown);
                return MaintainExit::Shutdown;
            }
            _ = instance.health.tick() => {}
            _ = instance.health.triggered() => {
                debug!("manual health trigger");
                let _ = step(State::Ready, Signal::ManualTrigger);
            }
            _ = instance.netenv.network_changed().wait() => {
                let _ = step(State::Ready, Signal::NetworkChanged);
            }
            error = errors_rx.recv() => {
                match error {
                    Ok(e) => {
                        // The failure shows up in the health check below.
                        warn!(err = %e, "terminal reported a transport error");
                        let _ = step(State::Ready, Signal::TransportError);
                    }
                    // Channel gone: the terminal is already dead.
                    Err(_) => return MaintainExit::Reconnect,
                }
            }
        }

        // Drain the level-triggered flag so a change that fired during
        // the select does not cause a second wake-up.
        if instance.netenv.network_changed().consume() {
            debug!("network changed, re-running health check");
        }

        // (F) health-check.
        match session.terminal.ping().await {
            Ok(rtt) => {
                instance.health.record_check();
                instance.status.record_rtt(rtt.as_millis() as u64);
                let _ = step(State::Ready, Signal::HealthOk);

                // (B') the account can lapse while connected.
                if let Err(e) = instance.gate.check(OVERLAY_FEATURE).await {
                    warn!(err = %e, "account lapsed while connected");
                    let _ = step(State::Ready, Signal::AccountRejected);
                    return MaintainExit::Reconnect;
                }
            }
            Err(e) => {
                if instance.health.slept_since_last_check() {
                    // Wake-up from sleep: the failure says nothing about
                    // the hub, so nobody gets penalized.
                    info!("ping failed after suspected machine sleep");
                    instance.map.clear_failing_all();
                } else {
                    warn!(hub = %session.hub.id, err = %e, "health check failed");
                    instance
                        .map
                        .mark_failing(&session.hub.id, tokio::time::Instant::now() + FAILING_DURATION);
                }
                let _ = step(State::Ready, Signal::HealthFailed);
                return MaintainExit::Reconnect;
            }
        }
    }
}

/// Release everything the session owns.
pub async fn teardown(instance: &Arc<Instance>, session: Established) {
    debug!(session = %session.session_id, "tearing down session");
    session.terminal.stop("teardown").await;
    session.scope.cancel();
    if tokio::time::timeout(TEARDOWN_TIMEOUT, session.gossip_task).await.is_err() {
        warn!("gossip task did not stop in time");
    }
    instance.map.clear_home();
    let _ = step(State::Teardown, Signal::Proceed);
}

/// Map an establish failure to status and keyed notifications.
fn report_failure(instance: &Arc<Instance>, error: &EstablishError) {
    match error {
        EstablishError::Account(e) => {
            warn!(err = %e, "account gate refused admission");
            instance.status.set_failed(e.to_string());
            let (id, title, action) = match e {
                GateError::LoginRequired => {
                    (ids::LOGIN_REQUIRED, "Login required", Some("log in to your account"))
                }
                GateError::NotEligible(_) => {
                    (ids::ACCOUNT_NOT_ELIGIBLE, "Account not eligible", None)
                }
                GateError::PackageLacksFeature(_) => (
                    ids::PACKAGE_LACKS_FEATURE,
                    "Plan does not include the overlay",
                    Some("upgrade your plan"),
                ),
                GateError::TokensExhausted => (
                    ids::TOKENS_EXHAUSTED,
                    "No connection tokens left",
                    Some("check your account"),
                ),
            };
            instance.notifier.raise(Notification {
                id: id.into(),
                title: title.into(),
                message: e.to_string(),
                action: action.map(str::to_owned),
            });
        }
        EstablishError::Policy => {
            warn!("every home hub is excluded by policy");
            instance.status.set_failed("every home hub is excluded by the current settings");
            instance.notifier.raise(Notification {
                id: ids::ALL_HOME_HUBS_EXCLUDED.into(),
                title: "No home hub allowed".into(),
                message: "Your entry policy excludes every available hub.".into(),
                action: Some("widen the home hub policy".into()),
            });
        }
        EstablishError::TopologyStale(kind, failures) => {
            warn!(%kind, failures, "topology is stale");
            if *failures >= 2 {
                instance.status.set_failed("the overlay map looks stale");
                instance.notifier.raise(Notification {
                    id: ids::MAP_REINIT_SUGGESTED.into(),
                    title: "Overlay map looks stale".into(),
                    message: "Bootstrapping did not produce a usable entry hub.".into(),
                    action: Some("re-initialize the overlay map".into()),
                });
            }
        }
        EstablishError::Connect(e) => {
            warn!(err = %e, "connect cycle failed");
            instance.notifier.raise(Notification {
                id: ids::CONNECTION_TROUBLE.into(),
                title: "Connection trouble".into(),
                message: "The overlay entry could not be reached; retrying.".into(),
                action: None,
            });
        }
        EstablishError::Shutdown => {}
    }
}

/// A successful connect clears every connect-related notification.
fn resolve_connect_notifications(instance: &Arc<Instance>) {
    for id in [
        ids::ALL_HOME_HUBS_EXCLUDED,
        ids::MAP_REINIT_SUGGESTED,
        ids::LOGIN_REQUIRED,
        ids::ACCOUNT_NOT_ELIGIBLE,
        ids::PACKAGE_LACKS_FEATURE,
        ids::TOKENS_EXHAUSTED,
        ids::CONNECTION_TROUBLE,
    ] {
        instance.notifier.resolve(id);
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
