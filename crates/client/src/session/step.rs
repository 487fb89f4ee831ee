// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session state machine as a pure transition function.
//!
//! The driver loop in [`super::run`] performs the I/O for the current
//! state, condenses the outcome into a [`Signal`], and applies
//! `step(state, signal)` to learn where to go and how. Keeping the
//! table pure makes every transition testable without sockets.

/// Where the session manager currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// (A) Wait for basic connectivity.
    CheckNetwork,
    /// (B) Admission check against the account gate.
    CheckAccount,
    /// (C) Ask the navigator for candidates.
    SelectEntry,
    /// (D) Candidate iteration until a terminal authenticates.
    OpenSession,
    /// (E) Publish the connected status.
    ArmStatus,
    /// The maintenance loop.
    Ready,
    /// Session resources are being released.
    Teardown,
}

/// Condensed outcome of the I/O performed for a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// The step succeeded.
    Proceed,
    /// No connectivity; do not advance.
    NetworkDown,
    /// The gate refused admission.
    AccountRejected,
    /// The navigator produced no candidates.
    SelectFailed,
    /// Every candidate attempt failed.
    ConnectFailed,
    /// A ping completed.
    HealthOk,
    /// A ping failed.
    HealthFailed,
    /// The terminal reported a transport error.
    TransportError,
    /// The network-changed flag fired.
    NetworkChanged,
    /// The manual trigger fired.
    ManualTrigger,
    /// The shutdown context was cancelled.
    Shutdown,
}

/// What the driver does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Carry on with the new state immediately.
    Advance,
    /// Stay on this path, but pause briefly before retrying.
    Retry,
    /// Tear the session down and start over from the entry point.
    Reconnect,
    /// Stop for good.
    Shutdown,
}

/// The transition table. Transitions only move forward; recovery always
/// goes through [`State::Teardown`] into a fresh cycle.
pub fn step(state: State, signal: Signal) -> (State, Verdict) {
    use Signal as S;
    use State as St;
    use Verdict as V;

    if signal == S::Shutdown {
        return (St::Teardown, V::Shutdown);
    }

    match (state, signal) {
        (St::CheckNetwork, S::Proceed) => (St::CheckAccount, V::Advance),
        (St::CheckNetwork, S::NetworkDown) => (St::CheckNetwork, V::Retry),

        (St::CheckAccount, S::Proceed) => (St::SelectEntry, V::Advance),
        (St::CheckAccount, S::AccountRejected) => (St::Teardown, V::Reconnect),

        (St::SelectEntry, S::Proceed) => (St::OpenSession, V::Advance),
        (St::SelectEntry, S::SelectFailed) => (St::Teardown, V::Reconnect),

        (St::OpenSession, S::Proceed) => (St::ArmStatus, V::Advance),
        (St::OpenSession, S::ConnectFailed) => (St::Teardown, V::Reconnect),

        (St::ArmStatus, S::Proceed) => (St::Ready, V::Advance),

        // Every maintenance signal re-runs the health check; only the
        // check's own failure (or a lapsed account) leaves ready.
        (St::Ready, S::HealthOk | S::NetworkChanged | S::ManualTrigger | S::TransportError) => {
            (St::Ready, V::Advance)
        }
        (St::Ready, S::HealthFailed | S::AccountRejected) => (St::Teardown, V::Reconnect),

        (St::Teardown, _) => (St::CheckNetwork, V::Retry),

        // Anything else is a programming error in the driver; recover by
        // starting a fresh cycle rather than wedging.
        _ => (St::Teardown, V::Reconnect),
    }
}

#[cfg(test)]
#[path = "step_tests.rs"]
mod tests;
