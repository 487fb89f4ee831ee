// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sleep-aware health ticker for the session maintenance loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Normal spacing between health checks.
pub const HEALTH_TICK: Duration = Duration::from_secs(60);

/// Spacing while the machine reports it is about to sleep / on battery
/// saver.
pub const SLEEP_TICK: Duration = Duration::from_secs(300);

/// How long one ping may take.
pub const PING_TIMEOUT: Duration = Duration::from_secs(15);

/// Gap after which a failed ping is treated as a wake-up from sleep
/// rather than a hub failure.
pub fn sleep_threshold() -> Duration {
    HEALTH_TICK + SLEEP_TICK + 2 * PING_TIMEOUT
}

/// Ticker with two periods and a manual trigger.
pub struct HealthMonitor {
    sleeping: AtomicBool,
    trigger: Notify,
    last_check: Mutex<Option<Instant>>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self { sleeping: AtomicBool::new(false), trigger: Notify::new(), last_check: Mutex::new(None) }
    }

    /// Toggle the slow period. Driven by the external power hint.
    pub fn set_sleeping(&self, sleeping: bool) {
        self.sleeping.store(sleeping, Ordering::Release);
    }

    pub fn period(&self) -> Duration {
        if self.sleeping.load(Ordering::Acquire) {
            SLEEP_TICK
        } else {
            HEALTH_TICK
        }
    }

    /// Wake the maintenance loop immediately.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Resolves on the next manual trigger.
    pub async fn triggered(&self) {
        self.trigger.notified().await;
    }

    /// Resolves after the current period. The period is re-sampled on
    /// every call, so a sleep-hint toggle takes effect one tick later.
    pub async fn tick(&self) {
        tokio::time::sleep(self.period()).await;
    }

    /// Record a completed health check.
    pub fn record_check(&self) {
        *self.last_check.lock() = Some(Instant::now());
    }

    pub fn last_check(&self) -> Option<Instant> {
        *self.last_check.lock()
    }

    /// Whether the gap since the last completed check looks like a
    /// machine sleep rather than a network problem.
    pub fn slept_since_last_check(&self) -> bool {
        match self.last_check() {
            Some(at) => at.elapsed() > sleep_threshold(),
            None => false,
        }
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
