// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Account and token gating: the admission precondition for connecting.
//!
//! The gate caches the last-known user snapshot and a token ledger so the
//! client keeps working through authority outages as long as tokens
//! remain. Refreshes are throttled and single-flight so flapping
//! eligibility checks produce one authority call, not a stampede.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::node::epoch_ms;

/// Minimum spacing between authority refreshes while ineligible.
pub const REFRESH_MIN_INTERVAL: Duration = Duration::from_secs(60);

/// Refill the ledger once it drops below this many tokens.
const TOKEN_LOW_WATER: u32 = 4;

/// How many tokens one refill requests.
const TOKEN_DRAW: u32 = 16;

/// Why admission was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// No user is known and the authority wants credentials.
    LoginRequired,
    /// The account exists but is not in an approved state. Carries the
    /// authority's human-readable reason when it sent one.
    NotEligible(String),
    /// The current plan does not include the requested feature.
    PackageLacksFeature(String),
    /// No tokens remain and none could be fetched.
    TokensExhausted,
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoginRequired => f.write_str("login required"),
            Self::NotEligible(msg) if msg.is_empty() => f.write_str("account is not eligible"),
            Self::NotEligible(msg) => write!(f, "account is not eligible: {msg}"),
            Self::PackageLacksFeature(feature) => {
                write!(f, "current package does not include {feature}")
            }
            Self::TokensExhausted => f.write_str("no connection tokens left"),
        }
    }
}

impl std::error::Error for GateError {}

/// Account state as reported by the licensing authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserState {
    Approved,
    Suspended,
    LoggedOut,
    Unknown,
}

/// Plan the subscription is on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    #[serde(default)]
    pub features: Vec<String>,
}

/// Authority-issued user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub state: UserState,
    /// Unix milliseconds; `None` means no active subscription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_end: Option<u64>,
    pub plan: Plan,
    /// Human-readable note from the authority (suspension reason etc).
    #[serde(default)]
    pub message: String,
}

impl UserRecord {
    /// Eligibility for one feature: approved, unexpired, and the plan
    /// enumerates the feature.
    pub fn may_use(&self, feature: &str) -> bool {
        self.state == UserState::Approved
            && self.subscription_end.map(|end| end > epoch_ms()).unwrap_or(false)
            && self.plan.features.iter().any(|f| f == feature)
    }
}

/// Opaque token ledger, split by zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLedger {
    pub regular: u32,
    #[serde(default)]
    pub zones: HashMap<String, u32>,
}

/// Observable account snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub user: Option<UserRecord>,
    pub tokens: TokenLedger,
}

/// Remote licensing authority contract.
#[async_trait::async_trait]
pub trait AccountAuthority: Send + Sync {
    /// Fetch the current user record.
    async fn get_user(&self) -> anyhow::Result<UserRecord>;
    /// Force a server-side refresh, then fetch.
    async fn update_user(&self) -> anyhow::Result<UserRecord>;
    /// Draw `count` fresh tokens; returns how many were issued.
    async fn update_tokens(&self, count: u32) -> anyhow::Result<u32>;
    /// Remaining server-side token balance for a zone.
    async fn get_token_amount(&self, zone: &str) -> anyhow::Result<u32>;
}

struct GateInner {
    user: Option<UserRecord>,
    tokens: TokenLedger,
    last_refresh: Option<Instant>,
}

/// Admission gate over the authority, with caching and throttling.
pub struct AccountGate {
    authority: Arc<dyn AccountAuthority>,
    inner: parking_lot::Mutex<GateInner>,
    /// Serializes refreshes: concurrent ineligibility checks collapse to
    /// one authority call.
    refresh_flight: tokio::sync::Mutex<()>,
}

impl AccountGate {
    pub fn new(authority: Arc<dyn AccountAuthority>) -> Self {
        Self {
            authority,
            inner: parking_lot::Mutex::new(GateInner {
                user: None,
                tokens: TokenLedger::default(),
                last_refresh: None,
            }),
            refresh_flight: tokio::sync::Mutex::new(()),
        }
    }

    /// Seed the ledger, e.g. from persisted state.
    pub fn seed_tokens(&self, tokens: TokenLedger) {
        self.inner.lock().tokens = tokens;
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        let inner = self.inner.lock();
        AccountSnapshot { user: inner.user.clone(), tokens: inner.tokens.clone() }
    }

    /// Cached eligibility check; `false` when no user is known.
    pub fn may_use(&self, feature: &str) -> bool {
        self.inner.lock().user.as_ref().map(|u| u.may_use(feature)).unwrap_or(false)
    }

    /// Spend one token for a session establishment.
    pub fn consume_token(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.tokens.regular == 0 {
            return false;
        }
        inner.tokens.regular -= 1;
        true
    }

    /// The admission precondition run before every connect.
    ///
    /// Refreshes the user snapshot when it is missing or ineligible (at
    /// most once per [`REFRESH_MIN_INTERVAL`]), verifies feature access,
    /// and tops up the token ledger. An unreachable authority is
    /// tolerated while cached tokens remain.
    pub async fn check(&self, feature: &str) -> Result<(), GateError> {
        if !self.may_use(feature) {
            self.refresh(false).await;
        }

        let user = self.inner.lock().user.clone();
        let user = user.ok_or(GateError::LoginRequired)?;
        if user.state != UserState::Approved
            || !user.subscription_end.map(|end| end > epoch_ms()).unwrap_or(false)
        {
            return Err(GateError::NotEligible(user.message));
        }
        if !user.plan.features.iter().any(|f| f == feature) {
            return Err(GateError::PackageLacksFeature(feature.to_owned()));
        }

        self.ensure_tokens().await
    }

    /// Refresh the user snapshot from the authority, throttled unless
    /// `force`. Failures keep the cached record.
    pub async fn refresh(&self, force: bool) {
        let _flight = self.refresh_flight.lock().await;

        if !force {
            let last = self.inner.lock().last_refresh;
            if let Some(last) = last {
                if last.elapsed() < REFRESH_MIN_INTERVAL {
                    return;
                }
            }
        }

        let result = if force { self.authority.update_user().await } else { self.authority.get_user().await };
        let mut inner = self.inner.lock();
        inner.last_refresh = Some(Instant::now());
        match result {
            Ok(user) => {
                debug!(user = %user.username, state = ?user.state, "account snapshot refreshed");
                inner.user = Some(user);
            }
            Err(e) => {
                warn!(err = %e, "account refresh failed, keeping cached snapshot");
            }
        }
    }

    async fn ensure_tokens(&self) -> Result<(), GateError> {
        let regular = self.inner.lock().tokens.regular;
        if regular >= TOKEN_LOW_WATER {
            return Ok(());
        }

        match self.authority.update_tokens(TOKEN_DRAW).await {
            Ok(issued) => {
                let total = {
                    let mut inner = self.inner.lock();
                    inner.tokens.regular += issued;
                    inner.tokens.regular
                };
                if total == 0 {
                    return Err(GateError::TokensExhausted);
                }
                debug!(issued, "token ledger refilled");
                Ok(())
            }
            Err(e) => {
                if regular > 0 {
                    debug!(err = %e, remaining = regular, "token refill failed, cached tokens remain");
                    Ok(())
                } else {
                    warn!(err = %e, "token refill failed with an empty ledger");
                    Err(GateError::TokensExhausted)
                }
            }
        }
    }
}

/// HTTP client for the licensing authority.
pub struct AuthorityClient {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl AuthorityClient {
    pub fn new(base_url: String, auth_token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { base_url: base_url.trim_end_matches('/').to_owned(), auth_token, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn fetch_user(&self, refresh: bool) -> anyhow::Result<UserRecord> {
        let mut req = self.client.get(self.url("/v1/user"));
        if refresh {
            req = req.query(&[("refresh", "1")]);
        }
        let resp = self.apply_auth(req).send().await?;
        let user = resp.error_for_status()?.json().await?;
        Ok(user)
    }
}

#[async_trait::async_trait]
impl AccountAuthority for AuthorityClient {
    async fn get_user(&self) -> anyhow::Result<UserRecord> {
        self.fetch_user(false).await
    }

    async fn update_user(&self) -> anyhow::Result<UserRecord> {
        self.fetch_user(true).await
    }

    async fn update_tokens(&self, count: u32) -> anyhow::Result<u32> {
        let req = self
            .client
            .post(self.url("/v1/tokens/draw"))
            .json(&serde_json::json!({ "count": count }));
        let resp = self.apply_auth(req).send().await?.error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        let issued = body["issued"]
            .as_u64()
            .ok_or_else(|| anyhow::anyhow!("authority response missing `issued`"))?;
        Ok(issued as u32)
    }

    async fn get_token_amount(&self, zone: &str) -> anyhow::Result<u32> {
        let req = self.client.get(self.url(&format!("/v1/tokens/{zone}")));
        let resp = self.apply_auth(req).send().await?.error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        let amount = body["amount"]
            .as_u64()
            .ok_or_else(|| anyhow::anyhow!("authority response missing `amount`"))?;
        Ok(amount as u32)
    }
}

#[cfg(test)]
#[path = "account_tests.rs"]
mod tests;
