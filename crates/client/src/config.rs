// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashSet;
use std::path::PathBuf;

use clap::Parser;

use crate::policy::Policy;

/// Overlay feature the account plan must include.
pub const OVERLAY_FEATURE: &str = "overlay";

/// Client control plane for the Seaward privacy overlay.
#[derive(Debug, Clone, Parser)]
#[command(name = "seaward", version, about)]
pub struct Config {
    /// Single bootstrap hub, e.g. "tcp://203.0.113.7:717#<hub-id>".
    #[arg(long, env = "SEAWARD_BOOTSTRAP_HUB")]
    pub bootstrap_hub: Option<String>,

    /// Bootstrap list file (JSON, or YAML by extension).
    #[arg(long, env = "SEAWARD_BOOTSTRAP_FILE")]
    pub bootstrap_file: Option<PathBuf>,

    /// Named topology map to use.
    #[arg(long = "spn-map", env = "SEAWARD_MAP", default_value = "main")]
    pub map_name: String,

    /// Local sluice rendezvous port.
    #[arg(long, env = "SEAWARD_SLUICE_PORT", default_value = "717")]
    pub sluice_port: u16,

    /// State snapshot file for identity and map cache.
    #[arg(long, env = "SEAWARD_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Home hub policy rule (repeatable; evaluated top to bottom).
    #[arg(long = "home-policy", env = "SEAWARD_HOME_POLICY", value_delimiter = ';')]
    pub home_policy: Vec<String>,

    /// Allow community (unverified-owner) hubs as entry.
    #[arg(long, env = "SEAWARD_USE_COMMUNITY")]
    pub use_community_nodes: Option<bool>,

    /// Tunnel length the client builds through the overlay.
    #[arg(long, env = "SEAWARD_HOPS", default_value = "3")]
    pub hops: u8,

    /// Verified owners counted as trusted (comma separated).
    #[arg(long, env = "SEAWARD_TRUSTED_OWNERS", value_delimiter = ',')]
    pub trusted_owners: Vec<String>,

    /// Licensing authority base URL.
    #[arg(long, env = "SEAWARD_AUTHORITY_URL")]
    pub authority_url: Option<String>,

    /// Bearer token for the licensing authority.
    #[arg(long, env = "SEAWARD_AUTHORITY_TOKEN")]
    pub authority_token: Option<String>,

    /// Device name reported to the overlay.
    #[arg(long, env = "SEAWARD_DEVICE_NAME")]
    pub device_name: Option<String>,

    /// Log format (json or text).
    #[arg(long, env = "SEAWARD_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "SEAWARD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(ref uri) = self.bootstrap_hub {
            crate::bootstrap::parse_bootstrap_uri(uri)?;
        }
        self.policy().map_err(|e| anyhow::anyhow!("{e}"))?;
        if self.hops == 0 {
            anyhow::bail!("--hops must be at least 1");
        }
        if let Some(ref url) = self.authority_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("--authority-url must be an http(s) URL");
            }
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("unknown log format: {other}"),
        }
        Ok(())
    }

    /// The parsed home hub policy.
    pub fn policy(&self) -> Result<Policy, crate::policy::PolicyError> {
        Policy::parse(&self.home_policy)
    }

    pub fn use_community(&self) -> bool {
        self.use_community_nodes.unwrap_or(true)
    }

    pub fn trusted_owner_set(&self) -> HashSet<String> {
        self.trusted_owners.iter().filter(|o| !o.is_empty()).cloned().collect()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
