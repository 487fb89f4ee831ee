// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User policy for entry selection: an ordered allow/deny rule list.
//!
//! Rules are evaluated top to bottom; the first rule whose selector
//! matches a hub decides. A hub no rule matches is allowed.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use regex::Regex;

use crate::node::Hub;

/// What a matching rule does with the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

/// What a rule matches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// `*`: every hub.
    Any,
    /// Two-letter ISO country code, e.g. `DE`.
    Country(String),
    /// Continent code, written `C:EU`.
    Continent(String),
    /// Autonomous system, written `AS64496`.
    Asn(u32),
    /// Address block, e.g. `192.0.2.0/24` or `2001:db8::/32`.
    Cidr(Cidr),
    /// Verified owner, written `owner:Example Networks`.
    Owner(String),
    /// A single hub, written `hub:<id>`.
    Hub(String),
}

/// One parsed rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub effect: Effect,
    pub selector: Selector,
}

/// Rule-list syntax error, with the offending input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyError {
    pub rule: String,
    pub reason: String,
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bad policy rule {:?}: {}", self.rule, self.reason)
    }
}

impl std::error::Error for PolicyError {}

/// An address block with prefix-length containment checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

impl Cidr {
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = if self.prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(self.prefix)) };
                (u32::from(net) & mask) == (u32::from(*ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask =
                    if self.prefix == 0 { 0 } else { u128::MAX << (128 - u32::from(self.prefix)) };
                (u128::from(net) & mask) == (u128::from(*ip) & mask)
            }
            _ => false,
        }
    }
}

impl FromStr for Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s.split_once('/').ok_or("missing prefix length")?;
        let addr: IpAddr = addr.parse().map_err(|_| "bad address")?;
        let prefix: u8 = prefix.parse().map_err(|_| "bad prefix length")?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(format!("prefix length {prefix} exceeds /{max}"));
        }
        Ok(Self { addr, prefix })
    }
}

/// The ordered rule list applied to entry candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    rules: Vec<Rule>,
}

impl Policy {
    /// Parse one rule per input line: `allow <selector>` or `deny <selector>`.
    pub fn parse<S: AsRef<str>>(lines: &[S]) -> Result<Self, PolicyError> {
        let country = compile(r"^[A-Z]{2}$")?;
        let continent = compile(r"^C:[A-Z]{2}$")?;
        let asn = compile(r"^AS(\d{1,10})$")?;

        let mut rules = Vec::with_capacity(lines.len());
        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (verb, rest) = line.split_once(char::is_whitespace).ok_or_else(|| PolicyError {
                rule: line.to_owned(),
                reason: "expected `allow <selector>` or `deny <selector>`".into(),
            })?;
            let effect = match verb {
                "allow" => Effect::Allow,
                "deny" => Effect::Deny,
                other => {
                    return Err(PolicyError {
                        rule: line.to_owned(),
                        reason: format!("unknown verb {other:?}"),
                    })
                }
            };

            let rest = rest.trim();
            let selector = if rest == "*" {
                Selector::Any
            } else if let Some(owner) = rest.strip_prefix("owner:") {
                Selector::Owner(owner.trim().to_owned())
            } else if let Some(id) = rest.strip_prefix("hub:") {
                Selector::Hub(id.trim().to_owned())
            } else if continent.is_match(rest) {
                Selector::Continent(rest[2..].to_owned())
            } else if country.is_match(rest) {
                Selector::Country(rest.to_owned())
            } else if let Some(caps) = asn.captures(rest) {
                let number = caps[1].parse().map_err(|_| PolicyError {
                    rule: line.to_owned(),
                    reason: "AS number out of range".into(),
                })?;
                Selector::Asn(number)
            } else if rest.contains('/') {
                let cidr = rest.parse().map_err(|e| PolicyError {
                    rule: line.to_owned(),
                    reason: e,
                })?;
                Selector::Cidr(cidr)
            } else {
                return Err(PolicyError {
                    rule: line.to_owned(),
                    reason: "unrecognized selector".into(),
                });
            };

            rules.push(Rule { effect, selector });
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// First-match-wins verdict; hubs nothing matches are allowed.
    pub fn permits(&self, hub: &Hub) -> bool {
        for rule in &self.rules {
            if rule.selector.matches(hub) {
                return rule.effect == Effect::Allow;
            }
        }
        true
    }
}

impl Selector {
    pub fn matches(&self, hub: &Hub) -> bool {
        match self {
            Self::Any => true,
            Self::Country(code) => hub.announcement.country.eq_ignore_ascii_case(code),
            Self::Continent(code) => hub.announcement.continent.eq_ignore_ascii_case(code),
            Self::Asn(number) => hub.announcement.asn == *number,
            Self::Cidr(cidr) => hub.addresses().iter().any(|ip| cidr.contains(ip)),
            Self::Owner(owner) => !owner.is_empty() && hub.announcement.owner == *owner,
            Self::Hub(id) => hub.id.as_str() == id,
        }
    }
}

fn compile(pattern: &str) -> Result<Regex, PolicyError> {
    Regex::new(pattern).map_err(|e| PolicyError { rule: pattern.to_owned(), reason: e.to_string() })
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
