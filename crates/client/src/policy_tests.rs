// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::node::{HubAnnouncement, HubId, TransportEndpoint, TransportKind};

fn hub(country: &str, asn: u32, owner: &str) -> Hub {
    Hub {
        id: HubId::from("hub-under-test"),
        announcement: HubAnnouncement {
            public_key: "AAAA".into(),
            name: "hub".into(),
            transports: vec![TransportEndpoint {
                protocol: TransportKind::Tcp,
                port: 717,
                path: None,
            }],
            ipv4: Some("192.0.2.40".parse().unwrap()),
            ipv6: Some("2001:db8::40".parse().unwrap()),
            country: country.into(),
            continent: if country == "US" { "NA".into() } else { "EU".into() },
            asn,
            owner: owner.into(),
            coords: None,
            timestamp: 1,
        },
        status: None,
        trusted: false,
    }
}

#[yare::parameterized(
    country = { "deny DE", Selector::Country("DE".into()) },
    continent = { "allow C:EU", Selector::Continent("EU".into()) },
    asn = { "deny AS64496", Selector::Asn(64496) },
    owner = { "allow owner:Example Networks", Selector::Owner("Example Networks".into()) },
    hub_id = { "deny hub:abc123", Selector::Hub("abc123".into()) },
    any = { "deny *", Selector::Any },
)]
fn parse_selectors(line: &str, expected: Selector) {
    let policy = Policy::parse(&[line]).unwrap();
    assert_eq!(policy.rules()[0].selector, expected);
}

#[yare::parameterized(
    no_selector = { "deny" },
    unknown_verb = { "block DE" },
    three_letter_country = { "deny DEU" },
    bad_cidr = { "deny 192.0.2.0/33" },
    garbage = { "allow ???" },
)]
fn parse_rejects(line: &str) {
    assert!(Policy::parse(&[line]).is_err(), "accepted {line:?}");
}

#[test]
fn blank_lines_and_comments_are_skipped() {
    let policy = Policy::parse(&["", "# pin to Europe", "allow C:EU", "deny *"]).unwrap();
    assert_eq!(policy.rules().len(), 2);
}

#[test]
fn first_match_wins() {
    let policy = Policy::parse(&["allow DE", "deny *"]).unwrap();
    assert!(policy.permits(&hub("DE", 64496, "")));
    assert!(!policy.permits(&hub("FR", 64496, "")));
}

#[test]
fn empty_policy_allows_everything() {
    let policy = Policy::default();
    assert!(policy.permits(&hub("DE", 64496, "")));
}

#[test]
fn unmatched_hub_is_allowed() {
    let policy = Policy::parse(&["deny US"]).unwrap();
    assert!(policy.permits(&hub("DE", 64496, "")));
}

#[test]
fn cidr_rule_matches_any_announced_address() {
    let v4 = Policy::parse(&["deny 192.0.2.0/24"]).unwrap();
    assert!(!v4.permits(&hub("DE", 64496, "")));

    let v6 = Policy::parse(&["deny 2001:db8::/32"]).unwrap();
    assert!(!v6.permits(&hub("DE", 64496, "")));

    let elsewhere = Policy::parse(&["deny 198.51.100.0/24"]).unwrap();
    assert!(elsewhere.permits(&hub("DE", 64496, "")));
}

#[test]
fn owner_rule_never_matches_unverified_hubs() {
    // An empty owner string means "unverified"; an `owner:` rule with an
    // empty value must not match it.
    let policy = Policy::parse(&["deny owner:"]).unwrap();
    assert!(policy.permits(&hub("DE", 64496, "")));
}

#[test]
fn asn_rule_matches_exact_number() {
    let policy = Policy::parse(&["deny AS64496"]).unwrap();
    assert!(!policy.permits(&hub("DE", 64496, "")));
    assert!(policy.permits(&hub("DE", 64497, "")));
}

#[test]
fn cidr_containment() {
    let cidr: Cidr = "10.0.0.0/8".parse().unwrap();
    assert!(cidr.contains(&"10.200.1.1".parse().unwrap()));
    assert!(!cidr.contains(&"11.0.0.1".parse().unwrap()));
    // Family mismatch never matches.
    assert!(!cidr.contains(&"::1".parse().unwrap()));

    let zero: Cidr = "0.0.0.0/0".parse().unwrap();
    assert!(zero.contains(&"203.0.113.9".parse().unwrap()));
}
