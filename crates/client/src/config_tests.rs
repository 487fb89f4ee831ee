// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use super::Config;

fn parse(args: &[&str]) -> Config {
    Config::parse_from(args)
}

#[test]
fn defaults_are_sane() -> anyhow::Result<()> {
    let config = parse(&["seaward"]);
    config.validate()?;
    assert_eq!(config.map_name, "main");
    assert_eq!(config.sluice_port, 717);
    assert_eq!(config.hops, 3);
    assert!(config.use_community());
    assert!(config.policy()?.is_empty());
    Ok(())
}

#[test]
fn bootstrap_hub_uri_is_validated() {
    let config = parse(&["seaward", "--bootstrap-hub", "tcp://203.0.113.7:717#abcd"]);
    config.validate().unwrap();

    let config = parse(&["seaward", "--bootstrap-hub", "not-a-uri"]);
    assert!(config.validate().is_err());
}

#[test]
fn policy_rules_are_validated() {
    let config = parse(&["seaward", "--home-policy", "deny DE;allow *"]);
    config.validate().unwrap();
    assert_eq!(config.policy().unwrap().rules().len(), 2);

    let config = parse(&["seaward", "--home-policy", "frobnicate DE"]);
    assert!(config.validate().is_err());
}

#[test]
fn zero_hops_is_rejected() {
    let config = parse(&["seaward", "--hops", "0"]);
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("--hops"), "unexpected error: {err}");
}

#[test]
fn authority_url_must_be_http() {
    let config = parse(&["seaward", "--authority-url", "https://authority.example"]);
    config.validate().unwrap();

    let config = parse(&["seaward", "--authority-url", "gopher://nope"]);
    assert!(config.validate().is_err());
}

#[test]
fn trusted_owner_set_is_deduplicated_and_nonempty() {
    let config =
        parse(&["seaward", "--trusted-owners", "Example Networks,Acme,Example Networks,"]);
    let owners = config.trusted_owner_set();
    assert_eq!(owners.len(), 2);
    assert!(owners.contains("Acme"));
}

#[test]
fn log_format_is_validated() {
    let config = parse(&["seaward", "--log-format", "xml"]);
    assert!(config.validate().is_err());
}
