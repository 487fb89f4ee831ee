// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashSet;
use std::io::Write;

use super::*;
use crate::node::TransportKind;

#[test]
fn uri_parses_transport_address_and_id() {
    let entry = parse_bootstrap_uri("tcp://203.0.113.7:717#abcd1234").unwrap();
    assert_eq!(entry.id, "abcd1234");
    assert_eq!(entry.transports, vec!["tcp:717"]);
    assert_eq!(entry.ipv4, Some("203.0.113.7".parse().unwrap()));

    let v6 = parse_bootstrap_uri("ws://[2001:db8::7]:80#ffee").unwrap();
    assert_eq!(v6.ipv6, Some("2001:db8::7".parse().unwrap()));
    assert_eq!(v6.transports, vec!["ws:80"]);
}

#[yare::parameterized(
    no_fragment = { "tcp://203.0.113.7:717" },
    empty_id = { "tcp://203.0.113.7:717#" },
    no_scheme = { "203.0.113.7:717#abcd" },
    hostname = { "tcp://hub.example.org:717#abcd" },
)]
fn bad_uris_are_rejected(uri: &str) {
    assert!(parse_bootstrap_uri(uri).is_err(), "accepted {uri:?}");
}

#[test]
fn apply_seeds_the_map_with_low_timestamps() {
    let map = Map::new("main");
    let entry = parse_bootstrap_uri("tcp://203.0.113.7:717#seed-hub").unwrap();
    assert_eq!(apply(&map, vec![entry], &HashSet::new()), 1);

    let hub = map.get(&HubId::from("seed-hub")).unwrap();
    assert_eq!(hub.announcement.timestamp, 1);
    assert_eq!(hub.announcement.transports[0].protocol, TransportKind::Tcp);
    assert!(hub.reachable());
}

#[test]
fn invalid_entries_are_skipped_not_fatal() {
    let map = Map::new("main");
    let mut no_addr = parse_bootstrap_uri("tcp://203.0.113.7:717#one").unwrap();
    no_addr.ipv4 = None;
    let good = parse_bootstrap_uri("tcp://203.0.113.8:717#two").unwrap();

    assert_eq!(apply(&map, vec![no_addr, good], &HashSet::new()), 1);
    assert!(map.get(&HubId::from("one")).is_none());
    assert!(map.get(&HubId::from("two")).is_some());
}

#[tokio::test]
async fn json_file_roundtrip() {
    let entries = vec![BootstrapEntry {
        id: "json-hub".into(),
        name: Some("json hub".into()),
        transports: vec!["tcp:717".into(), "ws:80/entry".into()],
        ipv4: Some("203.0.113.9".parse().unwrap()),
        ipv6: None,
        country: Some("DE".into()),
        continent: Some("EU".into()),
        asn: Some(64496),
        owner: None,
        public_key: None,
        coords: None,
    }];

    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(serde_json::to_string(&entries).unwrap().as_bytes()).unwrap();

    let loaded = load_file(file.path()).await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, "json-hub");
    assert_eq!(loaded[0].transports.len(), 2);
}

#[tokio::test]
async fn yaml_file_is_detected_by_extension() {
    let yaml = r#"
- id: yaml-hub
  transports: ["tcp:717"]
  ipv4: 203.0.113.10
  country: SE
"#;
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let loaded = load_file(file.path()).await.unwrap();
    assert_eq!(loaded[0].id, "yaml-hub");
    assert_eq!(loaded[0].country.as_deref(), Some("SE"));
}

#[test]
fn wildcard_and_ws_endpoint_strings_parse() {
    let ws: crate::node::TransportEndpoint = "ws:80/entry".parse().unwrap();
    assert_eq!(ws.protocol, TransportKind::Ws);
    assert_eq!(ws.port, 80);
    assert_eq!(ws.path.as_deref(), Some("/entry"));

    assert!("quic:443".parse::<crate::node::TransportEndpoint>().is_err());
}
