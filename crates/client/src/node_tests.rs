// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn announcement(ts: u64) -> HubAnnouncement {
    HubAnnouncement {
        public_key: "AAAA".into(),
        name: "test-hub".into(),
        transports: vec![TransportEndpoint { protocol: TransportKind::Tcp, port: 717, path: None }],
        ipv4: Some("192.0.2.1".parse().unwrap()),
        ipv6: None,
        country: "DE".into(),
        continent: "EU".into(),
        asn: 64496,
        owner: String::new(),
        coords: None,
        timestamp: ts,
    }
}

fn hub(ts: u64) -> Hub {
    Hub { id: HubId::from("hub-1"), announcement: announcement(ts), status: None, trusted: false }
}

#[test]
fn hub_id_is_stable_and_hex() {
    let a = HubId::from_public_key(b"some-public-key");
    let b = HubId::from_public_key(b"some-public-key");
    assert_eq!(a, b);
    assert_eq!(a.as_str().len(), 32);
    assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn different_keys_yield_different_ids() {
    let a = HubId::from_public_key(b"key-one");
    let b = HubId::from_public_key(b"key-two");
    assert_ne!(a, b);
}

#[test]
fn transport_kind_round_trips_through_str() {
    for kind in [TransportKind::Tcp, TransportKind::Ws] {
        let parsed: TransportKind = kind.to_string().parse().unwrap();
        assert_eq!(parsed, kind);
    }
    assert!("carrier-pigeon".parse::<TransportKind>().is_err());
}

#[test]
fn reachable_requires_transport_and_address() {
    let mut h = hub(1_000);
    assert!(h.reachable());

    h.announcement.transports.clear();
    assert!(!h.reachable());

    let mut h = hub(1_000);
    h.announcement.ipv4 = None;
    assert!(!h.reachable());
}

#[test]
fn online_honours_offline_flag() {
    let mut h = hub(1_000);
    assert!(h.online(), "no status means not known-offline");

    h.status = Some(HubStatus { load: 10, flags: vec!["offline".into()], lanes: vec![], timestamp: 2_000 });
    assert!(!h.online());
}

#[test]
fn status_freshness_window() {
    let mut h = hub(1_000);
    assert!(!h.status_fresh(1_000), "no status is never fresh");

    h.status = Some(HubStatus { load: 0, flags: vec![], lanes: vec![], timestamp: 10_000 });
    assert!(h.status_fresh(10_000 + STATUS_LIFETIME_MS));
    assert!(!h.status_fresh(10_000 + STATUS_LIFETIME_MS + 1));
}

#[test]
fn expiry_requires_both_records_dead() {
    let now = ANNOUNCEMENT_LIFETIME_MS + 100_000;
    let mut h = hub(50_000); // announcement long dead
    assert!(h.expired(now), "announcement dead, no status");

    h.status = Some(HubStatus { load: 0, flags: vec![], lanes: vec![], timestamp: now - 1_000 });
    assert!(!h.expired(now), "fresh status keeps the hub alive");
}

#[test]
fn geo_distance_sane() {
    // Berlin → Paris is roughly 880 km.
    let berlin = GeoPoint { lat: 52.52, lon: 13.405 };
    let paris = GeoPoint { lat: 48.8566, lon: 2.3522 };
    let d = berlin.distance_km(&paris);
    assert!((850.0..920.0).contains(&d), "got {d}");
    assert!(berlin.distance_km(&berlin) < 0.001);
}
