// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;

async fn test_socket() -> Arc<UdpSocket> {
    Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap())
}

fn peer(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

#[tokio::test]
async fn deliver_creates_then_reuses_connections() {
    let socket = test_socket().await;
    let local = socket.local_addr().unwrap();
    let mux = DatagramMux::new();

    let (_, created) = mux.deliver(&socket, local, peer(40_001), Bytes::from_static(b"a"));
    assert!(created);
    let (_, created) = mux.deliver(&socket, local, peer(40_001), Bytes::from_static(b"b"));
    assert!(!created);
    assert_eq!(mux.len(), 1);
}

#[tokio::test]
async fn read_returns_the_most_recent_datagram() {
    let socket = test_socket().await;
    let local = socket.local_addr().unwrap();
    let mux = DatagramMux::new();

    let (conn, _) = mux.deliver(&socket, local, peer(40_002), Bytes::from_static(b"old"));
    mux.deliver(&socket, local, peer(40_002), Bytes::from_static(b"new"));

    // Only the latest datagram is buffered.
    assert_eq!(conn.read().await.unwrap(), Bytes::from_static(b"new"));
}

#[tokio::test]
async fn read_blocks_until_traffic_arrives() {
    let socket = test_socket().await;
    let local = socket.local_addr().unwrap();
    let mux = DatagramMux::new();

    let (conn, _) = mux.deliver(&socket, local, peer(40_003), Bytes::from_static(b"first"));
    assert_eq!(conn.read().await.unwrap(), Bytes::from_static(b"first"));

    let reader = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move { conn.read().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!reader.is_finished(), "read must park with an empty buffer");

    mux.deliver(&socket, local, peer(40_003), Bytes::from_static(b"second"));
    let read = tokio::time::timeout(Duration::from_secs(1), reader).await.unwrap().unwrap();
    assert_eq!(read.unwrap(), Bytes::from_static(b"second"));
}

#[tokio::test]
async fn close_unblocks_readers() {
    let socket = test_socket().await;
    let local = socket.local_addr().unwrap();
    let mux = DatagramMux::new();
    let (conn, _) = mux.deliver(&socket, local, peer(40_004), Bytes::from_static(b"x"));
    let _ = conn.read().await;

    let reader = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move { conn.read().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    conn.close();
    let read = tokio::time::timeout(Duration::from_secs(1), reader).await.unwrap().unwrap();
    assert!(read.is_none());
}

#[tokio::test]
async fn sweep_closes_at_ten_and_evicts_at_twenty() {
    let socket = test_socket().await;
    let local = socket.local_addr().unwrap();
    let mux = DatagramMux::new();
    let (conn, _) = mux.deliver(&socket, local, peer(40_005), Bytes::from_static(b"x"));

    for _ in 0..CLOSE_AFTER_SWEEPS - 1 {
        assert_eq!(mux.sweep_tick(), (0, 0));
    }
    assert!(!conn.is_closed());
    assert_eq!(mux.sweep_tick(), (1, 0));
    assert!(conn.is_closed());

    for _ in CLOSE_AFTER_SWEEPS..EVICT_AFTER_SWEEPS - 1 {
        assert_eq!(mux.sweep_tick(), (0, 0));
    }
    assert_eq!(mux.sweep_tick(), (0, 1));
    assert!(mux.is_empty());
}

#[tokio::test]
async fn traffic_resets_the_inactivity_counter() {
    let socket = test_socket().await;
    let local = socket.local_addr().unwrap();
    let mux = DatagramMux::new();
    let (conn, _) = mux.deliver(&socket, local, peer(40_006), Bytes::from_static(b"x"));

    for _ in 0..CLOSE_AFTER_SWEEPS - 1 {
        mux.sweep_tick();
    }
    mux.deliver(&socket, local, peer(40_006), Bytes::from_static(b"y"));
    assert_eq!(mux.sweep_tick(), (0, 0));
    assert!(!conn.is_closed());
}
