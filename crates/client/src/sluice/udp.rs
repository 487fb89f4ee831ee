// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-peer stream emulation over one shared datagram socket.
//!
//! Each remote address gets a synthetic connection holding the most
//! recent datagram. A sweep increments inactivity counters; quiet
//! connections are closed, long-dead ones evicted. Eviction lives in
//! `sweep_tick` so the policy is testable without sockets.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Sweeps until an idle connection is closed.
pub const CLOSE_AFTER_SWEEPS: u32 = 10;

/// Sweeps until a closed connection is evicted from the table.
pub const EVICT_AFTER_SWEEPS: u32 = 20;

/// One synthetic peer connection.
pub struct DatagramConn {
    peer: SocketAddr,
    local: SocketAddr,
    socket: Arc<UdpSocket>,
    /// Most recent datagram; older ones are overwritten unread.
    buffer: Mutex<Option<Bytes>>,
    arrived: Notify,
    inactivity: AtomicU32,
    closed: CancellationToken,
}

impl DatagramConn {
    fn new(peer: SocketAddr, local: SocketAddr, socket: Arc<UdpSocket>) -> Self {
        Self {
            peer,
            local,
            socket,
            buffer: Mutex::new(None),
            arrived: Notify::new(),
            inactivity: AtomicU32::new(0),
            closed: CancellationToken::new(),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local(&self) -> SocketAddr {
        self.local
    }

    /// Blocking read: resolves with the buffered datagram, or `None`
    /// once the connection is closed.
    pub async fn read(&self) -> Option<Bytes> {
        loop {
            if let Some(data) = self.buffer.lock().take() {
                return Some(data);
            }
            if self.closed.is_cancelled() {
                return None;
            }
            let arrived = self.arrived.notified();
            if self.buffer.lock().is_some() || self.closed.is_cancelled() {
                continue;
            }
            tokio::select! {
                _ = self.closed.cancelled() => return None,
                _ = arrived => {}
            }
        }
    }

    /// Reply to the peer. Replies leave from the socket the request
    /// arrived on, so the source address matches.
    pub async fn write(&self, data: &[u8]) -> std::io::Result<usize> {
        if self.closed.is_cancelled() {
            return Err(std::io::Error::new(std::io::ErrorKind::NotConnected, "closed"));
        }
        self.socket.send_to(data, self.peer).await
    }

    pub fn close(&self) {
        self.closed.cancel();
        self.arrived.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn deliver(&self, data: Bytes) {
        self.inactivity.store(0, Ordering::Release);
        *self.buffer.lock() = Some(data);
        self.arrived.notify_waiters();
    }
}

/// The connection table plus its eviction policy.
#[derive(Default)]
pub struct DatagramMux {
    conns: Mutex<IndexMap<SocketAddr, Arc<DatagramConn>>>,
}

impl DatagramMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, peer: &SocketAddr) -> Option<Arc<DatagramConn>> {
        self.conns.lock().get(peer).cloned()
    }

    pub fn len(&self) -> usize {
        self.conns.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.lock().is_empty()
    }

    /// Hand a datagram to the peer's connection, creating it if needed.
    /// Returns the connection and whether it was just created.
    pub fn deliver(
        &self,
        socket: &Arc<UdpSocket>,
        local: SocketAddr,
        peer: SocketAddr,
        data: Bytes,
    ) -> (Arc<DatagramConn>, bool) {
        let mut conns = self.conns.lock();
        let (conn, created) = match conns.get(&peer) {
            Some(conn) if !conn.is_closed() => (Arc::clone(conn), false),
            _ => {
                let conn = Arc::new(DatagramConn::new(peer, local, Arc::clone(socket)));
                conns.insert(peer, Arc::clone(&conn));
                (conn, true)
            }
        };
        drop(conns);
        conn.deliver(data);
        (conn, created)
    }

    /// One inactivity sweep. Returns `(closed, evicted)` counts.
    pub fn sweep_tick(&self) -> (usize, usize) {
        let mut closed = 0;
        let mut evicted = 0;
        let mut conns = self.conns.lock();
        conns.retain(|_, conn| {
            let count = conn.inactivity.fetch_add(1, Ordering::AcqRel) + 1;
            if count >= EVICT_AFTER_SWEEPS {
                conn.close();
                evicted += 1;
                return false;
            }
            if count >= CLOSE_AFTER_SWEEPS && !conn.is_closed() {
                conn.close();
                closed += 1;
            }
            true
        });
        (closed, evicted)
    }
}

#[cfg(test)]
#[path = "udp_tests.rs"]
mod tests;
