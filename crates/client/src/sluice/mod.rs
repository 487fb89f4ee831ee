// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The sluice: local ingress rendezvous.
//!
//! Four listeners (TCP/UDP × v4/v6) on one local port. Locally
//! originated flows are pre-registered under their source address; an
//! accepted connection matching a pending key is handed to the
//! registered callback, everything else gets an info banner. Non-local
//! peers mean the environment changed under us, so a rate-limited
//! re-scan is requested.

pub mod udp;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::netenv::NetworkEnv;
use udp::{DatagramConn, DatagramMux};

/// The fixed local rendezvous port.
pub const SLUICE_PORT: u16 = 717;

/// Default lifetime of a pending flow request.
pub const REQUEST_TTL: Duration = Duration::from_secs(30);

/// Spacing between environment re-scan requests.
const RESCAN_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Sent to unmatched connections before closing.
pub const INFO_BANNER: &[u8] =
    b"seaward sluice: local flow rendezvous; nothing to see on this connection\n";

/// Sweep spacing for the datagram tables.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A connection handed to a flow callback. The callback owns it and is
/// responsible for closing it.
pub enum FlowConn {
    Tcp(TcpStream),
    Udp(Arc<DatagramConn>),
}

pub type FlowCallback = Box<dyn FnOnce(FlowConn) + Send + 'static>;

/// Registration failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SluiceError {
    /// A request for this local-address key is already pending.
    DuplicateRequest(String),
}

impl std::fmt::Display for SluiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateRequest(key) => write!(f, "a request for {key} is already pending"),
        }
    }
}

impl std::error::Error for SluiceError {}

struct PendingRequest {
    callback: FlowCallback,
    expires: Instant,
    registered_at: Instant,
}

/// Listener bind configuration.
#[derive(Debug, Clone)]
pub struct SluiceConfig {
    pub port: u16,
    pub bind4: IpAddr,
    pub bind6: IpAddr,
}

impl Default for SluiceConfig {
    fn default() -> Self {
        Self {
            port: SLUICE_PORT,
            bind4: IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            bind6: IpAddr::V6(std::net::Ipv6Addr::LOCALHOST),
        }
    }
}

#[derive(Default)]
struct RescanState {
    last_at: Option<Instant>,
    last_source: Option<IpAddr>,
}

/// The local ingress listener set.
pub struct Sluice {
    table: Mutex<IndexMap<String, PendingRequest>>,
    netenv: Arc<dyn NetworkEnv>,
    shutdown: CancellationToken,
    rescan: Mutex<RescanState>,
    mux4: Arc<DatagramMux>,
    mux6: Arc<DatagramMux>,
    tcp4_addr: SocketAddr,
    tcp6_addr: Option<SocketAddr>,
    udp4_addr: SocketAddr,
    udp6_addr: Option<SocketAddr>,
}

impl Sluice {
    /// Bind all listeners and spawn the accept and sweep loops.
    ///
    /// The IPv6 pair is skipped when the host has no IPv6.
    pub async fn spawn(
        config: SluiceConfig,
        netenv: Arc<dyn NetworkEnv>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Arc<Self>> {
        let tcp4 = TcpListener::bind((config.bind4, config.port)).await?;
        let udp4 = Arc::new(UdpSocket::bind((config.bind4, config.port)).await?);

        let (tcp6, udp6) = if netenv.ipv6_enabled() {
            let tcp6 = TcpListener::bind((config.bind6, config.port)).await?;
            let udp6 = Arc::new(UdpSocket::bind((config.bind6, config.port)).await?);
            (Some(tcp6), Some(udp6))
        } else {
            info!("host has no IPv6, sluice binds IPv4 only");
            (None, None)
        };

        let sluice = Arc::new(Self {
            table: Mutex::new(IndexMap::new()),
            netenv,
            shutdown,
            rescan: Mutex::new(RescanState::default()),
            mux4: Arc::new(DatagramMux::new()),
            mux6: Arc::new(DatagramMux::new()),
            tcp4_addr: tcp4.local_addr()?,
            tcp6_addr: tcp6.as_ref().and_then(|l| l.local_addr().ok()),
            udp4_addr: udp4.local_addr()?,
            udp6_addr: udp6.as_ref().and_then(|s| s.local_addr().ok()),
        });

        info!(tcp = %sluice.tcp4_addr, udp = %sluice.udp4_addr, "sluice listening");

        tokio::spawn(Arc::clone(&sluice).accept_loop(tcp4));
        if let Some(tcp6) = tcp6 {
            tokio::spawn(Arc::clone(&sluice).accept_loop(tcp6));
        }
        tokio::spawn(Arc::clone(&sluice).udp_loop(udp4, Arc::clone(&sluice.mux4)));
        if let Some(udp6) = udp6 {
            tokio::spawn(Arc::clone(&sluice).udp_loop(udp6, Arc::clone(&sluice.mux6)));
        }
        tokio::spawn(Arc::clone(&sluice).sweep_loop());

        Ok(sluice)
    }

    pub fn tcp4_addr(&self) -> SocketAddr {
        self.tcp4_addr
    }

    pub fn tcp6_addr(&self) -> Option<SocketAddr> {
        self.tcp6_addr
    }

    pub fn udp4_addr(&self) -> SocketAddr {
        self.udp4_addr
    }

    pub fn udp6_addr(&self) -> Option<SocketAddr> {
        self.udp6_addr
    }

    /// Pre-register a flow that will shortly connect from `key`.
    pub fn register(
        &self,
        key: SocketAddr,
        callback: FlowCallback,
        ttl: Option<Duration>,
    ) -> Result<(), SluiceError> {
        let key_str = key.to_string();
        let mut table = self.table.lock();
        if table.contains_key(&key_str) {
            return Err(SluiceError::DuplicateRequest(key_str));
        }
        let now = Instant::now();
        let expires = now + ttl.unwrap_or(REQUEST_TTL);
        table.insert(key_str, PendingRequest { callback, expires, registered_at: now });
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.table.lock().len()
    }

    fn claim(&self, key: &str) -> Option<PendingRequest> {
        self.table.lock().shift_remove(key)
    }

    /// Drop every pending request whose deadline has passed.
    fn reap(&self) {
        let now = Instant::now();
        self.table.lock().retain(|key, request| {
            let keep = request.expires > now;
            if !keep {
                debug!(key, "pending flow request expired");
            }
            keep
        });
    }

    /// Rate-limited environment re-scan: at most once per second, and
    /// never twice in a row for the same source.
    fn maybe_rescan(&self, source: IpAddr) {
        let mut state = self.rescan.lock();
        if state.last_source == Some(source) {
            return;
        }
        let now = Instant::now();
        if let Some(last) = state.last_at {
            if now.duration_since(last) < RESCAN_MIN_INTERVAL {
                return;
            }
        }
        state.last_at = Some(now);
        state.last_source = Some(source);
        drop(state);
        self.netenv.request_rescan();
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => self.handle_tcp(stream, peer).await,
                Err(e) => {
                    warn!(err = %e, "sluice accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_tcp(&self, mut stream: TcpStream, peer: SocketAddr) {
        if !self.netenv.is_my_ip(&peer.ip()) {
            warn!(%peer, "dropping sluice connection from non-local address");
            self.maybe_rescan(peer.ip());
            self.reap();
            return;
        }

        match self.claim(&peer.to_string()) {
            Some(request) => {
                debug!(%peer, waited_ms = request.registered_at.elapsed().as_millis() as u64, "pending flow matched");
                (request.callback)(FlowConn::Tcp(stream));
            }
            None => {
                let _ = stream.write_all(INFO_BANNER).await;
                let _ = stream.shutdown().await;
            }
        }
        self.reap();
    }

    async fn udp_loop(self: Arc<Self>, socket: Arc<UdpSocket>, mux: Arc<DatagramMux>) {
        let local = match socket.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(err = %e, "udp sluice socket has no local address");
                return;
            }
        };
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let received = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = socket.recv_from(&mut buf) => received,
            };
            let (n, peer) = match received {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(err = %e, "sluice udp receive failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            if !self.netenv.is_my_ip(&peer.ip()) {
                warn!(%peer, "dropping sluice datagram from non-local address");
                self.maybe_rescan(peer.ip());
                continue;
            }
            let data = Bytes::copy_from_slice(&buf[..n]);

            let live = mux.get(&peer).filter(|conn| !conn.is_closed()).is_some();
            if live {
                mux.deliver(&socket, local, peer, data);
            } else if let Some(request) = self.claim(&peer.to_string()) {
                debug!(%peer, "pending udp flow matched");
                let (conn, _) = mux.deliver(&socket, local, peer, data);
                (request.callback)(FlowConn::Udp(conn));
            } else {
                let _ = socket.send_to(INFO_BANNER, peer).await;
            }
            self.reap();
        }
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut timer = tokio::time::interval(SWEEP_INTERVAL);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            let (closed4, evicted4) = self.mux4.sweep_tick();
            let (closed6, evicted6) = self.mux6.sweep_tick();
            let closed = closed4 + closed6;
            let evicted = evicted4 + evicted6;
            if closed + evicted > 0 {
                debug!(closed, evicted, "sluice datagram sweep");
            }
        }
    }
}

#[cfg(test)]
#[path = "sluice_tests.rs"]
mod tests;
