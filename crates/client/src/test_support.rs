// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test doubles for the collaborator traits.
//!
//! Everything here is deterministic and in-process so unit tests and the
//! scenario specs can drive the client without sockets or a real
//! authority.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::account::{AccountAuthority, UserRecord};
use crate::identity::Identity;
use crate::netenv::{Flag, NetworkEnv, OnlineStatus};
use crate::node::{GeoPoint, Hub, HubAnnouncement, HubId, TransportEndpoint, TransportKind};
use crate::ship::{Ship, ShipError, ShipFactory};
use crate::terminal::{OpReply, Terminal, TerminalError, TerminalEvents, TerminalLayer};

// -- Hub fixtures -------------------------------------------------------------

/// A reachable TCP hub at `ip:port`.
pub fn hub_with_addr(id: &str, ip: IpAddr, port: u16) -> Hub {
    let (ipv4, ipv6) = match ip {
        IpAddr::V4(v4) => (Some(v4), None),
        IpAddr::V6(v6) => (None, Some(v6)),
    };
    Hub {
        id: HubId::from(id),
        announcement: HubAnnouncement {
            public_key: format!("key-{id}"),
            name: format!("hub-{id}"),
            transports: vec![TransportEndpoint { protocol: TransportKind::Tcp, port, path: None }],
            ipv4,
            ipv6,
            country: "DE".into(),
            continent: "EU".into(),
            asn: 64496,
            owner: String::new(),
            coords: None,
            timestamp: crate::node::epoch_ms(),
        },
        status: None,
        trusted: false,
    }
}

// -- Account authority --------------------------------------------------------

/// Scriptable licensing authority.
pub struct FakeAuthority {
    user: Mutex<Option<UserRecord>>,
    reachable: AtomicBool,
    tokens_available: AtomicU32,
    user_calls: AtomicU32,
    token_calls: AtomicU32,
}

impl FakeAuthority {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            user: Mutex::new(None),
            reachable: AtomicBool::new(true),
            tokens_available: AtomicU32::new(1000),
            user_calls: AtomicU32::new(0),
            token_calls: AtomicU32::new(0),
        })
    }

    pub fn set_user(&self, user: UserRecord) {
        *self.user.lock() = Some(user);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    pub fn set_tokens(&self, available: u32) {
        self.tokens_available.store(available, Ordering::Release);
    }

    pub fn user_calls(&self) -> u32 {
        self.user_calls.load(Ordering::Acquire)
    }

    pub fn token_calls(&self) -> u32 {
        self.token_calls.load(Ordering::Acquire)
    }

    fn ensure_reachable(&self) -> anyhow::Result<()> {
        if self.reachable.load(Ordering::Acquire) {
            Ok(())
        } else {
            anyhow::bail!("authority unreachable")
        }
    }
}

#[async_trait::async_trait]
impl AccountAuthority for FakeAuthority {
    async fn get_user(&self) -> anyhow::Result<UserRecord> {
        self.user_calls.fetch_add(1, Ordering::AcqRel);
        self.ensure_reachable()?;
        self.user.lock().clone().ok_or_else(|| anyhow::anyhow!("no user logged in"))
    }

    async fn update_user(&self) -> anyhow::Result<UserRecord> {
        self.get_user().await
    }

    async fn update_tokens(&self, count: u32) -> anyhow::Result<u32> {
        self.token_calls.fetch_add(1, Ordering::AcqRel);
        self.ensure_reachable()?;
        let available = self.tokens_available.load(Ordering::Acquire);
        let issued = count.min(available);
        self.tokens_available.store(available - issued, Ordering::Release);
        Ok(issued)
    }

    async fn get_token_amount(&self, _zone: &str) -> anyhow::Result<u32> {
        self.ensure_reachable()?;
        Ok(self.tokens_available.load(Ordering::Acquire))
    }
}

// -- Network environment ------------------------------------------------------

/// Scriptable network environment.
pub struct FakeNetEnv {
    online: Mutex<OnlineStatus>,
    changed: Flag,
    ipv6: AtomicBool,
    location: Mutex<(Option<GeoPoint>, Option<GeoPoint>)>,
    my_ips: Mutex<Vec<IpAddr>>,
    rescan_requests: AtomicU32,
}

impl FakeNetEnv {
    pub fn new() -> Arc<Self> {
        // Mirror the host's actual IPv6 capability so listener fixtures
        // bind what the machine can offer.
        let ipv6 = std::net::UdpSocket::bind("[::1]:0").is_ok();
        Arc::new(Self {
            online: Mutex::new(OnlineStatus::Online),
            changed: Flag::new(),
            ipv6: AtomicBool::new(ipv6),
            location: Mutex::new((None, None)),
            my_ips: Mutex::new(Vec::new()),
            rescan_requests: AtomicU32::new(0),
        })
    }

    pub fn set_online(&self, status: OnlineStatus) {
        *self.online.lock() = status;
    }

    pub fn set_ipv6(&self, enabled: bool) {
        self.ipv6.store(enabled, Ordering::Release);
    }

    pub fn set_location(&self, v4: Option<GeoPoint>, v6: Option<GeoPoint>) {
        *self.location.lock() = (v4, v6);
    }

    pub fn add_my_ip(&self, ip: IpAddr) {
        self.my_ips.lock().push(ip);
    }

    pub fn rescan_requests(&self) -> u32 {
        self.rescan_requests.load(Ordering::Acquire)
    }
}

#[async_trait::async_trait]
impl NetworkEnv for FakeNetEnv {
    async fn online_status(&self) -> OnlineStatus {
        *self.online.lock()
    }

    fn network_changed(&self) -> &Flag {
        &self.changed
    }

    fn ipv6_enabled(&self) -> bool {
        self.ipv6.load(Ordering::Acquire)
    }

    fn is_my_ip(&self, ip: &IpAddr) -> bool {
        ip.is_loopback() || self.my_ips.lock().contains(ip)
    }

    async fn internet_location(&self) -> (Option<GeoPoint>, Option<GeoPoint>) {
        *self.location.lock()
    }

    fn request_rescan(&self) {
        self.rescan_requests.fetch_add(1, Ordering::AcqRel);
    }
}

// -- Ships --------------------------------------------------------------------

/// A ship that goes nowhere: writes vanish, reads park until sunk.
pub struct FakeShip {
    remote: SocketAddr,
    sunk: CancellationToken,
}

impl FakeShip {
    pub fn new(remote: SocketAddr) -> Self {
        Self { remote, sunk: CancellationToken::new() }
    }
}

#[async_trait::async_trait]
impl Ship for FakeShip {
    async fn load(&self, _data: &[u8]) -> Result<(), ShipError> {
        if self.sunk.is_cancelled() {
            return Err(ShipError::Sunk);
        }
        Ok(())
    }

    async fn unload(&self, _buf: &mut [u8]) -> Result<usize, ShipError> {
        self.sunk.cancelled().await;
        Err(ShipError::Sunk)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote)
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Tcp
    }

    async fn sink(&self) {
        self.sunk.cancel();
    }
}

/// Factory producing [`FakeShip`]s, with per-hub refusal, stall, and
/// delayed-refusal scripting.
pub struct FakeShipFactory {
    refuse: Mutex<Vec<HubId>>,
    stall: Mutex<Vec<HubId>>,
    delay: Mutex<HashMap<HubId, Duration>>,
    launches: Mutex<Vec<HubId>>,
}

impl FakeShipFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            refuse: Mutex::new(Vec::new()),
            stall: Mutex::new(Vec::new()),
            delay: Mutex::new(HashMap::new()),
            launches: Mutex::new(Vec::new()),
        })
    }

    /// Refuse every launch towards `hub`.
    pub fn refuse(&self, hub: HubId) {
        self.refuse.lock().push(hub);
    }

    pub fn allow(&self, hub: &HubId) {
        self.refuse.lock().retain(|id| id != hub);
    }

    /// Park every launch towards `hub` until the caller gives up.
    pub fn stall(&self, hub: HubId) {
        self.stall.lock().push(hub);
    }

    /// Refuse launches towards `hub`, but only after `delay`.
    pub fn delay(&self, hub: HubId, delay: Duration) {
        self.delay.lock().insert(hub, delay);
    }

    /// Hubs launches were attempted against, in order.
    pub fn launches(&self) -> Vec<HubId> {
        self.launches.lock().clone()
    }
}

#[async_trait::async_trait]
impl ShipFactory for FakeShipFactory {
    async fn launch(
        &self,
        cancel: &CancellationToken,
        hub: &Hub,
        endpoint: &TransportEndpoint,
        ip: IpAddr,
    ) -> Result<Box<dyn Ship>, ShipError> {
        if cancel.is_cancelled() {
            return Err(ShipError::Cancelled);
        }
        self.launches.lock().push(hub.id.clone());
        if self.stall.lock().contains(&hub.id) {
            cancel.cancelled().await;
            return Err(ShipError::Cancelled);
        }
        let delay = self.delay.lock().get(&hub.id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
            return Err(ShipError::Refused("scripted delayed refusal".into()));
        }
        if self.refuse.lock().contains(&hub.id) {
            return Err(ShipError::Refused("scripted refusal".into()));
        }
        Ok(Box::new(FakeShip::new(SocketAddr::new(ip, endpoint.port))))
    }
}

// -- Terminals ----------------------------------------------------------------

/// Scriptable terminal. Defaults: pings succeed in 10 ms, queries ack.
pub struct FakeTerminal {
    ping_script: Mutex<VecDeque<Result<Duration, TerminalError>>>,
    sent_gossip: Mutex<Vec<Bytes>>,
    error_tx: broadcast::Sender<TerminalError>,
    stopped: AtomicBool,
    gossip_in: mpsc::Sender<Bytes>,
    query_in: mpsc::Sender<()>,
}

impl FakeTerminal {
    /// Build the terminal plus the event streams a session hands to the
    /// gossip ingestor.
    pub fn new() -> (Arc<Self>, TerminalEvents) {
        let (gossip_in, gossip_rx) = mpsc::channel(64);
        let (query_in, query_rx) = mpsc::channel(4);
        let (error_tx, _) = broadcast::channel(8);
        let terminal = Arc::new(Self {
            ping_script: Mutex::new(VecDeque::new()),
            sent_gossip: Mutex::new(Vec::new()),
            error_tx,
            stopped: AtomicBool::new(false),
            gossip_in,
            query_in,
        });
        (terminal, TerminalEvents { gossip_rx, query_rx })
    }

    /// Queue the outcome of the next ping.
    pub fn script_ping(&self, result: Result<Duration, TerminalError>) {
        self.ping_script.lock().push_back(result);
    }

    /// Raw gossip messages pushed through [`Terminal::send_gossip`].
    pub fn sent_gossip(&self) -> Vec<Bytes> {
        self.sent_gossip.lock().clone()
    }

    /// Feed an incoming gossip message, as if the peer pushed it.
    pub async fn inject_gossip(&self, raw: Bytes) {
        let _ = self.gossip_in.send(raw).await;
    }

    /// Feed an incoming dump request, as if the peer queried us.
    pub async fn inject_query(&self) {
        let _ = self.query_in.send(()).await;
    }

    /// Fire a transport error at the maintenance loop.
    pub fn emit_error(&self, error: TerminalError) {
        let _ = self.error_tx.send(error);
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[async_trait::async_trait]
impl Terminal for FakeTerminal {
    async fn ping(&self) -> Result<Duration, TerminalError> {
        let scripted = self.ping_script.lock().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(Duration::from_millis(10)),
        }
    }

    async fn send_gossip(&self, message: Bytes) -> Result<(), TerminalError> {
        if self.stopped() {
            return Err(TerminalError::ShipSunk);
        }
        self.sent_gossip.lock().push(message);
        Ok(())
    }

    async fn query_peer(&self) -> OpReply {
        OpReply::Ack
    }

    fn errors(&self) -> broadcast::Receiver<TerminalError> {
        self.error_tx.subscribe()
    }

    async fn stop(&self, _cause: &str) {
        self.stopped.store(true, Ordering::Release);
    }
}

/// Terminal layer returning scripted [`FakeTerminal`]s.
pub struct FakeTerminalLayer {
    /// Refuse the next N establish calls with `PermissionDenied`.
    deny_next: AtomicU32,
    created: Mutex<Vec<Arc<FakeTerminal>>>,
}

impl FakeTerminalLayer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { deny_next: AtomicU32::new(0), created: Mutex::new(Vec::new()) })
    }

    pub fn deny_next(&self, count: u32) {
        self.deny_next.store(count, Ordering::Release);
    }

    /// Terminals created so far, oldest first.
    pub fn created(&self) -> Vec<Arc<FakeTerminal>> {
        self.created.lock().clone()
    }

    /// The most recently created terminal.
    pub fn last(&self) -> Option<Arc<FakeTerminal>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait::async_trait]
impl TerminalLayer for FakeTerminalLayer {
    async fn establish(
        &self,
        ship: Box<dyn Ship>,
        _identity: &Identity,
        _shutdown: &CancellationToken,
    ) -> Result<(Arc<dyn Terminal>, TerminalEvents), TerminalError> {
        ship.sink().await;
        let pending = self.deny_next.load(Ordering::Acquire);
        if pending > 0 {
            self.deny_next.store(pending - 1, Ordering::Release);
            return Err(TerminalError::PermissionDenied);
        }
        let (terminal, events) = FakeTerminal::new();
        self.created.lock().push(Arc::clone(&terminal));
        Ok((terminal as Arc<dyn Terminal>, events))
    }
}
