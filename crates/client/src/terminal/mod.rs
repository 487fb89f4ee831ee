// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The terminal: multiplexed operations on top of one ship.
//!
//! Ping, authentication, and gossip all ride the same pipe as framed
//! request/reply or push operations. Replies are matched by sequence
//! number; transport failures fan out on an error channel the session
//! manager selects on.

pub mod frame;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::health::PING_TIMEOUT;
use crate::identity::Identity;
use crate::node::TransportKind;
use crate::ship::Ship;
use frame::{ops, Decoded, Frame, FrameDecoder};

/// How long the authentication handshake may take.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a gossip query may take to be acknowledged.
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Typed terminal failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalError {
    /// The underlying ship is gone.
    ShipSunk,
    Timeout,
    Cancelled,
    /// The peer rejected our identity or token.
    PermissionDenied,
    /// The peer violated the framing or replied nonsense.
    Protocol(String),
}

impl std::fmt::Display for TerminalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShipSunk => f.write_str("ship sunk"),
            Self::Timeout => f.write_str("operation timed out"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::PermissionDenied => f.write_str("permission denied"),
            Self::Protocol(detail) => write!(f, "protocol violation: {detail}"),
        }
    }
}

impl std::error::Error for TerminalError {}

/// Reply to a request/reply operation. Typed; there is no sentinel
/// error value terminating a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpReply {
    Ack,
    ProtocolErr(String),
    Timeout,
}

/// Inbound event streams handed to the gossip ingestor, one per session.
pub struct TerminalEvents {
    /// Raw gossip wire messages pushed by the peer.
    pub gossip_rx: mpsc::Receiver<Bytes>,
    /// The peer asked for a dump of our stored gossip.
    pub query_rx: mpsc::Receiver<()>,
}

/// Operation surface the rest of the client sees.
#[async_trait::async_trait]
pub trait Terminal: Send + Sync {
    /// Round-trip a ping, returning the measured latency.
    async fn ping(&self) -> Result<Duration, TerminalError>;
    /// Push one gossip wire message to the peer.
    async fn send_gossip(&self, message: Bytes) -> Result<(), TerminalError>;
    /// Ask the peer to stream everything it has stored.
    async fn query_peer(&self) -> OpReply;
    /// Transport-error channel the maintenance loop selects on.
    fn errors(&self) -> broadcast::Receiver<TerminalError>;
    async fn stop(&self, cause: &str);
}

/// Builds terminals over freshly launched ships.
#[async_trait::async_trait]
pub trait TerminalLayer: Send + Sync {
    /// Wrap the ship, authenticate, and return the live terminal plus its
    /// inbound event streams.
    async fn establish(
        &self,
        ship: Box<dyn Ship>,
        identity: &Identity,
        shutdown: &CancellationToken,
    ) -> Result<(Arc<dyn Terminal>, TerminalEvents), TerminalError>;
}

/// The production terminal layer.
#[derive(Default)]
pub struct PipeTerminalLayer {
    /// Device name announced during the handshake.
    pub device: Option<String>,
}

#[async_trait::async_trait]
impl TerminalLayer for PipeTerminalLayer {
    async fn establish(
        &self,
        ship: Box<dyn Ship>,
        identity: &Identity,
        shutdown: &CancellationToken,
    ) -> Result<(Arc<dyn Terminal>, TerminalEvents), TerminalError> {
        let (terminal, events) = PipeTerminal::new(ship, shutdown);
        terminal.authenticate(identity, self.device.as_deref()).await?;
        Ok((terminal as Arc<dyn Terminal>, events))
    }
}

/// Framed terminal over one ship.
pub struct PipeTerminal {
    out_tx: mpsc::Sender<Frame>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Frame>>>>,
    seq: AtomicU64,
    error_tx: broadcast::Sender<TerminalError>,
    closed: CancellationToken,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    transport: TransportKind,
}

impl PipeTerminal {
    /// Spawn the reader and writer tasks and return the terminal plus the
    /// inbound event streams.
    pub fn new(ship: Box<dyn Ship>, shutdown: &CancellationToken) -> (Arc<Self>, TerminalEvents) {
        let ship: Arc<dyn Ship> = Arc::from(ship);
        let closed = shutdown.child_token();
        let (out_tx, out_rx) = mpsc::channel::<Frame>(64);
        let (gossip_tx, gossip_rx) = mpsc::channel(64);
        let (query_tx, query_rx) = mpsc::channel(4);
        let (error_tx, _) = broadcast::channel(8);
        let pending = Arc::new(Mutex::new(HashMap::new()));

        let terminal = Arc::new(Self {
            out_tx: out_tx.clone(),
            pending: Arc::clone(&pending),
            seq: AtomicU64::new(1),
            error_tx: error_tx.clone(),
            closed: closed.clone(),
            local_addr: ship.local_addr(),
            remote_addr: ship.remote_addr(),
            transport: ship.transport(),
        });

        tokio::spawn(writer_task(Arc::clone(&ship), out_rx, closed.clone(), error_tx.clone()));
        tokio::spawn(reader_task(ship, out_tx, pending, gossip_tx, query_tx, closed, error_tx));

        (terminal, TerminalEvents { gossip_rx, query_rx })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Run the authentication handshake.
    pub async fn authenticate(
        &self,
        identity: &Identity,
        device: Option<&str>,
    ) -> Result<(), TerminalError> {
        let timestamp = crate::node::epoch_ms();
        let signed = format!("hello:{}:{timestamp}", identity.id());
        let signature = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            identity.sign(signed.as_bytes()),
        );
        let payload = json!({
            "id": identity.id().as_str(),
            "public_key": identity.public_key_b64(),
            "device": device,
            "timestamp": timestamp,
            "signature": signature,
        });
        let body = serde_json::to_vec(&payload).map_err(|e| TerminalError::Protocol(e.to_string()))?;

        let reply = self.request(ops::HELLO, Bytes::from(body), AUTH_TIMEOUT).await?;
        if reply.op != ops::HELLO_ACK {
            return Err(TerminalError::Protocol(format!("unexpected reply op {}", reply.op)));
        }
        let ack: serde_json::Value = serde_json::from_slice(&reply.payload)
            .map_err(|e| TerminalError::Protocol(e.to_string()))?;
        if ack["ok"].as_bool() == Some(true) {
            return Ok(());
        }
        match ack["reason"].as_str() {
            Some("permission-denied") => Err(TerminalError::PermissionDenied),
            Some(reason) => Err(TerminalError::Protocol(reason.to_owned())),
            None => Err(TerminalError::Protocol("handshake refused".into())),
        }
    }

    async fn request(&self, op: u8, payload: Bytes, timeout: Duration) -> Result<Frame, TerminalError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(seq, tx);

        let frame = Frame::new(op, seq, payload);
        if self.out_tx.send(frame).await.is_err() {
            self.pending.lock().remove(&seq);
            return Err(TerminalError::ShipSunk);
        }

        let result = tokio::select! {
            _ = self.closed.cancelled() => Err(TerminalError::Cancelled),
            reply = tokio::time::timeout(timeout, rx) => match reply {
                Ok(Ok(frame)) => Ok(frame),
                Ok(Err(_)) => Err(TerminalError::ShipSunk),
                Err(_) => Err(TerminalError::Timeout),
            },
        };
        if result.is_err() {
            self.pending.lock().remove(&seq);
        }
        result
    }
}

#[async_trait::async_trait]
impl Terminal for PipeTerminal {
    async fn ping(&self) -> Result<Duration, TerminalError> {
        let started = Instant::now();
        let reply = self.request(ops::PING, Bytes::new(), PING_TIMEOUT).await?;
        if reply.op != ops::PONG {
            return Err(TerminalError::Protocol(format!("unexpected reply op {}", reply.op)));
        }
        Ok(started.elapsed())
    }

    async fn send_gossip(&self, message: Bytes) -> Result<(), TerminalError> {
        let frame = Frame::new(ops::GOSSIP, 0, message);
        self.out_tx.send(frame).await.map_err(|_| TerminalError::ShipSunk)
    }

    async fn query_peer(&self) -> OpReply {
        match self.request(ops::QUERY, Bytes::new(), QUERY_TIMEOUT).await {
            Ok(reply) if reply.op == ops::QUERY_DONE => OpReply::Ack,
            Ok(reply) => OpReply::ProtocolErr(format!("unexpected reply op {}", reply.op)),
            Err(TerminalError::Timeout) => OpReply::Timeout,
            Err(e) => OpReply::ProtocolErr(e.to_string()),
        }
    }

    fn errors(&self) -> broadcast::Receiver<TerminalError> {
        self.error_tx.subscribe()
    }

    async fn stop(&self, cause: &str) {
        debug!(cause, "stopping terminal");
        self.closed.cancel();
    }
}

async fn writer_task(
    ship: Arc<dyn Ship>,
    mut out_rx: mpsc::Receiver<Frame>,
    closed: CancellationToken,
    error_tx: broadcast::Sender<TerminalError>,
) {
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            maybe = out_rx.recv() => match maybe {
                Some(frame) => frame,
                None => break,
            },
        };
        if let Err(e) = ship.load(&frame.encode()).await {
            debug!(err = %e, "terminal write failed");
            let _ = error_tx.send(TerminalError::ShipSunk);
            break;
        }
    }
    // Release the reader before closing so its half is not held locked.
    closed.cancel();
    ship.sink().await;
}

async fn reader_task(
    ship: Arc<dyn Ship>,
    out_tx: mpsc::Sender<Frame>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Frame>>>>,
    gossip_tx: mpsc::Sender<Bytes>,
    query_tx: mpsc::Sender<()>,
    closed: CancellationToken,
    error_tx: broadcast::Sender<TerminalError>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 16 * 1024];

    'read: loop {
        let n = tokio::select! {
            _ = closed.cancelled() => break,
            result = ship.unload(&mut buf) => match result {
                Ok(n) => n,
                Err(e) => {
                    debug!(err = %e, "terminal read failed");
                    let _ = error_tx.send(TerminalError::ShipSunk);
                    closed.cancel();
                    break;
                }
            },
        };
        decoder.extend(&buf[..n]);

        loop {
            match decoder.next() {
                Decoded::Incomplete => break,
                Decoded::Malformed(detail) => {
                    warn!(%detail, "malformed terminal frame, dropping session");
                    let _ = error_tx.send(TerminalError::Protocol(detail));
                    closed.cancel();
                    break 'read;
                }
                Decoded::Frame(frame) => {
                    dispatch(frame, &out_tx, &pending, &gossip_tx, &query_tx, &closed).await;
                }
            }
        }
    }
}

async fn dispatch(
    frame: Frame,
    out_tx: &mpsc::Sender<Frame>,
    pending: &Mutex<HashMap<u64, oneshot::Sender<Frame>>>,
    gossip_tx: &mpsc::Sender<Bytes>,
    query_tx: &mpsc::Sender<()>,
    closed: &CancellationToken,
) {
    match frame.op {
        ops::HELLO_ACK | ops::PONG | ops::QUERY_DONE => {
            let waiter = pending.lock().remove(&frame.seq);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(frame);
                }
                None => debug!(op = frame.op, seq = frame.seq, "reply with no waiter"),
            }
        }
        ops::GOSSIP => {
            tokio::select! {
                _ = closed.cancelled() => {}
                _ = gossip_tx.send(frame.payload) => {}
            }
        }
        ops::QUERY => {
            tokio::select! {
                _ = closed.cancelled() => {}
                _ = query_tx.send(()) => {}
            }
            let done = Frame::new(ops::QUERY_DONE, frame.seq, Bytes::new());
            let _ = out_tx.send(done).await;
        }
        ops::PING => {
            let pong = Frame::new(ops::PONG, frame.seq, Bytes::new());
            let _ = out_tx.send(pong).await;
        }
        other => debug!(op = other, "ignoring unknown terminal op"),
    }
}

#[cfg(test)]
#[path = "terminal_tests.rs"]
mod tests;
