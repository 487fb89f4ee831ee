// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end harness for the scenario specs.
//!
//! Builds a full client instance in-process with scriptable
//! collaborators, plus an in-process hub server speaking the real
//! terminal protocol over TCP for scenarios that need real transports.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use seaward::account::{Plan, UserRecord, UserState};
use seaward::bootstrap::BootstrapEntry;
use seaward::config::Config;
use seaward::identity::Identity;
use seaward::instance::Instance;
use seaward::node::{epoch_ms, HubId};
use seaward::status::ClientState;
use seaward::terminal::frame::{ops, Decoded, Frame, FrameDecoder};
use seaward::test_support::{FakeAuthority, FakeNetEnv, FakeShipFactory, FakeTerminalLayer};

/// An approved account with the overlay feature.
pub fn approved_user(tokens_note: &str) -> UserRecord {
    UserRecord {
        username: format!("spec-user-{tokens_note}"),
        state: UserState::Approved,
        subscription_end: Some(epoch_ms() + 86_400_000),
        plan: Plan { name: "plus".into(), features: vec!["overlay".into()] },
        message: String::new(),
    }
}

/// Fully faked harness: no sockets anywhere.
pub struct FakeHarness {
    pub instance: Arc<Instance>,
    pub authority: Arc<FakeAuthority>,
    pub netenv: Arc<FakeNetEnv>,
    pub ships: Arc<FakeShipFactory>,
    pub terminals: Arc<FakeTerminalLayer>,
    pub shutdown: CancellationToken,
}

impl FakeHarness {
    pub async fn build(args: &[&str]) -> anyhow::Result<Self> {
        let mut argv = vec!["seaward", "--sluice-port", "0"];
        argv.extend_from_slice(args);
        let config = <Config as clap::Parser>::parse_from(argv);
        config.validate()?;

        let authority = FakeAuthority::new();
        authority.set_user(approved_user("fake"));
        let netenv = FakeNetEnv::new();
        let ships = FakeShipFactory::new();
        let terminals = FakeTerminalLayer::new();
        let shutdown = CancellationToken::new();

        let instance = Instance::builder(config)
            .authority(authority.clone())
            .netenv(netenv.clone())
            .ships(ships.clone())
            .terminals(terminals.clone())
            .shutdown(shutdown.clone())
            .build()
            .await?;

        Ok(Self { instance, authority, netenv, ships, terminals, shutdown })
    }
}

/// Real-transport harness: ships and terminals are the production
/// implementations, talking to in-process [`SpecHub`] servers.
pub struct WireHarness {
    pub instance: Arc<Instance>,
    pub authority: Arc<FakeAuthority>,
    pub netenv: Arc<FakeNetEnv>,
    pub shutdown: CancellationToken,
    _bootstrap_file: tempfile::NamedTempFile,
}

impl WireHarness {
    /// Build an instance bootstrapped with the given hubs.
    pub async fn build(hubs: &[&Arc<SpecHub>], extra_args: &[&str]) -> anyhow::Result<Self> {
        let entries: Vec<BootstrapEntry> = hubs.iter().map(|hub| hub.bootstrap_entry()).collect();
        let mut bootstrap_file = tempfile::Builder::new().suffix(".json").tempfile()?;
        std::io::Write::write_all(
            &mut bootstrap_file,
            serde_json::to_string(&entries)?.as_bytes(),
        )?;

        let path = bootstrap_file.path().to_string_lossy().into_owned();
        let mut argv = vec!["seaward", "--sluice-port", "0", "--bootstrap-file", path.as_str()];
        argv.extend_from_slice(extra_args);
        let config = <Config as clap::Parser>::parse_from(argv);
        config.validate()?;

        let authority = FakeAuthority::new();
        authority.set_user(approved_user("wire"));
        authority.set_tokens(5);
        let netenv = FakeNetEnv::new();
        let shutdown = CancellationToken::new();

        let instance = Instance::builder(config)
            .authority(authority.clone())
            .netenv(netenv.clone())
            .shutdown(shutdown.clone())
            .build()
            .await?;

        Ok(Self { instance, authority, netenv, shutdown, _bootstrap_file: bootstrap_file })
    }
}

/// Wait until the status reaches `want`.
pub async fn wait_state(
    instance: &Arc<Instance>,
    want: ClientState,
    timeout: Duration,
) -> anyhow::Result<()> {
    let mut rx = instance.status.watch();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if rx.borrow_and_update().state == want {
            return Ok(());
        }
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .ok_or_else(|| anyhow::anyhow!("status never reached {want:?}"))?;
        tokio::time::timeout(remaining, rx.changed())
            .await
            .map_err(|_| anyhow::anyhow!("status never reached {want:?}"))??;
    }
}

/// Wait until the client is connected to a specific hub.
pub async fn wait_connected_to(
    instance: &Arc<Instance>,
    hub: &HubId,
    timeout: Duration,
) -> anyhow::Result<()> {
    let mut rx = instance.status.watch();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        {
            let status = rx.borrow_and_update();
            if status.state == ClientState::Connected
                && status.connected.as_ref().map(|c| &c.hub) == Some(hub)
            {
                return Ok(());
            }
        }
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .ok_or_else(|| anyhow::anyhow!("never connected to {hub}"))?;
        tokio::time::timeout(remaining, rx.changed())
            .await
            .map_err(|_| anyhow::anyhow!("never connected to {hub}"))??;
    }
}

/// In-process hub: accepts real TCP ships and speaks the terminal
/// protocol (hello/ping/query).
pub struct SpecHub {
    pub identity: Identity,
    addr: SocketAddr,
    country: String,
    conns: Arc<Mutex<Vec<CancellationToken>>>,
    gossip_received: Arc<Mutex<Vec<Bytes>>>,
}

impl SpecHub {
    pub async fn spawn(country: &str) -> anyhow::Result<Arc<Self>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let hub = Arc::new(Self {
            identity: Identity::generate()?,
            addr,
            country: country.to_owned(),
            conns: Arc::new(Mutex::new(Vec::new())),
            gossip_received: Arc::new(Mutex::new(Vec::new())),
        });

        let conns = Arc::clone(&hub.conns);
        let gossip = Arc::clone(&hub.gossip_received);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let kill = CancellationToken::new();
                conns.lock().push(kill.clone());
                tokio::spawn(serve_conn(stream, kill, Arc::clone(&gossip)));
            }
        });
        Ok(hub)
    }

    pub fn id(&self) -> HubId {
        self.identity.id().clone()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Close every live connection, as if the hub vanished.
    pub fn drop_connections(&self) {
        for kill in self.conns.lock().drain(..) {
            kill.cancel();
        }
    }

    /// Raw gossip messages clients pushed to this hub.
    pub fn gossip_received(&self) -> Vec<Bytes> {
        self.gossip_received.lock().clone()
    }

    pub fn bootstrap_entry(&self) -> BootstrapEntry {
        let ip = match self.addr.ip() {
            std::net::IpAddr::V4(v4) => v4,
            std::net::IpAddr::V6(_) => std::net::Ipv4Addr::LOCALHOST,
        };
        BootstrapEntry {
            id: self.id().as_str().to_owned(),
            name: Some(format!("spec-hub-{}", self.country.to_lowercase())),
            transports: vec![format!("tcp:{}", self.addr.port())],
            ipv4: Some(ip),
            ipv6: None,
            country: Some(self.country.clone()),
            continent: Some("EU".into()),
            asn: Some(64496),
            owner: None,
            public_key: Some(self.identity.public_key_b64()),
            coords: None,
        }
    }
}

async fn serve_conn(
    mut stream: TcpStream,
    kill: CancellationToken,
    gossip: Arc<Mutex<Vec<Bytes>>>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 16 * 1024];
    loop {
        let n = tokio::select! {
            _ = kill.cancelled() => return,
            read = stream.read(&mut buf) => match read {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            },
        };
        decoder.extend(&buf[..n]);
        loop {
            let frame = match decoder.next() {
                Decoded::Frame(frame) => frame,
                Decoded::Incomplete => break,
                Decoded::Malformed(_) => return,
            };
            let replies = match frame.op {
                ops::HELLO => vec![Frame::new(ops::HELLO_ACK, frame.seq, &br#"{"ok":true}"#[..])],
                ops::PING => vec![Frame::new(ops::PONG, frame.seq, Bytes::new())],
                ops::QUERY => vec![Frame::new(ops::QUERY_DONE, frame.seq, Bytes::new())],
                ops::GOSSIP => {
                    gossip.lock().push(frame.payload.clone());
                    vec![]
                }
                _ => vec![],
            };
            for reply in replies {
                if stream.write_all(&reply.encode()).await.is_err() {
                    return;
                }
            }
        }
    }
}
