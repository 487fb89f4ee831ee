// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ship transports: the opaque byte pipes sessions ride on.
//!
//! A ship is one established transport connection to a hub. The factory
//! picks the concrete implementation from the announced endpoint; the
//! rest of the client only sees the [`Ship`] trait.

mod tcp;
mod ws;

pub use tcp::TcpShip;
pub use ws::WsShip;

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use tokio_util::sync::CancellationToken;

use crate::node::{Hub, TransportEndpoint, TransportKind};

/// Typed transport failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShipError {
    /// The peer refused or reset the connection attempt.
    Refused(String),
    /// The attempt or operation ran out of time.
    Timeout,
    /// The pipe is gone; no further operations will succeed.
    Sunk,
    /// The endpoint announces a transport this build cannot speak.
    Unsupported(String),
    Cancelled,
}

impl fmt::Display for ShipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refused(reason) => write!(f, "connection refused: {reason}"),
            Self::Timeout => f.write_str("transport timeout"),
            Self::Sunk => f.write_str("ship sunk"),
            Self::Unsupported(name) => write!(f, "unsupported transport: {name}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl std::error::Error for ShipError {}

/// One bidirectional byte pipe.
///
/// The two directions lock independently, so one task may sit in
/// `unload` while another calls `load`.
#[async_trait::async_trait]
pub trait Ship: Send + Sync {
    /// Write the whole buffer to the pipe.
    async fn load(&self, data: &[u8]) -> Result<(), ShipError>;
    /// Read available bytes into `buf`; resolves with at least one byte
    /// or an error. EOF surfaces as [`ShipError::Sunk`].
    async fn unload(&self, buf: &mut [u8]) -> Result<usize, ShipError>;
    fn local_addr(&self) -> Option<SocketAddr>;
    fn remote_addr(&self) -> Option<SocketAddr>;
    fn transport(&self) -> TransportKind;
    /// Close the pipe. Idempotent.
    async fn sink(&self);
}

/// Opens ships to hubs.
#[async_trait::async_trait]
pub trait ShipFactory: Send + Sync {
    async fn launch(
        &self,
        cancel: &CancellationToken,
        hub: &Hub,
        endpoint: &TransportEndpoint,
        ip: IpAddr,
    ) -> Result<Box<dyn Ship>, ShipError>;
}

/// Factory for the built-in TCP and WebSocket transports.
#[derive(Default)]
pub struct DefaultShipFactory;

#[async_trait::async_trait]
impl ShipFactory for DefaultShipFactory {
    async fn launch(
        &self,
        cancel: &CancellationToken,
        hub: &Hub,
        endpoint: &TransportEndpoint,
        ip: IpAddr,
    ) -> Result<Box<dyn Ship>, ShipError> {
        let addr = SocketAddr::new(ip, endpoint.port);
        tracing::debug!(hub = %hub.id, %addr, transport = %endpoint.protocol, "launching ship");
        let launch = async {
            match endpoint.protocol {
                TransportKind::Tcp => {
                    TcpShip::launch(addr).await.map(|ship| Box::new(ship) as Box<dyn Ship>)
                }
                TransportKind::Ws => WsShip::launch(addr, endpoint.path.as_deref())
                    .await
                    .map(|ship| Box::new(ship) as Box<dyn Ship>),
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ShipError::Cancelled),
            result = launch => result,
        }
    }
}

#[cfg(test)]
#[path = "ship_tests.rs"]
mod tests;
