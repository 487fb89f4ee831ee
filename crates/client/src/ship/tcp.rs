// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Raw TCP ship.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::{Ship, ShipError};
use crate::node::TransportKind;

pub struct TcpShip {
    read: Mutex<Option<OwnedReadHalf>>,
    write: Mutex<Option<OwnedWriteHalf>>,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
}

impl TcpShip {
    pub async fn launch(addr: SocketAddr) -> Result<Self, ShipError> {
        let stream =
            TcpStream::connect(addr).await.map_err(|e| ShipError::Refused(e.to_string()))?;
        stream.set_nodelay(true).ok();
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let local = stream.local_addr().ok();
        let remote = stream.peer_addr().ok();
        let (read, write) = stream.into_split();
        Self {
            read: Mutex::new(Some(read)),
            write: Mutex::new(Some(write)),
            local,
            remote,
        }
    }
}

#[async_trait::async_trait]
impl Ship for TcpShip {
    async fn load(&self, data: &[u8]) -> Result<(), ShipError> {
        let mut guard = self.write.lock().await;
        let stream = guard.as_mut().ok_or(ShipError::Sunk)?;
        stream.write_all(data).await.map_err(|_| ShipError::Sunk)
    }

    async fn unload(&self, buf: &mut [u8]) -> Result<usize, ShipError> {
        let mut guard = self.read.lock().await;
        let stream = guard.as_mut().ok_or(ShipError::Sunk)?;
        match stream.read(buf).await {
            Ok(0) => Err(ShipError::Sunk),
            Ok(n) => Ok(n),
            Err(_) => Err(ShipError::Sunk),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Tcp
    }

    async fn sink(&self) {
        if let Some(mut write) = self.write.lock().await.take() {
            let _ = write.shutdown().await;
        }
        self.read.lock().await.take();
    }
}
