// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket ship: the HTTP-upgrade transport for networks where raw
//! TCP to unusual ports is filtered.

use std::net::SocketAddr;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{Ship, ShipError};
use crate::node::TransportKind;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct ReadHalf {
    stream: SplitStream<WsStream>,
    /// Bytes from the last message that did not fit the caller's buffer.
    leftover: Bytes,
}

pub struct WsShip {
    read: Mutex<Option<ReadHalf>>,
    write: Mutex<Option<SplitSink<WsStream, Message>>>,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
}

impl WsShip {
    pub async fn launch(addr: SocketAddr, path: Option<&str>) -> Result<Self, ShipError> {
        let path = path.unwrap_or("/");
        let url = format!("ws://{addr}{path}");
        let (socket, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| ShipError::Refused(e.to_string()))?;

        let (local, remote) = match socket.get_ref() {
            MaybeTlsStream::Plain(stream) => (stream.local_addr().ok(), stream.peer_addr().ok()),
            _ => (None, Some(addr)),
        };
        let (sink, stream) = socket.split();
        Ok(Self {
            read: Mutex::new(Some(ReadHalf { stream, leftover: Bytes::new() })),
            write: Mutex::new(Some(sink)),
            local,
            remote,
        })
    }

    fn fill(buf: &mut [u8], data: &mut Bytes) -> usize {
        let n = buf.len().min(data.len());
        buf[..n].copy_from_slice(&data[..n]);
        let _ = data.split_to(n);
        n
    }
}

#[async_trait::async_trait]
impl Ship for WsShip {
    async fn load(&self, data: &[u8]) -> Result<(), ShipError> {
        let mut guard = self.write.lock().await;
        let sink = guard.as_mut().ok_or(ShipError::Sunk)?;
        sink.send(Message::Binary(Bytes::copy_from_slice(data)))
            .await
            .map_err(|_| ShipError::Sunk)
    }

    async fn unload(&self, buf: &mut [u8]) -> Result<usize, ShipError> {
        let mut guard = self.read.lock().await;
        let half = guard.as_mut().ok_or(ShipError::Sunk)?;

        if !half.leftover.is_empty() {
            let mut data = std::mem::take(&mut half.leftover);
            let n = Self::fill(buf, &mut data);
            half.leftover = data;
            return Ok(n);
        }

        loop {
            match half.stream.next().await {
                Some(Ok(Message::Binary(payload))) => {
                    let mut data = payload;
                    let n = Self::fill(buf, &mut data);
                    half.leftover = data;
                    return Ok(n);
                }
                // Control frames are answered by tungstenite internally.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Err(ShipError::Sunk),
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(_)) => return Err(ShipError::Sunk),
            }
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Ws
    }

    async fn sink(&self) {
        if let Some(mut sink) = self.write.lock().await.take() {
            let _ = sink.close().await;
        }
        self.read.lock().await.take();
    }
}
