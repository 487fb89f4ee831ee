// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal frame codec: `[op u8][seq u64 BE][len u32 BE][payload]`.
//!
//! Sequence numbers pair requests with replies; unsolicited frames carry
//! sequence zero.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Operation codes on the terminal pipe.
pub mod ops {
    pub const HELLO: u8 = 1;
    pub const HELLO_ACK: u8 = 2;
    pub const PING: u8 = 3;
    pub const PONG: u8 = 4;
    pub const GOSSIP: u8 = 5;
    pub const QUERY: u8 = 6;
    pub const QUERY_DONE: u8 = 7;
}

/// Hard cap on payload size; anything larger is a protocol violation.
pub const MAX_PAYLOAD: usize = 1 << 20;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub op: u8,
    pub seq: u64,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(op: u8, seq: u64, payload: impl Into<Bytes>) -> Self {
        Self { op, seq, payload: payload.into() }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(13 + self.payload.len());
        buf.put_u8(self.op);
        buf.put_u64(self.seq);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// Incremental decoder over an unframed byte stream.
#[derive(Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

/// Decoder outcome for one [`FrameDecoder::next`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame.
    Frame(Frame),
    /// More bytes are needed.
    Incomplete,
    /// The stream is not speaking this protocol.
    Malformed(String),
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Try to decode the next frame from buffered bytes.
    pub fn next(&mut self) -> Decoded {
        if self.buf.len() < 13 {
            return Decoded::Incomplete;
        }
        let len = u32::from_be_bytes([self.buf[9], self.buf[10], self.buf[11], self.buf[12]]) as usize;
        if len > MAX_PAYLOAD {
            return Decoded::Malformed(format!("payload of {len} bytes exceeds the cap"));
        }
        if self.buf.len() < 13 + len {
            return Decoded::Incomplete;
        }
        let op = self.buf.get_u8();
        let seq = self.buf.get_u64();
        let _len = self.buf.get_u32();
        let payload = self.buf.split_to(len).freeze();
        Decoded::Frame(Frame { op, seq, payload })
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
