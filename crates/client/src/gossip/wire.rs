// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gossip wire format.
//!
//! One message is `[kind u8][len u32 BE][payload]`; the payload is
//! `[format u8][signed blob]`. Unknown kinds and formats are rejected as
//! malformed. The signed blob is JSON carrying the signing key (or the
//! hub id for statuses), the signature, and the serialized record.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use ring::signature::{UnparsedPublicKey, ED25519};
use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::node::{HubAnnouncement, HubId, HubStatus};

/// Self-describing payload format tag. JSON is the only format this
/// build emits or accepts.
const FORMAT_JSON: u8 = 1;

/// Message kinds on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GossipKind {
    Announcement,
    Status,
}

impl GossipKind {
    fn to_wire(self) -> u8 {
        match self {
            Self::Announcement => 1,
            Self::Status => 2,
        }
    }

    fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Announcement),
            2 => Some(Self::Status),
            _ => None,
        }
    }
}

/// Why a message was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    Truncated,
    UnknownKind(u8),
    UnknownFormat(u8),
    BadSignature,
    BadPayload(String),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => f.write_str("truncated message"),
            Self::UnknownKind(kind) => write!(f, "unknown message kind {kind}"),
            Self::UnknownFormat(tag) => write!(f, "unknown payload format {tag}"),
            Self::BadSignature => f.write_str("signature verification failed"),
            Self::BadPayload(detail) => write!(f, "bad payload: {detail}"),
        }
    }
}

impl std::error::Error for WireError {}

/// The decoded record inside a verified message.
#[derive(Debug, Clone)]
pub enum GossipRecord {
    Announcement(HubAnnouncement),
    Status(HubStatus),
}

/// A verified gossip message, with the raw bytes kept for relaying.
#[derive(Debug, Clone)]
pub struct GossipMessage {
    pub kind: GossipKind,
    pub hub: HubId,
    pub timestamp: u64,
    pub record: GossipRecord,
    pub raw: Bytes,
}

#[derive(Serialize, Deserialize)]
struct SignedBlob {
    /// Base64 Ed25519 key; present on announcements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    /// Subject hub id; present on statuses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    sig: String,
    /// Base64 of the serialized record the signature covers.
    data: String,
}

fn envelope(kind: GossipKind, blob: &SignedBlob) -> Result<Bytes, WireError> {
    let blob_json = serde_json::to_vec(blob).map_err(|e| WireError::BadPayload(e.to_string()))?;
    let mut payload = BytesMut::with_capacity(1 + blob_json.len());
    payload.put_u8(FORMAT_JSON);
    payload.put_slice(&blob_json);

    let mut out = BytesMut::with_capacity(5 + payload.len());
    out.put_u8(kind.to_wire());
    out.put_u32(payload.len() as u32);
    out.put_slice(&payload);
    Ok(out.freeze())
}

/// Sign and encode an announcement. The signer must be the announced key.
pub fn encode_announcement(
    signer: &Identity,
    announcement: &HubAnnouncement,
) -> Result<Bytes, WireError> {
    let data =
        serde_json::to_vec(announcement).map_err(|e| WireError::BadPayload(e.to_string()))?;
    let blob = SignedBlob {
        key: Some(signer.public_key_b64()),
        id: None,
        sig: B64.encode(signer.sign(&data)),
        data: B64.encode(&data),
    };
    envelope(GossipKind::Announcement, &blob)
}

/// Sign and encode a status for the hub owning `signer`.
pub fn encode_status(
    signer: &Identity,
    hub: &HubId,
    status: &HubStatus,
) -> Result<Bytes, WireError> {
    let data = serde_json::to_vec(status).map_err(|e| WireError::BadPayload(e.to_string()))?;
    let blob = SignedBlob {
        key: None,
        id: Some(hub.as_str().to_owned()),
        sig: B64.encode(signer.sign(&data)),
        data: B64.encode(&data),
    };
    envelope(GossipKind::Status, &blob)
}

fn verify(key_b64: &str, data: &[u8], sig: &[u8]) -> Result<(), WireError> {
    let key = B64.decode(key_b64).map_err(|_| WireError::BadSignature)?;
    UnparsedPublicKey::new(&ED25519, key)
        .verify(data, sig)
        .map_err(|_| WireError::BadSignature)
}

/// Decode and verify one message.
///
/// `key_lookup` resolves a hub id to its announced key so statuses are
/// verified against the announcement they belong to. A status for an
/// unknown hub fails the lookup and is rejected unverifiable.
pub fn decode(
    bytes: &[u8],
    key_lookup: impl Fn(&HubId) -> Option<String>,
) -> Result<GossipMessage, WireError> {
    if bytes.len() < 6 {
        return Err(WireError::Truncated);
    }
    let kind = GossipKind::from_wire(bytes[0]).ok_or(WireError::UnknownKind(bytes[0]))?;
    let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    let payload = bytes.get(5..5 + len).ok_or(WireError::Truncated)?;
    if payload.is_empty() {
        return Err(WireError::Truncated);
    }

    let format = payload[0];
    if format != FORMAT_JSON {
        return Err(WireError::UnknownFormat(format));
    }
    let blob: SignedBlob =
        serde_json::from_slice(&payload[1..]).map_err(|e| WireError::BadPayload(e.to_string()))?;
    let data = B64.decode(&blob.data).map_err(|e| WireError::BadPayload(e.to_string()))?;
    let sig = B64.decode(&blob.sig).map_err(|e| WireError::BadPayload(e.to_string()))?;

    match kind {
        GossipKind::Announcement => {
            let key = blob.key.ok_or_else(|| WireError::BadPayload("missing key".into()))?;
            verify(&key, &data, &sig)?;
            let announcement: HubAnnouncement =
                serde_json::from_slice(&data).map_err(|e| WireError::BadPayload(e.to_string()))?;
            if announcement.public_key != key {
                return Err(WireError::BadPayload("embedded key mismatch".into()));
            }
            let raw_key = B64.decode(&key).map_err(|_| WireError::BadSignature)?;
            let hub = HubId::from_public_key(&raw_key);
            Ok(GossipMessage {
                kind,
                hub,
                timestamp: announcement.timestamp,
                record: GossipRecord::Announcement(announcement),
                raw: Bytes::copy_from_slice(bytes),
            })
        }
        GossipKind::Status => {
            let id = blob.id.ok_or_else(|| WireError::BadPayload("missing hub id".into()))?;
            let hub = HubId::from(id);
            let key = key_lookup(&hub).ok_or(WireError::BadSignature)?;
            verify(&key, &data, &sig)?;
            let status: HubStatus =
                serde_json::from_slice(&data).map_err(|e| WireError::BadPayload(e.to_string()))?;
            Ok(GossipMessage {
                kind,
                hub,
                timestamp: status.timestamp,
                record: GossipRecord::Status(status),
                raw: Bytes::copy_from_slice(bytes),
            })
        }
    }
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
