// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local client identity: one Ed25519 keypair, persisted as PKCS#8.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde_json::json;

use crate::node::HubId;
use crate::storage::{keys, Storage};

/// The client's signing identity.
pub struct Identity {
    keypair: Ed25519KeyPair,
    pkcs8_b64: String,
    id: HubId,
}

impl Identity {
    /// Generate a fresh identity.
    pub fn generate() -> anyhow::Result<Self> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| anyhow::anyhow!("identity key generation failed"))?;
        Self::from_pkcs8(pkcs8.as_ref())
    }

    fn from_pkcs8(pkcs8: &[u8]) -> anyhow::Result<Self> {
        let keypair = Ed25519KeyPair::from_pkcs8(pkcs8)
            .map_err(|_| anyhow::anyhow!("identity record is not a valid Ed25519 key"))?;
        let id = HubId::from_public_key(keypair.public_key().as_ref());
        Ok(Self { keypair, pkcs8_b64: B64.encode(pkcs8), id })
    }

    /// Load the persisted identity, creating one on first run.
    ///
    /// A present-but-malformed record is fatal: regenerating would
    /// silently change the client's identity.
    pub async fn load_or_create(store: &dyn Storage) -> anyhow::Result<Self> {
        match store.get(keys::IDENTITY).await? {
            Some(record) => {
                let pkcs8_b64 = record
                    .get("pkcs8")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("identity record is malformed"))?;
                let pkcs8 = B64.decode(pkcs8_b64)?;
                Self::from_pkcs8(&pkcs8)
            }
            None => {
                let identity = Self::generate()?;
                store.put(keys::IDENTITY, json!({ "pkcs8": identity.pkcs8_b64 })).await?;
                tracing::info!(id = %identity.id, "generated new client identity");
                Ok(identity)
            }
        }
    }

    pub fn id(&self) -> &HubId {
        &self.id
    }

    pub fn public_key_b64(&self) -> String {
        B64.encode(self.keypair.public_key().as_ref())
    }

    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.keypair.sign(data).as_ref().to_vec()
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
