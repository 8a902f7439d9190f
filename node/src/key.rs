//! Bridges the consensus engine's signing key into the transport identity.

use std::path::Path;

use libp2p::identity::{self, Keypair};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key type tag the consensus engine uses for edwards-curve 25519 keys.
pub const ED25519_KEY_TYPE: &str = "ed25519";

/// Signing key as the consensus engine hands it over: a scheme tag plus the
/// raw secret bytes.
#[derive(Debug, Clone)]
pub struct ConsensusKey {
    pub type_tag: String,
    pub bytes: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("key can't be nil")]
    NilKey,
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),
    #[error("error while decoding node private key: {0}")]
    Decode(#[from] identity::DecodingError),
}

/// Creates the transport keypair from the consensus engine's key. An absent
/// key or absent key material is a configuration problem distinct from
/// corrupt key material, which surfaces as [`KeyError::Decode`].
pub fn node_key(key: Option<&ConsensusKey>) -> Result<Keypair, KeyError> {
    let key = match key {
        Some(key) if !key.bytes.is_empty() => key,
        _ => return Err(KeyError::NilKey),
    };
    match key.type_tag.as_str() {
        ED25519_KEY_TYPE => Ok(Keypair::ed25519_from_bytes(key.bytes.clone())?),
        other => Err(KeyError::UnsupportedKeyType(other.to_string())),
    }
}

#[derive(Serialize, Deserialize)]
struct KeyFile {
    #[serde(rename = "type")]
    type_tag: String,
    /// hex-encoded secret key material
    value: String,
}

impl ConsensusKey {
    /// Reads a key the consensus engine persisted as json
    /// `{"type": ..., "value": <hex>}`.
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: KeyFile = serde_json::from_str(&raw)?;
        Ok(Self {
            type_tag: file.type_tag,
            bytes: hex::decode(file.value)?,
        })
    }

    /// Fresh ephemeral ed25519 key for nodes run without a configured one.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            type_tag: ED25519_KEY_TYPE.to_string(),
            bytes: bytes.to_vec(),
        }
    }
}
