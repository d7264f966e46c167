//! Base58Check address encoding.
//!
//! An address encodes `version || pubkey_hash || checksum` where the
//! checksum is the first four bytes of a double SHA-256 over the versioned
//! payload. The current version byte is 0x00.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::crypto::hash_pubkey;
use crate::error::AddressError;
use crate::types::Hash160;

/// Current address version byte.
pub const ADDRESS_VERSION: u8 = 0x00;

/// Checksum length in bytes.
pub const CHECKSUM_LEN: usize = 4;

/// First four bytes of SHA-256(SHA-256(payload)).
fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    second[..CHECKSUM_LEN].try_into().unwrap()
}

/// A decoded address: version byte plus the pubkey hash it locks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    version: u8,
    pubkey_hash: Hash160,
}

impl Address {
    /// Address for a pubkey hash, with the current version byte.
    pub fn from_pubkey_hash(pubkey_hash: Hash160) -> Self {
        Self {
            version: ADDRESS_VERSION,
            pubkey_hash,
        }
    }

    /// Address for an `X || Y` public key.
    pub fn from_pubkey(pubkey: &[u8]) -> Self {
        Self::from_pubkey_hash(hash_pubkey(pubkey))
    }

    /// The pubkey hash this address locks to.
    pub fn pubkey_hash(&self) -> Hash160 {
        self.pubkey_hash
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// Encode as Base58Check.
    pub fn encode(&self) -> String {
        let mut payload = Vec::with_capacity(1 + 20 + CHECKSUM_LEN);
        payload.push(self.version);
        payload.extend_from_slice(self.pubkey_hash.as_bytes());
        let check = checksum(&payload);
        payload.extend_from_slice(&check);
        bs58::encode(payload).into_string()
    }

    /// Decode and checksum-verify a Base58Check address string.
    pub fn decode(s: &str) -> Result<Self, AddressError> {
        let payload = bs58::decode(s)
            .into_vec()
            .map_err(|e| AddressError::Decode(e.to_string()))?;
        if payload.len() != 1 + 20 + CHECKSUM_LEN {
            return Err(AddressError::InvalidLength(payload.len()));
        }

        let (versioned, check) = payload.split_at(payload.len() - CHECKSUM_LEN);
        if checksum(versioned) != check {
            return Err(AddressError::InvalidChecksum);
        }

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&versioned[1..]);
        Ok(Self {
            version: versioned[0],
            pubkey_hash: Hash160(hash),
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Whether `s` is a well-formed address with a valid checksum.
pub fn validate_address(s: &str) -> bool {
    Address::decode(s).is_ok()
}
