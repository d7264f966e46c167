//! Fixed-difficulty proof-of-work.
//!
//! The candidate preimage is
//! `prev_hash || merkle_root || hex(timestamp) || hex(target_bits) || hex(nonce)`
//! where the integer fields are lowercase hexadecimal ASCII, not raw bytes.
//! A hash wins when, read as a 256-bit big-endian integer, it is strictly
//! below `1 << (256 - TARGET_BITS)`.

use tracing::debug;

use crate::constants::{MAX_NONCE, TARGET_BITS};
use crate::crypto::sha256;
use crate::error::BlockError;
use crate::types::{Block, Hash256};

/// Lowercase hexadecimal ASCII encoding of a signed 64-bit integer.
fn hex_ascii(n: i64) -> Vec<u8> {
    format!("{n:x}").into_bytes()
}

/// Number of leading zero bits of a 256-bit big-endian integer.
fn leading_zero_bits(hash: &[u8; 32]) -> u32 {
    let mut bits = 0;
    for byte in hash {
        if *byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}

/// `hash < 1 << (256 - TARGET_BITS)` iff its top TARGET_BITS bits are zero.
fn meets_target(hash: &Hash256) -> bool {
    leading_zero_bits(hash.as_bytes()) >= TARGET_BITS
}

/// The hash preimage for a candidate nonce.
///
/// A genesis block (no previous hash) contributes zero bytes for the
/// `prev_hash` component. The merkle root is recomputed from the block's
/// transactions, so a tampered transaction invalidates the stored nonce.
fn prepare_data(block: &Block, merkle_root: &Hash256, nonce: i64) -> Vec<u8> {
    let mut data = Vec::new();
    if let Some(prev) = &block.prev_hash {
        data.extend_from_slice(prev.as_bytes());
    }
    data.extend_from_slice(merkle_root.as_bytes());
    data.extend_from_slice(&hex_ascii(block.timestamp));
    data.extend_from_slice(&hex_ascii(TARGET_BITS as i64));
    data.extend_from_slice(&hex_ascii(nonce));
    data
}

/// Search for a winning nonce, starting from zero.
///
/// Returns the nonce and the block hash. The block's timestamp is fixed by
/// the caller and never changes during the search.
pub fn run(block: &Block) -> Result<(i64, Hash256), BlockError> {
    let merkle_root = block.hash_transactions()?;
    let mut nonce: i64 = 0;

    debug!(height = block.height, "mining block");
    while nonce < MAX_NONCE {
        let hash = sha256(&prepare_data(block, &merkle_root, nonce));
        if meets_target(&hash) {
            debug!(nonce, %hash, "found nonce");
            return Ok((nonce, hash));
        }
        nonce += 1;
    }

    Err(BlockError::NonceExhausted)
}

/// Recompute the hash for the block's stored nonce and check the target.
pub fn validate(block: &Block) -> Result<bool, BlockError> {
    let merkle_root = block.hash_transactions()?;
    let hash = sha256(&prepare_data(block, &merkle_root, block.nonce));
    Ok(hash == block.hash && meets_target(&hash))
}
