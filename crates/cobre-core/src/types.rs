//! Core protocol types: transactions, blocks, UTXO records.
//!
//! All values are in whole coin units; the coinbase subsidy is
//! [`SUBSIDY`](crate::constants::SUBSIDY). Transaction IDs and block hashes
//! are SHA-256; output locks are 20-byte RIPEMD-160(SHA-256(pubkey)) hashes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::address::Address;
use crate::constants::SUBSIDY;
use crate::crypto;
use crate::error::{AddressError, BlockError, CobreError, TransactionError};
use crate::merkle;
use crate::pow;

/// A 32-byte SHA-256 hash value.
///
/// Used for transaction IDs, block hashes, and merkle roots.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash. Stands in for the "empty" txid of a coinbase input.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Parse the 64-character lowercase hex form produced by `Display`.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Some(Self(bytes.try_into().ok()?))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A 20-byte RIPEMD-160 hash locking a transaction output to a public key.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash160(pub [u8; 20]);

impl Hash160 {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl AsRef<[u8]> for Hash160 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A transaction input, spending an output of a previous transaction.
///
/// The coinbase input references nothing: `prev_txid` is the zero hash and
/// `prev_vout` is -1, with `pubkey` carrying an arbitrary tag.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// ID of the transaction whose output is being spent.
    pub prev_txid: Hash256,
    /// Index of the spent output within that transaction. -1 for coinbase.
    pub prev_vout: i64,
    /// ECDSA signature `r || s` (32 + 32 bytes). Empty until signed.
    pub signature: Vec<u8>,
    /// Spender's uncompressed public key `X || Y` (64 bytes), or the
    /// coinbase tag bytes.
    pub pubkey: Vec<u8>,
}

impl TxInput {
    /// The distinguished coinbase input carrying `tag` in its pubkey field.
    pub fn coinbase(tag: Vec<u8>) -> Self {
        Self {
            prev_txid: Hash256::ZERO,
            prev_vout: -1,
            signature: Vec::new(),
            pubkey: tag,
        }
    }

    /// Whether this input is the coinbase marker.
    pub fn is_coinbase_marker(&self) -> bool {
        self.prev_txid.is_zero() && self.prev_vout == -1
    }
}

/// A transaction output holding `value` coins locked to a pubkey hash.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    pub value: u64,
    pub pubkey_hash: Hash160,
}

impl TxOutput {
    /// Create an output of `value` locked to the pubkey hash encoded in
    /// `address`.
    pub fn new(value: u64, address: &str) -> Result<Self, AddressError> {
        let addr = Address::decode(address)?;
        Ok(Self {
            value,
            pubkey_hash: addr.pubkey_hash(),
        })
    }

    /// Whether this output is spendable by the owner of `pubkey_hash`.
    pub fn is_locked_with(&self, pubkey_hash: &Hash160) -> bool {
        self.pubkey_hash == *pubkey_hash
    }
}

/// The unspent outputs of a single transaction, as stored in the chainstate.
///
/// Each entry keeps its original output index so that spends can be matched
/// against `prev_vout` even after earlier outputs of the same transaction
/// were removed.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutputs {
    pub outputs: Vec<(i64, TxOutput)>,
}

/// A transaction transferring value between addresses.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// SHA-256 of the serialized transaction with this field zeroed.
    pub id: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Create a coinbase transaction paying the subsidy to `to`.
    ///
    /// An empty `tag` is replaced by 20 random bytes, hex-encoded.
    pub fn new_coinbase(to: &str, tag: &str) -> Result<Self, CobreError> {
        let tag_bytes = if tag.is_empty() {
            use rand::RngCore;
            let mut data = [0u8; 20];
            rand::rngs::OsRng.fill_bytes(&mut data);
            hex::encode(data).into_bytes()
        } else {
            tag.as_bytes().to_vec()
        };

        let mut tx = Self {
            id: Hash256::ZERO,
            inputs: vec![TxInput::coinbase(tag_bytes)],
            outputs: vec![TxOutput::new(SUBSIDY, to)?],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Serialize with bincode's standard configuration.
    pub fn serialize(&self) -> Result<Vec<u8>, TransactionError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, TransactionError> {
        let (tx, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))?;
        Ok(tx)
    }

    /// Compute the transaction ID: SHA-256 of the serialized transaction
    /// with the `id` field zeroed.
    pub fn hash(&self) -> Result<Hash256, TransactionError> {
        let mut copy = self.clone();
        copy.id = Hash256::ZERO;
        Ok(crypto::sha256(&copy.serialize()?))
    }

    /// Whether this is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase_marker()
    }

    /// Copy with every input stripped of signature and pubkey.
    ///
    /// The signing message for each input is derived from this copy with the
    /// spent output's lock spliced into that input's pubkey field.
    pub fn trimmed_copy(&self) -> Self {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput {
                prev_txid: input.prev_txid,
                prev_vout: input.prev_vout,
                signature: Vec::new(),
                pubkey: Vec::new(),
            })
            .collect();

        Self {
            id: self.id,
            inputs,
            outputs: self.outputs.clone(),
        }
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Transaction {}:", self.id)?;
        for (i, input) in self.inputs.iter().enumerate() {
            writeln!(f, "  Input {i}:")?;
            writeln!(f, "    Txid:      {}", input.prev_txid)?;
            writeln!(f, "    Out:       {}", input.prev_vout)?;
            writeln!(f, "    Signature: {}", hex::encode(&input.signature))?;
            writeln!(f, "    PubKey:    {}", hex::encode(&input.pubkey))?;
        }
        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "  Output {i}:")?;
            writeln!(f, "    Value:  {}", output.value)?;
            writeln!(f, "    Script: {}", output.pubkey_hash)?;
        }
        Ok(())
    }
}

/// A block: proof-of-work header fields plus the transaction list.
///
/// Genesis has `prev_hash = None` and `height = 0`. The first transaction of
/// every block is a coinbase.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    /// Unix timestamp fixed at construction, before the nonce search.
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    /// Hash of the previous block; `None` only for genesis.
    pub prev_hash: Option<Hash256>,
    pub hash: Hash256,
    pub nonce: i64,
    pub height: u64,
}

impl Block {
    /// Assemble and mine a block on top of `prev_hash`.
    pub fn new(
        transactions: Vec<Transaction>,
        prev_hash: Option<Hash256>,
        height: u64,
    ) -> Result<Self, CobreError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        let mut block = Self {
            timestamp,
            transactions,
            prev_hash,
            hash: Hash256::ZERO,
            nonce: 0,
            height,
        };
        let (nonce, hash) = pow::run(&block)?;
        block.nonce = nonce;
        block.hash = hash;
        Ok(block)
    }

    /// Mine the genesis block from a single coinbase transaction.
    pub fn genesis(coinbase: Transaction) -> Result<Self, CobreError> {
        Self::new(vec![coinbase], None, 0)
    }

    /// Merkle root over the serialized transactions.
    pub fn hash_transactions(&self) -> Result<Hash256, BlockError> {
        let mut items = Vec::with_capacity(self.transactions.len());
        for tx in &self.transactions {
            items.push(
                tx.serialize()
                    .map_err(|e| BlockError::Serialization(e.to_string()))?,
            );
        }
        Ok(merkle::merkle_root(&items))
    }

    pub fn serialize(&self) -> Result<Vec<u8>, BlockError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| BlockError::Serialization(e.to_string()))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, BlockError> {
        let (block, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| BlockError::Serialization(e.to_string()))?;
        Ok(block)
    }
}
