//! Error types for the Cobre protocol.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("insufficient funds: have {have}, need {need}")] InsufficientFunds { have: u64, need: u64 },
    #[error("invalid transaction: {0}")] Invalid(String),
    #[error("serialization: {0}")] Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("nonce space exhausted")] NonceExhausted,
    #[error("serialization: {0}")] Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid length: {0}")] InvalidLength(usize),
    #[error("invalid checksum")] InvalidChecksum,
    #[error("base58 decode: {0}")] Decode(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid secret key bytes")] InvalidSecretKey,
    #[error("missing previous transaction: {0}")] MissingPrevTx(String),
    #[error("referenced output {vout} of {txid} does not exist")] MissingPrevOutput { txid: String, vout: i64 },
    #[error("serialization: {0}")] Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("blockchain already exists")] AlreadyExists,
    #[error("no existing blockchain found; create one first")] MissingTip,
    #[error("block not found: {0}")] BlockNotFound(String),
    #[error("transaction not found: {0}")] TransactionNotFound(String),
    #[error("storage: {0}")] Storage(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("frame too short: {0} bytes")] FrameTooShort(usize),
    #[error("peer unreachable: {0}")] PeerUnreachable(String),
    #[error("bind {addr}: {reason}")] Bind { addr: String, reason: String },
    #[error("unknown command: {0}")] UnknownCommand(String),
    #[error("decode: {0}")] Decode(String),
    #[error("encode: {0}")] Encode(String),
}

#[derive(Error, Debug)]
pub enum CobreError {
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] Address(#[from] AddressError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Network(#[from] NetworkError),
}
