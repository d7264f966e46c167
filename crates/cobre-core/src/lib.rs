//! # cobre-core
//! Foundation types for the Cobre protocol: transactions, blocks,
//! proof-of-work, ECDSA P-256 signatures, and Base58Check addresses.

pub mod address;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod mempool;
pub mod merkle;
pub mod pow;
pub mod types;
