//! Wallet error types.
use thiserror::Error;

use cobre_core::error::CryptoError;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("io: {0}")] Io(#[from] std::io::Error),
    #[error("wallet file corrupt: {0}")] Corrupt(String),
    #[error("no wallet for address: {0}")] UnknownAddress(String),
    #[error(transparent)] Crypto(#[from] CryptoError),
}
