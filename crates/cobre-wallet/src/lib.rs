//! # cobre-wallet
//! Keypair wallets, address derivation, and the persistent wallet file.

pub mod error;
pub mod store;
pub mod wallet;

pub use error::WalletError;
pub use store::WalletStore;
pub use wallet::Wallet;
