//! A single keypair wallet.

use std::fmt;

use cobre_core::address::Address;
use cobre_core::crypto::KeyPair;
use cobre_core::types::Hash160;

use crate::error::WalletError;

/// An ECDSA P-256 keypair with its derived address.
pub struct Wallet {
    keypair: KeyPair,
}

impl Wallet {
    /// Generate a fresh wallet from the OS cryptographic RNG.
    pub fn generate() -> Self {
        Self {
            keypair: KeyPair::generate(),
        }
    }

    /// Restore a wallet from its persisted secret scalar.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Result<Self, WalletError> {
        Ok(Self {
            keypair: KeyPair::from_secret_bytes(secret)?,
        })
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// The uncompressed `X || Y` public key (64 bytes).
    pub fn public_key(&self) -> [u8; 64] {
        self.keypair.public_key_bytes()
    }

    /// The RIPEMD-160(SHA-256(pubkey)) output lock.
    pub fn pubkey_hash(&self) -> Hash160 {
        self.keypair.pubkey_hash()
    }

    /// The Base58Check address for this wallet's public key.
    pub fn address(&self) -> String {
        Address::from_pubkey(&self.public_key()).encode()
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobre_core::address::validate_address;

    #[test]
    fn generated_address_validates() {
        let wallet = Wallet::generate();
        assert!(validate_address(&wallet.address()));
    }

    #[test]
    fn address_commits_to_pubkey_hash() {
        let wallet = Wallet::generate();
        let decoded = Address::decode(&wallet.address()).unwrap();
        assert_eq!(decoded.pubkey_hash(), wallet.pubkey_hash());
    }

    #[test]
    fn secret_round_trip_preserves_address() {
        let wallet = Wallet::generate();
        let restored = Wallet::from_secret_bytes(&wallet.keypair().secret_bytes()).unwrap();
        assert_eq!(wallet.address(), restored.address());
    }

    #[test]
    fn distinct_wallets_have_distinct_addresses() {
        assert_ne!(Wallet::generate().address(), Wallet::generate().address());
    }
}
