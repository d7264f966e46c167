//! Persistent wallet set.
//!
//! Serialized as a bincode map `address -> {secret, public}` in
//! `wallet_<NODE_ID>.dat`, loaded on startup when present.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::info;

use cobre_core::crypto::KeyPair;

use crate::error::WalletError;
use crate::wallet::Wallet;

/// On-disk record for one wallet.
#[derive(bincode::Encode, bincode::Decode)]
struct StoredWallet {
    secret: [u8; 32],
    public: [u8; 64],
}

/// The set of wallets known to a node, keyed by address.
pub struct WalletStore {
    path: PathBuf,
    wallets: HashMap<String, Wallet>,
}

impl WalletStore {
    /// The wallet file path for a node id.
    pub fn wallet_file(node_id: &str) -> PathBuf {
        PathBuf::from(format!("wallet_{node_id}.dat"))
    }

    /// Load the wallet file at `path`, or start an empty set if absent.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(Self {
                path,
                wallets: HashMap::new(),
            });
        }

        let bytes = std::fs::read(&path)?;
        let (stored, _): (HashMap<String, StoredWallet>, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| WalletError::Corrupt(e.to_string()))?;

        let mut wallets = HashMap::with_capacity(stored.len());
        for (address, record) in stored {
            wallets.insert(address, Wallet::from_secret_bytes(&record.secret)?);
        }
        info!(count = wallets.len(), path = %path.display(), "loaded wallet file");
        Ok(Self { path, wallets })
    }

    /// Generate a wallet, add it to the set, persist, and return its address.
    pub fn create_wallet(&mut self) -> Result<String, WalletError> {
        let wallet = Wallet::generate();
        let address = wallet.address();
        self.wallets.insert(address.clone(), wallet);
        self.save()?;
        Ok(address)
    }

    /// Look up a wallet by address.
    pub fn get(&self, address: &str) -> Result<&Wallet, WalletError> {
        self.wallets
            .get(address)
            .ok_or_else(|| WalletError::UnknownAddress(address.to_string()))
    }

    /// All known addresses, unordered.
    pub fn addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    /// Write the whole set back to the wallet file.
    pub fn save(&self) -> Result<(), WalletError> {
        let stored: HashMap<String, StoredWallet> = self
            .wallets
            .iter()
            .map(|(address, wallet)| {
                (
                    address.clone(),
                    StoredWallet {
                        secret: wallet.keypair().secret_bytes(),
                        public: wallet.public_key(),
                    },
                )
            })
            .collect();

        let bytes = bincode::encode_to_vec(&stored, bincode::config::standard())
            .map_err(|e| WalletError::Corrupt(e.to_string()))?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (WalletStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = WalletStore::load_or_create(dir.path().join("wallet_test.dat")).unwrap();
        (store, dir)
    }

    #[test]
    fn starts_empty_without_file() {
        let (store, _dir) = temp_store();
        assert!(store.is_empty());
        assert!(store.addresses().is_empty());
    }

    #[test]
    fn create_wallet_is_retrievable() {
        let (mut store, _dir) = temp_store();
        let address = store.create_wallet().unwrap();
        assert_eq!(store.get(&address).unwrap().address(), address);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unknown_address_errors() {
        let (store, _dir) = temp_store();
        assert!(matches!(
            store.get("nope"),
            Err(WalletError::UnknownAddress(_))
        ));
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet_7.dat");

        let mut store = WalletStore::load_or_create(&path).unwrap();
        let a = store.create_wallet().unwrap();
        let b = store.create_wallet().unwrap();

        let reloaded = WalletStore::load_or_create(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(&a).unwrap().address(), a);
        assert_eq!(reloaded.get(&b).unwrap().address(), b);
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet_bad.dat");
        std::fs::write(&path, [0xFF, 0xFE, 0xFD]).unwrap();
        assert!(matches!(
            WalletStore::load_or_create(&path),
            Err(WalletError::Corrupt(_))
        ));
    }

    #[test]
    fn wallet_file_name_includes_node_id() {
        assert_eq!(
            WalletStore::wallet_file("3000"),
            PathBuf::from("wallet_3000.dat")
        );
    }
}
