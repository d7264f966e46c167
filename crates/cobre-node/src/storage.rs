//! RocksDB-backed block store.
//!
//! One database per node with two column families standing in for the
//! original storage buckets: `blocks` maps a block hash to its serialized
//! block (plus the distinguished key `"l"` holding the tip hash), and
//! `chainstate` holds the UTXO set maintained by
//! [`UtxoSet`](crate::utxo::UtxoSet). All mutations go through atomic
//! [`WriteBatch`]es.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use rocksdb::{DB, Options, WriteBatch};
use tracing::info;

use cobre_core::constants::GENESIS_COINBASE_TAG;
use cobre_core::crypto::{self, KeyPair};
use cobre_core::error::{CobreError, StoreError, TransactionError};
use cobre_core::pow;
use cobre_core::types::{Block, Hash256, Transaction, TxOutputs};

pub(crate) const CF_BLOCKS: &str = "blocks";
pub(crate) const CF_CHAINSTATE: &str = "chainstate";

/// Key in the `blocks` column family holding the current tip hash.
const TIP_KEY: &[u8] = b"l";

pub(crate) fn storage_err(e: impl ToString) -> CobreError {
    StoreError::Storage(e.to_string()).into()
}

/// The persistent, append-only block chain.
///
/// The tip hash is cached in memory and kept in sync with the `"l"` key;
/// the write lock around it serializes mining against gossip appends.
pub struct Blockchain {
    db: Arc<DB>,
    tip: RwLock<Hash256>,
}

impl Blockchain {
    fn open_db(path: impl AsRef<Path>) -> Result<Arc<DB>, CobreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let db = DB::open_cf(&opts, path.as_ref(), [CF_BLOCKS, CF_CHAINSTATE])
            .map_err(storage_err)?;
        Ok(Arc::new(db))
    }

    fn read_tip(db: &DB) -> Result<Option<Hash256>, CobreError> {
        let cf = db
            .cf_handle(CF_BLOCKS)
            .ok_or_else(|| storage_err("missing column family: blocks"))?;
        match db.get_cf(cf, TIP_KEY).map_err(storage_err)? {
            Some(bytes) if bytes.len() == 32 => {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes);
                Ok(Some(Hash256(hash)))
            }
            Some(_) => Err(storage_err("corrupt tip value")),
            None => Ok(None),
        }
    }

    /// Initialize a new chain at `path`, mining a genesis block that awards
    /// the subsidy to `address`.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if a tip is already present.
    pub fn create(path: impl AsRef<Path>, address: &str) -> Result<Self, CobreError> {
        let db = Self::open_db(path)?;
        if Self::read_tip(&db)?.is_some() {
            return Err(StoreError::AlreadyExists.into());
        }

        let coinbase = Transaction::new_coinbase(address, GENESIS_COINBASE_TAG)?;
        let genesis = Block::genesis(coinbase)?;

        let chain = Self {
            db,
            tip: RwLock::new(genesis.hash),
        };
        chain.commit_block(&genesis, true)?;
        info!(hash = %genesis.hash, "created blockchain");
        Ok(chain)
    }

    /// Open an existing chain at `path`.
    ///
    /// Fails with [`StoreError::MissingTip`] if none was created there.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CobreError> {
        let db = Self::open_db(path)?;
        let tip = Self::read_tip(&db)?.ok_or(StoreError::MissingTip)?;
        Ok(Self {
            db,
            tip: RwLock::new(tip),
        })
    }

    pub(crate) fn db(&self) -> &Arc<DB> {
        &self.db
    }

    fn cf_blocks(&self) -> Result<&rocksdb::ColumnFamily, CobreError> {
        self.db
            .cf_handle(CF_BLOCKS)
            .ok_or_else(|| storage_err("missing column family: blocks"))
    }

    pub(crate) fn cf_chainstate(&self) -> Result<&rocksdb::ColumnFamily, CobreError> {
        self.db
            .cf_handle(CF_CHAINSTATE)
            .ok_or_else(|| storage_err("missing column family: chainstate"))
    }

    /// Atomically persist `block`, advancing the `"l"` key when asked.
    fn commit_block(&self, block: &Block, advance_tip: bool) -> Result<(), CobreError> {
        let cf = self.cf_blocks()?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, block.hash.as_bytes(), block.serialize()?);
        if advance_tip {
            batch.put_cf(cf, TIP_KEY, block.hash.as_bytes());
        }
        self.db.write(batch).map_err(storage_err)
    }

    fn fetch_block(&self, hash: &Hash256) -> Result<Block, CobreError> {
        let cf = self.cf_blocks()?;
        let bytes = self
            .db
            .get_cf(cf, hash.as_bytes())
            .map_err(storage_err)?
            .ok_or_else(|| StoreError::BlockNotFound(hash.to_string()))?;
        Ok(Block::deserialize(&bytes)?)
    }

    /// The current tip hash.
    pub fn tip(&self) -> Hash256 {
        *self.tip.read()
    }

    pub fn get_block(&self, hash: &Hash256) -> Result<Block, CobreError> {
        self.fetch_block(hash)
    }

    /// Height of the best block.
    pub fn get_best_height(&self) -> Result<u64, CobreError> {
        let tip = self.tip();
        Ok(self.fetch_block(&tip)?.height)
    }

    /// Verify, mine, and append a block containing `transactions`.
    ///
    /// Every non-coinbase transaction must verify against the current chain;
    /// a failure aborts the whole operation.
    pub fn mine_block(&self, transactions: Vec<Transaction>) -> Result<Block, CobreError> {
        for tx in &transactions {
            if !self.verify_transaction(tx)? {
                return Err(TransactionError::Invalid(tx.id.to_string()).into());
            }
        }

        let mut tip = self.tip.write();
        let height = self.fetch_block(&tip)?.height + 1;
        let block = Block::new(transactions, Some(*tip), height)?;
        self.commit_block(&block, true)?;
        *tip = block.hash;
        info!(height, hash = %block.hash, "mined block");
        Ok(block)
    }

    /// Append a block received from a peer.
    ///
    /// A block whose hash is already stored is ignored. The tip advances
    /// only when the new block's height is strictly greater than the current
    /// best; the predecessor is not required to be present.
    pub fn add_block(&self, block: &Block) -> Result<(), CobreError> {
        let mut tip = self.tip.write();
        let cf = self.cf_blocks()?;
        if self
            .db
            .get_cf(cf, block.hash.as_bytes())
            .map_err(storage_err)?
            .is_some()
        {
            return Ok(());
        }

        let best_height = self.fetch_block(&tip)?.height;
        let advance = block.height > best_height;
        self.commit_block(block, advance)?;
        if advance {
            *tip = block.hash;
        }
        info!(height = block.height, hash = %block.hash, advance, "added block");
        Ok(())
    }

    /// Hashes of every block from the tip back to genesis, tip first.
    pub fn get_block_hashes(&self) -> Result<Vec<Hash256>, CobreError> {
        let mut hashes = Vec::new();
        for block in self.iter() {
            hashes.push(block?.hash);
        }
        Ok(hashes)
    }

    /// Lazy walk from the tip back to genesis.
    ///
    /// The iterator owns its cursor and is not restartable; create a new one
    /// per walk.
    pub fn iter(&self) -> ChainIterator {
        ChainIterator {
            db: Arc::clone(&self.db),
            current: Some(self.tip()),
        }
    }

    /// Find a transaction anywhere in the chain by id.
    pub fn find_transaction(&self, id: &Hash256) -> Result<Transaction, CobreError> {
        for block in self.iter() {
            for tx in block?.transactions {
                if tx.id == *id {
                    return Ok(tx);
                }
            }
        }
        Err(StoreError::TransactionNotFound(id.to_string()).into())
    }

    /// Every transaction referenced by `tx`'s inputs, keyed by hex id.
    fn referenced_transactions(
        &self,
        tx: &Transaction,
    ) -> Result<HashMap<String, Transaction>, CobreError> {
        let mut prev_txs = HashMap::new();
        for input in &tx.inputs {
            let prev = self.find_transaction(&input.prev_txid)?;
            prev_txs.insert(prev.id.to_string(), prev);
        }
        Ok(prev_txs)
    }

    /// Sign `tx` against the outputs it spends, resolved by chain scan.
    pub fn sign_transaction(
        &self,
        tx: &mut Transaction,
        keypair: &KeyPair,
    ) -> Result<(), CobreError> {
        if tx.is_coinbase() {
            return Ok(());
        }
        let prev_txs = self.referenced_transactions(tx)?;
        crypto::sign_transaction(tx, keypair, &prev_txs)?;
        Ok(())
    }

    /// Verify `tx` against the outputs it spends, resolved by chain scan.
    ///
    /// A missing previous transaction is an error; a bad signature returns
    /// `false`.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool, CobreError> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.referenced_transactions(tx)?;
        Ok(crypto::verify_transaction(tx, &prev_txs)?)
    }

    /// One pass over the whole chain collecting every unspent output.
    ///
    /// Walking tip-first guarantees a spending input is seen before the
    /// output it consumes.
    pub fn find_all_utxo(&self) -> Result<HashMap<Hash256, TxOutputs>, CobreError> {
        let mut utxo: HashMap<Hash256, TxOutputs> = HashMap::new();
        let mut spent: HashMap<Hash256, Vec<i64>> = HashMap::new();

        for block in self.iter() {
            for tx in block?.transactions {
                for (index, output) in tx.outputs.iter().enumerate() {
                    let index = index as i64;
                    if spent.get(&tx.id).is_some_and(|v| v.contains(&index)) {
                        continue;
                    }
                    utxo.entry(tx.id)
                        .or_default()
                        .outputs
                        .push((index, output.clone()));
                }
                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        spent.entry(input.prev_txid).or_default().push(input.prev_vout);
                    }
                }
            }
        }

        Ok(utxo)
    }

    /// Validate the stored proof-of-work of a block (used by maintenance
    /// commands; gossip acceptance is height-based per the peer protocol).
    pub fn validate_pow(&self, block: &Block) -> Result<bool, CobreError> {
        Ok(pow::validate(block)?)
    }
}

/// Finite, non-restartable walk from a chain tip back to genesis.
pub struct ChainIterator {
    db: Arc<DB>,
    current: Option<Hash256>,
}

impl Iterator for ChainIterator {
    type Item = Result<Block, CobreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current?;
        let Some(cf) = self.db.cf_handle(CF_BLOCKS) else {
            self.current = None;
            return Some(Err(storage_err("missing column family: blocks")));
        };

        let bytes = match self.db.get_cf(cf, hash.as_bytes()) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.current = None;
                return Some(Err(StoreError::BlockNotFound(hash.to_string()).into()));
            }
            Err(e) => {
                self.current = None;
                return Some(Err(storage_err(e)));
            }
        };

        match Block::deserialize(&bytes) {
            Ok(block) => {
                self.current = block.prev_hash;
                Some(Ok(block))
            }
            Err(e) => {
                self.current = None;
                Some(Err(e.into()))
            }
        }
    }
}
