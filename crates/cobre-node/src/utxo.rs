//! Materialized view of unspent transaction outputs.
//!
//! The `chainstate` column family maps a 32-byte txid to the
//! [`TxOutputs`] record of that transaction's still-unspent outputs. Each
//! record stores `(original_index, output)` pairs, so removing an entry
//! never renumbers the survivors.

use std::collections::HashMap;
use std::sync::Arc;

use rocksdb::{IteratorMode, WriteBatch};
use tracing::info;

use cobre_core::address::Address;
use cobre_core::crypto::KeyPair;
use cobre_core::error::{CobreError, StoreError, TransactionError};
use cobre_core::types::{Block, Hash160, Hash256, Transaction, TxInput, TxOutput, TxOutputs};

use crate::storage::{Blockchain, storage_err};

fn encode_outputs(outs: &TxOutputs) -> Result<Vec<u8>, CobreError> {
    bincode::encode_to_vec(outs, bincode::config::standard()).map_err(storage_err)
}

fn decode_outputs(bytes: &[u8]) -> Result<TxOutputs, CobreError> {
    let (outs, _) =
        bincode::decode_from_slice(bytes, bincode::config::standard()).map_err(storage_err)?;
    Ok(outs)
}

/// The UTXO index over a chain store.
pub struct UtxoSet {
    chain: Arc<Blockchain>,
}

impl UtxoSet {
    pub fn new(chain: Arc<Blockchain>) -> Self {
        Self { chain }
    }

    pub fn chain(&self) -> &Arc<Blockchain> {
        &self.chain
    }

    /// Rebuild the index from scratch with a full chain scan.
    pub fn reindex(&self) -> Result<(), CobreError> {
        let utxo = self.chain.find_all_utxo()?;

        let cf = self.chain.cf_chainstate()?;
        let mut batch = WriteBatch::default();
        for item in self.chain.db().iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item.map_err(storage_err)?;
            batch.delete_cf(cf, key);
        }
        for (txid, outs) in &utxo {
            batch.put_cf(cf, txid.as_bytes(), encode_outputs(outs)?);
        }
        self.chain.db().write(batch).map_err(storage_err)?;
        info!(entries = utxo.len(), "reindexed UTXO set");
        Ok(())
    }

    /// Apply one accepted block: remove the outputs its inputs spend, then
    /// insert every transaction's outputs. Committed as a single atomic
    /// write.
    pub fn update(&self, block: &Block) -> Result<(), CobreError> {
        let cf = self.chain.cf_chainstate()?;
        // Entries touched so far, so later transactions in the same block
        // observe earlier removals and insertions before the batch commits.
        let mut pending: HashMap<Hash256, TxOutputs> = HashMap::new();

        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let mut outs = match pending.get(&input.prev_txid) {
                        Some(outs) => outs.clone(),
                        None => {
                            let bytes = self
                                .chain
                                .db()
                                .get_cf(cf, input.prev_txid.as_bytes())
                                .map_err(storage_err)?
                                .ok_or_else(|| {
                                    StoreError::Storage(format!(
                                        "chainstate entry missing for {}",
                                        input.prev_txid
                                    ))
                                })?;
                            decode_outputs(&bytes)?
                        }
                    };
                    outs.outputs.retain(|(index, _)| *index != input.prev_vout);
                    pending.insert(input.prev_txid, outs);
                }
            }

            let new_outputs = TxOutputs {
                outputs: tx
                    .outputs
                    .iter()
                    .enumerate()
                    .map(|(index, output)| (index as i64, output.clone()))
                    .collect(),
            };
            pending.insert(tx.id, new_outputs);
        }

        let mut batch = WriteBatch::default();
        for (txid, outs) in &pending {
            if outs.outputs.is_empty() {
                batch.delete_cf(cf, txid.as_bytes());
            } else {
                batch.put_cf(cf, txid.as_bytes(), encode_outputs(outs)?);
            }
        }
        self.chain.db().write(batch).map_err(storage_err)
    }

    /// Every unspent output locked to `pubkey_hash`.
    pub fn find_utxo(&self, pubkey_hash: &Hash160) -> Result<Vec<TxOutput>, CobreError> {
        let cf = self.chain.cf_chainstate()?;
        let mut utxos = Vec::new();
        for item in self.chain.db().iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item.map_err(storage_err)?;
            for (_, output) in decode_outputs(&value)?.outputs {
                if output.is_locked_with(pubkey_hash) {
                    utxos.push(output);
                }
            }
        }
        Ok(utxos)
    }

    /// Collect outputs of `pubkey_hash` until their sum reaches `amount`.
    ///
    /// Returns the accumulated value (which may fall short) and a map of
    /// hex txid to the chosen output indices. Iteration order is
    /// unspecified; callers must not assume a minimal selection.
    pub fn find_spendable_outputs(
        &self,
        pubkey_hash: &Hash160,
        amount: u64,
    ) -> Result<(u64, HashMap<String, Vec<i64>>), CobreError> {
        let cf = self.chain.cf_chainstate()?;
        let mut accumulated = 0u64;
        let mut spendable: HashMap<String, Vec<i64>> = HashMap::new();

        'scan: for item in self.chain.db().iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(storage_err)?;
            let txid = match <[u8; 32]>::try_from(key.as_ref()) {
                Ok(bytes) => Hash256(bytes),
                Err(_) => return Err(storage_err("corrupt chainstate key")),
            };
            for (index, output) in decode_outputs(&value)?.outputs {
                if output.is_locked_with(pubkey_hash) {
                    accumulated += output.value;
                    spendable.entry(txid.to_string()).or_default().push(index);
                    if accumulated >= amount {
                        break 'scan;
                    }
                }
            }
        }

        Ok((accumulated, spendable))
    }

    /// Number of transactions with at least one unspent output.
    pub fn count_transactions(&self) -> Result<usize, CobreError> {
        let cf = self.chain.cf_chainstate()?;
        let mut count = 0;
        for item in self.chain.db().iterator_cf(cf, IteratorMode::Start) {
            item.map_err(storage_err)?;
            count += 1;
        }
        Ok(count)
    }

    /// Build and sign a transfer of `amount` to `to`, spending outputs
    /// owned by `keypair`.
    ///
    /// Fails with [`TransactionError::InsufficientFunds`] without touching
    /// any state. Any surplus of the selected outputs returns to the sender
    /// as a change output.
    pub fn new_transaction(
        &self,
        keypair: &KeyPair,
        to: &str,
        amount: u64,
    ) -> Result<Transaction, CobreError> {
        let pubkey_hash = keypair.pubkey_hash();
        let (accumulated, spendable) = self.find_spendable_outputs(&pubkey_hash, amount)?;
        if accumulated < amount {
            return Err(TransactionError::InsufficientFunds {
                have: accumulated,
                need: amount,
            }
            .into());
        }

        let mut inputs = Vec::new();
        for (txid_hex, indices) in &spendable {
            let prev_txid = Hash256::from_hex(txid_hex)
                .ok_or_else(|| storage_err("corrupt chainstate key"))?;
            for &prev_vout in indices {
                inputs.push(TxInput {
                    prev_txid,
                    prev_vout,
                    signature: Vec::new(),
                    pubkey: keypair.public_key_bytes().to_vec(),
                });
            }
        }

        let from = Address::from_pubkey_hash(pubkey_hash).encode();
        let mut outputs = vec![TxOutput::new(amount, to)?];
        if accumulated > amount {
            outputs.push(TxOutput::new(accumulated - amount, &from)?);
        }

        let mut tx = Transaction {
            id: Hash256::ZERO,
            inputs,
            outputs,
        };
        tx.id = tx.hash()?;
        self.chain.sign_transaction(&mut tx, keypair)?;
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobre_core::constants::SUBSIDY;

    struct Fixture {
        utxo: UtxoSet,
        owner: KeyPair,
        owner_addr: String,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let owner = KeyPair::generate();
        let owner_addr = Address::from_pubkey(&owner.public_key_bytes()).encode();
        let chain =
            Arc::new(Blockchain::create(dir.path().join("chaindata"), &owner_addr).unwrap());
        let utxo = UtxoSet::new(chain);
        utxo.reindex().unwrap();
        Fixture {
            utxo,
            owner,
            owner_addr,
            _dir: dir,
        }
    }

    fn balance(utxo: &UtxoSet, pubkey_hash: &Hash160) -> u64 {
        utxo.find_utxo(pubkey_hash)
            .unwrap()
            .iter()
            .map(|out| out.value)
            .sum()
    }

    fn address_of(keypair: &KeyPair) -> String {
        Address::from_pubkey(&keypair.public_key_bytes()).encode()
    }

    // --- Genesis balances ---

    #[test]
    fn genesis_balance_goes_to_creator() {
        let fx = fixture();
        assert_eq!(balance(&fx.utxo, &fx.owner.pubkey_hash()), SUBSIDY);
        assert_eq!(balance(&fx.utxo, &Hash160([0xBB; 20])), 0);
        assert_eq!(fx.utxo.count_transactions().unwrap(), 1);
    }

    // --- Spendable output selection ---

    #[test]
    fn find_spendable_outputs_accumulates() {
        let fx = fixture();
        let (acc, outs) = fx
            .utxo
            .find_spendable_outputs(&fx.owner.pubkey_hash(), 100)
            .unwrap();
        assert!(acc >= 100);
        assert_eq!(outs.len(), 1);
    }

    #[test]
    fn find_spendable_outputs_reports_shortfall() {
        let fx = fixture();
        let (acc, _) = fx
            .utxo
            .find_spendable_outputs(&fx.owner.pubkey_hash(), SUBSIDY * 10)
            .unwrap();
        assert_eq!(acc, SUBSIDY);
    }

    // --- Transaction building ---

    #[test]
    fn new_transaction_signs_and_adds_change() {
        let fx = fixture();
        let to = KeyPair::generate();
        let tx = fx
            .utxo
            .new_transaction(&fx.owner, &address_of(&to), 100)
            .unwrap();

        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[0].value, 100);
        assert_eq!(tx.outputs[0].pubkey_hash, to.pubkey_hash());
        assert_eq!(tx.outputs[1].value, SUBSIDY - 100);
        assert_eq!(tx.outputs[1].pubkey_hash, fx.owner.pubkey_hash());
        assert!(fx.utxo.chain().verify_transaction(&tx).unwrap());
    }

    #[test]
    fn new_transaction_exact_amount_has_no_change() {
        let fx = fixture();
        let to = KeyPair::generate();
        let tx = fx
            .utxo
            .new_transaction(&fx.owner, &address_of(&to), SUBSIDY)
            .unwrap();
        assert_eq!(tx.outputs.len(), 1);
    }

    #[test]
    fn insufficient_funds_leaves_state_untouched() {
        let fx = fixture();
        let poor = KeyPair::generate();
        let err = fx
            .utxo
            .new_transaction(&poor, &fx.owner_addr, 1000)
            .unwrap_err();
        assert!(matches!(
            err,
            CobreError::Transaction(TransactionError::InsufficientFunds { have: 0, need: 1000 })
        ));
        assert_eq!(fx.utxo.count_transactions().unwrap(), 1);
        assert_eq!(balance(&fx.utxo, &fx.owner.pubkey_hash()), SUBSIDY);
    }

    // --- Incremental update ---

    #[test]
    fn transfer_with_local_mining_updates_balances() {
        let fx = fixture();
        let recipient = KeyPair::generate();

        let tx = fx
            .utxo
            .new_transaction(&fx.owner, &address_of(&recipient), 100)
            .unwrap();
        let coinbase = Transaction::new_coinbase(&fx.owner_addr, "").unwrap();
        let block = fx.utxo.chain().mine_block(vec![coinbase, tx]).unwrap();
        fx.utxo.update(&block).unwrap();

        // Sender: subsidy - 100 change + fresh coinbase subsidy.
        assert_eq!(
            balance(&fx.utxo, &fx.owner.pubkey_hash()),
            SUBSIDY - 100 + SUBSIDY
        );
        assert_eq!(balance(&fx.utxo, &recipient.pubkey_hash()), 100);
    }

    #[test]
    fn update_removes_fully_spent_entries() {
        let fx = fixture();
        let genesis_coinbase_id =
            fx.utxo.chain().iter().last().unwrap().unwrap().transactions[0].id;

        let tx = fx
            .utxo
            .new_transaction(&fx.owner, &fx.owner_addr, SUBSIDY)
            .unwrap();
        let coinbase = Transaction::new_coinbase(&fx.owner_addr, "").unwrap();
        let block = fx.utxo.chain().mine_block(vec![coinbase, tx]).unwrap();
        fx.utxo.update(&block).unwrap();

        let cf = fx.utxo.chain().cf_chainstate().unwrap();
        let spent_entry = fx
            .utxo
            .chain()
            .db()
            .get_cf(cf, genesis_coinbase_id.as_bytes())
            .unwrap();
        assert!(spent_entry.is_none());
    }

    #[test]
    fn chained_spends_preserve_output_indices() {
        let fx = fixture();
        let recipient = KeyPair::generate();

        // Block 1: pay 100, keep 2000 change at output index 1.
        let tx1 = fx
            .utxo
            .new_transaction(&fx.owner, &address_of(&recipient), 100)
            .unwrap();
        let cb1 = Transaction::new_coinbase(&fx.owner_addr, "").unwrap();
        let block1 = fx.utxo.chain().mine_block(vec![cb1, tx1]).unwrap();
        fx.utxo.update(&block1).unwrap();

        // Block 2: spend more than either single output holds.
        let tx2 = fx
            .utxo
            .new_transaction(&fx.owner, &address_of(&recipient), 2050)
            .unwrap();
        let cb2 = Transaction::new_coinbase(&fx.owner_addr, "").unwrap();
        let block2 = fx.utxo.chain().mine_block(vec![cb2, tx2]).unwrap();
        fx.utxo.update(&block2).unwrap();

        assert_eq!(balance(&fx.utxo, &recipient.pubkey_hash()), 2150);
        // Owner: 4100 after block 1, minus 2050 sent, plus block 2 coinbase.
        assert_eq!(
            balance(&fx.utxo, &fx.owner.pubkey_hash()),
            2 * SUBSIDY - 100 - 2050 + SUBSIDY
        );
    }

    #[test]
    fn reindex_matches_incremental_update() {
        let fx = fixture();
        let recipient = KeyPair::generate();

        let tx = fx
            .utxo
            .new_transaction(&fx.owner, &address_of(&recipient), 300)
            .unwrap();
        let coinbase = Transaction::new_coinbase(&fx.owner_addr, "").unwrap();
        let block = fx.utxo.chain().mine_block(vec![coinbase, tx]).unwrap();
        fx.utxo.update(&block).unwrap();

        let owner_before = balance(&fx.utxo, &fx.owner.pubkey_hash());
        let recipient_before = balance(&fx.utxo, &recipient.pubkey_hash());
        let count_before = fx.utxo.count_transactions().unwrap();

        fx.utxo.reindex().unwrap();

        assert_eq!(balance(&fx.utxo, &fx.owner.pubkey_hash()), owner_before);
        assert_eq!(balance(&fx.utxo, &recipient.pubkey_hash()), recipient_before);
        assert_eq!(fx.utxo.count_transactions().unwrap(), count_before);
    }
}
