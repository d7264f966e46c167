//! In-memory pool of transactions received by gossip or local submission.
//!
//! Keyed by the hex transaction id. Entries are removed when a locally
//! mined block includes them; the pool is never persisted.
//!
//! Not thread-safe — the node wraps it in a `Mutex`.

use std::collections::HashMap;

use crate::types::{Hash256, Transaction};

#[derive(Debug, Default)]
pub struct Mempool {
    entries: HashMap<String, Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transaction under its hex id, replacing any duplicate.
    pub fn insert(&mut self, tx: Transaction) {
        self.entries.insert(tx.id.to_string(), tx);
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(&txid.to_string())
    }

    pub fn get(&self, txid: &Hash256) -> Option<&Transaction> {
        self.entries.get(&txid.to_string())
    }

    pub fn remove(&mut self, txid: &Hash256) -> Option<Transaction> {
        self.entries.remove(&txid.to_string())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every pooled transaction, in no particular order.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.entries.values().cloned().collect()
    }
}
