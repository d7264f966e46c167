//! SHA-256 Merkle tree over serialized transactions.
//!
//! Leaves are the SHA-256 of each input byte string; a parent node is the
//! SHA-256 of its two children concatenated. Odd-length layers duplicate
//! their last node. An empty input yields the SHA-256 of the empty string.

use crate::crypto::sha256;
use crate::types::Hash256;

/// Compute the Merkle root of a list of byte strings.
pub fn merkle_root(items: &[Vec<u8>]) -> Hash256 {
    if items.is_empty() {
        return sha256(&[]);
    }

    let mut current: Vec<Hash256> = items.iter().map(|data| sha256(data)).collect();

    while current.len() > 1 {
        current = next_layer(&current);
    }

    current[0]
}

/// Pair adjacent nodes, duplicating the last on odd layers.
fn next_layer(layer: &[Hash256]) -> Vec<Hash256> {
    let mut next = Vec::with_capacity(layer.len().div_ceil(2));
    let mut i = 0;
    while i < layer.len() {
        let left = &layer[i];
        let right = if i + 1 < layer.len() { &layer[i + 1] } else { left };
        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(left.as_bytes());
        data.extend_from_slice(right.as_bytes());
        next.push(sha256(&data));
        i += 2;
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(byte: u8) -> Vec<u8> {
        vec![byte; 8]
    }

    fn node(left: &Hash256, right: &Hash256) -> Hash256 {
        let mut data = Vec::new();
        data.extend_from_slice(left.as_bytes());
        data.extend_from_slice(right.as_bytes());
        sha256(&data)
    }

    #[test]
    fn empty_input_hashes_empty_string() {
        assert_eq!(merkle_root(&[]), sha256(&[]));
    }

    #[test]
    fn single_item_root_is_leaf_hash() {
        let a = item(0xAA);
        assert_eq!(merkle_root(&[a.clone()]), sha256(&a));
    }

    #[test]
    fn two_items() {
        let a = item(1);
        let b = item(2);
        let expected = node(&sha256(&a), &sha256(&b));
        assert_eq!(merkle_root(&[a, b]), expected);
    }

    #[test]
    fn three_items_duplicate_last() {
        let (a, b, c) = (item(1), item(2), item(3));
        let (la, lb, lc) = (sha256(&a), sha256(&b), sha256(&c));
        let expected = node(&node(&la, &lb), &node(&lc, &lc));
        assert_eq!(merkle_root(&[a, b, c]), expected);
    }

    #[test]
    fn four_items_balanced() {
        let items: Vec<Vec<u8>> = (1..=4).map(item).collect();
        let leaves: Vec<Hash256> = items.iter().map(|d| sha256(d)).collect();
        let expected = node(&node(&leaves[0], &leaves[1]), &node(&leaves[2], &leaves[3]));
        assert_eq!(merkle_root(&items), expected);
    }

    #[test]
    fn root_changes_with_content() {
        let a = vec![item(1), item(2)];
        let b = vec![item(1), item(3)];
        assert_ne!(merkle_root(&a), merkle_root(&b));
    }

    #[test]
    fn root_changes_with_order() {
        let a = vec![item(1), item(2)];
        let b = vec![item(2), item(1)];
        assert_ne!(merkle_root(&a), merkle_root(&b));
    }
}
