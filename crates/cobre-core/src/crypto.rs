//! ECDSA P-256 operations and hashing primitives.
//!
//! Transaction inputs are signed over a *trimmed copy* of the transaction:
//! every input stripped of its signature and pubkey, with the spent output's
//! pubkey hash spliced into the input being signed. The signing message is
//! the lowercase hex rendering of that copy's canonical encoding; sign and
//! verify must produce it identically. Signatures are `r || s` (32 + 32
//! bytes); public keys are the uncompressed `X || Y` point (64 bytes).

use std::collections::HashMap;
use std::fmt;

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::generic_array::GenericArray;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;
use crate::types::{Hash160, Hash256, Transaction};

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> Hash256 {
    Hash256(Sha256::digest(data).into())
}

/// The output lock for a public key: RIPEMD-160(SHA-256(pubkey)).
pub fn hash_pubkey(pubkey: &[u8]) -> Hash160 {
    let sha = Sha256::digest(pubkey);
    Hash160(Ripemd160::digest(sha).into())
}

/// ECDSA P-256 keypair.
///
/// Wraps [`p256::ecdsa::SigningKey`]. Use [`KeyPair::generate`] for random
/// keys or [`KeyPair::from_secret_bytes`] to restore a persisted one.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a random keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Restore a keypair from the 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self { signing_key })
    }

    /// The raw secret scalar (32 bytes). Handle with care.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }

    /// The uncompressed public key as `X || Y` (64 bytes, no SEC1 tag).
    pub fn public_key_bytes(&self) -> [u8; 64] {
        let point = self.signing_key.verifying_key().to_encoded_point(false);
        let mut out = [0u8; 64];
        out.copy_from_slice(&point.as_bytes()[1..]);
        out
    }

    /// The output lock for this keypair's public key.
    pub fn pubkey_hash(&self) -> Hash160 {
        hash_pubkey(&self.public_key_bytes())
    }

    /// Sign a message, returning `r || s` (64 bytes).
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let sig: Signature = self.signing_key.sign(message);
        let mut out = [0u8; 64];
        out.copy_from_slice(&sig.to_bytes());
        out
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            signing_key: self.signing_key.clone(),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}

/// Verify an `r || s` signature against an `X || Y` public key.
///
/// The halves are split by length; any malformed component fails
/// verification rather than erroring.
fn verify_raw(pubkey: &[u8], message: &[u8], signature: &[u8]) -> bool {
    if pubkey.len() != 64 || signature.len() != 64 {
        return false;
    }
    let point = p256::EncodedPoint::from_untagged_bytes(GenericArray::from_slice(pubkey));
    let Ok(verifying_key) = VerifyingKey::from_encoded_point(&point) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    verifying_key.verify(message, &sig).is_ok()
}

/// The canonical signing message for a trimmed transaction copy.
///
/// Lowercase hex of the canonical encoding, newline-terminated. Changing
/// this rendering invalidates every signature on the wire.
fn signing_message(trimmed: &Transaction) -> Result<Vec<u8>, CryptoError> {
    let bytes = trimmed
        .serialize()
        .map_err(|e| CryptoError::Serialization(e.to_string()))?;
    let mut message = hex::encode(bytes).into_bytes();
    message.push(b'\n');
    Ok(message)
}

/// Require that every input's previous transaction is present in `prev_txs`.
fn check_prev_txs(
    tx: &Transaction,
    prev_txs: &HashMap<String, Transaction>,
) -> Result<(), CryptoError> {
    for input in &tx.inputs {
        if !prev_txs.contains_key(&input.prev_txid.to_string()) {
            return Err(CryptoError::MissingPrevTx(input.prev_txid.to_string()));
        }
    }
    Ok(())
}

/// Look up the output an input spends.
fn prev_output<'a>(
    input: &crate::types::TxInput,
    prev_txs: &'a HashMap<String, Transaction>,
) -> Result<&'a crate::types::TxOutput, CryptoError> {
    let prev_tx = &prev_txs[&input.prev_txid.to_string()];
    prev_tx
        .outputs
        .get(input.prev_vout as usize)
        .ok_or(CryptoError::MissingPrevOutput {
            txid: input.prev_txid.to_string(),
            vout: input.prev_vout,
        })
}

/// Sign every input of `tx` with `keypair`.
///
/// `prev_txs` maps `hex(txid)` to each transaction referenced by an input;
/// a missing entry is an invariant violation surfaced as an error. Coinbase
/// transactions are left untouched.
pub fn sign_transaction(
    tx: &mut Transaction,
    keypair: &KeyPair,
    prev_txs: &HashMap<String, Transaction>,
) -> Result<(), CryptoError> {
    if tx.is_coinbase() {
        return Ok(());
    }
    check_prev_txs(tx, prev_txs)?;

    let mut trimmed = tx.trimmed_copy();
    for i in 0..tx.inputs.len() {
        let lock = prev_output(&tx.inputs[i], prev_txs)?.pubkey_hash;
        trimmed.inputs[i].signature.clear();
        trimmed.inputs[i].pubkey = lock.as_bytes().to_vec();

        let message = signing_message(&trimmed)?;
        tx.inputs[i].signature = keypair.sign(&message).to_vec();

        trimmed.inputs[i].pubkey.clear();
    }
    Ok(())
}

/// Verify every input signature of `tx`.
///
/// Reconstructs the same per-input signing message as [`sign_transaction`]
/// and checks the stored `r || s` against the stored `X || Y` public key.
/// Coinbase transactions verify trivially. A missing previous transaction
/// is an invariant violation surfaced as an error; a bad signature simply
/// returns `false`.
pub fn verify_transaction(
    tx: &Transaction,
    prev_txs: &HashMap<String, Transaction>,
) -> Result<bool, CryptoError> {
    if tx.is_coinbase() {
        return Ok(true);
    }
    check_prev_txs(tx, prev_txs)?;

    let mut trimmed = tx.trimmed_copy();
    for (i, input) in tx.inputs.iter().enumerate() {
        let lock = prev_output(input, prev_txs)?.pubkey_hash;
        trimmed.inputs[i].signature.clear();
        trimmed.inputs[i].pubkey = lock.as_bytes().to_vec();

        let message = signing_message(&trimmed)?;
        if !verify_raw(&input.pubkey, &message, &input.signature) {
            return Ok(false);
        }

        trimmed.inputs[i].pubkey.clear();
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TxInput, TxOutput};

    fn make_prev_tx(keypair: &KeyPair, value: u64) -> Transaction {
        let mut tx = Transaction {
            id: Hash256::ZERO,
            inputs: vec![TxInput::coinbase(b"prev".to_vec())],
            outputs: vec![TxOutput {
                value,
                pubkey_hash: keypair.pubkey_hash(),
            }],
        };
        tx.id = tx.hash().unwrap();
        tx
    }

    fn make_spend(keypair: &KeyPair, prev: &Transaction) -> Transaction {
        let mut tx = Transaction {
            id: Hash256::ZERO,
            inputs: vec![TxInput {
                prev_txid: prev.id,
                prev_vout: 0,
                signature: Vec::new(),
                pubkey: keypair.public_key_bytes().to_vec(),
            }],
            outputs: vec![
                TxOutput { value: 30, pubkey_hash: Hash160([0xBB; 20]) },
                TxOutput { value: 20, pubkey_hash: keypair.pubkey_hash() },
            ],
        };
        tx.id = tx.hash().unwrap();
        tx
    }

    fn signed_fixture() -> (KeyPair, Transaction, HashMap<String, Transaction>) {
        let keypair = KeyPair::generate();
        let prev = make_prev_tx(&keypair, 50);
        let mut tx = make_spend(&keypair, &prev);
        let prev_txs = HashMap::from([(prev.id.to_string(), prev)]);
        sign_transaction(&mut tx, &keypair, &prev_txs).unwrap();
        (keypair, tx, prev_txs)
    }

    // --- Keypair basics ---

    #[test]
    fn keypair_round_trips_through_secret_bytes() {
        let kp = KeyPair::generate();
        let restored = KeyPair::from_secret_bytes(&kp.secret_bytes()).unwrap();
        assert_eq!(kp.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn public_key_is_untagged_point() {
        let kp = KeyPair::generate();
        assert_eq!(kp.public_key_bytes().len(), 64);
    }

    #[test]
    fn zero_secret_is_rejected() {
        assert!(KeyPair::from_secret_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn raw_sign_verify_round_trip() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"message");
        assert!(verify_raw(&kp.public_key_bytes(), b"message", &sig));
        assert!(!verify_raw(&kp.public_key_bytes(), b"other", &sig));
    }

    #[test]
    fn verify_raw_rejects_malformed_lengths() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"message");
        assert!(!verify_raw(&kp.public_key_bytes()[..63], b"message", &sig));
        assert!(!verify_raw(&kp.public_key_bytes(), b"message", &sig[..63]));
    }

    #[test]
    fn hash_pubkey_is_twenty_bytes_and_deterministic() {
        let kp = KeyPair::generate();
        assert_eq!(hash_pubkey(&kp.public_key_bytes()), kp.pubkey_hash());
    }

    // --- Transaction signing ---

    #[test]
    fn signed_transaction_verifies() {
        let (_, tx, prev_txs) = signed_fixture();
        assert!(verify_transaction(&tx, &prev_txs).unwrap());
        assert_eq!(tx.inputs[0].signature.len(), 64);
    }

    #[test]
    fn coinbase_verifies_trivially() {
        let kp = KeyPair::generate();
        let coinbase = make_prev_tx(&kp, 2100);
        assert!(verify_transaction(&coinbase, &HashMap::new()).unwrap());
    }

    #[test]
    fn tampered_output_falsifies() {
        let (_, mut tx, prev_txs) = signed_fixture();
        tx.outputs[0].pubkey_hash.0[0] ^= 0x01;
        assert!(!verify_transaction(&tx, &prev_txs).unwrap());
    }

    #[test]
    fn tampered_output_value_falsifies() {
        let (_, mut tx, prev_txs) = signed_fixture();
        tx.outputs[0].value += 1;
        assert!(!verify_transaction(&tx, &prev_txs).unwrap());
    }

    #[test]
    fn tampered_input_vout_falsifies_or_errors() {
        let (_, mut tx, mut prev_txs) = signed_fixture();
        // Give the previous transaction a second output so the index stays valid.
        let prev_id = tx.inputs[0].prev_txid.to_string();
        prev_txs.get_mut(&prev_id).unwrap().outputs.push(TxOutput {
            value: 1,
            pubkey_hash: Hash160([0xCC; 20]),
        });
        tx.inputs[0].prev_vout = 1;
        assert!(!verify_transaction(&tx, &prev_txs).unwrap());
    }

    #[test]
    fn tampered_referenced_lock_falsifies() {
        let (_, tx, mut prev_txs) = signed_fixture();
        let prev_id = tx.inputs[0].prev_txid.to_string();
        prev_txs.get_mut(&prev_id).unwrap().outputs[0].pubkey_hash.0[0] ^= 0x01;
        assert!(!verify_transaction(&tx, &prev_txs).unwrap());
    }

    #[test]
    fn wrong_key_signature_falsifies() {
        let (keypair, _, _) = signed_fixture();
        let other = KeyPair::generate();
        let prev = make_prev_tx(&keypair, 50);
        let mut tx = make_spend(&keypair, &prev);
        let prev_txs = HashMap::from([(prev.id.to_string(), prev)]);
        // Signed by a key that does not match the embedded pubkey.
        sign_transaction(&mut tx, &other, &prev_txs).unwrap();
        assert!(!verify_transaction(&tx, &prev_txs).unwrap());
    }

    #[test]
    fn missing_prev_tx_is_fatal() {
        let (_, tx, _) = signed_fixture();
        let err = verify_transaction(&tx, &HashMap::new()).unwrap_err();
        assert!(matches!(err, CryptoError::MissingPrevTx(_)));
    }

    #[test]
    fn multi_input_signing_covers_each_input() {
        let keypair = KeyPair::generate();
        let prev_a = make_prev_tx(&keypair, 10);
        let mut prev_b = make_prev_tx(&keypair, 20);
        // Distinct tag so the two previous transactions have distinct ids.
        prev_b.inputs[0].pubkey = b"prev-b".to_vec();
        prev_b.id = prev_b.hash().unwrap();

        let mut tx = Transaction {
            id: Hash256::ZERO,
            inputs: vec![
                TxInput {
                    prev_txid: prev_a.id,
                    prev_vout: 0,
                    signature: Vec::new(),
                    pubkey: keypair.public_key_bytes().to_vec(),
                },
                TxInput {
                    prev_txid: prev_b.id,
                    prev_vout: 0,
                    signature: Vec::new(),
                    pubkey: keypair.public_key_bytes().to_vec(),
                },
            ],
            outputs: vec![TxOutput { value: 30, pubkey_hash: Hash160([0xDD; 20]) }],
        };
        tx.id = tx.hash().unwrap();

        let prev_txs = HashMap::from([
            (prev_a.id.to_string(), prev_a),
            (prev_b.id.to_string(), prev_b),
        ]);
        sign_transaction(&mut tx, &keypair, &prev_txs).unwrap();
        assert!(verify_transaction(&tx, &prev_txs).unwrap());

        // Swapping the two signatures must break verification.
        let mut swapped = tx.clone();
        swapped.inputs.swap(0, 1);
        assert!(!verify_transaction(&swapped, &prev_txs).unwrap());
    }
}
