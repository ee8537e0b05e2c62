//! Digests used to identify a transaction and to bind a signature to a
//! specific chain.
//!
//! The canonical transaction digest hashes the encoded `Transaction`
//! without `signatures` (spec §6). Context-free data is hashed separately
//! and mixed into the *signing* digest together with the chain id, so two
//! chains with identical transactions never share a signature.

use sha2::{
    Digest as _,
    Sha256,
};

use crate::transaction::{
    encode_unsigned,
    SignedTransaction,
};

/// `SHA256` over every field of `trx` except `signatures` and
/// `context_free_data`. This is the transaction's identity (`trx_id`) used
/// for TaPoS duplicate detection and receipt keys.
#[must_use]
pub fn transaction_digest(trx: &SignedTransaction) -> [u8; 32] {
    let mut buf = Vec::new();
    encode_unsigned(trx, &mut buf);
    Sha256::digest(&buf).into()
}

/// `SHA256` of the transaction's context-free data, hashed on its own so it
/// can be pruned from storage without invalidating `transaction_digest`.
#[must_use]
pub fn context_free_data_digest(context_free_data: &[u8]) -> [u8; 32] {
    Sha256::digest(context_free_data).into()
}

/// The digest actually signed by a transaction's keys:
/// `SHA256(chain_id || transaction_digest || context_free_data_digest)`.
///
/// Prefixing with `chain_id` means a transaction valid on one chain can
/// never be replayed as a valid signature on another.
#[must_use]
pub fn signing_digest(chain_id: &[u8; 32], trx: &SignedTransaction) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(chain_id);
    hasher.update(transaction_digest(trx));
    hasher.update(context_free_data_digest(&trx.context_free_data));
    hasher.finalize().into()
}
