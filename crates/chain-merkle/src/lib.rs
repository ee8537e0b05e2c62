//! An RFC 6962 "Merkle Tree Hash" (MTH) implementation used to compute the
//! action-receipt Merkle root and the transaction Merkle root of a block.
//!
//! Leaf and interior nodes are domain-separated (`0x00` / `0x01` prefix) so a
//! leaf hash can never collide with an interior node hash, following
//! RFC 6962 §2.1.
//!
//! This crate only computes roots; it does not (yet) construct or verify
//! inclusion proofs.

use sha2::{
    Digest as _,
    Sha256,
};

/// Calculates `SHA256(0x00 || leaf)`.
#[must_use]
pub fn hash_leaf(leaf: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0x00_u8]);
    hasher.update(leaf);
    hasher.finalize().into()
}

/// Calculates `SHA256(0x01 || left || right)`.
#[must_use]
pub fn combine(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0x01_u8]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// The empty tree's root, `SHA256()` of zero bytes (RFC 6962 §2.1).
#[must_use]
pub fn empty_root() -> [u8; 32] {
    Sha256::new().finalize().into()
}

/// Computes the Merkle Tree Hash of a sequence of pre-hashed leaves.
///
/// `leaves` must already be leaf hashes (see [`hash_leaf`]); this function
/// performs no further domain separation on them beyond combining pairs of
/// subtrees, matching RFC 6962's `MTH` recurrence:
///
/// - `MTH({}) = SHA256()`
/// - `MTH({d0}) = d0`
/// - `MTH(D[0:n]) = combine(MTH(D[0:k]), MTH(D[k:n]))` where `k` is the
///   largest power of two strictly smaller than `n`.
#[must_use]
pub fn root_from_leaf_hashes(leaves: &[[u8; 32]]) -> [u8; 32] {
    mth(leaves)
}

/// Computes the Merkle root over the raw byte-strings of a sequence of
/// items, hashing each one as a leaf first.
#[must_use]
pub fn root_from_leaves<I, T>(items: I) -> [u8; 32]
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let hashes: Vec<[u8; 32]> = items.into_iter().map(|item| hash_leaf(item.as_ref())).collect();
    mth(&hashes)
}

fn mth(leaves: &[[u8; 32]]) -> [u8; 32] {
    match leaves {
        [] => empty_root(),
        [only] => *only,
        _ => {
            let k = largest_power_of_two_less_than(leaves.len());
            let left = mth(&leaves[..k]);
            let right = mth(&leaves[k..]);
            combine(&left, &right)
        }
    }
}

/// Returns the largest power of two strictly smaller than `n`, for `n > 1`.
fn largest_power_of_two_less_than(n: usize) -> usize {
    debug_assert!(n > 1);
    let mut k = 1_usize;
    while k * 2 < n {
        k *= 2;
    }
    k
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tree_matches_rfc6962_empty_hash() {
        let root = root_from_leaf_hashes(&[]);
        let expected: [u8; 32] = Sha256::new().finalize().into();
        assert_eq!(root, expected);
        assert_eq!(
            hex::encode(root),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn single_leaf_tree_is_the_leaf_hash() {
        let leaf = hash_leaf(b"hello");
        assert_eq!(root_from_leaf_hashes(&[leaf]), leaf);
    }

    #[test]
    fn two_leaf_tree_combines_both_leaves() {
        let a = hash_leaf(b"a");
        let b = hash_leaf(b"b");
        assert_eq!(root_from_leaf_hashes(&[a, b]), combine(&a, &b));
    }

    #[test]
    fn root_is_deterministic_and_order_sensitive() {
        let r1 = root_from_leaves([b"a".as_slice(), b"b", b"c"]);
        let r2 = root_from_leaves([b"a".as_slice(), b"b", b"c"]);
        let r3 = root_from_leaves([b"c".as_slice(), b"b", b"a"]);
        assert_eq!(r1, r2);
        assert_ne!(r1, r3);
    }

    #[test]
    fn five_leaf_tree_splits_at_largest_power_of_two() {
        // For n=5, k=4: MTH(D[0:5]) = combine(MTH(D[0:4]), MTH(D[4:5])).
        let leaves: Vec<[u8; 32]> = (0_u8..5).map(|i| hash_leaf(&[i])).collect();
        let left = mth(&leaves[..4]);
        let right = mth(&leaves[4..]);
        assert_eq!(root_from_leaf_hashes(&leaves), combine(&left, &right));
    }
}
