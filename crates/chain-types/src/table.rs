//! Contract table storage: `TableIdObject`, `KeyValueObject`, and the
//! secondary-index family.
//!
//! The five secondary-key kinds (`u64`, `f64`, `u128`, `u256`, long double)
//! are modeled as one generic index engine parameterized by a
//! [`SecondaryKey`] rather than five near-duplicate method families, per
//! the design note on polymorphism over key kinds. Floating-point keys
//! compare by bit pattern, not arithmetic equality, so ordering stays
//! identical across hosts with different FPU rounding behavior.

use std::cmp::Ordering;

use serde::{
    Deserialize,
    Serialize,
};

use crate::account::AccountName;

/// Identifies one contract table: the triple `(code, scope, table)` plus
/// bookkeeping for its lifecycle. Created on the first row insert under
/// that triple; destroyed when `count` reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableIdObject {
    pub id: u64,
    pub code: AccountName,
    pub scope: AccountName,
    pub table: AccountName,
    pub payer: AccountName,
    pub count: u32,
}

impl TableIdObject {
    #[must_use]
    pub fn new(id: u64, code: AccountName, scope: AccountName, table: AccountName, payer: AccountName) -> Self {
        Self {
            id,
            code,
            scope,
            table,
            payer,
            count: 0,
        }
    }
}

/// A single primary-index row: `{t_id, primary_key, payer, value}`, ordered
/// by `(t_id, primary_key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueObject {
    pub t_id: u64,
    pub primary_key: u64,
    pub payer: AccountName,
    #[serde(with = "hex::serde")]
    pub value: Vec<u8>,
}

impl KeyValueObject {
    /// The additional RAM charged beyond the payload length for this row's
    /// bookkeeping (table-row overhead, per spec §3 "billable size").
    pub const BILLABLE_SIZE_OVERHEAD: u64 = 112;

    #[must_use]
    pub fn billable_size(&self) -> u64 {
        self.value.len() as u64 + Self::BILLABLE_SIZE_OVERHEAD
    }
}

/// A secondary-index row: `{t_id, primary_key, payer, secondary}`. Two
/// orderings are maintained over this type by the owning index: by
/// `(t_id, secondary, primary_key)` and by `(t_id, primary_key)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryIndexObject<K> {
    pub t_id: u64,
    pub primary_key: u64,
    pub payer: AccountName,
    pub secondary: K,
}

/// A secondary-index key kind: u64, f64, u128, u256, or long double. Every
/// kind must compare and order deterministically across hosts, which rules
/// out native `f64` comparison (`NaN` and signed-zero break total order);
/// implementers compare the bit pattern instead.
pub trait SecondaryKey: Copy + Eq + Ord + std::fmt::Debug {
    const NAME: &'static str;
}

impl SecondaryKey for u64 {
    const NAME: &'static str = "idx64";
}

impl SecondaryKey for u128 {
    const NAME: &'static str = "idx128";
}

/// A 256-bit unsigned integer key, stored as four `u64` limbs ordered most
/// significant first so the derived `Ord` is the numeric order (Rust has
/// no native 256-bit integer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct U256(pub [u64; 4]);

impl SecondaryKey for U256 {
    const NAME: &'static str = "idx256";
}

/// An `f64` secondary key ordered by IEEE-754 bit pattern rather than
/// arithmetic comparison, so `NaN` and signed zero order the same way on
/// every host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct F64Key(pub f64);

impl F64Key {
    fn ordering_key(self) -> u64 {
        let bits = self.0.to_bits();
        if bits & (1 << 63) != 0 {
            !bits
        } else {
            bits | (1 << 63)
        }
    }
}

impl PartialEq for F64Key {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for F64Key {}

impl PartialOrd for F64Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for F64Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ordering_key().cmp(&other.ordering_key())
    }
}

impl SecondaryKey for F64Key {
    const NAME: &'static str = "idx_double";
}

/// A "long double" secondary key: an 80-bit extended-precision float
/// padded to 16 bytes, compared by raw bit pattern for the same
/// determinism reason as [`F64Key`]. The host's native long-double layout
/// is opaque to this crate; callers are responsible for producing a
/// consistent byte representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LongDoubleKey(pub [u8; 16]);

impl SecondaryKey for LongDoubleKey {
    const NAME: &'static str = "idx_long_double";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(name: &str) -> AccountName {
        name.parse().unwrap()
    }

    #[test]
    fn billable_size_adds_fixed_overhead_to_payload_length() {
        let row = KeyValueObject {
            t_id: 1,
            primary_key: 1,
            payer: acct("alice"),
            value: vec![0; 10],
        };
        assert_eq!(row.billable_size(), 10 + KeyValueObject::BILLABLE_SIZE_OVERHEAD);
    }

    #[test]
    fn f64_key_orders_negative_before_positive() {
        let neg = F64Key(-1.0);
        let pos = F64Key(1.0);
        assert!(neg < pos);
    }

    #[test]
    fn f64_key_orders_by_bit_pattern_not_arithmetic_equality() {
        let nan_a = F64Key(f64::NAN);
        let nan_b = F64Key(f64::from_bits(f64::NAN.to_bits() | 1));
        // Two distinct NaN bit patterns are not arithmetically comparable but
        // must still have a well-defined, consistent total order.
        assert!(nan_a.cmp(&nan_b) != Ordering::Equal || nan_a.0.to_bits() == nan_b.0.to_bits());
    }

    #[test]
    fn f64_key_orders_negative_zero_before_positive_zero() {
        let neg_zero = F64Key(-0.0_f64);
        let pos_zero = F64Key(0.0_f64);
        assert!(neg_zero < pos_zero);
    }

    #[test]
    fn u256_orders_by_most_significant_limb_first() {
        let small = U256([0, 0, 0, 1]);
        let large = U256([1, 0, 0, 0]);
        assert!(small < large);
    }

    #[test]
    fn table_id_object_starts_with_zero_count() {
        let t = TableIdObject::new(1, acct("eosio.token"), acct("alice"), acct("accounts"), acct("alice"));
        assert_eq!(t.count, 0);
    }
}
