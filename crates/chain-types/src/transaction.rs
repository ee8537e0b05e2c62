//! Signed transactions and the receipts recorded against them.

use bytes::{
    Buf,
    BufMut,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    action::Action,
    wire::{
        get_bytes,
        get_varint,
        put_bytes,
        put_varint,
        Decode,
        Encode,
        Result as WireResult,
        WireError,
    },
};

/// A transaction as signed by its authors, before any execution has
/// happened. `ref_block_num`/`ref_block_prefix` bind it to a recent block
/// (TaPoS); `signatures` and `context_free_data` are excluded from the
/// canonical digest (see [`crate::digest`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub expiration: u32,
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    pub max_net_usage_words: u32,
    pub max_cpu_usage_ms: u8,
    pub delay_sec: u32,
    pub context_free_actions: Vec<Action>,
    pub actions: Vec<Action>,
    #[serde(with = "hex::serde")]
    pub extensions: bytes::Bytes,
    pub signatures: Vec<String>,
    #[serde(with = "hex::serde")]
    pub context_free_data: bytes::Bytes,
}

impl SignedTransaction {
    /// Validates the freshness window from spec invariant: `expiration` must
    /// be after `pending_block_time` and no more than `max_trx_lifetime`
    /// seconds beyond it.
    #[must_use]
    pub fn expiration_is_valid(&self, pending_block_time: u32, max_trx_lifetime_secs: u32) -> bool {
        self.expiration > pending_block_time
            && self.expiration <= pending_block_time.saturating_add(max_trx_lifetime_secs)
    }

    /// The TaPoS block-summary ring slot this transaction references:
    /// `ref_block_num & 0xffff`.
    #[must_use]
    pub fn ref_block_slot(&self) -> u16 {
        self.ref_block_num & 0xffff
    }
}

/// Encodes everything that feeds the canonical transaction digest: every
/// field except `signatures` and `context_free_data` (see spec §6, "Wire
/// format").
pub(crate) fn encode_unsigned(trx: &SignedTransaction, buf: &mut impl BufMut) {
    put_varint(buf, u64::from(trx.expiration));
    put_varint(buf, u64::from(trx.ref_block_num));
    put_varint(buf, u64::from(trx.ref_block_prefix));
    put_varint(buf, u64::from(trx.max_net_usage_words));
    put_varint(buf, u64::from(trx.max_cpu_usage_ms));
    put_varint(buf, u64::from(trx.delay_sec));
    put_varint(buf, trx.context_free_actions.len() as u64);
    for action in &trx.context_free_actions {
        action.encode(buf);
    }
    put_varint(buf, trx.actions.len() as u64);
    for action in &trx.actions {
        action.encode(buf);
    }
    put_bytes(buf, &trx.extensions);
}

impl Encode for SignedTransaction {
    fn encode(&self, buf: &mut impl BufMut) {
        encode_unsigned(self, buf);
        put_varint(buf, self.signatures.len() as u64);
        for sig in &self.signatures {
            crate::wire::put_string(buf, sig);
        }
        put_bytes(buf, &self.context_free_data);
    }
}

impl Decode for SignedTransaction {
    fn decode(buf: &mut impl Buf) -> WireResult<Self> {
        let expiration = u32::try_from(get_varint(buf, "SignedTransaction.expiration")?)
            .map_err(|_| WireError::VarintOverflow("SignedTransaction.expiration"))?;
        let ref_block_num = u16::try_from(get_varint(buf, "SignedTransaction.ref_block_num")?)
            .map_err(|_| WireError::VarintOverflow("SignedTransaction.ref_block_num"))?;
        let ref_block_prefix = u32::try_from(get_varint(buf, "SignedTransaction.ref_block_prefix")?)
            .map_err(|_| WireError::VarintOverflow("SignedTransaction.ref_block_prefix"))?;
        let max_net_usage_words =
            u32::try_from(get_varint(buf, "SignedTransaction.max_net_usage_words")?)
                .map_err(|_| WireError::VarintOverflow("SignedTransaction.max_net_usage_words"))?;
        let max_cpu_usage_ms = u8::try_from(get_varint(buf, "SignedTransaction.max_cpu_usage_ms")?)
            .map_err(|_| WireError::VarintOverflow("SignedTransaction.max_cpu_usage_ms"))?;
        let delay_sec = u32::try_from(get_varint(buf, "SignedTransaction.delay_sec")?)
            .map_err(|_| WireError::VarintOverflow("SignedTransaction.delay_sec"))?;
        let cfa_count = get_varint(buf, "SignedTransaction.context_free_actions")?;
        let mut context_free_actions = Vec::with_capacity(cfa_count as usize);
        for _ in 0..cfa_count {
            context_free_actions.push(Action::decode(buf)?);
        }
        let action_count = get_varint(buf, "SignedTransaction.actions")?;
        let mut actions = Vec::with_capacity(action_count as usize);
        for _ in 0..action_count {
            actions.push(Action::decode(buf)?);
        }
        let extensions = bytes::Bytes::from(get_bytes(buf, "SignedTransaction.extensions")?);
        let sig_count = get_varint(buf, "SignedTransaction.signatures")?;
        let mut signatures = Vec::with_capacity(sig_count as usize);
        for _ in 0..sig_count {
            signatures.push(crate::wire::get_string(buf, "SignedTransaction.signatures[]")?);
        }
        let context_free_data = bytes::Bytes::from(get_bytes(buf, "SignedTransaction.context_free_data")?);
        Ok(Self {
            expiration,
            ref_block_num,
            ref_block_prefix,
            max_net_usage_words,
            max_cpu_usage_ms,
            delay_sec,
            context_free_actions,
            actions,
            extensions,
            signatures,
            context_free_data,
        })
    }
}

/// The disposition recorded for a transaction in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Executed,
    Soft,
    Hard,
    Delayed,
    Expired,
}

/// A transaction's entry in `pending_block.transactions`: `{status,
/// cpu_usage_us, net_usage_words, trx}` per spec §4.1 `push_receipt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub status: TransactionStatus,
    pub cpu_usage_us: u32,
    pub net_usage_words: u32,
    pub trx_id: [u8; 32],
}

impl TransactionReceipt {
    /// Builds a receipt from a measured usage pair, converting the net byte
    /// count to 8-byte words per spec §4.1.
    #[must_use]
    pub fn new(status: TransactionStatus, cpu_usage_us: u32, net_usage_bytes: u32, trx_id: [u8; 32]) -> Self {
        Self {
            status,
            cpu_usage_us,
            net_usage_words: net_usage_bytes / 8,
            trx_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SignedTransaction {
        SignedTransaction {
            expiration: 1_000,
            ref_block_num: 7,
            ref_block_prefix: 0xDEAD,
            max_net_usage_words: 0,
            max_cpu_usage_ms: 0,
            delay_sec: 0,
            context_free_actions: Vec::new(),
            actions: vec![Action::new(
                "eosio.token".parse().unwrap(),
                "transfer".parse().unwrap(),
                b"xfer".to_vec(),
            )],
            extensions: bytes::Bytes::new(),
            signatures: vec!["SIG_K1_fake".to_string()],
            context_free_data: bytes::Bytes::new(),
        }
    }

    #[test]
    fn signed_transaction_round_trips_through_encode_decode() {
        let trx = sample();
        let buf = trx.encode_to_vec();
        let mut slice = buf.as_slice();
        assert_eq!(SignedTransaction::decode(&mut slice).unwrap(), trx);
    }

    #[test]
    fn expiration_window_is_exclusive_above_and_inclusive_at_boundary() {
        let trx = sample();
        assert!(!trx.expiration_is_valid(1_000, 3_600));
        assert!(trx.expiration_is_valid(999, 1));
        assert!(!trx.expiration_is_valid(0, 999));
    }

    #[test]
    fn net_usage_bytes_convert_to_words_by_truncating_division() {
        let receipt = TransactionReceipt::new(TransactionStatus::Executed, 10, 17, [0; 32]);
        assert_eq!(receipt.net_usage_words, 2);
    }

    #[test]
    fn ref_block_slot_masks_to_sixteen_bits() {
        let trx = sample();
        assert_eq!(trx.ref_block_slot(), 7);
    }
}
