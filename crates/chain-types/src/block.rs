//! Block headers and the fork-tree / pending-block state built around
//! them.

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    account::AccountName,
    transaction::TransactionReceipt,
};

/// The signed portion of a block, excluding the producer signature itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub timestamp: u32,
    pub producer: AccountName,
    pub confirmed: u16,
    pub previous: [u8; 32],
    pub transaction_mroot: [u8; 32],
    pub action_mroot: [u8; 32],
    pub schedule_version: u32,
    pub block_num: u64,
}

impl BlockHeader {
    /// The block id: `SHA256` of the header, with the first four bytes
    /// overwritten by the big-endian block number so ids sort the same way
    /// as block numbers (standard EOSIO block-id construction).
    #[must_use]
    pub fn id(&self) -> [u8; 32] {
        use sha2::{
            Digest as _,
            Sha256,
        };
        let mut hasher = Sha256::new();
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(self.producer.as_u64().to_le_bytes());
        hasher.update(self.confirmed.to_le_bytes());
        hasher.update(self.previous);
        hasher.update(self.transaction_mroot);
        hasher.update(self.action_mroot);
        hasher.update(self.schedule_version.to_le_bytes());
        let mut digest: [u8; 32] = hasher.finalize().into();
        digest[..4].copy_from_slice(&(self.block_num as u32).to_be_bytes());
        digest
    }
}

/// Disposition of a pending or fork-tree block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockStatus {
    /// Applied as part of an incoming, not-yet-confirmed branch.
    Incomplete,
    /// Applied while this node is the active producer.
    Complete,
    /// Applied from a validated peer block.
    Validated,
    /// Applied from the irreversible block log during replay.
    Irreversible,
}

/// A node of the fork tree: a block together with its validation state and
/// linkage to the active/pending producer schedule at that height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockState {
    pub header: BlockHeader,
    pub block_id: [u8; 32],
    pub block_num: u64,
    pub active_schedule_version: u32,
    pub pending_schedule_version: Option<u32>,
    pub dpos_irreversible_blocknum: u64,
    pub bft_irreversible_blocknum: u64,
    pub trxs: Vec<TransactionReceipt>,
    pub validated: bool,
    pub in_current_chain: bool,
}

impl BlockState {
    #[must_use]
    pub fn is_irreversible(&self, lib: u64) -> bool {
        self.block_num <= lib
    }
}

/// The block currently being built. Scoped: created on `start_block`,
/// destroyed on `abort_block` or `commit_block`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingState {
    pub pending_block_state: BlockState,
    pub actions: Vec<TransactionReceipt>,
    pub block_status: BlockStatus,
    pub producer_block_id: Option<[u8; 32]>,
    pub valid: bool,
}

impl PendingState {
    #[must_use]
    pub fn new(pending_block_state: BlockState, block_status: BlockStatus) -> Self {
        Self {
            pending_block_state,
            actions: Vec::new(),
            block_status,
            producer_block_id: None,
            valid: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(block_num: u64, previous: [u8; 32]) -> BlockHeader {
        BlockHeader {
            timestamp: 1,
            producer: "eosio".parse().unwrap(),
            confirmed: 0,
            previous,
            transaction_mroot: [0; 32],
            action_mroot: [0; 32],
            schedule_version: 0,
            block_num,
        }
    }

    #[test]
    fn block_id_embeds_block_num_in_first_four_bytes() {
        let header = header(42, [0; 32]);
        let id = header.id();
        assert_eq!(&id[..4], &42_u32.to_be_bytes());
    }

    #[test]
    fn distinct_headers_produce_distinct_ids() {
        let a = header(1, [0; 32]);
        let b = header(1, [1; 32]);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn block_state_is_irreversible_once_lib_passes_its_height() {
        let state = BlockState {
            header: header(10, [0; 32]),
            block_id: header(10, [0; 32]).id(),
            block_num: 10,
            active_schedule_version: 1,
            pending_schedule_version: None,
            dpos_irreversible_blocknum: 0,
            bft_irreversible_blocknum: 0,
            trxs: Vec::new(),
            validated: true,
            in_current_chain: true,
        };
        assert!(!state.is_irreversible(9));
        assert!(state.is_irreversible(10));
    }
}
