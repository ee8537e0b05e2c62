//! An in-memory tree of competing block states, keyed by block id, with
//! last-common-ancestor branch computation for reorgs.

use std::collections::HashMap;

use chain_types::block::BlockState;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForkError {
    #[error("block {0:?} is not in the fork database")]
    UnknownBlock([u8; 32]),
}

pub struct ForkDatabase {
    blocks: HashMap<[u8; 32], BlockState>,
    head: [u8; 32],
}

impl ForkDatabase {
    /// Seeds the fork tree with the chain's root (genesis or the last
    /// irreversible block read at startup).
    #[must_use]
    pub fn new(root: BlockState) -> Self {
        let head = root.block_id;
        let mut blocks = HashMap::new();
        blocks.insert(head, root);
        Self {
            blocks,
            head,
        }
    }

    /// # Panics
    /// Panics if the head id was removed without a replacement being
    /// inserted first; the fork database never leaves itself headless.
    #[must_use]
    pub fn head(&self) -> &BlockState {
        self.blocks.get(&self.head).expect("fork database always has a head")
    }

    #[must_use]
    pub fn head_id(&self) -> [u8; 32] {
        self.head
    }

    pub fn insert(&mut self, state: BlockState) {
        self.blocks.insert(state.block_id, state);
    }

    #[must_use]
    pub fn get(&self, id: &[u8; 32]) -> Option<&BlockState> {
        self.blocks.get(id)
    }

    #[must_use]
    pub fn get_mut(&mut self, id: &[u8; 32]) -> Option<&mut BlockState> {
        self.blocks.get_mut(id)
    }

    /// Removes a fork branch's block once it will never be needed again
    /// (superseded by a sibling, or below the last irreversible block).
    pub fn remove(&mut self, id: &[u8; 32]) -> Option<BlockState> {
        self.blocks.remove(id)
    }

    /// # Errors
    /// Returns [`ForkError::UnknownBlock`] if `id` names a block this
    /// database has never seen.
    pub fn advance_head(&mut self, id: [u8; 32]) -> Result<(), ForkError> {
        if !self.blocks.contains_key(&id) {
            return Err(ForkError::UnknownBlock(id));
        }
        self.head = id;
        Ok(())
    }

    /// Walks back from both the current head and `new_head` to their last
    /// common ancestor, returning `(to_apply, to_pop)`: `to_apply` is
    /// ordered oldest-first (apply in this order), `to_pop` newest-first
    /// (pop/undo in this order).
    ///
    /// # Errors
    /// Returns [`ForkError::UnknownBlock`] if either chain walks off the
    /// blocks this database holds before meeting.
    pub fn branches_from(&self, new_head: [u8; 32]) -> Result<(Vec<[u8; 32]>, Vec<[u8; 32]>), ForkError> {
        let mut a = self.head;
        let mut b = new_head;
        let mut to_pop = Vec::new();
        let mut to_apply = Vec::new();

        while self.block_num_of(a)? > self.block_num_of(b)? {
            to_pop.push(a);
            a = self.previous_of(a)?;
        }
        while self.block_num_of(b)? > self.block_num_of(a)? {
            to_apply.push(b);
            b = self.previous_of(b)?;
        }
        while a != b {
            to_pop.push(a);
            a = self.previous_of(a)?;
            to_apply.push(b);
            b = self.previous_of(b)?;
        }
        to_apply.reverse();
        Ok((to_apply, to_pop))
    }

    fn block_num_of(&self, id: [u8; 32]) -> Result<u64, ForkError> {
        self.blocks.get(&id).map(|b| b.block_num).ok_or(ForkError::UnknownBlock(id))
    }

    fn previous_of(&self, id: [u8; 32]) -> Result<[u8; 32], ForkError> {
        self.blocks.get(&id).map(|b| b.header.previous).ok_or(ForkError::UnknownBlock(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(block_num: u64, previous: [u8; 32]) -> chain_types::block::BlockHeader {
        chain_types::block::BlockHeader {
            timestamp: block_num as u32,
            producer: "eosio".parse().unwrap(),
            confirmed: 0,
            previous,
            transaction_mroot: [0; 32],
            action_mroot: [0; 32],
            schedule_version: 0,
            block_num,
        }
    }

    fn state(block_num: u64, previous: [u8; 32]) -> BlockState {
        let header = header(block_num, previous);
        let block_id = header.id();
        BlockState {
            header,
            block_id,
            block_num,
            active_schedule_version: 0,
            pending_schedule_version: None,
            dpos_irreversible_blocknum: 0,
            bft_irreversible_blocknum: 0,
            trxs: Vec::new(),
            validated: true,
            in_current_chain: true,
        }
    }

    #[test]
    fn branches_from_a_direct_descendant_has_no_pops() {
        let genesis = state(0, [0; 32]);
        let genesis_id = genesis.block_id;
        let mut db = ForkDatabase::new(genesis);
        let next = state(1, genesis_id);
        let next_id = next.block_id;
        db.insert(next);
        let (to_apply, to_pop) = db.branches_from(next_id).unwrap();
        assert_eq!(to_apply, vec![next_id]);
        assert!(to_pop.is_empty());
    }

    #[test]
    fn branches_from_a_sibling_fork_pops_and_applies_from_the_common_ancestor() {
        let genesis = state(0, [0; 32]);
        let genesis_id = genesis.block_id;
        let mut db = ForkDatabase::new(genesis);

        let a1 = state(1, genesis_id);
        let a1_id = a1.block_id;
        db.insert(a1);
        db.advance_head(a1_id).unwrap();

        let mut b1_header = header(1, genesis_id);
        b1_header.confirmed = 1; // distinguish from a1's id
        let b1_id = b1_header.id();
        db.insert(BlockState {
            header: b1_header,
            block_id: b1_id,
            block_num: 1,
            active_schedule_version: 0,
            pending_schedule_version: None,
            dpos_irreversible_blocknum: 0,
            bft_irreversible_blocknum: 0,
            trxs: Vec::new(),
            validated: true,
            in_current_chain: false,
        });

        let (to_apply, to_pop) = db.branches_from(b1_id).unwrap();
        assert_eq!(to_pop, vec![a1_id]);
        assert_eq!(to_apply, vec![b1_id]);
    }
}
