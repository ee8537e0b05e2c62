//! Actions and the receipts/traces produced by executing them.

use std::{
    collections::BTreeMap,
    time::Duration,
};

use bytes::{
    Buf,
    BufMut,
    Bytes,
};
use serde::{
    Deserialize,
    Serialize,
};
use sha2::{
    Digest as _,
    Sha256,
};

use crate::{
    account::{
        AccountName,
        PermissionLevel,
    },
    wire::{
        get_bytes,
        get_varint,
        put_bytes,
        put_varint,
        Decode,
        Encode,
        Result as WireResult,
    },
};

/// The minimum unit of contract execution: a call to `account::name` signed
/// off by every entry in `authorization`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub account: AccountName,
    pub name: AccountName,
    pub authorization: Vec<PermissionLevel>,
    #[serde(with = "hex::serde")]
    pub data: Bytes,
}

impl Action {
    #[must_use]
    pub fn new(account: AccountName, name: AccountName, data: impl Into<Bytes>) -> Self {
        Self {
            account,
            name,
            authorization: Vec::new(),
            data: data.into(),
        }
    }

    #[must_use]
    pub fn with_authorization(mut self, level: PermissionLevel) -> Self {
        self.authorization.push(level);
        self
    }

    /// `true` for a context-free action: no authorization, no mutable state
    /// access.
    #[must_use]
    pub fn is_context_free(&self) -> bool {
        self.authorization.is_empty()
    }

    /// `SHA256` of the canonical encoding; identifies this exact action
    /// instance within an [`ActionReceipt`].
    #[must_use]
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(self.encode_to_vec()).into()
    }
}

impl Encode for Action {
    fn encode(&self, buf: &mut impl BufMut) {
        self.account.encode(buf);
        self.name.encode(buf);
        put_varint(buf, self.authorization.len() as u64);
        for level in &self.authorization {
            level.encode(buf);
        }
        put_bytes(buf, &self.data);
    }
}

impl Decode for Action {
    fn decode(buf: &mut impl Buf) -> WireResult<Self> {
        let account = AccountName::decode(buf)?;
        let name = AccountName::decode(buf)?;
        let count = get_varint(buf, "Action.authorization")?;
        let mut authorization = Vec::with_capacity(count as usize);
        for _ in 0..count {
            authorization.push(PermissionLevel::decode(buf)?);
        }
        let data = Bytes::from(get_bytes(buf, "Action.data")?);
        Ok(Self {
            account,
            name,
            authorization,
            data,
        })
    }
}

/// Fingerprints the application of a single action within a transaction.
/// Written into the block so that validators can recompute the action
/// Merkle root deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReceipt {
    pub receiver: AccountName,
    pub act_digest: [u8; 32],
    pub global_sequence: u64,
    pub recv_sequence: u64,
    pub auth_sequence: BTreeMap<AccountName, u64>,
    pub code_sequence: u64,
    pub abi_sequence: u64,
}

impl ActionReceipt {
    /// `SHA256` of the canonical encoding; the leaf hashed into the block's
    /// action Merkle root.
    #[must_use]
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(self.encode_to_vec()).into()
    }
}

impl Encode for ActionReceipt {
    fn encode(&self, buf: &mut impl BufMut) {
        self.receiver.encode(buf);
        buf.put_slice(&self.act_digest);
        put_varint(buf, self.global_sequence);
        put_varint(buf, self.recv_sequence);
        put_varint(buf, self.auth_sequence.len() as u64);
        for (actor, seq) in &self.auth_sequence {
            actor.encode(buf);
            put_varint(buf, *seq);
        }
        put_varint(buf, self.code_sequence);
        put_varint(buf, self.abi_sequence);
    }
}

impl Decode for ActionReceipt {
    fn decode(buf: &mut impl Buf) -> WireResult<Self> {
        let receiver = AccountName::decode(buf)?;
        let mut act_digest = [0_u8; 32];
        if buf.remaining() < 32 {
            return Err(crate::wire::WireError::UnexpectedEof("ActionReceipt.act_digest"));
        }
        buf.copy_to_slice(&mut act_digest);
        let global_sequence = get_varint(buf, "ActionReceipt.global_sequence")?;
        let recv_sequence = get_varint(buf, "ActionReceipt.recv_sequence")?;
        let count = get_varint(buf, "ActionReceipt.auth_sequence")?;
        let mut auth_sequence = BTreeMap::new();
        for _ in 0..count {
            let actor = AccountName::decode(buf)?;
            let seq = get_varint(buf, "ActionReceipt.auth_sequence.seq")?;
            auth_sequence.insert(actor, seq);
        }
        let code_sequence = get_varint(buf, "ActionReceipt.code_sequence")?;
        let abi_sequence = get_varint(buf, "ActionReceipt.abi_sequence")?;
        Ok(Self {
            receiver,
            act_digest,
            global_sequence,
            recv_sequence,
            auth_sequence,
            code_sequence,
            abi_sequence,
        })
    }
}

/// A net change in one account's billed RAM usage, accumulated while
/// executing a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRamDelta {
    pub account: AccountName,
    pub delta: i64,
}

/// The diagnostic tree mirroring an action's execution, including every
/// notification and inline action it spawned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTrace {
    pub receipt: Option<ActionReceipt>,
    pub act: Action,
    pub console: String,
    pub elapsed: Duration,
    pub trx_id: [u8; 32],
    pub block_num: u64,
    pub block_time: u64,
    pub producer_block_id: Option<[u8; 32]>,
    pub account_ram_deltas: Vec<AccountRamDelta>,
    pub inline_traces: Vec<ActionTrace>,
}

impl ActionTrace {
    /// The sum of every account's RAM delta recorded directly on this trace
    /// (not its children); invariant 6 in spec §3 is checked against this
    /// per-trace sum, not the whole tree.
    #[must_use]
    pub fn net_ram_delta(&self) -> i64 {
        self.account_ram_deltas.iter().map(|d| d.delta).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(name: &str) -> AccountName {
        name.parse().unwrap()
    }

    #[test]
    fn action_round_trips_through_encode_decode() {
        let action = Action::new(acct("eosio.token"), acct("transfer"), b"payload".to_vec())
            .with_authorization(PermissionLevel::new(acct("alice"), acct("active")));
        let mut buf = action.encode_to_vec();
        let mut slice = buf.as_slice();
        let decoded = Action::decode(&mut slice).unwrap();
        assert_eq!(decoded, action);
        assert!(slice.is_empty());
        buf.clear();
    }

    #[test]
    fn context_free_action_has_no_authorization() {
        let action = Action::new(acct("eosio"), acct("nonce"), Vec::new());
        assert!(action.is_context_free());
    }

    #[test]
    fn action_receipt_round_trips_through_encode_decode() {
        let mut auth_sequence = BTreeMap::new();
        auth_sequence.insert(acct("alice"), 3);
        let receipt = ActionReceipt {
            receiver: acct("eosio.token"),
            act_digest: [7; 32],
            global_sequence: 42,
            recv_sequence: 5,
            auth_sequence,
            code_sequence: 1,
            abi_sequence: 1,
        };
        let buf = receipt.encode_to_vec();
        let mut slice = buf.as_slice();
        assert_eq!(ActionReceipt::decode(&mut slice).unwrap(), receipt);
    }

    #[test]
    fn account_ram_deltas_sum_to_zero_when_no_net_allocation() {
        let trace = ActionTrace {
            receipt: None,
            act: Action::new(acct("eosio.token"), acct("transfer"), Vec::new()),
            console: String::new(),
            elapsed: Duration::default(),
            trx_id: [0; 32],
            block_num: 1,
            block_time: 0,
            producer_block_id: None,
            account_ram_deltas: vec![
                AccountRamDelta {
                    account: acct("alice"),
                    delta: 100,
                },
                AccountRamDelta {
                    account: acct("bob"),
                    delta: -100,
                },
            ],
            inline_traces: Vec::new(),
        };
        assert_eq!(trace.net_ram_delta(), 0);
    }
}
