//! Controller: the block lifecycle state machine and the fork-resolution
//! engine built around it.
//!
//! Owns every chain-wide collaborator a [`chain_txcontext::TransactionContext`]
//! needs borrowed for the duration of one dispatch (`db`, `resource_limits`,
//! `accounts`, `wasm`) plus the fork tree and TaPoS ring that span blocks.

pub mod fork_db;
pub mod schedule;

use std::{
    collections::{
        HashMap,
        HashSet,
    },
    time::{
        Duration,
        Instant,
    },
};

use chain_db::Db;
use chain_resource_limits::ResourceLimitsManager;
use chain_txcontext::{
    AccountRegistry,
    NullWasmEngine,
    TransactionContext,
    TxError,
    WasmEngine,
};
use chain_types::{
    account::{
        AccountName,
        PermissionLevel,
    },
    action::{
        Action,
        ActionReceipt,
    },
    block::{
        BlockHeader,
        BlockState,
        BlockStatus,
        PendingState,
    },
    digest::transaction_digest,
    transaction::{
        SignedTransaction,
        TransactionReceipt,
        TransactionStatus,
    },
    wire::Encode as _,
};
use fork_db::{
    ForkDatabase,
    ForkError,
};
use schedule::{
    ProducerAuthority,
    ProducerSchedule,
    ScheduleError,
};
use thiserror::Error;
use tracing::instrument;

pub const ONBLOCK_ACCOUNT: &str = "eosio";
pub const ONBLOCK_ACTION: &str = "onblock";
pub const MAX_TRX_LIFETIME_SECS: u32 = 3_600;
const TAPOS_RING_SIZE: usize = 1 << 16;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("controller is in state {0:?}, expected {1:?}")]
    WrongState(ControllerState, ControllerState),
    #[error("transaction expired or not yet valid at block time {0}")]
    TrxExpired(u32),
    #[error("transaction's reference block does not match the TaPoS ring")]
    InvalidRefBlock,
    #[error("fork database returned a different head than the one just installed")]
    ForkDbMismatch,
    #[error(transparent)]
    Fork(#[from] ForkError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error(transparent)]
    Db(#[from] chain_db::DbError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Building,
    Finalized,
}

struct PendingBlock {
    state: PendingState,
    session_started: bool,
    action_receipts: Vec<ActionReceipt>,
    queued_trxs: Vec<SignedTransaction>,
    signature: Option<String>,
}

/// Block lifecycle, resource accounting, and fork resolution for a single
/// node. Not `Send`/`Sync` by design (see spec §5: one logical thread
/// drives the whole block-execution core).
pub struct Controller {
    db: Db,
    resource_limits: ResourceLimitsManager,
    accounts: AccountRegistry,
    wasm: Box<dyn WasmEngine>,
    fork_db: ForkDatabase,
    tapos_ring: Vec<[u8; 32]>,
    state: ControllerState,
    pending: Option<PendingBlock>,
    active_schedule: ProducerSchedule,
    pending_schedule: Option<ProducerSchedule>,
    /// Transactions returned to the caller by `abort_block` or recovered
    /// from a popped block by `pop_block`, pending re-application under
    /// speculative read-mode (spec §4.1).
    unapplied_transactions: Vec<SignedTransaction>,
    /// The transactions of every block committed with `add_to_fork_db`,
    /// keyed by block id, so `pop_block` can recover a popped block's
    /// bodies for `unapplied_transactions`. `BlockState` itself only
    /// stores `TransactionReceipt`s, not bodies (see DESIGN.md).
    committed_trxs: HashMap<[u8; 32], Vec<SignedTransaction>>,
}

impl Controller {
    #[must_use]
    pub fn new(
        genesis: BlockState,
        resource_limits: ResourceLimitsManager,
    ) -> Self {
        let mut tapos_ring = vec![[0_u8; 32]; TAPOS_RING_SIZE];
        tapos_ring[(genesis.block_num as usize) & (TAPOS_RING_SIZE - 1)] = genesis.block_id;
        Self {
            db: Db::new(),
            resource_limits,
            accounts: AccountRegistry::new(),
            wasm: Box::new(NullWasmEngine),
            fork_db: ForkDatabase::new(genesis),
            tapos_ring,
            state: ControllerState::Idle,
            pending: None,
            active_schedule: ProducerSchedule::default(),
            pending_schedule: None,
            unapplied_transactions: Vec::new(),
            committed_trxs: HashMap::new(),
        }
    }

    /// Transactions awaiting re-application after an abort or fork-db pop.
    #[must_use]
    pub fn unapplied_transactions(&self) -> &[SignedTransaction] {
        &self.unapplied_transactions
    }

    /// Removes and returns every transaction awaiting re-application.
    pub fn drain_unapplied_transactions(&mut self) -> Vec<SignedTransaction> {
        std::mem::take(&mut self.unapplied_transactions)
    }

    /// Drops a single transaction from the unapplied-transaction registry
    /// (e.g. because the caller determined it is no longer valid).
    pub fn drop_unapplied_transaction(&mut self, trx_id: [u8; 32]) {
        self.unapplied_transactions.retain(|trx| transaction_digest(trx) != trx_id);
    }

    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.state
    }

    #[must_use]
    pub fn head(&self) -> &BlockState {
        self.fork_db.head()
    }

    #[must_use]
    pub fn accounts_mut(&mut self) -> &mut AccountRegistry {
        &mut self.accounts
    }

    #[must_use]
    pub fn resource_limits_mut(&mut self) -> &mut ResourceLimitsManager {
        &mut self.resource_limits
    }

    pub fn set_wasm_engine(&mut self, wasm: Box<dyn WasmEngine>) {
        self.wasm = wasm;
    }

    fn require_state(&self, expected: ControllerState) -> Result<(), ControllerError> {
        if self.state != expected {
            return Err(ControllerError::WrongState(self.state, expected));
        }
        Ok(())
    }

    /// Requires `Idle`. Allocates a fresh undo session (unless `status` is
    /// `Irreversible`), builds the pending block state from the current
    /// head, and runs the implicit `onblock` action.
    ///
    /// # Errors
    /// Returns [`ControllerError::WrongState`] if not `Idle`, or
    /// propagates a [`TxError`] raised while running `onblock`.
    #[instrument(skip(self), fields(block_num = self.head().block_num + 1))]
    pub fn start_block(
        &mut self,
        when: u32,
        confirmed: u16,
        status: BlockStatus,
        producer: AccountName,
    ) -> Result<(), ControllerError> {
        self.require_state(ControllerState::Idle)?;
        let head = self.head().clone();

        let session_started = !matches!(status, BlockStatus::Irreversible);
        if session_started {
            self.db.start_session();
        }

        let active_schedule_version = head.pending_schedule_version.unwrap_or(head.active_schedule_version);
        if let Some(version) = head.pending_schedule_version {
            if let Some(pending_schedule) = self.pending_schedule.take() {
                if pending_schedule.version == version {
                    self.active_schedule = pending_schedule;
                }
            }
        }

        let header = BlockHeader {
            timestamp: when,
            producer,
            confirmed,
            previous: head.block_id,
            transaction_mroot: [0; 32],
            action_mroot: [0; 32],
            schedule_version: active_schedule_version,
            block_num: head.block_num + 1,
        };
        let block_id = header.id();
        let pending_block_state = BlockState {
            header,
            block_id,
            block_num: head.block_num + 1,
            active_schedule_version,
            pending_schedule_version: None,
            dpos_irreversible_blocknum: head.dpos_irreversible_blocknum,
            bft_irreversible_blocknum: head.bft_irreversible_blocknum,
            trxs: Vec::new(),
            validated: false,
            in_current_chain: false,
        };

        self.pending = Some(PendingBlock {
            state: PendingState::new(pending_block_state, status),
            session_started,
            action_receipts: Vec::new(),
            queued_trxs: Vec::new(),
            signature: None,
        });
        self.state = ControllerState::Building;

        self.run_onblock(when)?;
        Ok(())
    }

    /// Runs the implicit `onblock` action in its own undo session nested
    /// inside the block's session (spec §5): a failure here rolls back
    /// only `onblock`'s mutations, not the rest of the block.
    fn run_onblock(&mut self, when: u32) -> Result<(), ControllerError> {
        let onblock = Action::new(
            ONBLOCK_ACCOUNT.parse().expect("`eosio` is a valid account name"),
            ONBLOCK_ACTION.parse().expect("`onblock` is a valid action name"),
            when.to_le_bytes().to_vec(),
        );
        let trx = implicit_transaction(onblock);
        let mut tx_ctx = TransactionContext::init_for_implicit_trx(
            trx,
            0,
            u64::MAX,
            Instant::now() + Duration::from_secs(1),
            Duration::from_millis(1),
            when,
        );
        self.db.start_session();
        match tx_ctx.execute(&mut self.db, &mut self.resource_limits, &mut self.accounts, self.wasm.as_mut()) {
            Ok(()) => {
                self.db.squash()?;
                Ok(())
            }
            Err(err) => {
                tx_ctx.undo();
                self.db.undo()?;
                Err(err.into())
            }
        }
    }

    /// Requires `Building`. Runs every action in `trx`, then bills it and
    /// appends its receipt to the pending block.
    ///
    /// # Errors
    /// Returns [`ControllerError::WrongState`], [`ControllerError::TrxExpired`],
    /// [`ControllerError::InvalidRefBlock`], or propagates a [`TxError`].
    #[instrument(skip(self, trx, provided_permissions))]
    pub fn push_transaction(
        &mut self,
        trx: SignedTransaction,
        deadline: Instant,
        explicit_billed_cpu_us: Option<u64>,
        provided_permissions: &HashSet<PermissionLevel>,
    ) -> Result<TransactionReceipt, ControllerError> {
        self.require_state(ControllerState::Building)?;
        let pending_block_time = self.pending_header().timestamp;
        if !trx.expiration_is_valid(pending_block_time, MAX_TRX_LIFETIME_SECS) {
            return Err(ControllerError::TrxExpired(pending_block_time));
        }
        self.check_tapos(&trx)?;

        let net_limit_words = u64::from(trx.max_net_usage_words).max(1);
        let packed_size = trx.encode_to_vec().len() as u64;
        let block_time_slot = pending_block_time;

        let mut tx_ctx = TransactionContext::init_for_input_trx(
            trx.clone(),
            packed_size,
            0,
            net_limit_words,
            explicit_billed_cpu_us,
            deadline,
            Duration::from_millis(1),
            block_time_slot,
        )?;

        self.db.start_session();
        let (cpu_usage_us, net_usage_words) = match self.run_transaction(&mut tx_ctx, provided_permissions) {
            Ok(usage) => {
                self.db.squash()?;
                usage
            }
            Err(err) => {
                tx_ctx.undo();
                self.db.undo()?;
                return Err(err);
            }
        };

        let trx_id = transaction_digest(&trx);
        let net_usage_bytes = u32::try_from(net_usage_words * 8).unwrap_or(u32::MAX);
        let cpu_usage_us = u32::try_from(cpu_usage_us).unwrap_or(u32::MAX);
        let receipt = self.push_receipt(TransactionStatus::Executed, cpu_usage_us, net_usage_bytes, trx_id);

        let pending = self.pending.as_mut().expect("checked Building above");
        pending.action_receipts.extend(tx_ctx.executed().iter().cloned());
        pending.queued_trxs.push(trx);

        Ok(receipt)
    }

    /// Checks authorization, executes every action, and bills the
    /// transaction. Run inside the nested undo session `push_transaction`
    /// opens around it, so any error here is rolled back by the caller
    /// without disturbing the rest of the block (spec §5).
    fn run_transaction(
        &mut self,
        tx_ctx: &mut TransactionContext,
        provided_permissions: &HashSet<PermissionLevel>,
    ) -> Result<(u64, u64), ControllerError> {
        tx_ctx.check_authorization(provided_permissions)?;
        let started = Instant::now();
        tx_ctx.execute(&mut self.db, &mut self.resource_limits, &mut self.accounts, self.wasm.as_mut())?;
        let elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        Ok(tx_ctx.finalize(&mut self.resource_limits, elapsed_us)?)
    }

    fn check_tapos(&self, trx: &SignedTransaction) -> Result<(), ControllerError> {
        let slot = (trx.ref_block_slot() as usize) & (TAPOS_RING_SIZE - 1);
        let referenced = self.tapos_ring[slot];
        if referenced == [0; 32] {
            return Err(ControllerError::InvalidRefBlock);
        }
        let prefix = u32::from_le_bytes(referenced[8..12].try_into().expect("4-byte slice"));
        if prefix != trx.ref_block_prefix {
            return Err(ControllerError::InvalidRefBlock);
        }
        Ok(())
    }

    /// Appends a `TransactionReceipt` to the pending block. Ordering is
    /// execution order; callers must invoke this exactly once per
    /// non-implicit transaction.
    fn push_receipt(&mut self, status: TransactionStatus, cpu_usage_us: u32, net_usage_bytes: u32, trx_id: [u8; 32]) -> TransactionReceipt {
        let receipt = TransactionReceipt::new(status, cpu_usage_us, net_usage_bytes, trx_id);
        let pending = self.pending.as_mut().expect("push_receipt called while Building");
        pending.state.actions.push(receipt.clone());
        receipt
    }

    fn pending_header(&self) -> &BlockHeader {
        &self.pending.as_ref().expect("checked Building above").state.pending_block_state.header
    }

    /// Requires `Building`. Recomputes elastic CPU/NET limits, the action
    /// and transaction Merkle roots, and reassigns `block_id`.
    ///
    /// # Errors
    /// Returns [`ControllerError::WrongState`] if not `Building`.
    #[instrument(skip(self))]
    pub fn finalize_block(&mut self) -> Result<&BlockHeader, ControllerError> {
        self.require_state(ControllerState::Building)?;
        self.resource_limits.process_block_usage();
        self.resource_limits.process_account_limit_updates();

        let pending = self.pending.as_mut().expect("checked Building above");
        let action_mroot = chain_merkle::root_from_leaves(pending.action_receipts.iter().map(ActionReceipt::digest));
        let transaction_mroot =
            chain_merkle::root_from_leaves(pending.state.actions.iter().map(|receipt| receipt.trx_id));

        let header = &mut pending.state.pending_block_state.header;
        header.action_mroot = action_mroot;
        header.transaction_mroot = transaction_mroot;
        pending.state.pending_block_state.block_id = pending.state.pending_block_state.header.id();

        self.state = ControllerState::Finalized;
        Ok(&self.pending.as_ref().expect("just set").state.pending_block_state.header)
    }

    /// Requires `Finalized`. Attaches the producer's signature over the
    /// finalized block id.
    ///
    /// # Errors
    /// Returns [`ControllerError::WrongState`] if not `Finalized`.
    pub fn sign_block(&mut self, signer: impl FnOnce(&[u8; 32]) -> String) -> Result<(), ControllerError> {
        self.require_state(ControllerState::Finalized)?;
        let pending = self.pending.as_mut().expect("checked Finalized above");
        let block_id = pending.state.pending_block_state.block_id;
        pending.state.producer_block_id = Some(block_id);
        pending.signature = Some(signer(&block_id));
        Ok(())
    }

    /// Requires `Finalized`. Installs the pending state into the fork DB
    /// and commits the DB's undo session.
    ///
    /// # Errors
    /// Returns [`ControllerError::WrongState`] if not `Finalized`,
    /// [`ControllerError::ForkDbMismatch`] if `add_to_fork_db` and the
    /// fork DB's resulting head differs from the block just installed, or
    /// propagates a [`chain_db::DbError`].
    #[instrument(skip(self))]
    pub fn commit_block(&mut self, add_to_fork_db: bool) -> Result<[u8; 32], ControllerError> {
        self.require_state(ControllerState::Finalized)?;
        let pending = self.pending.take().expect("checked Finalized above");
        let queued_trxs = pending.queued_trxs;
        let mut block_state = pending.state.pending_block_state;
        block_state.trxs = pending.state.actions;
        block_state.validated = true;
        block_state.in_current_chain = true;
        let block_id = block_state.block_id;
        let block_num = block_state.block_num;

        if add_to_fork_db {
            self.committed_trxs.insert(block_id, queued_trxs);
            self.fork_db.insert(block_state);
            self.fork_db.advance_head(block_id)?;
            if self.fork_db.head_id() != block_id {
                return Err(ControllerError::ForkDbMismatch);
            }
        }

        if pending.session_started {
            self.db.push()?;
        }

        self.tapos_ring[(block_num as usize) & (TAPOS_RING_SIZE - 1)] = block_id;
        self.state = ControllerState::Idle;
        Ok(block_id)
    }

    /// Requires `Building` or `Finalized`. Discards the pending undo
    /// session and moves the transactions that were queued into
    /// [`Self::unapplied_transactions`] so the caller can re-queue them
    /// under speculative read-mode.
    ///
    /// # Errors
    /// Returns [`ControllerError::WrongState`] if `Idle`, or propagates a
    /// [`chain_db::DbError`].
    pub fn abort_block(&mut self) -> Result<(), ControllerError> {
        if self.state == ControllerState::Idle {
            return Err(ControllerError::WrongState(self.state, ControllerState::Building));
        }
        let pending = self.pending.take().expect("checked non-Idle above");
        if pending.session_started {
            self.db.undo()?;
        }
        self.unapplied_transactions.extend(pending.queued_trxs);
        self.state = ControllerState::Idle;
        Ok(())
    }

    /// Switches the fork DB's head to `new_head`, popping and re-applying
    /// blocks as needed. `apply_block` replays one block's transactions
    /// against `self` (sourcing the block body is an external collaborator's
    /// job, e.g. the block log or a peer response).
    ///
    /// # Errors
    /// Propagates [`ForkError`] from branch computation, or whatever error
    /// `apply_block` returns.
    #[instrument(skip(self, apply_block))]
    pub fn maybe_switch_forks(
        &mut self,
        new_head: [u8; 32],
        mut apply_block: impl FnMut(&mut Self, [u8; 32]) -> Result<(), ControllerError>,
    ) -> Result<(), ControllerError> {
        if new_head == self.fork_db.head_id() {
            return Ok(());
        }
        let head_id = self.fork_db.head_id();
        let new_head_state = self.fork_db.get(&new_head).ok_or(ForkError::UnknownBlock(new_head))?.clone();

        if new_head_state.header.previous == head_id {
            return match apply_block(self, new_head) {
                Ok(()) => {
                    self.mark_validated(new_head);
                    self.fork_db.advance_head(new_head)?;
                    Ok(())
                }
                Err(err) => {
                    self.mark_invalid(new_head);
                    Err(err)
                }
            };
        }

        let (to_apply, to_pop) = self.fork_db.branches_from(new_head)?;
        for id in &to_pop {
            self.pop_block(*id)?;
        }

        let mut applied = Vec::new();
        for id in &to_apply {
            match apply_block(self, *id) {
                Ok(()) => applied.push(*id),
                Err(err) => {
                    self.mark_invalid(*id);
                    for id in applied.iter().rev() {
                        self.pop_block(*id)?;
                    }
                    for id in to_pop.iter().rev() {
                        apply_block(self, *id)?;
                    }
                    return Err(err);
                }
            }
        }
        self.fork_db.advance_head(new_head)?;
        Ok(())
    }

    /// Undoes one DB session, marks the block no longer in the current
    /// chain, and moves its transactions into
    /// [`Self::unapplied_transactions`] for re-application (spec §4.1).
    fn pop_block(&mut self, id: [u8; 32]) -> Result<(), ControllerError> {
        self.db.undo()?;
        if let Some(state) = self.fork_db.get_mut(&id) {
            state.in_current_chain = false;
        }
        if let Some(trxs) = self.committed_trxs.remove(&id) {
            self.unapplied_transactions.extend(trxs);
        }
        Ok(())
    }

    fn mark_validated(&mut self, id: [u8; 32]) {
        if let Some(state) = self.fork_db.get_mut(&id) {
            state.validated = true;
            state.in_current_chain = true;
        }
    }

    fn mark_invalid(&mut self, id: [u8; 32]) {
        self.fork_db.remove(&id);
    }

    /// Requires no size/account/key/duplicate violations and that the
    /// proposal differs from the current pending or active schedule.
    ///
    /// # Errors
    /// See [`ScheduleError`] variants.
    pub fn set_proposed_producers(&mut self, producers: Vec<ProducerAuthority>) -> Result<u32, ControllerError> {
        let accounts = &self.accounts;
        let proposed = self.active_schedule.propose(self.pending_schedule.as_ref(), producers, |account| {
            accounts.account_exists(account)
        })?;
        let version = proposed.version;
        self.pending_schedule = Some(proposed);
        Ok(version)
    }
}

fn implicit_transaction(action: Action) -> SignedTransaction {
    SignedTransaction {
        expiration: 0,
        ref_block_num: 0,
        ref_block_prefix: 0,
        max_net_usage_words: 0,
        max_cpu_usage_ms: 0,
        delay_sec: 0,
        context_free_actions: Vec::new(),
        actions: vec![action],
        extensions: bytes::Bytes::new(),
        signatures: Vec::new(),
        context_free_data: bytes::Bytes::new(),
    }
}
