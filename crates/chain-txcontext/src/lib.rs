//! `TransactionContext`: resource metering, deadlines, and action dispatch
//! scoped to one transaction.
//!
//! Mirrors `chain-apply`'s split between "things a transaction owns"
//! (deadline, executed receipts, net/cpu reservation) and "things the
//! whole chain owns" (account registry, sequence counters, the DB, the
//! resource-limits manager) — the latter are borrowed for the duration of
//! a single dispatch rather than stored on `TransactionContext` itself, so
//! there is no cyclic ownership between this crate and `chain-apply`.

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

use chain_apply::{
    ApplyContext,
    ApplyError,
};
use chain_db::Db;
use chain_resource_limits::ResourceLimitsManager;
use chain_types::{
    account::{
        AccountName,
        PermissionLevel,
    },
    action::{
        Action,
        ActionReceipt,
        ActionTrace,
    },
    transaction::SignedTransaction,
};
use thiserror::Error;

/// The external WASM engine collaborator: `apply(code_version, code,
/// apply_context)`. Left unimplemented by this core; a real host plugs in
/// a concrete engine.
pub trait WasmEngine {
    /// # Errors
    /// Returns an error if the guest code traps or exceeds its
    /// instruction budget.
    fn apply(&mut self, receiver: AccountName, act: &Action) -> Result<String, TxError>;
}

/// A `WasmEngine` that refuses to run any code. Safe default for accounts
/// that never have `has_code` set.
#[derive(Debug, Default)]
pub struct NullWasmEngine;

impl WasmEngine for NullWasmEngine {
    fn apply(&mut self, receiver: AccountName, _act: &Action) -> Result<String, TxError> {
        Err(TxError::NoWasmEngine(receiver))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TxError {
    #[error("transaction is in state {0:?}, expected {1:?}")]
    WrongState(TxState, TxState),
    #[error("transaction net usage {0} words exceeds its limit of {1} words")]
    NetUsageExceeded(u64, u64),
    #[error("deadline exceeded")]
    Deadline,
    #[error("within leeway of the deadline")]
    LeewayDeadline,
    #[error("missing authority of {0}")]
    MissingAuth(AccountName),
    #[error("no wasm engine configured for `{0}`")]
    NoWasmEngine(AccountName),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    ResourceLimits(#[from] chain_resource_limits::ResourceLimitsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxState {
    Uninitialized,
    Initialized,
    Executed,
    Committed,
    Undone,
}

/// Byte overhead charged per signature when computing NET usage for an
/// input transaction (signature bytes themselves plus fixed recovery
/// bookkeeping).
pub const OVERHEAD_PER_SIGNATURE_BYTES: u64 = 16;

#[derive(Debug, Default, Clone, Copy)]
struct AccountInfo {
    privileged: bool,
    has_code: bool,
    code_sequence: u64,
    abi_sequence: u64,
}

/// Chain-wide account/permission/sequence bookkeeping, owned by the
/// controller and borrowed by a `TransactionContext` for the duration of
/// one dispatch. Stands in for the account and sequence tables a real
/// chainbase would hold as separate multi-index containers.
#[derive(Default)]
pub struct AccountRegistry {
    accounts: HashMap<AccountName, AccountInfo>,
    permissions: HashSet<PermissionLevel>,
    native_handlers: HashSet<(AccountName, AccountName, AccountName)>,
    global_sequence: u64,
    recv_sequence: HashMap<AccountName, u64>,
    auth_sequence: HashMap<AccountName, u64>,
}

impl AccountRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_account(&mut self, account: AccountName) {
        self.accounts.entry(account).or_default();
    }

    pub fn set_privileged(&mut self, account: AccountName, privileged: bool) {
        self.accounts.entry(account).or_default().privileged = privileged;
    }

    pub fn set_code(&mut self, account: AccountName, code_sequence: u64) {
        let info = self.accounts.entry(account).or_default();
        info.has_code = true;
        info.code_sequence = code_sequence;
    }

    pub fn set_abi(&mut self, account: AccountName, abi_sequence: u64) {
        self.accounts.entry(account).or_default().abi_sequence = abi_sequence;
    }

    pub fn grant_permission(&mut self, level: PermissionLevel) {
        self.permissions.insert(level);
    }

    pub fn register_native_handler(&mut self, receiver: AccountName, account: AccountName, name: AccountName) {
        self.native_handlers.insert((receiver, account, name));
    }

    #[must_use]
    pub fn account_exists(&self, account: AccountName) -> bool {
        self.accounts.contains_key(&account)
    }

    #[must_use]
    pub fn is_privileged(&self, account: AccountName) -> bool {
        self.accounts.get(&account).is_some_and(|info| info.privileged)
    }

    #[must_use]
    pub fn has_code(&self, account: AccountName) -> bool {
        self.accounts.get(&account).is_some_and(|info| info.has_code)
    }

    #[must_use]
    pub fn code_sequence(&self, account: AccountName) -> u64 {
        self.accounts.get(&account).map_or(0, |info| info.code_sequence)
    }

    #[must_use]
    pub fn abi_sequence(&self, account: AccountName) -> u64 {
        self.accounts.get(&account).map_or(0, |info| info.abi_sequence)
    }

    #[must_use]
    pub fn permission_exists(&self, level: PermissionLevel) -> bool {
        self.permissions.contains(&level)
    }

    fn next_global_sequence(&mut self) -> u64 {
        self.global_sequence += 1;
        self.global_sequence
    }

    fn next_recv_sequence(&mut self, account: AccountName) -> u64 {
        let entry = self.recv_sequence.entry(account).or_insert(0);
        *entry += 1;
        *entry
    }

    fn next_auth_sequence(&mut self, actor: AccountName) -> u64 {
        let entry = self.auth_sequence.entry(actor).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Looks up a registered native handler for the exact triple and runs
    /// it. This core only tracks whether a handler is registered; the
    /// business logic a real system contract would run is out of scope.
    fn run_native_handler(&self, receiver: AccountName, act: &Action) -> Option<String> {
        self.native_handlers
            .contains(&(receiver, act.account, act.name))
            .then(String::new)
    }
}

struct DispatchHost<'a> {
    tx: &'a mut TransactionContext,
    accounts: &'a mut AccountRegistry,
    wasm: &'a mut dyn WasmEngine,
}

impl chain_apply::TransactionHost for DispatchHost<'_> {
    fn check_time(&mut self) -> Result<(), ApplyError> {
        self.tx.check_time().map_err(|_| ApplyError::Deadline)
    }

    fn account_exists(&self, account: AccountName) -> bool {
        self.accounts.account_exists(account)
    }

    fn is_privileged(&self, account: AccountName) -> bool {
        self.accounts.is_privileged(account)
    }

    fn has_code(&self, account: AccountName) -> bool {
        self.accounts.has_code(account)
    }

    fn code_sequence(&self, account: AccountName) -> u64 {
        self.accounts.code_sequence(account)
    }

    fn abi_sequence(&self, account: AccountName) -> u64 {
        self.accounts.abi_sequence(account)
    }

    fn permission_exists(&self, level: PermissionLevel) -> bool {
        self.accounts.permission_exists(level)
    }

    fn next_global_sequence(&mut self) -> u64 {
        self.accounts.next_global_sequence()
    }

    fn next_recv_sequence(&mut self, account: AccountName) -> u64 {
        self.accounts.next_recv_sequence(account)
    }

    fn next_auth_sequence(&mut self, actor: AccountName) -> u64 {
        self.accounts.next_auth_sequence(actor)
    }

    fn run_native_handler(&mut self, receiver: AccountName, act: &Action) -> Result<Option<String>, ApplyError> {
        Ok(self.accounts.run_native_handler(receiver, act))
    }

    fn run_wasm_apply(&mut self, receiver: AccountName, act: &Action) -> Result<String, ApplyError> {
        self.wasm.apply(receiver, act).map_err(|e| ApplyError::WasmApplyFailed(e.to_string()))
    }
}

/// Envelopes one transaction with resource accounting and (conceptually)
/// a nested undo session; the session itself is driven by the owning
/// `Controller` through `chain_db::Db::start_session`/`undo`, since the DB
/// is shared across every transaction in a block.
pub struct TransactionContext {
    state: TxState,
    trx: SignedTransaction,
    can_subjectively_fail: bool,
    deadline: Instant,
    leeway: Duration,
    explicit_billed_cpu_us: Option<u64>,
    net_limit_words: u64,
    net_usage_words: u64,
    billed_accounts: Vec<AccountName>,
    executed: Vec<ActionReceipt>,
    block_time_slot: u32,
    /// The transaction's original publication timestamp, restored for
    /// authorization/delay checks when replaying a deferred transaction
    /// (spec §4.3). `None` for implicit and ordinary input transactions,
    /// which are authorized against the current block time.
    published_at: Option<u32>,
}

impl TransactionContext {
    /// `onblock` and deferred transactions: no objective deadline beyond
    /// the block's, never subjectively fails.
    #[must_use]
    pub fn init_for_implicit_trx(
        trx: SignedTransaction,
        initial_net_usage: u64,
        net_limit_words: u64,
        deadline: Instant,
        leeway: Duration,
        block_time_slot: u32,
    ) -> Self {
        Self {
            state: TxState::Initialized,
            billed_accounts: billed_accounts_of(&trx),
            trx,
            can_subjectively_fail: false,
            deadline,
            leeway,
            explicit_billed_cpu_us: None,
            net_limit_words,
            net_usage_words: initial_net_usage / 8,
            executed: Vec::new(),
            block_time_slot,
            published_at: None,
        }
    }

    /// A deferred transaction being replayed out of the deferred-trx
    /// table. Like [`Self::init_for_implicit_trx`] (no objective deadline
    /// beyond the block's, never subjectively fails), but carries
    /// `published_at`, the timestamp the transaction was originally sent
    /// at, so authorization/delay checks run against when it was actually
    /// published rather than the current block time (spec §4.3).
    #[must_use]
    pub fn init_for_deferred_trx(
        trx: SignedTransaction,
        published_at: u32,
        net_limit_words: u64,
        deadline: Instant,
        leeway: Duration,
        block_time_slot: u32,
    ) -> Self {
        Self {
            state: TxState::Initialized,
            billed_accounts: billed_accounts_of(&trx),
            trx,
            can_subjectively_fail: false,
            deadline,
            leeway,
            explicit_billed_cpu_us: None,
            net_limit_words,
            net_usage_words: 0,
            executed: Vec::new(),
            block_time_slot,
            published_at: Some(published_at),
        }
    }

    /// An ordinary signed transaction received from a client or peer.
    ///
    /// # Errors
    /// Returns [`TxError::NetUsageExceeded`] if the packed size plus
    /// signature overhead exceeds `net_limit_words`.
    pub fn init_for_input_trx(
        trx: SignedTransaction,
        packed_size_unprunable: u64,
        packed_size_prunable: u64,
        net_limit_words: u64,
        explicit_billed_cpu_us: Option<u64>,
        deadline: Instant,
        leeway: Duration,
        block_time_slot: u32,
    ) -> Result<Self, TxError> {
        let n_signatures = trx.signatures.len() as u64;
        let net_usage_bytes = packed_size_unprunable + packed_size_prunable + n_signatures * OVERHEAD_PER_SIGNATURE_BYTES;
        let net_usage_words = net_usage_bytes.div_ceil(8);
        if net_usage_words > net_limit_words {
            return Err(TxError::NetUsageExceeded(net_usage_words, net_limit_words));
        }
        Ok(Self {
            state: TxState::Initialized,
            billed_accounts: billed_accounts_of(&trx),
            trx,
            can_subjectively_fail: true,
            deadline,
            leeway,
            explicit_billed_cpu_us,
            net_limit_words,
            net_usage_words,
            executed: Vec::new(),
            block_time_slot,
            published_at: None,
        })
    }

    #[must_use]
    pub fn state(&self) -> TxState {
        self.state
    }

    #[must_use]
    pub fn can_subjectively_fail(&self) -> bool {
        self.can_subjectively_fail
    }

    /// The transaction's original publication timestamp, if this context
    /// was built with [`Self::init_for_deferred_trx`].
    #[must_use]
    pub fn published_at(&self) -> Option<u32> {
        self.published_at
    }

    #[must_use]
    pub fn executed(&self) -> &[ActionReceipt] {
        &self.executed
    }

    /// Fires [`TxError::Deadline`] once the deadline has passed, or
    /// [`TxError::LeewayDeadline`] once within `leeway` of it.
    pub fn check_time(&self) -> Result<(), TxError> {
        let now = Instant::now();
        if now >= self.deadline {
            return Err(TxError::Deadline);
        }
        if self.deadline - now <= self.leeway {
            return Err(TxError::LeewayDeadline);
        }
        Ok(())
    }

    /// Verifies every action's declared authorization is satisfied by
    /// `provided_permissions`. Key recovery from signatures is the
    /// external cryptographic collaborator's job; this takes the already
    /// recovered permission set as input.
    ///
    /// # Errors
    /// Returns [`TxError::MissingAuth`] naming the first unsatisfied
    /// actor.
    pub fn check_authorization(&self, provided_permissions: &HashSet<PermissionLevel>) -> Result<(), TxError> {
        for act in self.trx.context_free_actions.iter().chain(&self.trx.actions) {
            for level in &act.authorization {
                if !provided_permissions.contains(level) {
                    return Err(TxError::MissingAuth(level.actor));
                }
            }
        }
        Ok(())
    }

    /// Runs every context-free action, then every regular action, each
    /// through its own top-level `ApplyContext`.
    ///
    /// # Errors
    /// Returns [`TxError::WrongState`] if not `Initialized`, or propagates
    /// any [`ApplyError`] raised while executing an action.
    pub fn execute(
        &mut self,
        db: &mut Db,
        resource_limits: &mut ResourceLimitsManager,
        accounts: &mut AccountRegistry,
        wasm: &mut dyn WasmEngine,
    ) -> Result<(), TxError> {
        if self.state != TxState::Initialized {
            return Err(TxError::WrongState(self.state, TxState::Initialized));
        }
        let context_free = self.trx.context_free_actions.clone();
        let regular = self.trx.actions.clone();
        for act in context_free.into_iter().chain(regular) {
            let receiver = act.account;
            self.dispatch(db, resource_limits, accounts, wasm, receiver, act, 0)?;
        }
        self.state = TxState::Executed;
        Ok(())
    }

    fn dispatch(
        &mut self,
        db: &mut Db,
        resource_limits: &mut ResourceLimitsManager,
        accounts: &mut AccountRegistry,
        wasm: &mut dyn WasmEngine,
        receiver: AccountName,
        action: Action,
        recurse_depth: u32,
    ) -> Result<ActionTrace, TxError> {
        self.check_time()?;
        let trace = {
            let mut host = DispatchHost {
                tx: self,
                accounts,
                wasm,
            };
            let ctx = ApplyContext::new(db, resource_limits, &mut host, receiver, action, recurse_depth);
            ctx.exec()?
        };
        self.record_trace(&trace);
        Ok(trace)
    }

    fn record_trace(&mut self, trace: &ActionTrace) {
        if let Some(receipt) = &trace.receipt {
            self.executed.push(receipt.clone());
        }
        for child in &trace.inline_traces {
            self.record_trace(child);
        }
    }

    /// Rounds NET usage to whole words, validates it against
    /// `net_limit_words`, and charges CPU/NET usage for every billed
    /// account through the resource-limits manager. Returns
    /// `(cpu_usage_us, net_usage_words)` for the transaction receipt.
    ///
    /// # Errors
    /// Returns [`TxError::WrongState`] if not `Executed`,
    /// [`TxError::NetUsageExceeded`] if the final usage exceeds the limit,
    /// or propagates a [`chain_resource_limits::ResourceLimitsError`].
    pub fn finalize(&mut self, resource_limits: &mut ResourceLimitsManager, elapsed_cpu_us: u64) -> Result<(u64, u64), TxError> {
        if self.state != TxState::Executed {
            return Err(TxError::WrongState(self.state, TxState::Executed));
        }
        if self.net_usage_words > self.net_limit_words {
            return Err(TxError::NetUsageExceeded(self.net_usage_words, self.net_limit_words));
        }
        let cpu_usage_us = self.explicit_billed_cpu_us.unwrap_or(elapsed_cpu_us);
        resource_limits.add_transaction_usage(
            &self.billed_accounts,
            cpu_usage_us,
            self.net_usage_words * 8,
            self.block_time_slot,
        )?;
        self.state = TxState::Committed;
        Ok((cpu_usage_us, self.net_usage_words))
    }

    /// Aborts this transaction without charging resource usage.
    pub fn undo(&mut self) {
        self.state = TxState::Undone;
    }
}

fn billed_accounts_of(trx: &SignedTransaction) -> Vec<AccountName> {
    let mut accounts: Vec<AccountName> = trx
        .actions
        .iter()
        .flat_map(|act| act.authorization.iter().map(|level| level.actor))
        .collect();
    accounts.sort_unstable();
    accounts.dedup();
    accounts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(name: &str) -> AccountName {
        name.parse().unwrap()
    }

    fn sample_trx() -> SignedTransaction {
        SignedTransaction {
            expiration: 0,
            ref_block_num: 0,
            ref_block_prefix: 0,
            max_net_usage_words: 0,
            max_cpu_usage_ms: 0,
            delay_sec: 0,
            context_free_actions: Vec::new(),
            actions: vec![
                Action::new(acct("eosio.token"), acct("transfer"), b"xfer".to_vec())
                    .with_authorization(PermissionLevel::new(acct("alice"), acct("active"))),
            ],
            extensions: bytes::Bytes::new(),
            signatures: Vec::new(),
            context_free_data: bytes::Bytes::new(),
        }
    }

    #[test]
    fn init_for_deferred_trx_restores_the_original_publication_timestamp() {
        let tx = TransactionContext::init_for_deferred_trx(
            sample_trx(),
            42,
            1_000,
            Instant::now() + Duration::from_secs(1),
            Duration::from_millis(1),
            100,
        );
        assert_eq!(tx.published_at(), Some(42));
        assert!(!tx.can_subjectively_fail());
        assert_eq!(tx.state(), TxState::Initialized);
    }

    #[test]
    fn init_for_implicit_and_input_trx_have_no_publication_timestamp() {
        let implicit = TransactionContext::init_for_implicit_trx(
            sample_trx(),
            0,
            1_000,
            Instant::now() + Duration::from_secs(1),
            Duration::from_millis(1),
            0,
        );
        assert_eq!(implicit.published_at(), None);

        let input = TransactionContext::init_for_input_trx(
            sample_trx(),
            10,
            0,
            1_000,
            None,
            Instant::now() + Duration::from_secs(1),
            Duration::from_millis(1),
            0,
        )
        .unwrap();
        assert_eq!(input.published_at(), None);
    }

    #[test]
    fn init_for_input_trx_rejects_oversized_packed_transactions() {
        let result = TransactionContext::init_for_input_trx(
            sample_trx(),
            1_000,
            0,
            10,
            None,
            Instant::now() + Duration::from_secs(1),
            Duration::from_millis(1),
            0,
        );
        assert!(matches!(result, Err(TxError::NetUsageExceeded(_, 10))));
    }

    #[test]
    fn check_authorization_rejects_an_unprovided_actor() {
        let tx = TransactionContext::init_for_input_trx(
            sample_trx(),
            10,
            0,
            1_000,
            None,
            Instant::now() + Duration::from_secs(1),
            Duration::from_millis(1),
            0,
        )
        .unwrap();
        let provided = HashSet::new();
        assert_eq!(
            tx.check_authorization(&provided),
            Err(TxError::MissingAuth(acct("alice")))
        );
    }

    #[test]
    fn check_authorization_accepts_a_satisfied_transaction() {
        let tx = TransactionContext::init_for_input_trx(
            sample_trx(),
            10,
            0,
            1_000,
            None,
            Instant::now() + Duration::from_secs(1),
            Duration::from_millis(1),
            0,
        )
        .unwrap();
        let mut provided = HashSet::new();
        provided.insert(PermissionLevel::new(acct("alice"), acct("active")));
        assert!(tx.check_authorization(&provided).is_ok());
    }

    #[test]
    fn execute_runs_every_action_and_records_a_receipt_each() {
        let mut tx = TransactionContext::init_for_input_trx(
            sample_trx(),
            10,
            0,
            1_000,
            None,
            Instant::now() + Duration::from_secs(1),
            Duration::from_millis(1),
            0,
        )
        .unwrap();
        let mut db = Db::new();
        let mut limits = sample_limits();
        let mut accounts = AccountRegistry::new();
        accounts.create_account(acct("eosio.token"));
        accounts.create_account(acct("alice"));
        let mut wasm = NullWasmEngine;
        tx.execute(&mut db, &mut limits, &mut accounts, &mut wasm).unwrap();
        assert_eq!(tx.state(), TxState::Executed);
        assert_eq!(tx.executed().len(), 1);
    }

    #[test]
    fn finalize_before_execute_is_rejected() {
        let mut tx = TransactionContext::init_for_input_trx(
            sample_trx(),
            10,
            0,
            1_000,
            None,
            Instant::now() + Duration::from_secs(1),
            Duration::from_millis(1),
            0,
        )
        .unwrap();
        let mut limits = sample_limits();
        assert_eq!(
            tx.finalize(&mut limits, 100),
            Err(TxError::WrongState(TxState::Initialized, TxState::Executed))
        );
    }

    fn sample_limits() -> ResourceLimitsManager {
        ResourceLimitsManager::new(
            chain_resource_limits::WindowConfig {
                cpu_window: 86_400,
                net_window: 86_400,
            },
            chain_resource_limits::ElasticLimitConfig {
                cpu: chain_types::resource::ElasticLimitParameters {
                    target: 100,
                    max: 1_000,
                    periods: 1,
                    max_multiplier: 10,
                    contract_rate: (99, 100),
                    expand_rate: (1_000, 999),
                },
                net: chain_types::resource::ElasticLimitParameters {
                    target: 100,
                    max: 1_000,
                    periods: 1,
                    max_multiplier: 10,
                    contract_rate: (99, 100),
                    expand_rate: (1_000, 999),
                },
            },
        )
    }
}
