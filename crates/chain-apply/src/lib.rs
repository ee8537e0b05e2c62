//! `ApplyContext`: the host API surface exposed to native handlers and
//! WASM guest code while one action is executing.
//!
//! Created per action with `{db, resource_limits, host, action, receiver,
//! recurse_depth}`. `host` is the seam back to the owning
//! `TransactionContext` — sequence counters, the deadline check, and the
//! account registry are all things a transaction owns across every action
//! it runs, so this crate depends on a [`TransactionHost`] trait rather
//! than on `chain-txcontext` directly (which itself depends on this
//! crate to build `ApplyContext`s, so a direct dependency would cycle).

use chain_db::Db;
use chain_iterator_cache::{
    IteratorCache,
    IteratorCacheError,
    ITERATOR_NOT_FOUND,
};
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
        AccountRamDelta,
    },
    table::{
        KeyValueObject,
        SecondaryKey,
    },
    wire::{
        Decode,
        Encode,
    },
};
use thiserror::Error;
use tracing::instrument;

/// A contract action nested no deeper than this many inline-dispatch
/// levels from the transaction's top-level actions.
pub const MAX_INLINE_ACTION_DEPTH: u32 = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("missing authority of {0}")]
    MissingAuth(AccountName),
    #[error("inline action recursion depth reached")]
    InlineActionRecursionDepthReached,
    #[error("context-free inline action must not carry an authorization list")]
    ContextFreeActionHasAuth,
    #[error("account `{0}` does not exist")]
    AccountDoesNotExist(AccountName),
    #[error("action data for `{0}` failed to decode")]
    MalformedActionData(AccountName),
    #[error("table is not in the iterator cache")]
    TableOperationNotPermitted,
    #[error("iterator does not refer to a cached row")]
    InvalidTableIterator,
    #[error("receiver does not own the table this row belongs to")]
    TableAccessViolation,
    #[error("deadline exceeded while executing an action")]
    Deadline,
    #[error(transparent)]
    ResourceLimits(#[from] chain_resource_limits::ResourceLimitsError),
    #[error("native handler failed: {0}")]
    NativeHandlerFailed(String),
    #[error("wasm apply failed: {0}")]
    WasmApplyFailed(String),
}

impl From<IteratorCacheError> for ApplyError {
    fn from(value: IteratorCacheError) -> Self {
        match value {
            IteratorCacheError::InvalidTableIterator(_) => Self::InvalidTableIterator,
            IteratorCacheError::TableOperationNotPermitted(_) => Self::TableOperationNotPermitted,
            IteratorCacheError::UnknownEndIterator(_) => Self::InvalidTableIterator,
        }
    }
}

/// The seam back to the owning transaction: sequence counters, the
/// account registry, the deadline check, and the native-handler/WASM
/// dispatch hooks. Implemented by `chain-txcontext::TransactionContext`.
pub trait TransactionHost {
    /// Checked at every action boundary; returns an error if the
    /// transaction's deadline (or leeway deadline) has passed.
    fn check_time(&mut self) -> Result<(), ApplyError>;

    fn account_exists(&self, account: AccountName) -> bool;
    fn is_privileged(&self, account: AccountName) -> bool;
    fn has_code(&self, account: AccountName) -> bool;
    fn code_sequence(&self, account: AccountName) -> u64;
    fn abi_sequence(&self, account: AccountName) -> u64;
    fn permission_exists(&self, level: PermissionLevel) -> bool;

    fn next_global_sequence(&mut self) -> u64;
    fn next_recv_sequence(&mut self, account: AccountName) -> u64;
    fn next_auth_sequence(&mut self, actor: AccountName) -> u64;

    /// Runs a registered native handler for `(receiver, act.account,
    /// act.name)`, if one is registered. `Ok(None)` means no handler was
    /// registered; `Ok(Some(console))` means one ran and produced
    /// `console` output.
    fn run_native_handler(&mut self, receiver: AccountName, act: &Action) -> Result<Option<String>, ApplyError>;

    /// Invokes the WASM engine's `apply` for `receiver`'s code against
    /// `act`, returning any console output it produced.
    fn run_wasm_apply(&mut self, receiver: AccountName, act: &Action) -> Result<String, ApplyError>;
}

/// Created per action. `receiver` can differ from `action.account` when
/// notifying other contracts.
pub struct ApplyContext<'a> {
    db: &'a mut Db,
    resource_limits: &'a mut ResourceLimitsManager,
    host: &'a mut dyn TransactionHost,
    receiver: AccountName,
    action: Action,
    recurse_depth: u32,
    cache: IteratorCache<u64>,
    used_authorizations: Vec<bool>,
    notified: Vec<AccountName>,
    inline_actions: Vec<Action>,
    cfa_inline_actions: Vec<Action>,
    console: String,
    account_ram_deltas: Vec<AccountRamDelta>,
}

impl<'a> ApplyContext<'a> {
    pub fn new(
        db: &'a mut Db,
        resource_limits: &'a mut ResourceLimitsManager,
        host: &'a mut dyn TransactionHost,
        receiver: AccountName,
        action: Action,
        recurse_depth: u32,
    ) -> Self {
        let used_authorizations = vec![false; action.authorization.len()];
        Self {
            db,
            resource_limits,
            host,
            receiver,
            action,
            recurse_depth,
            cache: IteratorCache::new(),
            used_authorizations,
            notified: Vec::new(),
            inline_actions: Vec::new(),
            cfa_inline_actions: Vec::new(),
            console: String::new(),
            account_ram_deltas: Vec::new(),
        }
    }

    #[must_use]
    pub fn receiver(&self) -> AccountName {
        self.receiver
    }

    #[must_use]
    pub fn action(&self) -> &Action {
        &self.action
    }

    // --- Authorization ---

    /// `true` if some entry of `action.authorization` matches `actor`
    /// (ignoring `permission` if `None`).
    #[must_use]
    pub fn has_authorization(&self, actor: AccountName, permission: Option<AccountName>) -> bool {
        self.action
            .authorization
            .iter()
            .any(|level| level.actor == actor && permission.is_none_or(|p| level.permission == p))
    }

    /// Marks the first matching, not-yet-used entry of `action.authorization`
    /// as used.
    ///
    /// # Errors
    /// Returns [`ApplyError::MissingAuth`] if no entry matches.
    pub fn require_authorization(&mut self, actor: AccountName, permission: Option<AccountName>) -> Result<(), ApplyError> {
        for (index, level) in self.action.authorization.iter().enumerate() {
            if self.used_authorizations[index] {
                continue;
            }
            if level.actor == actor && permission.is_none_or(|p| level.permission == p) {
                self.used_authorizations[index] = true;
                return Ok(());
            }
        }
        Err(ApplyError::MissingAuth(actor))
    }

    // --- Notification ---

    /// Enqueues `code` into the notify list unless already present.
    pub fn require_recipient(&mut self, code: AccountName) {
        if !self.notified.contains(&code) {
            self.notified.push(code);
        }
    }

    // --- Inline dispatch ---

    /// Decodes a nested action from `bytes`, validates its account and
    /// every authorization entry exist, and (unless the inline action
    /// targets the same receiver) re-checks authorization under the
    /// implicit `{receiver, eosio.code}` permission. Appends the decoded
    /// action to the pending inline-action list.
    ///
    /// # Errors
    /// Returns [`ApplyError::MalformedActionData`],
    /// [`ApplyError::AccountDoesNotExist`], or [`ApplyError::MissingAuth`].
    pub fn execute_inline(&mut self, bytes: &[u8]) -> Result<(), ApplyError> {
        let action = self.decode_and_validate_inline(bytes)?;
        if action.account != self.receiver && !self.host.is_privileged(self.receiver) {
            let implicit = PermissionLevel::code_permission(self.receiver);
            if !action.authorization.iter().any(|level| level == &implicit) {
                return Err(ApplyError::MissingAuth(self.receiver));
            }
        }
        self.inline_actions.push(action);
        Ok(())
    }

    /// As [`Self::execute_inline`], but requires an empty authorization
    /// list and appends to the context-free inline-action list.
    ///
    /// # Errors
    /// Returns [`ApplyError::ContextFreeActionHasAuth`] if the decoded
    /// action carries an authorization, plus the errors of
    /// [`Self::execute_inline`]'s validation.
    pub fn execute_context_free_inline(&mut self, bytes: &[u8]) -> Result<(), ApplyError> {
        let action = self.decode_and_validate_inline(bytes)?;
        if !action.authorization.is_empty() {
            return Err(ApplyError::ContextFreeActionHasAuth);
        }
        self.cfa_inline_actions.push(action);
        Ok(())
    }

    fn decode_and_validate_inline(&self, bytes: &[u8]) -> Result<Action, ApplyError> {
        let mut slice = bytes;
        let action = Action::decode(&mut slice).map_err(|_| ApplyError::MalformedActionData(self.receiver))?;
        if !self.host.account_exists(action.account) {
            return Err(ApplyError::AccountDoesNotExist(action.account));
        }
        for level in &action.authorization {
            if !self.host.account_exists(level.actor) {
                return Err(ApplyError::AccountDoesNotExist(level.actor));
            }
            if !self.host.permission_exists(*level) {
                return Err(ApplyError::MissingAuth(level.actor));
            }
        }
        Ok(action)
    }

    #[must_use]
    pub fn inline_actions(&self) -> &[Action] {
        &self.inline_actions
    }

    #[must_use]
    pub fn cfa_inline_actions(&self) -> &[Action] {
        &self.cfa_inline_actions
    }

    #[must_use]
    pub fn notified(&self) -> &[AccountName] {
        &self.notified
    }

    // --- Console ---

    pub fn context_append(&mut self, text: &str) {
        self.console.push_str(text);
    }

    fn take_console(&mut self) -> String {
        std::mem::take(&mut self.console)
    }

    // --- Primary index ---

    fn charge_ram(&mut self, payer: AccountName, delta: i64) -> Result<(), ApplyError> {
        self.resource_limits.add_pending_ram_usage(payer, delta)?;
        self.account_ram_deltas.push(AccountRamDelta {
            account: payer,
            delta,
        });
        Ok(())
    }

    /// Creates or finds the table `(receiver, scope, table)`, inserts a
    /// row, charges RAM to `payer`, and returns an object iterator.
    ///
    /// # Errors
    /// Propagates RAM-charging failures.
    pub fn db_store_i64(
        &mut self,
        scope: AccountName,
        table: AccountName,
        payer: AccountName,
        id: u64,
        value: Vec<u8>,
    ) -> Result<i64, ApplyError> {
        let t_id = self.db.find_or_create_table(self.receiver, scope, table, payer);
        let row = KeyValueObject {
            t_id,
            primary_key: id,
            payer,
            value,
        };
        let billable = row.billable_size() as i64;
        self.charge_ram(payer, billable)?;
        self.db.insert_row(row);
        self.db.increment_table_count(t_id);
        self.cache_table(t_id);
        Ok(self.cache.add(t_id, id))
    }

    /// Enforces `receiver == table.code`, adjusts RAM for the old and new
    /// payer, and overwrites the row's value.
    ///
    /// # Errors
    /// Returns [`ApplyError::TableAccessViolation`] if `self.receiver`
    /// does not own the row's table.
    pub fn db_update_i64(&mut self, iterator: i64, payer: AccountName, value: Vec<u8>) -> Result<(), ApplyError> {
        let t_id = self.cache.table_id_of(iterator)?;
        self.assert_owns_table(t_id)?;
        let primary_key = *self.cache.get(iterator)?;
        let old_row = self.db.get_row(t_id, primary_key).ok_or(ApplyError::InvalidTableIterator)?.clone();
        let old_billable = old_row.billable_size() as i64;
        let new_row = KeyValueObject {
            t_id,
            primary_key,
            payer,
            value,
        };
        let new_billable = new_row.billable_size() as i64;
        if old_row.payer != payer {
            self.charge_ram(old_row.payer, -old_billable)?;
            self.charge_ram(payer, new_billable)?;
        } else if old_billable != new_billable {
            self.charge_ram(payer, new_billable - old_billable)?;
        }
        self.db.update_row(new_row);
        Ok(())
    }

    /// Refunds RAM to the row's payer, decrements the table's count, and
    /// removes the row (and, if count reaches zero, the table).
    ///
    /// # Errors
    /// Returns [`ApplyError::TableAccessViolation`] if `self.receiver`
    /// does not own the row's table; leaves the DB unmutated in that
    /// case.
    pub fn db_remove_i64(&mut self, iterator: i64) -> Result<(), ApplyError> {
        let t_id = self.cache.table_id_of(iterator)?;
        self.assert_owns_table(t_id)?;
        let primary_key = *self.cache.get(iterator)?;
        let removed = self.db.remove_row(t_id, primary_key).ok_or(ApplyError::InvalidTableIterator)?;
        self.charge_ram(removed.payer, -(removed.billable_size() as i64))?;
        self.db.decrement_table_count(t_id);
        self.cache.remove(iterator)?;
        Ok(())
    }

    fn assert_owns_table(&self, t_id: u64) -> Result<(), ApplyError> {
        let table = self.db.find_table_by_id(t_id).ok_or(ApplyError::TableOperationNotPermitted)?;
        if table.code != self.receiver {
            return Err(ApplyError::TableAccessViolation);
        }
        Ok(())
    }

    /// Registers `t_id` in the iterator cache (if not already present),
    /// returning its end iterator.
    fn cache_table(&mut self, t_id: u64) -> i64 {
        match self.db.find_table_by_id(t_id) {
            Some(table) => self.cache.cache_table(*table),
            None => chain_iterator_cache::INVALID_TABLE_ITERATOR,
        }
    }

    /// Reads the value at `iterator`.
    ///
    /// # Errors
    /// Returns [`ApplyError::InvalidTableIterator`] if the iterator does
    /// not refer to a live row.
    pub fn db_get_i64(&self, iterator: i64) -> Result<Vec<u8>, ApplyError> {
        let t_id = self.cache.table_id_of(iterator)?;
        let primary_key = *self.cache.get(iterator)?;
        Ok(self.db.get_row(t_id, primary_key).ok_or(ApplyError::InvalidTableIterator)?.value.clone())
    }

    /// Finds `id` in `(code, scope, table)`, returning its object
    /// iterator, or the table's end iterator if not found.
    pub fn db_find_i64(&mut self, code: AccountName, scope: AccountName, table: AccountName, id: u64) -> i64 {
        let Some(t_id) = self.db.find_table(code, scope, table).map(|t| t.id) else {
            return ITERATOR_NOT_FOUND;
        };
        let end = self.cache_table(t_id);
        match self.db.get_row(t_id, id) {
            Some(_) => self.cache.add(t_id, id),
            None => end,
        }
    }

    /// The table's end iterator, registering it in the cache if not
    /// already present.
    pub fn db_end_i64(&mut self, code: AccountName, scope: AccountName, table: AccountName) -> i64 {
        let Some(t_id) = self.db.find_table(code, scope, table).map(|t| t.id) else {
            return ITERATOR_NOT_FOUND;
        };
        self.cache_table(t_id)
    }

    /// The row after `iterator`, or the table's end iterator if
    /// `iterator` was the last row.
    pub fn db_next_i64(&mut self, iterator: i64) -> Result<i64, ApplyError> {
        let t_id = self.cache.table_id_of(iterator)?;
        let primary_key = *self.cache.get(iterator)?;
        match self.db.next_row(t_id, primary_key) {
            Some(row) => Ok(self.cache.add(t_id, row.primary_key)),
            None => Ok(self.cache_table(t_id)),
        }
    }

    /// The row before `iterator`. Given an end iterator, seeks the last
    /// row of that table.
    pub fn db_previous_i64(&mut self, iterator: i64) -> Result<i64, ApplyError> {
        if IteratorCache::<u64>::is_end_iterator(iterator) {
            let table = self.cache.find_table_by_end_iterator(iterator)?;
            let t_id = table.id;
            return match self.db.last_row(t_id) {
                Some(row) => Ok(self.cache.add(t_id, row.primary_key)),
                None => Ok(ITERATOR_NOT_FOUND),
            };
        }
        let t_id = self.cache.table_id_of(iterator)?;
        let primary_key = *self.cache.get(iterator)?;
        match self.db.previous_row(t_id, primary_key) {
            Some(row) => Ok(self.cache.add(t_id, row.primary_key)),
            None => Ok(ITERATOR_NOT_FOUND),
        }
    }

    pub fn db_lowerbound_i64(&mut self, code: AccountName, scope: AccountName, table: AccountName, id: u64) -> i64 {
        let Some(t_id) = self.db.find_table(code, scope, table).map(|t| t.id) else {
            return ITERATOR_NOT_FOUND;
        };
        let end = self.cache_table(t_id);
        match self.db.lower_bound_row(t_id, id) {
            Some(row) => self.cache.add(t_id, row.primary_key),
            None => end,
        }
    }

    pub fn db_upperbound_i64(&mut self, code: AccountName, scope: AccountName, table: AccountName, id: u64) -> i64 {
        let Some(t_id) = self.db.find_table(code, scope, table).map(|t| t.id) else {
            return ITERATOR_NOT_FOUND;
        };
        let end = self.cache_table(t_id);
        match self.db.upper_bound_row(t_id, id) {
            Some(row) => self.cache.add(t_id, row.primary_key),
            None => end,
        }
    }

    // --- Secondary indices, one family shared by every key kind ---

    pub fn secondary_store<K: SecondaryKey>(&mut self, scope: AccountName, table: AccountName, payer: AccountName, primary_key: u64, secondary: K)
    where
        Db: chain_db::SecondaryIndexFamily<K>,
    {
        let t_id = self.db.find_or_create_table(self.receiver, scope, table, payer);
        self.db.secondary_store(t_id, primary_key, payer, secondary);
    }

    pub fn secondary_remove<K: SecondaryKey>(&mut self, t_id: u64, primary_key: u64)
    where
        Db: chain_db::SecondaryIndexFamily<K>,
    {
        self.db.secondary_remove::<K>(t_id, primary_key);
    }

    // --- Execution ---

    /// Runs this action against `self.receiver`, then re-runs it as a flat
    /// `exec_one` against every queued notification receiver in turn
    /// (sharing this same context's `inline_actions`/`cfa_inline_actions`
    /// accumulators rather than recursing into a fresh `ApplyContext`),
    /// then dispatches every context-free and regular inline action
    /// accumulated by the primary run and all notifications, recursing
    /// with `recurse_depth + 1` and failing once
    /// [`MAX_INLINE_ACTION_DEPTH`] is reached.
    ///
    /// # Errors
    /// Propagates any [`ApplyError`] raised while executing this action
    /// or any of its notifications/inline actions.
    pub fn exec(mut self) -> Result<ActionTrace, ApplyError> {
        let mut trace = self.exec_one()?;
        let notified = std::mem::take(&mut self.notified);
        for code in notified {
            self.receiver = code;
            trace.inline_traces.push(self.exec_one()?);
        }
        let cfa_inline = std::mem::take(&mut self.cfa_inline_actions);
        let inline = std::mem::take(&mut self.inline_actions);
        for act in cfa_inline.into_iter().chain(inline) {
            if self.recurse_depth + 1 >= MAX_INLINE_ACTION_DEPTH {
                return Err(ApplyError::InlineActionRecursionDepthReached);
            }
            let receiver = act.account;
            let child = ApplyContext::new(
                &mut *self.db,
                &mut *self.resource_limits,
                &mut *self.host,
                receiver,
                act,
                self.recurse_depth + 1,
            );
            trace.inline_traces.push(child.exec()?);
        }
        Ok(trace)
    }

    /// The single-action dispatch algorithm (spec §4.2 `exec_one`): native
    /// handler, then WASM apply, then receipt assignment and trace
    /// recording.
    #[instrument(skip(self), fields(receiver = %self.receiver))]
    fn exec_one(&mut self) -> Result<ActionTrace, ApplyError> {
        self.host.check_time()?;

        if let Some(console) = self.host.run_native_handler(self.receiver, &self.action)? {
            self.context_append(&console);
        }
        if self.host.has_code(self.receiver) {
            let console = self.host.run_wasm_apply(self.receiver, &self.action)?;
            self.context_append(&console);
        }

        let global_sequence = self.host.next_global_sequence();
        let recv_sequence = self.host.next_recv_sequence(self.receiver);
        let mut auth_sequence = std::collections::BTreeMap::new();
        for level in &self.action.authorization {
            auth_sequence.insert(level.actor, self.host.next_auth_sequence(level.actor));
        }
        let receipt = ActionReceipt {
            receiver: self.receiver,
            act_digest: self.action.digest(),
            global_sequence,
            recv_sequence,
            auth_sequence,
            code_sequence: self.host.code_sequence(self.receiver),
            abi_sequence: self.host.abi_sequence(self.receiver),
        };

        Ok(ActionTrace {
            receipt: Some(receipt),
            act: self.action.clone(),
            console: self.take_console(),
            elapsed: std::time::Duration::default(),
            trx_id: [0; 32],
            block_num: 0,
            block_time: 0,
            producer_block_id: None,
            account_ram_deltas: std::mem::take(&mut self.account_ram_deltas),
            inline_traces: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(name: &str) -> AccountName {
        name.parse().unwrap()
    }

    struct StubHost {
        global_sequence: u64,
        recv_sequence: std::collections::HashMap<AccountName, u64>,
        auth_sequence: std::collections::HashMap<AccountName, u64>,
        accounts: std::collections::HashSet<AccountName>,
        permissions: std::collections::HashSet<PermissionLevel>,
        privileged: std::collections::HashSet<AccountName>,
    }

    impl StubHost {
        fn new() -> Self {
            let mut accounts = std::collections::HashSet::new();
            accounts.insert(acct("alice"));
            accounts.insert(acct("bob"));
            accounts.insert(acct("eosio.token"));
            let mut permissions = std::collections::HashSet::new();
            permissions.insert(PermissionLevel::new(acct("alice"), acct("active")));
            permissions.insert(PermissionLevel::code_permission(acct("eosio.token")));
            Self {
                global_sequence: 0,
                recv_sequence: std::collections::HashMap::new(),
                auth_sequence: std::collections::HashMap::new(),
                accounts,
                permissions,
                privileged: std::collections::HashSet::new(),
            }
        }
    }

    impl TransactionHost for StubHost {
        fn check_time(&mut self) -> Result<(), ApplyError> {
            Ok(())
        }

        fn account_exists(&self, account: AccountName) -> bool {
            self.accounts.contains(&account)
        }

        fn is_privileged(&self, account: AccountName) -> bool {
            self.privileged.contains(&account)
        }

        fn has_code(&self, _account: AccountName) -> bool {
            false
        }

        fn code_sequence(&self, _account: AccountName) -> u64 {
            1
        }

        fn abi_sequence(&self, _account: AccountName) -> u64 {
            1
        }

        fn permission_exists(&self, level: PermissionLevel) -> bool {
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

        fn run_native_handler(&mut self, _receiver: AccountName, _act: &Action) -> Result<Option<String>, ApplyError> {
            Ok(None)
        }

        fn run_wasm_apply(&mut self, _receiver: AccountName, _act: &Action) -> Result<String, ApplyError> {
            Ok(String::new())
        }
    }

    fn transfer_action() -> Action {
        Action::new(acct("eosio.token"), acct("transfer"), b"xfer".to_vec())
            .with_authorization(PermissionLevel::new(acct("alice"), acct("active")))
    }

    #[test]
    fn require_authorization_marks_a_matching_entry_used() {
        let mut db = Db::new();
        let mut limits = chain_resource_limits::ResourceLimitsManager::new(
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
        );
        let mut host = StubHost::new();
        let mut ctx = ApplyContext::new(&mut db, &mut limits, &mut host, acct("eosio.token"), transfer_action(), 0);
        assert!(ctx.require_authorization(acct("alice"), None).is_ok());
        assert_eq!(
            ctx.require_authorization(acct("alice"), None),
            Err(ApplyError::MissingAuth(acct("alice")))
        );
    }

    #[test]
    fn require_recipient_is_idempotent() {
        let mut db = Db::new();
        let mut limits = sample_limits();
        let mut host = StubHost::new();
        let mut ctx = ApplyContext::new(&mut db, &mut limits, &mut host, acct("eosio.token"), transfer_action(), 0);
        ctx.require_recipient(acct("bob"));
        ctx.require_recipient(acct("bob"));
        assert_eq!(ctx.notified(), &[acct("bob")]);
    }

    #[test]
    fn db_store_then_get_round_trips_the_value() {
        let mut db = Db::new();
        let mut limits = sample_limits();
        let mut host = StubHost::new();
        let mut ctx = ApplyContext::new(&mut db, &mut limits, &mut host, acct("eosio.token"), transfer_action(), 0);
        let it = ctx.db_store_i64(acct("alice"), acct("accounts"), acct("alice"), 1, b"balance".to_vec()).unwrap();
        assert_eq!(ctx.db_get_i64(it).unwrap(), b"balance");
    }

    #[test]
    fn db_update_by_non_owning_receiver_is_rejected() {
        let mut db = Db::new();
        let mut limits = sample_limits();
        let mut host = StubHost::new();
        let mut ctx = ApplyContext::new(&mut db, &mut limits, &mut host, acct("eosio.token"), transfer_action(), 0);
        ctx.db_store_i64(acct("alice"), acct("accounts"), acct("alice"), 1, b"balance".to_vec()).unwrap();
        drop(ctx);
        let mut host2 = StubHost::new();
        let mut ctx2 = ApplyContext::new(&mut db, &mut limits, &mut host2, acct("bob"), transfer_action(), 0);
        let it = ctx2.db_find_i64(acct("eosio.token"), acct("alice"), acct("accounts"), 1);
        assert_eq!(ctx2.db_update_i64(it, acct("alice"), b"new".to_vec()), Err(ApplyError::TableAccessViolation));
    }

    #[test]
    fn exec_runs_notifications_flat_against_the_same_action() {
        let mut db = Db::new();
        let mut limits = sample_limits();
        let mut host = StubHost::new();
        let mut ctx = ApplyContext::new(&mut db, &mut limits, &mut host, acct("eosio.token"), transfer_action(), 0);
        ctx.require_recipient(acct("bob"));
        let trace = ctx.exec().unwrap();
        assert_eq!(trace.receipt.unwrap().receiver, acct("eosio.token"));
        assert_eq!(trace.inline_traces.len(), 1);
        assert_eq!(trace.inline_traces[0].receipt.as_ref().unwrap().receiver, acct("bob"));
        assert_eq!(trace.inline_traces[0].act, transfer_action());
    }

    #[test]
    fn execute_context_free_inline_rejects_actions_carrying_authorization() {
        let mut db = Db::new();
        let mut limits = sample_limits();
        let mut host = StubHost::new();
        let mut ctx = ApplyContext::new(&mut db, &mut limits, &mut host, acct("eosio.token"), transfer_action(), 0);
        let bytes = transfer_action().encode_to_vec();
        assert_eq!(ctx.execute_context_free_inline(&bytes), Err(ApplyError::ContextFreeActionHasAuth));
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
