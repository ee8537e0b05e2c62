//! A concrete, typed stand-in for the opaque "DB" collaborator named in
//! the host interface (find/insert/modify/remove over named indices, plus
//! undoable sessions).
//!
//! Rather than a generic, type-erased multi-index store keyed by string
//! index names, this models the DB the way the rest of this workspace
//! models state: a concrete struct with inherent methods per entity kind
//! (`TableIdObject`, `KeyValueObject`, one `SecondaryIndex<K>` engine
//! shared by all five secondary-key kinds). Undo sessions are implemented
//! by snapshotting the whole store rather than recording per-write
//! reversal entries — simpler to get right, at the cost of an O(state
//! size) clone per `start_session`, which is acceptable for the state
//! sizes this core is expected to hold in memory at once.

use std::collections::BTreeMap;

use chain_types::{
    account::AccountName,
    table::{
        KeyValueObject,
        SecondaryIndexObject,
        SecondaryKey,
        TableIdObject,
    },
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DbError {
    #[error("table ({0:?}, {1:?}, {2:?}) does not exist")]
    TableNotFound(AccountName, AccountName, AccountName),
    #[error("table id {0} does not exist")]
    TableIdNotFound(u64),
    #[error("row ({0}, {1}) does not exist")]
    RowNotFound(u64, u64),
    #[error("no active undo session")]
    NoActiveSession,
}

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Clone, Default)]
struct SecondaryIndex<K> {
    by_primary: BTreeMap<(u64, u64), SecondaryIndexObject<K>>,
    order: BTreeMap<(u64, K, u64), ()>,
}

impl<K: SecondaryKey> SecondaryIndex<K> {
    fn store(&mut self, t_id: u64, primary_key: u64, payer: AccountName, secondary: K) {
        self.by_primary.insert(
            (t_id, primary_key),
            SecondaryIndexObject {
                t_id,
                primary_key,
                payer,
                secondary,
            },
        );
        self.order.insert((t_id, secondary, primary_key), ());
    }

    fn remove(&mut self, t_id: u64, primary_key: u64) -> Option<SecondaryIndexObject<K>> {
        let removed = self.by_primary.remove(&(t_id, primary_key))?;
        self.order.remove(&(t_id, removed.secondary, primary_key));
        Some(removed)
    }

    fn find_primary(&self, t_id: u64, primary_key: u64) -> Option<&SecondaryIndexObject<K>> {
        self.by_primary.get(&(t_id, primary_key))
    }

    fn find_secondary(&self, t_id: u64, secondary: K) -> Option<&SecondaryIndexObject<K>> {
        let (key, _) = self
            .order
            .range((t_id, secondary, u64::MIN)..=(t_id, secondary, u64::MAX))
            .next()?;
        self.by_primary.get(&(key.0, key.2))
    }

    fn lower_bound(&self, t_id: u64, secondary: K) -> Option<&SecondaryIndexObject<K>> {
        let (key, _) = self.order.range((t_id, secondary, u64::MIN)..).next()?;
        if key.0 != t_id {
            return None;
        }
        self.by_primary.get(&(key.0, key.2))
    }

    fn upper_bound(&self, t_id: u64, secondary: K) -> Option<&SecondaryIndexObject<K>> {
        let (key, _) = self
            .order
            .range((t_id, secondary, u64::MIN)..)
            .find(|(key, _)| key.0 == t_id && key.1 != secondary)?;
        if key.0 != t_id {
            return None;
        }
        self.by_primary.get(&(key.0, key.2))
    }

    fn next(&self, t_id: u64, secondary: K, primary_key: u64) -> Option<&SecondaryIndexObject<K>> {
        let (key, _) = self
            .order
            .range((t_id, secondary, primary_key)..)
            .find(|(key, _)| key != &(t_id, secondary, primary_key))?;
        if key.0 != t_id {
            return None;
        }
        self.by_primary.get(&(key.0, key.2))
    }

    fn previous(&self, t_id: u64, secondary: K, primary_key: u64) -> Option<&SecondaryIndexObject<K>> {
        let (key, _) = self.order.range(..(t_id, secondary, primary_key)).next_back()?;
        if key.0 != t_id {
            return None;
        }
        self.by_primary.get(&(key.0, key.2))
    }

    fn last(&self, t_id: u64) -> Option<&SecondaryIndexObject<K>> {
        let (key, _) = self.order.iter().rev().find(|(key, _)| key.0 == t_id)?;
        self.by_primary.get(&(key.0, key.2))
    }
}

#[derive(Clone, Default)]
struct State {
    next_table_id: u64,
    tables_by_id: BTreeMap<u64, TableIdObject>,
    tables_by_key: BTreeMap<(AccountName, AccountName, AccountName), u64>,
    rows: BTreeMap<(u64, u64), KeyValueObject>,
    idx64: SecondaryIndex<u64>,
    idx128: SecondaryIndex<u128>,
    idx256: SecondaryIndex<chain_types::table::U256>,
    idx_double: SecondaryIndex<chain_types::table::F64Key>,
    idx_long_double: SecondaryIndex<chain_types::table::LongDoubleKey>,
}

/// The DB collaborator: concrete typed tables plus a stack of undoable
/// snapshots.
#[derive(Default)]
pub struct Db {
    state: State,
    undo_stack: Vec<State>,
}

impl Db {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a new undo session, snapshotting the current state. Returns
    /// the new revision number (the session depth).
    pub fn start_session(&mut self) -> u64 {
        self.undo_stack.push(self.state.clone());
        self.revision()
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.undo_stack.len() as u64
    }

    /// Restores the state to the most recent snapshot, discarding every
    /// write made since `start_session`.
    ///
    /// # Errors
    /// Returns [`DbError::NoActiveSession`] if no session is active.
    pub fn undo(&mut self) -> Result<()> {
        self.state = self.undo_stack.pop().ok_or(DbError::NoActiveSession)?;
        Ok(())
    }

    /// Commits this session's writes into its parent session (or
    /// permanently, if this was the outermost session), keeping current
    /// state and discarding only the snapshot marker.
    ///
    /// # Errors
    /// Returns [`DbError::NoActiveSession`] if no session is active.
    pub fn squash(&mut self) -> Result<()> {
        self.undo_stack.pop().ok_or(DbError::NoActiveSession)?;
        Ok(())
    }

    /// Commits this session's writes all the way through every enclosing
    /// session immediately.
    ///
    /// # Errors
    /// Returns [`DbError::NoActiveSession`] if no session is active.
    pub fn push(&mut self) -> Result<()> {
        self.undo_stack.pop().ok_or(DbError::NoActiveSession)?;
        Ok(())
    }

    // --- TableIdObject ---

    #[must_use]
    pub fn find_table(&self, code: AccountName, scope: AccountName, table: AccountName) -> Option<&TableIdObject> {
        let id = self.state.tables_by_key.get(&(code, scope, table))?;
        self.state.tables_by_id.get(id)
    }

    #[must_use]
    pub fn find_table_by_id(&self, id: u64) -> Option<&TableIdObject> {
        self.state.tables_by_id.get(&id)
    }

    /// Finds the table for `(code, scope, table)`, creating it (owned by
    /// `payer`) if it does not yet exist.
    pub fn find_or_create_table(
        &mut self,
        code: AccountName,
        scope: AccountName,
        table: AccountName,
        payer: AccountName,
    ) -> u64 {
        if let Some(&id) = self.state.tables_by_key.get(&(code, scope, table)) {
            return id;
        }
        let id = self.state.next_table_id;
        self.state.next_table_id += 1;
        self.state.tables_by_key.insert((code, scope, table), id);
        self.state.tables_by_id.insert(id, TableIdObject::new(id, code, scope, table, payer));
        id
    }

    pub fn increment_table_count(&mut self, id: u64) {
        if let Some(table) = self.state.tables_by_id.get_mut(&id) {
            table.count += 1;
        }
    }

    /// Decrements a table's row count, destroying it once it reaches zero.
    pub fn decrement_table_count(&mut self, id: u64) {
        let Some(table) = self.state.tables_by_id.get_mut(&id) else {
            return;
        };
        table.count = table.count.saturating_sub(1);
        if table.count == 0 {
            let key = (table.code, table.scope, table.table);
            self.state.tables_by_id.remove(&id);
            self.state.tables_by_key.remove(&key);
        }
    }

    // --- KeyValueObject (primary index) ---

    #[must_use]
    pub fn get_row(&self, t_id: u64, primary_key: u64) -> Option<&KeyValueObject> {
        self.state.rows.get(&(t_id, primary_key))
    }

    pub fn insert_row(&mut self, row: KeyValueObject) {
        self.state.rows.insert((row.t_id, row.primary_key), row);
    }

    pub fn update_row(&mut self, row: KeyValueObject) {
        self.state.rows.insert((row.t_id, row.primary_key), row);
    }

    pub fn remove_row(&mut self, t_id: u64, primary_key: u64) -> Option<KeyValueObject> {
        self.state.rows.remove(&(t_id, primary_key))
    }

    #[must_use]
    pub fn lower_bound_row(&self, t_id: u64, primary_key: u64) -> Option<&KeyValueObject> {
        self.state
            .rows
            .range((t_id, primary_key)..)
            .find(|((t, _), _)| *t == t_id)
            .map(|(_, v)| v)
    }

    #[must_use]
    pub fn upper_bound_row(&self, t_id: u64, primary_key: u64) -> Option<&KeyValueObject> {
        self.state
            .rows
            .range((t_id, primary_key.saturating_add(1))..)
            .find(|((t, _), _)| *t == t_id)
            .map(|(_, v)| v)
    }

    #[must_use]
    pub fn next_row(&self, t_id: u64, primary_key: u64) -> Option<&KeyValueObject> {
        self.upper_bound_row(t_id, primary_key)
    }

    #[must_use]
    pub fn previous_row(&self, t_id: u64, primary_key: u64) -> Option<&KeyValueObject> {
        self.state.rows.range((t_id, u64::MIN)..(t_id, primary_key)).next_back().map(|(_, v)| v)
    }

    #[must_use]
    pub fn last_row(&self, t_id: u64) -> Option<&KeyValueObject> {
        self.state.rows.range((t_id, u64::MIN)..=(t_id, u64::MAX)).next_back().map(|(_, v)| v)
    }

    // --- SecondaryIndexObject<K>, one engine shared by all five key kinds ---

    pub fn secondary_store<K: SecondaryKey>(&mut self, t_id: u64, primary_key: u64, payer: AccountName, secondary: K)
    where
        Self: SecondaryIndexFamily<K>,
    {
        SecondaryIndexFamily::index_mut(self).store(t_id, primary_key, payer, secondary);
    }

    pub fn secondary_remove<K: SecondaryKey>(&mut self, t_id: u64, primary_key: u64) -> Option<SecondaryIndexObject<K>>
    where
        Self: SecondaryIndexFamily<K>,
    {
        SecondaryIndexFamily::index_mut(self).remove(t_id, primary_key)
    }

    #[must_use]
    pub fn secondary_find_primary<K: SecondaryKey>(&self, t_id: u64, primary_key: u64) -> Option<&SecondaryIndexObject<K>>
    where
        Self: SecondaryIndexFamily<K>,
    {
        SecondaryIndexFamily::index(self).find_primary(t_id, primary_key)
    }

    #[must_use]
    pub fn secondary_find<K: SecondaryKey>(&self, t_id: u64, secondary: K) -> Option<&SecondaryIndexObject<K>>
    where
        Self: SecondaryIndexFamily<K>,
    {
        SecondaryIndexFamily::index(self).find_secondary(t_id, secondary)
    }

    #[must_use]
    pub fn secondary_lower_bound<K: SecondaryKey>(&self, t_id: u64, secondary: K) -> Option<&SecondaryIndexObject<K>>
    where
        Self: SecondaryIndexFamily<K>,
    {
        SecondaryIndexFamily::index(self).lower_bound(t_id, secondary)
    }

    #[must_use]
    pub fn secondary_upper_bound<K: SecondaryKey>(&self, t_id: u64, secondary: K) -> Option<&SecondaryIndexObject<K>>
    where
        Self: SecondaryIndexFamily<K>,
    {
        SecondaryIndexFamily::index(self).upper_bound(t_id, secondary)
    }

    #[must_use]
    pub fn secondary_next<K: SecondaryKey>(&self, t_id: u64, secondary: K, primary_key: u64) -> Option<&SecondaryIndexObject<K>>
    where
        Self: SecondaryIndexFamily<K>,
    {
        SecondaryIndexFamily::index(self).next(t_id, secondary, primary_key)
    }

    #[must_use]
    pub fn secondary_previous<K: SecondaryKey>(&self, t_id: u64, secondary: K, primary_key: u64) -> Option<&SecondaryIndexObject<K>>
    where
        Self: SecondaryIndexFamily<K>,
    {
        SecondaryIndexFamily::index(self).previous(t_id, secondary, primary_key)
    }

    #[must_use]
    pub fn secondary_last<K: SecondaryKey>(&self, t_id: u64) -> Option<&SecondaryIndexObject<K>>
    where
        Self: SecondaryIndexFamily<K>,
    {
        SecondaryIndexFamily::index(self).last(t_id)
    }
}

/// Maps a secondary-key kind onto the concrete `SecondaryIndex<K>` field
/// that stores it. One `impl` per kind stands in for five otherwise
/// identical method families (`idx64`, `idx_double`, `idx128`, `idx256`,
/// `idx_long_double`).
pub trait SecondaryIndexFamily<K: SecondaryKey>: Sized {
    fn index(&self) -> &SecondaryIndex<K>;
    fn index_mut(&mut self) -> &mut SecondaryIndex<K>;
}

impl SecondaryIndexFamily<u64> for Db {
    fn index(&self) -> &SecondaryIndex<u64> {
        &self.state.idx64
    }

    fn index_mut(&mut self) -> &mut SecondaryIndex<u64> {
        &mut self.state.idx64
    }
}

impl SecondaryIndexFamily<u128> for Db {
    fn index(&self) -> &SecondaryIndex<u128> {
        &self.state.idx128
    }

    fn index_mut(&mut self) -> &mut SecondaryIndex<u128> {
        &mut self.state.idx128
    }
}

impl SecondaryIndexFamily<chain_types::table::U256> for Db {
    fn index(&self) -> &SecondaryIndex<chain_types::table::U256> {
        &self.state.idx256
    }

    fn index_mut(&mut self) -> &mut SecondaryIndex<chain_types::table::U256> {
        &mut self.state.idx256
    }
}

impl SecondaryIndexFamily<chain_types::table::F64Key> for Db {
    fn index(&self) -> &SecondaryIndex<chain_types::table::F64Key> {
        &self.state.idx_double
    }

    fn index_mut(&mut self) -> &mut SecondaryIndex<chain_types::table::F64Key> {
        &mut self.state.idx_double
    }
}

impl SecondaryIndexFamily<chain_types::table::LongDoubleKey> for Db {
    fn index(&self) -> &SecondaryIndex<chain_types::table::LongDoubleKey> {
        &self.state.idx_long_double
    }

    fn index_mut(&mut self) -> &mut SecondaryIndex<chain_types::table::LongDoubleKey> {
        &mut self.state.idx_long_double
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(name: &str) -> AccountName {
        name.parse().unwrap()
    }

    fn sample_row(t_id: u64, primary_key: u64, payer: AccountName) -> KeyValueObject {
        KeyValueObject {
            t_id,
            primary_key,
            payer,
            value: b"hello".to_vec(),
        }
    }

    #[test]
    fn find_or_create_table_is_idempotent() {
        let mut db = Db::new();
        let code = acct("eosio.token");
        let scope = acct("alice");
        let table = acct("accounts");
        let first = db.find_or_create_table(code, scope, table, acct("alice"));
        let second = db.find_or_create_table(code, scope, table, acct("alice"));
        assert_eq!(first, second);
    }

    #[test]
    fn table_is_destroyed_once_count_reaches_zero() {
        let mut db = Db::new();
        let id = db.find_or_create_table(acct("eosio.token"), acct("alice"), acct("accounts"), acct("alice"));
        db.increment_table_count(id);
        assert!(db.find_table_by_id(id).is_some());
        db.decrement_table_count(id);
        assert!(db.find_table_by_id(id).is_none());
    }

    #[test]
    fn db_find_i64_round_trips_the_inserted_value() {
        let mut db = Db::new();
        let id = db.find_or_create_table(acct("eosio.token"), acct("alice"), acct("accounts"), acct("alice"));
        db.insert_row(sample_row(id, 42, acct("alice")));
        assert_eq!(db.get_row(id, 42).unwrap().value, b"hello");
    }

    #[test]
    fn previous_from_last_row_returns_the_max_primary_key() {
        let mut db = Db::new();
        let id = db.find_or_create_table(acct("eosio.token"), acct("alice"), acct("accounts"), acct("alice"));
        db.insert_row(sample_row(id, 1, acct("alice")));
        db.insert_row(sample_row(id, 5, acct("alice")));
        db.insert_row(sample_row(id, 3, acct("alice")));
        assert_eq!(db.last_row(id).unwrap().primary_key, 5);
    }

    #[test]
    fn undo_restores_prior_state() {
        let mut db = Db::new();
        let id = db.find_or_create_table(acct("eosio.token"), acct("alice"), acct("accounts"), acct("alice"));
        db.insert_row(sample_row(id, 1, acct("alice")));
        db.start_session();
        db.insert_row(sample_row(id, 2, acct("alice")));
        assert!(db.get_row(id, 2).is_some());
        db.undo().unwrap();
        assert!(db.get_row(id, 2).is_none());
        assert!(db.get_row(id, 1).is_some());
    }

    #[test]
    fn squash_keeps_writes_but_drops_the_session_marker() {
        let mut db = Db::new();
        db.start_session();
        let id = db.find_or_create_table(acct("eosio.token"), acct("alice"), acct("accounts"), acct("alice"));
        db.insert_row(sample_row(id, 1, acct("alice")));
        db.squash().unwrap();
        assert_eq!(db.revision(), 0);
        assert!(db.get_row(id, 1).is_some());
    }

    #[test]
    fn secondary_index_find_secondary_resolves_through_the_shared_engine() {
        let mut db = Db::new();
        let id = db.find_or_create_table(acct("eosio.token"), acct("alice"), acct("accounts"), acct("alice"));
        db.secondary_store::<u64>(id, 7, acct("alice"), 555);
        let found = db.secondary_find::<u64>(id, 555).unwrap();
        assert_eq!(found.primary_key, 7);
    }

    #[test]
    fn secondary_index_lower_bound_finds_the_smallest_key_at_or_above() {
        let mut db = Db::new();
        let id = db.find_or_create_table(acct("eosio.token"), acct("alice"), acct("accounts"), acct("alice"));
        db.secondary_store::<u64>(id, 1, acct("alice"), 10);
        db.secondary_store::<u64>(id, 2, acct("alice"), 20);
        let found = db.secondary_lower_bound::<u64>(id, 15).unwrap();
        assert_eq!(found.secondary, 20);
    }
}
