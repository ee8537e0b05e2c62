//! The bounded, two-level iterator cache scoped to one `ApplyContext`:
//! a table cache assigning a distinct end-iterator id to each table a
//! contract has touched, and an object cache of row references indexed by
//! positive integer iterator.
//!
//! Bounds (8 tables, 32 objects) are a deliberate design bound named as
//! constants rather than a resizable collection, matching the spec's
//! design note that this cache is meant to stay small and cheap to scan.

use chain_types::table::TableIdObject;
use thiserror::Error;

/// Maximum distinct tables one `ApplyContext` may have cached
/// simultaneously.
pub const MAX_TABLE_CACHE_SIZE: usize = 8;

/// Maximum distinct row references one `ApplyContext` may have live
/// iterators over simultaneously.
pub const MAX_OBJECT_CACHE_SIZE: usize = 32;

/// "Not found" sentinel returned by primary/secondary lookup misses.
pub const ITERATOR_NOT_FOUND: i64 = -1;

/// Returned by `cache_table` when the table cache is already at
/// [`MAX_TABLE_CACHE_SIZE`].
pub const INVALID_TABLE_ITERATOR: i64 = 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IteratorCacheError {
    #[error("iterator {0} does not refer to a cached object")]
    InvalidTableIterator(i64),
    #[error("iterator {0} refers to a removed object")]
    TableOperationNotPermitted(i64),
    #[error("end iterator {0} does not belong to any cached table")]
    UnknownEndIterator(i64),
}

/// The end-iterator id assigned to the `k`-th table entered into the
/// cache: `ei(k) = -(k + 2)`, so end iterators are strictly less than
/// `-1` and distinguishable from both the "not found" sentinel and every
/// positive object iterator.
#[must_use]
pub fn end_iterator_for_slot(k: usize) -> i64 {
    -((k as i64) + 2)
}

struct TableSlot {
    table: TableIdObject,
    end_iterator: i64,
}

/// The two-level cache. `T` is whatever the owning `ApplyContext` wants to
/// remember about a cached row (typically a primary key or a full
/// `KeyValueObject` snapshot); this crate is agnostic to its shape.
pub struct IteratorCache<T> {
    tables: Vec<TableSlot>,
    objects: Vec<Option<CachedObject<T>>>,
}

struct CachedObject<T> {
    table_id: u64,
    value: T,
}

impl<T> Default for IteratorCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IteratorCache<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Vec::new(),
            objects: Vec::new(),
        }
    }

    /// Registers `table` in the table cache if not already present,
    /// returning its end iterator. Returns [`INVALID_TABLE_ITERATOR`] if
    /// the cache is full and `table` was not already cached.
    pub fn cache_table(&mut self, table: TableIdObject) -> i64 {
        if let Some(slot) = self.tables.iter().find(|slot| slot.table.id == table.id) {
            return slot.end_iterator;
        }
        if self.tables.len() >= MAX_TABLE_CACHE_SIZE {
            return INVALID_TABLE_ITERATOR;
        }
        let end_iterator = end_iterator_for_slot(self.tables.len());
        self.tables.push(TableSlot {
            table,
            end_iterator,
        });
        end_iterator
    }

    /// The table previously registered by `cache_table` for `table_id`, if
    /// any.
    #[must_use]
    pub fn find_table_by_id(&self, table_id: u64) -> Option<&TableIdObject> {
        self.tables.iter().find(|slot| slot.table.id == table_id).map(|slot| &slot.table)
    }

    /// The table whose end iterator is `end_iterator`. Total on any value
    /// previously returned by [`Self::cache_table`].
    ///
    /// # Errors
    /// Returns [`IteratorCacheError::UnknownEndIterator`] if no cached
    /// table has this end iterator.
    pub fn find_table_by_end_iterator(&self, end_iterator: i64) -> Result<&TableIdObject, IteratorCacheError> {
        self.tables
            .iter()
            .find(|slot| slot.end_iterator == end_iterator)
            .map(|slot| &slot.table)
            .ok_or(IteratorCacheError::UnknownEndIterator(end_iterator))
    }

    /// `true` if `iterator` is an end iterator (strictly less than `-1`).
    #[must_use]
    pub fn is_end_iterator(iterator: i64) -> bool {
        iterator < -1
    }

    /// Appends `value` (associated with `table_id`) to the object cache,
    /// returning its iterator. Returns [`ITERATOR_NOT_FOUND`] if the cache
    /// is already at [`MAX_OBJECT_CACHE_SIZE`].
    pub fn add(&mut self, table_id: u64, value: T) -> i64 {
        if self.objects.len() >= MAX_OBJECT_CACHE_SIZE {
            return ITERATOR_NOT_FOUND;
        }
        let iterator = self.objects.len() as i64;
        self.objects.push(Some(CachedObject {
            table_id,
            value,
        }));
        iterator
    }

    /// Reads the cached object at `iterator`.
    ///
    /// # Errors
    /// Returns [`IteratorCacheError::InvalidTableIterator`] if `iterator`
    /// is out of range, or [`IteratorCacheError::TableOperationNotPermitted`]
    /// if the slot was removed.
    pub fn get(&self, iterator: i64) -> Result<&T, IteratorCacheError> {
        let index = usize::try_from(iterator).map_err(|_| IteratorCacheError::InvalidTableIterator(iterator))?;
        let slot = self
            .objects
            .get(index)
            .ok_or(IteratorCacheError::InvalidTableIterator(iterator))?;
        slot.as_ref()
            .map(|cached| &cached.value)
            .ok_or(IteratorCacheError::TableOperationNotPermitted(iterator))
    }

    /// Which table `iterator` belongs to, for cross-table access checks.
    ///
    /// # Errors
    /// Same as [`Self::get`].
    pub fn table_id_of(&self, iterator: i64) -> Result<u64, IteratorCacheError> {
        let index = usize::try_from(iterator).map_err(|_| IteratorCacheError::InvalidTableIterator(iterator))?;
        let slot = self
            .objects
            .get(index)
            .ok_or(IteratorCacheError::InvalidTableIterator(iterator))?;
        slot.as_ref()
            .map(|cached| cached.table_id)
            .ok_or(IteratorCacheError::TableOperationNotPermitted(iterator))
    }

    /// Nils the slot at `iterator` without compacting the array, so every
    /// other live iterator keeps pointing at the same row (iterator
    /// stability).
    ///
    /// # Errors
    /// Returns [`IteratorCacheError::InvalidTableIterator`] if `iterator`
    /// is out of range.
    pub fn remove(&mut self, iterator: i64) -> Result<(), IteratorCacheError> {
        let index = usize::try_from(iterator).map_err(|_| IteratorCacheError::InvalidTableIterator(iterator))?;
        let slot = self
            .objects
            .get_mut(index)
            .ok_or(IteratorCacheError::InvalidTableIterator(iterator))?;
        *slot = None;
        Ok(())
    }

    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

/// Marker used by callers that want a cache keyed purely by primary key
/// with no extra payload (common for secondary-index iteration, which
/// resolves the payload through the primary table instead).
pub type PrimaryKeyCache = IteratorCache<u64>;

#[cfg(test)]
mod tests {
    use super::*;

    fn table(id: u64) -> TableIdObject {
        TableIdObject::new(
            id,
            "eosio.token".parse().unwrap(),
            "alice".parse().unwrap(),
            "accounts".parse().unwrap(),
            "alice".parse().unwrap(),
        )
    }

    #[test]
    fn iterator_exhaustion_returns_not_found_on_the_thirty_third_insert() {
        let mut cache: IteratorCache<u64> = IteratorCache::new();
        let mut iterators = Vec::new();
        for i in 0..33 {
            iterators.push(cache.add(1, i));
        }
        assert_eq!(&iterators[..32], &(0_i64..32).collect::<Vec<_>>()[..]);
        assert_eq!(iterators[32], ITERATOR_NOT_FOUND);
    }

    #[test]
    fn end_iterator_uniqueness_across_eight_tables() {
        let mut cache: IteratorCache<u64> = IteratorCache::new();
        let mut end_iterators = Vec::new();
        for i in 0..9 {
            end_iterators.push(cache.cache_table(table(i)));
        }
        assert_eq!(end_iterators[..8], [-2, -3, -4, -5, -6, -7, -8, -9]);
        assert_eq!(end_iterators[8], INVALID_TABLE_ITERATOR);
    }

    #[test]
    fn cache_table_is_idempotent_for_an_already_cached_table() {
        let mut cache: IteratorCache<u64> = IteratorCache::new();
        let first = cache.cache_table(table(1));
        let second = cache.cache_table(table(1));
        assert_eq!(first, second);
        assert_eq!(cache.table_count(), 1);
    }

    #[test]
    fn find_table_by_end_iterator_is_total_on_previously_cached_tables() {
        let mut cache: IteratorCache<u64> = IteratorCache::new();
        let ei = cache.cache_table(table(5));
        assert_eq!(cache.find_table_by_end_iterator(ei).unwrap().id, 5);
    }

    #[test]
    fn find_table_by_end_iterator_rejects_unknown_end_iterator() {
        let cache: IteratorCache<u64> = IteratorCache::new();
        assert_eq!(
            cache.find_table_by_end_iterator(-2),
            Err(IteratorCacheError::UnknownEndIterator(-2))
        );
    }

    #[test]
    fn remove_nils_the_slot_without_compacting() {
        let mut cache: IteratorCache<u64> = IteratorCache::new();
        let a = cache.add(1, 10);
        let b = cache.add(1, 20);
        cache.remove(a).unwrap();
        assert!(matches!(
            cache.get(a),
            Err(IteratorCacheError::TableOperationNotPermitted(_))
        ));
        assert_eq!(*cache.get(b).unwrap(), 20);
    }

    #[test]
    fn get_on_out_of_range_iterator_is_invalid() {
        let cache: IteratorCache<u64> = IteratorCache::new();
        assert_eq!(cache.get(0), Err(IteratorCacheError::InvalidTableIterator(0)));
    }

    #[test]
    fn is_end_iterator_classifies_values_below_negative_one() {
        assert!(IteratorCache::<u64>::is_end_iterator(-2));
        assert!(!IteratorCache::<u64>::is_end_iterator(-1));
        assert!(!IteratorCache::<u64>::is_end_iterator(0));
    }
}
