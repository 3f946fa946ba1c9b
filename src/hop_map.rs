//! HopMap: the public map, combining the entry store, the bucket table,
//! and the resize policy.
//!
//! Operations that look up a key hash it once with the configured
//! `BuildHasher` and walk the home bucket's chain. Insertion places the
//! new entry through the hopscotch engine and, when placement is
//! exhausted, grows the table parameters until a candidate table accepts
//! every entry. A candidate is committed only after a full successful
//! replay, so the caller never observes a half-rebuilt map.

use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::ops::Index;
use std::collections::hash_map::RandomState;
use std::collections::TryReserveError;

use slotmap::DefaultKey;

use crate::bucket_table::BucketTable;
use crate::entry_store::{self, EntryStore};
use crate::reentrancy::ReentryFlag;

/// Capacity multiplier applied by the resize policy.
const CAPACITY_GROWTH: usize = 3;
/// Neighbourhood multiplier applied by the resize policy.
const NEIGHBOURHOOD_GROWTH: usize = 3;

/// Growing the bucket table failed to allocate. Fatal for the triggering
/// operation; the map itself is left as it was.
#[derive(Debug)]
pub struct AllocationError(pub(crate) TryReserveError);

impl fmt::Display for AllocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bucket table allocation failed: {}", self.0)
    }
}

impl std::error::Error for AllocationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

/// Returned by the `at` accessors when the key is absent. Every other
/// lookup reports absence as `None`, never as an error.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KeyNotFound;

impl fmt::Display for KeyNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("key not found")
    }
}

impl std::error::Error for KeyNotFound {}

/// Stable locator for one entry.
///
/// A handle stays valid from the entry's insertion until its removal,
/// across any number of table resizes and operations on other entries.
/// After removal it never resolves again, even if the underlying arena
/// slot is reused (generational keys).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle(DefaultKey);

impl Handle {
    pub(crate) fn new(id: DefaultKey) -> Self {
        Handle(id)
    }

    pub(crate) fn raw(&self) -> DefaultKey {
        self.0
    }

    /// Borrow the entry's key, or `None` for a stale handle.
    pub fn key<'a, K, V, S>(&self, map: &'a HopMap<K, V, S>) -> Option<&'a K> {
        map.entries.key(self.0)
    }

    /// Borrow the entry's value, or `None` for a stale handle.
    pub fn value<'a, K, V, S>(&self, map: &'a HopMap<K, V, S>) -> Option<&'a V> {
        map.entries.value(self.0)
    }

    /// Mutably borrow the entry's value, or `None` for a stale handle.
    pub fn value_mut<'a, K, V, S>(&self, map: &'a mut HopMap<K, V, S>) -> Option<&'a mut V> {
        map.entries.value_mut(self.0)
    }
}

/// A hash map using hopscotch placement over an arena of stable entries.
pub struct HopMap<K, V, S = RandomState> {
    hasher: S,
    table: BucketTable,
    entries: EntryStore<K, V>,
    reentrancy: ReentryFlag,
}

impl<K, V> HopMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<K, V, S> Default for HopMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> HopMap<K, V, S> {
    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Borrow the hash capability supplied at construction.
    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    /// Iterate entries, most recently inserted first. Untouched entries
    /// keep their relative order across inserts and removals of others.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.entries.iter(),
        }
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            inner: self.entries.iter_mut(),
        }
    }

    /// Drop every entry and reset the table to its minimum capacity and
    /// neighbourhood.
    pub fn clear(&mut self) {
        let _g = self.reentrancy.enter();
        self.entries.clear();
        self.table = BucketTable::minimum();
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        assert_eq!(
            self.table.check_invariants(),
            self.entries.len(),
            "occupied slot count out of sync with the entry store"
        );
    }
}

impl<K, V, S> HopMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            hasher,
            table: BucketTable::minimum(),
            entries: EntryStore::new(),
            reentrancy: ReentryFlag::new(),
        }
    }

    fn find_slot<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let home = self.table.home_for(self.hasher.hash_one(key));
        self.table.find(home, |id| {
            self.entries
                .key(id)
                .map(|k| k.borrow() == key)
                .unwrap_or(false)
        })
    }

    /// Locate `key`'s entry; `None` when absent.
    pub fn find<Q>(&self, key: &Q) -> Option<Handle>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter();
        let slot = self.find_slot(key)?;
        Some(Handle::new(self.table.entry_at(slot)))
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter();
        self.find_slot(key).is_some()
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter();
        let slot = self.find_slot(key)?;
        self.entries.value(self.table.entry_at(slot))
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter();
        let slot = self.find_slot(key)?;
        let id = self.table.entry_at(slot);
        self.entries.value_mut(id)
    }

    /// Checked access: `KeyNotFound` when the key is absent. Works against
    /// a shared map, unlike the inserting accessor.
    pub fn at<Q>(&self, key: &Q) -> Result<&V, KeyNotFound>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get(key).ok_or(KeyNotFound)
    }

    pub fn at_mut<Q>(&mut self, key: &Q) -> Result<&mut V, KeyNotFound>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get_mut(key).ok_or(KeyNotFound)
    }

    /// Insert `key` with `value`. A duplicate key is a no-op: the existing
    /// entry keeps its value and its handle is returned.
    pub fn insert(&mut self, key: K, value: V) -> Result<Handle, AllocationError> {
        self.insert_with(key, || value)
    }

    /// Like [`insert`](Self::insert), but builds the value lazily; the
    /// closure does not run when the key is already present.
    pub fn insert_with<F>(&mut self, key: K, default: F) -> Result<Handle, AllocationError>
    where
        F: FnOnce() -> V,
    {
        let _g = self.reentrancy.enter();
        let hash = self.hasher.hash_one(&key);
        let home = self.table.home_for(hash);
        if let Some(slot) = self.table.find(home, |id| {
            self.entries.key(id).map(|k| *k == key).unwrap_or(false)
        }) {
            return Ok(Handle::new(self.table.entry_at(slot)));
        }

        let id = self.entries.push_front(key, default(), hash);
        if self.table.place(home, id).is_none() {
            if let Err(err) = Self::grow_until_placed(&self.entries, &mut self.table) {
                // Roll the entry back out so the map stays consistent.
                self.entries.remove(id);
                return Err(err);
            }
        }
        Ok(Handle::new(id))
    }

    /// Mutable access to `key`'s value, inserting `V::default()` first
    /// when the key is absent — the indexing operation of the classic map
    /// interface.
    pub fn get_or_insert_default(&mut self, key: K) -> Result<&mut V, AllocationError>
    where
        V: Default,
    {
        let handle = self.insert_with(key, V::default)?;
        Ok(self
            .entries
            .value_mut(handle.raw())
            .expect("entry just inserted"))
    }

    /// Remove the entry for `key`, returning the owned pair. Absent keys
    /// are a silent no-op.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter();
        let slot = self.find_slot(key)?;
        let id = self.table.entry_at(slot);
        self.table.remove(slot);
        self.entries.remove(id).map(|rec| (rec.key, rec.value))
    }

    /// Remove by handle. Uses the entry's cached hash, so user `Hash` and
    /// `Eq` code never runs. Stale handles are a no-op.
    pub fn remove_handle(&mut self, handle: Handle) -> Option<(K, V)> {
        let _g = self.reentrancy.enter();
        let hash = self.entries.get(handle.raw())?.hash;
        let home = self.table.home_for(hash);
        let slot = self.table.find(home, |id| id == handle.raw())?;
        self.table.remove(slot);
        self.entries
            .remove(handle.raw())
            .map(|rec| (rec.key, rec.value))
    }

    /// Resize policy: grow capacity and/or neighbourhood until a candidate
    /// table accepts every stored entry.
    ///
    /// Capacity triples when the store has outgrown the table; otherwise
    /// the neighbourhood triples, with a capacity bump whenever the grown
    /// neighbourhood would no longer fit meaningfully. Termination: the
    /// neighbourhood eventually reaches the capacity, at which point every
    /// slot is within reach of every home and only a genuine lack of free
    /// slots (which forces a capacity bump) can fail a replay.
    fn grow_until_placed(
        entries: &EntryStore<K, V>,
        table: &mut BucketTable,
    ) -> Result<(), AllocationError> {
        let mut capacity = table.capacity();
        let mut hood = table.neighbourhood();

        if entries.len() >= capacity {
            capacity *= CAPACITY_GROWTH;
            if Self::try_rebuild(entries, table, capacity, hood)? {
                return Ok(());
            }
        }
        loop {
            if hood * NEIGHBOURHOOD_GROWTH >= capacity || entries.len() >= capacity {
                capacity *= CAPACITY_GROWTH;
            }
            hood *= NEIGHBOURHOOD_GROWTH;
            if Self::try_rebuild(entries, table, capacity, hood)? {
                return Ok(());
            }
        }
    }

    /// Build a table at the given parameters and replay every stored entry
    /// through placement using its cached hash. Commits only on full
    /// success; a failed replay leaves the live table untouched and
    /// reports `Ok(false)` so the policy can grow further.
    fn try_rebuild(
        entries: &EntryStore<K, V>,
        table: &mut BucketTable,
        capacity: usize,
        hood: usize,
    ) -> Result<bool, AllocationError> {
        let mut candidate = BucketTable::try_with_params(capacity, hood)?;
        for (id, rec) in entries.iter() {
            let home = candidate.home_for(rec.hash);
            if candidate.place(home, id).is_none() {
                return Ok(false);
            }
        }
        *table = candidate;
        Ok(true)
    }
}

impl<K, V, S> Clone for HopMap<K, V, S>
where
    K: Eq + Hash + Clone,
    V: Clone,
    S: BuildHasher + Clone,
{
    /// Deep copy: a fresh store and table, pre-sized to the source's
    /// parameters, re-inserting every entry in store order. The copy
    /// shares no storage with the source.
    fn clone(&self) -> Self {
        let mut copy = Self::with_hasher(self.hasher.clone());
        copy.table =
            BucketTable::try_with_params(self.table.capacity(), self.table.neighbourhood())
                .expect("allocation failed while cloning map");
        for (_, k, v) in self.iter() {
            copy.insert(k.clone(), v.clone())
                .expect("allocation failed while cloning map");
        }
        copy
    }
}

impl<K, V, S> fmt::Debug for HopMap<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(_, k, v)| (k, v)))
            .finish()
    }
}

impl<K, V, S, Q> Index<&Q> for HopMap<K, V, S>
where
    K: Eq + Hash + Borrow<Q>,
    Q: ?Sized + Eq + Hash,
    S: BuildHasher,
{
    type Output = V;

    /// Panics when the key is absent; the inserting variant is
    /// [`HopMap::get_or_insert_default`].
    fn index(&self, key: &Q) -> &V {
        self.get(key).expect("no entry found for key")
    }
}

impl<K, V, S> Extend<(K, V)> for HopMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Repeated `insert`: duplicate keys keep their first value.
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v)
                .expect("allocation failed while extending map");
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for HopMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::with_hasher(S::default());
        map.extend(iter);
        map
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for HopMap<K, V>
where
    K: Eq + Hash,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Iterator over shared entries, most recently inserted first.
pub struct Iter<'a, K, V> {
    inner: entry_store::Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (Handle, &'a K, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(id, rec)| (Handle::new(id), &rec.key, &rec.value))
    }
}

/// Iterator over entries with mutable values, most recently inserted
/// first.
pub struct IterMut<'a, K, V> {
    inner: entry_store::IterMut<'a, K, V>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (Handle, &'a K, &'a mut V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(id, k, v)| (Handle::new(id), k, v))
    }
}

impl<'a, K, V, S> IntoIterator for &'a HopMap<K, V, S> {
    type Item = (Handle, &'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, S> IntoIterator for &'a mut HopMap<K, V, S> {
    type Item = (Handle, &'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Invariant: a duplicate insert is a no-op that hands back the
    /// existing entry's handle with its value untouched.
    #[test]
    fn duplicate_insert_returns_existing_handle() {
        let mut m: HopMap<String, i32> = HopMap::new();
        let first = m.insert("dup".to_string(), 1).unwrap();
        let second = m.insert("dup".to_string(), 2).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.value(&m), Some(&1));
        assert_eq!(m.len(), 1);
        m.check_invariants();
    }

    /// Invariant: `insert_with` runs its closure exactly once on success
    /// and not at all on a duplicate key.
    #[test]
    fn insert_with_is_lazy_on_duplicates() {
        let mut m: HopMap<String, i32> = HopMap::new();
        let calls = Cell::new(0);
        let h = m
            .insert_with("k".to_string(), || {
                calls.set(calls.get() + 1);
                7
            })
            .unwrap();
        assert_eq!(calls.get(), 1);

        let h2 = m
            .insert_with("k".to_string(), || {
                calls.set(calls.get() + 1);
                8
            })
            .unwrap();
        assert_eq!(calls.get(), 1, "closure must not run on duplicate");
        assert_eq!(h, h2);
        assert_eq!(h.value(&m), Some(&7));
    }

    /// Invariant: borrowed lookup works (store `String`, query `&str`).
    #[test]
    fn borrowed_lookup_with_str() {
        let mut m: HopMap<String, i32> = HopMap::new();
        m.insert("hello".to_string(), 1).unwrap();
        assert!(m.contains_key("hello"));
        assert!(m.find("hello").is_some());
        assert!(!m.contains_key("world"));
        assert_eq!(m.get("hello"), Some(&1));
        assert_eq!(m["hello"], 1);
    }

    /// Invariant: handle accessors resolve while the entry lives, support
    /// mutation, and go stale after removal without aliasing later
    /// entries.
    #[test]
    fn handle_access_mutation_and_staleness() {
        let mut m: HopMap<String, i32> = HopMap::new();
        let h = m.insert("k1".to_string(), 10).unwrap();
        assert_eq!(h.key(&m), Some(&"k1".to_string()));
        *h.value_mut(&mut m).unwrap() += 5;
        assert_eq!(h.value(&m), Some(&15));

        let (k, v) = m.remove_handle(h).unwrap();
        assert_eq!((k.as_str(), v), ("k1", 15));
        assert!(h.value(&m).is_none());

        let h2 = m.insert("k2".to_string(), 1).unwrap();
        assert_ne!(h, h2, "stale handle must not alias a new entry");
        assert!(h.value(&m).is_none());
        m.check_invariants();
    }

    /// Invariant: removing by key returns the owned pair once; a second
    /// removal and removals of absent keys are silent no-ops.
    #[test]
    fn remove_by_key() {
        let mut m: HopMap<i32, i32> = HopMap::new();
        m.insert(1, 10).unwrap();
        m.insert(2, 20).unwrap();
        assert_eq!(m.remove(&1), Some((1, 10)));
        assert_eq!(m.remove(&1), None);
        assert_eq!(m.remove(&99), None);
        assert_eq!(m.len(), 1);
        m.check_invariants();
    }

    /// Invariant: `at` mirrors `get` and reports absence as KeyNotFound.
    #[test]
    fn at_accessors() {
        let mut m: HopMap<i32, i32> = HopMap::new();
        m.insert(4, 44).unwrap();
        assert_eq!(m.at(&4), Ok(&44));
        assert_eq!(m.at(&5), Err(KeyNotFound));
        *m.at_mut(&4).unwrap() = 45;
        assert_eq!(m.at(&4), Ok(&45));
        assert_eq!(m.at_mut(&5), Err(KeyNotFound));
    }

    /// Invariant: `get_or_insert_default` inserts once, then keeps
    /// handing out the same slot for mutation.
    #[test]
    fn get_or_insert_default_behaves_like_indexing() {
        let mut m: HopMap<i32, i32> = HopMap::new();
        assert_eq!(*m.get_or_insert_default(3).unwrap(), 0);
        *m.get_or_insert_default(3).unwrap() = 7;
        assert_eq!(m.get(&3), Some(&7));
        assert_eq!(m.len(), 1);
    }

    /// Invariant: the table grows through capacity and neighbourhood bumps
    /// while keeping every entry findable; worst case exercised with a
    /// constant hash.
    #[test]
    fn growth_under_constant_hash() {
        #[derive(Clone, Default)]
        struct ConstBuildHasher;
        struct ConstHasher;
        impl BuildHasher for ConstBuildHasher {
            type Hasher = ConstHasher;
            fn build_hasher(&self) -> Self::Hasher {
                ConstHasher
            }
        }
        impl core::hash::Hasher for ConstHasher {
            fn write(&mut self, _bytes: &[u8]) {}
            fn finish(&self) -> u64 {
                0
            }
        }

        let mut m: HopMap<i32, i32, ConstBuildHasher> = HopMap::with_hasher(ConstBuildHasher);
        for i in 0..100 {
            m.insert(i, i * 2).unwrap();
            m.check_invariants();
        }
        assert_eq!(m.len(), 100);
        for i in 0..100 {
            assert_eq!(m.get(&i), Some(&(i * 2)));
        }
    }

    /// Invariant: `clear` resets to the minimum parameters and the map
    /// stays usable.
    #[test]
    fn clear_resets_and_map_is_reusable() {
        let mut m: HopMap<i32, i32> = HopMap::new();
        for i in 0..50 {
            m.insert(i, i).unwrap();
        }
        m.clear();
        assert!(m.is_empty());
        assert_eq!(m.find(&3), None);
        m.check_invariants();

        m.insert(3, 3).unwrap();
        assert_eq!(m.get(&3), Some(&3));
        assert_eq!(m.len(), 1);
        m.check_invariants();
    }

    /// Invariant: iteration yields entries most recently inserted first;
    /// `iter_mut` writes are observed by lookups.
    #[test]
    fn iteration_order_and_mutation() {
        let mut m: HopMap<&'static str, i32> = HopMap::new();
        m.insert("a", 0).unwrap();
        m.insert("b", 1).unwrap();
        m.insert("c", 2).unwrap();

        let keys: Vec<&str> = m.iter().map(|(_, k, _)| *k).collect();
        assert_eq!(keys, ["c", "b", "a"]);

        for (_, _, v) in &mut m {
            *v += 10;
        }
        assert_eq!(m.get(&"a"), Some(&10));
        assert_eq!(m.get(&"b"), Some(&11));
        assert_eq!(m.get(&"c"), Some(&12));
    }

    /// Invariant: the configured hasher is reachable through `hasher()`
    /// and is the capability the map actually uses.
    #[test]
    fn hasher_is_exposed() {
        #[derive(Clone, Default)]
        struct Mod17;
        struct Mod17Hasher(u64);
        impl BuildHasher for Mod17 {
            type Hasher = Mod17Hasher;
            fn build_hasher(&self) -> Self::Hasher {
                Mod17Hasher(0)
            }
        }
        impl core::hash::Hasher for Mod17Hasher {
            fn write(&mut self, bytes: &[u8]) {
                for &b in bytes {
                    self.0 = self.0.wrapping_add(b as u64);
                }
            }
            fn finish(&self) -> u64 {
                self.0 % 17
            }
        }

        let m: HopMap<i32, i32, Mod17> = HopMap::with_hasher(Mod17);
        let hasher = m.hasher().clone();
        assert!(hasher.hash_one(123) < 17);
    }
}
