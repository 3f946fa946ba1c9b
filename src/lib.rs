//! hopmap: a single-threaded hash map built on hopscotch hashing, with
//! handles to entries that stay valid across table resizes.
//!
//! Internal design:
//!
//! Summary
//! - Goal: bound the physical distance between a key's home bucket and
//!   its storage slot (the "neighbourhood"), so lookups walk a short
//!   chain, while keeping every entry reachable through a stable handle.
//! - Layers:
//!   - EntryStore<K, V>: slotmap arena owning every key/value pair,
//!     threaded into insertion-relative order. Handles are generational,
//!     so they stay valid until the entry is removed and never alias a
//!     later entry.
//!   - BucketTable: pure metadata — per-slot home/chain links and a
//!     back-reference into the store. Holds the lookup, erase, and
//!     hopscotch placement engines. Keys and values never live here, so
//!     rebuilding the table never touches entry storage.
//!   - HopMap<K, V, S>: the public map; hashes keys, drives placement,
//!     and owns the resize policy (capacity x3 / neighbourhood x3, grown
//!     until a candidate table accepts every entry).
//!
//! Constraints
//! - Single-threaded: no locking, no atomics; callers serialize access.
//! - Placement invariant: an occupied slot is always within the
//!   neighbourhood of its home bucket; probing never wraps the table.
//! - O(1) expected find/insert/remove; resize is O(len) and may be
//!   triggered by any insert.
//!
//! Hasher and rehashing invariants
//! - Each entry stores its `u64` hash at insertion and every rehash uses
//!   the stored hash; user `Hash` code never runs while the table is
//!   rebuilt. The hasher must therefore be deterministic for a key's
//!   lifetime in the map.
//!
//! Reentrancy policy
//! - Public operations run user code only via `K: Hash`/`Eq` during
//!   probing (and via the `insert_with` closure). A debug-only guard
//!   panics if that code re-enters the same map while its chains are
//!   transiently inconsistent; release builds carry no check.
//!
//! Notes and non-goals
//! - Iteration order is most-recently-inserted first and is stable for
//!   untouched entries; it is not a sorted or chronological order.
//! - Duplicate-key inserts keep the existing value and hand back the
//!   existing handle.
//! - No persistence, no concurrent access, no tunable load factors.
//! - Keys are immutable after insert; there is no `key_mut`.

mod bucket_table;
mod entry_store;
mod hop_map;
mod hop_map_proptest;
mod reentrancy;

// Public surface
pub use hop_map::{AllocationError, Handle, HopMap, Iter, IterMut, KeyNotFound};
