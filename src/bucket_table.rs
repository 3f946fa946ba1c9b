//! BucketTable: slot metadata and the hopscotch engines.
//!
//! The table is a flat array of buckets holding only chain metadata and
//! back-references into the entry store; keys and values never live here.
//! Every occupied slot stays within `neighbourhood` positions of its home
//! bucket, counted as plain indices: probing and displacement never wrap
//! around the table ends. All entries whose keys hash to the same home are
//! linked into a doubly-linked chain rooted at that home, so lookup walks
//! at most one chain and erase unlinks in O(1). Chain links are absolute
//! slot indices behind `Option`, so every step is bounds-checked by
//! construction.

use slotmap::DefaultKey;

use crate::hop_map::AllocationError;

/// Smallest neighbourhood, and also the capacity of a freshly built table.
pub(crate) const MIN_NEIGHBOURHOOD: usize = 4;

/// One slot of the table.
///
/// `home`, `next`, `prev` and `entry` describe this slot's occupant and are
/// meaningless while `home` is `None`. `first` belongs to the chain rooted
/// *at* this slot and is independent of whether the slot itself is occupied.
#[derive(Clone, Copy, Default)]
struct Bucket {
    /// Index the occupant's key hashes to; `None` marks an empty slot.
    home: Option<usize>,
    /// First member of the chain whose home is this slot.
    first: Option<usize>,
    /// Chain neighbours of the occupant.
    next: Option<usize>,
    prev: Option<usize>,
    /// Back-reference into the entry store.
    entry: DefaultKey,
}

pub(crate) struct BucketTable {
    buckets: Vec<Bucket>,
    neighbourhood: usize,
}

impl BucketTable {
    /// The table every map starts (and restarts) with.
    pub(crate) fn minimum() -> Self {
        Self {
            buckets: vec![Bucket::default(); MIN_NEIGHBOURHOOD],
            neighbourhood: MIN_NEIGHBOURHOOD,
        }
    }

    /// Build an empty table at the given parameters. Growth allocations run
    /// through `try_reserve_exact` so an out-of-memory condition surfaces as
    /// an error instead of aborting mid-resize.
    pub(crate) fn try_with_params(
        capacity: usize,
        neighbourhood: usize,
    ) -> Result<Self, AllocationError> {
        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(capacity)
            .map_err(AllocationError)?;
        buckets.resize_with(capacity, Bucket::default);
        Ok(Self {
            buckets,
            neighbourhood,
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn neighbourhood(&self) -> usize {
        self.neighbourhood
    }

    /// Home bucket for a hash at this table's capacity.
    pub(crate) fn home_for(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }

    /// Entry stored in `slot`. Only meaningful for slots returned by `find`
    /// or `place`.
    pub(crate) fn entry_at(&self, slot: usize) -> DefaultKey {
        self.buckets[slot].entry
    }

    /// Walk the chain rooted at `home` and return the slot whose occupant
    /// satisfies `matches`. Chain length is bounded by the neighbourhood, so
    /// this is the O(1)-expected lookup path.
    pub(crate) fn find(
        &self,
        home: usize,
        mut matches: impl FnMut(DefaultKey) -> bool,
    ) -> Option<usize> {
        let mut slot = self.buckets[home].first?;
        loop {
            if matches(self.buckets[slot].entry) {
                return Some(slot);
            }
            slot = self.buckets[slot].next?;
        }
    }

    /// Place `entry`, whose key hashes to `home`, into a slot within the
    /// home's neighbourhood, displacing residents as needed. Returns the
    /// slot used, or `None` when no placement exists at the current
    /// parameters and the caller must grow the table.
    pub(crate) fn place(&mut self, home: usize, entry: DefaultKey) -> Option<usize> {
        // Linear probe for the first free slot at or after the home bucket;
        // running off the table end is a placement failure.
        let mut free = (home..self.buckets.len()).find(|&s| self.buckets[s].home.is_none())?;

        // Hop the free slot toward the neighbourhood: an occupant in the
        // window before `free` may move into it as long as the move keeps it
        // within its own neighbourhood. The scan starts next to `free`, as
        // any qualifying occupant will do.
        while free - home >= self.neighbourhood {
            let lo = free.saturating_sub(self.neighbourhood - 1);
            let candidate = (lo..free)
                .rev()
                .find(|&c| self.buckets[c].home.is_some_and(|h| free - h < self.neighbourhood))?;
            self.relocate(candidate, free);
            free = candidate;
        }

        self.occupy(free, home, entry);
        Some(free)
    }

    /// Unlink `slot` from its chain and reset it. Slots that are already
    /// empty are left alone.
    pub(crate) fn remove(&mut self, slot: usize) {
        let removed = self.buckets[slot];
        let Some(home) = removed.home else { return };
        match removed.prev {
            Some(p) => self.buckets[p].next = removed.next,
            None => self.buckets[home].first = removed.next,
        }
        if let Some(n) = removed.next {
            self.buckets[n].prev = removed.prev;
        }
        self.clear_slot(slot);
    }

    /// Move the occupant of `from` into the empty slot `to`, patching its
    /// chain so the links keep pointing at the occupant's new position.
    fn relocate(&mut self, from: usize, to: usize) {
        let moved = self.buckets[from];
        let Some(home) = moved.home else {
            debug_assert!(false, "relocating an empty slot");
            return;
        };
        match moved.prev {
            Some(p) => self.buckets[p].next = Some(to),
            None => self.buckets[home].first = Some(to),
        }
        if let Some(n) = moved.next {
            self.buckets[n].prev = Some(to);
        }
        let dst = &mut self.buckets[to];
        dst.home = Some(home);
        dst.entry = moved.entry;
        dst.next = moved.next;
        dst.prev = moved.prev;
        self.clear_slot(from);
    }

    /// Store an occupant in the free slot and splice it into its home
    /// chain, after the closest chain member that sits before it, so chains
    /// stay ordered by physical position.
    fn occupy(&mut self, slot: usize, home: usize, entry: DefaultKey) {
        self.buckets[slot].home = Some(home);
        self.buckets[slot].entry = entry;

        let before = (home..slot)
            .rev()
            .find(|&s| self.buckets[s].home == Some(home));
        let after = match before {
            Some(p) => {
                let after = self.buckets[p].next;
                self.buckets[p].next = Some(slot);
                self.buckets[slot].prev = Some(p);
                after
            }
            None => {
                let after = self.buckets[home].first;
                self.buckets[home].first = Some(slot);
                self.buckets[slot].prev = None;
                after
            }
        };
        self.buckets[slot].next = after;
        if let Some(n) = after {
            self.buckets[n].prev = Some(slot);
        }
    }

    fn clear_slot(&mut self, slot: usize) {
        let b = &mut self.buckets[slot];
        b.home = None;
        b.next = None;
        b.prev = None;
        b.entry = DefaultKey::default();
    }

    /// Exhaustive structural check used by the test suites: every occupant
    /// sits inside its home's neighbourhood, every chain is consistent, and
    /// the chains partition exactly the occupied slots. Returns the number
    /// of occupied slots so callers can compare against the entry count.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) -> usize {
        use std::collections::BTreeSet;

        let mut chained = BTreeSet::new();
        for (root, bucket) in self.buckets.iter().enumerate() {
            let mut cursor = bucket.first;
            let mut prev: Option<usize> = None;
            let mut steps = 0;
            while let Some(slot) = cursor {
                steps += 1;
                assert!(steps <= self.buckets.len(), "cycle in chain at {root}");
                let member = &self.buckets[slot];
                assert_eq!(member.home, Some(root), "chain member has wrong home");
                assert_eq!(member.prev, prev, "asymmetric chain links");
                assert!(
                    chained.insert(slot),
                    "slot {slot} appears in more than one chain"
                );
                prev = Some(slot);
                cursor = member.next;
            }
        }

        let mut occupied = 0;
        for (slot, bucket) in self.buckets.iter().enumerate() {
            match bucket.home {
                Some(home) => {
                    occupied += 1;
                    assert!(home <= slot, "occupant placed before its home");
                    assert!(
                        slot - home < self.neighbourhood,
                        "occupant outside its neighbourhood"
                    );
                    assert!(chained.contains(&slot), "occupied slot not in any chain");
                }
                None => {
                    assert!(!chained.contains(&slot), "empty slot linked into a chain");
                    assert_eq!(bucket.next, None);
                    assert_eq!(bucket.prev, None);
                }
            }
        }
        occupied
    }
}
