//! EntryStore: the arena that owns every key/value pair.
//!
//! Entries live in a `SlotMap` so their handles stay valid for the whole
//! entry lifetime, no matter how the arena grows internally. An intrusive
//! doubly-linked list threads the records in insertion-relative order:
//! new entries go to the front, and removing one entry never reorders the
//! survivors. The bucket table holds `DefaultKey` back-references into
//! this store and nothing else.

use slotmap::{DefaultKey, SlotMap};

/// One owned entry. The hash is computed once at insertion and reused for
/// every rehash, so user `Hash` code never runs while the table is being
/// rebuilt.
pub(crate) struct EntryRecord<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) hash: u64,
    prev: Option<DefaultKey>,
    next: Option<DefaultKey>,
}

pub(crate) struct EntryStore<K, V> {
    slots: SlotMap<DefaultKey, EntryRecord<K, V>>,
    /// Most recently inserted entry; `None` when empty.
    head: Option<DefaultKey>,
}

impl<K, V> EntryStore<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            slots: SlotMap::with_key(),
            head: None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Add an entry at the front of the order list. O(1); existing handles
    /// are unaffected.
    pub(crate) fn push_front(&mut self, key: K, value: V, hash: u64) -> DefaultKey {
        let id = self.slots.insert(EntryRecord {
            key,
            value,
            hash,
            prev: None,
            next: self.head,
        });
        if let Some(old) = self.head {
            self.slots[old].prev = Some(id);
        }
        self.head = Some(id);
        id
    }

    /// Unlink and take the record for `id`. O(1); stale handles yield `None`.
    pub(crate) fn remove(&mut self, id: DefaultKey) -> Option<EntryRecord<K, V>> {
        let rec = self.slots.remove(id)?;
        match rec.prev {
            Some(p) => self.slots[p].next = rec.next,
            None => self.head = rec.next,
        }
        if let Some(n) = rec.next {
            self.slots[n].prev = rec.prev;
        }
        Some(rec)
    }

    pub(crate) fn get(&self, id: DefaultKey) -> Option<&EntryRecord<K, V>> {
        self.slots.get(id)
    }

    pub(crate) fn key(&self, id: DefaultKey) -> Option<&K> {
        self.slots.get(id).map(|rec| &rec.key)
    }

    pub(crate) fn value(&self, id: DefaultKey) -> Option<&V> {
        self.slots.get(id).map(|rec| &rec.value)
    }

    pub(crate) fn value_mut(&mut self, id: DefaultKey) -> Option<&mut V> {
        self.slots.get_mut(id).map(|rec| &mut rec.value)
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.head = None;
    }

    /// Records in order, most recently inserted first.
    pub(crate) fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: &self.slots,
            cursor: self.head,
        }
    }

    pub(crate) fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            cursor: self.head,
            slots: &mut self.slots,
        }
    }
}

pub(crate) struct Iter<'a, K, V> {
    slots: &'a SlotMap<DefaultKey, EntryRecord<K, V>>,
    cursor: Option<DefaultKey>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (DefaultKey, &'a EntryRecord<K, V>);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let rec = self.slots.get(id)?;
        self.cursor = rec.next;
        Some((id, rec))
    }
}

pub(crate) struct IterMut<'a, K, V> {
    slots: &'a mut SlotMap<DefaultKey, EntryRecord<K, V>>,
    cursor: Option<DefaultKey>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (DefaultKey, &'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let rec = self.slots.get_mut(id)?;
        // SAFETY: the order links form an acyclic chain and the cursor only
        // moves forward, so each record is yielded at most once; extending
        // the borrow to 'a cannot produce two live `&mut` to the same value.
        let rec = unsafe { &mut *(rec as *mut EntryRecord<K, V>) };
        self.cursor = rec.next;
        Some((id, &rec.key, &mut rec.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys_in_order(store: &EntryStore<&'static str, i32>) -> Vec<&'static str> {
        store.iter().map(|(_, rec)| rec.key).collect()
    }

    /// Invariant: new entries appear at the front; survivors keep their
    /// relative order across removals anywhere in the list.
    #[test]
    fn order_is_most_recent_first_and_stable_under_removal() {
        let mut store = EntryStore::new();
        let a = store.push_front("a", 1, 0);
        let b = store.push_front("b", 2, 0);
        let c = store.push_front("c", 3, 0);
        let d = store.push_front("d", 4, 0);
        assert_eq!(keys_in_order(&store), ["d", "c", "b", "a"]);

        // Middle removal.
        assert!(store.remove(b).is_some());
        assert_eq!(keys_in_order(&store), ["d", "c", "a"]);

        // Head removal.
        assert!(store.remove(d).is_some());
        assert_eq!(keys_in_order(&store), ["c", "a"]);

        // Tail removal.
        assert!(store.remove(a).is_some());
        assert_eq!(keys_in_order(&store), ["c"]);

        assert!(store.remove(c).is_some());
        assert!(store.is_empty());
        assert!(store.iter().next().is_none());
    }

    /// Invariant: a removed handle never resolves again, even after new
    /// inserts reuse the physical slot (generational keys).
    #[test]
    fn stale_handles_do_not_resolve() {
        let mut store = EntryStore::new();
        let a = store.push_front("a", 1, 0);
        assert!(store.remove(a).is_some());
        let b = store.push_front("b", 2, 0);
        assert_ne!(a, b);
        assert!(store.key(a).is_none());
        assert!(store.remove(a).is_none());
        assert_eq!(store.key(b), Some(&"b"));
    }

    /// Invariant: `iter_mut` visits every live entry exactly once, in the
    /// same order as `iter`, and writes are observable afterwards.
    #[test]
    fn iter_mut_visits_each_entry_once_in_order() {
        let mut store = EntryStore::new();
        for (i, k) in ["a", "b", "c"].into_iter().enumerate() {
            store.push_front(k, i as i32, 0);
        }
        let mut seen = Vec::new();
        for (_, k, v) in store.iter_mut() {
            seen.push(*k);
            *v += 10;
        }
        assert_eq!(seen, ["c", "b", "a"]);
        let values: Vec<i32> = store.iter().map(|(_, rec)| rec.value).collect();
        assert_eq!(values, [12, 11, 10]);
    }

    #[test]
    fn clear_empties_the_store() {
        let mut store = EntryStore::new();
        let a = store.push_front("a", 1, 0);
        store.push_front("b", 2, 0);
        store.clear();
        assert_eq!(store.len(), 0);
        assert!(store.key(a).is_none());
        assert!(store.iter().next().is_none());
        // Usable again after clear.
        store.push_front("c", 3, 0);
        assert_eq!(keys_in_order(&store), ["c"]);
    }
}
