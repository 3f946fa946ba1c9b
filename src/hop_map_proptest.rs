#![cfg(test)]

// Property tests for HopMap kept inside the crate so they can call the
// structural invariant checker after every operation.

use crate::hop_map::{Handle, HopMap};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::BuildHasher;

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::borrow::Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Pool-indexed operations to improve shrinking: indices shrink to earlier
// keys, pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    InsertWith(usize, i32),
    Remove(usize),
    RemoveHandle(usize),
    Find(usize),
    Contains(String),
    GetOrDefault(usize, i32),
    Mutate(usize, i32),
    At(usize),
    Iterate,
    Clear,
}

fn key_from(pool: &[String], i: usize) -> Key {
    Key(pool[i].clone())
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=8).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            4 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::InsertWith(i, v)),
            3 => idx.clone().prop_map(OpI::Remove),
            2 => idx.clone().prop_map(OpI::RemoveHandle),
            3 => idx.clone().prop_map(OpI::Find),
            2 => prop_oneof![
                contains_pool.prop_map(|s: String| s),
                "[a-z]{0,5}".prop_map(|s| s)
            ]
            .prop_map(OpI::Contains),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::GetOrDefault(i, d)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Mutate(i, d)),
            2 => idx.clone().prop_map(OpI::At),
            1 => Just(OpI::Iterate),
            1 => Just(OpI::Clear),
        ];
        proptest::collection::vec(op, 1..80).prop_map(move |ops| (pool.clone(), ops))
    })
}

// State-machine run against std::collections::HashMap. Invariants checked
// across random operation sequences:
// - Duplicate inserts are no-ops returning the live entry's handle.
// - `find`/`contains_key`/`at` parity with the model; handle stability.
// - `remove` returns the owned pair matching the model; misses are no-ops.
// - `get_or_insert_default` defaults absent keys and mutates in place.
// - Stale handles never resolve; len parity and structural invariants
//   hold after every operation.
fn run_state_machine<S>(
    mut sut: HopMap<Key, i32, S>,
    pool: Vec<String>,
    ops: Vec<OpI>,
) -> Result<(), TestCaseError>
where
    S: BuildHasher,
{
    let mut model: HashMap<Key, i32> = HashMap::new();
    let mut live: HashMap<Key, Handle> = HashMap::new();
    let mut stale: Vec<Handle> = Vec::new();

    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                let k = key_from(&pool, i);
                let already = model.contains_key(&k);
                let h = sut.insert(k.clone(), v).expect("allocation");
                if already {
                    let &lh = live.get(&k).expect("tracked live handle");
                    prop_assert_eq!(h, lh, "duplicate insert must return the live handle");
                    prop_assert_eq!(h.value(&sut), model.get(&k), "value must be untouched");
                } else {
                    let prev = live.insert(k.clone(), h);
                    prop_assert!(prev.is_none());
                    model.insert(k, v);
                }
            }
            OpI::InsertWith(i, v) => {
                let k = key_from(&pool, i);
                let already = model.contains_key(&k);
                let mut ran = false;
                let h = sut
                    .insert_with(k.clone(), || {
                        ran = true;
                        v
                    })
                    .expect("allocation");
                prop_assert_eq!(ran, !already, "default must run iff the key was absent");
                if !already {
                    live.insert(k.clone(), h);
                    model.insert(k, v);
                }
            }
            OpI::Remove(i) => {
                let k = key_from(&pool, i);
                match sut.remove::<str>(k.0.as_str()) {
                    Some((kk, vv)) => {
                        prop_assert!(kk == k);
                        let mv = model.remove(&kk).expect("present in model");
                        prop_assert_eq!(vv, mv);
                        let h = live.remove(&k).expect("tracked live handle");
                        stale.push(h);
                    }
                    None => prop_assert!(!model.contains_key(&k)),
                }
            }
            OpI::RemoveHandle(i) => {
                let k = key_from(&pool, i);
                if let Some(&h) = live.get(&k) {
                    let (kk, vv) = sut.remove_handle(h).expect("handle valid for removal");
                    prop_assert!(kk == k);
                    let mv = model.remove(&kk).expect("present in model");
                    prop_assert_eq!(vv, mv);
                    live.remove(&k);
                    stale.push(h);
                }
            }
            OpI::Find(i) => {
                let k = key_from(&pool, i);
                let found = sut.find(&k);
                prop_assert_eq!(found.is_some(), model.contains_key(&k));
                if let Some(h) = found {
                    let &lh = live.get(&k).expect("tracked live handle");
                    prop_assert_eq!(h, lh, "find must return a stable handle");
                }
            }
            OpI::Contains(s) => {
                let has = sut.contains_key(s.as_str());
                let has_model = model.keys().any(|k| k.0 == s);
                prop_assert_eq!(has, has_model);
            }
            OpI::GetOrDefault(i, d) => {
                let k = key_from(&pool, i);
                let v = sut.get_or_insert_default(k.clone()).expect("allocation");
                *v = v.saturating_add(d);
                let mv = model.entry(k.clone()).or_insert(0);
                *mv = mv.saturating_add(d);
                if !live.contains_key(&k) {
                    live.insert(k.clone(), sut.find(&k).expect("just inserted"));
                }
            }
            OpI::Mutate(i, d) => {
                let k = key_from(&pool, i);
                match sut.get_mut(&k) {
                    Some(v) => {
                        *v = v.saturating_add(d);
                        let mv = model.get_mut(&k).expect("present in model");
                        *mv = mv.saturating_add(d);
                    }
                    None => prop_assert!(!model.contains_key(&k)),
                }
            }
            OpI::At(i) => {
                let k = key_from(&pool, i);
                match sut.at(&k) {
                    Ok(v) => prop_assert_eq!(Some(v), model.get(&k)),
                    Err(_) => prop_assert!(!model.contains_key(&k)),
                }
            }
            OpI::Iterate => {
                let s_keys: BTreeSet<_> = sut.iter().map(|(_, k, _)| k.clone()).collect();
                let m_keys: BTreeSet<_> = model.keys().cloned().collect();
                prop_assert_eq!(s_keys, m_keys);
            }
            OpI::Clear => {
                sut.clear();
                model.clear();
                stale.extend(live.drain().map(|(_, h)| h));
            }
        }

        // Post-conditions after each op.
        for &h in &stale {
            prop_assert!(h.value(&sut).is_none(), "stale handle must not resolve");
        }
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
        sut.check_invariants();
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        run_state_machine(HopMap::new(), pool, ops)?;
    }
}

// Collision variant using a constant hasher: every key lands in home
// bucket 0, stressing chain maintenance, displacement, and the
// neighbourhood-growth branch of the resize policy.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl std::hash::Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        run_state_machine(HopMap::with_hasher(ConstBuildHasher), pool, ops)?;
    }
}

// Property: cloning yields an independent deep copy — mutating or
// clearing the clone never leaks into the original, and vice versa.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_clone_independence(pairs in proptest::collection::vec(("[a-z]{0,4}", any::<i32>()), 0..40)) {
        let mut original: HopMap<String, i32> = HopMap::new();
        for (k, v) in &pairs {
            original.insert(k.clone(), *v).expect("allocation");
        }
        let snapshot: HashMap<String, i32> =
            original.iter().map(|(_, k, v)| (k.clone(), *v)).collect();

        let mut copy = original.clone();
        prop_assert_eq!(copy.len(), original.len());

        for (_, _, v) in copy.iter_mut() {
            *v = v.wrapping_add(1);
        }
        copy.insert("zzz-only-in-copy".to_string(), 1).expect("allocation");

        for (k, v) in &snapshot {
            prop_assert_eq!(original.get(k.as_str()), Some(v));
        }
        prop_assert!(!original.contains_key("zzz-only-in-copy"));

        copy.clear();
        for (k, v) in &snapshot {
            prop_assert_eq!(original.get(k.as_str()), Some(v));
        }
        original.check_invariants();
        copy.check_invariants();
    }
}
