// HashTable property tests over the public API.
//
// Property 1: growth keeps every key.
//  - Model: the set of distinct keys inserted.
//  - Invariant: len() == distinct keys; every key maps to its last value;
//    capacity() is a power of two and len() <= max_size().
//
// Property 2: delete every n-th visited entry during iterate.
//  - Invariant: the walk visits each entry exactly once; afterwards len()
//    drops by the number of deletions and a fresh walk yields exactly the
//    survivors.
//
// Property 3: stop on visit k.
//  - Invariant: iterate returns true iff k <= len(), and no visit happens
//    after the stopping one.
use proptest::prelude::*;
use statsrelay::{HashTable, Visit};
use std::collections::{BTreeMap, BTreeSet};

fn keys() -> impl Strategy<Value = Vec<Vec<u8>>> {
    // NUL-free so the stored key equals the generated one.
    proptest::collection::vec(proptest::collection::vec(1u8..=255, 1..12), 0..400)
}

fn build(cap: usize, keys: &[Vec<u8>]) -> (HashTable<usize>, BTreeMap<Vec<u8>, usize>) {
    let mut t = HashTable::with_capacity(cap).unwrap();
    let mut model = BTreeMap::new();
    for (i, k) in keys.iter().enumerate() {
        t.put(k, i, ()).unwrap();
        model.insert(k.clone(), i);
    }
    (t, model)
}

// Property 1: growth keeps every key.
proptest! {
    #[test]
    fn prop_growth_keeps_keys(cap in 0usize..64, keys in keys()) {
        let (t, model) = build(cap, &keys);
        prop_assert_eq!(t.len(), model.len());
        prop_assert!(t.capacity().is_power_of_two());
        prop_assert!(t.len() <= t.max_size());
        for (k, v) in &model {
            prop_assert_eq!(t.get(k), Some(v));
        }
    }
}

// Property 2: delete-during-iterate visits each entry once.
proptest! {
    #[test]
    fn prop_iterate_delete_every_nth(cap in 1usize..32, keys in keys(), n in 1usize..=5) {
        let (mut t, mut model) = build(cap, &keys);
        let mut visited = Vec::new();
        let mut pos = 0usize;
        t.iterate(|k, _, _| {
            pos += 1;
            visited.push(k.to_vec());
            if pos % n == 0 { Visit::Delete } else { Visit::Continue }
        });

        let unique: BTreeSet<_> = visited.iter().cloned().collect();
        prop_assert_eq!(visited.len(), model.len());
        prop_assert_eq!(unique.len(), model.len());

        for (i, k) in visited.iter().enumerate() {
            if (i + 1) % n == 0 {
                model.remove(k);
            }
        }
        prop_assert_eq!(t.len(), model.len());
        let rest: BTreeMap<Vec<u8>, usize> = t.iter().map(|(k, v, _)| (k.to_vec(), *v)).collect();
        prop_assert_eq!(rest, model);
    }
}

// Property 3: stop is immediate.
proptest! {
    #[test]
    fn prop_iterate_stop(keys in keys(), k in 1usize..500) {
        let (mut t, model) = build(0, &keys);
        let mut visits = 0usize;
        let stopped = t.iterate(|_, _, _| {
            visits += 1;
            if visits == k { Visit::Stop } else { Visit::Continue }
        });
        prop_assert_eq!(stopped, k <= model.len());
        prop_assert_eq!(visits, k.min(model.len()));
        prop_assert_eq!(t.len(), model.len());
    }
}
