#![cfg(test)]

// Property tests for HashTable kept inside the crate so they can check the
// arena accounting that the public API does not expose.

use crate::hash_table::tests::assert_overflow_accounting;
use crate::hash_table::{HashTable, Put, Visit};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap};

// Pool-indexed operations to improve shrinking: indices shrink to earlier keys,
// pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Put(usize, i32, i32),
    Delete(usize),
    Remove(usize),
    Get(usize),
    Mutate(usize, i32),
    // Delete every visited entry whose position is a multiple of n.
    IterDeleteEvery(usize),
    // Stop after n visits.
    IterStop(usize),
    Clear,
}

fn arb_scenario() -> impl Strategy<Value = (usize, Vec<String>, Vec<OpI>)> {
    let pool = proptest::collection::vec("[a-z.]{1,6}", 1..=40);
    (0usize..=4, pool).prop_flat_map(|(cap_exp, pool)| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let op = prop_oneof![
            6 => (idx.clone(), any::<i32>(), any::<i32>()).prop_map(|(i, v, m)| OpI::Put(i, v, m)),
            2 => idx.clone().prop_map(OpI::Delete),
            2 => idx.clone().prop_map(OpI::Remove),
            2 => idx.clone().prop_map(OpI::Get),
            1 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Mutate(i, d)),
            1 => (1usize..=4).prop_map(OpI::IterDeleteEvery),
            1 => (0usize..=10).prop_map(OpI::IterStop),
            1 => Just(OpI::Clear),
        ];
        // Small initial capacities force chains and repeated growth.
        let cap = 1usize << cap_exp;
        proptest::collection::vec(op, 1..120).prop_map(move |ops| (cap, pool.clone(), ops))
    })
}

// Property: State-machine equivalence against std::collections::HashMap.
// Invariants exercised across random operation sequences:
// - Keys are unique; `put` reports insert vs update like the model.
// - Update replaces the value and keeps the first metadata.
// - `delete`/`remove` on absent keys change nothing.
// - Deleting during iteration visits each entry once and removes exactly
//   the chosen ones; stopping halts after the requested visit.
// - Capacity stays a power of two; overflow nodes equal non-head entries.
proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((cap, pool, ops) in arb_scenario()) {
        let mut sut: HashTable<i32, i32> = HashTable::with_capacity(cap).unwrap();
        let mut model: HashMap<Vec<u8>, (i32, i32)> = HashMap::new();

        for op in ops {
            match op {
                OpI::Put(i, v, m) => {
                    let k = pool[i].as_bytes();
                    let res = sut.put(k, v, m).unwrap();
                    match model.get_mut(k) {
                        Some(entry) => {
                            prop_assert_eq!(res, Put::Updated(entry.0));
                            entry.0 = v;
                        }
                        None => {
                            prop_assert_eq!(res, Put::Inserted);
                            model.insert(k.to_vec(), (v, m));
                        }
                    }
                }
                OpI::Delete(i) => {
                    let k = pool[i].as_bytes();
                    prop_assert_eq!(sut.delete(k), model.remove(k).is_some());
                }
                OpI::Remove(i) => {
                    let k = pool[i].as_bytes();
                    prop_assert_eq!(sut.remove(k), model.remove(k));
                }
                OpI::Get(i) => {
                    let k = pool[i].as_bytes();
                    let expected = model.get(k).map(|(v, m)| (v, m));
                    prop_assert_eq!(sut.get_entry(k), expected);
                }
                OpI::Mutate(i, d) => {
                    let k = pool[i].as_bytes();
                    if let Some(v) = sut.get_mut(k) {
                        *v = v.wrapping_add(d);
                        let entry = model.get_mut(k).expect("present in model");
                        entry.0 = entry.0.wrapping_add(d);
                    } else {
                        prop_assert!(!model.contains_key(k));
                    }
                }
                OpI::IterDeleteEvery(n) => {
                    let mut pos = 0usize;
                    let mut seen: BTreeMap<Vec<u8>, usize> = BTreeMap::new();
                    let mut deleted = Vec::new();
                    let stopped = sut.iterate(|k, _, _| {
                        pos += 1;
                        *seen.entry(k.to_vec()).or_default() += 1;
                        if pos % n == 0 {
                            deleted.push(k.to_vec());
                            Visit::Delete
                        } else {
                            Visit::Continue
                        }
                    });
                    prop_assert!(!stopped);
                    prop_assert_eq!(seen.len(), model.len());
                    prop_assert!(seen.values().all(|&c| c == 1), "each entry visited once");
                    for k in &deleted {
                        prop_assert!(model.remove(k).is_some());
                    }
                }
                OpI::IterStop(n) => {
                    let mut visits = 0usize;
                    let stopped = sut.iterate(|_, _, _| {
                        visits += 1;
                        if visits > n { Visit::Stop } else { Visit::Continue }
                    });
                    prop_assert_eq!(stopped, model.len() > n);
                    prop_assert_eq!(visits, model.len().min(n + 1));
                }
                OpI::Clear => {
                    let cap_before = sut.capacity();
                    sut.clear();
                    model.clear();
                    prop_assert_eq!(sut.capacity(), cap_before);
                }
            }

            prop_assert_eq!(sut.len(), model.len());
            prop_assert_eq!(sut.is_empty(), model.is_empty());
            prop_assert!(sut.capacity().is_power_of_two());
            prop_assert!(sut.len() <= sut.max_size());
            assert_overflow_accounting(&sut);
        }

        // Final: iteration yields exactly the model.
        let got: BTreeMap<Vec<u8>, (i32, i32)> =
            sut.iter().map(|(k, v, m)| (k.to_vec(), (*v, *m))).collect();
        let want: BTreeMap<Vec<u8>, (i32, i32)> = model.into_iter().collect();
        prop_assert_eq!(got, want);
    }
}
