// HashTable unit test suite (public API).
//
// Each test documents what behavior is being verified and which
// invariants are assumed or asserted. The core invariants exercised:
// - Uniqueness: a second put of the same key never grows the table's len.
// - Round-trip: put then get yields the stored value.
// - Delete: absent keys report not-found and change nothing; present keys
//   are removed exactly once.
// - Growth: capacity doubles at the 3/4 load limit and every key survives.
// - Iteration: deleting during a walk visits each entry once; stopping
//   halts immediately.
use statsrelay::{HashTable, Put, Visit};
use std::collections::BTreeSet;

fn key(i: usize) -> String {
    format!("metric.{i}")
}

// Test: the canonical create/put/update/delete sequence.
// Assumes: create(0) selects the default capacity.
// Verifies: insert/update outcomes, len, and double delete.
#[test]
fn create_put_update_delete() {
    let mut t: HashTable<i32, Option<u8>> = HashTable::with_capacity(0).unwrap();
    assert_eq!(t.capacity(), 128);

    assert_eq!(t.put(b"a", 1, None).unwrap(), Put::Inserted);
    assert_eq!(t.len(), 1);

    assert_eq!(t.put(b"a", 2, None).unwrap(), Put::Updated(1));
    assert_eq!(t.len(), 1);
    assert_eq!(t.get(b"a"), Some(&2));

    assert!(t.delete(b"a"));
    assert_eq!(t.len(), 0);
    assert!(!t.delete(b"a"));
    assert_eq!(t.len(), 0);
}

// Test: the 97th insert into a 128-bucket table.
// Assumes: max_size is 96 for 128 buckets.
// Verifies: exactly one doubling to 256 and all keys retrievable.
#[test]
fn ninety_seventh_insert_doubles_once() {
    let mut t: HashTable<usize> = HashTable::with_capacity(128).unwrap();
    assert_eq!(t.max_size(), 96);
    for i in 0..96 {
        t.put(key(i).as_bytes(), i, ()).unwrap();
    }
    assert_eq!(t.capacity(), 128);

    t.put(key(96).as_bytes(), 96, ()).unwrap();
    assert_eq!(t.capacity(), 256);
    assert_eq!(t.max_size(), 192);
    assert_eq!(t.len(), 97);
    for i in 0..97 {
        assert_eq!(t.get(key(i).as_bytes()), Some(&i));
    }
}

// Test: repeated growth.
// Assumes: growth only happens on insert.
// Verifies: capacity stays a power of two and values survive every doubling.
#[test]
fn growth_keeps_every_value() {
    let mut t: HashTable<usize, usize> = HashTable::with_capacity(2).unwrap();
    let n = 5_000;
    for i in 0..n {
        assert!(t.put(key(i).as_bytes(), i, n - i).unwrap().is_inserted());
        assert!(t.capacity().is_power_of_two());
        assert!(t.len() <= t.max_size());
    }
    assert_eq!(t.len(), n);
    for i in 0..n {
        assert_eq!(t.get_entry(key(i).as_bytes()), Some((&i, &(n - i))));
    }
}

// Test: uniqueness under repeated puts.
// Verifies: len counts distinct keys only; the latest value wins.
#[test]
fn repeated_puts_are_updates() {
    let mut t: HashTable<usize> = HashTable::new();
    for round in 0..3 {
        for i in 0..50 {
            let res = t.put(key(i).as_bytes(), round, ()).unwrap();
            assert_eq!(res.is_inserted(), round == 0);
        }
    }
    assert_eq!(t.len(), 50);
    assert!(t.iter().all(|(_, v, _)| *v == 2));
}

// Test: metadata is set on insert only.
// Verifies: update leaves metadata untouched; metadata_mut and
// get_entry_mut edits persist; absent keys have no metadata.
#[test]
fn metadata_belongs_to_the_first_insert() {
    let mut t: HashTable<u32, u64> = HashTable::new();
    t.put(b"k", 1, 100).unwrap();
    t.put(b"k", 2, 200).unwrap();
    assert_eq!(t.get_entry(b"k"), Some((&2, &100)));

    if let Some(seen) = t.metadata_mut(b"k") {
        *seen = 300;
    }
    assert_eq!(t.get_entry(b"k"), Some((&2, &300)));

    if let Some((value, seen)) = t.get_entry_mut(b"k") {
        *value += 1;
        *seen += 1;
    }
    assert_eq!(t.get_entry(b"k"), Some((&3, &301)));
    assert!(t.metadata_mut(b"missing").is_none());
}

// Test: remove hands back what the caller stored.
#[test]
fn remove_returns_value_and_metadata() {
    let mut t: HashTable<String, Vec<u8>> = HashTable::new();
    t.put(b"k", "value".to_owned(), vec![1, 2]).unwrap();
    assert_eq!(t.remove(b"k"), Some(("value".to_owned(), vec![1, 2])));
    assert_eq!(t.remove(b"k"), None);
}

// Test: the table owns its key copy.
// Verifies: mutating the caller's buffer after put does not affect lookups.
#[test]
fn key_is_copied() {
    let mut t: HashTable<i32> = HashTable::new();
    let mut buf = b"abc".to_vec();
    t.put(&buf, 1, ()).unwrap();
    buf[0] = b'x';
    assert_eq!(t.get(b"abc"), Some(&1));
    assert!(t.get(&buf).is_none());
}

// Test: delete every third visited key during iteration.
// Verifies: len drops by the number of deletions and a second walk sees
// exactly the survivors, each once.
#[test]
fn iterate_delete_every_third() {
    let mut t: HashTable<usize> = HashTable::new();
    for i in 0..300 {
        t.put(key(i).as_bytes(), i, ()).unwrap();
    }

    let mut pos = 0;
    let mut deleted = BTreeSet::new();
    let stopped = t.iterate(|k, _, _| {
        pos += 1;
        if pos % 3 == 0 {
            deleted.insert(k.to_vec());
            Visit::Delete
        } else {
            Visit::Continue
        }
    });
    assert!(!stopped);
    assert_eq!(pos, 300);
    assert_eq!(deleted.len(), 100);
    assert_eq!(t.len(), 200);

    let mut survivors = Vec::new();
    t.iterate(|k, _, _| {
        survivors.push(k.to_vec());
        Visit::Continue
    });
    let unique: BTreeSet<_> = survivors.iter().cloned().collect();
    assert_eq!(survivors.len(), 200);
    assert_eq!(unique.len(), 200);
    assert!(unique.is_disjoint(&deleted));
}

// Test: stop on the k-th visit.
// Verifies: no visits after the k-th, whatever the bucket layout.
#[test]
fn iterate_stop_is_immediate() {
    let mut t: HashTable<usize> = HashTable::with_capacity(4).unwrap();
    for i in 0..100 {
        t.put(key(i).as_bytes(), i, ()).unwrap();
    }
    for k in [1, 7, 50, 100] {
        let mut visits = 0;
        let stopped = t.iterate(|_, _, _| {
            visits += 1;
            if visits == k {
                Visit::Stop
            } else {
                Visit::Continue
            }
        });
        assert!(stopped);
        assert_eq!(visits, k);
    }
    assert_eq!(t.len(), 100);
}

// Test: visitor can mutate values in place.
#[test]
fn iterate_mutates_values() {
    let mut t: HashTable<usize, usize> = HashTable::new();
    for i in 0..20 {
        t.put(key(i).as_bytes(), i, 0).unwrap();
    }
    t.iterate(|_, v, m| {
        *v *= 2;
        *m += 1;
        Visit::Continue
    });
    for i in 0..20 {
        assert_eq!(t.get_entry(key(i).as_bytes()), Some((&(i * 2), &1)));
    }
}

// Test: delete everything through the cursor.
// Verifies: the cursor hands back every entry once and leaves an empty table.
#[test]
fn cursor_drains_table() {
    let mut t: HashTable<usize> = HashTable::with_capacity(8).unwrap();
    for i in 0..40 {
        t.put(key(i).as_bytes(), i, ()).unwrap();
    }
    let mut drained = Vec::new();
    let mut c = t.cursor();
    while let Some((_, v, ())) = c.delete_current() {
        drained.push(v);
    }
    assert!(c.is_end());
    drop(c);
    drained.sort_unstable();
    assert_eq!(drained, (0..40).collect::<Vec<_>>());
    assert!(t.is_empty());
    assert_eq!(t.overflow_len(), 0);
}

// Test: clear then reuse.
#[test]
fn clear_then_reuse() {
    let mut t: HashTable<usize> = HashTable::new();
    for i in 0..150 {
        t.put(key(i).as_bytes(), i, ()).unwrap();
    }
    let cap = t.capacity();
    t.clear();
    assert!(t.is_empty());
    assert_eq!(t.capacity(), cap);
    assert!(t.get(key(3).as_bytes()).is_none());
    t.put(key(3).as_bytes(), 3, ()).unwrap();
    assert_eq!(t.len(), 1);
    assert_eq!(t.get(key(3).as_bytes()), Some(&3));
}

// Test: values are released with the table.
// Verifies: dropping the table (destroy) drops every stored value once.
#[test]
fn drop_releases_values() {
    use std::rc::Rc;
    let token = Rc::new(());
    {
        let mut t: HashTable<Rc<()>, Rc<()>> = HashTable::with_capacity(2).unwrap();
        for i in 0..64 {
            t.put(key(i).as_bytes(), token.clone(), token.clone()).unwrap();
        }
        assert_eq!(Rc::strong_count(&token), 129);
        t.delete(key(0).as_bytes());
        assert_eq!(Rc::strong_count(&token), 127);
    }
    assert_eq!(Rc::strong_count(&token), 1);
}
