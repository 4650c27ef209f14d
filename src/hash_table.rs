//! HashTable: separately chained, byte-keyed map with inline chain heads.
//!
//! Layout
//! - `buckets` is the backing array. Each slot holds the *head* entry of
//!   its chain inline (`Option<Entry>`), so a bucket with a single key
//!   costs no allocation beyond the owned key bytes.
//! - Entries after the head are overflow nodes kept in a generational
//!   arena (`nodes`). A chain is `head -> node -> node ...` linked through
//!   `Entry::next`.
//! - Only overflow nodes are ever inserted into or removed from the arena.
//!   Removing a head with a follower "zips" the follower inline: the
//!   follower leaves the arena and takes the head's place.
//!
//! Invariants (checked by tests)
//! - `buckets.len()` is a power of two and `max_size == 3/4 * buckets.len()`.
//! - Keys are unique across the table.
//! - `nodes.len() == count - occupied heads`.
//! - Every arena key reachable through a `next` link is live.

use crate::cursor::Cursor;
use crate::hash::{bucket_index, terminated};
use core::mem;
use slotmap::{DefaultKey, SlotMap};

/// Capacity used when the caller asks for 0.
pub const DEFAULT_CAPACITY: usize = 128;

pub(crate) type NodeKey = DefaultKey;

#[derive(Debug)]
pub(crate) struct Entry<V, M> {
    pub(crate) key: Box<[u8]>,
    pub(crate) value: V,
    pub(crate) metadata: M,
    pub(crate) next: Option<NodeKey>,
}

impl<V, M> Entry<V, M> {
    #[inline]
    fn matches(&self, key: &[u8]) -> bool {
        // Length first; a prefix never matches.
        self.key.len() == key.len() && *self.key == *key
    }
}

/// Where a found entry lives.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Position {
    Head(usize),
    Node(NodeKey),
}

/// What to unlink: the inline head of a bucket, or an overflow node along
/// with its predecessor (`None` means the predecessor is the head).
#[derive(Copy, Clone, Debug)]
pub(crate) enum Link {
    Head,
    Node {
        prev: Option<NodeKey>,
        node: NodeKey,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("failed to allocate {bytes} bytes")]
    Alloc { bytes: usize },
    #[error("requested capacity {0} exceeds the addressable table size")]
    CapacityOverflow(usize),
}

/// Outcome of [`HashTable::put`].
#[derive(Debug, Eq, PartialEq)]
pub enum Put<V> {
    /// The key was new.
    Inserted,
    /// The key existed; carries the replaced value. Metadata is untouched.
    Updated(V),
}

impl<V> Put<V> {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Put::Inserted)
    }
}

/// Visitor verdict for [`HashTable::iterate`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Visit {
    Continue,
    Stop,
    /// Remove the visited entry and keep going.
    Delete,
    /// Remove the visited entry, then stop.
    DeleteAndStop,
}

pub struct HashTable<V, M = ()> {
    pub(crate) buckets: Vec<Option<Entry<V, M>>>,
    pub(crate) nodes: SlotMap<NodeKey, Entry<V, M>>,
    count: usize,
    max_size: usize,
}

fn load_limit(table_size: usize) -> usize {
    table_size / 4 * 3 + (table_size % 4) * 3 / 4
}

fn empty_buckets<V, M>(n: usize) -> Result<Vec<Option<Entry<V, M>>>, TableError> {
    let mut buckets = Vec::new();
    buckets
        .try_reserve_exact(n)
        .map_err(|_| TableError::Alloc {
            bytes: n.saturating_mul(mem::size_of::<Option<Entry<V, M>>>()),
        })?;
    buckets.resize_with(n, || None);
    Ok(buckets)
}

fn copy_key(key: &[u8]) -> Result<Box<[u8]>, TableError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(key.len())
        .map_err(|_| TableError::Alloc { bytes: key.len() })?;
    buf.extend_from_slice(key);
    Ok(buf.into_boxed_slice())
}

/// Places `entry` without comparing keys: the caller guarantees the key is
/// absent. Fills an empty head slot, otherwise appends an overflow node at
/// the chain tail.
fn link_unique<V, M>(
    buckets: &mut [Option<Entry<V, M>>],
    nodes: &mut SlotMap<NodeKey, Entry<V, M>>,
    mut entry: Entry<V, M>,
) {
    entry.next = None;
    let idx = bucket_index(&entry.key, buckets.len());
    let head = match &mut buckets[idx] {
        Some(head) => head,
        empty => {
            *empty = Some(entry);
            return;
        }
    };
    let node = nodes.insert(entry);
    match head.next {
        None => head.next = Some(node),
        Some(mut tail) => {
            while let Some(next) = nodes[tail].next {
                tail = next;
            }
            nodes[tail].next = Some(node);
        }
    }
}

impl<V, M> HashTable<V, M> {
    /// Table with [`DEFAULT_CAPACITY`] buckets.
    pub fn new() -> Self {
        Self {
            buckets: (0..DEFAULT_CAPACITY).map(|_| None).collect(),
            nodes: SlotMap::with_key(),
            count: 0,
            max_size: load_limit(DEFAULT_CAPACITY),
        }
    }

    /// Table with at least `min_capacity` buckets, rounded up to a power of
    /// two. Zero selects [`DEFAULT_CAPACITY`].
    pub fn with_capacity(min_capacity: usize) -> Result<Self, TableError> {
        let table_size = match min_capacity {
            0 => DEFAULT_CAPACITY,
            n => n
                .checked_next_power_of_two()
                .ok_or(TableError::CapacityOverflow(n))?,
        };
        Ok(Self {
            buckets: empty_buckets(table_size)?,
            nodes: SlotMap::with_key(),
            count: 0,
            max_size: load_limit(table_size),
        })
    }

    /// Number of live key/value pairs.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of buckets; always a power of two.
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Occupancy at which the next insert doubles the table.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Live overflow nodes, i.e. entries that are not the head of their chain.
    pub fn overflow_len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn find(&self, key: &[u8]) -> Option<Position> {
        let idx = bucket_index(key, self.buckets.len());
        let head = self.buckets[idx].as_ref()?;
        if head.matches(key) {
            return Some(Position::Head(idx));
        }
        let mut link = head.next;
        while let Some(nk) = link {
            let node = &self.nodes[nk];
            if node.matches(key) {
                return Some(Position::Node(nk));
            }
            link = node.next;
        }
        None
    }

    fn entry(&self, pos: Position) -> Option<&Entry<V, M>> {
        match pos {
            Position::Head(idx) => self.buckets[idx].as_ref(),
            Position::Node(nk) => self.nodes.get(nk),
        }
    }

    fn entry_mut(&mut self, pos: Position) -> Option<&mut Entry<V, M>> {
        match pos {
            Position::Head(idx) => self.buckets[idx].as_mut(),
            Position::Node(nk) => self.nodes.get_mut(nk),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&V> {
        self.get_entry(key).map(|(v, _)| v)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        self.get_entry_mut(key).map(|(v, _)| v)
    }

    /// Value and metadata stored under `key`.
    pub fn get_entry(&self, key: &[u8]) -> Option<(&V, &M)> {
        let pos = self.find(terminated(key))?;
        self.entry(pos).map(|e| (&e.value, &e.metadata))
    }

    pub fn get_entry_mut(&mut self, key: &[u8]) -> Option<(&mut V, &mut M)> {
        let pos = self.find(terminated(key))?;
        self.entry_mut(pos).map(|e| (&mut e.value, &mut e.metadata))
    }

    /// Metadata stored under `key`, for in-place edits.
    pub fn metadata_mut(&mut self, key: &[u8]) -> Option<&mut M> {
        self.get_entry_mut(key).map(|(_, m)| m)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.find(terminated(key)).is_some()
    }

    /// Inserts `key` or replaces the value of an existing key.
    ///
    /// On update the stored metadata is kept and `metadata` is dropped.
    /// When the table is at its load limit it doubles first. A failed
    /// allocation leaves the table as it was before the call.
    pub fn put(&mut self, key: &[u8], value: V, metadata: M) -> Result<Put<V>, TableError> {
        let key = terminated(key);
        // The key copy is the last fallible step after a doubling, so take
        // it before growing.
        let mut owned = None;
        if self.count + 1 > self.max_size {
            owned = Some(copy_key(key)?);
            self.grow()?;
        }

        if let Some(entry) = self.find(key).and_then(|pos| self.entry_mut(pos)) {
            return Ok(Put::Updated(mem::replace(&mut entry.value, value)));
        }

        let key = match owned {
            Some(owned) => owned,
            None => copy_key(key)?,
        };
        let entry = Entry {
            key,
            value,
            metadata,
            next: None,
        };
        link_unique(&mut self.buckets, &mut self.nodes, entry);
        self.count += 1;
        Ok(Put::Inserted)
    }

    /// Removes `key`; reports whether it was present.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.remove(key).is_some()
    }

    /// Removes `key`, handing back its value and metadata.
    pub fn remove(&mut self, key: &[u8]) -> Option<(V, M)> {
        let key = terminated(key);
        let idx = bucket_index(key, self.buckets.len());
        let head = self.buckets[idx].as_ref()?;
        if head.matches(key) {
            return self.unlink(idx, Link::Head).map(|e| (e.value, e.metadata));
        }

        let mut prev = None;
        let mut link = head.next;
        while let Some(nk) = link {
            let node = &self.nodes[nk];
            if node.matches(key) {
                return self
                    .unlink(idx, Link::Node { prev, node: nk })
                    .map(|e| (e.value, e.metadata));
            }
            prev = Some(nk);
            link = node.next;
        }
        None
    }

    /// Detaches one entry from the chain of bucket `idx`.
    ///
    /// A head with a follower is refilled from the follower, whose arena
    /// node is released; a lone head leaves the slot empty; an overflow
    /// node is spliced out of its predecessor's link and released.
    pub(crate) fn unlink(&mut self, idx: usize, at: Link) -> Option<Entry<V, M>> {
        let removed = match at {
            Link::Head => {
                let removed = self.buckets[idx].take()?;
                self.buckets[idx] = removed.next.and_then(|nk| self.nodes.remove(nk));
                removed
            }
            Link::Node { prev, node } => {
                let removed = self.nodes.remove(node)?;
                let pred = match prev {
                    None => self.buckets[idx].as_mut()?,
                    Some(p) => self.nodes.get_mut(p)?,
                };
                pred.next = removed.next;
                removed
            }
        };
        self.count -= 1;
        Some(removed)
    }

    /// Drops every entry. Bucket capacity is kept.
    pub fn clear(&mut self) {
        self.buckets.iter_mut().for_each(|slot| *slot = None);
        self.nodes.clear();
        self.count = 0;
    }

    /// Doubles the bucket array and moves every entry into it.
    ///
    /// Keys are known unique, so entries are relinked without comparison and
    /// their key buffers move rather than being copied. Old overflow nodes
    /// are released as their chains drain.
    fn grow(&mut self) -> Result<(), TableError> {
        let old_size = self.buckets.len();
        let new_size = old_size
            .checked_mul(2)
            .ok_or(TableError::CapacityOverflow(old_size))?;
        let new_buckets = empty_buckets(new_size)?;

        let new_nodes = SlotMap::with_capacity_and_key(self.nodes.len());
        let old_buckets = mem::replace(&mut self.buckets, new_buckets);
        let mut old_nodes = mem::replace(&mut self.nodes, new_nodes);
        for mut entry in old_buckets.into_iter().flatten() {
            loop {
                let next = entry.next.take();
                link_unique(&mut self.buckets, &mut self.nodes, entry);
                match next.and_then(|nk| old_nodes.remove(nk)) {
                    Some(e) => entry = e,
                    None => break,
                }
            }
        }
        debug_assert!(old_nodes.is_empty());

        self.max_size = load_limit(new_size);
        log::debug!(
            "hash table grew from {old_size} to {new_size} buckets ({} entries, {} overflow)",
            self.count,
            self.nodes.len()
        );
        Ok(())
    }

    /// Visits every entry in bucket order, then chain order.
    ///
    /// The visitor may remove the entry it is looking at; the walk then
    /// resumes at the entry that logically followed it. Returns `true` when
    /// a visit asked to stop.
    pub fn iterate<F>(&mut self, mut visit: F) -> bool
    where
        F: FnMut(&[u8], &mut V, &mut M) -> Visit,
    {
        let mut cursor = self.cursor();
        while let Some((key, value, metadata)) = cursor.current_mut() {
            match visit(key, value, metadata) {
                Visit::Continue => cursor.advance(),
                Visit::Stop => return true,
                Visit::Delete => {
                    cursor.delete_current();
                }
                Visit::DeleteAndStop => {
                    cursor.delete_current();
                    return true;
                }
            }
        }
        false
    }

    /// Cursor over all entries, positioned at the first one.
    pub fn cursor(&mut self) -> Cursor<'_, V, M> {
        Cursor::new(self)
    }

    pub fn iter(&self) -> Iter<'_, V, M> {
        Iter {
            table: self,
            bucket: 0,
            pending: None,
            remaining: self.count,
        }
    }
}

impl<V, M> Default for HashTable<V, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, M> core::fmt::Debug for HashTable<V, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HashTable")
            .field("count", &self.count)
            .field("table_size", &self.buckets.len())
            .field("max_size", &self.max_size)
            .field("overflow", &self.nodes.len())
            .finish()
    }
}

/// Iterator over `(key, value, metadata)` in bucket order, then chain order.
pub struct Iter<'a, V, M> {
    table: &'a HashTable<V, M>,
    bucket: usize,
    pending: Option<NodeKey>,
    remaining: usize,
}

impl<'a, V, M> Iterator for Iter<'a, V, M> {
    type Item = (&'a [u8], &'a V, &'a M);

    fn next(&mut self) -> Option<Self::Item> {
        let table = self.table;
        let entry = match self.pending {
            Some(nk) => &table.nodes[nk],
            None => loop {
                let slot = table.buckets.get(self.bucket)?;
                self.bucket += 1;
                if let Some(head) = slot {
                    break head;
                }
            },
        };
        self.pending = entry.next;
        self.remaining -= 1;
        Some((&*entry.key, &entry.value, &entry.metadata))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V, M> ExactSizeIterator for Iter<'_, V, M> {}

impl<'a, V, M> IntoIterator for &'a HashTable<V, M> {
    type Item = (&'a [u8], &'a V, &'a M);
    type IntoIter = Iter<'a, V, M>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
