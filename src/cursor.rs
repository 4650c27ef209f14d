//! Cursor: a walk over a `HashTable` that may delete the entry it is on.
//!
//! The cursor always rests on a live entry or past the end. After
//! `delete_current` it rests on whatever logically followed the removed
//! entry:
//! - removed head with a follower: the follower, now zipped into the head
//!   slot, so the cursor stays on the same bucket head;
//! - removed lone head: the first entry of the next occupied bucket;
//! - removed overflow node: the node after it, with the same predecessor.

use crate::hash_table::{Entry, HashTable, Link, NodeKey};

#[derive(Copy, Clone, Debug)]
enum At {
    Head,
    Node {
        prev: Option<NodeKey>,
        node: NodeKey,
    },
    End,
}

pub struct Cursor<'a, V, M> {
    table: &'a mut HashTable<V, M>,
    bucket: usize,
    at: At,
}

impl<'a, V, M> Cursor<'a, V, M> {
    pub(crate) fn new(table: &'a mut HashTable<V, M>) -> Self {
        let mut cursor = Cursor {
            table,
            bucket: 0,
            at: At::End,
        };
        cursor.seek_bucket(0);
        cursor
    }

    /// Rest on the head of the first occupied bucket at or after `from`.
    fn seek_bucket(&mut self, from: usize) {
        let found = self.table.buckets[from.min(self.table.buckets.len())..]
            .iter()
            .position(Option::is_some);
        match found {
            Some(offset) => {
                self.bucket = from + offset;
                self.at = At::Head;
            }
            None => {
                self.bucket = self.table.buckets.len();
                self.at = At::End;
            }
        }
    }

    fn entry(&self) -> Option<&Entry<V, M>> {
        match self.at {
            At::Head => self.table.buckets[self.bucket].as_ref(),
            At::Node { node, .. } => self.table.nodes.get(node),
            At::End => None,
        }
    }

    fn entry_mut(&mut self) -> Option<&mut Entry<V, M>> {
        match self.at {
            At::Head => self.table.buckets[self.bucket].as_mut(),
            At::Node { node, .. } => self.table.nodes.get_mut(node),
            At::End => None,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self.at, At::End)
    }

    pub fn current(&self) -> Option<(&[u8], &V, &M)> {
        self.entry().map(|e| (&*e.key, &e.value, &e.metadata))
    }

    pub fn current_mut(&mut self) -> Option<(&[u8], &mut V, &mut M)> {
        self.entry_mut()
            .map(|e| (&*e.key, &mut e.value, &mut e.metadata))
    }

    /// Moves to the next entry in bucket order, then chain order.
    pub fn advance(&mut self) {
        let (next, prev) = match self.at {
            At::Head => (self.entry().and_then(|e| e.next), None),
            At::Node { node, .. } => (self.entry().and_then(|e| e.next), Some(node)),
            At::End => return,
        };
        match next {
            Some(node) => self.at = At::Node { prev, node },
            None => self.seek_bucket(self.bucket + 1),
        }
    }

    /// Removes the entry under the cursor and returns its parts. The cursor
    /// moves onto the entry that followed it.
    pub fn delete_current(&mut self) -> Option<(Box<[u8]>, V, M)> {
        let removed = match self.at {
            At::Head => {
                let removed = self.table.unlink(self.bucket, Link::Head)?;
                // A zipped follower now occupies the head; visit it next.
                if self.table.buckets[self.bucket].is_none() {
                    self.seek_bucket(self.bucket + 1);
                }
                removed
            }
            At::Node { prev, node } => {
                let removed = self.table.unlink(self.bucket, Link::Node { prev, node })?;
                match removed.next {
                    Some(next) => self.at = At::Node { prev, node: next },
                    None => self.seek_bucket(self.bucket + 1),
                }
                removed
            }
            At::End => return None,
        };
        Some((removed.key, removed.value, removed.metadata))
    }
}

impl<V, M> Iterator for Cursor<'_, V, M>
where
    V: Clone,
    M: Clone,
{
    type Item = (Box<[u8]>, V, M);

    /// Owned snapshot of the current entry, then advance.
    fn next(&mut self) -> Option<Self::Item> {
        let item = self
            .current()
            .map(|(k, v, m)| (Box::from(k), v.clone(), m.clone()))?;
        self.advance();
        Some(item)
    }
}
