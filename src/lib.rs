//! statsrelay: the per-key tracking core of a statsd relay.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a byte-keyed hash table that a relay worker can hammer with
//!   insert/update/lookup/delete, grow without pausing, and walk while
//!   deleting entries (expiry, flush), plus the pieces that feed it.
//! - Layers:
//!   - `hash`: murmur3 (x86, 32-bit, seed 0) and bucket indexing.
//!   - `HashTable<V, M>`: separately chained buckets. Each bucket keeps its
//!     chain head inline in the backing array; the rest of the chain lives
//!     in a generational arena of overflow nodes.
//!   - `Cursor`: a walk over the table that can delete the entry under it
//!     and knows where to resume. `HashTable::iterate` is built on it.
//!   - `validate`: statsd line classification into `(key, value, type,
//!     rate)`.
//!   - `config`: JSON configuration (routing, sampling, expiry).
//!   - `Sampler`: a table client that tracks per-key hit counts per window,
//!     folds hot counters, gauges and timers into aggregates, and expires
//!     idle keys.
//!
//! Constraints
//! - Single writer. Every mutating call takes `&mut self`; there are no
//!   locks inside the table. Workers that need tracking own their own
//!   table rather than sharing one.
//! - Keys are terminator-delimited byte strings: the first NUL byte ends
//!   the key. Values and metadata are opaque to the table.
//! - Unique keys. `put` on an existing key replaces the value and keeps
//!   the metadata.
//!
//! Inline heads and overflow nodes
//! - The head entry of a chain is stored in the bucket slot itself and is
//!   never allocated or freed on its own. Overflow nodes are inserted into
//!   and removed from the arena individually.
//! - Removing a head that has a follower copies ("zips") the follower into
//!   the head slot and releases the follower's node, so a non-empty bucket
//!   always has its first entry inline.
//!
//! Growth
//! - The bucket count is a power of two. When `len + 1` would exceed
//!   three quarters of it, `put` doubles the table before inserting.
//!   Existing entries are relinked without key comparisons and their key
//!   buffers move, not copy.
//! - Iteration order is bucket order, then chain order, and is not stable
//!   across growth.
//!
//! Failure
//! - Allocation failures of the bucket array or a key buffer come back as
//!   `TableError` and leave the table unchanged. Absent keys are a normal
//!   negative result.

pub mod config;
pub mod cursor;
pub mod hash;
pub mod hash_table;
mod hash_table_proptest;
pub mod sampler;
pub mod validate;

// Public surface
pub use config::{Config, ConfigError};
pub use cursor::Cursor;
pub use hash_table::{HashTable, Put, TableError, Visit};
pub use sampler::{Decision, Reservoir, Sampler, SamplerConfig};
pub use validate::{validate_statsd, MetricType, ParsedLine, ValidateError};
