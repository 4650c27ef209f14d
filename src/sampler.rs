//! Sampler: per-key rate tracking on top of `HashTable`.
//!
//! Every counter, gauge or timer key seen is tracked with its hit count in
//! the current window; the entry metadata holds the time the key was last
//! seen. Once a key exceeds its class threshold within a window, further
//! lines are folded into one aggregate instead of being forwarded, and
//! `flush` emits that aggregate as statsd lines:
//! - counters: the sum of `value / rate`, as one `key:sum|c` line;
//! - gauges: the last value, as one `key:value|g` line;
//! - timers: a uniform reservoir of at most `reservoir_size` samples, each
//!   emitted as `key:value|ms|@rate` where the rate scales the emitted
//!   lines back to the number of values absorbed. With `timer_flush_min_max`
//!   the true minimum and maximum are emitted as well.
//!
//! Tracked keys that stop arriving are dropped after the configured TTL,
//! by walking the table and deleting stale entries in place.

use crate::config::AdditionalConfig;
use crate::hash_table::{HashTable, TableError, Visit};
use crate::validate::{MetricType, ParsedLine};
use rand::Rng;
use rand_pcg::Pcg32;

// Default PCG32 state and stream.
const RNG_STATE: u64 = 0xcafe_f00d_d15e_a5e5;
const RNG_STREAM: u64 = 0x0a02_bdbf_7bb3_c0a7;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SamplerConfig {
    /// Counter hits per window before sampling starts; 0 disables.
    pub threshold: u32,
    /// Counter window in seconds; 0 means the window only ends at `flush`.
    pub window: u32,
    pub gauge_threshold: u32,
    pub gauge_window: u32,
    pub timer_threshold: u32,
    pub timer_window: u32,
    /// Tracked counter keys before new ones overflow; 0 is unlimited.
    pub max_counters: u32,
    pub max_gauges: u32,
    pub max_timers: u32,
    /// Also emit the true min and max of every sampled timer.
    pub timer_flush_min_max: bool,
    /// Samples kept per sampled timer.
    pub reservoir_size: u32,
    /// Seconds between expiry passes.
    pub expiry_frequency: u32,
    /// Seconds a key may go unseen before it is dropped; 0 keeps keys forever.
    pub ttl: u32,
}

impl From<&AdditionalConfig> for SamplerConfig {
    fn from(c: &AdditionalConfig) -> Self {
        Self {
            threshold: c.sampling_threshold,
            window: c.sampling_window,
            gauge_threshold: c.gauge_sampling_threshold,
            gauge_window: c.gauge_sampling_window,
            timer_threshold: c.timer_sampling_threshold,
            timer_window: c.timer_sampling_window,
            max_counters: c.max_counters,
            max_gauges: c.max_gauges,
            max_timers: c.max_timers,
            timer_flush_min_max: c.timer_flush_min_max,
            reservoir_size: c.reservoir_size,
            expiry_frequency: c.hm_key_expiration_frequency_in_seconds,
            ttl: c.hm_key_ttl_in_seconds,
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self::from(&AdditionalConfig::default())
    }
}

impl SamplerConfig {
    /// `(threshold, window, max_keys)` of the class `ty` belongs to.
    fn limits(&self, ty: MetricType) -> Option<(u32, u32, u32)> {
        match ty {
            MetricType::Counter => Some((self.threshold, self.window, self.max_counters)),
            MetricType::Gauge => Some((self.gauge_threshold, self.gauge_window, self.max_gauges)),
            MetricType::Timer => Some((self.timer_threshold, self.timer_window, self.max_timers)),
            _ => None,
        }
    }
}

/// What the caller should do with a line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    /// Send the line on unchanged.
    Forward,
    /// Absorbed into an aggregate that `flush` will emit.
    Sampled,
    /// The class already tracks its maximum number of keys.
    Overflow,
    /// Not a type this sampler handles.
    Ignored,
}

/// Uniform sample of the timer values seen in one window (algorithm R).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Reservoir {
    samples: Vec<f64>,
    seen: u64,
    /// Values represented, counting each line as `1 / rate`.
    weight: f64,
    min: f64,
    max: f64,
}

impl Reservoir {
    fn add<R: Rng>(&mut self, value: f64, rate: f64, capacity: usize, rng: &mut R) {
        if self.seen == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.seen += 1;
        self.weight += if rate > 0.0 { 1.0 / rate } else { 1.0 };

        if self.samples.len() < capacity {
            self.samples.push(value);
        } else if capacity > 0 {
            let slot = rng.random_range(0..self.seen);
            if slot < capacity as u64 {
                self.samples[slot as usize] = value;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Aggregate {
    Sum(f64),
    Last(f64),
    Timer(Reservoir),
}

impl Aggregate {
    fn empty(ty: MetricType) -> Self {
        match ty {
            MetricType::Gauge => Aggregate::Last(0.0),
            MetricType::Timer => Aggregate::Timer(Reservoir::default()),
            _ => Aggregate::Sum(0.0),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SampleState {
    ty: MetricType,
    hits: u32,
    sampling: bool,
    window_start: u64,
    aggregate: Aggregate,
    pending: bool,
}

impl SampleState {
    fn new(ty: MetricType, now: u64) -> Self {
        Self {
            ty,
            hits: 0,
            sampling: false,
            window_start: now,
            aggregate: Aggregate::empty(ty),
            pending: false,
        }
    }

    /// Starts a new window. An unflushed aggregate is kept for `flush`.
    fn roll_window(&mut self, now: u64) {
        self.hits = 0;
        self.sampling = false;
        self.window_start = now;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KeyMeta {
    pub last_seen: u64,
}

#[derive(Copy, Clone, Debug, Default)]
struct Budget {
    tracked: usize,
    overflowed: bool,
}

#[derive(Copy, Clone, Debug, Default)]
struct Budgets {
    counters: Budget,
    gauges: Budget,
    timers: Budget,
}

impl Budgets {
    fn get(&self, ty: MetricType) -> Option<&Budget> {
        match ty {
            MetricType::Counter => Some(&self.counters),
            MetricType::Gauge => Some(&self.gauges),
            MetricType::Timer => Some(&self.timers),
            _ => None,
        }
    }

    fn get_mut(&mut self, ty: MetricType) -> Option<&mut Budget> {
        match ty {
            MetricType::Counter => Some(&mut self.counters),
            MetricType::Gauge => Some(&mut self.gauges),
            MetricType::Timer => Some(&mut self.timers),
            _ => None,
        }
    }

    fn release(&mut self, ty: MetricType) {
        if let Some(b) = self.get_mut(ty) {
            b.tracked -= 1;
        }
    }
}

#[derive(Debug)]
pub struct Sampler {
    config: SamplerConfig,
    table: HashTable<SampleState, KeyMeta>,
    budgets: Budgets,
    rng: Pcg32,
    last_expiry: u64,
}

impl Sampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self::with_table(config, HashTable::new())
    }

    pub fn with_capacity(config: SamplerConfig, min_capacity: usize) -> Result<Self, TableError> {
        Ok(Self::with_table(config, HashTable::with_capacity(min_capacity)?))
    }

    fn with_table(config: SamplerConfig, table: HashTable<SampleState, KeyMeta>) -> Self {
        Self {
            config,
            table,
            budgets: Budgets::default(),
            rng: Pcg32::new(RNG_STATE, RNG_STREAM),
            last_expiry: 0,
        }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Number of tracked keys across all classes.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn is_tracking(&self, key: &[u8]) -> bool {
        self.table.contains_key(key)
    }

    /// Whether `key` is currently being aggregated instead of forwarded.
    pub fn is_sampling(&self, key: &[u8]) -> bool {
        self.table.get(key).is_some_and(|s| s.sampling)
    }

    pub fn last_seen(&self, key: &[u8]) -> Option<u64> {
        self.table.get_entry(key).map(|(_, m)| m.last_seen)
    }

    /// Samples currently held for timer `key`.
    pub fn reservoir(&self, key: &[u8]) -> Option<&Reservoir> {
        match &self.table.get(key)?.aggregate {
            Aggregate::Timer(r) => Some(r),
            _ => None,
        }
    }

    /// Whether a new key of class `ty` was turned away since the last flush.
    pub fn overflowed(&self, ty: MetricType) -> bool {
        self.budgets.get(ty).is_some_and(|b| b.overflowed)
    }

    /// Classifies `line` seen at `now` (seconds).
    pub fn consider(&mut self, line: &ParsedLine<'_>, now: u64) -> Result<Decision, TableError> {
        let Some((threshold, window, max_keys)) = self.config.limits(line.ty) else {
            return Ok(Decision::Ignored);
        };
        if threshold == 0 {
            return Ok(Decision::Forward);
        }

        if let Some((state, meta)) = self.table.get_entry_mut(line.key) {
            if state.ty != line.ty {
                return Ok(Decision::Forward);
            }
            meta.last_seen = now;
            if window > 0 && now.saturating_sub(state.window_start) >= u64::from(window) {
                state.roll_window(now);
            }
            state.hits = state.hits.saturating_add(1);
            if !state.sampling && state.hits <= threshold {
                return Ok(Decision::Forward);
            }
            if !state.sampling {
                log::debug!(
                    "sampling {} {:?} after {} hits",
                    line.ty,
                    String::from_utf8_lossy(line.key),
                    state.hits
                );
            }
            state.sampling = true;
            state.pending = true;
            match &mut state.aggregate {
                Aggregate::Sum(sum) => {
                    *sum += if line.presampling_rate > 0.0 {
                        line.value / line.presampling_rate
                    } else {
                        line.value
                    }
                }
                Aggregate::Last(last) => *last = line.value,
                Aggregate::Timer(reservoir) => reservoir.add(
                    line.value,
                    line.presampling_rate,
                    self.config.reservoir_size as usize,
                    &mut self.rng,
                ),
            }
            return Ok(Decision::Sampled);
        }

        let Some(budget) = self.budgets.get_mut(line.ty) else {
            return Ok(Decision::Ignored);
        };
        if max_keys > 0 && budget.tracked >= max_keys as usize {
            if !budget.overflowed {
                log::warn!(
                    "{} key limit {max_keys} reached, dropping {:?}",
                    line.ty,
                    String::from_utf8_lossy(line.key)
                );
            }
            budget.overflowed = true;
            return Ok(Decision::Overflow);
        }

        let mut state = SampleState::new(line.ty, now);
        state.hits = 1;
        self.table.put(line.key, state, KeyMeta { last_seen: now })?;
        if let Some(budget) = self.budgets.get_mut(line.ty) {
            budget.tracked += 1;
        }
        Ok(Decision::Forward)
    }

    /// Emits the aggregate of every sampled key through `emit`, starts a new
    /// window for every key, and drops keys unseen for longer than the TTL.
    /// Returns the number of lines emitted.
    pub fn flush<F>(&mut self, now: u64, mut emit: F) -> usize
    where
        F: FnMut(&[u8]),
    {
        let ttl = self.config.ttl;
        let min_max = self.config.timer_flush_min_max;
        let Self { table, budgets, .. } = self;

        let mut line = Vec::new();
        let mut emitted = 0;
        let mut expired = 0;
        table.iterate(|key, state, meta| {
            if state.pending {
                emitted += emit_aggregate(key, &state.aggregate, min_max, &mut line, &mut emit);
            }
            state.roll_window(now);
            state.pending = false;
            state.aggregate = Aggregate::empty(state.ty);

            if is_stale(ttl, meta, now) {
                budgets.release(state.ty);
                expired += 1;
                Visit::Delete
            } else {
                Visit::Continue
            }
        });
        budgets.counters.overflowed = false;
        budgets.gauges.overflowed = false;
        budgets.timers.overflowed = false;

        log::debug!("sampler flushed {emitted} lines, expired {expired} keys");
        emitted
    }

    /// Drops keys unseen for longer than the TTL, at most once per expiry
    /// period. Keys holding an unflushed aggregate are kept. Returns the
    /// number of keys removed.
    pub fn expire(&mut self, now: u64) -> usize {
        let (ttl, frequency) = (self.config.ttl, self.config.expiry_frequency);
        if ttl == 0 || frequency == 0 {
            return 0;
        }
        if now < self.last_expiry.saturating_add(u64::from(frequency)) {
            return 0;
        }
        self.last_expiry = now;

        let Self { table, budgets, .. } = self;
        let mut expired = 0;
        table.iterate(|_, state, meta| {
            if state.pending || !is_stale(ttl, meta, now) {
                return Visit::Continue;
            }
            budgets.release(state.ty);
            expired += 1;
            Visit::Delete
        });
        log::trace!("expired {expired} keys, {} tracked", table.len());
        expired
    }
}

fn is_stale(ttl: u32, meta: &KeyMeta, now: u64) -> bool {
    ttl > 0 && now.saturating_sub(meta.last_seen) >= u64::from(ttl)
}

fn push_line<F: FnMut(&[u8])>(line: &mut Vec<u8>, key: &[u8], body: &str, emit: &mut F) {
    line.clear();
    line.extend_from_slice(key);
    line.extend_from_slice(body.as_bytes());
    emit(line.as_slice());
}

/// Writes the lines for one aggregate; returns how many were emitted.
fn emit_aggregate<F: FnMut(&[u8])>(
    key: &[u8],
    aggregate: &Aggregate,
    min_max: bool,
    line: &mut Vec<u8>,
    emit: &mut F,
) -> usize {
    match aggregate {
        Aggregate::Sum(sum) => {
            push_line(line, key, &format!(":{sum}|c"), emit);
            1
        }
        Aggregate::Last(last) => {
            push_line(line, key, &format!(":{last}|g"), emit);
            1
        }
        Aggregate::Timer(r) => {
            let pair = [r.min, r.max];
            let extremes: &[f64] = if min_max { &pair } else { &[] };
            let lines = extremes.len() + r.samples.len();
            if lines == 0 || r.weight <= 0.0 {
                return 0;
            }
            let rate = (lines as f64 / r.weight).min(1.0);
            for value in extremes.iter().chain(&r.samples) {
                let body = if rate < 1.0 {
                    format!(":{value}|ms|@{rate}")
                } else {
                    format!(":{value}|ms")
                };
                push_line(line, key, &body, emit);
            }
            lines
        }
    }
}
