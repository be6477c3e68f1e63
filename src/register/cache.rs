//! Two-level write-through register cache with sequential prefetch (C3).
//!
//! Wraps a [`RegisterFile`] with `cached_get`/`cached_set`. Caching only
//! ever applies to the boxed value path — the typed shadow pane lives on
//! the register file itself and is read/written directly by typed
//! fast-path handlers (§4.3), bypassing this cache entirely.

use std::collections::VecDeque;

use super::{
    RegId,
    RegisterFile,
    RegisterTier,
};
use crate::{
    consts::{
        CACHE_DISABLE_HIT_RATE,
        CACHE_REENABLE_HIT_RATE,
        CACHE_WARMUP_ACCESSES,
        L1_CACHE_SIZE,
        L2_CACHE_SIZE,
        PREFETCH_BUFFER_SIZE,
        PREFETCH_LOOKAHEAD,
    },
    value::Value,
};

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    reg_id: RegId,
    value: Value,
    dirty: bool,
    last_access: u64,
    hits: u32,
}

/// Whether a register id is eligible for caching at all.
///
/// Globals, frame registers and module slots are long-lived across many
/// instructions; temps are scratch within a single basic block and would
/// only pollute the cache with entries that are read once and discarded.
pub fn should_cache(id: RegId) -> bool {
    !matches!(id.tier(), RegisterTier::Temp)
}

/// The two-level cache plus its backing register file.
#[derive(Debug)]
pub struct RegisterCache {
    backing: RegisterFile,
    l1: [Option<CacheEntry>; L1_CACHE_SIZE],
    l2: Vec<CacheEntry>,
    prefetch: VecDeque<(RegId, Value)>,
    clock: u64,
    accesses: u64,
    hits: u64,
    enabled: bool,
}

impl Default for RegisterCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterCache {
    /// A fresh cache over an empty register file, enabled by default.
    pub fn new() -> Self {
        RegisterCache {
            backing: RegisterFile::new(),
            l1: [None; L1_CACHE_SIZE],
            l2: Vec::with_capacity(L2_CACHE_SIZE),
            prefetch: VecDeque::with_capacity(PREFETCH_BUFFER_SIZE),
            clock: 0,
            accesses: 0,
            hits: 0,
            enabled: true,
        }
    }

    /// Direct access to the backing register file, for typed-shadow reads
    /// and writes (§4.3) and for GC root collection, neither of which goes
    /// through this cache.
    pub fn register_file(&self) -> &RegisterFile {
        &self.backing
    }

    /// Mutable direct access, see [`RegisterCache::register_file`].
    pub fn register_file_mut(&mut self) -> &mut RegisterFile {
        &mut self.backing
    }

    /// Whether caching is currently active (see the adaptive disable
    /// heuristic on [`RegisterCache::cached_get`]).
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn l1_slot(id: RegId) -> usize {
        id.raw() as usize % L1_CACHE_SIZE
    }

    /// Read a value, consulting prefetch buffer → L1 → L2 → backing store,
    /// in that order, promoting L2 hits to L1 and prefetching a forward
    /// window on a full miss.
    pub fn cached_get(&mut self, id: RegId) -> Value {
        if !self.enabled {
            // Caching is disabled, so don't serve or reshuffle L1/L2/
            // prefetch, but `cached_set` keeps writing through to them
            // regardless of `enabled` (see below), so their presence still
            // tells us whether this access *would* have hit. Tracking that
            // keeps feeding `record_access`, which is what makes the
            // re-enable branch below reachable once the hit rate recovers.
            let would_hit = self.prefetch.iter().any(|&(r, _)| r == id)
                || self.l1[Self::l1_slot(id)].is_some_and(|e| e.reg_id == id)
                || self.l2.iter().any(|e| e.reg_id == id);
            self.record_access(would_hit);
            return self.backing.get(id);
        }

        if let Some(pos) = self.prefetch.iter().position(|&(r, _)| r == id) {
            let (_, value) = self.prefetch[pos];
            self.record_access(true);
            return value;
        }

        let slot = Self::l1_slot(id);
        if let Some(entry) = self.l1[slot].as_mut().filter(|e| e.reg_id == id) {
            entry.hits += 1;
            entry.last_access = self.clock;
            let value = entry.value;
            self.tick();
            self.record_access(true);
            return value;
        }

        if let Some(pos) = self.l2.iter().position(|e| e.reg_id == id) {
            let mut entry = self.l2.remove(pos);
            entry.last_access = self.clock;
            entry.hits += 1;
            let value = entry.value;
            self.promote_to_l1(entry);
            self.tick();
            self.record_access(true);
            return value;
        }

        let value = self.backing.get(id);
        if should_cache(id) {
            self.insert(id, value, false);
        }
        self.prefetch_window(id);
        self.tick();
        self.record_access(false);
        value
    }

    /// Write a value: always updates the backing store immediately (this is
    /// a write-*through* cache, never write-back), then updates any cached
    /// copy in place or inserts a fresh one when policy permits.
    pub fn cached_set(&mut self, id: RegId, value: Value) {
        self.backing.set(id, value);

        let slot = Self::l1_slot(id);
        if let Some(entry) = self.l1[slot].as_mut().filter(|e| e.reg_id == id) {
            entry.value = value;
            entry.dirty = true;
            entry.last_access = self.clock;
            self.tick();
            return;
        }

        if let Some(entry) = self.l2.iter_mut().find(|e| e.reg_id == id) {
            entry.value = value;
            entry.dirty = true;
            entry.last_access = self.clock;
            self.tick();
            return;
        }

        if should_cache(id) {
            self.insert(id, value, true);
        }
        self.tick();
    }

    fn insert(&mut self, id: RegId, value: Value, dirty: bool) {
        let entry = CacheEntry {
            reg_id: id,
            value,
            dirty,
            last_access: self.clock,
            hits: 0,
        };
        let slot = Self::l1_slot(id);
        if let Some(evicted) = self.l1[slot].replace(entry) {
            self.writeback(&evicted);
            self.insert_l2(evicted);
        }
    }

    fn promote_to_l1(&mut self, entry: CacheEntry) {
        let slot = Self::l1_slot(entry.reg_id);
        if let Some(evicted) = self.l1[slot].replace(entry) {
            self.writeback(&evicted);
            self.insert_l2(evicted);
        }
    }

    fn insert_l2(&mut self, entry: CacheEntry) {
        if self.l2.len() >= L2_CACHE_SIZE {
            if let Some((lru_pos, _)) = self
                .l2
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.last_access)
            {
                let evicted = self.l2.remove(lru_pos);
                self.writeback(&evicted);
            }
        }
        self.l2.push(entry);
    }

    fn writeback(&mut self, entry: &CacheEntry) {
        if entry.dirty {
            self.backing.set(entry.reg_id, entry.value);
        }
    }

    fn prefetch_window(&mut self, id: RegId) {
        let base = id.index();
        for offset in 1..=PREFETCH_LOOKAHEAD as u16 {
            let Some(next_index) = base.checked_add(offset) else {
                break;
            };
            let next_id = RegId::new(id.tier(), next_index);
            let value = self.backing.get(next_id);
            if self.prefetch.len() >= PREFETCH_BUFFER_SIZE {
                self.prefetch.pop_front();
            }
            self.prefetch.push_back((next_id, value));
        }
    }

    fn record_access(&mut self, hit: bool) {
        self.accesses += 1;
        if hit {
            self.hits += 1;
        }
        if self.accesses < CACHE_WARMUP_ACCESSES {
            return;
        }
        let hit_rate = self.hits as f64 / self.accesses as f64;
        if self.enabled && hit_rate < CACHE_DISABLE_HIT_RATE {
            tracing::debug!(hit_rate, "register cache: adaptive disable");
            self.enabled = false;
        } else if !self.enabled && hit_rate > CACHE_REENABLE_HIT_RATE {
            tracing::debug!(hit_rate, "register cache: adaptive re-enable");
            self.enabled = true;
        }
    }

    /// Write every dirty entry back to the backing register file.
    ///
    /// Because this is a write-through cache, every entry is already
    /// reflected in the backing store by the time it is marked dirty; this
    /// walk exists to uphold the cache-write-through testable property
    /// (§8) explicitly and to clear dirty flags before a GC mark phase, per
    /// the "flush before mark" ordering rule (§5).
    pub fn flush(&mut self) {
        for entry in self.l1.iter_mut().flatten() {
            if entry.dirty {
                self.backing.set(entry.reg_id, entry.value);
                entry.dirty = false;
            }
        }
        for entry in self.l2.iter_mut() {
            if entry.dirty {
                self.backing.set(entry.reg_id, entry.value);
                entry.dirty = false;
            }
        }
    }

    /// Whether any cache entry is currently dirty. Should always be `false`
    /// immediately after [`RegisterCache::flush`].
    pub fn has_dirty_entries(&self) -> bool {
        self.l1.iter().flatten().any(|e| e.dirty) || self.l2.iter().any(|e| e.dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::RegisterTier;

    #[test]
    fn write_through_is_visible_on_backing_store_immediately() {
        let mut cache = RegisterCache::new();
        let r = RegId::new(RegisterTier::Global, 1);
        cache.cached_set(r, Value::I32(9));
        assert_eq!(cache.register_file().get(r), Value::I32(9));
    }

    #[test]
    fn flush_clears_all_dirty_entries() {
        let mut cache = RegisterCache::new();
        let r = RegId::new(RegisterTier::Frame, 2);
        cache.cached_set(r, Value::I32(1));
        assert!(cache.has_dirty_entries());
        cache.flush();
        assert!(!cache.has_dirty_entries());
        assert_eq!(cache.register_file().get(r), Value::I32(1));
    }

    #[test]
    fn temps_are_not_cached() {
        assert!(!should_cache(RegId::new(RegisterTier::Temp, 0)));
        assert!(should_cache(RegId::new(RegisterTier::Global, 0)));
        assert!(should_cache(RegId::new(RegisterTier::Frame, 0)));
        assert!(should_cache(RegId::new(RegisterTier::Module, 0)));
    }

    #[test]
    fn l2_hit_promotes_entry_to_l1() {
        let mut cache = RegisterCache::new();
        // Fill L1 slot 0 with a colliding id so the next insert is evicted to L2.
        let a = RegId::new(RegisterTier::Global, 0);
        let b = RegId::new(RegisterTier::Global, L1_CACHE_SIZE as u16);
        cache.cached_set(a, Value::I32(1));
        cache.cached_set(b, Value::I32(2)); // same L1 slot as `a`, evicts it to L2

        // `a` should now be served from L2.
        let value = cache.cached_get(a);
        assert_eq!(value, Value::I32(1));
    }

    #[test]
    fn repeated_misses_eventually_disable_caching() {
        let mut cache = RegisterCache::new();
        // Every access targets a distinct temp register, which is never
        // cached, so the hit rate stays at zero.
        for i in 0..(CACHE_WARMUP_ACCESSES + 10) as u16 {
            let r = RegId::new(RegisterTier::Temp, i % 4000);
            cache.cached_get(r);
        }
        assert!(!cache.is_enabled());
    }

    #[test]
    fn a_recovered_hit_rate_re_enables_a_disabled_cache() {
        let mut cache = RegisterCache::new();
        for i in 0..(CACHE_WARMUP_ACCESSES + 10) as u16 {
            let r = RegId::new(RegisterTier::Temp, i % 4000);
            cache.cached_get(r);
        }
        assert!(!cache.is_enabled());

        // `cached_set` writes through L1/L2 regardless of `enabled`, so a
        // cached-but-disabled register is still a shadow hit on every later
        // `cached_get` of the same id, even though disabled mode never
        // serves from the cache.
        let r = RegId::new(RegisterTier::Global, 0);
        cache.cached_set(r, Value::I32(1));
        for _ in 0..5000 {
            cache.cached_get(r);
        }
        assert!(cache.is_enabled(), "a recovered hit rate should re-enable the cache");
    }
}
