//! Profiler (C6): per-function hit counts and hot-path sampling.
//!
//! Profiling is sampling-friendly by design: the interpreter's dispatch loop
//! checks one global [`Profiler::is_active`] flag before touching any
//! counter, and an [`EnabledFlags`] bitfield gates which categories are
//! recorded even when active. Hit counts monotonically grow during a run
//! and are exposed to [`crate::specialize`] as [`ProfilingFeedback`].

use hashbrown::HashMap;

use crate::consts::SPECIALIZATION_HIT_THRESHOLD;

bitflags::bitflags! {
    /// Which profiling categories are currently recorded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EnabledFlags: u8 {
        /// Per-function call-entry hit counts.
        const FUNCTION_HITS = 0b001;
        /// Loop back-edge hot-path samples.
        const HOT_PATHS = 0b010;
        /// Per-instruction tier counters.
        const INSTRUCTION_TIERS = 0b100;
    }
}

impl Default for EnabledFlags {
    fn default() -> Self {
        EnabledFlags::FUNCTION_HITS | EnabledFlags::HOT_PATHS
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct FunctionStats {
    hit_count: u64,
    arity: u8,
}

/// One hot-path sample: a loop back-edge address and how many times it has
/// been observed taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HotPathSample {
    /// Bytecode offset of the back-edge.
    pub address: u32,
    /// Cumulative iteration count observed at this address.
    pub iteration_count: u64,
}

/// A snapshot of a function's profiling data, as handed to the
/// specialization stage (§3 `ProfilingFeedback`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfilingFeedback {
    /// Observed call-entry count.
    pub hit_count: u64,
    /// Declared arity.
    pub arity: u8,
    /// Whether `hit_count` has crossed [`SPECIALIZATION_HIT_THRESHOLD`].
    pub eligible: bool,
}

/// Accumulates function hit counts and hot-path samples during execution.
#[derive(Debug)]
pub struct Profiler {
    enabled_flags: EnabledFlags,
    is_active: bool,
    functions: HashMap<u32, FunctionStats>,
    hot_paths: HashMap<u32, u64>,
    specialization_threshold: u64,
}

impl Default for Profiler {
    fn default() -> Self {
        Profiler {
            enabled_flags: EnabledFlags::default(),
            is_active: false,
            functions: HashMap::new(),
            hot_paths: HashMap::new(),
            specialization_threshold: SPECIALIZATION_HIT_THRESHOLD,
        }
    }
}

impl Profiler {
    /// A profiler with the default flag set, inactive until
    /// [`Profiler::set_active`] is called.
    pub fn new() -> Self {
        Profiler::default()
    }

    /// A profiler using an embedder-supplied specialization eligibility
    /// threshold (see [`crate::interpreter::VmConfig`]) instead of
    /// [`SPECIALIZATION_HIT_THRESHOLD`].
    pub fn with_threshold(threshold: u64) -> Self {
        Profiler {
            specialization_threshold: threshold,
            ..Profiler::default()
        }
    }

    /// Whether profiling is currently on. The interpreter checks this once
    /// per dispatch iteration before consulting `enabled_flags`.
    pub const fn is_active(&self) -> bool {
        self.is_active
    }

    /// Turn profiling on or off globally.
    pub fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }

    /// The current category gate.
    pub const fn enabled_flags(&self) -> EnabledFlags {
        self.enabled_flags
    }

    /// Replace the category gate.
    pub fn set_enabled_flags(&mut self, flags: EnabledFlags) {
        self.enabled_flags = flags;
    }

    /// Record a call-entry hit for `function_index`, declaring its arity the
    /// first time it is seen. No-op unless active and `FUNCTION_HITS` is
    /// enabled.
    pub fn record_call(&mut self, function_index: u32, arity: u8) {
        if !self.is_active || !self.enabled_flags.contains(EnabledFlags::FUNCTION_HITS) {
            return;
        }
        let stats = self.functions.entry(function_index).or_default();
        stats.arity = arity;
        stats.hit_count += 1;
    }

    /// Record a loop back-edge taken at `address`. No-op unless active and
    /// `HOT_PATHS` is enabled.
    pub fn record_hot_path(&mut self, address: u32) {
        if !self.is_active || !self.enabled_flags.contains(EnabledFlags::HOT_PATHS) {
            return;
        }
        *self.hot_paths.entry(address).or_insert(0) += 1;
    }

    /// Read (and optionally reset) the hit count for `function_index`.
    ///
    /// Mirrors `getFunctionHitCount(fn, resetAfterRead)`: a caller polling
    /// for specialization eligibility can read-and-clear in one call so
    /// repeated checks don't re-count the same hits.
    pub fn get_function_hit_count(&mut self, function_index: u32, reset_after_read: bool) -> u64 {
        let Some(stats) = self.functions.get_mut(&function_index) else {
            return 0;
        };
        let count = stats.hit_count;
        if reset_after_read {
            stats.hit_count = 0;
        }
        count
    }

    /// Record `iteration_count` additional back-edge traversals at
    /// `address` in one call, for batched/sampled instrumentation.
    ///
    /// Mirrors `profileHotPath(address, iteration_count)`.
    pub fn profile_hot_path(&mut self, address: u32, iteration_count: u64) {
        if !self.is_active || !self.enabled_flags.contains(EnabledFlags::HOT_PATHS) {
            return;
        }
        *self.hot_paths.entry(address).or_insert(0) += iteration_count;
    }

    /// Snapshot of the hot-path table, most-sampled first.
    pub fn hot_path_samples(&self) -> Vec<HotPathSample> {
        let mut samples: Vec<HotPathSample> = self
            .hot_paths
            .iter()
            .map(|(&address, &iteration_count)| HotPathSample {
                address,
                iteration_count,
            })
            .collect();
        samples.sort_by(|a, b| b.iteration_count.cmp(&a.iteration_count));
        samples
    }

    /// Feedback for the specialization stage: current hit count, arity, and
    /// whether the function has crossed the eligibility threshold. Does not
    /// reset the counter — specialization reads this independent of the
    /// embedder's own polling via [`Profiler::get_function_hit_count`].
    pub fn feedback(&self, function_index: u32) -> ProfilingFeedback {
        let stats = self.functions.get(&function_index).copied().unwrap_or_default();
        ProfilingFeedback {
            hit_count: stats.hit_count,
            arity: stats.arity,
            eligible: stats.hit_count >= self.specialization_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_profiler_records_nothing() {
        let mut profiler = Profiler::new();
        profiler.record_call(0, 1);
        assert_eq!(profiler.feedback(0).hit_count, 0);
    }

    #[test]
    fn hit_count_grows_monotonically_and_becomes_eligible() {
        let mut profiler = Profiler::new();
        profiler.set_active(true);
        for _ in 0..SPECIALIZATION_HIT_THRESHOLD {
            profiler.record_call(7, 2);
        }
        let feedback = profiler.feedback(7);
        assert_eq!(feedback.hit_count, SPECIALIZATION_HIT_THRESHOLD);
        assert_eq!(feedback.arity, 2);
        assert!(feedback.eligible);
    }

    #[test]
    fn get_function_hit_count_can_reset() {
        let mut profiler = Profiler::new();
        profiler.set_active(true);
        profiler.record_call(3, 0);
        profiler.record_call(3, 0);
        assert_eq!(profiler.get_function_hit_count(3, true), 2);
        assert_eq!(profiler.get_function_hit_count(3, false), 0);
    }

    #[test]
    fn disabling_hot_paths_flag_suppresses_sampling() {
        let mut profiler = Profiler::new();
        profiler.set_active(true);
        profiler.set_enabled_flags(EnabledFlags::FUNCTION_HITS);
        profiler.profile_hot_path(100, 5);
        assert!(profiler.hot_path_samples().is_empty());
    }

    #[test]
    fn hot_path_samples_are_sorted_by_iteration_count_descending() {
        let mut profiler = Profiler::new();
        profiler.set_active(true);
        profiler.profile_hot_path(10, 3);
        profiler.profile_hot_path(20, 9);
        let samples = profiler.hot_path_samples();
        assert_eq!(samples[0].address, 20);
        assert_eq!(samples[1].address, 10);
    }
}
