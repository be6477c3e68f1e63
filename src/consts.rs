//! Named constants for every heuristic number the design calls out.
//!
//! The design singles out several magic numbers (cache warm-up count,
//! hit-rate thresholds, GC grow factor, specialization eligibility) as
//! heuristics that implementations should expose as named constants rather
//! than inline literals. Centralizing them here also gives
//! [`crate::interpreter::VmConfig`] a single place to mirror and override.

use core::mem;

/// Logical register ids are 16 bits wide.
pub const REGISTER_ID_BITS: u32 = 16;

/// Number of registers addressable within a single tier.
pub const MAX_REGISTERS_PER_TIER: usize = 1 << 12;

/// Size of the direct-mapped L1 register cache.
pub const L1_CACHE_SIZE: usize = 8;

/// Size of the fully-associative, LRU-evicted L2 register cache.
pub const L2_CACHE_SIZE: usize = 32;

/// Capacity of the circular sequential-prefetch buffer.
pub const PREFETCH_BUFFER_SIZE: usize = 4;

/// Number of consecutive register ids prefetched after an L1/L2 miss.
pub const PREFETCH_LOOKAHEAD: usize = 2;

/// Number of cache accesses observed before the adaptive disable/enable
/// heuristic is allowed to act.
pub const CACHE_WARMUP_ACCESSES: u64 = 1000;

/// Hit rate, as a fraction of accesses, below which caching is disabled.
pub const CACHE_DISABLE_HIT_RATE: f64 = 0.20;

/// Hit rate, as a fraction of accesses, above which caching is re-enabled.
pub const CACHE_REENABLE_HIT_RATE: f64 = 0.80;

/// Initial garbage-collection threshold, in bytes of tracked allocation.
pub const GC_INITIAL_THRESHOLD: usize = 1024 * 1024;

/// Factor applied to `bytes_allocated` to compute the next GC threshold.
pub const GC_HEAP_GROW_FACTOR: f64 = 2.0;

/// Minimum call hit count before a function becomes eligible for
/// specialization.
pub const SPECIALIZATION_HIT_THRESHOLD: u64 = 50;

/// Maximum depth of the interpreter's call-frame stack.
pub const MAX_CALL_DEPTH: usize = 1024;

/// Number of frame-tier register slots reserved per call-frame activation.
/// A byte-wide instruction operand indexes within this window; the
/// interpreter adds the active frame's base to translate it into a
/// [`crate::register::RegId`].
pub const FRAME_WINDOW_SIZE: u16 = 256;

/// Size of a machine word as used by numeric opcodes, in bytes.
pub const WORD_SIZE: usize = mem::size_of::<u64>();

static_assertions::const_assert!(L1_CACHE_SIZE < L2_CACHE_SIZE);
