//! Hierarchical register file (C3).
//!
//! Registers are addressed by a single 16-bit logical id that packs a
//! [`RegisterTier`] and a per-tier offset. Each tier additionally carries a
//! shadow **typed pane**: an optional unboxed copy of a register's value
//! plus a type tag, so typed fast-path opcode handlers (see
//! [`crate::interpreter`]) can skip the boxed [`crate::value::Value`]
//! representation entirely when the tag is authoritative.

pub mod cache;

use crate::value::{
    Value,
    ValueType,
};

/// Which of the four logical register tiers a [`RegId`] addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::Display)]
pub enum RegisterTier {
    /// Fixed-size, shared across all frames.
    Global,
    /// Allocated per call-frame activation.
    Frame,
    /// Scratch, live only within a basic block.
    Temp,
    /// Module-private slots.
    Module,
}

const TIER_BITS: u16 = 2;
const TIER_SHIFT: u16 = 16 - TIER_BITS;
const INDEX_MASK: u16 = (1 << TIER_SHIFT) - 1;

/// A logical register id: 2 tier bits + a 14-bit per-tier index, packed
/// into the single 16-bit id the design specifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegId(u16);

impl RegId {
    /// Build a logical id from a tier and an in-tier index.
    ///
    /// # Panics
    /// Panics if `index` does not fit in the 14 bits left after the tier
    /// tag — this is a compiler/emitter invariant violation, not a runtime
    /// fault a running program can trigger.
    pub fn new(tier: RegisterTier, index: u16) -> Self {
        assert!(
            index <= INDEX_MASK,
            "register index {index} exceeds per-tier addressable range"
        );
        let tier_bits = match tier {
            RegisterTier::Global => 0,
            RegisterTier::Frame => 1,
            RegisterTier::Temp => 2,
            RegisterTier::Module => 3,
        };
        RegId((tier_bits << TIER_SHIFT) | index)
    }

    /// This id's tier.
    pub const fn tier(self) -> RegisterTier {
        match self.0 >> TIER_SHIFT {
            0 => RegisterTier::Global,
            1 => RegisterTier::Frame,
            2 => RegisterTier::Temp,
            _ => RegisterTier::Module,
        }
    }

    /// This id's offset within its tier.
    pub const fn index(self) -> u16 {
        self.0 & INDEX_MASK
    }

    /// The raw packed 16-bit id, as would be embedded in an instruction
    /// operand.
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Reconstruct a `RegId` from a raw packed 16-bit value.
    pub const fn from_raw(raw: u16) -> Self {
        RegId(raw)
    }
}

/// The unboxed payload of a typed shadow slot.
#[derive(Debug, Clone, Copy, PartialEq)]
enum TypedSlot {
    I32(i32),
    I64(i64),
    F64(f64),
    Bool(bool),
}

impl TypedSlot {
    const fn value_type(self) -> ValueType {
        match self {
            TypedSlot::I32(_) => ValueType::I32,
            TypedSlot::I64(_) => ValueType::I64,
            TypedSlot::F64(_) => ValueType::F64,
            TypedSlot::Bool(_) => ValueType::Bool,
        }
    }

    const fn to_value(self) -> Value {
        match self {
            TypedSlot::I32(n) => Value::I32(n),
            TypedSlot::I64(n) => Value::I64(n),
            TypedSlot::F64(n) => Value::F64(n),
            TypedSlot::Bool(b) => Value::Bool(b),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Tier {
    generic: Vec<Value>,
    typed: Vec<Option<TypedSlot>>,
}

impl Tier {
    fn ensure(&mut self, index: usize) {
        if self.generic.len() <= index {
            self.generic.resize(index + 1, Value::Nil);
            self.typed.resize(index + 1, None);
        }
    }
}

/// The hierarchical register file: one [`Tier`] per [`RegisterTier`], each
/// with a boxed generic backing store and a typed shadow pane.
///
/// The interpreter guarantees: if a register's type tag is `Some(t)`, the
/// boxed value last stored at that register is of type `t` (the
/// typed-shadow coherence invariant, §8).
#[derive(Debug, Clone, Default)]
pub struct RegisterFile {
    tiers: [Tier; 4],
}

impl RegisterFile {
    /// An empty register file; tiers grow on first write to a given index.
    pub fn new() -> Self {
        Self::default()
    }

    fn tier(&self, t: RegisterTier) -> &Tier {
        &self.tiers[t as usize]
    }

    fn tier_mut(&mut self, t: RegisterTier) -> &mut Tier {
        &mut self.tiers[t as usize]
    }

    /// Read the boxed value at `id`. Registers never written default to
    /// [`Value::Nil`].
    pub fn get(&self, id: RegId) -> Value {
        let tier = self.tier(id.tier());
        tier.generic
            .get(id.index() as usize)
            .copied()
            .unwrap_or(Value::Nil)
    }

    /// Write the boxed value at `id` through the generic setter. This
    /// invalidates any typed shadow at `id` — the generic path makes no
    /// claim about the value's unboxed representation.
    pub fn set(&mut self, id: RegId, value: Value) {
        let index = id.index() as usize;
        let tier = self.tier_mut(id.tier());
        tier.ensure(index);
        tier.generic[index] = value;
        tier.typed[index] = None;
    }

    /// The authoritative type tag at `id`, if the typed shadow is valid.
    pub fn shadow_type(&self, id: RegId) -> Option<ValueType> {
        self.tier(id.tier())
            .typed
            .get(id.index() as usize)
            .copied()
            .flatten()
            .map(TypedSlot::value_type)
    }

    /// Read the `i32` typed shadow at `id`, if the tag is `I32`.
    pub fn get_typed_i32(&self, id: RegId) -> Option<i32> {
        match self.typed_slot(id) {
            Some(TypedSlot::I32(n)) => Some(n),
            _ => None,
        }
    }

    /// Read the `i64` typed shadow at `id`, if the tag is `I64`.
    pub fn get_typed_i64(&self, id: RegId) -> Option<i64> {
        match self.typed_slot(id) {
            Some(TypedSlot::I64(n)) => Some(n),
            _ => None,
        }
    }

    /// Read the `f64` typed shadow at `id`, if the tag is `F64`.
    pub fn get_typed_f64(&self, id: RegId) -> Option<f64> {
        match self.typed_slot(id) {
            Some(TypedSlot::F64(n)) => Some(n),
            _ => None,
        }
    }

    /// Read the `bool` typed shadow at `id`, if the tag is `Bool`.
    pub fn get_typed_bool(&self, id: RegId) -> Option<bool> {
        match self.typed_slot(id) {
            Some(TypedSlot::Bool(b)) => Some(b),
            _ => None,
        }
    }

    fn typed_slot(&self, id: RegId) -> Option<TypedSlot> {
        self.tier(id.tier())
            .typed
            .get(id.index() as usize)
            .copied()
            .flatten()
    }

    /// Write through the typed setter: updates both the boxed value and the
    /// typed shadow, keeping the typed-shadow coherence invariant intact.
    pub fn set_typed_i32(&mut self, id: RegId, n: i32) {
        self.set_typed(id, TypedSlot::I32(n));
    }

    /// See [`RegisterFile::set_typed_i32`].
    pub fn set_typed_i64(&mut self, id: RegId, n: i64) {
        self.set_typed(id, TypedSlot::I64(n));
    }

    /// See [`RegisterFile::set_typed_i32`].
    pub fn set_typed_f64(&mut self, id: RegId, n: f64) {
        self.set_typed(id, TypedSlot::F64(n));
    }

    /// See [`RegisterFile::set_typed_i32`].
    pub fn set_typed_bool(&mut self, id: RegId, b: bool) {
        self.set_typed(id, TypedSlot::Bool(b));
    }

    fn set_typed(&mut self, id: RegId, slot: TypedSlot) {
        let index = id.index() as usize;
        let tier = self.tier_mut(id.tier());
        tier.ensure(index);
        tier.generic[index] = slot.to_value();
        tier.typed[index] = Some(slot);
    }

    /// Demote the type tag to "not authoritative" without touching the
    /// boxed value. Typed fast-path handlers call this when they observe a
    /// type mismatch or an overflow that falls through to the generic path.
    pub fn demote(&mut self, id: RegId) {
        let index = id.index() as usize;
        let tier = self.tier_mut(id.tier());
        if index < tier.typed.len() {
            tier.typed[index] = None;
        }
    }

    /// Every `(tier, index)` slot currently allocated, for GC root
    /// collection. Returns boxed values only — the typed shadow never
    /// holds a distinct object reference the boxed value wouldn't also
    /// carry.
    pub fn iter_values(&self) -> impl Iterator<Item = Value> + '_ {
        self.tiers.iter().flat_map(|t| t.generic.iter().copied())
    }
}
