//! Opcode set and instruction widths (C4, C5).
//!
//! Encoding is variable-width: the decoder looks up a fixed byte width per
//! opcode (1-4 bytes, [`Opcode::width`]) and reads that many operand bytes
//! following the opcode byte. Register operands in the instruction stream
//! are single bytes addressing a frame-local slot window, distinct from the
//! 16-bit logical [`crate::register::RegId`] used by the register file
//! abstraction — see `DESIGN.md` for why bytecode emission narrows to a
//! byte-wide operand here.

use crate::value::ValueType;

macro_rules! define_opcodes {
    ($($variant:ident = $width:literal),+ $(,)?) => {
        /// A single bytecode operation.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::Display)]
        #[repr(u8)]
        pub enum Opcode {
            $($variant),+
        }

        impl Opcode {
            /// Total instruction width in bytes, including the opcode byte.
            pub const fn width(self) -> u8 {
                match self {
                    $(Opcode::$variant => $width,)+
                }
            }

            /// Decode a raw opcode byte, as read from a [`crate::chunk::Chunk`].
            /// Returns `None` for a byte that names no variant — a malformed
            /// or foreign chunk, never something a well-formed one emits.
            pub fn from_byte(byte: u8) -> Option<Opcode> {
                match byte {
                    $(x if x == Opcode::$variant as u8 => Some(Opcode::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

define_opcodes! {
    // Arithmetic: three-register form `dst, a, b`, generic and typed, per
    // numeric type.
    ADD_I32_R = 4, ADD_I32_TYPED = 4,
    SUB_I32_R = 4, SUB_I32_TYPED = 4,
    MUL_I32_R = 4, MUL_I32_TYPED = 4,
    DIV_I32_R = 4, DIV_I32_TYPED = 4,
    MOD_I32_R = 4, MOD_I32_TYPED = 4,

    ADD_I64_R = 4, ADD_I64_TYPED = 4,
    SUB_I64_R = 4, SUB_I64_TYPED = 4,
    MUL_I64_R = 4, MUL_I64_TYPED = 4,
    DIV_I64_R = 4, DIV_I64_TYPED = 4,
    MOD_I64_R = 4, MOD_I64_TYPED = 4,

    ADD_U32_R = 4, ADD_U32_TYPED = 4,
    SUB_U32_R = 4, SUB_U32_TYPED = 4,
    MUL_U32_R = 4, MUL_U32_TYPED = 4,
    DIV_U32_R = 4, DIV_U32_TYPED = 4,
    MOD_U32_R = 4, MOD_U32_TYPED = 4,

    ADD_U64_R = 4, ADD_U64_TYPED = 4,
    SUB_U64_R = 4, SUB_U64_TYPED = 4,
    MUL_U64_R = 4, MUL_U64_TYPED = 4,
    DIV_U64_R = 4, DIV_U64_TYPED = 4,
    MOD_U64_R = 4, MOD_U64_TYPED = 4,

    ADD_F64_R = 4, ADD_F64_TYPED = 4,
    SUB_F64_R = 4, SUB_F64_TYPED = 4,
    MUL_F64_R = 4, MUL_F64_TYPED = 4,
    DIV_F64_R = 4, DIV_F64_TYPED = 4,
    MOD_F64_R = 4, MOD_F64_TYPED = 4,

    // Comparison: three-register form `dst(bool), a, b`, generic and typed,
    // per numeric type.
    LT_I32_R = 4, LT_I32_TYPED = 4, LE_I32_R = 4, LE_I32_TYPED = 4,
    GT_I32_R = 4, GT_I32_TYPED = 4, GE_I32_R = 4, GE_I32_TYPED = 4,
    EQ_I32_R = 4, EQ_I32_TYPED = 4, NE_I32_R = 4, NE_I32_TYPED = 4,

    LT_I64_R = 4, LT_I64_TYPED = 4, LE_I64_R = 4, LE_I64_TYPED = 4,
    GT_I64_R = 4, GT_I64_TYPED = 4, GE_I64_R = 4, GE_I64_TYPED = 4,
    EQ_I64_R = 4, EQ_I64_TYPED = 4, NE_I64_R = 4, NE_I64_TYPED = 4,

    LT_U32_R = 4, LT_U32_TYPED = 4, LE_U32_R = 4, LE_U32_TYPED = 4,
    GT_U32_R = 4, GT_U32_TYPED = 4, GE_U32_R = 4, GE_U32_TYPED = 4,
    EQ_U32_R = 4, EQ_U32_TYPED = 4, NE_U32_R = 4, NE_U32_TYPED = 4,

    LT_U64_R = 4, LT_U64_TYPED = 4, LE_U64_R = 4, LE_U64_TYPED = 4,
    GT_U64_R = 4, GT_U64_TYPED = 4, GE_U64_R = 4, GE_U64_TYPED = 4,
    EQ_U64_R = 4, EQ_U64_TYPED = 4, NE_U64_R = 4, NE_U64_TYPED = 4,

    LT_F64_R = 4, LT_F64_TYPED = 4, LE_F64_R = 4, LE_F64_TYPED = 4,
    GT_F64_R = 4, GT_F64_TYPED = 4, GE_F64_R = 4, GE_F64_TYPED = 4,
    EQ_F64_R = 4, EQ_F64_TYPED = 4, NE_F64_R = 4, NE_F64_TYPED = 4,

    // Logical / bitwise.
    AND_BOOL = 4,
    OR_BOOL = 4,
    NOT_BOOL = 3,
    BIT_AND_I64 = 4,
    BIT_OR_I64 = 4,
    BIT_XOR_I64 = 4,
    BIT_SHL_I64 = 4,
    BIT_SHR_I64 = 4,
    BIT_NOT_I64 = 3,

    // Moves.
    MOVE = 3,
    MOVE_I32_TYPED = 3,
    MOVE_I64_TYPED = 3,
    MOVE_F64_TYPED = 3,
    MOVE_BOOL_TYPED = 3,

    // Constants, globals.
    LOAD_CONST = 4,
    LOAD_GLOBAL = 4,
    STORE_GLOBAL = 4,

    // Control flow.
    JUMP = 3,
    JUMP_SHORT = 2,
    JUMP_IF_TRUE = 3,
    JUMP_IF_TRUE_LONG = 4,
    JUMP_IF_FALSE = 3,
    JUMP_IF_FALSE_LONG = 4,
    LOOP = 2,
    LOOP_LONG = 3,

    // Call / return.
    CALL = 4,
    RETURN = 2,
    RETURN_NIL = 1,

    // Iterators.
    ITER_OPEN = 3,
    ITER_NEXT = 4,

    // Arrays.
    ARRAY_NEW = 2,
    ARRAY_GET = 4,
    ARRAY_SET = 4,
    ARRAY_LEN = 3,

    // Checked increment/decrement.
    INC_CHECKED = 2,
    DEC_CHECKED = 2,

    // Exception handling.
    TRY_BEGIN = 3,
    TRY_END = 1,

    // I/O and diagnostics.
    PRINT = 2,
    ASSERT = 2,

    HALT = 1,
}

impl Opcode {
    /// Whether this opcode is one of the backward-branch (loop-edge)
    /// control-flow opcodes, used by the interpreter to identify loop edges
    /// for hot-path profiling (§4.3).
    pub const fn is_loop_edge(self) -> bool {
        matches!(self, Opcode::LOOP | Opcode::LOOP_LONG)
    }

    /// The typed counterpart of a generic `_R` arithmetic/comparison
    /// opcode, if one exists. Only `I32`/`I64`/`F64` have typed variants
    /// wired into the specialization stage (§4.7); `U32`/`U64` arithmetic
    /// opcodes exist for the interpreter's generic path but are never
    /// targets of a specialization transform.
    pub const fn typed_variant(self) -> Option<Opcode> {
        use Opcode::*;
        Some(match self {
            ADD_I32_R => ADD_I32_TYPED,
            SUB_I32_R => SUB_I32_TYPED,
            MUL_I32_R => MUL_I32_TYPED,
            DIV_I32_R => DIV_I32_TYPED,
            MOD_I32_R => MOD_I32_TYPED,
            LT_I32_R => LT_I32_TYPED,
            LE_I32_R => LE_I32_TYPED,
            GT_I32_R => GT_I32_TYPED,
            GE_I32_R => GE_I32_TYPED,
            EQ_I32_R => EQ_I32_TYPED,
            NE_I32_R => NE_I32_TYPED,

            ADD_I64_R => ADD_I64_TYPED,
            SUB_I64_R => SUB_I64_TYPED,
            MUL_I64_R => MUL_I64_TYPED,
            DIV_I64_R => DIV_I64_TYPED,
            MOD_I64_R => MOD_I64_TYPED,
            LT_I64_R => LT_I64_TYPED,
            LE_I64_R => LE_I64_TYPED,
            GT_I64_R => GT_I64_TYPED,
            GE_I64_R => GE_I64_TYPED,
            EQ_I64_R => EQ_I64_TYPED,
            NE_I64_R => NE_I64_TYPED,

            ADD_F64_R => ADD_F64_TYPED,
            SUB_F64_R => SUB_F64_TYPED,
            MUL_F64_R => MUL_F64_TYPED,
            DIV_F64_R => DIV_F64_TYPED,
            MOD_F64_R => MOD_F64_TYPED,
            LT_F64_R => LT_F64_TYPED,
            LE_F64_R => LE_F64_TYPED,
            GT_F64_R => GT_F64_TYPED,
            GE_F64_R => GE_F64_TYPED,
            EQ_F64_R => EQ_F64_TYPED,
            NE_F64_R => NE_F64_TYPED,

            _ => return None,
        })
    }

    /// The guard type a specialization transform of this generic opcode
    /// implies, i.e. the type the prologue's `MOVE_*_TYPED` must coerce the
    /// operand registers into (§4.7 step 2).
    pub const fn guard_type(self) -> Option<ValueType> {
        match self.typed_variant() {
            None => None,
            Some(_) => {
                use Opcode::*;
                Some(match self {
                    ADD_I32_R | SUB_I32_R | MUL_I32_R | DIV_I32_R | MOD_I32_R | LT_I32_R
                    | LE_I32_R | GT_I32_R | GE_I32_R | EQ_I32_R | NE_I32_R => ValueType::I32,
                    ADD_I64_R | SUB_I64_R | MUL_I64_R | DIV_I64_R | MOD_I64_R | LT_I64_R
                    | LE_I64_R | GT_I64_R | GE_I64_R | EQ_I64_R | NE_I64_R => ValueType::I64,
                    _ => ValueType::F64,
                })
            }
        }
    }

    /// The `MOVE_*_TYPED` opcode used in a specialization guard prologue for
    /// a given guard type.
    pub const fn typed_move_for(guard: ValueType) -> Option<Opcode> {
        match guard {
            ValueType::I32 => Some(Opcode::MOVE_I32_TYPED),
            ValueType::I64 => Some(Opcode::MOVE_I64_TYPED),
            ValueType::F64 => Some(Opcode::MOVE_F64_TYPED),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_variant_is_defined_only_for_i32_i64_f64() {
        assert_eq!(Opcode::ADD_I32_R.typed_variant(), Some(Opcode::ADD_I32_TYPED));
        assert_eq!(Opcode::ADD_F64_R.typed_variant(), Some(Opcode::ADD_F64_TYPED));
        assert_eq!(Opcode::ADD_U32_R.typed_variant(), None);
    }

    #[test]
    fn guard_type_matches_the_opcodes_numeric_family() {
        assert_eq!(Opcode::LT_I64_R.guard_type(), Some(ValueType::I64));
        assert_eq!(Opcode::MUL_F64_R.guard_type(), Some(ValueType::F64));
        assert_eq!(Opcode::MOVE.guard_type(), None);
    }

    #[test]
    fn loop_opcodes_are_identified_for_profiling() {
        assert!(Opcode::LOOP.is_loop_edge());
        assert!(Opcode::LOOP_LONG.is_loop_edge());
        assert!(!Opcode::JUMP.is_loop_edge());
    }

    #[test]
    fn every_opcode_has_a_nonzero_width_at_most_four() {
        use strum::IntoEnumIterator;
        for op in Opcode::iter() {
            assert!((1..=4).contains(&op.width()), "{op} has width {}", op.width());
        }
    }

    /// `from_byte` never panics on an arbitrary byte, and any byte it does
    /// decode round-trips back to itself.
    #[quickcheck_macros::quickcheck]
    fn from_byte_is_total_and_round_trips(byte: u8) -> bool {
        match Opcode::from_byte(byte) {
            Some(op) => op as u8 == byte,
            None => true,
        }
    }
}
