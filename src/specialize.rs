//! Profile-guided specialization stage (C9).
//!
//! Rewrites a hot function's bytecode into a typed variant once profiling
//! marks it eligible: qualifying generic arithmetic/comparison opcodes are
//! promoted to their typed counterparts, and a guard prologue of typed
//! moves is prepended so the interpreter can confirm the promotion still
//! holds on every call before trusting the typed path.

use crate::{
    chunk::{
        Chunk,
        Loc,
    },
    opcode::Opcode,
    profiler::ProfilingFeedback,
    value::ValueType,
};

/// One opcode-byte rewrite recorded while decoding a chunk clone (§4.7
/// step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transform {
    /// Offset of the opcode byte to overwrite.
    pub offset: usize,
    /// The typed opcode it is rewritten to.
    pub new_opcode: Opcode,
    /// The guard type the rewrite implies.
    pub guard: ValueType,
    /// The instruction's two source-operand register bytes (`a`, `b`);
    /// `dst` is excluded since only source operands need a guard.
    pub operands: [u8; 2],
}

/// A deduplicated guard obligation: one typed-move prologue entry per
/// distinct register (§4.7 step 2: "first guard kind wins; guards are never
/// downgraded").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardRequirement {
    /// The register the guard prologue coerces.
    pub register: u8,
    /// The type it is coerced into.
    pub guard: ValueType,
}

/// Encodes a specialized function's arity so the runtime can reconstitute
/// arguments into the generic chunk's calling convention when a guard
/// fails (§4.7 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeoptStub {
    /// The function's declared arity.
    pub arity: u8,
}

/// A specialized chunk plus the guard prologue's length and its deopt
/// stub (§3 `SpecializedChunk`).
#[derive(Debug, Clone, PartialEq)]
pub struct SpecializedChunk {
    /// The rewritten chunk: typed opcodes plus a guard prologue at offset 0.
    pub chunk: Chunk,
    /// Number of bytes the guard prologue occupies at the front of `chunk`.
    /// A guard failure at native offset `pc` resumes the generic chunk at
    /// `pc - prologue_len`.
    pub prologue_len: usize,
    /// This chunk's deopt stub.
    pub deopt: DeoptStub,
}

/// C9: rewrites eligible functions into specialized chunks.
pub struct SpecializationStage;

impl SpecializationStage {
    /// Attempt to specialize `baseline` given profiling feedback and the
    /// compiler's own independent hot-count for the same function (§4.7:
    /// eligibility requires both to agree, against the same threshold the
    /// embedder configured).
    ///
    /// Returns `None` when the function is not yet eligible, or when no
    /// transform was found in the baseline (the generic chunk remains
    /// authoritative in both cases).
    pub fn specialize(
        baseline: &Chunk,
        feedback: ProfilingFeedback,
        compiler_hot_count: u64,
        hit_threshold: u64,
    ) -> Option<SpecializedChunk> {
        if !feedback.eligible || compiler_hot_count < hit_threshold {
            return None;
        }

        let transforms = Self::decode_transforms(baseline);
        if transforms.is_empty() {
            tracing::warn!(arity = feedback.arity, "specialization: no transform found, discarding clone");
            return None;
        }

        let mut clone = baseline.clone();
        for t in &transforms {
            clone.set_opcode_at(t.offset, t.new_opcode);
        }

        let guards = Self::guard_plan(&transforms);
        let prologue = Self::build_prologue(&guards);
        let prologue_len = prologue.len();
        clone.prepend(&prologue, Loc::default());

        tracing::debug!(
            transforms = transforms.len(),
            guards = guards.len(),
            prologue_len,
            "specialization: chunk promoted"
        );

        Some(SpecializedChunk {
            chunk: clone,
            prologue_len,
            deopt: DeoptStub { arity: feedback.arity },
        })
    }

    /// Decode `chunk` sequentially, recording a [`Transform`] for every
    /// generic arithmetic/comparison instruction with a mappable typed
    /// variant (§4.7 step 2).
    fn decode_transforms(chunk: &Chunk) -> Vec<Transform> {
        let code = chunk.code();
        let mut offset = 0;
        let mut out = Vec::new();

        while offset < code.len() {
            let Some(op) = Opcode::from_byte(code[offset]) else {
                break;
            };
            let width = op.width() as usize;

            if let (Some(new_opcode), Some(guard)) = (op.typed_variant(), op.guard_type()) {
                if offset + width <= code.len() {
                    out.push(Transform {
                        offset,
                        new_opcode,
                        guard,
                        operands: [code[offset + 2], code[offset + 3]],
                    });
                }
            }

            offset += width;
        }
        out
    }

    /// Deduplicate operand registers across every transform into one guard
    /// per register, first guard kind wins.
    fn guard_plan(transforms: &[Transform]) -> Vec<GuardRequirement> {
        let mut guards: Vec<GuardRequirement> = Vec::new();
        for t in transforms {
            for &register in &t.operands {
                if !guards.iter().any(|g| g.register == register) {
                    guards.push(GuardRequirement {
                        register,
                        guard: t.guard,
                    });
                }
            }
        }
        guards
    }

    /// Build a `{MOVE_T, r, r}` prologue, one instruction per guard.
    fn build_prologue(guards: &[GuardRequirement]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(guards.len() * 3);
        for g in guards {
            let op = Opcode::typed_move_for(g.guard)
                .expect("every Transform's guard type maps to a typed move opcode");
            bytes.push(op as u8);
            bytes.push(g.register);
            bytes.push(g.register);
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Loc;

    const LOC: Loc = Loc {
        line: 1,
        column: 1,
        file: 0,
    };

    fn eligible_feedback(arity: u8) -> ProfilingFeedback {
        ProfilingFeedback {
            hit_count: crate::consts::SPECIALIZATION_HIT_THRESHOLD,
            arity,
            eligible: true,
        }
    }

    fn chunk_with_one_add_i32(dst: u8, a: u8, b: u8) -> Chunk {
        let mut chunk = Chunk::new();
        chunk.append_opcode(Opcode::ADD_I32_R, LOC);
        chunk.append_byte(dst, LOC);
        chunk.append_byte(a, LOC);
        chunk.append_byte(b, LOC);
        chunk.append_opcode(Opcode::RETURN, LOC);
        chunk.append_byte(dst, LOC);
        chunk
    }

    #[test]
    fn ineligible_feedback_yields_no_specialization() {
        let chunk = chunk_with_one_add_i32(0, 1, 2);
        let feedback = ProfilingFeedback {
            hit_count: 1,
            arity: 2,
            eligible: false,
        };
        assert!(SpecializationStage::specialize(&chunk, feedback, 1, crate::consts::SPECIALIZATION_HIT_THRESHOLD).is_none());
    }

    #[test]
    fn a_chunk_with_no_typed_candidate_is_discarded() {
        let mut chunk = Chunk::new();
        chunk.append_opcode(Opcode::HALT, LOC);
        let feedback = eligible_feedback(0);
        assert!(SpecializationStage::specialize(
            &chunk,
            feedback,
            crate::consts::SPECIALIZATION_HIT_THRESHOLD,
            crate::consts::SPECIALIZATION_HIT_THRESHOLD,
        ).is_none());
    }

    #[test]
    fn qualifying_opcode_is_rewritten_and_prologue_prepended() {
        let chunk = chunk_with_one_add_i32(2, 0, 1);
        let feedback = eligible_feedback(2);
        let specialized = SpecializationStage::specialize(
            &chunk,
            feedback,
            crate::consts::SPECIALIZATION_HIT_THRESHOLD,
            crate::consts::SPECIALIZATION_HIT_THRESHOLD,
        )
        .unwrap();

        // Two guards (registers 0 and 1), each a 3-byte MOVE_I32_TYPED.
        assert_eq!(specialized.prologue_len, 6);
        assert_eq!(specialized.deopt.arity, 2);

        let code = specialized.chunk.code();
        assert_eq!(Opcode::from_byte(code[0]), Some(Opcode::MOVE_I32_TYPED));
        assert_eq!(Opcode::from_byte(code[3]), Some(Opcode::MOVE_I32_TYPED));
        // The original ADD_I32_R, now ADD_I32_TYPED, sits right after the
        // prologue.
        assert_eq!(Opcode::from_byte(code[6]), Some(Opcode::ADD_I32_TYPED));
    }

    #[test]
    fn guard_registers_are_deduplicated_across_multiple_transforms() {
        let mut chunk = Chunk::new();
        chunk.append_opcode(Opcode::ADD_I32_R, LOC);
        chunk.append_byte(2, LOC);
        chunk.append_byte(0, LOC);
        chunk.append_byte(1, LOC);
        chunk.append_opcode(Opcode::SUB_I32_R, LOC);
        chunk.append_byte(3, LOC);
        chunk.append_byte(0, LOC);
        chunk.append_byte(1, LOC);

        let feedback = eligible_feedback(2);
        let specialized = SpecializationStage::specialize(
            &chunk,
            feedback,
            crate::consts::SPECIALIZATION_HIT_THRESHOLD,
            crate::consts::SPECIALIZATION_HIT_THRESHOLD,
        )
        .unwrap();

        // Registers 0 and 1 are shared by both instructions: exactly one
        // guard each, not four.
        assert_eq!(specialized.prologue_len, 6);
    }

    #[test]
    fn u32_arithmetic_has_no_typed_variant_and_is_left_alone() {
        let mut chunk = Chunk::new();
        chunk.append_opcode(Opcode::ADD_U32_R, LOC);
        chunk.append_byte(0, LOC);
        chunk.append_byte(1, LOC);
        chunk.append_byte(2, LOC);

        let feedback = eligible_feedback(2);
        assert!(SpecializationStage::specialize(
            &chunk,
            feedback,
            crate::consts::SPECIALIZATION_HIT_THRESHOLD,
            crate::consts::SPECIALIZATION_HIT_THRESHOLD,
        ).is_none());
    }
}
