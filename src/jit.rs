//! JIT collaborator contract (§4.8, §9).
//!
//! The native code generator itself is out of scope (§1: "The JIT backend is
//! described only as an optional sink for hot code and a source of
//! deoptimization callbacks; its code generator is not specified here").
//! This module gives the interpreter loop a real, testable seam for the two
//! interactions it needs: asking whether a loop back-edge has a compiled
//! native entry, and being told a guard tripped inside native code so it
//! can resume in bytecode at the equivalent point.

use crate::register::RegisterFile;

/// The result of transferring control into JIT-compiled native code for one
/// loop iteration (or a whole hot function), per §4.8: "the interpreter
/// transfers to the native code and resumes in bytecode only when the
/// native code returns or a guard trips."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitOutcome {
    /// Native code ran to completion; bytecode execution continues after
    /// the loop/function normally.
    Completed,
    /// A guard inside native code tripped; bytecode execution must resume
    /// at `resume_offset` with the register file already reflecting native
    /// code's effects up to that point.
    Deoptimized {
        /// Bytecode offset to resume dispatch at.
        resume_offset: usize,
    },
}

/// What the interpreter consults on a loop back-edge (§4.8) before falling
/// through to bytecode dispatch of the edge itself.
///
/// No implementation ships in this crate — native codegen is out of scope —
/// but the trait lets the interpreter's JIT-consultation branch in C11 be
/// exercised against a test double instead of living as a TODO.
pub trait JitBackend {
    /// Whether `function_index`'s loop starting at `loop_address` has a
    /// compiled native entry ready to run.
    fn compiled_entry(&self, function_index: u32, loop_address: u32) -> bool;

    /// Transfer control to the compiled entry for `function_index` at
    /// `loop_address`, operating on `registers` in place.
    fn enter(&self, function_index: u32, loop_address: u32, registers: &mut RegisterFile) -> JitOutcome;

    /// Notify the backend that bytecode execution resumed after a
    /// deoptimization, so it can record the event (e.g. to avoid
    /// recompiling a guard that keeps failing).
    fn on_deoptimize(&self, function_index: u32, loop_address: u32) {
        let _ = (function_index, loop_address);
    }
}

/// A `JitBackend` that never reports a compiled entry. The default when an
/// embedder has not wired in a real backend; the interpreter's JIT branch
/// then always falls through to ordinary bytecode dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJit;

impl JitBackend for NoJit {
    fn compiled_entry(&self, _function_index: u32, _loop_address: u32) -> bool {
        false
    }

    fn enter(&self, _function_index: u32, _loop_address: u32, _registers: &mut RegisterFile) -> JitOutcome {
        JitOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_jit_never_reports_a_compiled_entry() {
        let jit = NoJit;
        assert!(!jit.compiled_entry(0, 0));
    }

    /// A fake backend that always deoptimizes immediately, to exercise the
    /// interpreter's deopt-resume path without a real code generator.
    struct AlwaysDeopt;
    impl JitBackend for AlwaysDeopt {
        fn compiled_entry(&self, _function_index: u32, _loop_address: u32) -> bool {
            true
        }
        fn enter(&self, _function_index: u32, _loop_address: u32, _registers: &mut RegisterFile) -> JitOutcome {
            JitOutcome::Deoptimized { resume_offset: 42 }
        }
    }

    #[test]
    fn deopt_outcome_carries_a_resume_offset() {
        let jit = AlwaysDeopt;
        let mut regs = RegisterFile::new();
        match jit.enter(1, 0, &mut regs) {
            JitOutcome::Deoptimized { resume_offset } => assert_eq!(resume_offset, 42),
            JitOutcome::Completed => panic!("expected deoptimization"),
        }
    }
}
