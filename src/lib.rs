//! `orus-vm`: the register-based bytecode interpreter and specializing
//! optimizer for the Orus scripting language.
//!
//! This crate implements the execution core only: a hierarchical register
//! file with a small write-through cache, a generational mark-and-sweep
//! collector, opcode dispatch with typed fast paths, two loop-centric typed
//! optimization passes that run over the typed AST before emission, and a
//! profile-guided specialization stage that rewrites hot functions into
//! typed bytecode with guarded deoptimization.
//!
//! Parsing, the surface syntax, the diagnostics registry, the REPL/file
//! loader and the concrete builtin implementations are external
//! collaborators; this crate only specifies the seams where the core
//! consumes them (see [`builtins`] and [`ast`]).
#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod ast;
pub mod builtins;
pub mod chunk;
pub mod consts;
pub mod error;
pub mod gc;
pub mod interpreter;
pub mod jit;
pub mod object;
pub mod opcode;
pub mod optimize;
pub mod profiler;
pub mod register;
pub mod specialize;
pub mod value;

#[cfg(test)]
use quickcheck as _;
#[cfg(test)]
use quickcheck_macros as _;

pub mod prelude {
    //! Commonly used types re-exported for embedders.
    #[doc(no_inline)]
    pub use crate::{
        ast::{
            LoopKind,
            Node,
            NodeId,
            NodeKind,
            Type,
            TypedAst,
        },
        builtins::IntrinsicTable,
        chunk::Chunk,
        error::{
            RuntimeErrorKind,
            VmError,
        },
        interpreter::{
            Interpreter,
            VmConfig,
        },
        object::{
            HeapObject,
            ObjectKind,
        },
        opcode::Opcode,
        optimize::{
            OptimizationContext,
            affinity::LoopAffinityPass,
            residency::LoopResidencyPass,
        },
        profiler::Profiler,
        specialize::SpecializationStage,
        value::Value,
    };
}
