//! Runtime and embedding error types (§7, §10.2).
//!
//! Two tiers, mirroring the teacher's `RuntimeError`/`InterpreterError`
//! split: [`RuntimeErrorKind`] is the taxonomy of faults an opcode handler
//! can signal mid-program (type mismatch, overflow, index out of bounds,
//! ...), and [`VmError`] wraps it for callers of the public API, adding
//! variants that can only arise from misuse of the embedding surface
//! (malformed chunk, unpatched jump, unknown intrinsic).

use core::fmt;

/// A single source location, as attached to a [`RuntimeErrorKind`] for
/// user-visible formatting (domain + code + message + span, per §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceSpan {
    /// 1-based line number, if known.
    pub line: Option<u32>,
    /// 1-based column number, if known.
    pub column: Option<u32>,
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(l), Some(c)) => write!(f, "{l}:{c}"),
            (Some(l), None) => write!(f, "{l}"),
            _ => write!(f, "<unknown>"),
        }
    }
}

/// Runtime error kinds surfaced by opcode handlers (§7).
///
/// Each variant carries the data needed to format a
/// "RUNTIME PANIC / TYPE MISMATCH / ..." line with a numeric code, message,
/// and single source span. Compile-time diagnostics live in a separate
/// registry out of this crate's scope.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeErrorKind {
    /// An operand did not have the shape a typed opcode required.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Name of the expected type.
        expected: &'static str,
        /// Name of the type actually observed.
        actual: &'static str,
    },
    /// A checked arithmetic operation overflowed its type's range.
    #[error("arithmetic overflow in {op}")]
    ArithmeticOverflow {
        /// Name of the operation that overflowed (e.g. "i32 increment").
        op: &'static str,
    },
    /// Integer division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// An array or iterator index fell outside its bounds.
    #[error("index {index} out of bounds (len {len})")]
    IndexOutOfBounds {
        /// The index that was requested.
        index: i64,
        /// The length of the collection indexed.
        len: usize,
    },
    /// A global was read before it was defined.
    #[error("undefined global `{name}`")]
    UndefinedGlobal {
        /// Name of the missing global.
        name: String,
    },
    /// A call supplied the wrong number of arguments.
    #[error("arity mismatch: expected {expected} arguments, got {actual}")]
    ArityMismatch {
        /// Arity the callee declared.
        expected: u8,
        /// Arity supplied at the call site.
        actual: u8,
    },
    /// A builtin I/O operation failed.
    #[error("I/O error: {message}")]
    IoFailure {
        /// Host-provided failure description.
        message: String,
    },
    /// The call-frame stack exceeded [`crate::consts::MAX_CALL_DEPTH`].
    #[error("stack overflow: exceeded max call depth")]
    StackOverflow,
    /// The tracked heap allocator could not satisfy a request.
    #[error("allocation failure")]
    AllocationFailure,
    /// An `ASSERT` opcode observed a falsy register.
    #[error("assertion failed: {message}")]
    AssertionFailed {
        /// Host-readable description of what was asserted.
        message: String,
    },
}

impl RuntimeErrorKind {
    /// The domain category line used in user-visible formatting (§7).
    pub const fn category(&self) -> &'static str {
        match self {
            RuntimeErrorKind::TypeMismatch { .. } => "TYPE MISMATCH",
            RuntimeErrorKind::ArithmeticOverflow { .. } => "ARITHMETIC OVERFLOW",
            RuntimeErrorKind::DivisionByZero => "DIVISION BY ZERO",
            RuntimeErrorKind::IndexOutOfBounds { .. } => "INDEX OUT OF BOUNDS",
            RuntimeErrorKind::UndefinedGlobal { .. } => "UNDEFINED GLOBAL",
            RuntimeErrorKind::ArityMismatch { .. } => "ARITY MISMATCH",
            RuntimeErrorKind::IoFailure { .. } => "I/O FAILURE",
            RuntimeErrorKind::StackOverflow => "RUNTIME PANIC",
            RuntimeErrorKind::AllocationFailure => "RUNTIME PANIC",
            RuntimeErrorKind::AssertionFailed { .. } => "ASSERTION FAILED",
        }
    }

    /// A stable numeric code for embedders that want to match on errors
    /// without depending on message text.
    pub const fn code(&self) -> u16 {
        match self {
            RuntimeErrorKind::TypeMismatch { .. } => 1,
            RuntimeErrorKind::ArithmeticOverflow { .. } => 2,
            RuntimeErrorKind::DivisionByZero => 3,
            RuntimeErrorKind::IndexOutOfBounds { .. } => 4,
            RuntimeErrorKind::UndefinedGlobal { .. } => 5,
            RuntimeErrorKind::ArityMismatch { .. } => 6,
            RuntimeErrorKind::IoFailure { .. } => 7,
            RuntimeErrorKind::StackOverflow => 8,
            RuntimeErrorKind::AllocationFailure => 9,
            RuntimeErrorKind::AssertionFailed { .. } => 10,
        }
    }
}

/// A `RuntimeErrorKind` paired with the source span it occurred at, exactly
/// the `{kind, message, source_location}` error object shape in §7.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    /// The fault that occurred.
    pub kind: RuntimeErrorKind,
    /// Where it occurred, if known.
    pub span: SourceSpan,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {} at {}", self.kind.category(), self.kind.code(), self.kind, self.span)
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Top-level error returned by this crate's public API.
///
/// Wraps [`RuntimeError`] for in-program faults (the only kind that can
/// result from running a well-formed chunk) and adds variants that only
/// arise from an embedder misusing the API surface directly.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    /// A program fault surfaced during execution; see [`RuntimeError`].
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    /// A chunk was handed to the interpreter with an unpatched forward
    /// jump still on its patch list — a patch-closure violation (§8).
    #[error("chunk has {count} unpatched forward jump(s)")]
    UnpatchedJumps {
        /// Number of still-open patches.
        count: usize,
    },
    /// A chunk's parallel arrays (`code`, `lines`, `columns`, `files`) were
    /// not the same length.
    #[error("malformed chunk: parallel arrays of unequal length")]
    MalformedChunk,
    /// A call opcode referenced an intrinsic symbol the builtin table does
    /// not know about.
    #[error("unknown intrinsic `{symbol}`")]
    UnknownIntrinsic {
        /// The requested symbol.
        symbol: String,
    },
    /// The interpreter was asked to run with no chunks loaded.
    #[error("no entry chunk loaded")]
    NoEntryChunk,
}

/// Result alias for fallible VM operations that may produce a full
/// [`VmError`].
pub type VmResult<T> = Result<T, VmError>;

/// Result alias for opcode handlers, which only ever fail with a
/// [`RuntimeError`] (embedding-level faults are checked before dispatch
/// begins).
pub type OpResult<T> = Result<T, RuntimeError>;
