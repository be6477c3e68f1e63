//! Interpreter loop (C11): dispatch, call frames, GC/profiling/JIT hooks.
//!
//! One [`Interpreter`] owns every piece of runtime state: the loaded
//! chunks and their specialized counterparts, the register cache, the
//! heap, the profiler, the intrinsic table, and a JIT backend. Dispatch is
//! a plain fetch-decode-execute loop over a contiguous call-frame stack;
//! handlers return through ordinary `?`, and a `try`/`try_end` bracket
//! unwinds frames explicitly rather than using Rust-native panics (§9:
//! "model them as explicit unwind records... never as language-native
//! exception types").

use hashbrown::HashMap;

use crate::{
    builtins::IntrinsicTable,
    chunk::Chunk,
    consts::{
        FRAME_WINDOW_SIZE,
        GC_HEAP_GROW_FACTOR,
        GC_INITIAL_THRESHOLD,
        MAX_CALL_DEPTH,
        SPECIALIZATION_HIT_THRESHOLD,
    },
    error::{
        OpResult,
        RuntimeError,
        RuntimeErrorKind,
        SourceSpan,
        VmError,
        VmResult,
    },
    gc::{
        Heap,
        RootSource,
    },
    jit::{
        JitBackend,
        JitOutcome,
        NoJit,
    },
    object::{
        ObjectPayload,
        ObjectRef,
    },
    opcode::Opcode,
    profiler::Profiler,
    register::{
        RegId,
        RegisterTier,
        cache::RegisterCache,
    },
    specialize::{
        SpecializationStage,
        SpecializedChunk,
    },
    value::{
        Value,
        ValueType,
    },
};

/// Embedder-overridable knobs, mirroring every heuristic constant in
/// [`crate::consts`] (§10.3). `Default` reproduces the spec's literal
/// numbers exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct VmConfig {
    gc_initial_threshold: usize,
    gc_heap_grow_factor: f64,
    specialization_hit_threshold: u64,
    max_call_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            gc_initial_threshold: GC_INITIAL_THRESHOLD,
            gc_heap_grow_factor: GC_HEAP_GROW_FACTOR,
            specialization_hit_threshold: SPECIALIZATION_HIT_THRESHOLD,
            max_call_depth: MAX_CALL_DEPTH,
        }
    }
}

impl VmConfig {
    /// The default configuration (see [`VmConfig::default`]).
    pub fn new() -> Self {
        VmConfig::default()
    }

    /// Override the initial GC threshold, in bytes.
    pub fn with_gc_initial_threshold(mut self, bytes: usize) -> Self {
        self.gc_initial_threshold = bytes;
        self
    }

    /// Override the GC heap grow factor.
    pub fn with_gc_heap_grow_factor(mut self, factor: f64) -> Self {
        self.gc_heap_grow_factor = factor;
        self
    }

    /// Override the specialization eligibility threshold.
    pub fn with_specialization_hit_threshold(mut self, threshold: u64) -> Self {
        self.specialization_hit_threshold = threshold;
        self
    }

    /// Override the maximum call-frame depth.
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct CallFrame {
    function_index: u32,
    ip: usize,
    window_base: u16,
    dst: Option<u8>,
    specialized: bool,
}

#[derive(Debug, Clone, Copy)]
struct TryFrame {
    frame_depth: usize,
    handler_ip: usize,
}

/// A loan of the interpreter's GC roots, built on demand around each
/// allocation so [`Heap::allocate_object`] never needs to borrow all of
/// `Interpreter` at once (§4.1: roots are every register slot and every
/// global).
struct Roots<'a> {
    cache: &'a RegisterCache,
    globals: &'a HashMap<u16, Value>,
}

impl RootSource for Roots<'_> {
    fn collect_roots(&self, out: &mut Vec<ObjectRef>) {
        out.extend(self.cache.register_file().iter_values().filter_map(|v| v.as_object()));
        out.extend(self.globals.values().filter_map(|v| v.as_object()));
    }
}

impl RootSource for Interpreter {
    fn collect_roots(&self, out: &mut Vec<ObjectRef>) {
        Roots {
            cache: &self.cache,
            globals: &self.globals,
        }
        .collect_roots(out);
    }
}

#[derive(Clone, Copy)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Clone, Copy)]
enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

fn compare<T: PartialOrd>(op: CmpOp, a: T, b: T) -> bool {
    match op {
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
    }
}

fn overflow(op: &'static str) -> RuntimeError {
    RuntimeError {
        kind: RuntimeErrorKind::ArithmeticOverflow { op },
        span: SourceSpan::default(),
    }
}

fn div_zero() -> RuntimeError {
    RuntimeError {
        kind: RuntimeErrorKind::DivisionByZero,
        span: SourceSpan::default(),
    }
}

fn type_mismatch(expected: &'static str, actual: Value) -> RuntimeError {
    RuntimeError {
        kind: RuntimeErrorKind::TypeMismatch {
            expected,
            actual: actual.value_type().name(),
        },
        span: SourceSpan::default(),
    }
}

macro_rules! checked_numeric {
    ($name:ident, $ty:ty, $label:literal) => {
        fn $name(op: ArithOp, a: $ty, b: $ty) -> OpResult<$ty> {
            match op {
                ArithOp::Add => a.checked_add(b).ok_or_else(|| overflow(concat!($label, " add"))),
                ArithOp::Sub => a.checked_sub(b).ok_or_else(|| overflow(concat!($label, " sub"))),
                ArithOp::Mul => a.checked_mul(b).ok_or_else(|| overflow(concat!($label, " mul"))),
                ArithOp::Div => {
                    if b == 0 {
                        return Err(div_zero());
                    }
                    a.checked_div(b).ok_or_else(|| overflow(concat!($label, " div")))
                }
                ArithOp::Mod => {
                    if b == 0 {
                        return Err(div_zero());
                    }
                    a.checked_rem(b).ok_or_else(|| overflow(concat!($label, " mod")))
                }
            }
        }
    };
}

checked_numeric!(arith_i32, i32, "i32");
checked_numeric!(arith_i64, i64, "i64");
checked_numeric!(arith_u32, u32, "u32");
checked_numeric!(arith_u64, u64, "u64");

fn arith_f64(op: ArithOp, a: f64, b: f64) -> OpResult<f64> {
    Ok(match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Mod => a % b,
    })
}

/// The register-based bytecode interpreter.
///
/// Single-threaded and cooperative (§5): every field here is confined to
/// the thread that calls [`Interpreter::run`]; no opcode handler yields to
/// another interpretation context.
pub struct Interpreter {
    chunks: Vec<Chunk>,
    arities: Vec<u8>,
    specialized: HashMap<u32, SpecializedChunk>,
    compiler_hot_counts: HashMap<u32, u64>,
    cache: RegisterCache,
    heap: Heap,
    profiler: Profiler,
    intrinsics: IntrinsicTable,
    jit: Box<dyn JitBackend>,
    globals: HashMap<u16, Value>,
    frames: Vec<CallFrame>,
    try_stack: Vec<TryFrame>,
    last_error: Option<RuntimeError>,
    config: VmConfig,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// An interpreter with the default [`VmConfig`], no chunks loaded, and
    /// [`NoJit`] as its backend.
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    /// An interpreter using an embedder-supplied configuration.
    pub fn with_config(config: VmConfig) -> Self {
        Interpreter {
            chunks: Vec::new(),
            arities: Vec::new(),
            specialized: HashMap::new(),
            compiler_hot_counts: HashMap::new(),
            cache: RegisterCache::new(),
            heap: Heap::with_config(config.gc_initial_threshold, config.gc_heap_grow_factor),
            profiler: Profiler::with_threshold(config.specialization_hit_threshold),
            intrinsics: IntrinsicTable::new(),
            jit: Box::new(NoJit),
            globals: HashMap::new(),
            frames: Vec::new(),
            try_stack: Vec::new(),
            last_error: None,
            config,
        }
    }

    /// Swap in a real JIT backend (default is [`NoJit`]).
    pub fn with_jit(mut self, jit: impl JitBackend + 'static) -> Self {
        self.jit = Box::new(jit);
        self
    }

    /// Load a function's baseline chunk, returning its function index.
    /// Rejects a chunk with unpatched forward jumps (§8 patch-closure).
    pub fn load_chunk(&mut self, chunk: Chunk, arity: u8) -> VmResult<u32> {
        chunk.finalize()?;
        self.chunks.push(chunk);
        self.arities.push(arity);
        Ok((self.chunks.len() - 1) as u32)
    }

    /// Read-only access to the heap, e.g. for an embedder inspecting a
    /// returned object.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Read-only access to the profiler.
    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    /// Mutable access to the profiler (e.g. to toggle it active before a
    /// run).
    pub fn profiler_mut(&mut self) -> &mut Profiler {
        &mut self.profiler
    }

    /// Set a global slot directly (an embedder's equivalent of a
    /// top-level `let`).
    pub fn set_global(&mut self, slot: u16, value: Value) {
        self.globals.insert(slot, value);
    }

    /// Read a global slot.
    pub fn global(&self, slot: u16) -> Option<Value> {
        self.globals.get(&slot).copied()
    }

    /// Whether `function_index` currently has a specialized chunk.
    pub fn is_specialized(&self, function_index: u32) -> bool {
        self.specialized.contains_key(&function_index)
    }

    /// Record one compiler-side hot-count observation for `function_index`
    /// and attempt specialization if both the compiler's count and the
    /// profiler's feedback now agree it is eligible (§4.7's dual
    /// condition). A no-op once a specialized chunk already exists.
    pub fn record_compile_hit(&mut self, function_index: u32) {
        if self.specialized.contains_key(&function_index) {
            return;
        }
        let count = self.compiler_hot_counts.entry(function_index).or_insert(0);
        *count += 1;
        let count = *count;
        let feedback = self.profiler.feedback(function_index);
        let threshold = self.config.specialization_hit_threshold;
        if let Some(chunk) = self.chunks.get(function_index as usize) {
            if let Some(specialized) = SpecializationStage::specialize(chunk, feedback, count, threshold) {
                self.specialized.insert(function_index, specialized);
            }
        }
    }

    /// Run `function_index` as the program entry point with no arguments,
    /// to completion or the first unrecovered runtime error.
    pub fn run(&mut self, function_index: u32) -> VmResult<Value> {
        if self.chunks.get(function_index as usize).is_none() {
            return Err(VmError::NoEntryChunk);
        }
        self.push_frame(function_index, None, &[])
            .map_err(VmError::Runtime)?;
        self.dispatch()
    }

    fn allocate(&mut self, payload: ObjectPayload) -> OpResult<ObjectRef> {
        let roots = Roots {
            cache: &self.cache,
            globals: &self.globals,
        };
        self.heap.allocate_object(payload, &roots).map_err(|kind| RuntimeError {
            kind,
            span: SourceSpan::default(),
        })
    }

    /// Force a collection now, regardless of threshold. Exposed for
    /// embedders and integration tests that want a deterministic GC point.
    pub fn collect_garbage(&mut self) {
        let roots = Roots {
            cache: &self.cache,
            globals: &self.globals,
        };
        self.heap.collect(&roots);
    }

    fn code_for(&self, function_index: u32, specialized: bool) -> &[u8] {
        if specialized {
            if let Some(s) = self.specialized.get(&function_index) {
                return s.chunk.code();
            }
        }
        self.chunks[function_index as usize].code()
    }

    fn chunk_for(&self, function_index: u32, specialized: bool) -> &Chunk {
        if specialized {
            if let Some(s) = self.specialized.get(&function_index) {
                return &s.chunk;
            }
        }
        &self.chunks[function_index as usize]
    }

    fn reg_id(base: u16, r: u8) -> RegId {
        RegId::new(RegisterTier::Frame, base + r as u16)
    }

    fn read_reg(&mut self, base: u16, r: u8) -> Value {
        self.cache.cached_get(Self::reg_id(base, r))
    }

    fn write_reg(&mut self, base: u16, r: u8, v: Value) {
        self.cache.cached_set(Self::reg_id(base, r), v);
    }

    fn push_frame(&mut self, function_index: u32, dst: Option<u8>, args: &[Value]) -> OpResult<()> {
        // A `RegId`'s per-tier index is 14 bits wide (§ register module), so
        // only so many `FRAME_WINDOW_SIZE`-sized windows fit in the Frame
        // tier's address space regardless of `config.max_call_depth`;
        // enforcing the tighter of the two bounds here means a deep-enough
        // call chain always reports `StackOverflow` instead of overrunning
        // into another frame's window.
        const FRAME_TIER_ADDRESS_SPACE: u16 = 1 << 14;
        let max_depth_by_window = (FRAME_TIER_ADDRESS_SPACE / FRAME_WINDOW_SIZE) as usize;
        if self.frames.len() >= self.config.max_call_depth.min(max_depth_by_window) {
            return Err(RuntimeError {
                kind: RuntimeErrorKind::StackOverflow,
                span: SourceSpan::default(),
            });
        }
        let window_base = (self.frames.len() as u16).saturating_mul(FRAME_WINDOW_SIZE);
        for (i, &value) in args.iter().enumerate() {
            self.write_reg(window_base, i as u8, value);
        }
        let specialized = self.specialized.contains_key(&function_index);
        self.profiler.record_call(function_index, args.len() as u8);
        self.frames.push(CallFrame {
            function_index,
            ip: 0,
            window_base,
            dst,
            specialized,
        });
        Ok(())
    }

    fn dispatch(&mut self) -> VmResult<Value> {
        loop {
            if self.frames.is_empty() {
                return Ok(Value::Nil);
            }
            match self.step() {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => continue,
                Err(err) => {
                    if self.unwind_to_handler() {
                        self.last_error = Some(err);
                        continue;
                    }
                    return Err(VmError::Runtime(err));
                }
            }
        }
    }

    fn unwind_to_handler(&mut self) -> bool {
        let Some(try_frame) = self.try_stack.pop() else {
            return false;
        };
        self.frames.truncate(try_frame.frame_depth);
        let Some(frame) = self.frames.last_mut() else {
            return false;
        };
        frame.ip = try_frame.handler_ip;
        true
    }

    /// Execute one instruction. `Ok(Some(value))` means the whole program
    /// halted or the outermost frame returned; `Ok(None)` means dispatch
    /// should keep going.
    fn step(&mut self) -> OpResult<Option<Value>> {
        let frame = *self.frames.last().expect("dispatch never calls step with an empty frame stack");
        let (op, operands) = {
            let code = self.code_for(frame.function_index, frame.specialized);
            let op = Opcode::from_byte(code[frame.ip])
                .expect("chunk bytes are valid opcodes: load_chunk()/specialize() are the only producers and both start from a finalized chunk");
            // Every opcode's operands fit in 3 bytes (max instruction width is 4).
            // Copying them out up front means nothing below borrows `self` through
            // `code` once the match starts.
            let mut operands = [0u8; 3];
            for (i, slot) in operands.iter_mut().enumerate() {
                if let Some(&b) = code.get(frame.ip + 1 + i) {
                    *slot = b;
                }
            }
            (op, operands)
        };
        let width = op.width() as usize;
        let base = frame.window_base;
        let operand = |at: usize| operands[at];
        let operand_short = |at: usize| u16::from_be_bytes([operands[at], operands[at + 1]]);
        let next_ip = frame.ip + width;

        macro_rules! frame_mut {
            () => {
                self.frames.last_mut().expect("current frame")
            };
        }

        match op {
            // Arithmetic, generic and typed, per numeric type.
            Opcode::ADD_I32_R | Opcode::ADD_I32_TYPED
            | Opcode::SUB_I32_R | Opcode::SUB_I32_TYPED
            | Opcode::MUL_I32_R | Opcode::MUL_I32_TYPED
            | Opcode::DIV_I32_R | Opcode::DIV_I32_TYPED
            | Opcode::MOD_I32_R | Opcode::MOD_I32_TYPED => {
                let (dst, a, b) = (operand(0), operand(1), operand(2));
                let (arith, typed) = Self::decode_arith(op);
                if typed {
                    self.exec_typed_arith(base, dst, a, b, ValueType::I32, arith)?;
                } else {
                    self.exec_generic_arith(base, dst, a, b, ValueType::I32, arith)?;
                }
            }
            Opcode::ADD_I64_R | Opcode::ADD_I64_TYPED
            | Opcode::SUB_I64_R | Opcode::SUB_I64_TYPED
            | Opcode::MUL_I64_R | Opcode::MUL_I64_TYPED
            | Opcode::DIV_I64_R | Opcode::DIV_I64_TYPED
            | Opcode::MOD_I64_R | Opcode::MOD_I64_TYPED => {
                let (dst, a, b) = (operand(0), operand(1), operand(2));
                let (arith, typed) = Self::decode_arith(op);
                if typed {
                    self.exec_typed_arith(base, dst, a, b, ValueType::I64, arith)?;
                } else {
                    self.exec_generic_arith(base, dst, a, b, ValueType::I64, arith)?;
                }
            }
            Opcode::ADD_F64_R | Opcode::ADD_F64_TYPED
            | Opcode::SUB_F64_R | Opcode::SUB_F64_TYPED
            | Opcode::MUL_F64_R | Opcode::MUL_F64_TYPED
            | Opcode::DIV_F64_R | Opcode::DIV_F64_TYPED
            | Opcode::MOD_F64_R | Opcode::MOD_F64_TYPED => {
                let (dst, a, b) = (operand(0), operand(1), operand(2));
                let (arith, typed) = Self::decode_arith(op);
                if typed {
                    self.exec_typed_arith(base, dst, a, b, ValueType::F64, arith)?;
                } else {
                    self.exec_generic_arith(base, dst, a, b, ValueType::F64, arith)?;
                }
            }
            // U32/U64: both "_R" and "_TYPED" forms execute through the
            // generic path. The register file's typed shadow pane has no
            // unsigned slot (§4.2/§4.7: the specializer never targets
            // these types, so no guard prologue ever establishes one);
            // `_TYPED` is accepted for decoder completeness only.
            Opcode::ADD_U32_R | Opcode::ADD_U32_TYPED
            | Opcode::SUB_U32_R | Opcode::SUB_U32_TYPED
            | Opcode::MUL_U32_R | Opcode::MUL_U32_TYPED
            | Opcode::DIV_U32_R | Opcode::DIV_U32_TYPED
            | Opcode::MOD_U32_R | Opcode::MOD_U32_TYPED => {
                let (dst, a, b) = (operand(0), operand(1), operand(2));
                let (arith, _typed) = Self::decode_arith(op);
                self.exec_generic_arith(base, dst, a, b, ValueType::U32, arith)?;
            }
            Opcode::ADD_U64_R | Opcode::ADD_U64_TYPED
            | Opcode::SUB_U64_R | Opcode::SUB_U64_TYPED
            | Opcode::MUL_U64_R | Opcode::MUL_U64_TYPED
            | Opcode::DIV_U64_R | Opcode::DIV_U64_TYPED
            | Opcode::MOD_U64_R | Opcode::MOD_U64_TYPED => {
                let (dst, a, b) = (operand(0), operand(1), operand(2));
                let (arith, _typed) = Self::decode_arith(op);
                self.exec_generic_arith(base, dst, a, b, ValueType::U64, arith)?;
            }

            // Comparisons, generic and typed, per numeric type.
            Opcode::LT_I32_R | Opcode::LT_I32_TYPED | Opcode::LE_I32_R | Opcode::LE_I32_TYPED
            | Opcode::GT_I32_R | Opcode::GT_I32_TYPED | Opcode::GE_I32_R | Opcode::GE_I32_TYPED
            | Opcode::EQ_I32_R | Opcode::EQ_I32_TYPED | Opcode::NE_I32_R | Opcode::NE_I32_TYPED => {
                let (dst, a, b) = (operand(0), operand(1), operand(2));
                let (cmp, typed) = Self::decode_cmp(op);
                if typed {
                    self.exec_typed_cmp_i32(base, dst, a, b, cmp)?;
                } else {
                    self.exec_generic_cmp(base, dst, a, b, ValueType::I32, cmp)?;
                }
            }
            Opcode::LT_I64_R | Opcode::LT_I64_TYPED | Opcode::LE_I64_R | Opcode::LE_I64_TYPED
            | Opcode::GT_I64_R | Opcode::GT_I64_TYPED | Opcode::GE_I64_R | Opcode::GE_I64_TYPED
            | Opcode::EQ_I64_R | Opcode::EQ_I64_TYPED | Opcode::NE_I64_R | Opcode::NE_I64_TYPED => {
                let (dst, a, b) = (operand(0), operand(1), operand(2));
                let (cmp, typed) = Self::decode_cmp(op);
                if typed {
                    self.exec_typed_cmp_i64(base, dst, a, b, cmp)?;
                } else {
                    self.exec_generic_cmp(base, dst, a, b, ValueType::I64, cmp)?;
                }
            }
            Opcode::LT_F64_R | Opcode::LT_F64_TYPED | Opcode::LE_F64_R | Opcode::LE_F64_TYPED
            | Opcode::GT_F64_R | Opcode::GT_F64_TYPED | Opcode::GE_F64_R | Opcode::GE_F64_TYPED
            | Opcode::EQ_F64_R | Opcode::EQ_F64_TYPED | Opcode::NE_F64_R | Opcode::NE_F64_TYPED => {
                let (dst, a, b) = (operand(0), operand(1), operand(2));
                let (cmp, typed) = Self::decode_cmp(op);
                if typed {
                    self.exec_typed_cmp_f64(base, dst, a, b, cmp)?;
                } else {
                    self.exec_generic_cmp(base, dst, a, b, ValueType::F64, cmp)?;
                }
            }
            Opcode::LT_U32_R | Opcode::LT_U32_TYPED | Opcode::LE_U32_R | Opcode::LE_U32_TYPED
            | Opcode::GT_U32_R | Opcode::GT_U32_TYPED | Opcode::GE_U32_R | Opcode::GE_U32_TYPED
            | Opcode::EQ_U32_R | Opcode::EQ_U32_TYPED | Opcode::NE_U32_R | Opcode::NE_U32_TYPED => {
                let (dst, a, b) = (operand(0), operand(1), operand(2));
                let (cmp, _typed) = Self::decode_cmp(op);
                self.exec_generic_cmp(base, dst, a, b, ValueType::U32, cmp)?;
            }
            Opcode::LT_U64_R | Opcode::LT_U64_TYPED | Opcode::LE_U64_R | Opcode::LE_U64_TYPED
            | Opcode::GT_U64_R | Opcode::GT_U64_TYPED | Opcode::GE_U64_R | Opcode::GE_U64_TYPED
            | Opcode::EQ_U64_R | Opcode::EQ_U64_TYPED | Opcode::NE_U64_R | Opcode::NE_U64_TYPED => {
                let (dst, a, b) = (operand(0), operand(1), operand(2));
                let (cmp, _typed) = Self::decode_cmp(op);
                self.exec_generic_cmp(base, dst, a, b, ValueType::U64, cmp)?;
            }

            // Logical / bitwise.
            Opcode::AND_BOOL | Opcode::OR_BOOL => {
                let (dst, a, b) = (operand(0), operand(1), operand(2));
                let (Value::Bool(x), Value::Bool(y)) = (self.read_reg(base, a), self.read_reg(base, b)) else {
                    return Err(type_mismatch("bool", self.read_reg(base, a)));
                };
                let result = if op == Opcode::AND_BOOL { x && y } else { x || y };
                self.write_reg(base, dst, Value::Bool(result));
            }
            Opcode::NOT_BOOL => {
                let (dst, src) = (operand(0), operand(1));
                let Value::Bool(x) = self.read_reg(base, src) else {
                    return Err(type_mismatch("bool", self.read_reg(base, src)));
                };
                self.write_reg(base, dst, Value::Bool(!x));
            }
            Opcode::BIT_AND_I64 | Opcode::BIT_OR_I64 | Opcode::BIT_XOR_I64 | Opcode::BIT_SHL_I64 | Opcode::BIT_SHR_I64 => {
                let (dst, a, b) = (operand(0), operand(1), operand(2));
                let (Value::I64(x), Value::I64(y)) = (self.read_reg(base, a), self.read_reg(base, b)) else {
                    return Err(type_mismatch("i64", self.read_reg(base, a)));
                };
                let result = match op {
                    Opcode::BIT_AND_I64 => x & y,
                    Opcode::BIT_OR_I64 => x | y,
                    Opcode::BIT_XOR_I64 => x ^ y,
                    Opcode::BIT_SHL_I64 => x << (y & 63),
                    _ => x >> (y & 63),
                };
                self.write_reg(base, dst, Value::I64(result));
            }
            Opcode::BIT_NOT_I64 => {
                let (dst, src) = (operand(0), operand(1));
                let Value::I64(x) = self.read_reg(base, src) else {
                    return Err(type_mismatch("i64", self.read_reg(base, src)));
                };
                self.write_reg(base, dst, Value::I64(!x));
            }

            // Moves.
            Opcode::MOVE => {
                let (dst, src) = (operand(0), operand(1));
                let value = self.read_reg(base, src);
                self.write_reg(base, dst, value);
            }
            Opcode::MOVE_I32_TYPED | Opcode::MOVE_I64_TYPED | Opcode::MOVE_F64_TYPED | Opcode::MOVE_BOOL_TYPED => {
                let (dst, src) = (operand(0), operand(1));
                let guard = match op {
                    Opcode::MOVE_I32_TYPED => ValueType::I32,
                    Opcode::MOVE_I64_TYPED => ValueType::I64,
                    Opcode::MOVE_F64_TYPED => ValueType::F64,
                    _ => ValueType::Bool,
                };
                if !self.exec_guard_move(base, dst, src, guard) {
                    if frame.specialized {
                        frame_mut!().specialized = false;
                        frame_mut!().ip = 0;
                        self.jit.on_deoptimize(frame.function_index, 0);
                        return Ok(None);
                    }
                    return Err(type_mismatch(guard.name(), self.read_reg(base, src)));
                }
            }

            // Constants, globals.
            Opcode::LOAD_CONST => {
                let dst = operand(0);
                let idx = operand_short(1) as usize;
                let value = *self
                    .chunk_for(frame.function_index, frame.specialized)
                    .constants()
                    .get(idx)
                    .expect("LOAD_CONST operand always indexes a constant the emitter registered");
                self.write_reg(base, dst, value);
            }
            Opcode::LOAD_GLOBAL => {
                let dst = operand(0);
                let slot = operand_short(1);
                let value = self.globals.get(&slot).copied().ok_or_else(|| RuntimeError {
                    kind: RuntimeErrorKind::UndefinedGlobal {
                        name: format!("g{slot}"),
                    },
                    span: SourceSpan::default(),
                })?;
                self.write_reg(base, dst, value);
            }
            Opcode::STORE_GLOBAL => {
                let src = operand(0);
                let slot = operand_short(1);
                let value = self.read_reg(base, src);
                self.globals.insert(slot, value);
            }

            // Control flow.
            Opcode::JUMP => {
                let delta = operand_short(0);
                frame_mut!().ip = next_ip + delta as usize;
                return Ok(None);
            }
            Opcode::JUMP_SHORT => {
                let delta = operand(0) as i8;
                frame_mut!().ip = (next_ip as isize + delta as isize) as usize;
                return Ok(None);
            }
            Opcode::JUMP_IF_TRUE | Opcode::JUMP_IF_FALSE => {
                let reg = operand(0);
                let delta = operand(1) as i8;
                let cond = self.read_reg(base, reg).is_truthy();
                let taken = if op == Opcode::JUMP_IF_TRUE { cond } else { !cond };
                frame_mut!().ip = if taken {
                    (next_ip as isize + delta as isize) as usize
                } else {
                    next_ip
                };
                return Ok(None);
            }
            Opcode::JUMP_IF_TRUE_LONG | Opcode::JUMP_IF_FALSE_LONG => {
                let reg = operand(0);
                let delta = operand_short(1);
                let cond = self.read_reg(base, reg).is_truthy();
                let taken = if op == Opcode::JUMP_IF_TRUE_LONG { cond } else { !cond };
                frame_mut!().ip = if taken { next_ip + delta as usize } else { next_ip };
                return Ok(None);
            }
            Opcode::LOOP | Opcode::LOOP_LONG => {
                let delta = if op == Opcode::LOOP {
                    operand(0) as usize
                } else {
                    operand_short(0) as usize
                };
                self.profiler.record_hot_path(frame.ip as u32);
                if self.jit.compiled_entry(frame.function_index, frame.ip as u32) {
                    let regs = self.cache.register_file_mut();
                    match self.jit.enter(frame.function_index, frame.ip as u32, regs) {
                        JitOutcome::Completed => {}
                        JitOutcome::Deoptimized { resume_offset } => {
                            frame_mut!().ip = resume_offset;
                            return Ok(None);
                        }
                    }
                }
                frame_mut!().ip = next_ip - delta;
                return Ok(None);
            }

            // Call / return.
            Opcode::CALL => {
                let (dst, first_arg, func_index) = (operand(0), operand(1), operand(2));
                frame_mut!().ip = next_ip;
                let callee = func_index as u32;
                let arity = *self.arities.get(callee as usize).unwrap_or(&0);
                let mut args = Vec::with_capacity(arity as usize);
                for i in 0..arity {
                    args.push(self.read_reg(base, first_arg + i));
                }
                self.push_frame(callee, Some(dst), &args)?;
                self.record_compile_hit(callee);
                return Ok(None);
            }
            Opcode::RETURN | Opcode::RETURN_NIL => {
                let value = if op == Opcode::RETURN {
                    self.read_reg(base, operand(0))
                } else {
                    Value::Nil
                };
                let finished = self.frames.pop().expect("current frame");
                if self.frames.is_empty() {
                    return Ok(Some(value));
                }
                if let Some(dst) = finished.dst {
                    let caller_base = self.frames.last().expect("caller frame").window_base;
                    self.write_reg(caller_base, dst, value);
                }
                return Ok(None);
            }

            // Iterators.
            Opcode::ITER_OPEN => {
                let (dst, src) = (operand(0), operand(1));
                let Value::Object(array) = self.read_reg(base, src) else {
                    return Err(type_mismatch("array", self.read_reg(base, src)));
                };
                let obj = self.allocate(ObjectPayload::ArrayIterator { array, index: 0 })?;
                self.write_reg(base, dst, Value::Object(obj));
            }
            Opcode::ITER_NEXT => {
                let (dst, has_more_dst, iter_reg) = (operand(0), operand(1), operand(2));
                let Value::Object(iter_ref) = self.read_reg(base, iter_reg) else {
                    return Err(type_mismatch("iterator", self.read_reg(base, iter_reg)));
                };
                let (value, has_more, advance) = self.advance_iterator(iter_ref)?;
                if let Some(payload) = advance {
                    if let Some(obj) = self.heap.get_mut(iter_ref) {
                        *obj.payload_mut() = payload;
                    }
                }
                self.write_reg(base, dst, value);
                self.write_reg(base, has_more_dst, Value::Bool(has_more));
            }

            // Arrays.
            Opcode::ARRAY_NEW => {
                let dst = operand(0);
                let obj = self.allocate(ObjectPayload::Array(Vec::new()))?;
                self.write_reg(base, dst, Value::Object(obj));
            }
            Opcode::ARRAY_GET => {
                let (dst, arr_reg, idx_reg) = (operand(0), operand(1), operand(2));
                let Value::Object(arr) = self.read_reg(base, arr_reg) else {
                    return Err(type_mismatch("array", self.read_reg(base, arr_reg)));
                };
                let index = Self::as_index(self.read_reg(base, idx_reg))?;
                let value = self.heap.array_get(arr, index).ok_or_else(|| RuntimeError {
                    kind: RuntimeErrorKind::IndexOutOfBounds {
                        index: index as i64,
                        len: self.array_len(arr).unwrap_or(0),
                    },
                    span: SourceSpan::default(),
                })?;
                self.write_reg(base, dst, value);
            }
            Opcode::ARRAY_SET => {
                let (arr_reg, idx_reg, val_reg) = (operand(0), operand(1), operand(2));
                let Value::Object(arr) = self.read_reg(base, arr_reg) else {
                    return Err(type_mismatch("array", self.read_reg(base, arr_reg)));
                };
                let index = Self::as_index(self.read_reg(base, idx_reg))?;
                let value = self.read_reg(base, val_reg);
                let len = self.array_len(arr).unwrap_or(0);
                let Some(obj) = self.heap.get_mut(arr) else {
                    return Err(type_mismatch("array", Value::Object(arr)));
                };
                let ObjectPayload::Array(items) = obj.payload_mut() else {
                    return Err(type_mismatch("array", Value::Object(arr)));
                };
                let Some(slot) = items.get_mut(index) else {
                    return Err(RuntimeError {
                        kind: RuntimeErrorKind::IndexOutOfBounds {
                            index: index as i64,
                            len,
                        },
                        span: SourceSpan::default(),
                    });
                };
                *slot = value;
            }
            Opcode::ARRAY_LEN => {
                let (dst, arr_reg) = (operand(0), operand(1));
                let Value::Object(arr) = self.read_reg(base, arr_reg) else {
                    return Err(type_mismatch("array", self.read_reg(base, arr_reg)));
                };
                let len = self.array_len(arr).ok_or_else(|| type_mismatch("array", Value::Object(arr)))?;
                self.write_reg(base, dst, Value::I64(len as i64));
            }

            // Checked increment/decrement (§4.3).
            Opcode::INC_CHECKED | Opcode::DEC_CHECKED => {
                let reg = operand(0);
                let delta = if op == Opcode::INC_CHECKED { 1 } else { -1 };
                let id = Self::reg_id(base, reg);
                if let Some(n) = self.cache.register_file().get_typed_i32(id) {
                    match n.checked_add(delta) {
                        Some(next) => self.cache.register_file_mut().set_typed_i32(id, next),
                        None => {
                            self.cache.register_file_mut().demote(id);
                            return Err(overflow(if delta > 0 { "i32 increment" } else { "i32 decrement" }));
                        }
                    }
                } else {
                    let Value::I32(n) = self.read_reg(base, reg) else {
                        return Err(type_mismatch("i32", self.read_reg(base, reg)));
                    };
                    let next = n
                        .checked_add(delta)
                        .ok_or_else(|| overflow(if delta > 0 { "i32 increment" } else { "i32 decrement" }))?;
                    self.write_reg(base, reg, Value::I32(next));
                }
            }

            // Exception handling.
            Opcode::TRY_BEGIN => {
                let delta = operand_short(0);
                self.try_stack.push(TryFrame {
                    frame_depth: self.frames.len(),
                    handler_ip: next_ip + delta as usize,
                });
            }
            Opcode::TRY_END => {
                self.try_stack.pop();
            }

            // I/O and diagnostics.
            Opcode::PRINT => {
                let value = self.read_reg(base, operand(0));
                self.heap.pause();
                let result = self.intrinsics.call("print", &[value], &mut self.heap);
                self.heap.resume();
                result?;
            }
            Opcode::ASSERT => {
                let reg = operand(0);
                let value = self.read_reg(base, reg);
                if !value.is_truthy() {
                    return Err(RuntimeError {
                        kind: RuntimeErrorKind::AssertionFailed {
                            message: format!("register r{reg} in function {} was falsy", frame.function_index),
                        },
                        span: SourceSpan::default(),
                    });
                }
            }

            Opcode::HALT => {
                let value = self.read_reg(base, 0);
                return Ok(Some(value));
            }
        }

        frame_mut!().ip = next_ip;
        Ok(None)
    }

    fn decode_arith(op: Opcode) -> (ArithOp, bool) {
        use Opcode::*;
        let typed = matches!(
            op,
            ADD_I32_TYPED | SUB_I32_TYPED | MUL_I32_TYPED | DIV_I32_TYPED | MOD_I32_TYPED
                | ADD_I64_TYPED | SUB_I64_TYPED | MUL_I64_TYPED | DIV_I64_TYPED | MOD_I64_TYPED
                | ADD_U32_TYPED | SUB_U32_TYPED | MUL_U32_TYPED | DIV_U32_TYPED | MOD_U32_TYPED
                | ADD_U64_TYPED | SUB_U64_TYPED | MUL_U64_TYPED | DIV_U64_TYPED | MOD_U64_TYPED
                | ADD_F64_TYPED | SUB_F64_TYPED | MUL_F64_TYPED | DIV_F64_TYPED | MOD_F64_TYPED
        );
        let arith = match op {
            ADD_I32_R | ADD_I32_TYPED | ADD_I64_R | ADD_I64_TYPED | ADD_U32_R | ADD_U32_TYPED
            | ADD_U64_R | ADD_U64_TYPED | ADD_F64_R | ADD_F64_TYPED => ArithOp::Add,
            SUB_I32_R | SUB_I32_TYPED | SUB_I64_R | SUB_I64_TYPED | SUB_U32_R | SUB_U32_TYPED
            | SUB_U64_R | SUB_U64_TYPED | SUB_F64_R | SUB_F64_TYPED => ArithOp::Sub,
            MUL_I32_R | MUL_I32_TYPED | MUL_I64_R | MUL_I64_TYPED | MUL_U32_R | MUL_U32_TYPED
            | MUL_U64_R | MUL_U64_TYPED | MUL_F64_R | MUL_F64_TYPED => ArithOp::Mul,
            DIV_I32_R | DIV_I32_TYPED | DIV_I64_R | DIV_I64_TYPED | DIV_U32_R | DIV_U32_TYPED
            | DIV_U64_R | DIV_U64_TYPED | DIV_F64_R | DIV_F64_TYPED => ArithOp::Div,
            _ => ArithOp::Mod,
        };
        (arith, typed)
    }

    fn decode_cmp(op: Opcode) -> (CmpOp, bool) {
        use Opcode::*;
        let typed = matches!(
            op,
            LT_I32_TYPED | LE_I32_TYPED | GT_I32_TYPED | GE_I32_TYPED | EQ_I32_TYPED | NE_I32_TYPED
                | LT_I64_TYPED | LE_I64_TYPED | GT_I64_TYPED | GE_I64_TYPED | EQ_I64_TYPED | NE_I64_TYPED
                | LT_U32_TYPED | LE_U32_TYPED | GT_U32_TYPED | GE_U32_TYPED | EQ_U32_TYPED | NE_U32_TYPED
                | LT_U64_TYPED | LE_U64_TYPED | GT_U64_TYPED | GE_U64_TYPED | EQ_U64_TYPED | NE_U64_TYPED
                | LT_F64_TYPED | LE_F64_TYPED | GT_F64_TYPED | GE_F64_TYPED | EQ_F64_TYPED | NE_F64_TYPED
        );
        let cmp = match op {
            LT_I32_R | LT_I32_TYPED | LT_I64_R | LT_I64_TYPED | LT_U32_R | LT_U32_TYPED | LT_U64_R
            | LT_U64_TYPED | LT_F64_R | LT_F64_TYPED => CmpOp::Lt,
            LE_I32_R | LE_I32_TYPED | LE_I64_R | LE_I64_TYPED | LE_U32_R | LE_U32_TYPED | LE_U64_R
            | LE_U64_TYPED | LE_F64_R | LE_F64_TYPED => CmpOp::Le,
            GT_I32_R | GT_I32_TYPED | GT_I64_R | GT_I64_TYPED | GT_U32_R | GT_U32_TYPED | GT_U64_R
            | GT_U64_TYPED | GT_F64_R | GT_F64_TYPED => CmpOp::Gt,
            GE_I32_R | GE_I32_TYPED | GE_I64_R | GE_I64_TYPED | GE_U32_R | GE_U32_TYPED | GE_U64_R
            | GE_U64_TYPED | GE_F64_R | GE_F64_TYPED => CmpOp::Ge,
            EQ_I32_R | EQ_I32_TYPED | EQ_I64_R | EQ_I64_TYPED | EQ_U32_R | EQ_U32_TYPED | EQ_U64_R
            | EQ_U64_TYPED | EQ_F64_R | EQ_F64_TYPED => CmpOp::Eq,
            _ => CmpOp::Ne,
        };
        (cmp, typed)
    }

    fn exec_generic_arith(&mut self, base: u16, dst: u8, a: u8, b: u8, ty: ValueType, op: ArithOp) -> OpResult<()> {
        let av = self.read_reg(base, a);
        let bv = self.read_reg(base, b);
        let result = match (ty, av, bv) {
            (ValueType::I32, Value::I32(x), Value::I32(y)) => Value::I32(arith_i32(op, x, y)?),
            (ValueType::I64, Value::I64(x), Value::I64(y)) => Value::I64(arith_i64(op, x, y)?),
            (ValueType::U32, Value::U32(x), Value::U32(y)) => Value::U32(arith_u32(op, x, y)?),
            (ValueType::U64, Value::U64(x), Value::U64(y)) => Value::U64(arith_u64(op, x, y)?),
            (ValueType::F64, Value::F64(x), Value::F64(y)) => Value::F64(arith_f64(op, x, y)?),
            _ => return Err(type_mismatch(ty.name(), av)),
        };
        self.write_reg(base, dst, result);
        Ok(())
    }

    fn exec_typed_arith(&mut self, base: u16, dst: u8, a: u8, b: u8, ty: ValueType, op: ArithOp) -> OpResult<()> {
        let id_a = Self::reg_id(base, a);
        let id_b = Self::reg_id(base, b);
        let id_dst = Self::reg_id(base, dst);
        match ty {
            ValueType::I32 => {
                let (xa, xb) = {
                    let regs = self.cache.register_file();
                    (regs.get_typed_i32(id_a), regs.get_typed_i32(id_b))
                };
                let (Some(x), Some(y)) = (xa, xb) else {
                    return Err(type_mismatch("i32 (typed shadow)", self.read_reg(base, a)));
                };
                let r = arith_i32(op, x, y)?;
                self.cache.register_file_mut().set_typed_i32(id_dst, r);
            }
            ValueType::I64 => {
                let (xa, xb) = {
                    let regs = self.cache.register_file();
                    (regs.get_typed_i64(id_a), regs.get_typed_i64(id_b))
                };
                let (Some(x), Some(y)) = (xa, xb) else {
                    return Err(type_mismatch("i64 (typed shadow)", self.read_reg(base, a)));
                };
                let r = arith_i64(op, x, y)?;
                self.cache.register_file_mut().set_typed_i64(id_dst, r);
            }
            ValueType::F64 => {
                let (xa, xb) = {
                    let regs = self.cache.register_file();
                    (regs.get_typed_f64(id_a), regs.get_typed_f64(id_b))
                };
                let (Some(x), Some(y)) = (xa, xb) else {
                    return Err(type_mismatch("f64 (typed shadow)", self.read_reg(base, a)));
                };
                let r = arith_f64(op, x, y)?;
                self.cache.register_file_mut().set_typed_f64(id_dst, r);
            }
            _ => unreachable!("typed arithmetic only ever targets i32/i64/f64 (§4.7)"),
        }
        Ok(())
    }

    fn exec_generic_cmp(&mut self, base: u16, dst: u8, a: u8, b: u8, ty: ValueType, op: CmpOp) -> OpResult<()> {
        let av = self.read_reg(base, a);
        let bv = self.read_reg(base, b);
        let result = match (ty, av, bv) {
            (ValueType::I32, Value::I32(x), Value::I32(y)) => compare(op, x, y),
            (ValueType::I64, Value::I64(x), Value::I64(y)) => compare(op, x, y),
            (ValueType::U32, Value::U32(x), Value::U32(y)) => compare(op, x, y),
            (ValueType::U64, Value::U64(x), Value::U64(y)) => compare(op, x, y),
            (ValueType::F64, Value::F64(x), Value::F64(y)) => compare(op, x, y),
            _ => return Err(type_mismatch(ty.name(), av)),
        };
        self.write_reg(base, dst, Value::Bool(result));
        Ok(())
    }

    fn exec_typed_cmp_i32(&mut self, base: u16, dst: u8, a: u8, b: u8, op: CmpOp) -> OpResult<()> {
        let id_a = Self::reg_id(base, a);
        let id_b = Self::reg_id(base, b);
        let (xa, xb) = {
            let regs = self.cache.register_file();
            (regs.get_typed_i32(id_a), regs.get_typed_i32(id_b))
        };
        let (Some(x), Some(y)) = (xa, xb) else {
            return Err(type_mismatch("i32 (typed shadow)", self.read_reg(base, a)));
        };
        self.cache.register_file_mut().set_typed_bool(Self::reg_id(base, dst), compare(op, x, y));
        Ok(())
    }

    fn exec_typed_cmp_i64(&mut self, base: u16, dst: u8, a: u8, b: u8, op: CmpOp) -> OpResult<()> {
        let id_a = Self::reg_id(base, a);
        let id_b = Self::reg_id(base, b);
        let (xa, xb) = {
            let regs = self.cache.register_file();
            (regs.get_typed_i64(id_a), regs.get_typed_i64(id_b))
        };
        let (Some(x), Some(y)) = (xa, xb) else {
            return Err(type_mismatch("i64 (typed shadow)", self.read_reg(base, a)));
        };
        self.cache.register_file_mut().set_typed_bool(Self::reg_id(base, dst), compare(op, x, y));
        Ok(())
    }

    fn exec_typed_cmp_f64(&mut self, base: u16, dst: u8, a: u8, b: u8, op: CmpOp) -> OpResult<()> {
        let id_a = Self::reg_id(base, a);
        let id_b = Self::reg_id(base, b);
        let (xa, xb) = {
            let regs = self.cache.register_file();
            (regs.get_typed_f64(id_a), regs.get_typed_f64(id_b))
        };
        let (Some(x), Some(y)) = (xa, xb) else {
            return Err(type_mismatch("f64 (typed shadow)", self.read_reg(base, a)));
        };
        self.cache.register_file_mut().set_typed_bool(Self::reg_id(base, dst), compare(op, x, y));
        Ok(())
    }

    /// Execute one `MOVE_*_TYPED` guard: returns `true` if the source
    /// register held `guard`'s type and the typed shadow at `dst` was
    /// updated, `false` if it did not (the caller then either deoptimizes
    /// or raises a type-mismatch error, per §4.7).
    fn exec_guard_move(&mut self, base: u16, dst: u8, src: u8, guard: ValueType) -> bool {
        let value = self.read_reg(base, src);
        let id_dst = Self::reg_id(base, dst);
        match (guard, value) {
            (ValueType::I32, Value::I32(n)) => {
                self.cache.register_file_mut().set_typed_i32(id_dst, n);
                true
            }
            (ValueType::I64, Value::I64(n)) => {
                self.cache.register_file_mut().set_typed_i64(id_dst, n);
                true
            }
            (ValueType::F64, Value::F64(n)) => {
                self.cache.register_file_mut().set_typed_f64(id_dst, n);
                true
            }
            (ValueType::Bool, Value::Bool(b)) => {
                self.cache.register_file_mut().set_typed_bool(id_dst, b);
                true
            }
            _ => false,
        }
    }

    fn array_len(&self, obj: ObjectRef) -> Option<usize> {
        match self.heap.get(obj)?.payload() {
            ObjectPayload::Array(items) => Some(items.len()),
            ObjectPayload::ByteBuffer(bytes) => Some(bytes.len()),
            _ => None,
        }
    }

    fn as_index(value: Value) -> OpResult<usize> {
        match value {
            Value::I64(n) if n >= 0 => Ok(n as usize),
            Value::I32(n) if n >= 0 => Ok(n as usize),
            other => Err(RuntimeError {
                kind: RuntimeErrorKind::IndexOutOfBounds {
                    index: other.as_i64().or_else(|| other.as_i32().map(i64::from)).unwrap_or(-1),
                    len: 0,
                },
                span: SourceSpan::default(),
            }),
        }
    }

    /// Advance a range or array iterator one step, without yet writing the
    /// mutated payload back (the caller writes it through
    /// [`Heap::get_mut`], since this helper only borrows `&self.heap`
    /// immutably to read the current element).
    fn advance_iterator(&self, iter_ref: ObjectRef) -> OpResult<(Value, bool, Option<ObjectPayload>)> {
        let object = self
            .heap
            .get(iter_ref)
            .ok_or_else(|| type_mismatch("iterator", Value::Object(iter_ref)))?;
        match object.payload() {
            ObjectPayload::RangeIterator {
                current,
                end,
                step,
                inclusive,
            } => {
                let has_more = if *inclusive { *current <= *end } else { *current < *end };
                if !has_more {
                    return Ok((Value::Nil, false, None));
                }
                let value = Value::I64(*current);
                let next = ObjectPayload::RangeIterator {
                    current: current + step,
                    end: *end,
                    step: *step,
                    inclusive: *inclusive,
                };
                Ok((value, true, Some(next)))
            }
            ObjectPayload::ArrayIterator { array, index } => {
                let len = self.array_len(*array).unwrap_or(0);
                if *index as usize >= len {
                    return Ok((Value::Nil, false, None));
                }
                let value = self.heap.array_get(*array, *index as usize).unwrap_or(Value::Nil);
                let next = ObjectPayload::ArrayIterator {
                    array: *array,
                    index: index + 1,
                };
                Ok((value, true, Some(next)))
            }
            _ => Err(type_mismatch("iterator", Value::Object(iter_ref))),
        }
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

    fn chunk_with(build: impl FnOnce(&mut Chunk)) -> Chunk {
        let mut chunk = Chunk::new();
        build(&mut chunk);
        chunk
    }

    #[test]
    fn generic_add_then_halt_returns_register_zero() {
        // r0 = 2 + 3; halt returns r0.
        let chunk = chunk_with(|c| {
            let two = c.append_constant(Value::I32(2));
            let three = c.append_constant(Value::I32(3));
            c.append_opcode(Opcode::LOAD_CONST, LOC);
            c.append_byte(1, LOC);
            c.append_short(two, LOC);
            c.append_opcode(Opcode::LOAD_CONST, LOC);
            c.append_byte(2, LOC);
            c.append_short(three, LOC);
            c.append_opcode(Opcode::ADD_I32_R, LOC);
            c.append_byte(0, LOC);
            c.append_byte(1, LOC);
            c.append_byte(2, LOC);
            c.append_opcode(Opcode::HALT, LOC);
        });

        let mut vm = Interpreter::new();
        let entry = vm.load_chunk(chunk, 0).unwrap();
        assert_eq!(vm.run(entry).unwrap(), Value::I32(5));
    }

    #[test]
    fn division_by_zero_is_reported_as_a_runtime_error() {
        let chunk = chunk_with(|c| {
            let one = c.append_constant(Value::I32(1));
            let zero = c.append_constant(Value::I32(0));
            c.append_opcode(Opcode::LOAD_CONST, LOC);
            c.append_byte(1, LOC);
            c.append_short(one, LOC);
            c.append_opcode(Opcode::LOAD_CONST, LOC);
            c.append_byte(2, LOC);
            c.append_short(zero, LOC);
            c.append_opcode(Opcode::DIV_I32_R, LOC);
            c.append_byte(0, LOC);
            c.append_byte(1, LOC);
            c.append_byte(2, LOC);
            c.append_opcode(Opcode::HALT, LOC);
        });

        let mut vm = Interpreter::new();
        let entry = vm.load_chunk(chunk, 0).unwrap();
        let err = vm.run(entry).unwrap_err();
        assert!(matches!(
            err,
            VmError::Runtime(RuntimeError {
                kind: RuntimeErrorKind::DivisionByZero,
                ..
            })
        ));
    }

    #[test]
    fn try_end_bracket_recovers_from_a_runtime_error() {
        // try_begin -> handler; div-by-zero trips; handler sets r0 = 9; halt.
        let chunk = chunk_with(|c| {
            c.append_opcode(Opcode::TRY_BEGIN, LOC);
            let patch = c.open_forward_patch(LOC);
            let one = c.append_constant(Value::I32(1));
            let zero = c.append_constant(Value::I32(0));
            c.append_opcode(Opcode::LOAD_CONST, LOC);
            c.append_byte(1, LOC);
            c.append_short(one, LOC);
            c.append_opcode(Opcode::LOAD_CONST, LOC);
            c.append_byte(2, LOC);
            c.append_short(zero, LOC);
            c.append_opcode(Opcode::DIV_I32_R, LOC);
            c.append_byte(0, LOC);
            c.append_byte(1, LOC);
            c.append_byte(2, LOC);
            c.append_opcode(Opcode::HALT, LOC);
            c.close_patch(patch);
            let nine = c.append_constant(Value::I32(9));
            c.append_opcode(Opcode::LOAD_CONST, LOC);
            c.append_byte(0, LOC);
            c.append_short(nine, LOC);
            c.append_opcode(Opcode::HALT, LOC);
        });

        let mut vm = Interpreter::new();
        let entry = vm.load_chunk(chunk, 0).unwrap();
        assert_eq!(vm.run(entry).unwrap(), Value::I32(9));
    }

    #[test]
    fn assert_on_a_falsy_register_raises_assertion_failed() {
        let chunk = chunk_with(|c| {
            let zero = c.append_constant(Value::I32(0));
            c.append_opcode(Opcode::LOAD_CONST, LOC);
            c.append_byte(0, LOC);
            c.append_short(zero, LOC);
            c.append_opcode(Opcode::ASSERT, LOC);
            c.append_byte(0, LOC);
            c.append_opcode(Opcode::HALT, LOC);
        });

        let mut vm = Interpreter::new();
        let entry = vm.load_chunk(chunk, 0).unwrap();
        let err = vm.run(entry).unwrap_err();
        assert!(matches!(
            err,
            VmError::Runtime(RuntimeError {
                kind: RuntimeErrorKind::AssertionFailed { .. },
                ..
            })
        ));
    }

    #[test]
    fn call_and_return_pass_a_value_back_to_the_caller() {
        // callee (arity 1): returns r0 + 1.
        let callee = chunk_with(|c| {
            let one = c.append_constant(Value::I32(1));
            c.append_opcode(Opcode::LOAD_CONST, LOC);
            c.append_byte(1, LOC);
            c.append_short(one, LOC);
            c.append_opcode(Opcode::ADD_I32_R, LOC);
            c.append_byte(0, LOC);
            c.append_byte(0, LOC);
            c.append_byte(1, LOC);
            c.append_opcode(Opcode::RETURN, LOC);
            c.append_byte(0, LOC);
        });

        let mut vm = Interpreter::new();
        let callee_index = vm.load_chunk(callee, 1).unwrap();

        // caller: r0 = 41, call callee(r0) -> r1, halt r1.
        let caller = chunk_with(|c| {
            let forty_one = c.append_constant(Value::I32(41));
            c.append_opcode(Opcode::LOAD_CONST, LOC);
            c.append_byte(0, LOC);
            c.append_short(forty_one, LOC);
            c.append_opcode(Opcode::CALL, LOC);
            c.append_byte(1, LOC); // dst
            c.append_byte(0, LOC); // first_arg
            c.append_byte(callee_index as u8, LOC);
            c.append_opcode(Opcode::MOVE, LOC);
            c.append_byte(0, LOC);
            c.append_byte(1, LOC);
            c.append_opcode(Opcode::HALT, LOC);
        });

        let entry = vm.load_chunk(caller, 0).unwrap();
        assert_eq!(vm.run(entry).unwrap(), Value::I32(42));
    }

    #[test]
    fn guard_move_failure_on_an_unspecialized_chunk_raises_type_mismatch() {
        let chunk = chunk_with(|c| {
            let float = c.append_constant(Value::F64(1.5));
            c.append_opcode(Opcode::LOAD_CONST, LOC);
            c.append_byte(0, LOC);
            c.append_short(float, LOC);
            c.append_opcode(Opcode::MOVE_I32_TYPED, LOC);
            c.append_byte(0, LOC);
            c.append_byte(0, LOC);
            c.append_opcode(Opcode::HALT, LOC);
        });

        let mut vm = Interpreter::new();
        let entry = vm.load_chunk(chunk, 0).unwrap();
        let err = vm.run(entry).unwrap_err();
        assert!(matches!(
            err,
            VmError::Runtime(RuntimeError {
                kind: RuntimeErrorKind::TypeMismatch { .. },
                ..
            })
        ));
    }

    #[test]
    fn loop_backward_jump_runs_a_counted_loop_to_completion() {
        // r0 = sum = 0; r1 = i = 0; r2 = 5 (bound); r3 = 1 (step).
        // loop: if i >= 5 jump past; sum += i; i += 1; loop back.
        let chunk = chunk_with(|c| {
            let zero = c.append_constant(Value::I32(0));
            let five = c.append_constant(Value::I32(5));
            c.append_opcode(Opcode::LOAD_CONST, LOC);
            c.append_byte(0, LOC);
            c.append_short(zero, LOC); // sum = 0
            c.append_opcode(Opcode::LOAD_CONST, LOC);
            c.append_byte(1, LOC);
            c.append_short(zero, LOC); // i = 0
            c.append_opcode(Opcode::LOAD_CONST, LOC);
            c.append_byte(2, LOC);
            c.append_short(five, LOC); // bound = 5

            let loop_start = c.len();
            c.append_opcode(Opcode::LT_I32_R, LOC);
            c.append_byte(3, LOC);
            c.append_byte(1, LOC);
            c.append_byte(2, LOC); // r3 = i < bound
            c.append_opcode(Opcode::JUMP_IF_FALSE_LONG, LOC);
            c.append_byte(3, LOC);
            let exit_patch = c.open_forward_patch(LOC);

            c.append_opcode(Opcode::ADD_I32_R, LOC);
            c.append_byte(0, LOC);
            c.append_byte(0, LOC);
            c.append_byte(1, LOC); // sum += i
            c.append_opcode(Opcode::INC_CHECKED, LOC);
            c.append_byte(1, LOC); // i += 1

            let back_distance = c.len() + 3 - loop_start;
            c.append_opcode(Opcode::LOOP_LONG, LOC);
            c.append_short(back_distance as u16, LOC);

            c.close_patch(exit_patch);
            c.append_opcode(Opcode::HALT, LOC);
        });

        let mut vm = Interpreter::new();
        let entry = vm.load_chunk(chunk, 0).unwrap();
        assert_eq!(vm.run(entry).unwrap(), Value::I32(0 + 1 + 2 + 3 + 4));
    }
}
