//! Builtin/intrinsic signature table (C10).
//!
//! The concrete builtin implementations (print, range, file I/O, math) are
//! out of scope (§1) — the surface language's standard library is an
//! external collaborator. What this crate does own is the seam the
//! compiler and interpreter both consume (§6): an ordered table of
//! `{symbol, arity, argTypes[], returnType}` entries the compiler checks
//! calls against at emit time, resolving at runtime to a `NativeFn`.
//!
//! A handful of representative entries (`print`, `len`, `range`) are wired
//! up here to demonstrate the resolution contract end-to-end; they are
//! deliberately minimal; a real standard library would register many more
//! through the same table.

use crate::{
    error::{
        OpResult,
        RuntimeError,
        RuntimeErrorKind,
        SourceSpan,
    },
    gc::{
        Heap,
        RootSource,
    },
    object::{
        ObjectPayload,
        ObjectRef,
    },
    value::{
        Value,
        ValueType,
    },
};

/// A native function bound to an intrinsic symbol: `(argv, heap) -> Value`.
///
/// Takes `&mut Heap` rather than the bare `(argc, argv) -> Value` shape in
/// §6 verbatim because a handful of representative builtins (`range`)
/// allocate a heap object; read-only builtins (`len`) simply ignore the
/// heap's mutability. The interpreter pauses GC around every native call
/// (§5), so allocations here never race a collection.
pub type NativeFn = fn(&[Value], &mut Heap) -> OpResult<Value>;

/// One entry in the intrinsic signature table (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntrinsicSignature {
    /// The symbol the compiler resolves call sites against.
    pub symbol: &'static str,
    /// Declared arity; the compiler checks call sites against this at
    /// bytecode-emit time.
    pub arity: u8,
    /// Declared parameter types, checked alongside arity.
    pub arg_types: &'static [ValueType],
    /// Declared return type.
    pub return_type: ValueType,
}

struct Entry {
    signature: IntrinsicSignature,
    native: NativeFn,
}

/// The ordered intrinsic table: signatures for the compiler, native
/// functions for the VM (§6).
pub struct IntrinsicTable {
    entries: Vec<Entry>,
}

impl Default for IntrinsicTable {
    fn default() -> Self {
        Self::new()
    }
}

impl IntrinsicTable {
    /// The table pre-populated with the representative builtins this crate
    /// carries (`print`, `len`, `range`).
    pub fn new() -> Self {
        IntrinsicTable {
            entries: vec![
                Entry {
                    signature: IntrinsicSignature {
                        symbol: "print",
                        arity: 1,
                        arg_types: &[ValueType::Object],
                        return_type: ValueType::Nil,
                    },
                    native: native_print,
                },
                Entry {
                    signature: IntrinsicSignature {
                        symbol: "len",
                        arity: 1,
                        arg_types: &[ValueType::Object],
                        return_type: ValueType::I64,
                    },
                    native: native_len,
                },
                Entry {
                    signature: IntrinsicSignature {
                        symbol: "range",
                        arity: 2,
                        arg_types: &[ValueType::I64, ValueType::I64],
                        return_type: ValueType::Object,
                    },
                    native: native_range,
                },
            ],
        }
    }

    /// The signature registered for `symbol`, if any — what the compiler
    /// checks call sites against at emit time.
    pub fn signature(&self, symbol: &str) -> Option<&IntrinsicSignature> {
        self.entries.iter().find(|e| e.signature.symbol == symbol).map(|e| &e.signature)
    }

    /// Every registered signature, in table order.
    pub fn signatures(&self) -> impl Iterator<Item = &IntrinsicSignature> {
        self.entries.iter().map(|e| &e.signature)
    }

    /// Resolve `symbol` to its native function and invoke it with `args`,
    /// checking arity first (§7 `ArityMismatch`).
    pub fn call(&self, symbol: &str, args: &[Value], heap: &mut Heap) -> OpResult<Value> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.signature.symbol == symbol)
            .unwrap_or_else(|| panic!("unknown intrinsic `{symbol}` reached the VM: compiler should have rejected this at emit time"));
        if args.len() != entry.signature.arity as usize {
            return Err(RuntimeError {
                kind: RuntimeErrorKind::ArityMismatch {
                    expected: entry.signature.arity,
                    actual: args.len() as u8,
                },
                span: SourceSpan::default(),
            });
        }
        (entry.native)(args, heap)
    }
}

/// GC is always paused by the interpreter around a native call (§5), so
/// the collector never actually runs during one of these allocations —
/// this root source exists only to satisfy [`Heap::allocate_object`]'s
/// signature.
struct NoRoots;
impl RootSource for NoRoots {
    fn collect_roots(&self, _out: &mut Vec<ObjectRef>) {}
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

fn native_print(args: &[Value], heap: &mut Heap) -> OpResult<Value> {
    match args[0] {
        Value::Object(obj) => match heap.as_str(obj) {
            Some(s) => tracing::info!(target: "orus::print", "{s}"),
            None => tracing::info!(target: "orus::print", "{}", args[0]),
        },
        other => tracing::info!(target: "orus::print", "{other}"),
    }
    Ok(Value::Nil)
}

fn native_len(args: &[Value], heap: &mut Heap) -> OpResult<Value> {
    let Value::Object(obj) = args[0] else {
        return Err(type_mismatch("array", args[0]));
    };
    match heap.get(obj).map(|o| o.payload()) {
        Some(ObjectPayload::Array(items)) => Ok(Value::I64(items.len() as i64)),
        Some(ObjectPayload::ByteBuffer(bytes)) => Ok(Value::I64(bytes.len() as i64)),
        _ => Err(type_mismatch("array", args[0])),
    }
}

fn native_range(args: &[Value], heap: &mut Heap) -> OpResult<Value> {
    let (Value::I64(start), Value::I64(end)) = (args[0], args[1]) else {
        return Err(type_mismatch("i64", args[0]));
    };
    let obj = heap
        .allocate_object(
            ObjectPayload::RangeIterator {
                current: start,
                end,
                step: 1,
                inclusive: false,
            },
            &NoRoots,
        )
        .map_err(|kind| RuntimeError { kind, span: SourceSpan::default() })?;
    Ok(Value::Object(obj))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_accepts_an_object_and_returns_nil() {
        let table = IntrinsicTable::new();
        let mut heap = Heap::new();
        let s = heap.allocate_object(ObjectPayload::String("hi".into()), &NoRoots).unwrap();
        let result = table.call("print", &[Value::Object(s)], &mut heap).unwrap();
        assert_eq!(result, Value::Nil);
    }

    #[test]
    fn len_reads_an_array_objects_length() {
        let table = IntrinsicTable::new();
        let mut heap = Heap::new();
        let arr = heap
            .allocate_object(
                ObjectPayload::Array(vec![Value::I32(1), Value::I32(2), Value::I32(3)]),
                &NoRoots,
            )
            .unwrap();
        let result = table.call("len", &[Value::Object(arr)], &mut heap).unwrap();
        assert_eq!(result, Value::I64(3));
    }

    #[test]
    fn len_rejects_a_non_array_argument() {
        let table = IntrinsicTable::new();
        let mut heap = Heap::new();
        let err = table.call("len", &[Value::I32(5)], &mut heap).unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::TypeMismatch { .. }));
    }

    #[test]
    fn range_allocates_a_range_iterator_object() {
        let table = IntrinsicTable::new();
        let mut heap = Heap::new();
        let result = table.call("range", &[Value::I64(0), Value::I64(10)], &mut heap).unwrap();
        let Value::Object(obj) = result else { panic!("expected an object") };
        assert!(matches!(heap.get(obj).unwrap().payload(), ObjectPayload::RangeIterator { .. }));
    }

    #[test]
    fn arity_mismatch_is_rejected_before_the_native_fn_runs() {
        let table = IntrinsicTable::new();
        let mut heap = Heap::new();
        let err = table.call("range", &[Value::I64(0)], &mut heap).unwrap_err();
        assert!(matches!(
            err.kind,
            RuntimeErrorKind::ArityMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn signature_lookup_matches_the_registered_table() {
        let table = IntrinsicTable::new();
        let sig = table.signature("len").unwrap();
        assert_eq!(sig.arity, 1);
        assert_eq!(sig.return_type, ValueType::I64);
        assert_eq!(table.signatures().count(), 3);
    }
}
