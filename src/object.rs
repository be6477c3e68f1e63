//! Heap object model (C1).
//!
//! A [`HeapObject`] is a type-tagged payload stored in the [`crate::gc`]
//! arena. The design's "intrusive singly-linked list owned by the VM" is
//! realized here as a generation-checked slot index ([`ObjectRef`]) into a
//! dense arena (see the re-architecture note in `SPEC_FULL.md` §9: "arena
//! allocation with stable indices" in place of raw back-pointers) — this
//! crate forbids `unsafe_code`, so the classic mark-sweep-over-a-raw-pointer-
//! list design is expressed as a safe generational arena instead, while
//! keeping the same mark/sweep contract.

/// A stable, generation-checked reference to a [`HeapObject`] living in the
/// GC arena.
///
/// Equivalent in role to the source's raw object pointer: cheap to copy,
/// embeddable in a [`crate::value::Value`], and compared by identity. The
/// generation counter detects a reference to a slot that has since been
/// freed and reused (a dangling reference would otherwise silently observe
/// an unrelated object).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ObjectRef {
    /// The arena slot index this reference points at.
    pub const fn index(self) -> u32 {
        self.index
    }

    /// The generation recorded at the time this reference was created.
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

/// Discriminant of a [`HeapObject`], mirroring the payload kinds the design
/// enumerates: string, array, byte buffer, error, range iterator, array
/// iterator, file handle, function, enum instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::Display)]
pub enum ObjectKind {
    /// Interned/owned string payload.
    String,
    /// Growable array of `Value`.
    Array,
    /// Growable buffer of raw bytes.
    ByteBuffer,
    /// A runtime error object (`{kind, message, source_location}`).
    Error,
    /// A numeric range iterator (`start..end` by `step`).
    RangeIterator,
    /// An iterator over an array's elements.
    ArrayIterator,
    /// An open file handle.
    FileHandle,
    /// A callable function (bytecode chunk reference + arity).
    Function,
    /// An instance of a user-defined enum variant.
    Enum,
}

/// The payload of a heap object. Every variant corresponds to one
/// [`ObjectKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectPayload {
    /// See [`ObjectKind::String`].
    String(String),
    /// See [`ObjectKind::Array`]. Elements may themselves be object
    /// references; the GC marks each in turn.
    Array(Vec<crate::value::Value>),
    /// See [`ObjectKind::ByteBuffer`].
    ByteBuffer(Vec<u8>),
    /// See [`ObjectKind::Error`]. The message is stored as a nested object
    /// reference so the GC can mark it like any other field.
    Error {
        /// Runtime error kind discriminant (see [`crate::error::RuntimeErrorKind`]).
        kind: crate::error::RuntimeErrorKind,
        /// Reference to the message string object.
        message: ObjectRef,
        /// 1-based source line, if known.
        line: Option<u32>,
    },
    /// See [`ObjectKind::RangeIterator`].
    RangeIterator {
        /// Current position.
        current: i64,
        /// Exclusive or inclusive end, per `inclusive`.
        end: i64,
        /// Non-zero step.
        step: i64,
        /// Whether `end` is inclusive.
        inclusive: bool,
    },
    /// See [`ObjectKind::ArrayIterator`].
    ArrayIterator {
        /// The array being iterated.
        array: ObjectRef,
        /// Next index to yield.
        index: u32,
    },
    /// See [`ObjectKind::FileHandle`].
    FileHandle {
        /// Whether this handle owns the underlying OS resource and must
        /// close it on drop/close.
        owns_handle: bool,
        /// Host-assigned descriptor; `None` once closed.
        descriptor: Option<u64>,
    },
    /// See [`ObjectKind::Function`]. `chunk_index` names a chunk owned by
    /// the compiler/module context, not by this object.
    Function {
        /// Index of the function's bytecode chunk.
        chunk_index: u32,
        /// Declared arity.
        arity: u8,
        /// Display name, for backtraces and errors.
        name: ObjectRef,
    },
    /// See [`ObjectKind::Enum`].
    Enum {
        /// Index of the variant within its enum declaration.
        variant: u32,
        /// Payload fields, if the variant carries data.
        fields: Vec<crate::value::Value>,
    },
}

impl ObjectPayload {
    /// The kind discriminant for this payload.
    pub const fn kind(&self) -> ObjectKind {
        match self {
            ObjectPayload::String(_) => ObjectKind::String,
            ObjectPayload::Array(_) => ObjectKind::Array,
            ObjectPayload::ByteBuffer(_) => ObjectKind::ByteBuffer,
            ObjectPayload::Error { .. } => ObjectKind::Error,
            ObjectPayload::RangeIterator { .. } => ObjectKind::RangeIterator,
            ObjectPayload::ArrayIterator { .. } => ObjectKind::ArrayIterator,
            ObjectPayload::FileHandle { .. } => ObjectKind::FileHandle,
            ObjectPayload::Function { .. } => ObjectKind::Function,
            ObjectPayload::Enum { .. } => ObjectKind::Enum,
        }
    }

    /// Approximate heap footprint, used to drive the GC threshold in
    /// [`crate::gc::Heap`].
    pub fn heap_size(&self) -> usize {
        match self {
            ObjectPayload::String(s) => core::mem::size_of::<String>() + s.len(),
            ObjectPayload::Array(v) => {
                core::mem::size_of::<Vec<crate::value::Value>>()
                    + v.len() * core::mem::size_of::<crate::value::Value>()
            }
            ObjectPayload::ByteBuffer(b) => core::mem::size_of::<Vec<u8>>() + b.len(),
            ObjectPayload::Error { .. } => core::mem::size_of::<Self>(),
            ObjectPayload::RangeIterator { .. } => core::mem::size_of::<Self>(),
            ObjectPayload::ArrayIterator { .. } => core::mem::size_of::<Self>(),
            ObjectPayload::FileHandle { .. } => core::mem::size_of::<Self>(),
            ObjectPayload::Function { .. } => core::mem::size_of::<Self>(),
            ObjectPayload::Enum { fields, .. } => {
                core::mem::size_of::<Self>()
                    + fields.len() * core::mem::size_of::<crate::value::Value>()
            }
        }
    }

    /// Every `ObjectRef` directly reachable from this payload's fields, for
    /// the GC's recursive mark phase.
    pub fn children(&self) -> Vec<ObjectRef> {
        match self {
            ObjectPayload::Array(elems) => {
                elems.iter().filter_map(|v| v.as_object()).collect()
            }
            ObjectPayload::Error { message, .. } => vec![*message],
            ObjectPayload::ArrayIterator { array, .. } => vec![*array],
            ObjectPayload::Function { name, .. } => vec![*name],
            ObjectPayload::Enum { fields, .. } => {
                fields.iter().filter_map(|v| v.as_object()).collect()
            }
            ObjectPayload::String(_)
            | ObjectPayload::ByteBuffer(_)
            | ObjectPayload::RangeIterator { .. }
            | ObjectPayload::FileHandle { .. } => Vec::new(),
        }
    }
}

/// A live heap object: the GC's mark bit plus its payload.
///
/// The mark bit lives alongside the payload rather than as a separate
/// bitset so that [`crate::gc::Heap::sweep`] can walk one contiguous arena.
#[derive(Debug, Clone, PartialEq)]
pub struct HeapObject {
    pub(crate) marked: bool,
    pub(crate) payload: ObjectPayload,
}

impl HeapObject {
    /// The object's kind.
    pub fn kind(&self) -> ObjectKind {
        self.payload.kind()
    }

    /// The object's payload.
    pub fn payload(&self) -> &ObjectPayload {
        &self.payload
    }

    /// Mutable access to the object's payload.
    pub fn payload_mut(&mut self) -> &mut ObjectPayload {
        &mut self.payload
    }

    /// Whether this object survived the last mark phase.
    pub const fn is_marked(&self) -> bool {
        self.marked
    }
}
