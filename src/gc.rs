//! Memory manager & garbage collector (C2).
//!
//! A tracked, bump-accounted allocator over a dense arena (see
//! [`crate::object`] for why the design's intrusive pointer list is realized
//! as generation-checked slot indices here) with a mark-sweep collector and
//! per-[`ObjectKind`](crate::object::ObjectKind) free lists for O(1) reuse.

use hashbrown::HashMap;

use crate::{
    consts::{
        GC_HEAP_GROW_FACTOR,
        GC_INITIAL_THRESHOLD,
    },
    error::RuntimeErrorKind,
    object::{
        HeapObject,
        ObjectKind,
        ObjectPayload,
        ObjectRef,
    },
    value::Value,
};

enum Slot {
    Occupied { generation: u32, object: HeapObject },
    /// Freed; `generation` is the generation a *new* occupant of this slot
    /// will receive, so a stale `ObjectRef` (carrying an older generation)
    /// is rejected by [`Heap::get`] even after the slot is reused.
    Free { generation: u32 },
}

/// Anything that can hand the collector its roots: every register tier
/// slot, every global, and `vm.last_error`. The interpreter implements this
/// directly; it is a trait so the GC module does not depend on
/// [`crate::interpreter`].
pub trait RootSource {
    /// Push every `ObjectRef` directly reachable from a root onto `out`.
    fn collect_roots(&self, out: &mut Vec<ObjectRef>);
}

/// The heap: tracked allocator plus mark-sweep collector.
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Slot>,
    free_lists: HashMap<ObjectKind, Vec<u32>>,
    bytes_allocated: usize,
    gc_threshold: usize,
    grow_factor: f64,
    paused: u32,
    finalizing: bool,
    collections_run: u64,
}

impl core::fmt::Debug for Slot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Slot::Occupied { generation, object } => f
                .debug_struct("Occupied")
                .field("generation", generation)
                .field("kind", &object.kind())
                .finish(),
            Slot::Free { generation } => {
                f.debug_struct("Free").field("generation", generation).finish()
            }
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    /// A fresh, empty heap with the default initial GC threshold.
    pub fn new() -> Self {
        Self::with_config(GC_INITIAL_THRESHOLD, GC_HEAP_GROW_FACTOR)
    }

    /// A fresh, empty heap with an embedder-supplied initial threshold and
    /// grow factor (see [`crate::interpreter::VmConfig`]).
    pub fn with_config(initial_threshold: usize, grow_factor: f64) -> Self {
        Heap {
            slots: Vec::new(),
            free_lists: HashMap::new(),
            bytes_allocated: 0,
            gc_threshold: initial_threshold,
            grow_factor,
            paused: 0,
            finalizing: false,
            collections_run: 0,
        }
    }

    /// Bytes currently tracked as allocated.
    pub const fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// The threshold `bytes_allocated` must exceed before the next
    /// collection is triggered.
    pub const fn gc_threshold(&self) -> usize {
        self.gc_threshold
    }

    /// Number of collections run over this heap's lifetime.
    pub const fn collections_run(&self) -> u64 {
        self.collections_run
    }

    /// Whether GC is currently paused (see [`Heap::pause`]).
    pub const fn is_paused(&self) -> bool {
        self.paused > 0
    }

    /// Pause collection for the duration of a section that must not observe
    /// half-constructed objects (e.g. building up a string or array across
    /// several allocations). Pauses nest; collection resumes only once every
    /// matching [`Heap::resume`] has been called.
    pub fn pause(&mut self) {
        self.paused = self.paused.saturating_add(1);
    }

    /// Undo one [`Heap::pause`]. Does not itself trigger a collection —
    /// the next `allocate_object` call will, if still over threshold.
    pub fn resume(&mut self) {
        self.paused = self.paused.saturating_sub(1);
    }

    /// Allocate a new object, running a collection first if the heap is
    /// over threshold and not paused.
    ///
    /// Returns [`RuntimeErrorKind::AllocationFailure`] when the slot arena
    /// cannot grow to hold the new object (§4.1's documented OOM halt
    /// condition) — this is checked via [`Vec::try_reserve`] rather than
    /// simply pushing and letting a failed allocation abort the process.
    /// Reusing a freed slot never hits this path, since no growth is
    /// needed.
    pub fn allocate_object<R: RootSource>(
        &mut self,
        payload: ObjectPayload,
        roots: &R,
    ) -> Result<ObjectRef, RuntimeErrorKind> {
        if !self.is_paused() && self.bytes_allocated > self.gc_threshold {
            self.collect(roots);
        }

        let size = payload.heap_size();
        let kind = payload.kind();
        let object = HeapObject {
            marked: false,
            payload,
        };

        if let Some(index) = self.free_lists.get_mut(&kind).and_then(Vec::pop) {
            let generation = match self.slots[index as usize] {
                Slot::Free { generation } => generation,
                Slot::Occupied { .. } => unreachable!("free list pointed at an occupied slot"),
            };
            self.slots[index as usize] = Slot::Occupied { generation, object };
            self.bytes_allocated = self.bytes_allocated.saturating_add(size);
            return Ok(ObjectRef { index, generation });
        }

        self.slots.try_reserve(1).map_err(|_| RuntimeErrorKind::AllocationFailure)?;
        self.bytes_allocated = self.bytes_allocated.saturating_add(size);
        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            generation: 0,
            object,
        });
        Ok(ObjectRef {
            index,
            generation: 0,
        })
    }

    /// Look up a live object by reference. Returns `None` for a stale
    /// (freed-and-reused) or out-of-range reference.
    pub fn get(&self, obj: ObjectRef) -> Option<&HeapObject> {
        match self.slots.get(obj.index as usize)? {
            Slot::Occupied { generation, object } if *generation == obj.generation => Some(object),
            _ => None,
        }
    }

    /// Mutable lookup, see [`Heap::get`].
    pub fn get_mut(&mut self, obj: ObjectRef) -> Option<&mut HeapObject> {
        match self.slots.get_mut(obj.index as usize)? {
            Slot::Occupied { generation, object } if *generation == obj.generation => Some(object),
            _ => None,
        }
    }

    /// Run one full mark-sweep collection.
    ///
    /// Marking is recursive per object kind: arrays mark their elements,
    /// error objects mark their message string, and so on (see
    /// [`ObjectPayload::children`]). Sweep then walks every slot and either
    /// clears the mark (object survives) or reclaims it: to a per-kind free
    /// list during normal operation, or outright during
    /// [`Heap::finalize`].
    pub fn collect<R: RootSource>(&mut self, roots: &R) {
        tracing::trace!(bytes_allocated = self.bytes_allocated, "gc: collection start");
        let mut worklist = Vec::new();
        roots.collect_roots(&mut worklist);
        self.mark(worklist);
        let freed = self.sweep();
        self.gc_threshold = ((self.bytes_allocated as f64) * self.grow_factor) as usize;
        self.collections_run += 1;
        tracing::trace!(
            freed,
            bytes_allocated = self.bytes_allocated,
            new_threshold = self.gc_threshold,
            "gc: collection end"
        );
    }

    fn mark(&mut self, mut worklist: Vec<ObjectRef>) {
        while let Some(obj) = worklist.pop() {
            let Some(Slot::Occupied { generation, object }) = self.slots.get_mut(obj.index as usize)
            else {
                continue;
            };
            if *generation != obj.generation || object.marked {
                continue;
            }
            object.marked = true;
            worklist.extend(object.payload.children());
        }
    }

    fn sweep(&mut self) -> usize {
        let mut freed = 0usize;
        for index in 0..self.slots.len() {
            let (kind, size, generation) = match &mut self.slots[index] {
                Slot::Occupied { object, .. } if object.marked => {
                    object.marked = false;
                    continue;
                }
                Slot::Occupied { generation, object } => (object.kind(), object.payload.heap_size(), *generation),
                Slot::Free { .. } => continue,
            };
            freed += size;
            self.bytes_allocated = self.bytes_allocated.saturating_sub(size);
            let next_generation = generation.wrapping_add(1);
            self.slots[index] = Slot::Free {
                generation: next_generation,
            };
            if !self.finalizing {
                self.free_lists.entry(kind).or_default().push(index as u32);
            }
        }
        freed
    }

    /// Mark the heap as finalizing: subsequent collections free objects
    /// outright instead of returning them to a free list. Call once, on VM
    /// teardown, before the final `collect`.
    pub fn finalize(&mut self) {
        self.finalizing = true;
    }

    /// Fetch the string payload at `obj`, if it is a live string object.
    pub fn as_str(&self, obj: ObjectRef) -> Option<&str> {
        match self.get(obj)?.payload() {
            ObjectPayload::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Read an array element by reference and index, honoring bounds.
    pub fn array_get(&self, obj: ObjectRef, index: usize) -> Option<Value> {
        match self.get(obj)?.payload() {
            ObjectPayload::Array(items) => items.get(index).copied(),
            _ => None,
        }
    }
}
