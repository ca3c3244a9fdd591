//! The stub arena: allocation, manual/managed tracking, decay, and the
//! mark/sweep entry point the collector collaborator drives.

use std::num::NonZeroU16;

use ember_obj_model::{next_gen, StubId, Value};
use hashbrown::HashMap;
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::error::{MemError, MemResult};
use crate::flags::{Flavor, StubFlags};
use crate::pool::Pool;
use crate::root::Frame;
use crate::stub::{Content, Link, Misc, RootNeighbor, Stub, INLINE_CAP};

struct Slot {
    generation: NonZeroU16,
    stub: Option<Stub>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HeapStats {
    /// Stubs made over the heap's lifetime.
    pub allocations: u64,
    /// Completed collections.
    pub collections: u64,
    /// Stubs decayed by the most recent sweep.
    pub last_swept: usize,
}

/// Single-threaded stub arena. Owns every stub, the buffer pool, the symbol
/// intern table, and the frame stack for root handles.
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    pub(crate) pool: Pool,
    /// Case-folded spelling -> canonical symbol.
    pub(crate) symbols: HashMap<Box<str>, StubId>,
    /// Unmanaged stubs awaiting explicit free; doubles as the leak report.
    manual: Vec<StubId>,
    /// Freshly made stubs protected from sweep until reachable.
    guards: SmallVec<[StubId; 8]>,
    pub(crate) frames: Vec<Frame>,
    stats: HeapStats,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            pool: Pool::new(),
            symbols: HashMap::new(),
            manual: Vec::new(),
            guards: SmallVec::new(),
            // Base frame so root handles always have an anchor.
            frames: vec![Frame::new()],
            stats: HeapStats::default(),
        }
    }

    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn pooled_bytes(&self) -> usize {
        self.pool.bytes_pooled()
    }

    pub fn managed_count(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|s| s.stub.as_ref())
            .filter(|s| s.flags.contains(StubFlags::MANAGED))
            .count()
    }

    // -- construction -----------------------------------------------------

    /// Extra units reserved past the requested capacity: the NUL slot for
    /// byte flexes, the poison guard cell for value flexes in debug builds.
    fn reserve_units(flavor: Flavor) -> usize {
        if flavor.byte_wide() || cfg!(debug_assertions) {
            1
        } else {
            0
        }
    }

    /// Allocate a stub with room for `capacity` units, unmanaged.
    ///
    /// Inline storage is chosen whenever the request fits the header's
    /// spare content region; otherwise a pooled buffer backs the flex.
    pub fn make(&mut self, flavor: Flavor, capacity: usize) -> MemResult<StubId> {
        let wide = flavor.wide();
        let units = capacity
            .checked_add(Self::reserve_units(flavor))
            .ok_or(MemError::CapacityOverflow { units: capacity, wide })?;
        let bytes = units
            .checked_mul(wide)
            .filter(|&b| b <= u32::MAX as usize)
            .ok_or(MemError::CapacityOverflow { units, wide })?;

        let stub = if bytes <= INLINE_CAP {
            Stub::new_inline(flavor)
        } else {
            Stub::new_dynamic(flavor, self.pool.alloc(bytes)?)
        };

        let id = self.install(stub)?;
        self.manual.push(id);
        self.stats.allocations += 1;
        Ok(id)
    }

    /// Allocate already handed to the collector.
    pub fn make_managed(&mut self, flavor: Flavor, capacity: usize) -> MemResult<StubId> {
        let id = self.make(flavor, capacity)?;
        self.manage(id);
        Ok(id)
    }

    fn install(&mut self, stub: Stub) -> MemResult<StubId> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.stub.is_none());
            slot.stub = Some(stub);
            return Ok(StubId::new(index, slot.generation));
        }
        let index = self.slots.len();
        if index > u32::MAX as usize {
            // A partially built stub never escapes: recycle its buffer now.
            if let Content::Dynamic { data, .. } = stub.content {
                self.pool.recycle(data);
            }
            return Err(MemError::OutOfMemory);
        }
        if self.slots.try_reserve(1).is_err() {
            if let Content::Dynamic { data, .. } = stub.content {
                self.pool.recycle(data);
            }
            return Err(MemError::OutOfMemory);
        }
        self.slots.push(Slot {
            generation: NonZeroU16::MIN,
            stub: Some(stub),
        });
        Ok(StubId::new(index as u32, NonZeroU16::MIN))
    }

    /// Hand an unmanaged stub to the collector. A pairlist takes its
    /// hashlist along; the two live and die together.
    pub fn manage(&mut self, id: StubId) {
        let stub = self.stub_mut(id);
        if stub.flags.contains(StubFlags::MANAGED) {
            return;
        }
        stub.flags.insert(StubFlags::MANAGED);
        if let Some(at) = self.manual.iter().position(|&m| m == id) {
            self.manual.swap_remove(at);
        }
        if self.stub(id).flavor() == Flavor::PairList {
            let hashes = self.stub(id).hashlist();
            self.manage(hashes);
        }
    }

    // -- accessibility ----------------------------------------------------

    /// The checked extraction tier: one generation compare when a flex
    /// handle is pulled out of a tagged value. Everything downstream of a
    /// successful resolve may use the trusted tier.
    pub fn resolve(&self, v: Value) -> MemResult<StubId> {
        let id = v.as_stub().ok_or(MemError::Decayed)?;
        if self.is_live(id) {
            Ok(id)
        } else {
            Err(MemError::Decayed)
        }
    }

    pub fn is_live(&self, id: StubId) -> bool {
        match self.slots.get(id.index() as usize) {
            Some(slot) => slot.generation == id.generation() && slot.stub.is_some(),
            None => false,
        }
    }

    /// Trusted access tier. Callers must have resolved the id; debug builds
    /// re-verify the generation, release builds index directly.
    pub fn stub(&self, id: StubId) -> &Stub {
        let slot = &self.slots[id.index() as usize];
        debug_assert_eq!(slot.generation, id.generation(), "stale stub id {:?}", id);
        slot.stub.as_ref().expect("decayed stub on trusted tier")
    }

    pub fn stub_mut(&mut self, id: StubId) -> &mut Stub {
        let slot = &mut self.slots[id.index() as usize];
        debug_assert_eq!(slot.generation, id.generation(), "stale stub id {:?}", id);
        slot.stub.as_mut().expect("decayed stub on trusted tier")
    }

    pub(crate) fn stub_and_pool(&mut self, id: StubId) -> (&mut Stub, &mut Pool) {
        let slot = &mut self.slots[id.index() as usize];
        debug_assert_eq!(slot.generation, id.generation(), "stale stub id {:?}", id);
        (
            slot.stub.as_mut().expect("decayed stub on trusted tier"),
            &mut self.pool,
        )
    }

    // -- freeing and decay ------------------------------------------------

    /// Release a stub's memory now. Outstanding ids decay: the slot
    /// generation bumps, so every later resolve fails the same cheap
    /// compare regardless of which stub once lived here.
    pub fn free_stub(&mut self, id: StubId) {
        debug_assert!(self.is_live(id), "double free of {:?}", id);
        // A pairlist owns its hash index; freeing one frees both, just as
        // manage cascades across the pair.
        if self.stub(id).flavor() == Flavor::PairList {
            let hashes = self.stub(id).hashlist();
            if self.is_live(hashes) {
                self.free_stub(hashes);
            }
        }
        let slot = &mut self.slots[id.index() as usize];
        let stub = slot.stub.take().expect("double free");
        slot.generation = next_gen(slot.generation.get());
        if let Content::Dynamic { data, .. } = stub.content {
            self.pool.recycle(data);
        }
        if !stub.flags.contains(StubFlags::MANAGED) {
            if let Some(at) = self.manual.iter().position(|&m| m == id) {
                self.manual.swap_remove(at);
            }
        }
        self.guards.retain(|&mut g| g != id);
        self.free.push(id.index());
    }

    /// Unmanaged stubs still live: the leak report.
    pub fn leaked(&self) -> &[StubId] {
        &self.manual
    }

    // -- GC ---------------------------------------------------------------

    /// Protect a not-yet-reachable stub from the next sweep (LIFO).
    pub fn guard(&mut self, id: StubId) {
        self.guards.push(id);
    }

    pub fn unguard(&mut self, id: StubId) {
        match self.guards.pop() {
            Some(top) if top == id => {}
            Some(top) => {
                debug_assert!(false, "unguard out of order: {:?} vs {:?}", id, top);
                self.guards.retain(|&mut g| g != id);
                self.guards.push(top);
            }
            None => debug_assert!(false, "unguard with empty guard stack"),
        }
    }

    /// Mark from the caller's roots plus every internal root (frames,
    /// guards, the manual list, interned symbols), then sweep unmarked
    /// managed stubs. Runs only when the caller says so; never preemptive.
    pub fn collect(&mut self, roots: &[Value]) -> usize {
        let mut work: Vec<StubId> = Vec::new();
        for v in roots {
            if let Some(id) = v.as_stub() {
                if self.is_live(id) {
                    work.push(id);
                }
            }
        }
        work.extend(self.guards.iter().copied());
        work.extend(self.manual.iter().copied());
        work.extend(self.symbols.values().copied());
        for frame in &self.frames {
            let mut cursor = frame.head;
            while let Some(id) = cursor {
                work.push(id);
                cursor = self.stub(id).root_next();
            }
        }

        while let Some(id) = work.pop() {
            // Relation slots may hold decayed ids after a manual free;
            // those are simply not reachable.
            if !self.is_live(id) {
                continue;
            }
            let stub = self.stub_mut(id);
            if stub.flags.contains(StubFlags::MARKED) {
                continue;
            }
            stub.flags.insert(StubFlags::MARKED);
            let stub = self.stub(id);
            trace_slots(stub, &mut work);
            if stub.flavor().holds_cells() {
                for i in 0..stub.used() {
                    if let Some(target) = stub.cell(i).as_stub() {
                        work.push(target);
                    }
                }
            }
        }

        let mut swept = 0;
        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            let Some(stub) = slot.stub.as_mut() else { continue };
            if stub.flags.contains(StubFlags::MARKED) {
                stub.flags.remove(StubFlags::MARKED);
                continue;
            }
            if !stub.flags.contains(StubFlags::MANAGED) {
                continue;
            }
            let stub = slot.stub.take().expect("checked above");
            slot.generation = next_gen(slot.generation.get());
            if let Content::Dynamic { data, .. } = stub.content {
                self.pool.recycle(data);
            }
            self.free.push(index as u32);
            swept += 1;
        }

        self.stats.collections += 1;
        self.stats.last_swept = swept;
        debug!(
            swept,
            live = self.live_count(),
            pooled_bytes = self.pool.bytes_pooled(),
            "collection complete"
        );
        swept
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        if !self.manual.is_empty() {
            warn!(count = self.manual.len(), "unmanaged stubs leaked at heap teardown");
        } else {
            trace!("heap teardown clean");
        }
    }
}

/// Push every stub id reachable through a stub's typed relation slots.
fn trace_slots(stub: &Stub, work: &mut Vec<StubId>) {
    match stub.link {
        Link::Synonym(id)
        | Link::Ancestor(id)
        | Link::Schema(id)
        | Link::HashList(id)
        | Link::FileOrigin(id)
        | Link::NextPatch(id) => work.push(id),
        Link::RootPrev(RootNeighbor::Handle(id)) => work.push(id),
        Link::RootPrev(RootNeighbor::Frame(_)) | Link::Bookmark { .. } | Link::None => {}
    }
    match stub.misc {
        Misc::SymbolMeta { patch: Some(id), .. } => work.push(id),
        Misc::RootNext(Some(id)) => work.push(id),
        Misc::PatchContext(id) => work.push(id),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_stub_is_empty_with_capacity() {
        let mut heap = Heap::new();
        for cap in [0usize, 1, 3, 10, 1000] {
            let id = heap.make(Flavor::Sequence, cap).unwrap();
            let stub = heap.stub(id);
            assert_eq!(stub.used(), 0);
            assert!(stub.rest() >= cap, "rest {} < cap {}", stub.rest(), cap);
        }
    }

    #[test]
    fn inline_selection_matches_width() {
        let mut heap = Heap::new();
        // 2 cells * 8 bytes fits the 24-byte header region even with the
        // debug guard cell; 24 cells never does.
        let small = heap.make(Flavor::Binary, 4).unwrap();
        assert!(heap.stub(small).is_inline());
        let big = heap.make(Flavor::Sequence, 24).unwrap();
        assert!(!heap.stub(big).is_inline());
    }

    #[test]
    fn capacity_overflow_is_typed() {
        let mut heap = Heap::new();
        let err = heap.make(Flavor::Sequence, usize::MAX / 2).unwrap_err();
        assert!(matches!(err, MemError::CapacityOverflow { .. }));
    }

    #[test]
    fn freed_stub_decays_identically() {
        let mut heap = Heap::new();
        let a = heap.make(Flavor::Binary, 100).unwrap();
        let b = heap.make(Flavor::Sequence, 100).unwrap();
        let va = Value::from_stub(a);
        let vb = Value::from_stub(b);
        heap.free_stub(a);
        heap.free_stub(b);
        assert_eq!(heap.resolve(va), Err(MemError::Decayed));
        assert_eq!(heap.resolve(vb), Err(MemError::Decayed));
        assert!(!heap.is_live(a));
    }

    #[test]
    fn slot_reuse_does_not_resurrect() {
        let mut heap = Heap::new();
        let old = heap.make(Flavor::Binary, 50).unwrap();
        heap.free_stub(old);
        let new = heap.make(Flavor::Binary, 50).unwrap();
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());
        assert!(heap.resolve(Value::from_stub(old)).is_err());
        assert!(heap.resolve(Value::from_stub(new)).is_ok());
    }

    #[test]
    fn collect_sweeps_unreachable_managed_only() {
        let mut heap = Heap::new();
        let keep = heap.make_managed(Flavor::Sequence, 8).unwrap();
        let lose = heap.make_managed(Flavor::Sequence, 8).unwrap();
        let manual = heap.make(Flavor::Sequence, 8).unwrap();
        let root = Value::from_stub(keep);
        let swept = heap.collect(&[root]);
        assert_eq!(swept, 1);
        assert!(heap.is_live(keep));
        assert!(!heap.is_live(lose));
        assert!(heap.is_live(manual));
    }

    #[test]
    fn managed_reachable_through_cells_survives() {
        let mut heap = Heap::new();
        let inner = heap.make_managed(Flavor::Binary, 40).unwrap();
        let outer = heap.make_managed(Flavor::Sequence, 4).unwrap();
        heap.seq_push(outer, Value::from_stub(inner)).unwrap();
        let swept = heap.collect(&[Value::from_stub(outer)]);
        assert_eq!(swept, 0);
        assert!(heap.is_live(inner));
    }

    #[test]
    fn guard_protects_until_unguard() {
        let mut heap = Heap::new();
        let id = heap.make_managed(Flavor::Sequence, 4).unwrap();
        heap.guard(id);
        assert_eq!(heap.collect(&[]), 0);
        assert!(heap.is_live(id));
        heap.unguard(id);
        assert_eq!(heap.collect(&[]), 1);
        assert!(!heap.is_live(id));
    }

    #[test]
    fn manage_clears_leak_tracking() {
        let mut heap = Heap::new();
        let id = heap.make(Flavor::Binary, 4).unwrap();
        assert_eq!(heap.leaked(), &[id]);
        assert_eq!(heap.managed_count(), 0);
        heap.manage(id);
        assert!(heap.leaked().is_empty());
        assert_eq!(heap.managed_count(), 1);
    }
}
