//! Root handles: single-cell stubs that pin a value for native code while
//! the collector runs. Handles chain doubly-linked off a frame stack so a
//! whole frame's handles release in one pop, and each handle unlinks in
//! constant time when freed early.

use ember_obj_model::{StubId, Value};
use tracing::warn;

use crate::error::MemResult;
use crate::flags::{Flavor, StubFlags};
use crate::heap::Heap;
use crate::stub::RootNeighbor;

/// One level of the root-handle stack. The heap always keeps a base frame,
/// so handles allocated outside any pushed frame still have an anchor.
pub(crate) struct Frame {
    /// Most recently allocated live handle in this frame.
    pub(crate) head: Option<StubId>,
}

impl Frame {
    pub(crate) fn new() -> Self {
        Frame { head: None }
    }
}

impl Heap {
    /// Open a frame; handles allocated until the matching [`Heap::pop_frame`]
    /// belong to it.
    pub fn push_frame(&mut self) {
        self.frames.push(Frame::new());
    }

    /// Close the top frame, releasing every handle still chained to it.
    /// Surviving handles mean a native caller forgot a free, so the bulk
    /// release is logged.
    pub fn pop_frame(&mut self) {
        debug_assert!(self.frames.len() > 1, "popping the base frame");
        let frame = match self.frames.pop() {
            Some(f) => f,
            None => return,
        };
        let mut released = 0usize;
        let mut cursor = frame.head;
        while let Some(id) = cursor {
            cursor = self.stub(id).root_next();
            self.free_stub(id);
            released += 1;
        }
        if released > 0 {
            warn!(released, "root handles still live at frame pop");
        }
    }

    /// Pin `v` until the handle is freed or its frame pops. The handle
    /// links at the head of the top frame's chain.
    pub fn alloc_root(&mut self, v: Value) -> MemResult<StubId> {
        let id = self.make(Flavor::RootHandle, 1)?;
        self.expand_tail(id, 1)?;
        let frame_index = self.frames.len() - 1;
        let old_head = self.frames[frame_index].head;
        {
            let stub = self.stub_mut(id);
            stub.flags.insert(StubFlags::ROOT | StubFlags::FIXED_SIZE);
            stub.set_cell(0, v);
            stub.set_root_prev(RootNeighbor::Frame(frame_index as u32));
            stub.set_root_next(old_head);
        }
        if let Some(next) = old_head {
            self.stub_mut(next).set_root_prev(RootNeighbor::Handle(id));
        }
        self.frames[frame_index].head = Some(id);
        Ok(id)
    }

    /// Unlink and free one handle. Constant time regardless of chain length.
    pub fn free_root(&mut self, id: StubId) {
        debug_assert_eq!(self.stub(id).flavor(), Flavor::RootHandle);
        let prev = self.stub(id).root_prev();
        let next = self.stub(id).root_next();
        match prev {
            RootNeighbor::Frame(fi) => self.frames[fi as usize].head = next,
            RootNeighbor::Handle(p) => self.stub_mut(p).set_root_next(next),
        }
        if let Some(n) = next {
            self.stub_mut(n).set_root_prev(prev);
        }
        self.free_stub(id);
    }

    pub fn root_value(&self, id: StubId) -> Value {
        debug_assert_eq!(self.stub(id).flavor(), Flavor::RootHandle);
        self.stub(id).cell(0)
    }

    pub fn set_root_value(&mut self, id: StubId, v: Value) {
        debug_assert_eq!(self.stub(id).flavor(), Flavor::RootHandle);
        self.stub_mut(id).set_cell(0, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_obj_model::Value;

    #[test]
    fn handle_pins_value() {
        let mut heap = Heap::new();
        let r = heap.alloc_root(Value::from_int(42)).unwrap();
        assert_eq!(heap.root_value(r).as_int(), Some(42));
        heap.set_root_value(r, Value::from_bool(true));
        assert_eq!(heap.root_value(r).as_bool(), Some(true));
        heap.free_root(r);
        assert!(!heap.is_live(r));
    }

    #[test]
    fn freeing_middle_handle_keeps_chain_intact() {
        let mut heap = Heap::new();
        let a = heap.alloc_root(Value::from_int(1)).unwrap();
        let b = heap.alloc_root(Value::from_int(2)).unwrap();
        let c = heap.alloc_root(Value::from_int(3)).unwrap();
        heap.free_root(b);
        // Chain is head-first: c then a.
        assert_eq!(heap.stub(c).root_next(), Some(a));
        assert_eq!(heap.stub(a).root_prev(), RootNeighbor::Handle(c));
        heap.free_root(c);
        heap.free_root(a);
        assert!(heap.leaked().is_empty());
    }

    #[test]
    fn freeing_head_handle_rewires_frame() {
        let mut heap = Heap::new();
        let a = heap.alloc_root(Value::from_int(1)).unwrap();
        let b = heap.alloc_root(Value::from_int(2)).unwrap();
        heap.free_root(b);
        let c = heap.alloc_root(Value::from_int(3)).unwrap();
        assert_eq!(heap.stub(c).root_next(), Some(a));
        heap.free_root(a);
        heap.free_root(c);
    }

    #[test]
    fn pop_frame_releases_in_bulk() {
        let mut heap = Heap::new();
        let outer = heap.alloc_root(Value::from_int(0)).unwrap();
        heap.push_frame();
        let x = heap.alloc_root(Value::from_int(1)).unwrap();
        let y = heap.alloc_root(Value::from_int(2)).unwrap();
        heap.pop_frame();
        assert!(!heap.is_live(x));
        assert!(!heap.is_live(y));
        assert!(heap.is_live(outer));
        heap.free_root(outer);
    }

    #[test]
    fn rooted_value_survives_collection() {
        let mut heap = Heap::new();
        let seq = heap.make_managed(Flavor::Sequence, 4).unwrap();
        let r = heap.alloc_root(Value::from_stub(seq)).unwrap();
        heap.manage(r);
        assert_eq!(heap.collect(&[]), 0);
        assert!(heap.is_live(seq));
        heap.free_root(r);
        assert_eq!(heap.collect(&[]), 1);
        assert!(!heap.is_live(seq));
    }
}
