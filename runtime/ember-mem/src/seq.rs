//! Ordered tagged-value buffers.
//!
//! One value cell per unit. Occupancy is authoritative -- there is no
//! terminator to maintain -- and debug builds keep a poison cell past the
//! occupied region to catch overruns. Sequences optionally carry source
//! provenance (file symbol + line) and a trailing-newline formatting hint,
//! both propagated on copy only when asked for.

use ember_obj_model::{StubId, Value};

use crate::error::MemResult;
use crate::flags::{Flavor, StubFlags};
use crate::heap::Heap;

impl Heap {
    pub fn seq_make(&mut self, capacity: usize) -> MemResult<StubId> {
        self.make(Flavor::Sequence, capacity)
    }

    pub fn seq_len(&self, id: StubId) -> usize {
        debug_assert_eq!(self.stub(id).flavor(), Flavor::Sequence);
        self.stub(id).used()
    }

    pub fn seq_push(&mut self, id: StubId, v: Value) -> MemResult<()> {
        debug_assert_eq!(self.stub(id).flavor(), Flavor::Sequence);
        let at = self.stub(id).used();
        self.expand_tail(id, 1)?;
        self.stub_mut(id).set_cell(at, v);
        Ok(())
    }

    pub fn seq_insert(&mut self, id: StubId, index: usize, v: Value) -> MemResult<()> {
        debug_assert_eq!(self.stub(id).flavor(), Flavor::Sequence);
        self.expand_at(id, index, 1)?;
        self.stub_mut(id).set_cell(index, v);
        Ok(())
    }

    pub fn seq_remove(&mut self, id: StubId, index: usize) -> MemResult<Value> {
        debug_assert_eq!(self.stub(id).flavor(), Flavor::Sequence);
        let v = self.stub(id).cell(index);
        self.remove_at(id, index, 1)?;
        Ok(v)
    }

    pub fn seq_at(&self, id: StubId, index: usize) -> Value {
        let stub = self.stub(id);
        debug_assert_eq!(stub.flavor(), Flavor::Sequence);
        #[cfg(debug_assertions)]
        debug_assert!(stub.tail_poisoned(), "poison guard clobbered");
        let v = stub.cell(index);
        debug_assert!(!v.is_tombstone(), "tombstone read through seq_at");
        v
    }

    /// Cell overwrite. Not structural: legal while the flex is held.
    pub fn seq_set(&mut self, id: StubId, index: usize, v: Value) {
        debug_assert_eq!(self.stub(id).flavor(), Flavor::Sequence);
        self.stub_mut(id).set_cell(index, v);
    }

    /// Attach parser-supplied source provenance.
    pub fn seq_set_origin(&mut self, id: StubId, file: StubId, line: u32) {
        debug_assert_eq!(self.stub(file).flavor(), Flavor::Symbol);
        self.stub_mut(id).set_origin(file, line);
    }

    pub fn seq_origin(&self, id: StubId) -> Option<(StubId, u32)> {
        let stub = self.stub(id);
        if !stub.flags().contains(StubFlags::HAS_PROVENANCE) {
            return None;
        }
        Some((stub.file_origin()?, stub.line()?))
    }

    pub fn seq_set_newline_tail(&mut self, id: StubId, on: bool) {
        debug_assert_eq!(self.stub(id).flavor(), Flavor::Sequence);
        let stub = self.stub_mut(id);
        if on {
            stub.flags.insert(StubFlags::NEWLINE_TAIL);
        } else {
            stub.flags.remove(StubFlags::NEWLINE_TAIL);
        }
    }

    pub fn seq_newline_tail(&self, id: StubId) -> bool {
        self.stub(id).flags().contains(StubFlags::NEWLINE_TAIL)
    }

    /// Copy a sequence. Provenance and the newline hint follow the source
    /// only when `keep_marks` is set; otherwise the copy starts clean.
    pub fn seq_copy(&mut self, id: StubId, keep_marks: bool) -> MemResult<StubId> {
        debug_assert_eq!(self.stub(id).flavor(), Flavor::Sequence);
        let len = self.stub(id).used();
        let copy = self.seq_make(len)?;
        for i in 0..len {
            let v = self.stub(id).cell(i);
            self.seq_push(copy, v)?;
        }
        if keep_marks {
            if let Some((file, line)) = self.seq_origin(id) {
                self.seq_set_origin(copy, file, line);
            }
            if self.seq_newline_tail(id) {
                self.seq_set_newline_tail(copy, true);
            }
        }
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_reads_back_in_order_across_growth() {
        let mut heap = Heap::new();
        let id = heap.seq_make(1).unwrap();
        for i in 0..500 {
            heap.seq_push(id, Value::from_int(i)).unwrap();
        }
        assert_eq!(heap.seq_len(id), 500);
        for i in 0..500 {
            assert_eq!(heap.seq_at(id, i as usize).as_int(), Some(i));
        }
    }

    #[test]
    fn three_element_addressing() {
        let mut heap = Heap::new();
        let id = heap.seq_make(0).unwrap();
        for i in 0..3 {
            heap.seq_push(id, Value::from_int(i)).unwrap();
        }
        assert_eq!(heap.seq_len(id), 3);
        // Last element sits exactly two element-widths past the head.
        let bytes = heap.stub(id).bytes();
        assert_eq!(bytes.len(), 3 * 8);
        let last = u64::from_ne_bytes(bytes[16..24].try_into().unwrap());
        assert_eq!(Value::from_bits(last).as_int(), Some(2));
    }

    #[test]
    fn insert_and_remove_keep_order() {
        let mut heap = Heap::new();
        let id = heap.seq_make(4).unwrap();
        for i in [1i64, 3, 4] {
            heap.seq_push(id, Value::from_int(i)).unwrap();
        }
        heap.seq_insert(id, 1, Value::from_int(2)).unwrap();
        let got: Vec<i64> = (0..4).map(|i| heap.seq_at(id, i).as_int().unwrap()).collect();
        assert_eq!(got, [1, 2, 3, 4]);
        let removed = heap.seq_remove(id, 0).unwrap();
        assert_eq!(removed.as_int(), Some(1));
        assert_eq!(heap.seq_at(id, 0).as_int(), Some(2));
    }

    #[test]
    fn copy_propagates_marks_only_on_request() {
        let mut heap = Heap::new();
        let file = heap.intern("demo.emb").unwrap();
        let id = heap.seq_make(2).unwrap();
        heap.seq_push(id, Value::from_int(10)).unwrap();
        heap.seq_set_origin(id, file, 42);
        heap.seq_set_newline_tail(id, true);

        let plain = heap.seq_copy(id, false).unwrap();
        assert_eq!(heap.seq_origin(plain), None);
        assert!(!heap.seq_newline_tail(plain));

        let marked = heap.seq_copy(id, true).unwrap();
        assert_eq!(heap.seq_origin(marked), Some((file, 42)));
        assert!(heap.seq_newline_tail(marked));
        assert_eq!(heap.seq_at(marked, 0).as_int(), Some(10));
    }
}
