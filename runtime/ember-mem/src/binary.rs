//! Raw byte buffers. One unit of rest is always reserved so terminating
//! writes a NUL exactly past the last element.

use ember_obj_model::StubId;

use crate::error::MemResult;
use crate::flags::Flavor;
use crate::heap::Heap;

impl Heap {
    pub fn bin_make(&mut self, capacity: usize) -> MemResult<StubId> {
        self.make(Flavor::Binary, capacity)
    }

    pub fn bin_from_bytes(&mut self, bytes: &[u8]) -> MemResult<StubId> {
        let id = self.bin_make(bytes.len())?;
        self.bin_append(id, bytes)?;
        Ok(id)
    }

    pub fn bin_len(&self, id: StubId) -> usize {
        debug_assert_eq!(self.stub(id).flavor(), Flavor::Binary);
        self.stub(id).used()
    }

    pub fn bin_bytes(&self, id: StubId) -> &[u8] {
        debug_assert_eq!(self.stub(id).flavor(), Flavor::Binary);
        self.stub(id).bytes()
    }

    pub fn bin_at(&self, id: StubId, index: usize) -> u8 {
        let stub = self.stub(id);
        debug_assert_eq!(stub.flavor(), Flavor::Binary);
        debug_assert!(index < stub.used(), "byte {} past used {}", index, stub.used());
        stub.bytes()[index]
    }

    pub fn bin_push(&mut self, id: StubId, byte: u8) -> MemResult<()> {
        debug_assert_eq!(self.stub(id).flavor(), Flavor::Binary);
        let at = self.stub(id).used();
        self.expand_tail(id, 1)?;
        self.stub_mut(id).bytes_mut()[at] = byte;
        Ok(())
    }

    pub fn bin_append(&mut self, id: StubId, bytes: &[u8]) -> MemResult<()> {
        debug_assert_eq!(self.stub(id).flavor(), Flavor::Binary);
        let at = self.stub(id).used();
        self.expand_tail(id, bytes.len())?;
        self.stub_mut(id).bytes_mut()[at..].copy_from_slice(bytes);
        Ok(())
    }
}
