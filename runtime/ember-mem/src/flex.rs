//! Generic growth and capacity primitives shared by every flex subclass.
//!
//! All structural mutation funnels through here: tail expansion, gap
//! opening, removal (with the biased front fast path), and terminator
//! upkeep. Subclass modules build their operations on these.

use ember_obj_model::StubId;

use crate::error::{MemError, MemResult};
use crate::flags::StubFlags;
use crate::heap::Heap;
use crate::stub::{Content, Stub};

/// Front removal advances `bias` without copying, but only this far: past
/// the cap a rebalancing reallocation reclaims the dead head region so
/// repeated front-removal cannot pin unbounded memory.
pub const BIAS_MAX: usize = 4096;

/// Units reserved past `used`: the NUL terminator slot for byte flexes,
/// the poison guard cell for value flexes in debug builds only.
fn reserve_for(stub: &Stub) -> usize {
    if stub.flavor().byte_wide() || (cfg!(debug_assertions) && stub.wide() == 8) {
        1
    } else {
        0
    }
}

impl Heap {
    /// Fail structural mutation while an enumeration hold is in place.
    pub(crate) fn check_unheld(&self, id: StubId) -> MemResult<()> {
        if self.stub(id).flags.contains(StubFlags::HELD) {
            Err(MemError::Held)
        } else {
            Ok(())
        }
    }

    /// Guarantee room for `need` occupied units plus the reserve, growing
    /// (and possibly relocating) the buffer when rest is insufficient.
    pub(crate) fn ensure_rest(&mut self, id: StubId, need: usize) -> MemResult<()> {
        let (stub, pool) = self.stub_and_pool(id);
        let wide = stub.wide();
        let reserve = reserve_for(stub);
        let want = need
            .checked_add(reserve)
            .ok_or(MemError::CapacityOverflow { units: need, wide })?;
        if want <= stub.rest() {
            return Ok(());
        }
        debug_assert!(
            !stub.flags.contains(StubFlags::FIXED_SIZE),
            "growth of a fixed-size flex"
        );

        // Relocation folds any bias back into usable capacity.
        let grown = stub.rest().saturating_mul(2).max(want);
        let bytes = grown
            .checked_mul(wide)
            .filter(|&b| b <= u32::MAX as usize)
            .ok_or(MemError::CapacityOverflow { units: grown, wide })?;
        let mut data = pool.alloc(bytes)?;
        let used = stub.used();
        data[..used * wide].copy_from_slice(stub.bytes());
        let old = std::mem::replace(
            &mut stub.content,
            Content::Dynamic {
                data,
                bias: 0,
                used: used as u32,
            },
        );
        if let Content::Dynamic { data, .. } = old {
            pool.recycle(data);
        }
        Ok(())
    }

    /// Grow the occupied region by `extra` zeroed units at the tail.
    pub fn expand_tail(&mut self, id: StubId, extra: usize) -> MemResult<()> {
        self.check_unheld(id)?;
        let used = self.stub(id).used();
        let need = used
            .checked_add(extra)
            .ok_or(MemError::CapacityOverflow { units: used, wide: self.stub(id).wide() })?;
        self.ensure_rest(id, need)?;
        let stub = self.stub_mut(id);
        let wide = stub.wide();
        stub.set_used_raw(need);
        stub.bytes_mut()[used * wide..].fill(0);
        self.finish_mutation(id);
        Ok(())
    }

    /// Open a zeroed gap of `count` units at `index`, shifting the tail up.
    pub fn expand_at(&mut self, id: StubId, index: usize, count: usize) -> MemResult<()> {
        self.check_unheld(id)?;
        let used = self.stub(id).used();
        debug_assert!(index <= used, "gap at {} past used {}", index, used);
        let need = used
            .checked_add(count)
            .ok_or(MemError::CapacityOverflow { units: used, wide: self.stub(id).wide() })?;
        self.ensure_rest(id, need)?;
        let stub = self.stub_mut(id);
        let wide = stub.wide();
        stub.set_used_raw(need);
        let data = stub.data_mut();
        data.copy_within(index * wide..used * wide, (index + count) * wide);
        data[index * wide..(index + count) * wide].fill(0);
        self.finish_mutation(id);
        Ok(())
    }

    /// Remove `count` units at `index`. Removal at the head advances the
    /// bias instead of copying, up to [`BIAS_MAX`].
    pub fn remove_at(&mut self, id: StubId, index: usize, count: usize) -> MemResult<()> {
        self.check_unheld(id)?;
        let mut need_rebalance = false;
        {
            let stub = self.stub_mut(id);
            let used = stub.used();
            debug_assert!(
                index + count <= used,
                "remove {}..{} past used {}",
                index,
                index + count,
                used
            );
            let wide = stub.wide();
            let mut shifted = false;
            if index == 0 {
                if let Content::Dynamic { bias, used: u, .. } = &mut stub.content {
                    *bias += count as u32;
                    *u -= count as u32;
                    need_rebalance = *bias as usize > BIAS_MAX;
                    shifted = true;
                }
            }
            if !shifted {
                let data = stub.data_mut();
                data.copy_within((index + count) * wide..used * wide, index * wide);
                stub.set_used_raw(used - count);
            }
        }
        if need_rebalance {
            self.rebalance(id)?;
        }
        self.finish_mutation(id);
        Ok(())
    }

    /// Copy the occupied region back to the front of the allocation,
    /// reclaiming accumulated head slack.
    fn rebalance(&mut self, id: StubId) -> MemResult<()> {
        let stub = self.stub_mut(id);
        let wide = stub.wide();
        if let Content::Dynamic { data, bias, used } = &mut stub.content {
            let from = *bias as usize * wide;
            let len = *used as usize * wide;
            data.copy_within(from..from + len, 0);
            *bias = 0;
        }
        Ok(())
    }

    /// Set the occupancy count directly. New units are zeroed; the count
    /// must fit the existing rest (this never reallocates).
    pub fn set_used(&mut self, id: StubId, n: usize) -> MemResult<()> {
        self.check_unheld(id)?;
        let stub = self.stub_mut(id);
        let old = stub.used();
        debug_assert!(
            n + reserve_for(stub) <= stub.rest(),
            "set_used {} exceeds rest {}",
            n,
            stub.rest()
        );
        stub.set_used_raw(n);
        if n > old {
            let wide = stub.wide();
            stub.bytes_mut()[old * wide..].fill(0);
        }
        self.finish_mutation(id);
        Ok(())
    }

    /// Write the NUL exactly one byte past the last element of a byte
    /// flex. The reserve guarantees the slot exists.
    pub fn terminate(&mut self, id: StubId) {
        let stub = self.stub_mut(id);
        debug_assert!(stub.flavor().byte_wide(), "terminate on a non-byte flex");
        let used = stub.used();
        debug_assert!(used < stub.rest());
        stub.data_mut()[used] = 0;
    }

    /// Post-mutation upkeep: byte flexes re-terminate, value flexes renew
    /// the debug poison guard.
    pub(crate) fn finish_mutation(&mut self, id: StubId) {
        let stub = self.stub_mut(id);
        if stub.flavor().byte_wide() {
            let used = stub.used();
            debug_assert!(used < stub.rest());
            stub.data_mut()[used] = 0;
        } else {
            stub.poison_tail();
        }
    }

    // -- enumeration hold -------------------------------------------------

    /// Take the structural mutation lock for the duration of an
    /// enumeration. Already-held buffers report [`MemError::Held`].
    pub fn hold(&mut self, id: StubId) -> MemResult<()> {
        let stub = self.stub_mut(id);
        if stub.flags.contains(StubFlags::HELD) {
            return Err(MemError::Held);
        }
        stub.flags.insert(StubFlags::HELD);
        Ok(())
    }

    pub fn release(&mut self, id: StubId) {
        let stub = self.stub_mut(id);
        debug_assert!(stub.flags.contains(StubFlags::HELD), "release without hold");
        stub.flags.remove(StubFlags::HELD);
    }

    /// Run `body` with the hold taken, releasing on every exit path
    /// including the error path.
    pub fn enumerate<R>(
        &mut self,
        id: StubId,
        body: impl FnOnce(&mut Heap) -> MemResult<R>,
    ) -> MemResult<R> {
        self.hold(id)?;
        let out = body(self);
        self.release(id);
        out
    }
}
