//! Interned symbols.
//!
//! A symbol is an immutable byte flex holding one spelling. All spellings
//! that fold to the same string share one circular synonym ring; the intern
//! table maps the folded spelling to the ring's canonical member. The ring
//! always loops back to its origin, which doubles as the visit guard when
//! walking it. Per-binding-context variable patches hang off the symbol in
//! a second circular ring.

use ember_obj_model::{StubId, Value};

use crate::error::MemResult;
use crate::flags::Flavor;
use crate::heap::Heap;
use crate::stub::Misc;

/// FNV-1a over the folded spelling; stable across the process.
fn spelling_hash(folded: &str) -> u32 {
    let mut h: u32 = 0x811c_9dc5;
    for &b in folded.as_bytes() {
        h ^= b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

fn fold(spelling: &str) -> String {
    spelling.to_lowercase()
}

impl Heap {
    /// Intern a spelling, returning its canonical stub. A new casing of an
    /// already-known symbol is spliced into the existing synonym ring.
    pub fn intern(&mut self, spelling: &str) -> MemResult<StubId> {
        let folded = fold(spelling);
        if let Some(&canonical) = self.symbols.get(folded.as_str()) {
            if let Some(existing) = self.find_spelling(canonical, spelling) {
                return Ok(existing);
            }
            let id = self.new_symbol(spelling, &folded)?;
            // Splice after the canonical member; the ring stays circular.
            let after = self.stub(canonical).synonym();
            self.stub_mut(id).set_synonym(after);
            self.stub_mut(canonical).set_synonym(id);
            return Ok(id);
        }
        let id = self.new_symbol(spelling, &folded)?;
        self.stub_mut(id).set_synonym(id);
        self.symbols.insert(folded.into_boxed_str(), id);
        Ok(id)
    }

    fn new_symbol(&mut self, spelling: &str, folded: &str) -> MemResult<StubId> {
        // Symbols live for the process; the intern table roots them, so
        // they go straight to managed rather than the manual list.
        let id = self.make_managed(Flavor::Symbol, spelling.len())?;
        let stub = self.stub_mut(id);
        stub.set_used_raw(spelling.len());
        stub.bytes_mut().copy_from_slice(spelling.as_bytes());
        stub.misc = Misc::SymbolMeta {
            hash: spelling_hash(folded),
            patch: None,
        };
        self.terminate(id);
        Ok(id)
    }

    pub fn symbol_str(&self, id: StubId) -> &str {
        debug_assert_eq!(self.stub(id).flavor(), Flavor::Symbol);
        self.text_str(id)
    }

    pub fn symbol_hash(&self, id: StubId) -> u32 {
        self.stub(id).symbol_hash()
    }

    /// Walk the ring looking for an exact (case-sensitive) spelling.
    fn find_spelling(&self, start: StubId, spelling: &str) -> Option<StubId> {
        let mut cursor = start;
        loop {
            if self.symbol_str(cursor) == spelling {
                return Some(cursor);
            }
            cursor = self.stub(cursor).synonym();
            if cursor == start {
                return None;
            }
        }
    }

    /// Case-insensitive equivalence: two symbols are alike when they sit on
    /// the same synonym ring.
    pub fn symbols_alike(&self, a: StubId, b: StubId) -> bool {
        if a == b {
            return true;
        }
        if self.stub(a).symbol_hash() != self.stub(b).symbol_hash() {
            return false;
        }
        let mut cursor = self.stub(a).synonym();
        while cursor != a {
            if cursor == b {
                return true;
            }
            cursor = self.stub(cursor).synonym();
        }
        false
    }

    /// Number of spellings on the ring, counted from any member.
    pub fn synonym_ring_len(&self, id: StubId) -> usize {
        let mut n = 1;
        let mut cursor = self.stub(id).synonym();
        while cursor != id {
            n += 1;
            cursor = self.stub(cursor).synonym();
        }
        n
    }

    // -- binding patches --------------------------------------------------

    /// Attach a per-binding-context patch to a symbol. The patch holds one
    /// value cell and joins the symbol's circular patch ring.
    pub fn attach_patch(&mut self, symbol: StubId, context: StubId, v: Value) -> MemResult<StubId> {
        debug_assert_eq!(self.stub(symbol).flavor(), Flavor::Symbol);
        debug_assert!(
            self.patch_for(symbol, context).is_none(),
            "symbol already patched for this context"
        );
        // Patches stay reachable through their symbol's ring.
        let patch = self.make_managed(Flavor::Patch, 1)?;
        {
            let stub = self.stub_mut(patch);
            stub.set_used_raw(1);
            stub.set_cell(0, v);
            stub.set_patch_context(context);
        }
        match self.stub(symbol).patch_head() {
            None => {
                self.stub_mut(patch).set_next_patch(patch);
                self.stub_mut(symbol).set_patch_head(Some(patch));
            }
            Some(head) => {
                let after = self.stub(head).next_patch();
                self.stub_mut(patch).set_next_patch(after);
                self.stub_mut(head).set_next_patch(patch);
            }
        }
        self.finish_mutation(patch);
        Ok(patch)
    }

    /// Find the patch binding this symbol in `context`, walking the ring
    /// with the head as the visit guard.
    pub fn patch_for(&self, symbol: StubId, context: StubId) -> Option<StubId> {
        let head = self.stub(symbol).patch_head()?;
        let mut cursor = head;
        loop {
            if self.stub(cursor).patch_context() == context {
                return Some(cursor);
            }
            cursor = self.stub(cursor).next_patch();
            if cursor == head {
                return None;
            }
        }
    }

    pub fn patch_value(&self, patch: StubId) -> Value {
        debug_assert_eq!(self.stub(patch).flavor(), Flavor::Patch);
        self.stub(patch).cell(0)
    }

    pub fn set_patch_value(&mut self, patch: StubId, v: Value) {
        debug_assert_eq!(self.stub(patch).flavor(), Flavor::Patch);
        self.stub_mut(patch).set_cell(0, v);
    }
}
