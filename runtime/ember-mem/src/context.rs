//! Object/frame instances and their ordered-schema companions.
//!
//! A context pairs a varlist (value cells, slot 0 reserved for the
//! self-describing archetype) with a schema listing the symbol for each
//! slot. Deriving an instance shares the parent's schema until one side
//! diverges; a shared schema is copied before its first in-place append.
//! Schemas record the narrower schema they grew from, terminating in a
//! self-reference, which makes structural compatibility an identity walk.

use ember_obj_model::{StubId, Value};

use crate::error::MemResult;
use crate::flags::{Flavor, StubFlags};
use crate::heap::Heap;

impl Heap {
    /// A fresh context with no fields and a unique, self-ancestored schema.
    pub fn context_make(&mut self, capacity: usize) -> MemResult<StubId> {
        let schema = self.make(Flavor::Schema, capacity)?;
        self.stub_mut(schema).set_ancestor(schema);
        let ctx = self.make(Flavor::Context, capacity + 1)?;
        self.expand_tail(ctx, 1)?;
        self.stub_mut(ctx).set_cell(0, Value::from_stub(ctx));
        self.stub_mut(ctx).set_schema(schema);
        Ok(ctx)
    }

    /// Derive an instance from `parent`: field values are copied, the
    /// schema is shared until either side appends.
    pub fn context_derive(&mut self, parent: StubId) -> MemResult<StubId> {
        debug_assert_eq!(self.stub(parent).flavor(), Flavor::Context);
        let schema = self.stub(parent).schema();
        let len = self.stub(parent).used();
        let ctx = self.make(Flavor::Context, len)?;
        self.expand_tail(ctx, len)?;
        self.stub_mut(ctx).set_cell(0, Value::from_stub(ctx));
        for i in 1..len {
            let v = self.stub(parent).cell(i);
            self.stub_mut(ctx).set_cell(i, v);
        }
        self.stub_mut(ctx).set_schema(schema);
        self.stub_mut(schema).flags.insert(StubFlags::SHARED);
        Ok(ctx)
    }

    pub fn context_schema(&self, ctx: StubId) -> StubId {
        self.stub(ctx).schema()
    }

    /// Field count (slot 0 is not a field).
    pub fn context_len(&self, ctx: StubId) -> usize {
        let schema = self.stub(ctx).schema();
        self.stub(schema).used()
    }

    pub fn context_archetype(&self, ctx: StubId) -> Value {
        debug_assert_eq!(self.stub(ctx).flavor(), Flavor::Context);
        self.stub(ctx).cell(0)
    }

    /// Append a field. A shared schema is copied first (copy-on-divergence)
    /// so siblings never observe the new name; only a uniquely owned schema
    /// mutates in place. Returns the new field's 1-based slot index.
    pub fn context_append(&mut self, ctx: StubId, symbol: StubId) -> MemResult<usize> {
        debug_assert_eq!(self.stub(ctx).flavor(), Flavor::Context);
        debug_assert_eq!(self.stub(symbol).flavor(), Flavor::Symbol);
        let mut schema = self.stub(ctx).schema();
        if self.stub(schema).flags().contains(StubFlags::SHARED) {
            schema = self.schema_diverge(ctx, schema)?;
        }
        let at = self.stub(schema).used();
        self.expand_tail(schema, 1)?;
        self.stub_mut(schema).set_cell(at, Value::from_stub(symbol));

        let slot = self.stub(ctx).used();
        self.expand_tail(ctx, 1)?;
        self.stub_mut(ctx).set_cell(slot, Value::none());
        debug_assert!(
            self.stub(schema).used() <= self.stub(ctx).used() - 1,
            "schema outgrew its instance"
        );
        Ok(slot)
    }

    /// Copy a shared schema for one diverging instance. The copy records
    /// the original as its ancestor and starts out uniquely owned.
    fn schema_diverge(&mut self, ctx: StubId, schema: StubId) -> MemResult<StubId> {
        let len = self.stub(schema).used();
        let copy = self.make(Flavor::Schema, len + 1)?;
        self.expand_tail(copy, len)?;
        for i in 0..len {
            let v = self.stub(schema).cell(i);
            self.stub_mut(copy).set_cell(i, v);
        }
        self.stub_mut(copy).set_ancestor(schema);
        self.stub_mut(ctx).set_schema(copy);
        Ok(copy)
    }

    /// Value of the 1-based field slot.
    pub fn context_get(&self, ctx: StubId, slot: usize) -> Value {
        debug_assert!(slot >= 1, "slot 0 is the archetype");
        self.stub(ctx).cell(slot)
    }

    pub fn context_set(&mut self, ctx: StubId, slot: usize, v: Value) {
        debug_assert!(slot >= 1, "slot 0 is the archetype");
        self.stub_mut(ctx).set_cell(slot, v);
    }

    /// Symbol naming the 1-based field slot.
    pub fn context_key(&self, ctx: StubId, slot: usize) -> StubId {
        let schema = self.stub(ctx).schema();
        match self.stub(schema).cell(slot - 1).as_stub() {
            Some(id) => id,
            None => unreachable!("schema cell without a symbol"),
        }
    }

    /// Case-insensitive field lookup; returns the 1-based slot.
    pub fn context_find(&self, ctx: StubId, symbol: StubId) -> Option<usize> {
        let schema = self.stub(ctx).schema();
        let len = self.stub(schema).used();
        for i in 0..len {
            if let Some(key) = self.stub(schema).cell(i).as_stub() {
                if self.symbols_alike(key, symbol) {
                    return Some(i + 1);
                }
            }
        }
        None
    }

    /// Walk from the more-derived schema toward its recorded ancestor,
    /// comparing identity at each step. A schema that is its own ancestor
    /// ends the chain.
    pub fn schema_compatible(&self, derived: StubId, base: StubId) -> bool {
        debug_assert_eq!(self.stub(derived).flavor(), Flavor::Schema);
        debug_assert_eq!(self.stub(base).flavor(), Flavor::Schema);
        let mut cursor = derived;
        loop {
            if cursor == base {
                return true;
            }
            let ancestor = self.stub(cursor).ancestor();
            if ancestor == cursor {
                return false;
            }
            cursor = ancestor;
        }
    }

    /// Is instance `a` structurally compatible with instance `b`?
    pub fn context_compatible(&self, a: StubId, b: StubId) -> bool {
        self.schema_compatible(self.stub(a).schema(), self.stub(b).schema())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_round_trip() {
        let mut heap = Heap::new();
        let name = heap.intern("name").unwrap();
        let age = heap.intern("age").unwrap();
        let ctx = heap.context_make(2).unwrap();
        let s1 = heap.context_append(ctx, name).unwrap();
        let s2 = heap.context_append(ctx, age).unwrap();
        assert_eq!((s1, s2), (1, 2));
        assert_eq!(heap.context_len(ctx), 2);
        heap.context_set(ctx, 1, Value::from_int(7));
        assert_eq!(heap.context_get(ctx, 1).as_int(), Some(7));
        assert_eq!(heap.context_get(ctx, 2), Value::none());
        assert_eq!(heap.context_key(ctx, 2), age);
        assert_eq!(heap.context_find(ctx, name), Some(1));
    }

    #[test]
    fn archetype_describes_itself() {
        let mut heap = Heap::new();
        let ctx = heap.context_make(0).unwrap();
        assert_eq!(heap.context_archetype(ctx).as_stub(), Some(ctx));
    }

    #[test]
    fn unexpanded_derivation_shares_schema_identity() {
        let mut heap = Heap::new();
        let sym = heap.intern("f").unwrap();
        let parent = heap.context_make(1).unwrap();
        heap.context_append(parent, sym).unwrap();
        let child = heap.context_derive(parent).unwrap();
        assert_eq!(heap.context_schema(child), heap.context_schema(parent));
        assert_eq!(heap.context_get(child, 1), heap.context_get(parent, 1));
    }

    #[test]
    fn append_through_shared_schema_diverges() {
        let mut heap = Heap::new();
        let f = heap.intern("f").unwrap();
        let g = heap.intern("g").unwrap();
        let parent = heap.context_make(1).unwrap();
        heap.context_append(parent, f).unwrap();
        let child = heap.context_derive(parent).unwrap();
        let sibling = heap.context_derive(parent).unwrap();

        heap.context_append(child, g).unwrap();
        assert_ne!(heap.context_schema(child), heap.context_schema(parent));
        assert_ne!(heap.context_schema(child), heap.context_schema(sibling));
        assert_eq!(heap.context_schema(sibling), heap.context_schema(parent));
        // Sibling never observes the new field.
        assert_eq!(heap.context_len(sibling), 1);
        assert_eq!(heap.context_len(child), 2);
    }

    #[test]
    fn ancestry_answers_compatibility() {
        let mut heap = Heap::new();
        let f = heap.intern("f").unwrap();
        let g = heap.intern("g").unwrap();
        let parent = heap.context_make(1).unwrap();
        heap.context_append(parent, f).unwrap();
        let child = heap.context_derive(parent).unwrap();
        heap.context_append(child, g).unwrap();

        assert!(heap.context_compatible(child, parent));
        assert!(!heap.context_compatible(parent, child));

        let stranger = heap.context_make(1).unwrap();
        heap.context_append(stranger, f).unwrap();
        assert!(!heap.context_compatible(child, stranger));
        assert!(!heap.context_compatible(stranger, parent));
    }

    #[test]
    fn schema_invariant_holds_after_appends() {
        let mut heap = Heap::new();
        let ctx = heap.context_make(0).unwrap();
        for name in ["a", "b", "c", "d", "e"] {
            let sym = heap.intern(name).unwrap();
            heap.context_append(ctx, sym).unwrap();
        }
        let schema = heap.context_schema(ctx);
        assert!(heap.stub(schema).used() <= heap.stub(ctx).used() - 1);
    }
}
