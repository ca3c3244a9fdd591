//! Heap and flex layer for Ember.
//!
//! Every variable-size structure in the runtime sits on a flex: a stub
//! header in the arena plus content that lives inline in the header while
//! it fits and moves to a pooled buffer when it grows. Subclass modules
//! (sequences, binaries, texts, symbols, contexts, maps, root handles)
//! layer their semantics on the same stub shape, so one collector walk
//! and one capacity model serve them all.
//!
//! Handles are generational: freeing a stub bumps its slot's generation,
//! and every stale handle thereafter fails the same cheap resolve check
//! instead of dangling.

mod binary;
mod context;
mod error;
mod flags;
mod flex;
mod heap;
mod map;
mod pool;
mod root;
mod seq;
mod stub;
mod symbol;
mod text;

pub use ember_obj_model::{StubId, Value};

pub use crate::error::{MemError, MemResult};
pub use crate::flags::{Flavor, StubFlags};
pub use crate::flex::BIAS_MAX;
pub use crate::heap::{Heap, HeapStats};
pub use crate::stub::{Link, Misc, RootNeighbor, Stub, INLINE_CAP};
