use bitflags::bitflags;

/// Immutable discriminant fixed at stub creation. Everything a stub is --
/// which link/misc payloads it carries, what its cells mean, its element
/// width -- keys off this one byte; there is no per-instance type pointer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Flavor {
    /// Ordered buffer of tagged value cells.
    Sequence,
    /// Raw byte buffer, NUL-terminated.
    Binary,
    /// UTF-8 byte buffer with cached codepoint count and one bookmark.
    Text,
    /// Immutable interned spelling, linked into a synonym ring.
    Symbol,
    /// Ordered symbol list describing a context's slots.
    Schema,
    /// Value instance; slot 0 is the self-describing archetype cell.
    Context,
    /// Sparse key/value cells backing a hash map.
    PairList,
    /// Open-addressed index companion to a pairlist.
    HashList,
    /// One-cell externally visible value, linked to its owning frame.
    RootHandle,
    /// One-cell per-binding-context variable attached to a symbol.
    Patch,
}

impl Flavor {
    /// Element width in bytes for this flavor's content.
    pub fn wide(self) -> usize {
        match self {
            Flavor::Binary | Flavor::Text | Flavor::Symbol => 1,
            Flavor::HashList => 4,
            Flavor::Sequence
            | Flavor::Schema
            | Flavor::Context
            | Flavor::PairList
            | Flavor::RootHandle
            | Flavor::Patch => 8,
        }
    }

    /// Byte-wide flexes always reserve one trailing unit for a NUL.
    pub fn byte_wide(self) -> bool {
        self.wide() == 1
    }

    /// Whether content cells are tagged values the collector must visit.
    pub fn holds_cells(self) -> bool {
        self.wide() == 8
    }
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StubFlags: u16 {
        /// Owned by the collector; eligible for sweep when unmarked.
        const MANAGED = 1 << 0;
        /// Reached during the current mark phase.
        const MARKED = 1 << 1;
        /// Structural mutation lock held during enumeration.
        const HELD = 1 << 2;
        /// GC root (root handles).
        const ROOT = 1 << 3;
        /// Sequence carries source file/line in its relation slots.
        const HAS_PROVENANCE = 1 << 4;
        /// Formatting hint: sequence source ended with a newline.
        const NEWLINE_TAIL = 1 << 5;
        /// Schema is referenced by more than one context; mutate via copy.
        const SHARED = 1 << 6;
        /// Buffer may never grow or shrink (root handles).
        const FIXED_SIZE = 1 << 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_per_flavor() {
        assert_eq!(Flavor::Binary.wide(), 1);
        assert_eq!(Flavor::Text.wide(), 1);
        assert_eq!(Flavor::HashList.wide(), 4);
        assert_eq!(Flavor::Sequence.wide(), 8);
        assert_eq!(Flavor::Context.wide(), 8);
    }

    #[test]
    fn flag_independence() {
        let mut f = StubFlags::MANAGED | StubFlags::MARKED;
        f.remove(StubFlags::MARKED);
        assert!(f.contains(StubFlags::MANAGED));
        assert!(!f.contains(StubFlags::MARKED));
    }
}
