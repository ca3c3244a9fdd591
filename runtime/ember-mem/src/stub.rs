//! The stub record: header, typed relation slots, and the inline-or-heap
//! content region every flex is built on.

use ember_obj_model::{StubId, Value};

use crate::flags::{Flavor, StubFlags};

/// Spare content bytes in the stub header. When `capacity * width` fits
/// here, no heap buffer is allocated at all: 3 value cells, 6 index slots,
/// or 23 text bytes plus the NUL.
pub const INLINE_CAP: usize = 24;

/// Byte written one cell past the occupied region of value flexes in debug
/// builds; reads of a poisoned cell indicate an out-of-bounds access.
pub(crate) const POISON_BYTE: u8 = 0xDD;

/// A root handle's upstream neighbor: either the previous handle in the
/// chain or the owning frame itself at the list boundary.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RootNeighbor {
    Frame(u32),
    Handle(StubId),
}

/// First relation slot, typed per flavor. A flat word disambiguated by
/// flags would also work; the enum makes each flavor's reading of the
/// slot explicit and lets the collector trace it by matching.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Link {
    None,
    /// Text: cached codepoint-index / byte-offset pair for fast seeks.
    Bookmark { cp_index: u32, byte_off: u32 },
    /// Symbol: next spelling in the circular synonym ring (self if alone).
    Synonym(StubId),
    /// Schema: the narrower schema this one was grown from (self if root).
    Ancestor(StubId),
    /// Context: the schema describing this instance's slots.
    Schema(StubId),
    /// PairList: the open-addressed hash index companion.
    HashList(StubId),
    /// Sequence: symbol naming the originating source file.
    FileOrigin(StubId),
    /// RootHandle: upstream neighbor in the frame's handle chain.
    RootPrev(RootNeighbor),
    /// Patch: next patch in the symbol's circular patch ring.
    NextPatch(StubId),
}

/// Second relation slot, typed per flavor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Misc {
    None,
    /// Text: cached codepoint count (equals byte length iff pure ASCII).
    Codepoints(u32),
    /// Symbol: spelling hash plus the head of the patch ring.
    SymbolMeta { hash: u32, patch: Option<StubId> },
    /// Sequence: originating source line.
    Line(u32),
    /// RootHandle: downstream neighbor (none at the tail).
    RootNext(Option<StubId>),
    /// Patch: the binding context this patch belongs to.
    PatchContext(StubId),
}

/// Content region: either a small buffer inline in the header or a heap
/// allocation with deque-style accounting. `bias` is unused head slack in
/// units; `used` counts occupied units from the bias point.
#[derive(Debug)]
pub enum Content {
    Inline { used: u8, buf: [u8; INLINE_CAP] },
    Dynamic { data: Vec<u8>, bias: u32, used: u32 },
}

/// The fixed-size header record that is the identity of every
/// dynamically-sized runtime object.
#[derive(Debug)]
pub struct Stub {
    flavor: Flavor,
    wide: u8,
    pub(crate) flags: StubFlags,
    pub(crate) link: Link,
    pub(crate) misc: Misc,
    pub(crate) content: Content,
}

impl Stub {
    pub(crate) fn new_inline(flavor: Flavor) -> Self {
        Self {
            flavor,
            wide: flavor.wide() as u8,
            flags: StubFlags::empty(),
            link: Link::None,
            misc: Misc::None,
            content: Content::Inline {
                used: 0,
                buf: [0; INLINE_CAP],
            },
        }
    }

    pub(crate) fn new_dynamic(flavor: Flavor, data: Vec<u8>) -> Self {
        Self {
            flavor,
            wide: flavor.wide() as u8,
            flags: StubFlags::empty(),
            link: Link::None,
            misc: Misc::None,
            content: Content::Dynamic {
                data,
                bias: 0,
                used: 0,
            },
        }
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    pub fn wide(&self) -> usize {
        self.wide as usize
    }

    pub fn flags(&self) -> StubFlags {
        self.flags
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.content, Content::Inline { .. })
    }

    /// Occupied units.
    pub fn used(&self) -> usize {
        match &self.content {
            Content::Inline { used, .. } => *used as usize,
            Content::Dynamic { used, .. } => *used as usize,
        }
    }

    /// Unused head slack in units.
    pub fn bias(&self) -> usize {
        match &self.content {
            Content::Inline { .. } => 0,
            Content::Dynamic { bias, .. } => *bias as usize,
        }
    }

    /// Capacity in units from the bias point to the end of the allocation.
    pub fn rest(&self) -> usize {
        match &self.content {
            Content::Inline { .. } => INLINE_CAP / self.wide(),
            Content::Dynamic { data, bias, .. } => data.len() / self.wide() - *bias as usize,
        }
    }

    /// Total allocated units: `bias + rest`.
    pub fn total_units(&self) -> usize {
        self.bias() + self.rest()
    }

    pub(crate) fn set_used_raw(&mut self, n: usize) {
        debug_assert!(n <= self.rest(), "used {} exceeds rest {}", n, self.rest());
        match &mut self.content {
            Content::Inline { used, .. } => *used = n as u8,
            Content::Dynamic { used, .. } => *used = n as u32,
        }
    }

    /// All addressable bytes from the bias point (`rest * wide`).
    pub(crate) fn data(&self) -> &[u8] {
        match &self.content {
            Content::Inline { buf, .. } => {
                let w = self.wide as usize;
                &buf[..(INLINE_CAP / w) * w]
            }
            Content::Dynamic { data, bias, .. } => &data[*bias as usize * self.wide as usize..],
        }
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        let w = self.wide as usize;
        match &mut self.content {
            Content::Inline { buf, .. } => &mut buf[..(INLINE_CAP / w) * w],
            Content::Dynamic { data, bias, .. } => &mut data[*bias as usize * w..],
        }
    }

    /// The occupied region (`used * wide` bytes).
    pub fn bytes(&self) -> &[u8] {
        let len = self.used() * self.wide();
        &self.data()[..len]
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.used() * self.wide();
        &mut self.data_mut()[..len]
    }

    /// Read the tagged value in cell `index`. Valid only below `used`.
    pub fn cell(&self, index: usize) -> Value {
        debug_assert_eq!(self.wide(), 8, "cell access on a non-cell flex");
        debug_assert!(index < self.used(), "cell {} past used {}", index, self.used());
        let at = index * 8;
        let raw = u64::from_ne_bytes(self.data()[at..at + 8].try_into().unwrap());
        Value::from_bits(raw)
    }

    pub fn set_cell(&mut self, index: usize, v: Value) {
        debug_assert_eq!(self.wide(), 8, "cell access on a non-cell flex");
        debug_assert!(index < self.used(), "cell {} past used {}", index, self.used());
        let at = index * 8;
        self.data_mut()[at..at + 8].copy_from_slice(&v.bits().to_ne_bytes());
    }

    /// Read an index slot of a hashlist.
    pub fn index_slot(&self, index: usize) -> u32 {
        debug_assert_eq!(self.wide(), 4, "index-slot access on a non-index flex");
        debug_assert!(index < self.used());
        let at = index * 4;
        u32::from_ne_bytes(self.data()[at..at + 4].try_into().unwrap())
    }

    pub fn set_index_slot(&mut self, index: usize, v: u32) {
        debug_assert_eq!(self.wide(), 4, "index-slot access on a non-index flex");
        debug_assert!(index < self.used());
        let at = index * 4;
        self.data_mut()[at..at + 4].copy_from_slice(&v.to_ne_bytes());
    }

    /// Write the debug poison pattern one cell past the occupied region.
    /// Release builds skip terminator upkeep entirely for cell flexes.
    pub(crate) fn poison_tail(&mut self) {
        if cfg!(debug_assertions) && self.wide() == 8 && self.used() < self.rest() {
            let at = self.used() * 8;
            self.data_mut()[at..at + 8].copy_from_slice(&[POISON_BYTE; 8]);
        }
    }

    #[cfg(debug_assertions)]
    pub(crate) fn tail_poisoned(&self) -> bool {
        if self.wide() != 8 || self.used() >= self.rest() {
            return true;
        }
        let at = self.used() * 8;
        self.data()[at..at + 8] == [POISON_BYTE; 8]
    }

    // -- typed relation-slot accessors ------------------------------------
    //
    // Each accessor asserts the caller's assumed flavor in debug builds so
    // a misread slot fails loudly at the access site rather than silently
    // misinterpreting another flavor's payload.

    pub fn bookmark(&self) -> Option<(u32, u32)> {
        debug_assert_eq!(self.flavor, Flavor::Text, "bookmark on {:?}", self.flavor);
        match self.link {
            Link::Bookmark { cp_index, byte_off } => Some((cp_index, byte_off)),
            _ => None,
        }
    }

    pub(crate) fn set_bookmark(&mut self, cp_index: u32, byte_off: u32) {
        debug_assert_eq!(self.flavor, Flavor::Text);
        self.link = Link::Bookmark { cp_index, byte_off };
    }

    pub(crate) fn clear_bookmark(&mut self) {
        debug_assert_eq!(self.flavor, Flavor::Text);
        self.link = Link::None;
    }

    pub fn codepoints(&self) -> usize {
        debug_assert_eq!(self.flavor, Flavor::Text, "codepoints on {:?}", self.flavor);
        match self.misc {
            Misc::Codepoints(n) => n as usize,
            _ => 0,
        }
    }

    pub(crate) fn set_codepoints(&mut self, n: usize) {
        debug_assert_eq!(self.flavor, Flavor::Text);
        self.misc = Misc::Codepoints(n as u32);
    }

    pub fn synonym(&self) -> StubId {
        debug_assert_eq!(self.flavor, Flavor::Symbol, "synonym on {:?}", self.flavor);
        match self.link {
            Link::Synonym(id) => id,
            _ => unreachable!("symbol stub without a synonym link"),
        }
    }

    pub(crate) fn set_synonym(&mut self, id: StubId) {
        debug_assert_eq!(self.flavor, Flavor::Symbol);
        self.link = Link::Synonym(id);
    }

    pub fn symbol_hash(&self) -> u32 {
        debug_assert_eq!(self.flavor, Flavor::Symbol);
        match self.misc {
            Misc::SymbolMeta { hash, .. } => hash,
            _ => unreachable!("symbol stub without meta"),
        }
    }

    pub fn patch_head(&self) -> Option<StubId> {
        debug_assert_eq!(self.flavor, Flavor::Symbol);
        match self.misc {
            Misc::SymbolMeta { patch, .. } => patch,
            _ => unreachable!("symbol stub without meta"),
        }
    }

    pub(crate) fn set_patch_head(&mut self, head: Option<StubId>) {
        debug_assert_eq!(self.flavor, Flavor::Symbol);
        if let Misc::SymbolMeta { patch, .. } = &mut self.misc {
            *patch = head;
        } else {
            unreachable!("symbol stub without meta");
        }
    }

    pub fn ancestor(&self) -> StubId {
        debug_assert_eq!(self.flavor, Flavor::Schema, "ancestor on {:?}", self.flavor);
        match self.link {
            Link::Ancestor(id) => id,
            _ => unreachable!("schema stub without an ancestor link"),
        }
    }

    pub(crate) fn set_ancestor(&mut self, id: StubId) {
        debug_assert_eq!(self.flavor, Flavor::Schema);
        self.link = Link::Ancestor(id);
    }

    pub fn schema(&self) -> StubId {
        debug_assert_eq!(self.flavor, Flavor::Context, "schema on {:?}", self.flavor);
        match self.link {
            Link::Schema(id) => id,
            _ => unreachable!("context stub without a schema link"),
        }
    }

    pub(crate) fn set_schema(&mut self, id: StubId) {
        debug_assert_eq!(self.flavor, Flavor::Context);
        self.link = Link::Schema(id);
    }

    pub fn hashlist(&self) -> StubId {
        debug_assert_eq!(self.flavor, Flavor::PairList, "hashlist on {:?}", self.flavor);
        match self.link {
            Link::HashList(id) => id,
            _ => unreachable!("pairlist stub without a hashlist link"),
        }
    }

    pub(crate) fn set_hashlist(&mut self, id: StubId) {
        debug_assert_eq!(self.flavor, Flavor::PairList);
        self.link = Link::HashList(id);
    }

    pub fn file_origin(&self) -> Option<StubId> {
        debug_assert_eq!(self.flavor, Flavor::Sequence);
        match self.link {
            Link::FileOrigin(id) => Some(id),
            _ => None,
        }
    }

    pub fn line(&self) -> Option<u32> {
        debug_assert_eq!(self.flavor, Flavor::Sequence);
        match self.misc {
            Misc::Line(n) => Some(n),
            _ => None,
        }
    }

    pub(crate) fn set_origin(&mut self, file: StubId, line: u32) {
        debug_assert_eq!(self.flavor, Flavor::Sequence);
        self.link = Link::FileOrigin(file);
        self.misc = Misc::Line(line);
        self.flags.insert(StubFlags::HAS_PROVENANCE);
    }

    pub fn root_prev(&self) -> RootNeighbor {
        debug_assert_eq!(self.flavor, Flavor::RootHandle);
        match self.link {
            Link::RootPrev(n) => n,
            _ => unreachable!("root handle without a prev link"),
        }
    }

    pub(crate) fn set_root_prev(&mut self, n: RootNeighbor) {
        debug_assert_eq!(self.flavor, Flavor::RootHandle);
        self.link = Link::RootPrev(n);
    }

    pub fn root_next(&self) -> Option<StubId> {
        debug_assert_eq!(self.flavor, Flavor::RootHandle);
        match self.misc {
            Misc::RootNext(n) => n,
            _ => unreachable!("root handle without a next link"),
        }
    }

    pub(crate) fn set_root_next(&mut self, n: Option<StubId>) {
        debug_assert_eq!(self.flavor, Flavor::RootHandle);
        self.misc = Misc::RootNext(n);
    }

    pub fn next_patch(&self) -> StubId {
        debug_assert_eq!(self.flavor, Flavor::Patch);
        match self.link {
            Link::NextPatch(id) => id,
            _ => unreachable!("patch stub without a next link"),
        }
    }

    pub(crate) fn set_next_patch(&mut self, id: StubId) {
        debug_assert_eq!(self.flavor, Flavor::Patch);
        self.link = Link::NextPatch(id);
    }

    pub fn patch_context(&self) -> StubId {
        debug_assert_eq!(self.flavor, Flavor::Patch);
        match self.misc {
            Misc::PatchContext(id) => id,
            _ => unreachable!("patch stub without a context"),
        }
    }

    pub(crate) fn set_patch_context(&mut self, id: StubId) {
        debug_assert_eq!(self.flavor, Flavor::Patch);
        self.misc = Misc::PatchContext(id);
    }
}
