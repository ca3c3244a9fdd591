//! Core value representation for Ember.
//! Uses NaN-boxing to represent primitives and heap handles in 64 bits.
//!
//! The memory layer hands out generation-checked [`StubId`] handles rather
//! than raw pointers; a stale generation is how a freed-but-still-referenced
//! buffer is recognized. The 48-bit payload of a handle value packs the slot
//! index and the generation, with generation 0 reserved as never-valid so an
//! all-zero payload can never decode as a live handle.

use std::num::NonZeroU16;

#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct Value(u64);

const QNAN: u64 = 0x7ff8_0000_0000_0000;
const TAG_INT: u64 = 0x0001_0000_0000_0000;
const TAG_BOOL: u64 = 0x0002_0000_0000_0000;
const TAG_NONE: u64 = 0x0003_0000_0000_0000;
const TAG_HANDLE: u64 = 0x0004_0000_0000_0000;
const TAG_CHAR: u64 = 0x0005_0000_0000_0000;
const TAG_TOMBSTONE: u64 = 0x0006_0000_0000_0000;
const TAG_MASK: u64 = 0x0007_0000_0000_0000;
const PAYLOAD_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;
const INT_SIGN_BIT: u64 = 1 << 46;
const INT_WIDTH: u64 = 47;
const INT_MASK: u64 = (1u64 << INT_WIDTH) - 1;

const GEN_SHIFT: u64 = 32;

/// Generation-checked handle to a stub slot in the heap arena.
///
/// Generation 0 never names a live slot, so `NonZeroU16` encodes that rule
/// in the type and keeps `Option<StubId>` pointer-sized in the payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StubId {
    index: u32,
    generation: NonZeroU16,
}

impl StubId {
    pub fn new(index: u32, generation: NonZeroU16) -> Self {
        Self { index, generation }
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> NonZeroU16 {
        self.generation
    }

    /// Pack into the 48-bit NaN-box payload: generation in the high 16
    /// bits, slot index in the low 32.
    pub fn pack(self) -> u64 {
        ((self.generation.get() as u64) << GEN_SHIFT) | self.index as u64
    }

    /// Decode a 48-bit payload. A zero generation field means the payload
    /// was never a handle.
    pub fn unpack(payload: u64) -> Option<Self> {
        debug_assert_eq!(payload & !PAYLOAD_MASK, 0, "payload exceeds 48 bits");
        let generation = NonZeroU16::new((payload >> GEN_SHIFT) as u16)?;
        Some(Self {
            index: payload as u32,
            generation,
        })
    }
}

/// Successor generation for a recycled slot, skipping the reserved 0.
pub fn next_gen(current: u16) -> NonZeroU16 {
    let next = current.wrapping_add(1);
    NonZeroU16::new(next).unwrap_or(NonZeroU16::MIN)
}

impl Value {
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn from_float(f: f64) -> Self {
        Self(f.to_bits())
    }

    pub fn from_int(i: i64) -> Self {
        // 47-bit two's complement; plenty for lengths and indexes.
        let val = (i as u64) & INT_MASK;
        Self(QNAN | TAG_INT | val)
    }

    pub fn from_bool(b: bool) -> Self {
        let val = if b { 1 } else { 0 };
        Self(QNAN | TAG_BOOL | val)
    }

    pub fn none() -> Self {
        Self(QNAN | TAG_NONE)
    }

    pub fn from_char(c: char) -> Self {
        Self(QNAN | TAG_CHAR | c as u64)
    }

    /// The reserved map-deletion marker. Not a legitimate stored value:
    /// readers must never yield it and debug builds trap on direct access.
    pub fn tombstone() -> Self {
        Self(QNAN | TAG_TOMBSTONE)
    }

    pub fn from_stub(id: StubId) -> Self {
        Self(QNAN | TAG_HANDLE | id.pack())
    }

    pub fn is_float(&self) -> bool {
        (self.0 & QNAN) != QNAN
    }

    pub fn as_float(&self) -> Option<f64> {
        if self.is_float() {
            Some(f64::from_bits(self.0))
        } else {
            None
        }
    }

    pub fn is_int(&self) -> bool {
        (self.0 & (QNAN | TAG_MASK)) == (QNAN | TAG_INT)
    }

    pub fn is_bool(&self) -> bool {
        (self.0 & (QNAN | TAG_MASK)) == (QNAN | TAG_BOOL)
    }

    pub fn as_bool(&self) -> Option<bool> {
        if self.is_bool() {
            Some((self.0 & 0x1) == 1)
        } else {
            None
        }
    }

    pub fn is_none(&self) -> bool {
        (self.0 & (QNAN | TAG_MASK)) == (QNAN | TAG_NONE)
    }

    pub fn is_char(&self) -> bool {
        (self.0 & (QNAN | TAG_MASK)) == (QNAN | TAG_CHAR)
    }

    pub fn as_char(&self) -> Option<char> {
        if self.is_char() {
            char::from_u32((self.0 & PAYLOAD_MASK) as u32)
        } else {
            None
        }
    }

    pub fn is_tombstone(&self) -> bool {
        (self.0 & (QNAN | TAG_MASK)) == (QNAN | TAG_TOMBSTONE)
    }

    pub fn is_stub(&self) -> bool {
        (self.0 & (QNAN | TAG_MASK)) == (QNAN | TAG_HANDLE)
    }

    pub fn as_stub(&self) -> Option<StubId> {
        if self.is_stub() {
            StubId::unpack(self.0 & PAYLOAD_MASK)
        } else {
            None
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        if self.is_int() {
            let val = self.0 & INT_MASK;
            if (val & INT_SIGN_BIT) != 0 {
                Some((val as i64) - ((1u64 << INT_WIDTH) as i64))
            } else {
                Some(val as i64)
            }
        } else {
            None
        }
    }

    pub fn as_int_unchecked(&self) -> i64 {
        let val = self.0 & INT_MASK;
        if (val & INT_SIGN_BIT) != 0 {
            (val as i64) - ((1u64 << INT_WIDTH) as i64)
        } else {
            val as i64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_float() {
        let obj = Value::from_float(std::f64::consts::PI);
        assert!(obj.is_float());
        assert_eq!(obj.as_float(), Some(std::f64::consts::PI));
    }

    #[test]
    fn test_int() {
        let obj = Value::from_int(42);
        assert!(obj.is_int());
        assert_eq!(obj.as_int(), Some(42));
    }

    #[test]
    fn test_negative_int() {
        let obj = Value::from_int(-1);
        assert!(obj.is_int());
        assert_eq!(obj.as_int(), Some(-1));
    }

    #[test]
    fn test_char() {
        let obj = Value::from_char('é');
        assert!(obj.is_char());
        assert_eq!(obj.as_char(), Some('é'));
    }

    #[test]
    fn test_tombstone_is_nothing_else() {
        let t = Value::tombstone();
        assert!(t.is_tombstone());
        assert!(!t.is_none());
        assert!(!t.is_stub());
        assert!(!t.is_int());
        assert!(t.as_stub().is_none());
    }

    #[test]
    fn test_handle_roundtrip() {
        let id = StubId::new(12345, NonZeroU16::new(7).unwrap());
        let obj = Value::from_stub(id);
        assert!(obj.is_stub());
        assert_eq!(obj.as_stub(), Some(id));
    }

    #[test]
    fn test_zero_gen_payload_never_decodes() {
        assert_eq!(StubId::unpack(0), None);
        assert_eq!(StubId::unpack(0xFFFF_FFFF), None);
    }

    #[test]
    fn test_next_gen_skips_zero() {
        assert_eq!(next_gen(u16::MAX).get(), 1);
        assert_eq!(next_gen(1).get(), 2);
    }

    proptest! {
        #[test]
        fn int_roundtrip(i in -(1i64 << 46)..(1i64 << 46)) {
            prop_assert_eq!(Value::from_int(i).as_int(), Some(i));
        }

        #[test]
        fn handle_roundtrip(index in any::<u32>(), g in 1u16..) {
            let id = StubId::new(index, NonZeroU16::new(g).unwrap());
            prop_assert_eq!(Value::from_stub(id).as_stub(), Some(id));
        }

        #[test]
        fn floats_never_collide_with_tags(f in any::<f64>().prop_filter("NaN", |f| !f.is_nan())) {
            let v = Value::from_float(f);
            prop_assert!(v.is_float());
            prop_assert!(!v.is_stub());
            prop_assert!(!v.is_tombstone());
        }
    }
}
