//! Hash maps built from two flexes: a pairlist of alternating key/value
//! cells and a prime-sized hashlist of u32 slots naming 1-based pair
//! numbers (0 marks an empty slot). Removal tombstones the key cell and
//! leaves the hashlist entry alone so probe chains stay unbroken; dead
//! pairs are reclaimed when growth forces a rehash.

use ember_obj_model::{StubId, Value};

use crate::error::{MemError, MemResult};
use crate::flags::{Flavor, StubFlags};
use crate::heap::Heap;

/// Hashlist sizes, primes just under powers of two.
const HASH_PRIMES: [usize; 16] = [
    7, 13, 31, 61, 127, 251, 509, 1021, 2039, 4093, 8191, 16381, 32749, 65521, 131071, 262139,
];

/// Smallest table prime keeping `pairs` entries under half load. The
/// probe's full-table coverage depends on `len` being prime, so the
/// fallback past the table searches for a real prime rather than
/// settling for odd.
fn hashlist_len_for(pairs: usize) -> usize {
    let want = pairs.saturating_mul(2).saturating_add(1);
    for &p in &HASH_PRIMES {
        if p >= want {
            return p;
        }
    }
    next_prime(want)
}

fn next_prime(mut n: usize) -> usize {
    if n % 2 == 0 {
        n += 1;
    }
    while !is_prime(n) {
        n += 2;
    }
    n
}

fn is_prime(n: usize) -> bool {
    if n < 4 {
        return n >= 2;
    }
    if n % 2 == 0 {
        return false;
    }
    let mut d = 3;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut h: u32 = 0x811c_9dc5;
    for &b in bytes {
        h ^= b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

impl Heap {
    fn key_hash(&self, key: Value) -> u32 {
        if let Some(id) = key.as_stub() {
            match self.stub(id).flavor() {
                Flavor::Symbol => return self.stub(id).symbol_hash(),
                Flavor::Text | Flavor::Binary => return fnv1a(self.stub(id).bytes()),
                _ => {}
            }
        }
        // Scalars and other stub identities hash by bit pattern.
        fnv1a(&key.bits().to_ne_bytes())
    }

    fn keys_equal(&self, a: Value, b: Value) -> bool {
        match (a.as_stub(), b.as_stub()) {
            (Some(sa), Some(sb)) => {
                let (fa, fb) = (self.stub(sa).flavor(), self.stub(sb).flavor());
                match (fa, fb) {
                    (Flavor::Symbol, Flavor::Symbol) => self.symbols_alike(sa, sb),
                    (Flavor::Text, Flavor::Text) | (Flavor::Binary, Flavor::Binary) => {
                        self.stub(sa).bytes() == self.stub(sb).bytes()
                    }
                    _ => sa == sb,
                }
            }
            (None, None) => a == b,
            _ => false,
        }
    }

    /// A fresh map sized for `capacity` pairs.
    pub fn map_make(&mut self, capacity: usize) -> MemResult<StubId> {
        let cells = capacity.checked_mul(2).ok_or(MemError::CapacityOverflow {
            units: capacity,
            wide: Flavor::PairList.wide(),
        })?;
        let pairs = self.make(Flavor::PairList, cells)?;
        let len = hashlist_len_for(capacity);
        let hashes = self.make(Flavor::HashList, len)?;
        self.expand_tail(hashes, len)?;
        self.stub_mut(pairs).set_hashlist(hashes);
        Ok(pairs)
    }

    /// Total pairs appended, tombstoned or not.
    fn pair_count(&self, map: StubId) -> usize {
        self.stub(map).used() / 2
    }

    /// Probe for `key`. Returns the hashlist slot the walk stopped at and,
    /// when a live pair matched, its 1-based pair number.
    fn probe(&self, map: StubId, key: Value) -> (usize, Option<usize>) {
        let hashes = self.stub(map).hashlist();
        let len = self.stub(hashes).used();
        let h = self.key_hash(key) as usize;
        let mut slot = h % len;
        let stride = (h >> 16) % (len - 1) + 1;
        loop {
            let n = self.stub(hashes).index_slot(slot) as usize;
            if n == 0 {
                return (slot, None);
            }
            let k = self.stub(map).cell((n - 1) * 2);
            if !k.is_tombstone() && self.keys_equal(k, key) {
                return (slot, Some(n));
            }
            slot = (slot + stride) % len;
        }
    }

    /// Insert or overwrite. A removed key that comes back gets a fresh
    /// pair; its old tombstoned pair waits for the next rehash.
    pub fn map_insert(&mut self, map: StubId, key: Value, value: Value) -> MemResult<()> {
        debug_assert_eq!(self.stub(map).flavor(), Flavor::PairList);
        debug_assert!(!key.is_tombstone(), "tombstone used as a map key");
        let (slot, found) = self.probe(map, key);
        if let Some(n) = found {
            self.stub_mut(map).set_cell((n - 1) * 2 + 1, value);
            return Ok(());
        }
        let hashes = self.stub(map).hashlist();
        let len = self.stub(hashes).used();
        if (self.pair_count(map) + 1) * 3 > len * 2 {
            self.rehash(map)?;
            return self.map_insert(map, key, value);
        }
        let at = self.stub(map).used();
        self.expand_tail(map, 2)?;
        let stub = self.stub_mut(map);
        stub.set_cell(at, key);
        stub.set_cell(at + 1, value);
        let n = at / 2 + 1;
        self.stub_mut(hashes).set_index_slot(slot, n as u32);
        Ok(())
    }

    pub fn map_find(&self, map: StubId, key: Value) -> Option<Value> {
        debug_assert_eq!(self.stub(map).flavor(), Flavor::PairList);
        let (_, found) = self.probe(map, key);
        found.map(|n| self.stub(map).cell((n - 1) * 2 + 1))
    }

    /// Tombstone the pair's key and return its value. The hashlist slot
    /// keeps its pair number so later probes walk past it.
    pub fn map_remove(&mut self, map: StubId, key: Value) -> Option<Value> {
        debug_assert_eq!(self.stub(map).flavor(), Flavor::PairList);
        let (_, found) = self.probe(map, key);
        let n = found?;
        let value = self.stub(map).cell((n - 1) * 2 + 1);
        self.stub_mut(map).set_cell((n - 1) * 2, Value::tombstone());
        Some(value)
    }

    /// Live pairs only.
    pub fn map_len(&self, map: StubId) -> usize {
        let stub = self.stub(map);
        (0..stub.used() / 2)
            .filter(|&n| !stub.cell(n * 2).is_tombstone())
            .count()
    }

    /// Visit live pairs in insertion order under an enumeration hold, so
    /// the body cannot restructure the map out from under the walk.
    pub fn map_each(
        &mut self,
        map: StubId,
        mut body: impl FnMut(&mut Heap, Value, Value) -> MemResult<()>,
    ) -> MemResult<()> {
        self.enumerate(map, |heap| {
            for n in 0..heap.pair_count(map) {
                let k = heap.stub(map).cell(n * 2);
                if k.is_tombstone() {
                    continue;
                }
                let v = heap.stub(map).cell(n * 2 + 1);
                body(heap, k, v)?;
            }
            Ok(())
        })
    }

    /// Compact tombstoned pairs out of the pairlist and re-probe every
    /// survivor into a larger hashlist.
    fn rehash(&mut self, map: StubId) -> MemResult<()> {
        let total = self.pair_count(map);
        // Compact in place; pair numbers change, the hashlist is rebuilt.
        let mut live = 0usize;
        for n in 0..total {
            let k = self.stub(map).cell(n * 2);
            if k.is_tombstone() {
                continue;
            }
            if live != n {
                let v = self.stub(map).cell(n * 2 + 1);
                let stub = self.stub_mut(map);
                stub.set_cell(live * 2, k);
                stub.set_cell(live * 2 + 1, v);
            }
            live += 1;
        }
        self.set_used(map, live * 2)?;

        let old = self.stub(map).hashlist();
        let len = hashlist_len_for(live.max(self.stub(old).used() / 2) + 1);
        let hashes = self.make(Flavor::HashList, len)?;
        self.expand_tail(hashes, len)?;
        if self.stub(map).flags().contains(StubFlags::MANAGED) {
            self.manage(hashes);
        }
        self.stub_mut(map).set_hashlist(hashes);
        self.free_stub(old);

        for n in 0..live {
            let key = self.stub(map).cell(n * 2);
            let (slot, found) = self.probe(map, key);
            debug_assert!(found.is_none(), "duplicate key during rehash");
            self.stub_mut(hashes).set_index_slot(slot, (n + 1) as u32);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absurd_capacity_is_a_typed_error() {
        let mut heap = Heap::new();
        let err = heap.map_make(usize::MAX).unwrap_err();
        assert!(matches!(err, MemError::CapacityOverflow { .. }));
        let err = heap.map_make(usize::MAX / 2 + 1).unwrap_err();
        assert!(matches!(err, MemError::CapacityOverflow { .. }));
    }

    #[test]
    fn oversize_tables_get_a_real_prime() {
        // Past the static table the length must still be prime, or the
        // probe stride can share a factor with it and orbit a subset of
        // the slots.
        for pairs in [1usize << 17, 1 << 18, (1 << 18) + 12345] {
            let len = hashlist_len_for(pairs);
            assert!(len >= pairs * 2 + 1);
            assert!(is_prime(len), "composite table length {}", len);
        }
        assert_eq!(next_prime(262145), 262147);
    }

    #[test]
    fn freeing_a_map_releases_both_stubs() {
        let mut heap = Heap::new();
        let m = heap.map_make(4).unwrap();
        heap.map_insert(m, Value::from_int(1), Value::from_int(2)).unwrap();
        assert_eq!(heap.leaked().len(), 2);
        heap.free_stub(m);
        assert!(heap.leaked().is_empty());
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn insert_find_overwrite() {
        let mut heap = Heap::new();
        let m = heap.map_make(4).unwrap();
        heap.map_insert(m, Value::from_int(1), Value::from_int(10)).unwrap();
        heap.map_insert(m, Value::from_int(2), Value::from_int(20)).unwrap();
        assert_eq!(heap.map_find(m, Value::from_int(1)), Some(Value::from_int(10)));
        heap.map_insert(m, Value::from_int(1), Value::from_int(11)).unwrap();
        assert_eq!(heap.map_find(m, Value::from_int(1)), Some(Value::from_int(11)));
        assert_eq!(heap.map_len(m), 2);
        assert_eq!(heap.map_find(m, Value::from_int(3)), None);
    }

    #[test]
    fn growth_past_load_factor_keeps_entries() {
        let mut heap = Heap::new();
        let m = heap.map_make(2).unwrap();
        for i in 0..200 {
            heap.map_insert(m, Value::from_int(i), Value::from_int(i * 2)).unwrap();
        }
        assert_eq!(heap.map_len(m), 200);
        for i in 0..200 {
            assert_eq!(heap.map_find(m, Value::from_int(i)), Some(Value::from_int(i * 2)));
        }
    }

    #[test]
    fn removed_key_neither_found_nor_yielded() {
        let mut heap = Heap::new();
        let m = heap.map_make(4).unwrap();
        for i in 0..8 {
            heap.map_insert(m, Value::from_int(i), Value::from_int(i)).unwrap();
        }
        assert_eq!(heap.map_remove(m, Value::from_int(3)), Some(Value::from_int(3)));
        assert_eq!(heap.map_find(m, Value::from_int(3)), None);
        assert_eq!(heap.map_remove(m, Value::from_int(3)), None);
        assert_eq!(heap.map_len(m), 7);

        let mut seen = Vec::new();
        heap.map_each(m, |_, k, _| {
            seen.push(k.as_int().unwrap());
            Ok(())
        })
        .unwrap();
        assert!(!seen.contains(&3));
        assert_eq!(seen.len(), 7);
    }

    #[test]
    fn removal_leaves_probe_chains_unbroken() {
        let mut heap = Heap::new();
        let m = heap.map_make(2).unwrap();
        // Enough keys that some share probe chains in the small table.
        for i in 0..6 {
            heap.map_insert(m, Value::from_int(i), Value::from_int(100 + i)).unwrap();
        }
        heap.map_remove(m, Value::from_int(0));
        heap.map_remove(m, Value::from_int(2));
        for i in [1i64, 3, 4, 5] {
            assert_eq!(heap.map_find(m, Value::from_int(i)), Some(Value::from_int(100 + i)));
        }
    }

    #[test]
    fn reinserting_removed_key_works() {
        let mut heap = Heap::new();
        let m = heap.map_make(4).unwrap();
        heap.map_insert(m, Value::from_int(9), Value::from_int(1)).unwrap();
        heap.map_remove(m, Value::from_int(9));
        heap.map_insert(m, Value::from_int(9), Value::from_int(2)).unwrap();
        assert_eq!(heap.map_find(m, Value::from_int(9)), Some(Value::from_int(2)));
        assert_eq!(heap.map_len(m), 1);
    }

    #[test]
    fn symbol_keys_match_case_insensitively() {
        let mut heap = Heap::new();
        let m = heap.map_make(4).unwrap();
        let lower = heap.intern("name").unwrap();
        let upper = heap.intern("NAME").unwrap();
        heap.map_insert(m, Value::from_stub(lower), Value::from_int(1)).unwrap();
        assert_eq!(heap.map_find(m, Value::from_stub(upper)), Some(Value::from_int(1)));
    }

    #[test]
    fn text_keys_compare_by_content() {
        let mut heap = Heap::new();
        let m = heap.map_make(4).unwrap();
        let a = heap.text_from_str("key").unwrap();
        let b = heap.text_from_str("key").unwrap();
        assert_ne!(a, b);
        heap.map_insert(m, Value::from_stub(a), Value::from_int(5)).unwrap();
        assert_eq!(heap.map_find(m, Value::from_stub(b)), Some(Value::from_int(5)));
    }

    #[test]
    fn rehash_compacts_tombstoned_pairs() {
        let mut heap = Heap::new();
        let m = heap.map_make(2).unwrap();
        for i in 0..4 {
            heap.map_insert(m, Value::from_int(i), Value::from_int(i)).unwrap();
        }
        for i in 0..4 {
            heap.map_remove(m, Value::from_int(i));
        }
        // Force growth; the dead pairs go away with the old table.
        for i in 10..30 {
            heap.map_insert(m, Value::from_int(i), Value::from_int(i)).unwrap();
        }
        assert_eq!(heap.stub(m).used() / 2, heap.map_len(m));
        assert_eq!(heap.map_len(m), 20);
    }

    #[test]
    fn held_map_rejects_insert_during_walk() {
        let mut heap = Heap::new();
        let m = heap.map_make(4).unwrap();
        heap.map_insert(m, Value::from_int(1), Value::from_int(1)).unwrap();
        let err = heap
            .map_each(m, |heap, _, _| heap.map_insert(m, Value::from_int(2), Value::none()))
            .unwrap_err();
        assert_eq!(err, crate::error::MemError::Held);
    }
}
