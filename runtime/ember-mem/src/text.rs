//! UTF-8 text buffers.
//!
//! A text flex tracks its codepoint count separately from its byte length;
//! the two are equal exactly when the content is pure ASCII, which makes
//! index-to-offset mapping O(1). Non-ASCII texts keep one position bookmark
//! (codepoint index paired with byte offset) so near-sequential access does
//! not rescan from the head every time.

use ember_obj_model::StubId;

use crate::error::MemResult;
use crate::flags::Flavor;
use crate::heap::Heap;

fn utf8_width(lead: u8) -> usize {
    match lead {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        _ => 4,
    }
}

/// Byte offset after advancing `n` codepoints from `off`.
fn advance(bytes: &[u8], mut off: usize, mut n: usize) -> usize {
    while n > 0 {
        off += utf8_width(bytes[off]);
        n -= 1;
    }
    off
}

/// Byte offset after retreating `n` codepoints from `off`.
fn retreat(bytes: &[u8], mut off: usize, mut n: usize) -> usize {
    while n > 0 {
        off -= 1;
        while bytes[off] & 0xC0 == 0x80 {
            off -= 1;
        }
        n -= 1;
    }
    off
}

impl Heap {
    pub fn text_make(&mut self, capacity: usize) -> MemResult<StubId> {
        let id = self.make(Flavor::Text, capacity)?;
        self.stub_mut(id).set_codepoints(0);
        self.terminate(id);
        Ok(id)
    }

    pub fn text_from_str(&mut self, s: &str) -> MemResult<StubId> {
        let id = self.text_make(s.len())?;
        self.text_append(id, s)?;
        Ok(id)
    }

    pub fn text_str(&self, id: StubId) -> &str {
        let stub = self.stub(id);
        debug_assert!(matches!(stub.flavor(), Flavor::Text | Flavor::Symbol));
        let bytes = stub.bytes();
        debug_assert!(std::str::from_utf8(bytes).is_ok(), "text content not UTF-8");
        // Content is UTF-8 by construction; skip re-validation on reads.
        unsafe { std::str::from_utf8_unchecked(bytes) }
    }

    pub fn text_len_bytes(&self, id: StubId) -> usize {
        self.stub(id).used()
    }

    /// Cached codepoint count; never recomputed on read.
    pub fn text_len_cp(&self, id: StubId) -> usize {
        self.stub(id).codepoints()
    }

    pub fn text_is_ascii(&self, id: StubId) -> bool {
        let stub = self.stub(id);
        stub.codepoints() == stub.used()
    }

    pub fn text_append(&mut self, id: StubId, s: &str) -> MemResult<()> {
        debug_assert_eq!(self.stub(id).flavor(), Flavor::Text);
        let at = self.stub(id).used();
        self.expand_tail(id, s.len())?;
        let stub = self.stub_mut(id);
        stub.bytes_mut()[at..].copy_from_slice(s.as_bytes());
        let cp = stub.codepoints() + s.chars().count();
        stub.set_codepoints(cp);
        self.finish_mutation(id);
        Ok(())
    }

    /// Map a codepoint index to its byte offset, using whichever anchor is
    /// nearest: the head, the tail, or the bookmark. Non-ASCII texts
    /// refresh the bookmark to the sought position.
    pub fn text_to_offset(&mut self, id: StubId, cp_index: usize) -> usize {
        let stub = self.stub(id);
        debug_assert_eq!(stub.flavor(), Flavor::Text);
        let cp_len = stub.codepoints();
        debug_assert!(cp_index <= cp_len, "codepoint {} past length {}", cp_index, cp_len);
        let byte_len = stub.used();
        if cp_len == byte_len {
            return cp_index;
        }

        let offset = {
            let bytes = stub.bytes();
            // Candidate anchors by codepoint distance.
            let mut anchor = (0usize, 0usize, cp_index);
            let from_tail = cp_len - cp_index;
            if from_tail < anchor.2 {
                anchor = (cp_len, byte_len, from_tail);
            }
            if let Some((bcp, boff)) = stub.bookmark() {
                let dist = (bcp as usize).abs_diff(cp_index);
                if dist < anchor.2 {
                    anchor = (bcp as usize, boff as usize, dist);
                }
            }
            let (acp, aoff, _) = anchor;
            if cp_index >= acp {
                advance(bytes, aoff, cp_index - acp)
            } else {
                retreat(bytes, aoff, acp - cp_index)
            }
        };
        self.stub_mut(id).set_bookmark(cp_index as u32, offset as u32);
        offset
    }

    pub fn text_char_at(&mut self, id: StubId, cp_index: usize) -> char {
        let offset = self.text_to_offset(id, cp_index);
        let s = self.text_str(id);
        match s[offset..].chars().next() {
            Some(c) => c,
            None => unreachable!("offset {} past text end", offset),
        }
    }

    /// Replace one codepoint. Equal encoded widths overwrite in place;
    /// unequal widths shift the tail with an overlap-safe move and adjust
    /// the bookmark only if it sits after the edit point.
    pub fn text_replace_char(&mut self, id: StubId, cp_index: usize, ch: char) -> MemResult<()> {
        let offset = self.text_to_offset(id, cp_index);
        let old_w = utf8_width(self.stub(id).bytes()[offset]);
        let new_w = ch.len_utf8();

        if new_w == old_w {
            let stub = self.stub_mut(id);
            ch.encode_utf8(&mut stub.bytes_mut()[offset..offset + new_w]);
            return Ok(());
        }

        self.check_unheld(id)?;
        let used = self.stub(id).used();
        if new_w > old_w {
            self.ensure_rest(id, used + (new_w - old_w))?;
        }
        let stub = self.stub_mut(id);
        let new_used = used + new_w - old_w;
        if new_w > old_w {
            stub.set_used_raw(new_used);
            stub.data_mut().copy_within(offset + old_w..used, offset + new_w);
        } else {
            stub.data_mut().copy_within(offset + old_w..used, offset + new_w);
            stub.set_used_raw(new_used);
        }
        ch.encode_utf8(&mut stub.bytes_mut()[offset..offset + new_w]);
        if let Some((bcp, boff)) = stub.bookmark() {
            if bcp as usize > cp_index {
                let adjusted = (boff as i64 + new_w as i64 - old_w as i64) as u32;
                stub.set_bookmark(bcp, adjusted);
            }
        }
        self.finish_mutation(id);
        Ok(())
    }
}
