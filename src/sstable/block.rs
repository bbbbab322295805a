//! Block format implementation.
//!
//! A block is the atomic unit of SST I/O. Entries are length-prefixed and
//! stored in ascending key order, followed by a fixed-width offset array and
//! an entry count:
//!
//! ```text
//! | entry 1 | ... | entry N | offset 1 (u32 BE) | ... | offset N | N (u32 BE) |
//! ```
//!
//! Data entries are `varint(key_len) varint(val_len) key val`. Index blocks
//! reuse the same trailer but their entries are
//! `varint(min_key_len) varint(block_offset) varint(block_len) min_key`.

use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::varint::{put_uvarint, uvarint};
use bytes::{BufMut, Bytes, BytesMut};
use std::cmp::Ordering;
use std::sync::Arc;

/// BlockBuilder accumulates entries in ascending key order and encodes the
/// trailer on finish.
pub struct BlockBuilder {
    data: BytesMut,
    offsets: Vec<u32>,
}

impl BlockBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self { data: BytesMut::new(), offsets: Vec::new() }
    }

    /// Appends a data entry. Keys must arrive in ascending order; the
    /// builder records positions, it does not re-sort.
    pub fn append(&mut self, key: &[u8], value: &[u8]) {
        self.offsets.push(self.data.len() as u32);
        put_uvarint(&mut self.data, key.len() as u64);
        put_uvarint(&mut self.data, value.len() as u64);
        self.data.put_slice(key);
        self.data.put_slice(value);
    }

    /// Appends an index entry describing one data block.
    pub fn append_index(&mut self, min_key: &[u8], block_offset: u64, block_len: u64) {
        self.offsets.push(self.data.len() as u32);
        put_uvarint(&mut self.data, min_key.len() as u64);
        put_uvarint(&mut self.data, block_offset);
        put_uvarint(&mut self.data, block_len);
        self.data.put_slice(min_key);
    }

    /// Encoded size the block will have after [`BlockBuilder::finish`].
    pub fn estimate_size(&self) -> usize {
        self.data.len() + 4 * self.offsets.len() + 4
    }

    /// Number of entries appended so far.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns `true` if no entries have been appended.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Appends the offset array and entry count, returning the encoded
    /// block.
    pub fn finish(mut self) -> Bytes {
        for offset in &self.offsets {
            self.data.put_u32(*offset);
        }
        self.data.put_u32(self.offsets.len() as u32);
        self.data.freeze()
    }
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded block: the entry payload plus its offset array.
pub struct Block {
    data: Bytes,
    offsets: Vec<u32>,
}

impl Block {
    /// Decodes an encoded block, validating the trailer.
    pub fn decode(data: Bytes) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::corruption("block too small for trailer"));
        }

        let count = u32::from_be_bytes(data[data.len() - 4..].try_into().unwrap()) as usize;
        let trailer = 4 + 4 * count;
        if data.len() < trailer {
            return Err(Error::corruption(format!(
                "block trailer claims {} entries but holds {} bytes",
                count,
                data.len()
            )));
        }

        let offsets_start = data.len() - trailer;
        let mut offsets = Vec::with_capacity(count);
        for i in 0..count {
            let at = offsets_start + 4 * i;
            let offset = u32::from_be_bytes(data[at..at + 4].try_into().unwrap());
            if offset as usize > offsets_start {
                return Err(Error::corruption("block entry offset out of range"));
            }
            offsets.push(offset);
        }

        Ok(Self { data: data.slice(..offsets_start), offsets })
    }

    /// Number of entries in the block.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns `true` if the block holds no entries.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Decodes the i-th data entry as `(key, value)`.
    pub fn entry(&self, i: usize) -> Option<(&[u8], &[u8])> {
        let mut pos = *self.offsets.get(i)? as usize;
        let (key_len, n) = uvarint(&self.data[pos..])?;
        pos += n;
        let (val_len, n) = uvarint(&self.data[pos..])?;
        pos += n;

        let key_end = pos.checked_add(key_len as usize)?;
        let val_end = key_end.checked_add(val_len as usize)?;
        if val_end > self.data.len() {
            return None;
        }
        Some((&self.data[pos..key_end], &self.data[key_end..val_end]))
    }

    /// Decodes the i-th index entry as `(min_key, block_offset, block_len)`.
    pub fn index_entry(&self, i: usize) -> Option<(&[u8], u64, u64)> {
        let mut pos = *self.offsets.get(i)? as usize;
        let (key_len, n) = uvarint(&self.data[pos..])?;
        pos += n;
        let (block_offset, n) = uvarint(&self.data[pos..])?;
        pos += n;
        let (block_len, n) = uvarint(&self.data[pos..])?;
        pos += n;

        let key_end = pos.checked_add(key_len as usize)?;
        if key_end > self.data.len() {
            return None;
        }
        Some((&self.data[pos..key_end], block_offset, block_len))
    }

    /// Binary-searches for the smallest entry index whose key is `>= target`.
    ///
    /// Returns `None` when every key is strictly less than the target (or
    /// the block is empty).
    pub fn seek(&self, cmp: &dyn Comparator, target: &[u8]) -> Option<usize> {
        if self.offsets.is_empty() {
            return None;
        }

        let mut low = 0;
        let mut high = self.offsets.len() - 1;
        while low < high {
            let mid = (low + high) >> 1;
            let (key, _) = self.entry(mid)?;
            if cmp.compare(key, target) == Ordering::Less {
                low = mid + 1;
            } else {
                high = mid;
            }
        }

        let (key, _) = self.entry(low)?;
        if cmp.compare(key, target) == Ordering::Less {
            None
        } else {
            Some(low)
        }
    }

    /// Binary-searches an index block for the greatest entry whose min-key
    /// is `<= target`, i.e. the block that could contain the target.
    ///
    /// Returns `None` when the target precedes every min-key.
    pub fn seek_block(&self, cmp: &dyn Comparator, target: &[u8]) -> Option<usize> {
        if self.offsets.is_empty() {
            return None;
        }

        let mut low = 0;
        let mut high = self.offsets.len() - 1;
        while low < high {
            // Upper bisect; plain (low + high) / 2 never terminates here.
            let mid = (low + high + 1) >> 1;
            let (min_key, _, _) = self.index_entry(mid)?;
            if cmp.compare(min_key, target) != Ordering::Greater {
                low = mid;
            } else {
                high = mid - 1;
            }
        }

        let (min_key, _, _) = self.index_entry(low)?;
        if cmp.compare(min_key, target) == Ordering::Greater {
            None
        } else {
            Some(low)
        }
    }

    /// Point lookup within the block. Returns the value only on an exact
    /// key match.
    pub fn get(&self, cmp: &dyn Comparator, key: &[u8]) -> Option<Bytes> {
        let idx = self.seek(cmp, key)?;
        let (entry_key, value) = self.entry(idx)?;
        if cmp.compare(entry_key, key) == Ordering::Equal {
            Some(Bytes::copy_from_slice(value))
        } else {
            None
        }
    }
}

/// Iterator over the data entries of one block.
pub struct BlockIter {
    block: Arc<Block>,
    cmp: Arc<dyn Comparator>,
    cur: usize,
    valid: bool,
}

impl BlockIter {
    /// Creates an iterator positioned before the first entry; call
    /// `first`/`seek` to position it.
    pub fn new(block: Arc<Block>, cmp: Arc<dyn Comparator>) -> Self {
        Self { block, cmp, cur: 0, valid: false }
    }
}

impl crate::iterator::Iter for BlockIter {
    fn first(&mut self) {
        self.cur = 0;
        self.valid = !self.block.is_empty();
    }

    fn next(&mut self) -> bool {
        if !self.valid {
            return false;
        }
        self.cur += 1;
        self.valid = self.cur < self.block.len();
        self.valid
    }

    fn seek(&mut self, target: &[u8]) -> bool {
        match self.block.seek(self.cmp.as_ref(), target) {
            Some(idx) => {
                self.cur = idx;
                self.valid = true;
            }
            None => self.valid = false,
        }
        self.valid
    }

    fn valid(&self) -> bool {
        self.valid
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid, "iterator not valid");
        self.block.entry(self.cur).map(|(k, _)| k).unwrap_or_default()
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid, "iterator not valid");
        self.block.entry(self.cur).map(|(_, v)| v).unwrap_or_default()
    }
}
