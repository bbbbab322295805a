//! Unsigned varint codec shared by block entries and journal records.
//!
//! Standard LEB128: little-endian 7-bit groups, MSB set on every byte except
//! the last.

use bytes::BufMut;

/// Maximum encoded length of a u64 varint.
pub(crate) const MAX_VARINT_LEN: usize = 10;

/// Appends `v` to `buf` in varint encoding.
pub(crate) fn put_uvarint(buf: &mut impl BufMut, mut v: u64) {
    while v >= 0x80 {
        buf.put_u8((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
    buf.put_u8(v as u8);
}

/// Decodes a varint from the front of `data`.
///
/// Returns the value and the number of bytes consumed, or `None` if the
/// buffer ends mid-varint or the value overflows u64.
pub(crate) fn uvarint(data: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in data.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return None;
        }
        if byte < 0x80 {
            if i == MAX_VARINT_LEN - 1 && byte > 1 {
                return None;
            }
            return Some((value | (u64::from(byte) << shift), i + 1));
        }
        value |= u64::from(byte & 0x7f) << shift;
        shift += 7;
    }
    None
}
