//! Write-ahead journal.
//!
//! Every mutation is appended to the journal before it touches the memtable,
//! so a sequential replay of the log reconstructs the memtable contents.
//! This module covers the append side and the record codec; replay itself is
//! the concern of a recovery layer built on [`decode_record`].
//!
//! Record shapes:
//!
//! ```text
//! | Put (1 byte)    | varint key len | varint value len | key | value |
//! | Delete (1 byte) | varint key len | key |
//! ```

use crate::error::{Error, Result};
use crate::varint::{put_uvarint, uvarint};
use bytes::{BufMut, Bytes, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Operation tag of a journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordOp {
    /// Insert or overwrite a key.
    Put = 0x00,
    /// Remove a key.
    Delete = 0x01,
}

impl RecordOp {
    fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(RecordOp::Put),
            0x01 => Some(RecordOp::Delete),
            _ => None,
        }
    }

    /// Number of byte-string arguments the record shape carries.
    fn arity(self) -> usize {
        match self {
            RecordOp::Put => 2,
            RecordOp::Delete => 1,
        }
    }
}

/// Encodes a single journal record.
///
/// # Panics
///
/// Panics if `parts` does not match the arity of `op` (two parts for Put,
/// one for Delete). A malformed record is a caller bug, not an I/O
/// condition.
pub fn encode_record(op: RecordOp, parts: &[&[u8]]) -> Bytes {
    assert_eq!(
        parts.len(),
        op.arity(),
        "journal record arity mismatch: {:?} takes {} parts, got {}",
        op,
        op.arity(),
        parts.len()
    );

    let payload: usize = parts.iter().map(|p| p.len()).sum();
    let mut buf = BytesMut::with_capacity(1 + 2 * 10 + payload);

    buf.put_u8(op as u8);
    for part in parts {
        put_uvarint(&mut buf, part.len() as u64);
    }
    for part in parts {
        buf.put_slice(part);
    }
    buf.freeze()
}

/// Decodes a single journal record into `(op, key, value)`.
///
/// The value is `None` for Delete records. This is the replay-side inverse
/// of [`encode_record`].
pub fn decode_record(data: &[u8]) -> Result<(RecordOp, Bytes, Option<Bytes>)> {
    let tag = *data.first().ok_or_else(|| Error::corruption("empty journal record"))?;
    let op = RecordOp::from_u8(tag)
        .ok_or_else(|| Error::corruption(format!("unknown journal record tag {:#04x}", tag)))?;

    let mut pos = 1;
    let mut lens = [0u64; 2];
    for len in lens.iter_mut().take(op.arity()) {
        let (v, n) = uvarint(&data[pos..])
            .ok_or_else(|| Error::corruption("truncated journal record length"))?;
        *len = v;
        pos += n;
    }

    let key_len = lens[0] as usize;
    if data.len() - pos < key_len {
        return Err(Error::corruption("truncated journal record key"));
    }
    let key = Bytes::copy_from_slice(&data[pos..pos + key_len]);
    pos += key_len;

    let value = match op {
        RecordOp::Put => {
            let val_len = lens[1] as usize;
            if data.len() - pos < val_len {
                return Err(Error::corruption("truncated journal record value"));
            }
            Some(Bytes::copy_from_slice(&data[pos..pos + val_len]))
        }
        RecordOp::Delete => None,
    };

    Ok((op, key, value))
}

/// Appends records to the current journal file.
///
/// The writer is rotated onto a fresh log file whenever the memtable
/// rotates, via [`JournalWriter::reset`].
pub struct JournalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JournalWriter {
    /// Opens (creating if needed) the journal file at `path` for appending.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, writer: BufWriter::new(file) })
    }

    /// Appends one record.
    ///
    /// # Panics
    ///
    /// Panics if `parts` does not match the arity of `op`; see
    /// [`encode_record`].
    pub fn write_record(&mut self, op: RecordOp, parts: &[&[u8]]) -> Result<()> {
        let record = encode_record(op, parts);
        self.writer.write_all(&record)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Rotates the writer onto a new log file, closing the current one.
    pub fn reset<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.writer.flush()?;
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        log::debug!("journal rotated: {:?} -> {:?}", self.path, path);
        self.path = path;
        self.writer = BufWriter::new(file);
        Ok(())
    }

    /// Flushes and closes the journal.
    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Path of the current log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
