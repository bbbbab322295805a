//! SST writer.
//!
//! Streams sorted entries into data blocks, then seals the file with the
//! index block and footer.

use crate::error::Result;
use crate::sstable::block::BlockBuilder;
use crate::sstable::footer::{Footer, FOOTER_SIZE};
use bytes::Bytes;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// TableWriter builds one SST file from a stream of ascending keys.
///
/// Entries emerge in the order appended; each data block's min-key is the
/// first key appended to it, and the index block lists blocks in file order.
pub struct TableWriter {
    writer: BufWriter<File>,
    block: BlockBuilder,
    index: BlockBuilder,
    /// First key of the block currently being built. Owned copy, captured
    /// at the first append after a block boundary.
    first_key: Option<Bytes>,
    offset: u64,
    block_size: usize,
    num_entries: u64,
}

impl TableWriter {
    /// Creates the table file at `path` and returns a writer over it.
    pub fn create<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            block: BlockBuilder::new(),
            index: BlockBuilder::new(),
            first_key: None,
            offset: 0,
            block_size,
            num_entries: 0,
        })
    }

    /// Appends one entry. Keys must arrive in ascending order.
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.first_key.is_none() {
            self.first_key = Some(Bytes::copy_from_slice(key));
        }
        self.block.append(key, value);
        self.num_entries += 1;

        if self.block.estimate_size() >= self.block_size {
            self.finish_block()?;
        }
        Ok(())
    }

    /// Seals the current data block: writes it out, records it in the index,
    /// and resets block state.
    fn finish_block(&mut self) -> Result<()> {
        let encoded = std::mem::take(&mut self.block).finish();
        self.writer.write_all(&encoded)?;

        let first_key = self.first_key.take().expect("finish_block without entries");
        self.index.append_index(&first_key, self.offset, encoded.len() as u64);
        self.offset += encoded.len() as u64;
        Ok(())
    }

    /// Finishes the table: trailing data block, index block, footer. Returns
    /// the total bytes written and syncs the file.
    pub fn flush(mut self) -> Result<u64> {
        if self.first_key.is_some() {
            self.finish_block()?;
        }

        let index_offset = self.offset;
        let encoded_index = std::mem::take(&mut self.index).finish();
        self.writer.write_all(&encoded_index)?;

        let footer = Footer::new(index_offset as u32, encoded_index.len() as u32);
        self.writer.write_all(&footer.encode())?;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        Ok(index_offset + encoded_index.len() as u64 + FOOTER_SIZE as u64)
    }

    /// Bytes the file would occupy if sealed now; drives the compaction
    /// builder's rollover decision.
    pub fn estimate_size(&self) -> u64 {
        self.offset + self.block.estimate_size() as u64
    }

    /// Number of entries appended.
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }
}
