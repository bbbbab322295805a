//! SST reader.
//!
//! Opens a table file, resolves point lookups through the index block and
//! the shared block cache, and exposes the two-level (index -> block)
//! iterator over the whole table.

use crate::cache::{LruCache, NamespacedCache};
use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::iterator::Iter;
use crate::sstable::block::{Block, BlockIter};
use crate::sstable::footer::{Footer, FOOTER_SIZE};
use bytes::Bytes;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// Read access to one immutable table file.
///
/// Construction reads the footer and the index block; data blocks are
/// fetched lazily through the shared block cache, namespaced by the table
/// id so offsets from different files cannot collide.
pub struct TableReader {
    file: File,
    id: u64,
    size: u64,
    index: Arc<Block>,
    cache: NamespacedCache<Arc<Block>>,
    comparator: Arc<dyn Comparator>,
}

impl TableReader {
    /// Opens the table file at `path`.
    pub fn open<P: AsRef<Path>>(
        path: P,
        id: u64,
        block_cache: Arc<LruCache<Arc<Block>>>,
        comparator: Arc<dyn Comparator>,
    ) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        if size < FOOTER_SIZE as u64 {
            return Err(Error::corruption("file too small to hold a table footer"));
        }

        let mut footer_buf = [0u8; FOOTER_SIZE];
        file.read_exact_at(&mut footer_buf, size - FOOTER_SIZE as u64)?;
        let footer = Footer::decode(&footer_buf)?;

        if u64::from(footer.index_offset) + u64::from(footer.index_len) + FOOTER_SIZE as u64
            != size
        {
            return Err(Error::corruption(format!(
                "table {:?} footer does not account for file length {}",
                path.as_ref(),
                size
            )));
        }

        let mut index_buf = vec![0u8; footer.index_len as usize];
        file.read_exact_at(&mut index_buf, u64::from(footer.index_offset))?;
        let index = Arc::new(Block::decode(Bytes::from(index_buf))?);

        Ok(Self {
            file,
            id,
            size,
            index,
            cache: NamespacedCache::new(block_cache, id),
            comparator,
        })
    }

    /// Point lookup. Returns `None` when the table does not contain the key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let Some(idx) = self.index.seek_block(self.comparator.as_ref(), key) else {
            return Ok(None);
        };
        let (_, offset, len) = self
            .index
            .index_entry(idx)
            .ok_or_else(|| Error::corruption("undecodable index entry"))?;

        let block = self.read_block(offset, len)?;
        Ok(block.get(self.comparator.as_ref(), key))
    }

    /// Loads one data block, consulting the cache first. On a miss the block
    /// is read, decoded, and inserted with its byte length as weight.
    fn read_block(&self, offset: u64, len: u64) -> Result<Arc<Block>> {
        self.cache.get(offset, || {
            let mut buf = vec![0u8; len as usize];
            self.file.read_exact_at(&mut buf, offset)?;
            let block = Arc::new(Block::decode(Bytes::from(buf))?);
            Ok((block, len))
        })
    }

    /// Returns the two-level iterator over every entry in the table.
    pub fn iter(self: &Arc<Self>) -> TableIterator {
        TableIterator::new(Arc::clone(self))
    }

    /// The table's id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The table's file size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of data blocks.
    pub fn num_blocks(&self) -> usize {
        self.index.len()
    }
}

/// Two-level iterator over one table: the outer position walks the index
/// block, the inner iterator walks the data block the outer points at.
pub struct TableIterator {
    reader: Arc<TableReader>,
    index_pos: usize,
    block: Option<BlockIter>,
}

impl TableIterator {
    fn new(reader: Arc<TableReader>) -> Self {
        Self { reader, index_pos: 0, block: None }
    }

    /// Materializes the block the outer position points at. Load failures
    /// invalidate the iterator.
    fn load_block(&mut self) -> bool {
        self.block = None;
        let Some((_, offset, len)) = self.reader.index.index_entry(self.index_pos) else {
            return false;
        };
        match self.reader.read_block(offset, len) {
            Ok(block) => {
                self.block =
                    Some(BlockIter::new(block, Arc::clone(&self.reader.comparator)));
                true
            }
            Err(e) => {
                log::warn!(
                    "table {} iterator failed to load block at {}: {}",
                    self.reader.id,
                    offset,
                    e
                );
                false
            }
        }
    }
}

impl Iter for TableIterator {
    fn first(&mut self) {
        self.index_pos = 0;
        if self.load_block() {
            if let Some(block) = &mut self.block {
                block.first();
            }
        }
    }

    fn next(&mut self) -> bool {
        let Some(block) = &mut self.block else {
            return false;
        };
        if block.next() {
            return true;
        }

        self.index_pos += 1;
        if self.load_block() {
            if let Some(block) = &mut self.block {
                block.first();
                return block.valid();
            }
        }
        false
    }

    fn seek(&mut self, target: &[u8]) -> bool {
        match self.reader.index.seek_block(self.reader.comparator.as_ref(), target) {
            None => {
                // Target precedes every block: the first entry of the table
                // is the first entry >= target.
                self.first();
            }
            Some(idx) => {
                self.index_pos = idx;
                if !self.load_block() {
                    return false;
                }
                let in_block = self.block.as_mut().map(|b| b.seek(target)).unwrap_or(false);
                if !in_block {
                    // Target falls past the candidate block's last key; the
                    // next block's first entry is the answer.
                    self.index_pos += 1;
                    if self.load_block() {
                        if let Some(block) = &mut self.block {
                            block.first();
                        }
                    }
                }
            }
        }
        self.valid()
    }

    fn valid(&self) -> bool {
        self.block.as_ref().is_some_and(|b| b.valid())
    }

    fn key(&self) -> &[u8] {
        self.block.as_ref().expect("iterator not valid").key()
    }

    fn value(&self) -> &[u8] {
        self.block.as_ref().expect("iterator not valid").value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::sstable::builder::TableWriter;
    use tempfile::TempDir;

    fn comparator() -> Arc<dyn Comparator> {
        Arc::new(BytewiseComparator)
    }

    fn block_cache() -> Arc<LruCache<Arc<Block>>> {
        Arc::new(LruCache::new(8 * 1024 * 1024))
    }

    fn build_table(
        dir: &TempDir,
        id: u64,
        block_size: usize,
        entries: &[(Vec<u8>, Vec<u8>)],
    ) -> Arc<TableReader> {
        let path = dir.path().join(format!("sst-{}.ldb", id));
        let mut writer = TableWriter::create(&path, block_size).unwrap();
        for (key, value) in entries {
            writer.append(key, value).unwrap();
        }
        writer.flush().unwrap();
        Arc::new(TableReader::open(&path, id, block_cache(), comparator()).unwrap())
    }

    fn kv_range(n: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..n)
            .map(|i| {
                (format!("key{:08}", i).into_bytes(), format!("value{:08}", i).into_bytes())
            })
            .collect()
    }

    #[test]
    fn test_reader_get() {
        let dir = TempDir::new().unwrap();
        let entries = kv_range(1000);
        let reader = build_table(&dir, 1, 1024, &entries);

        assert!(reader.num_blocks() > 1);
        assert_eq!(reader.get(b"key00000000").unwrap().as_deref(), Some(&b"value00000000"[..]));
        assert_eq!(reader.get(b"key00000500").unwrap().as_deref(), Some(&b"value00000500"[..]));
        assert_eq!(reader.get(b"key00000999").unwrap().as_deref(), Some(&b"value00000999"[..]));

        // Before the first key, between keys, after the last key.
        assert_eq!(reader.get(b"kex").unwrap(), None);
        assert_eq!(reader.get(b"key00000500x").unwrap(), None);
        assert_eq!(reader.get(b"key99999999").unwrap(), None);
    }

    #[test]
    fn test_reader_cache_hit_avoids_refetch() {
        let dir = TempDir::new().unwrap();
        let entries = kv_range(10);
        let reader = build_table(&dir, 1, 4096, &entries);

        // Delete the file out from under the reader: cached lookups must
        // still succeed for the already-loaded block.
        reader.get(b"key00000003").unwrap();
        std::fs::remove_file(dir.path().join("sst-1.ldb")).unwrap();
        assert_eq!(
            reader.get(b"key00000004").unwrap().as_deref(),
            Some(&b"value00000004"[..])
        );
    }

    #[test]
    fn test_reader_rejects_truncated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.ldb");
        std::fs::write(&path, [0u8; 4]).unwrap();
        assert!(TableReader::open(&path, 1, block_cache(), comparator()).is_err());

        // A footer whose lengths disagree with the file length.
        std::fs::write(&path, [0u8, 0, 0, 99, 0, 0, 0, 99]).unwrap();
        assert!(TableReader::open(&path, 1, block_cache(), comparator()).is_err());
    }

    #[test]
    fn test_table_iterator_full_scan() {
        let dir = TempDir::new().unwrap();
        let entries = kv_range(500);
        let reader = build_table(&dir, 1, 512, &entries);

        let mut iter = reader.iter();
        iter.first();

        let mut seen = Vec::new();
        while iter.valid() {
            seen.push((iter.key().to_vec(), iter.value().to_vec()));
            iter.next();
        }
        assert_eq!(seen, entries);
    }

    #[test]
    fn test_table_iterator_seek() {
        let dir = TempDir::new().unwrap();
        let entries = kv_range(100);
        let reader = build_table(&dir, 1, 256, &entries);

        let mut iter = reader.iter();

        // Exact key.
        assert!(iter.seek(b"key00000042"));
        assert_eq!(iter.key(), b"key00000042");

        // Between keys lands on the next one.
        assert!(iter.seek(b"key00000042x"));
        assert_eq!(iter.key(), b"key00000043");

        // Before the first key lands on the first.
        assert!(iter.seek(b"aaa"));
        assert_eq!(iter.key(), b"key00000000");

        // Past the last key invalidates.
        assert!(!iter.seek(b"zzz"));
        assert!(!iter.valid());
    }

    #[test]
    fn test_table_iterator_crosses_block_boundaries() {
        let dir = TempDir::new().unwrap();
        let entries = kv_range(200);
        let reader = build_table(&dir, 1, 128, &entries);
        assert!(reader.num_blocks() > 2);

        let mut iter = reader.iter();
        iter.first();
        let mut count = 0;
        while iter.valid() {
            count += 1;
            iter.next();
        }
        assert_eq!(count, 200);
    }
}
