//! Open-table cache.
//!
//! Keeps a bounded number of SST readers open, so file handles and decoded
//! index blocks are reused across lookups. Entries are `Arc`s: evicting a
//! table drops the cache's handle, but readers and iterators still holding
//! the `Arc` keep the underlying file open until they finish.

use crate::cache::lru::LruCache;
use crate::comparator::Comparator;
use crate::error::Result;
use crate::files;
use crate::sstable::{Block, TableReader};
use std::path::PathBuf;
use std::sync::Arc;

/// Cache of open [`TableReader`]s keyed by table id.
///
/// Each entry weighs 1, so the capacity is an entry count; the shared block
/// cache is handed to every reader opened through here.
pub struct TableCache {
    dir: PathBuf,
    cache: LruCache<Arc<TableReader>>,
    block_cache: Arc<LruCache<Arc<Block>>>,
    comparator: Arc<dyn Comparator>,
}

impl TableCache {
    /// Creates a table cache over `dir` holding at most `capacity` open
    /// readers.
    pub fn new(
        dir: PathBuf,
        capacity: usize,
        block_cache: Arc<LruCache<Arc<Block>>>,
        comparator: Arc<dyn Comparator>,
    ) -> Self {
        Self { dir, cache: LruCache::new(capacity as u64), block_cache, comparator }
    }

    /// Returns the reader for table `id`, opening the file on a miss.
    pub fn get(&self, id: u64) -> Result<Arc<TableReader>> {
        self.cache.get(id, || {
            let path = self.dir.join(files::sst_filename(id));
            let reader = TableReader::open(
                &path,
                id,
                Arc::clone(&self.block_cache),
                Arc::clone(&self.comparator),
            )?;
            log::debug!("opened table {} ({} bytes)", id, reader.size());
            Ok((Arc::new(reader), 1))
        })
    }

    /// Drops the cached reader for a retired table, closing its file once
    /// the last outstanding handle is gone.
    pub fn evict(&self, id: u64) {
        self.cache.remove(id);
    }

    /// Number of readers currently held open.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns `true` if no readers are held.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
