//! # SiltDB - An LSM-Tree Storage Engine
//!
//! SiltDB is a persistent, ordered key-value store organized as a
//! log-structured merge-tree. Keys and values are opaque byte strings; the
//! store answers point lookups, accepts blind writes, and streams ordered
//! iteration over the live key space.
//!
//! ## Architecture
//!
//! - **Journal**: every write is appended to a log file before it is applied
//! - **MemTable**: skip-list table absorbing recent writes in memory
//! - **SST**: immutable sorted table files, organized into levels
//! - **Catalog**: the per-level table sets, compaction planning included
//! - **Compactor**: one background task flushing memtables and merging levels
//! - **Caches**: byte-budgeted block cache, entry-budgeted open-table cache
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use siltdb::{Options, DB};
//!
//! # fn main() -> Result<(), siltdb::Error> {
//! let db = DB::open("./data", Options::default())?;
//!
//! db.put(b"key1", b"value1");
//! db.put(b"key2", b"value2");
//!
//! if let Some(value) = db.get(b"key1") {
//!     println!("Found: {:?}", value);
//! }
//!
//! use siltdb::Iter;
//! let mut iter = db.iter();
//! while iter.valid() {
//!     println!("{:?} => {:?}", iter.key(), iter.value());
//!     iter.next();
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cache;
pub mod catalog;
pub mod comparator;
pub mod config;
pub mod error;
pub mod iterator;
pub mod journal;
pub mod memtable;
pub mod sstable;

mod compaction;
mod files;
mod varint;

pub use comparator::{BytewiseComparator, Comparator};
pub use config::Options;
pub use error::{Error, Result};
pub use iterator::Iter;

use bytes::Bytes;
use cache::{LruCache, TableCache};
use catalog::{CompactRange, TableCatalog, TableDesc};
use compaction::Compactor;
use crossbeam::channel::{bounded, Receiver, Sender};
use iterator::MergingIterator;
use journal::{JournalWriter, RecordOp};
use memtable::MemTable;
use parking_lot::{Mutex, RwLock};
use sstable::TableWriter;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

/// The main database handle.
///
/// Routes reads and writes across the live memtable, the frozen memtable,
/// and the on-disk table catalog, and owns the background compaction task.
///
/// # Thread Safety
///
/// `DB` can be shared across threads behind an `Arc<DB>`; all operations
/// take `&self`.
pub struct DB {
    core: Arc<DbCore>,
}

struct MemState {
    live: Arc<MemTable>,
    /// Former live table awaiting flush; read-only by convention.
    frozen: Option<Arc<MemTable>>,
}

pub(crate) struct DbCore {
    pub(crate) options: Options,
    pub(crate) path: PathBuf,
    pub(crate) catalog: Arc<TableCatalog>,

    mem: RwLock<MemState>,
    journal: Mutex<JournalWriter>,
    /// Serializes memtable flushes between the compactor and `DB::flush`.
    flush_lock: Mutex<()>,

    mem_tx: Sender<()>,
    pub(crate) mem_rx: Receiver<()>,
    pub(crate) level_rx: Receiver<CompactRange>,
    pause_tx: Sender<()>,
    pub(crate) pause_rx: Receiver<()>,
    shutdown_tx: Sender<()>,
    pub(crate) shutdown_rx: Receiver<()>,
}

impl DB {
    /// Opens a database in the directory at `path`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are invalid, the directory cannot be
    /// created or scanned, or the journal file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<DB> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        // Never hand out an id a file in the directory already uses.
        let mut first_id = 1;
        for entry in std::fs::read_dir(&path)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some((_, id)) = files::parse_filename(name) {
                    first_id = first_id.max(id + 1);
                }
            }
        }

        let (mem_tx, mem_rx) = bounded(3);
        let (level_tx, level_rx) = bounded(5);
        let (pause_tx, pause_rx) = bounded(0);
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let block_cache = Arc::new(LruCache::new(options.block_cache_capacity as u64));
        let table_cache = Arc::new(TableCache::new(
            path.clone(),
            options.file_cache_capacity,
            block_cache,
            Arc::clone(&options.comparator),
        ));
        let catalog = Arc::new(TableCatalog::new(
            &options,
            path.clone(),
            table_cache,
            level_tx,
            first_id,
        ));

        let mem_id = catalog.allocate_id();
        let journal = JournalWriter::create(path.join(files::log_filename(mem_id)))?;
        let live = Arc::new(MemTable::new(mem_id, Arc::clone(&options.comparator)));

        let core = Arc::new(DbCore {
            options,
            path,
            catalog,
            mem: RwLock::new(MemState { live, frozen: None }),
            journal: Mutex::new(journal),
            flush_lock: Mutex::new(()),
            mem_tx,
            mem_rx,
            level_rx,
            pause_tx,
            pause_rx,
            shutdown_tx,
            shutdown_rx,
        });

        let compactor = Compactor { db: Arc::clone(&core) };
        std::thread::Builder::new()
            .name("siltdb-compactor".into())
            .spawn(move || compactor.run())?;

        log::info!("opened database at {:?}", core.path);
        Ok(DB { core })
    }

    /// Inserts a key-value pair. An existing key is overwritten.
    ///
    /// May block briefly when the memtable rotates and compaction is
    /// behind; that back-pressure is deliberate.
    ///
    /// # Panics
    ///
    /// Panics if the journal append fails: a write that cannot be made
    /// durable must not be acknowledged.
    pub fn put(&self, key: &[u8], value: &[u8]) {
        self.core.put(key, value);
    }

    /// Retrieves the value for a key, or `None` if absent.
    ///
    /// Lookups never fail: an unreadable table is logged and treated as not
    /// containing the key.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.core.get(key)
    }

    /// Returns an iterator over the live key space, positioned at the first
    /// key. Entries merge across all layers; the newest value for each key
    /// wins.
    pub fn iter(&self) -> DbIterator {
        self.core.iter()
    }

    /// Synchronously flushes in-memory data to level 0: any frozen table
    /// first, then the live one (rotated through the frozen slot).
    pub fn flush(&self) -> Result<()> {
        self.core.mem_compaction()?;
        if self.core.rotate_mem(None) {
            self.core.mem_compaction()?;
        }
        Ok(())
    }

    /// Suspends the background compactor until the database is dropped.
    ///
    /// Meant for tests and maintenance windows that need the level layout
    /// to hold still; flushes via [`DB::flush`] keep working.
    pub fn pause_compaction(&self) {
        let _ = self.core.pause_tx.send(());
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        let _ = self.core.shutdown_tx.try_send(());
    }
}

impl DbCore {
    fn put(&self, key: &[u8], value: &[u8]) {
        {
            let mut journal = self.journal.lock();
            if let Err(e) = journal.write_record(RecordOp::Put, &[key, value]) {
                panic!("journal write failed: {}", e);
            }
        }

        // Pin while still under the read lock, so rotation cannot slip in
        // between the lookup and the pin.
        let mem = {
            let state = self.mem.read();
            state.live.pin();
            Arc::clone(&state.live)
        };
        mem.put(key, value);
        mem.unpin();

        if mem.size_estimate() >= self.options.memtable_size && self.rotate_mem(Some(&mem)) {
            // Sent after the lock is released; blocking on a full channel
            // is the write-path back-pressure.
            let _ = self.mem_tx.send(());
        }
    }

    /// Moves the live memtable into the frozen slot and installs a fresh
    /// one with its own journal file.
    ///
    /// With `observed`, rotation is skipped unless the live table is still
    /// the one the caller saw overflow (another writer may have rotated
    /// first). Returns whether a rotation happened.
    fn rotate_mem(&self, observed: Option<&Arc<MemTable>>) -> bool {
        let mut state = self.mem.write();
        if let Some(observed) = observed {
            if !Arc::ptr_eq(&state.live, observed) {
                return false;
            }
        }
        if state.frozen.is_some() {
            return false;
        }
        if observed.is_none() && state.live.is_empty() {
            return false;
        }

        let id = self.catalog.allocate_id();
        {
            let mut journal = self.journal.lock();
            if let Err(e) = journal.reset(self.path.join(files::log_filename(id))) {
                panic!("journal rotation failed: {}", e);
            }
        }

        let fresh = Arc::new(MemTable::new(id, Arc::clone(&self.options.comparator)));
        let old = std::mem::replace(&mut state.live, fresh);
        log::info!("memtable {} frozen at {} bytes", old.id(), old.size_estimate());
        state.frozen = Some(old);
        true
    }

    fn get(&self, key: &[u8]) -> Option<Bytes> {
        let (live, frozen) = {
            let state = self.mem.read();
            (Arc::clone(&state.live), state.frozen.clone())
        };

        if let Some(value) = live.get(key) {
            return Some(value);
        }
        if let Some(frozen) = frozen {
            if let Some(value) = frozen.get(key) {
                return Some(value);
            }
        }
        match self.catalog.get(key) {
            Ok(value) => value,
            Err(e) => {
                log::error!("table read failed during get: {}", e);
                None
            }
        }
    }

    /// Flushes the frozen memtable (if any) into a level-0 table.
    ///
    /// Ordering contract: the new descriptor is visible in the catalog
    /// before the frozen slot clears, so a reader always finds the data in
    /// at least one of the two.
    pub(crate) fn mem_compaction(&self) -> Result<()> {
        let _guard = self.flush_lock.lock();

        let Some(frozen) = self.mem.read().frozen.clone() else {
            return Ok(());
        };

        // Writers that pinned the table before it froze may still be
        // mutating it; wait them out.
        frozen.wait_idle();

        if let Some(desc) = self.flush_memtable(&frozen)? {
            self.catalog.add_table(0, desc);
        }
        self.mem.write().frozen = None;

        // The flushed table's journal is superseded by the SST.
        let log_path = self.path.join(files::log_filename(frozen.id()));
        if let Err(e) = std::fs::remove_file(&log_path) {
            log::warn!("failed to remove flushed journal {:?}: {}", log_path, e);
        }
        Ok(())
    }

    /// Streams one memtable into a single level-0 table file.
    fn flush_memtable(&self, table: &MemTable) -> Result<Option<Arc<TableDesc>>> {
        let mut iter = table.iter();
        iter.first();
        if !iter.valid() {
            return Ok(None);
        }

        let id = table.id();
        let mut writer =
            TableWriter::create(self.path.join(files::sst_filename(id)), self.options.block_size)?;

        let min_key = Bytes::copy_from_slice(iter.key());
        let mut max_key = Bytes::copy_from_slice(iter.key());
        while iter.valid() {
            writer.append(iter.key(), iter.value())?;
            max_key = Bytes::copy_from_slice(iter.key());
            iter.next();
        }

        let size = writer.flush()?;
        log::info!("flushed memtable {} to level 0: {} bytes", id, size);
        Ok(Some(Arc::new(TableDesc { id, size, min_key, max_key })))
    }

    fn iter(&self) -> DbIterator {
        let (live, frozen) = {
            let state = self.mem.read();
            (Arc::clone(&state.live), state.frozen.clone())
        };

        // Children newest-first: live, frozen, then the catalog's on-disk
        // layers (which pin their file handles at construction).
        let mut children: Vec<Box<dyn Iter>> = Vec::new();
        children.push(Box::new(live.iter()));
        if let Some(frozen) = frozen {
            children.push(Box::new(frozen.iter()));
        }
        children.extend(self.catalog.scan_children());

        let mut merged = MergingIterator::new(children, Arc::clone(&self.options.comparator));
        merged.first();
        DbIterator { inner: merged }
    }
}

/// Ordered iterator over the whole store.
///
/// Holds its own references to the memtables and table files it reads, so
/// it stays consistent across rotations and compactions that happen after
/// it was created.
pub struct DbIterator {
    inner: MergingIterator,
}

impl Iter for DbIterator {
    fn first(&mut self) {
        self.inner.first();
    }

    fn next(&mut self) -> bool {
        self.inner.next()
    }

    fn seek(&mut self, target: &[u8]) -> bool {
        self.inner.seek(target)
    }

    fn valid(&self) -> bool {
        self.inner.valid()
    }

    fn key(&self) -> &[u8] {
        self.inner.key()
    }

    fn value(&self) -> &[u8] {
        self.inner.value()
    }
}
