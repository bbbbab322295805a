//! Level-organized table catalog.
//!
//! The catalog owns the per-level sets of SST descriptors and everything
//! that follows from them: read routing across levels, compaction triggers,
//! compaction planning, and the atomic swap that retires compaction inputs.
//!
//! Level 0 is an append-ordered list whose tables may overlap; the newest
//! table shadows older ones. Levels >= 1 are sorted by min-key and pairwise
//! disjoint, so at most one table per level can contain any given key.

use crate::cache::TableCache;
use crate::comparator::Comparator;
use crate::config::Options;
use crate::error::Result;
use crate::files;
use crate::iterator::{Iter, LevelIterator};
use bytes::Bytes;
use crossbeam::channel::{Sender, TrySendError};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

/// In-memory record of one SST file.
///
/// The descriptor owns the table's identity: the physical file is unlinked
/// only after the descriptor has been retired by compaction.
#[derive(Debug, Clone)]
pub struct TableDesc {
    /// Monotonic id; also names the file on disk.
    pub id: u64,
    /// File size in bytes.
    pub size: u64,
    /// Smallest key in the table.
    pub min_key: Bytes,
    /// Largest key in the table.
    pub max_key: Bytes,
}

/// A level-compaction request, as carried on the level-compaction channel.
///
/// Requests are fire-and-forget: the compactor re-derives the actual work
/// from catalog state when it dequeues one.
#[derive(Debug, Clone, Copy)]
pub struct CompactRange {
    /// The level whose trigger fired.
    pub level: usize,
}

/// A planned compaction: the selected tables at `level` plus every table at
/// `level + 1` whose key range overlaps their union.
#[derive(Debug, Clone)]
pub struct CompactionJob {
    /// Source level.
    pub level: usize,
    /// Selected tables at the source level.
    pub inputs: Vec<Arc<TableDesc>>,
    /// Overlapping tables at `level + 1`.
    pub overlaps: Vec<Arc<TableDesc>>,
}

struct LevelState {
    /// Append-ordered; the newest table is last.
    level0: Vec<Arc<TableDesc>>,
    /// levels[i] holds level i+1, sorted by min-key, ranges disjoint.
    levels: Vec<Vec<Arc<TableDesc>>>,
}

/// The per-level set of table descriptors, behind one reader-writer lock.
pub struct TableCatalog {
    state: RwLock<LevelState>,
    table_cache: Arc<TableCache>,
    comparator: Arc<dyn Comparator>,
    dir: PathBuf,

    /// Id source for SSTs, memtables and their journal files.
    next_id: AtomicU64,

    level_tx: Sender<CompactRange>,

    l0_trigger: usize,
    l1_budget: u64,
    multiplier: u64,
    max_level: usize,
}

impl TableCatalog {
    /// Creates an empty catalog. Ids are handed out starting at `first_id`.
    pub fn new(
        options: &Options,
        dir: PathBuf,
        table_cache: Arc<TableCache>,
        level_tx: Sender<CompactRange>,
        first_id: u64,
    ) -> Self {
        Self {
            state: RwLock::new(LevelState {
                level0: Vec::new(),
                levels: vec![Vec::new(); options.max_level],
            }),
            table_cache,
            comparator: Arc::clone(&options.comparator),
            dir,
            next_id: AtomicU64::new(first_id),
            level_tx,
            l0_trigger: options.l0_trigger,
            l1_budget: options.l1_budget,
            multiplier: options.multiplier,
            max_level: options.max_level,
        }
    }

    /// Hands out the next monotonic file id.
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, AtomicOrdering::SeqCst)
    }

    /// Looks `key` up across all levels: level 0 newest to oldest, then each
    /// deeper level in turn. The first hit wins.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let cmp = self.comparator.as_ref();
        let state = self.state.read();

        for desc in state.level0.iter().rev() {
            if cmp.compare(key, &desc.min_key) == Ordering::Less
                || cmp.compare(key, &desc.max_key) == Ordering::Greater
            {
                continue;
            }
            let reader = self.table_cache.get(desc.id)?;
            if let Some(value) = reader.get(key)? {
                return Ok(Some(value));
            }
        }

        for level in &state.levels {
            // Smallest descriptor whose max-key reaches the target; ranges
            // are disjoint, so it is the only candidate in this level.
            let idx = level
                .partition_point(|t| cmp.compare(&t.max_key, key) == Ordering::Less);
            let Some(desc) = level.get(idx) else {
                continue;
            };
            if cmp.compare(&desc.min_key, key) == Ordering::Greater {
                continue;
            }
            let reader = self.table_cache.get(desc.id)?;
            if let Some(value) = reader.get(key)? {
                return Ok(Some(value));
            }
        }

        Ok(None)
    }

    /// Registers a new table at `level`, then re-evaluates compaction
    /// triggers.
    pub fn add_table(&self, level: usize, desc: Arc<TableDesc>) {
        {
            let mut state = self.state.write();
            if level == 0 {
                state.level0.push(desc);
            } else {
                let list = &mut state.levels[level - 1];
                list.push(desc);
                let cmp = Arc::clone(&self.comparator);
                list.sort_by(|a, b| cmp.compare(&a.min_key, &b.min_key));
            }
        }
        self.check_compaction();
    }

    /// Requests a compaction for the first over-budget level, if any.
    ///
    /// The send is non-blocking; a full queue just drops the request, since
    /// the compactor re-checks each level's state when it dequeues and the
    /// next `add_table` re-evaluates anyway.
    pub fn check_compaction(&self) {
        let overloaded = {
            let state = self.state.read();
            self.overloaded_level(&state)
        };
        let Some(level) = overloaded else {
            return;
        };
        match self.level_tx.try_send(CompactRange { level }) {
            Ok(()) => log::debug!("compaction requested for level {}", level),
            Err(TrySendError::Full(_)) => {
                log::debug!("compaction queue full, dropping request for level {}", level)
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn overloaded_level(&self, state: &LevelState) -> Option<usize> {
        if state.level0.len() > self.l0_trigger {
            return Some(0);
        }
        // The bottom level has nowhere to compact into.
        for level in 1..self.max_level {
            let size: u64 = state.levels[level - 1].iter().map(|t| t.size).sum();
            if size > self.budget(level) {
                return Some(level);
            }
        }
        None
    }

    /// Staleness recheck used by the compactor: is `level` still over its
    /// trigger? Duplicate or raced requests die here as no-ops.
    pub fn needs_compaction(&self, level: usize) -> bool {
        let state = self.state.read();
        if level == 0 {
            return state.level0.len() > self.l0_trigger;
        }
        if level >= self.max_level {
            return false;
        }
        let size: u64 = state.levels[level - 1].iter().map(|t| t.size).sum();
        size > self.budget(level)
    }

    /// Plans a compaction out of `level`.
    ///
    /// Level 0 selects every table (they may overlap each other); deeper
    /// levels select the first descriptor, a deliberately simple
    /// round-robin-by-position policy. All of `level + 1` overlapping the
    /// selection's key range joins the job.
    pub fn pick_compaction(&self, level: usize) -> Option<CompactionJob> {
        if level >= self.max_level {
            return None;
        }
        let cmp = self.comparator.as_ref();
        let state = self.state.read();

        let inputs: Vec<Arc<TableDesc>> = if level == 0 {
            state.level0.clone()
        } else {
            state.levels[level - 1].first().cloned().into_iter().collect()
        };
        let first = inputs.first()?;

        let mut min_key = first.min_key.clone();
        let mut max_key = first.max_key.clone();
        for table in &inputs[1..] {
            if cmp.compare(&table.min_key, &min_key) == Ordering::Less {
                min_key = table.min_key.clone();
            }
            if cmp.compare(&table.max_key, &max_key) == Ordering::Greater {
                max_key = table.max_key.clone();
            }
        }

        let overlaps = state.levels[level]
            .iter()
            .filter(|t| {
                cmp.compare(&t.min_key, &max_key) != Ordering::Greater
                    && cmp.compare(&t.max_key, &min_key) != Ordering::Less
            })
            .cloned()
            .collect();

        Some(CompactionJob { level, inputs, overlaps })
    }

    /// Atomically swaps compaction results in: removes `del` from `level`
    /// and `level + 1`, inserts `add` into `level + 1`.
    ///
    /// Physical file removal is deliberately not part of the critical
    /// section; see [`TableCatalog::remove_obsolete`].
    pub fn apply_compaction(
        &self,
        level: usize,
        add: Vec<Arc<TableDesc>>,
        del: &[Arc<TableDesc>],
    ) {
        let del_ids: HashSet<u64> = del.iter().map(|d| d.id).collect();
        let mut state = self.state.write();

        if level == 0 {
            state.level0.retain(|t| !del_ids.contains(&t.id));
        } else {
            state.levels[level - 1].retain(|t| !del_ids.contains(&t.id));
        }

        let target = &mut state.levels[level];
        target.retain(|t| !del_ids.contains(&t.id));
        target.extend(add);
        let cmp = Arc::clone(&self.comparator);
        target.sort_by(|a, b| cmp.compare(&a.min_key, &b.min_key));
    }

    /// Evicts retired tables from the cache and unlinks their files.
    /// Failures are logged, never surfaced: the descriptors are already
    /// gone from the catalog and an orphaned file is harmless.
    pub fn remove_obsolete(&self, del: &[Arc<TableDesc>]) {
        for desc in del {
            self.table_cache.evict(desc.id);
            let path = self.dir.join(files::sst_filename(desc.id));
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("failed to remove compacted table {:?}: {}", path, e);
            }
        }
    }

    /// Byte budget for `level` (level >= 1).
    pub fn budget(&self, level: usize) -> u64 {
        self.l1_budget * self.multiplier.pow(level as u32 - 1)
    }

    /// Number of tables at `level` (0-based, level 0 included).
    pub fn num_tables(&self, level: usize) -> usize {
        let state = self.state.read();
        if level == 0 {
            state.level0.len()
        } else {
            state.levels[level - 1].len()
        }
    }

    /// Level-0 descriptors in append (oldest to newest) order.
    pub fn level0_tables(&self) -> Vec<Arc<TableDesc>> {
        self.state.read().level0.clone()
    }

    /// Descriptors of `level` (>= 1) in min-key order.
    pub fn level_tables(&self, level: usize) -> Vec<Arc<TableDesc>> {
        self.state.read().levels[level - 1].clone()
    }

    /// Builds one iterator child per on-disk layer, newest-first: one table
    /// iterator per level-0 descriptor (newest to oldest), then one
    /// [`LevelIterator`] per non-empty deeper level.
    ///
    /// Runs under the catalog read lock so no compaction can retire a table
    /// between the snapshot and the open: every child ends up holding live
    /// file handles and keeps working after its tables are unlinked.
    pub fn scan_children(&self) -> Vec<Box<dyn Iter>> {
        let state = self.state.read();
        let mut children: Vec<Box<dyn Iter>> = Vec::new();

        for desc in state.level0.iter().rev() {
            match self.table_cache.get(desc.id) {
                Ok(reader) => children.push(Box::new(reader.iter())),
                Err(e) => {
                    log::error!("scan skipping unreadable table {}: {}", desc.id, e)
                }
            }
        }
        for level in &state.levels {
            if level.is_empty() {
                continue;
            }
            children.push(Box::new(LevelIterator::new(
                level.clone(),
                &self.table_cache,
                Arc::clone(&self.comparator),
            )));
        }
        children
    }

    /// The open-table cache backing this catalog.
    pub fn table_cache(&self) -> &Arc<TableCache> {
        &self.table_cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LruCache;
    use crate::comparator::BytewiseComparator;
    use crossbeam::channel::{bounded, Receiver};
    use tempfile::TempDir;

    fn desc(id: u64, size: u64, min: &str, max: &str) -> Arc<TableDesc> {
        Arc::new(TableDesc {
            id,
            size,
            min_key: Bytes::copy_from_slice(min.as_bytes()),
            max_key: Bytes::copy_from_slice(max.as_bytes()),
        })
    }

    fn new_catalog(
        dir: &TempDir,
        options: Options,
    ) -> (TableCatalog, Receiver<CompactRange>) {
        let (tx, rx) = bounded(5);
        let block_cache = Arc::new(LruCache::new(1024 * 1024));
        let table_cache = Arc::new(TableCache::new(
            dir.path().to_path_buf(),
            100,
            block_cache,
            Arc::new(BytewiseComparator),
        ));
        let catalog =
            TableCatalog::new(&options, dir.path().to_path_buf(), table_cache, tx, 1);
        (catalog, rx)
    }

    #[test]
    fn test_budget_function() {
        let dir = TempDir::new().unwrap();
        let (catalog, _rx) = new_catalog(&dir, Options::default());

        assert_eq!(catalog.budget(1), 10 * 1024 * 1024);
        assert_eq!(catalog.budget(2), 100 * 1024 * 1024);
        assert_eq!(catalog.budget(3), 1000 * 1024 * 1024);
    }

    #[test]
    fn test_allocate_id_monotonic() {
        let dir = TempDir::new().unwrap();
        let (catalog, _rx) = new_catalog(&dir, Options::default());
        let a = catalog.allocate_id();
        let b = catalog.allocate_id();
        let c = catalog.allocate_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_add_table_keeps_levels_sorted() {
        let dir = TempDir::new().unwrap();
        let (catalog, _rx) = new_catalog(&dir, Options::default());

        catalog.add_table(1, desc(1, 100, "m", "p"));
        catalog.add_table(1, desc(2, 100, "a", "c"));
        catalog.add_table(1, desc(3, 100, "t", "z"));

        let level1 = catalog.level_tables(1);
        let mins: Vec<_> = level1.iter().map(|t| t.min_key.clone()).collect();
        assert_eq!(mins, vec!["a", "m", "t"]);

        // Pairwise disjoint ranges.
        for pair in level1.windows(2) {
            assert!(pair[0].max_key < pair[1].min_key);
        }
    }

    #[test]
    fn test_level0_trigger_requests_compaction() {
        let dir = TempDir::new().unwrap();
        let (catalog, rx) = new_catalog(&dir, Options::default());

        for id in 1..=4 {
            catalog.add_table(0, desc(id, 100, "a", "z"));
        }
        assert!(rx.try_recv().is_err(), "four files stay under the trigger");

        catalog.add_table(0, desc(5, 100, "a", "z"));
        let request = rx.try_recv().expect("fifth file crosses the trigger");
        assert_eq!(request.level, 0);
        assert!(catalog.needs_compaction(0));
    }

    #[test]
    fn test_over_budget_level_requests_compaction() {
        let dir = TempDir::new().unwrap();
        let options = Options::default().l1_budget(1000).multiplier(2);
        let (catalog, rx) = new_catalog(&dir, options);

        catalog.add_table(1, desc(1, 600, "a", "c"));
        assert!(rx.try_recv().is_err());
        assert!(!catalog.needs_compaction(1));

        catalog.add_table(1, desc(2, 600, "d", "f"));
        let request = rx.try_recv().unwrap();
        assert_eq!(request.level, 1);
        assert!(catalog.needs_compaction(1));

        // Level 2 budget is doubled; the same bytes fit.
        assert!(!catalog.needs_compaction(2));
    }

    #[test]
    fn test_full_queue_drops_request() {
        let dir = TempDir::new().unwrap();
        let (catalog, rx) = new_catalog(&dir, Options::default().l1_budget(100));

        catalog.add_table(1, desc(1, 500, "a", "c"));
        // Each further add re-requests; the queue holds 5, the rest drop.
        for id in 2..=20 {
            catalog.add_table(1, desc(id, 500, &format!("k{}", id), &format!("k{}z", id)));
        }

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 5);
        // The state itself still knows compaction is due.
        assert!(catalog.needs_compaction(1));
    }

    #[test]
    fn test_pick_level0_takes_all_plus_overlaps() {
        let dir = TempDir::new().unwrap();
        let (catalog, _rx) = new_catalog(&dir, Options::default());

        catalog.add_table(0, desc(1, 100, "c", "h"));
        catalog.add_table(0, desc(2, 100, "e", "m"));
        catalog.add_table(1, desc(3, 100, "a", "b"));
        catalog.add_table(1, desc(4, 100, "d", "f"));
        catalog.add_table(1, desc(5, 100, "k", "p"));
        catalog.add_table(1, desc(6, 100, "q", "z"));

        let job = catalog.pick_compaction(0).unwrap();
        assert_eq!(job.level, 0);
        assert_eq!(job.inputs.len(), 2);

        // Union range is [c, m]: tables [d,f] and [k,p] overlap, [a,b] and
        // [q,z] do not.
        let overlap_ids: Vec<u64> = job.overlaps.iter().map(|t| t.id).collect();
        assert_eq!(overlap_ids, vec![4, 5]);
    }

    #[test]
    fn test_pick_deeper_level_takes_first_table() {
        let dir = TempDir::new().unwrap();
        let (catalog, _rx) = new_catalog(&dir, Options::default());

        catalog.add_table(1, desc(1, 100, "m", "p"));
        catalog.add_table(1, desc(2, 100, "a", "c"));
        catalog.add_table(2, desc(3, 100, "b", "d"));
        catalog.add_table(2, desc(4, 100, "x", "z"));

        let job = catalog.pick_compaction(1).unwrap();
        assert_eq!(job.inputs.len(), 1);
        assert_eq!(job.inputs[0].id, 2, "lowest min-key goes first");
        assert_eq!(job.overlaps.len(), 1);
        assert_eq!(job.overlaps[0].id, 3);
    }

    #[test]
    fn test_pick_empty_level_is_none() {
        let dir = TempDir::new().unwrap();
        let (catalog, _rx) = new_catalog(&dir, Options::default());
        assert!(catalog.pick_compaction(0).is_none());
        assert!(catalog.pick_compaction(3).is_none());
        // The bottom level never compacts.
        catalog.add_table(10, desc(1, 100, "a", "z"));
        assert!(catalog.pick_compaction(10).is_none());
    }

    #[test]
    fn test_apply_compaction_swaps_descriptors() {
        let dir = TempDir::new().unwrap();
        let (catalog, _rx) = new_catalog(&dir, Options::default());

        let l0_a = desc(1, 100, "a", "m");
        let l0_b = desc(2, 100, "c", "t");
        let l1_old = desc(3, 100, "b", "k");
        catalog.add_table(0, l0_a.clone());
        catalog.add_table(0, l0_b.clone());
        catalog.add_table(1, l1_old.clone());

        let merged = desc(4, 250, "a", "t");
        catalog.apply_compaction(0, vec![merged], &[l0_a, l0_b, l1_old]);

        assert_eq!(catalog.num_tables(0), 0);
        assert_eq!(catalog.num_tables(1), 1);
        assert_eq!(catalog.level_tables(1)[0].id, 4);
    }

    #[test]
    fn test_catalog_get_routes_through_levels() {
        use crate::sstable::TableWriter;

        let dir = TempDir::new().unwrap();
        let (catalog, _rx) = new_catalog(&dir, Options::default());

        let mut write = |id: u64, entries: &[(&[u8], &[u8])]| {
            let path = dir.path().join(files::sst_filename(id));
            let mut writer = TableWriter::create(&path, 4096).unwrap();
            for (key, value) in entries {
                writer.append(key, value).unwrap();
            }
            let size = writer.flush().unwrap();
            Arc::new(TableDesc {
                id,
                size,
                min_key: Bytes::copy_from_slice(entries.first().unwrap().0),
                max_key: Bytes::copy_from_slice(entries.last().unwrap().0),
            })
        };

        // Older L0 table shadowed by a newer one for "b"; "x" only deeper.
        let older = write(1, &[(b"a", b"old_a"), (b"b", b"old_b")]);
        let newer = write(2, &[(b"b", b"new_b"), (b"c", b"new_c")]);
        let deep = write(3, &[(b"w", b"deep_w"), (b"x", b"deep_x")]);

        catalog.add_table(0, older);
        catalog.add_table(0, newer);
        catalog.add_table(1, deep);

        assert_eq!(catalog.get(b"a").unwrap().as_deref(), Some(&b"old_a"[..]));
        assert_eq!(catalog.get(b"b").unwrap().as_deref(), Some(&b"new_b"[..]));
        assert_eq!(catalog.get(b"c").unwrap().as_deref(), Some(&b"new_c"[..]));
        assert_eq!(catalog.get(b"x").unwrap().as_deref(), Some(&b"deep_x"[..]));
        assert_eq!(catalog.get(b"zzz").unwrap(), None);
    }
}
