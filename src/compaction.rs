//! Background compaction.
//!
//! A single compactor task drains two bounded channels: the mem-compaction
//! channel (flush the frozen memtable to level 0) and the level-compaction
//! channel (merge an over-budget level into the one below it). The bounded
//! capacities are the engine's back-pressure: when compaction falls behind,
//! writers block on the mem-compaction send.
//!
//! Failure rule: the catalog transition is last. Output files are fully
//! written before any descriptor is swapped, so an error or crash
//! mid-compaction leaves at worst orphaned files, never a catalog that
//! points at missing data.

use crate::catalog::{CompactionJob, TableDesc};
use crate::error::Result;
use crate::files;
use crate::iterator::{Iter, LevelIterator, MergingIterator};
use crate::sstable::TableWriter;
use crate::DbCore;
use bytes::Bytes;
use crossbeam::select;
use std::sync::Arc;

/// The background compaction task.
pub(crate) struct Compactor {
    pub(crate) db: Arc<DbCore>,
}

impl Compactor {
    /// Runs until shutdown. Blocks on the request channels between jobs.
    pub(crate) fn run(self) {
        let mem_rx = self.db.mem_rx.clone();
        let level_rx = self.db.level_rx.clone();
        let pause_rx = self.db.pause_rx.clone();
        let shutdown_rx = self.db.shutdown_rx.clone();

        loop {
            select! {
                recv(mem_rx) -> msg => match msg {
                    Ok(()) => {
                        if let Err(e) = self.db.mem_compaction() {
                            log::error!("memtable flush failed: {}", e);
                        }
                    }
                    Err(_) => break,
                },
                recv(level_rx) -> msg => match msg {
                    Ok(range) => self.major_compaction(range.level),
                    Err(_) => break,
                },
                recv(pause_rx) -> msg => match msg {
                    Ok(()) => {
                        log::info!("compactor paused");
                        // Parked until the database shuts down.
                        let _ = shutdown_rx.recv();
                        break;
                    }
                    Err(_) => break,
                },
                recv(shutdown_rx) -> _ => break,
            }
        }
        log::debug!("compactor exiting");
    }

    /// Merges `level` into `level + 1`.
    ///
    /// Starts with a staleness recheck: requests are fire-and-forget and may
    /// be duplicated or already satisfied, so a request for a level that is
    /// no longer over its trigger is dropped here.
    fn major_compaction(&self, level: usize) {
        let catalog = &self.db.catalog;
        if !catalog.needs_compaction(level) {
            log::debug!("stale compaction request for level {}", level);
            return;
        }
        let Some(job) = catalog.pick_compaction(level) else {
            return;
        };

        log::info!(
            "major compaction: {} tables from level {}, {} overlapping at level {}",
            job.inputs.len(),
            job.level,
            job.overlaps.len(),
            job.level + 1
        );

        let outputs = match self.run_job(&job) {
            Ok(outputs) => outputs,
            Err(e) => {
                // Abort without touching the catalog; partial outputs are
                // orphan files.
                log::error!("compaction at level {} aborted: {}", level, e);
                return;
            }
        };

        let retired: Vec<Arc<TableDesc>> =
            job.inputs.iter().chain(job.overlaps.iter()).cloned().collect();
        let produced = outputs.len();
        catalog.apply_compaction(job.level, outputs, &retired);
        catalog.remove_obsolete(&retired);

        log::info!(
            "major compaction finished: level {} -> level {}, {} tables out",
            job.level,
            job.level + 1,
            produced
        );
        // The merge may have pushed the target level over its own budget;
        // the next add_table re-evaluates every level and requests the
        // follow-up compaction then.
    }

    /// Streams the merged input entries into rolling output tables.
    fn run_job(&self, job: &CompactionJob) -> Result<Vec<Arc<TableDesc>>> {
        let catalog = &self.db.catalog;
        let cache = Arc::clone(catalog.table_cache());
        let comparator = Arc::clone(&self.db.options.comparator);

        // Children ordered newest-first so the merge tie-break keeps the
        // newest value for a key. Level-0 descriptors are appended in flush
        // order, hence the reversal; a deeper level is one disjoint run.
        let mut children: Vec<Box<dyn Iter>> = Vec::new();
        if job.level == 0 {
            for desc in job.inputs.iter().rev() {
                let reader = cache.get(desc.id)?;
                children.push(Box::new(reader.iter()));
            }
        } else {
            children.push(Box::new(LevelIterator::new(
                job.inputs.clone(),
                &cache,
                Arc::clone(&comparator),
            )));
        }
        if !job.overlaps.is_empty() {
            children.push(Box::new(LevelIterator::new(
                job.overlaps.clone(),
                &cache,
                Arc::clone(&comparator),
            )));
        }

        let mut merged = MergingIterator::new(children, comparator);
        merged.first();

        let mut builder = CompactionBuilder::new(&self.db);
        while merged.valid() {
            builder.add(merged.key(), merged.value())?;
            merged.next();
        }
        builder.finish()
    }
}

struct Output {
    id: u64,
    writer: TableWriter,
    min_key: Bytes,
    max_key: Bytes,
}

/// Writes a merged entry stream into output tables, rolling to a fresh file
/// whenever the current one reaches the configured file-size target.
pub(crate) struct CompactionBuilder<'a> {
    db: &'a DbCore,
    current: Option<Output>,
    outputs: Vec<Arc<TableDesc>>,
}

impl<'a> CompactionBuilder<'a> {
    pub(crate) fn new(db: &'a DbCore) -> Self {
        Self { db, current: None, outputs: Vec::new() }
    }

    /// Appends one entry, opening an output file if none is in flight.
    pub(crate) fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.current.is_none() {
            let id = self.db.catalog.allocate_id();
            let path = self.db.path.join(files::sst_filename(id));
            let writer = TableWriter::create(path, self.db.options.block_size)?;
            self.current = Some(Output {
                id,
                writer,
                min_key: Bytes::copy_from_slice(key),
                max_key: Bytes::new(),
            });
        }
        let out = self.current.as_mut().expect("output opened above");

        out.writer.append(key, value)?;
        out.max_key = Bytes::copy_from_slice(key);

        if out.writer.estimate_size() >= self.db.options.file_size {
            self.rotate()?;
        }
        Ok(())
    }

    /// Seals the in-flight output file into a descriptor.
    fn rotate(&mut self) -> Result<()> {
        if let Some(out) = self.current.take() {
            let size = out.writer.flush()?;
            log::debug!("compaction output table {}: {} bytes", out.id, size);
            self.outputs.push(Arc::new(TableDesc {
                id: out.id,
                size,
                min_key: out.min_key,
                max_key: out.max_key,
            }));
        }
        Ok(())
    }

    /// Seals the trailing output and returns all produced descriptors.
    pub(crate) fn finish(mut self) -> Result<Vec<Arc<TableDesc>>> {
        self.rotate()?;
        Ok(self.outputs)
    }
}
