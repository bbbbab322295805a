//! Configuration options for the SiltDB storage engine.

use crate::comparator::{BytewiseComparator, Comparator};
use std::fmt;
use std::sync::Arc;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

/// Configuration options for opening a database.
#[derive(Clone)]
pub struct Options {
    /// Target size of a data block inside an SST file (in bytes).
    /// Default: 4 KiB
    pub block_size: usize,

    /// Size threshold at which the live memtable is frozen and handed to the
    /// flusher (in bytes).
    /// Default: 2 MiB
    pub memtable_size: usize,

    /// Number of level-0 files above which a level-0 compaction is requested.
    /// Default: 4
    pub l0_trigger: usize,

    /// Target size of SST files produced by major compaction (in bytes).
    /// Default: 2 MiB
    pub file_size: u64,

    /// Byte budget for level 1.
    /// Default: 10 MiB
    pub l1_budget: u64,

    /// Size multiplier between consecutive levels.
    /// Default: 10 (level N+1 holds 10x the bytes of level N)
    pub multiplier: u64,

    /// Maximum number of levels below level 0.
    /// Default: 10
    pub max_level: usize,

    /// Number of open SST readers kept by the table cache.
    /// Default: 500
    pub file_cache_capacity: usize,

    /// Block cache capacity (in bytes).
    /// Default: 8 MiB
    pub block_cache_capacity: usize,

    /// Total ordering on keys.
    /// Default: lexicographic byte order
    pub comparator: Arc<dyn Comparator>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            block_size: 4 * KIB,
            memtable_size: 2 * MIB,
            l0_trigger: 4,
            file_size: 2 * MIB as u64,
            l1_budget: 10 * MIB as u64,
            multiplier: 10,
            max_level: 10,
            file_cache_capacity: 500,
            block_cache_capacity: 8 * MIB,
            comparator: Arc::new(BytewiseComparator),
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the data-block target size.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the memtable rotation threshold.
    pub fn memtable_size(mut self, size: usize) -> Self {
        self.memtable_size = size;
        self
    }

    /// Sets the level-0 file count that triggers compaction.
    pub fn l0_trigger(mut self, count: usize) -> Self {
        self.l0_trigger = count;
        self
    }

    /// Sets the SST output target size for compaction.
    pub fn file_size(mut self, size: u64) -> Self {
        self.file_size = size;
        self
    }

    /// Sets the level-1 byte budget.
    pub fn l1_budget(mut self, size: u64) -> Self {
        self.l1_budget = size;
        self
    }

    /// Sets the size multiplier between levels.
    pub fn multiplier(mut self, factor: u64) -> Self {
        self.multiplier = factor;
        self
    }

    /// Sets the block cache capacity.
    pub fn block_cache_capacity(mut self, size: usize) -> Self {
        self.block_cache_capacity = size;
        self
    }

    /// Sets the key comparator.
    pub fn comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.comparator = comparator;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.block_size == 0 {
            return Err(crate::Error::invalid_argument("block_size must be > 0"));
        }
        if self.memtable_size == 0 {
            return Err(crate::Error::invalid_argument("memtable_size must be > 0"));
        }
        if self.file_size == 0 {
            return Err(crate::Error::invalid_argument("file_size must be > 0"));
        }
        if self.l0_trigger == 0 {
            return Err(crate::Error::invalid_argument("l0_trigger must be > 0"));
        }
        if self.max_level == 0 {
            return Err(crate::Error::invalid_argument("max_level must be > 0"));
        }
        if self.multiplier < 2 {
            return Err(crate::Error::invalid_argument("multiplier must be >= 2"));
        }
        Ok(())
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("block_size", &self.block_size)
            .field("memtable_size", &self.memtable_size)
            .field("l0_trigger", &self.l0_trigger)
            .field("file_size", &self.file_size)
            .field("l1_budget", &self.l1_budget)
            .field("multiplier", &self.multiplier)
            .field("max_level", &self.max_level)
            .field("file_cache_capacity", &self.file_cache_capacity)
            .field("block_cache_capacity", &self.block_cache_capacity)
            .finish()
    }
}
