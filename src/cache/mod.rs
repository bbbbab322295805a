//! Caching layers shared by the read path.
//!
//! One generic LRU backs two caches: the block cache (decoded data blocks,
//! weighted by their byte length) and the table cache (open SST readers,
//! weighted one per entry).

pub mod lru;
pub mod table;

pub use lru::{LruCache, NamespacedCache};
pub use table::TableCache;
