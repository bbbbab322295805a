//! Sorted string tables: the immutable on-disk representation.
//!
//! An SST file is a sequence of data blocks, followed by one index block and
//! a fixed footer:
//!
//! ```text
//! | data block | data block | ... | index block | footer (8 bytes) |
//! ```
//!
//! Data blocks hold the entries themselves; the index block holds one entry
//! per data block recording its minimum key and its position in the file.
//! The footer points at the index block. File length is always
//! `index_offset + index_length + 8`.

pub mod block;
pub mod builder;
pub mod footer;
pub mod reader;

pub use block::{Block, BlockBuilder, BlockIter};
pub use builder::TableWriter;
pub use footer::{Footer, FOOTER_SIZE};
pub use reader::{TableIterator, TableReader};
