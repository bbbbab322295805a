//! File naming for the database directory.
//!
//! SST files are named `sst-<id>.ldb`, journal files `log-<id>.log`, where
//! `<id>` is a monotonically increasing integer assigned by the catalog.

/// Kinds of files the engine creates in its directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileType {
    /// An immutable sorted string table.
    Table,
    /// An append-only journal file.
    Log,
}

/// Builds the file name for an SST with the given id.
pub(crate) fn sst_filename(id: u64) -> String {
    format!("sst-{}.ldb", id)
}

/// Builds the file name for a journal file with the given id.
pub(crate) fn log_filename(id: u64) -> String {
    format!("log-{}.log", id)
}

/// Parses a file name produced by this module back into its type and id.
pub(crate) fn parse_filename(name: &str) -> Option<(FileType, u64)> {
    if let Some(rest) = name.strip_prefix("sst-") {
        let id = rest.strip_suffix(".ldb")?.parse().ok()?;
        return Some((FileType::Table, id));
    }
    if let Some(rest) = name.strip_prefix("log-") {
        let id = rest.strip_suffix(".log")?.parse().ok()?;
        return Some((FileType::Log, id));
    }
    None
}
