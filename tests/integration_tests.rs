//! End-to-end tests against the public API.

use siltdb::{Iter, Options, DB};
use std::sync::Arc;
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_basic_operations() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();

    db.put(b"key1", b"value1");
    db.put(b"key2", b"value2");

    assert_eq!(db.get(b"key1").as_deref(), Some(&b"value1"[..]));
    assert_eq!(db.get(b"key2").as_deref(), Some(&b"value2"[..]));
    assert_eq!(db.get(b"key3"), None);

    db.put(b"key1", b"updated");
    assert_eq!(db.get(b"key1").as_deref(), Some(&b"updated"[..]));
}

#[test]
fn test_writes_survive_rotation_and_compaction() {
    init_logging();
    let dir = TempDir::new().unwrap();
    // Small thresholds so the write load exercises rotation, flushing, and
    // level-0 compaction.
    let options = Options::default()
        .memtable_size(16 * 1024)
        .file_size(8 * 1024)
        .l1_budget(32 * 1024);
    let db = DB::open(dir.path(), options).unwrap();

    for i in 0..2000 {
        let key = format!("key{:08}", i);
        let value = format!("value{:08}", i);
        db.put(key.as_bytes(), value.as_bytes());
    }
    db.flush().unwrap();

    for i in 0..2000 {
        let key = format!("key{:08}", i);
        let expect = format!("value{:08}", i);
        assert_eq!(
            db.get(key.as_bytes()).as_deref(),
            Some(expect.as_bytes()),
            "missing {}",
            key
        );
    }
}

#[test]
fn test_overwrites_resolve_to_newest_across_layers() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let options = Options::default().memtable_size(8 * 1024);
    let db = DB::open(dir.path(), options).unwrap();

    // Write the same keys in waves; each wave overwrites the previous and
    // earlier waves end up in deeper layers.
    for wave in 0..5 {
        for i in 0..200 {
            let key = format!("key{:04}", i);
            let value = format!("wave{}_{}", wave, i);
            db.put(key.as_bytes(), value.as_bytes());
        }
        db.flush().unwrap();
    }

    for i in 0..200 {
        let key = format!("key{:04}", i);
        let expect = format!("wave4_{}", i);
        assert_eq!(db.get(key.as_bytes()).as_deref(), Some(expect.as_bytes()));
    }
}

#[test]
fn test_full_scan_is_sorted_and_deduplicated() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let options = Options::default().memtable_size(8 * 1024);
    let db = DB::open(dir.path(), options).unwrap();

    for i in (0..500).rev() {
        let key = format!("key{:08}", i);
        db.put(key.as_bytes(), b"first");
    }
    db.flush().unwrap();
    for i in 0..500 {
        let key = format!("key{:08}", i);
        db.put(key.as_bytes(), b"second");
    }

    let mut iter = db.iter();
    let mut count = 0;
    let mut last: Option<Vec<u8>> = None;
    while iter.valid() {
        if let Some(last) = &last {
            assert!(iter.key() > &last[..], "scan must be strictly ascending");
        }
        assert_eq!(iter.value(), b"second");
        last = Some(iter.key().to_vec());
        count += 1;
        iter.next();
    }
    assert_eq!(count, 500);
}

#[test]
fn test_scan_seek_positions_mid_stream() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();

    for i in 0..100 {
        let key = format!("key{:04}", i);
        db.put(key.as_bytes(), b"x");
    }

    let mut iter = db.iter();
    assert!(iter.seek(b"key0050"));
    assert_eq!(iter.key(), b"key0050");

    let mut remaining = 0;
    while iter.valid() {
        remaining += 1;
        iter.next();
    }
    assert_eq!(remaining, 50);
}

#[test]
fn test_concurrent_writers() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let options = Options::default().memtable_size(32 * 1024);
    let db = Arc::new(DB::open(dir.path(), options).unwrap());

    let mut handles = vec![];
    for t in 0..4 {
        let db = Arc::clone(&db);
        handles.push(std::thread::spawn(move || {
            for i in 0..1000 {
                let key = format!("writer{}_{:06}", t, i);
                db.put(key.as_bytes(), b"payload");
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..4 {
        for i in 0..1000 {
            let key = format!("writer{}_{:06}", t, i);
            assert!(db.get(key.as_bytes()).is_some(), "missing {}", key);
        }
    }
}

#[test]
fn test_paused_compaction_still_serves_reads() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();
    db.pause_compaction();

    for i in 0..100 {
        let key = format!("key{:04}", i);
        db.put(key.as_bytes(), b"v");
    }
    db.flush().unwrap();

    for i in 0..100 {
        let key = format!("key{:04}", i);
        assert!(db.get(key.as_bytes()).is_some());
    }
}
