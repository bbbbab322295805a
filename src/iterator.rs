//! Iterator stack for ordered traversal.
//!
//! Every layer of the store exposes the same small capability surface
//! ([`Iter`]): memtable snapshots, single blocks, whole tables, levels. The
//! [`MergingIterator`] fuses N of them into one ordered stream with
//! newest-wins duplicate handling, which is what both `DB::iter` and the
//! compactor consume.

use crate::cache::TableCache;
use crate::catalog::TableDesc;
use crate::comparator::Comparator;
use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// Forward iteration over an ordered sequence of key-value entries.
///
/// Iterators start unpositioned; call `first` or `seek` before reading.
/// `key`/`value` may only be called while `valid` returns `true`. Reverse
/// iteration is not supported.
pub trait Iter {
    /// Positions the iterator at the first entry.
    fn first(&mut self);

    /// Advances to the next entry. Returns the new validity.
    fn next(&mut self) -> bool;

    /// Positions the iterator at the first entry with key `>= target`.
    /// Returns the new validity.
    fn seek(&mut self, target: &[u8]) -> bool;

    /// Returns `true` while the iterator is positioned at an entry.
    fn valid(&self) -> bool;

    /// Key of the current entry.
    fn key(&self) -> &[u8];

    /// Value of the current entry.
    fn value(&self) -> &[u8];
}

/// One heap slot: the key a child is currently positioned at, plus the
/// child's index among the merge sources.
struct HeapEntry {
    key: Bytes,
    index: usize,
    comparator: Arc<dyn Comparator>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the std max-heap pops the smallest (key, index) pair.
        // Equal keys fall back to source index: the lower index is the newer
        // layer and must surface first.
        self.comparator
            .compare(&other.key, &self.key)
            .then_with(|| other.index.cmp(&self.index))
    }
}

/// N-way merge over child iterators.
///
/// Children must be arranged newest-first: when several children carry the
/// same key, the one with the smallest index wins and a single `next` step
/// consumes that key from every child.
pub struct MergingIterator {
    children: Vec<Box<dyn Iter>>,
    heap: BinaryHeap<HeapEntry>,
    comparator: Arc<dyn Comparator>,
}

impl MergingIterator {
    /// Creates an unpositioned merge over `children`.
    pub fn new(children: Vec<Box<dyn Iter>>, comparator: Arc<dyn Comparator>) -> Self {
        Self { children, heap: BinaryHeap::new(), comparator }
    }

    fn push_child(heap: &mut BinaryHeap<HeapEntry>, comparator: &Arc<dyn Comparator>, children: &[Box<dyn Iter>], index: usize) {
        let child = &children[index];
        if child.valid() {
            heap.push(HeapEntry {
                key: Bytes::copy_from_slice(child.key()),
                index,
                comparator: Arc::clone(comparator),
            });
        }
    }

    fn rebuild_heap(&mut self) {
        self.heap.clear();
        for index in 0..self.children.len() {
            Self::push_child(&mut self.heap, &self.comparator, &self.children, index);
        }
    }
}

impl Iter for MergingIterator {
    fn first(&mut self) {
        for child in &mut self.children {
            child.first();
        }
        self.rebuild_heap();
    }

    fn next(&mut self) -> bool {
        let Some(front) = self.heap.peek() else {
            return false;
        };
        let current = front.key.clone();

        // Pop and advance every child sitting on the current key, so a
        // shadowed duplicate is never surfaced.
        while let Some(front) = self.heap.peek() {
            if self.comparator.compare(&front.key, &current) != Ordering::Equal {
                break;
            }
            let index = front.index;
            self.heap.pop();
            self.children[index].next();
            Self::push_child(&mut self.heap, &self.comparator, &self.children, index);
        }

        !self.heap.is_empty()
    }

    fn seek(&mut self, target: &[u8]) -> bool {
        for child in &mut self.children {
            child.seek(target);
        }
        self.rebuild_heap();
        self.valid()
    }

    fn valid(&self) -> bool {
        !self.heap.is_empty()
    }

    fn key(&self) -> &[u8] {
        let front = self.heap.peek().expect("iterator not valid");
        &front.key
    }

    fn value(&self) -> &[u8] {
        let front = self.heap.peek().expect("iterator not valid");
        self.children[front.index].value()
    }
}

/// Two-level iterator over one disjoint, min-key-ordered run of tables.
///
/// The outer position walks the descriptor list; the inner iterator is the
/// current table's own (index -> block) iterator. Readers are resolved
/// through the table cache at construction, so the iterator holds concrete
/// file handles and survives compactions that retire and unlink its tables.
pub struct LevelIterator {
    tables: Vec<(Arc<TableDesc>, Arc<crate::sstable::TableReader>)>,
    comparator: Arc<dyn Comparator>,
    cur: usize,
    inner: Option<crate::sstable::TableIterator>,
}

impl LevelIterator {
    /// Creates an unpositioned iterator over `tables`, which must be sorted
    /// by min-key and pairwise disjoint. A table that cannot be opened is
    /// logged and dropped from the run.
    pub fn new(
        tables: Vec<Arc<TableDesc>>,
        cache: &TableCache,
        comparator: Arc<dyn Comparator>,
    ) -> Self {
        let mut resolved = Vec::with_capacity(tables.len());
        for desc in tables {
            match cache.get(desc.id) {
                Ok(reader) => resolved.push((desc, reader)),
                Err(e) => {
                    log::warn!("level iterator failed to open table {}: {}", desc.id, e)
                }
            }
        }
        Self { tables: resolved, comparator, cur: 0, inner: None }
    }

    fn open_current(&mut self) -> bool {
        match self.tables.get(self.cur) {
            Some((_, reader)) => {
                self.inner = Some(reader.iter());
                true
            }
            None => {
                self.inner = None;
                false
            }
        }
    }
}

impl Iter for LevelIterator {
    fn first(&mut self) {
        self.cur = 0;
        if self.open_current() {
            if let Some(inner) = &mut self.inner {
                inner.first();
            }
        }
    }

    fn next(&mut self) -> bool {
        let Some(inner) = &mut self.inner else {
            return false;
        };
        if inner.next() {
            return true;
        }

        // Exhausted the current table; move to the next one.
        self.cur += 1;
        if self.open_current() {
            if let Some(inner) = &mut self.inner {
                inner.first();
                return inner.valid();
            }
        }
        false
    }

    fn seek(&mut self, target: &[u8]) -> bool {
        // First table whose max-key reaches the target; tables are disjoint
        // and ordered, so everything before it is entirely below the target.
        self.cur = self.tables.partition_point(|(desc, _)| {
            self.comparator.compare(&desc.max_key, target) == Ordering::Less
        });
        if self.open_current() {
            if let Some(inner) = &mut self.inner {
                return inner.seek(target);
            }
        }
        false
    }

    fn valid(&self) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.valid())
    }

    fn key(&self) -> &[u8] {
        self.inner.as_ref().expect("iterator not valid").key()
    }

    fn value(&self) -> &[u8] {
        self.inner.as_ref().expect("iterator not valid").value()
    }
}
