//! Probabilistic skip list backing the memtable.
//!
//! Nodes live in a flat arena indexed by `usize`; each node carries one
//! forward pointer per level. Insertion needs no rebalancing, and lookup and
//! insertion are expected O(log n). The list is not internally synchronized;
//! the owning memtable serializes access.

use crate::comparator::Comparator;
use bytes::Bytes;
use rand::Rng;
use std::cmp::Ordering;
use std::sync::Arc;

const MAX_HEIGHT: usize = 12;
/// Probability of promoting a node one level up.
const P: f32 = 0.25;

const NIL: usize = usize::MAX;

struct Node {
    key: Bytes,
    value: Bytes,
    /// Forward pointer per level, `NIL`-terminated. Length == node height.
    forward: Vec<usize>,
}

/// Ordered map from keys to values with unique keys.
pub(crate) struct SkipList {
    comparator: Arc<dyn Comparator>,
    /// nodes[0] is the head sentinel with `MAX_HEIGHT` forward pointers.
    nodes: Vec<Node>,
    height: usize,
    len: usize,
}

impl SkipList {
    pub(crate) fn new(comparator: Arc<dyn Comparator>) -> Self {
        let head =
            Node { key: Bytes::new(), value: Bytes::new(), forward: vec![NIL; MAX_HEIGHT] };
        Self { comparator, nodes: vec![head], height: 1, len: 0 }
    }

    fn random_height(&self) -> usize {
        let mut rng = rand::rng();
        let mut height = 1;
        while height < MAX_HEIGHT && rng.random::<f32>() < P {
            height += 1;
        }
        height
    }

    /// Walks down from the top level, recording the rightmost node strictly
    /// below `key` at every level.
    fn find_prev(&self, key: &[u8]) -> [usize; MAX_HEIGHT] {
        let mut prev = [0usize; MAX_HEIGHT];
        let mut at = 0;
        for level in (0..self.height).rev() {
            loop {
                let next = self.nodes[at].forward[level];
                if next == NIL
                    || self.comparator.compare(&self.nodes[next].key, key) != Ordering::Less
                {
                    break;
                }
                at = next;
            }
            prev[level] = at;
        }
        prev
    }

    /// Inserts or overwrites. Returns the replaced value on overwrite.
    pub(crate) fn insert(&mut self, key: Bytes, value: Bytes) -> Option<Bytes> {
        let prev = self.find_prev(&key);

        // Same key: overwrite in place.
        let candidate = self.nodes[prev[0]].forward[0];
        if candidate != NIL
            && self.comparator.compare(&self.nodes[candidate].key, &key) == Ordering::Equal
        {
            return Some(std::mem::replace(&mut self.nodes[candidate].value, value));
        }

        let height = self.random_height();
        if height > self.height {
            self.height = height;
        }

        let new_index = self.nodes.len();
        let mut node = Node { key, value, forward: vec![NIL; height] };
        for (level, slot) in node.forward.iter_mut().enumerate() {
            // Levels above the old height hang off the head, whose pointer
            // there is still NIL.
            let at = prev[level];
            *slot = self.nodes[at].forward[level];
        }
        for level in 0..height {
            self.nodes[prev[level]].forward[level] = new_index;
        }
        self.nodes.push(node);
        self.len += 1;
        None
    }

    pub(crate) fn get(&self, key: &[u8]) -> Option<Bytes> {
        let prev = self.find_prev(key);
        let candidate = self.nodes[prev[0]].forward[0];
        if candidate != NIL
            && self.comparator.compare(&self.nodes[candidate].key, key) == Ordering::Equal
        {
            Some(self.nodes[candidate].value.clone())
        } else {
            None
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Entries in ascending key order. Key/value handles are shared, not
    /// copied.
    pub(crate) fn entries(&self) -> Vec<(Bytes, Bytes)> {
        let mut out = Vec::with_capacity(self.len);
        let mut at = self.nodes[0].forward[0];
        while at != NIL {
            let node = &self.nodes[at];
            out.push((node.key.clone(), node.value.clone()));
            at = node.forward[0];
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;

    fn new_list() -> SkipList {
        SkipList::new(Arc::new(BytewiseComparator))
    }

    fn insert(list: &mut SkipList, key: &str, value: &str) -> Option<Bytes> {
        list.insert(Bytes::copy_from_slice(key.as_bytes()), Bytes::copy_from_slice(value.as_bytes()))
    }

    #[test]
    fn test_list_read_write() {
        let mut list = new_list();
        insert(&mut list, "k1", "v1");
        insert(&mut list, "k2", "v2");
        insert(&mut list, "k3", "v3");

        assert_eq!(list.get(b"k1").as_deref(), Some(&b"v1"[..]));
        assert_eq!(list.get(b"k2").as_deref(), Some(&b"v2"[..]));
        assert_eq!(list.get(b"k3").as_deref(), Some(&b"v3"[..]));
        assert_eq!(list.get(b"k4"), None);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_list_overwrite_returns_old_value() {
        let mut list = new_list();
        assert_eq!(insert(&mut list, "k", "v1"), None);
        let old = insert(&mut list, "k", "v2");
        assert_eq!(old.as_deref(), Some(&b"v1"[..]));

        assert_eq!(list.get(b"k").as_deref(), Some(&b"v2"[..]));
        assert_eq!(list.len(), 1, "overwrite must not grow the list");
    }

    #[test]
    fn test_list_ordered_iteration() {
        let mut list = new_list();
        // Insert out of order.
        for key in ["banana", "apple", "date", "cherry"] {
            insert(&mut list, key, "x");
        }

        let keys: Vec<_> =
            list.entries().into_iter().map(|(k, _)| String::from_utf8(k.to_vec()).unwrap()).collect();
        assert_eq!(keys, vec!["apple", "banana", "cherry", "date"]);
    }

    #[test]
    fn test_list_many_entries() {
        let mut list = new_list();
        for i in (0..1000).rev() {
            let key = format!("key{:06}", i);
            insert(&mut list, &key, &format!("value{}", i));
        }

        assert_eq!(list.len(), 1000);
        for i in 0..1000 {
            let key = format!("key{:06}", i);
            assert_eq!(
                list.get(key.as_bytes()).as_deref(),
                Some(format!("value{}", i).as_bytes())
            );
        }

        // entries() comes back sorted even though inserts were reversed.
        let entries = list.entries();
        assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_empty_list() {
        let list = new_list();
        assert!(list.is_empty());
        assert_eq!(list.get(b"anything"), None);
        assert!(list.entries().is_empty());
    }
}
