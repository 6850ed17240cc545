//! Persistent ordered map with structural sharing.
//!
//! An AVL tree whose nodes are reference counted. Cloning a map is O(1);
//! mutating a clone copies only the nodes on the path to the mutated key
//! (`Arc::make_mut`), leaving every other node shared with the original.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

type Link<K, V> = Option<Arc<Node<K, V>>>;

#[derive(Clone)]
struct Node<K, V> {
    key: K,
    value: V,
    left: Link<K, V>,
    right: Link<K, V>,
    height: u8,
}

impl<K, V> Node<K, V> {
    fn leaf(key: K, value: V) -> Self {
        Self {
            key,
            value,
            left: None,
            right: None,
            height: 1,
        }
    }

    fn fix_height(&mut self) {
        self.height = 1 + height(&self.left).max(height(&self.right));
    }

    fn balance(&self) -> i16 {
        height(&self.left) as i16 - height(&self.right) as i16
    }
}

fn height<K, V>(link: &Link<K, V>) -> u8 {
    link.as_ref().map_or(0, |n| n.height)
}

/// Persistent ordered map.
pub struct PMap<K, V> {
    root: Link<K, V>,
    len: usize,
}

impl<K, V> Clone for PMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            len: self.len,
        }
    }
}

impl<K, V> Default for PMap<K, V> {
    fn default() -> Self {
        Self { root: None, len: 0 }
    }
}

impl<K: fmt::Debug + Ord + Clone, V: fmt::Debug + Clone> fmt::Debug for PMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Ord + Clone, V: Clone> PMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether both maps share the same root (and therefore the same content).
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.root, &other.root) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let mut link = &self.root;
        while let Some(node) = link {
            match key.cmp(&node.key) {
                Ordering::Less => link = &node.left,
                Ordering::Greater => link = &node.right,
                Ordering::Equal => return Some(&node.value),
            }
        }
        None
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Mutable access to a value, copying the path to it if shared.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if !self.contains_key(key) {
            return None;
        }
        let mut link = &mut self.root;
        loop {
            let node = Arc::make_mut(link.as_mut()?);
            match key.cmp(&node.key) {
                Ordering::Less => link = &mut node.left,
                Ordering::Greater => link = &mut node.right,
                Ordering::Equal => return Some(&mut node.value),
            }
        }
    }

    /// Inserts a value, returning the previous value for the key.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let previous = insert_node(&mut self.root, key, value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Removes a key, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        if !self.contains_key(key) {
            return None;
        }
        let removed = remove_node(&mut self.root, key);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    pub fn first(&self) -> Option<(&K, &V)> {
        let mut node = self.root.as_ref()?;
        while let Some(left) = &node.left {
            node = left;
        }
        Some((&node.key, &node.value))
    }

    pub fn last(&self) -> Option<(&K, &V)> {
        let mut node = self.root.as_ref()?;
        while let Some(right) = &node.right {
            node = right;
        }
        Some((&node.key, &node.value))
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        self.range(Bound::Unbounded, Bound::Unbounded)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }

    /// In-order iteration over keys within the given bounds.
    pub fn range(&self, lower: Bound<K>, upper: Bound<K>) -> Iter<'_, K, V> {
        let mut iter = Iter {
            stack: Vec::new(),
            upper,
        };
        let mut link = &self.root;
        while let Some(node) = link {
            let in_range = match &lower {
                Bound::Unbounded => true,
                Bound::Included(k) => node.key >= *k,
                Bound::Excluded(k) => node.key > *k,
            };
            if in_range {
                iter.stack.push(node);
                link = &node.left;
            } else {
                link = &node.right;
            }
        }
        iter
    }
}

impl<K: Ord + Clone, V: Clone> FromIterator<(K, V)> for PMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = PMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

fn insert_node<K: Ord + Clone, V: Clone>(link: &mut Link<K, V>, key: K, value: V) -> Option<V> {
    match link {
        None => {
            *link = Some(Arc::new(Node::leaf(key, value)));
            None
        }
        Some(arc) => {
            let node = Arc::make_mut(arc);
            let previous = match key.cmp(&node.key) {
                Ordering::Less => insert_node(&mut node.left, key, value),
                Ordering::Greater => insert_node(&mut node.right, key, value),
                Ordering::Equal => return Some(std::mem::replace(&mut node.value, value)),
            };
            rebalance(link);
            previous
        }
    }
}

fn remove_node<K: Ord + Clone, V: Clone>(link: &mut Link<K, V>, key: &K) -> Option<V> {
    let node = Arc::make_mut(link.as_mut()?);
    let removed = match key.cmp(&node.key) {
        Ordering::Less => remove_node(&mut node.left, key),
        Ordering::Greater => remove_node(&mut node.right, key),
        Ordering::Equal => {
            let left = node.left.take();
            let right = node.right.take();
            let replacement = match (left, right) {
                (None, right) => right,
                (left, None) => left,
                (left, right) => {
                    let mut right = right;
                    let (k, v) = remove_min(&mut right)?;
                    let mut successor = Node {
                        key: k,
                        value: v,
                        left,
                        right,
                        height: 1,
                    };
                    successor.fix_height();
                    Some(Arc::new(successor))
                }
            };
            let old = std::mem::replace(link, replacement)?;
            let old = Arc::try_unwrap(old).unwrap_or_else(|shared| (*shared).clone());
            Some(old.value)
        }
    };
    rebalance(link);
    removed
}

fn remove_min<K: Ord + Clone, V: Clone>(link: &mut Link<K, V>) -> Option<(K, V)> {
    let node = Arc::make_mut(link.as_mut()?);
    if node.left.is_some() {
        let min = remove_min(&mut node.left);
        rebalance(link);
        min
    } else {
        let right = node.right.take();
        let old = std::mem::replace(link, right)?;
        let old = Arc::try_unwrap(old).unwrap_or_else(|shared| (*shared).clone());
        Some((old.key, old.value))
    }
}

fn rebalance<K: Clone, V: Clone>(link: &mut Link<K, V>) {
    let Some(arc) = link.as_mut() else {
        return;
    };
    let node = Arc::make_mut(arc);
    node.fix_height();
    let balance = node.balance();
    if balance > 1 {
        if node.left.as_ref().is_some_and(|l| l.balance() < 0) {
            rotate_left(&mut node.left);
        }
        rotate_right(link);
    } else if balance < -1 {
        if node.right.as_ref().is_some_and(|r| r.balance() > 0) {
            rotate_right(&mut node.right);
        }
        rotate_left(link);
    }
}

fn rotate_right<K: Clone, V: Clone>(link: &mut Link<K, V>) {
    let Some(mut root_arc) = link.take() else {
        return;
    };
    let root = Arc::make_mut(&mut root_arc);
    let Some(mut pivot_arc) = root.left.take() else {
        *link = Some(root_arc);
        return;
    };
    let pivot = Arc::make_mut(&mut pivot_arc);
    root.left = pivot.right.take();
    root.fix_height();
    pivot.right = Some(root_arc);
    pivot.fix_height();
    *link = Some(pivot_arc);
}

fn rotate_left<K: Clone, V: Clone>(link: &mut Link<K, V>) {
    let Some(mut root_arc) = link.take() else {
        return;
    };
    let root = Arc::make_mut(&mut root_arc);
    let Some(mut pivot_arc) = root.right.take() else {
        *link = Some(root_arc);
        return;
    };
    let pivot = Arc::make_mut(&mut pivot_arc);
    root.right = pivot.left.take();
    root.fix_height();
    pivot.left = Some(root_arc);
    pivot.fix_height();
    *link = Some(pivot_arc);
}

/// In-order iterator over a [`PMap`] range.
pub struct Iter<'a, K, V> {
    stack: Vec<&'a Node<K, V>>,
    upper: Bound<K>,
}

impl<'a, K: Ord, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        let within = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(k) => node.key <= *k,
            Bound::Excluded(k) => node.key < *k,
        };
        if !within {
            self.stack.clear();
            return None;
        }
        let mut link = &node.right;
        while let Some(child) = link {
            self.stack.push(child);
            link = &child.left;
        }
        Some((&node.key, &node.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(map: &PMap<i32, i32>) -> Vec<i32> {
        map.keys().copied().collect()
    }

    #[test]
    fn insert_and_iterate_in_order() {
        let mut map = PMap::new();
        for k in [5, 3, 8, 1, 4, 7, 9, 2, 6] {
            map.insert(k, k * 10);
        }
        assert_eq!(collect(&map), (1..=9).collect::<Vec<_>>());
        assert_eq!(map.get(&7), Some(&70));
        assert_eq!(map.len(), 9);
    }

    #[test]
    fn clones_are_isolated() {
        let mut base: PMap<i32, i32> = (0..100).map(|i| (i, i)).collect();
        let snapshot = base.clone();
        base.insert(1000, 1);
        base.remove(&50);
        *base.get_mut(&10).unwrap() = -10;

        assert_eq!(snapshot.len(), 100);
        assert_eq!(snapshot.get(&50), Some(&50));
        assert_eq!(snapshot.get(&10), Some(&10));
        assert!(!snapshot.contains_key(&1000));

        assert_eq!(base.len(), 100);
        assert_eq!(base.get(&10), Some(&-10));
        assert!(!base.contains_key(&50));
    }

    #[test]
    fn remove_keeps_order_and_balance() {
        let mut map: PMap<i32, ()> = (0..1000).map(|i| (i, ())).collect();
        for i in (0..1000).step_by(3) {
            assert!(map.remove(&i).is_some());
        }
        let expected: Vec<i32> = (0..1000).filter(|i| i % 3 != 0).collect();
        let keys: Vec<i32> = map.keys().copied().collect();
        assert_eq!(keys, expected);
        assert!(height(&map.root) <= 15);
    }

    #[test]
    fn range_bounds() {
        let map: PMap<i32, ()> = (0..10).map(|i| (i, ())).collect();
        let keys: Vec<i32> = map
            .range(Bound::Excluded(3), Bound::Included(6))
            .map(|(k, _)| *k)
            .collect();
        assert_eq!(keys, vec![4, 5, 6]);
        let keys: Vec<i32> = map
            .range(Bound::Unbounded, Bound::Excluded(2))
            .map(|(k, _)| *k)
            .collect();
        assert_eq!(keys, vec![0, 1]);
        assert_eq!(map.first().map(|(k, _)| *k), Some(0));
        assert_eq!(map.last().map(|(k, _)| *k), Some(9));
    }
}
