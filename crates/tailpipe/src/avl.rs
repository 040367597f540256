// SPDX-License-Identifier: MIT
// Copyright (c) 2025-2026 tailpipe.dev

//! Order-preserving associative container (AVL tree).
//!
//! A balanced binary search tree mapping owned keys to owned values.
//! Compared to a hash map it keeps keys in comparator order, which the
//! metric plumbing relies on for deterministic iteration, and it
//! supports [`AvlTree::pick`] for cheap draining at shutdown.
//!
//! Keys and values are stored by move; [`AvlTree::remove`] moves both
//! back out to the caller. Balance is maintained with single and
//! double rotations driven by per-node heights.

use std::borrow::Borrow;
use std::cmp::Ordering;

struct Node<K, V> {
    key: K,
    value: V,
    height: i32,
    left: Link<K, V>,
    right: Link<K, V>,
}

type Link<K, V> = Option<Box<Node<K, V>>>;

impl<K, V> Node<K, V> {
    fn new(key: K, value: V) -> Box<Self> {
        Box::new(Self {
            key,
            value,
            height: 1,
            left: None,
            right: None,
        })
    }

    fn update_height(&mut self) {
        self.height = 1 + height(&self.left).max(height(&self.right));
    }

    fn balance(&self) -> i32 {
        height(&self.left) - height(&self.right)
    }
}

fn height<K, V>(link: &Link<K, V>) -> i32 {
    link.as_ref().map_or(0, |n| n.height)
}

fn rotate_right<K, V>(mut node: Box<Node<K, V>>) -> Box<Node<K, V>> {
    match node.left.take() {
        Some(mut l) => {
            node.left = l.right.take();
            node.update_height();
            l.right = Some(node);
            l.update_height();
            l
        }
        // Misbalanced call; nothing sensible to rotate.
        None => node,
    }
}

fn rotate_left<K, V>(mut node: Box<Node<K, V>>) -> Box<Node<K, V>> {
    match node.right.take() {
        Some(mut r) => {
            node.right = r.left.take();
            node.update_height();
            r.left = Some(node);
            r.update_height();
            r
        }
        None => node,
    }
}

/// Restore the AVL invariant at `link` after a child subtree changed.
fn rebalance<K, V>(link: &mut Link<K, V>) {
    let Some(mut node) = link.take() else {
        return;
    };
    node.update_height();
    let bf = node.balance();
    if bf > 1 {
        // Left-heavy; double rotation if the left child leans right.
        if node.left.as_ref().map_or(0, |l| l.balance()) < 0 {
            if let Some(l) = node.left.take() {
                node.left = Some(rotate_left(l));
            }
        }
        *link = Some(rotate_right(node));
    } else if bf < -1 {
        if node.right.as_ref().map_or(0, |r| r.balance()) > 0 {
            if let Some(r) = node.right.take() {
                node.right = Some(rotate_right(r));
            }
        }
        *link = Some(rotate_left(node));
    } else {
        *link = Some(node);
    }
}

fn insert_into<K: Ord, V>(link: &mut Link<K, V>, key: K, value: V) -> Result<(), (K, V)> {
    let Some(node) = link.as_mut() else {
        *link = Some(Node::new(key, value));
        return Ok(());
    };
    let result = match key.cmp(&node.key) {
        Ordering::Less => insert_into(&mut node.left, key, value),
        Ordering::Greater => insert_into(&mut node.right, key, value),
        Ordering::Equal => return Err((key, value)),
    };
    if result.is_ok() {
        rebalance(link);
    }
    result
}

/// Detach the smallest element of the subtree, rebalancing on the way
/// back up.
fn pop_min<K, V>(link: &mut Link<K, V>) -> Option<(K, V)> {
    let has_left = link.as_ref()?.left.is_some();
    if has_left {
        let result = link.as_mut().and_then(|n| pop_min(&mut n.left));
        rebalance(link);
        result
    } else {
        let mut node = link.take()?;
        *link = node.right.take();
        Some((node.key, node.value))
    }
}

fn remove_from<K, V, Q>(link: &mut Link<K, V>, key: &Q) -> Option<(K, V)>
where
    K: Borrow<Q> + Ord,
    Q: Ord + ?Sized,
{
    let ordering = key.cmp(link.as_ref()?.key.borrow());
    let removed = match ordering {
        Ordering::Less => link.as_mut().and_then(|n| remove_from(&mut n.left, key)),
        Ordering::Greater => link.as_mut().and_then(|n| remove_from(&mut n.right, key)),
        Ordering::Equal => {
            let mut node = link.take()?;
            match (node.left.take(), node.right.take()) {
                (None, None) => {}
                (Some(l), None) => *link = Some(l),
                (None, Some(r)) => *link = Some(r),
                (Some(l), Some(r)) => {
                    // Replace with the in-order successor.
                    let mut right: Link<K, V> = Some(r);
                    if let Some((sk, sv)) = pop_min(&mut right) {
                        let mut succ = Node::new(sk, sv);
                        succ.left = Some(l);
                        succ.right = right;
                        succ.update_height();
                        *link = Some(succ);
                    }
                }
            }
            Some((node.key, node.value))
        }
    };
    if removed.is_some() {
        rebalance(link);
    }
    removed
}

/// Ordered key-value map backed by an AVL tree.
pub struct AvlTree<K, V> {
    root: Link<K, V>,
    len: usize,
}

impl<K: Ord, V> AvlTree<K, V> {
    pub fn new() -> Self {
        Self { root: None, len: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a key-value pair. If the key is already present the tree
    /// is left untouched and the rejected pair is handed back.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), (K, V)> {
        insert_into(&mut self.root, key, value)?;
        self.len += 1;
        Ok(())
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut cur = self.root.as_deref();
        while let Some(node) = cur {
            match key.cmp(node.key.borrow()) {
                Ordering::Less => cur = node.left.as_deref(),
                Ordering::Greater => cur = node.right.as_deref(),
                Ordering::Equal => return Some(&node.value),
            }
        }
        None
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut cur = self.root.as_deref_mut();
        while let Some(node) = cur {
            match key.cmp(node.key.borrow()) {
                Ordering::Less => cur = node.left.as_deref_mut(),
                Ordering::Greater => cur = node.right.as_deref_mut(),
                Ordering::Equal => return Some(&mut node.value),
            }
        }
        None
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Remove a key, moving the stored key and value back out.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let removed = remove_from(&mut self.root, key);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// Remove an arbitrary element. The order is unspecified; the only
    /// guarantee is that repeated calls drain the tree. Intended for
    /// teardown loops.
    pub fn pick(&mut self) -> Option<(K, V)> {
        let picked = pop_min(&mut self.root);
        if picked.is_some() {
            self.len -= 1;
        }
        picked
    }

    /// In-order iterator over `(&K, &V)`.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut iter = Iter { stack: Vec::new() };
        iter.push_left(self.root.as_deref());
        iter
    }

    /// In-order iterator yielding `(&K, &mut V)` so values can be
    /// updated in place during a traversal.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        let mut iter = IterMut { stack: Vec::new() };
        iter.push_left(self.root.as_deref_mut());
        iter
    }
}

impl<K: Ord, V> Default for AvlTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, K, V> {
    stack: Vec<&'a Node<K, V>>,
}

impl<'a, K, V> Iter<'a, K, V> {
    fn push_left(&mut self, mut cur: Option<&'a Node<K, V>>) {
        while let Some(node) = cur {
            self.stack.push(node);
            cur = node.left.as_deref();
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_left(node.right.as_deref());
        Some((&node.key, &node.value))
    }
}

pub struct IterMut<'a, K, V> {
    // Each frame carries the node's key/value plus its not-yet-visited
    // right subtree, pre-split so the borrows don't overlap.
    stack: Vec<(&'a K, &'a mut V, Option<&'a mut Node<K, V>>)>,
}

impl<'a, K, V> IterMut<'a, K, V> {
    fn push_left(&mut self, mut cur: Option<&'a mut Node<K, V>>) {
        while let Some(node) = cur {
            let Node {
                key,
                value,
                left,
                right,
                ..
            } = node;
            self.stack.push((key, value, right.as_deref_mut()));
            cur = left.as_deref_mut();
        }
    }
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value, right) = self.stack.pop()?;
        self.push_left(right);
        Some((key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Recompute heights from scratch and assert the AVL invariant.
    fn check_balance<K, V>(link: &Link<K, V>) -> i32 {
        match link {
            None => 0,
            Some(node) => {
                let hl = check_balance(&node.left);
                let hr = check_balance(&node.right);
                assert!(
                    (hl - hr).abs() <= 1,
                    "node out of balance: left {} right {}",
                    hl,
                    hr
                );
                assert_eq!(node.height, 1 + hl.max(hr), "stale height");
                1 + hl.max(hr)
            }
        }
    }

    #[test]
    fn test_insert_get_remove() {
        let mut tree = AvlTree::new();
        tree.insert("b".to_string(), 2).unwrap();
        tree.insert("a".to_string(), 1).unwrap();
        tree.insert("c".to_string(), 3).unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.get("a"), Some(&1));
        assert_eq!(tree.get("z"), None);

        let (k, v) = tree.remove("b").unwrap();
        assert_eq!((k.as_str(), v), ("b", 2));
        assert_eq!(tree.len(), 2);
        assert!(tree.remove("b").is_none());
    }

    #[test]
    fn test_duplicate_insert_returns_pair() {
        let mut tree = AvlTree::new();
        tree.insert(7, "first").unwrap();
        let (k, v) = tree.insert(7, "second").unwrap_err();
        assert_eq!((k, v), (7, "second"));
        // Original left intact.
        assert_eq!(tree.get(&7), Some(&"first"));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_balance_after_sequential_inserts() {
        let mut tree = AvlTree::new();
        for i in 0..256 {
            tree.insert(i, i * 2).unwrap();
            check_balance(&tree.root);
        }
        assert_eq!(tree.len(), 256);
    }

    #[test]
    fn test_balance_after_random_ops() {
        let mut tree = AvlTree::new();
        let mut present = Vec::new();
        fastrand::seed(0x7a11);
        for _ in 0..2000 {
            let key = fastrand::u32(0..500);
            if fastrand::bool() {
                if tree.insert(key, ()).is_ok() {
                    present.push(key);
                }
            } else if tree.remove(&key).is_some() {
                present.retain(|&k| k != key);
            }
            check_balance(&tree.root);
        }
        present.sort_unstable();
        present.dedup();
        assert_eq!(tree.len(), present.len());
    }

    #[test]
    fn test_iter_is_in_order() {
        let mut tree = AvlTree::new();
        for key in [5, 1, 9, 3, 7, 2, 8, 4, 6, 0] {
            tree.insert(key, key * 10).unwrap();
        }
        let keys: Vec<i32> = tree.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_iter_mut_updates_in_place() {
        let mut tree = AvlTree::new();
        for key in 0..10 {
            tree.insert(key, 0u32).unwrap();
        }
        for (k, v) in tree.iter_mut() {
            *v = (*k as u32) + 100;
        }
        assert_eq!(tree.get(&3), Some(&103));
        assert_eq!(tree.get(&9), Some(&109));
    }

    #[test]
    fn test_pick_drains_tree() {
        let mut tree = AvlTree::new();
        for key in 0..100 {
            tree.insert(key, ()).unwrap();
        }
        let mut drained = 0;
        while let Some((_k, ())) = tree.pick() {
            drained += 1;
            check_balance(&tree.root);
        }
        assert_eq!(drained, 100);
        assert!(tree.is_empty());
        assert!(tree.pick().is_none());
    }
}
