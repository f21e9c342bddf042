//! Tree traversal iterators (Section 4.2): `PostDepth` (default), its
//! reproducibly-randomized sibling-order variant, `PreDepth`, and `Breadth`.
//! Each is restartable from any root handle and produces a finite,
//! cancellable sequence of node handles.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::node::NodeHandle;

/// Post-order (children before parent) depth-first traversal, the default
/// order used by rehashing and whole-tree diffing.
pub struct PostDepthIter {
    // Each frame: the node, and whether its children have already been pushed.
    stack: Vec<(NodeHandle, bool)>,
    cancelled: bool,
}

impl PostDepthIter {
    /// Starts a post-order traversal rooted at `root`.
    pub fn new(root: NodeHandle) -> Self {
        Self {
            stack: vec![(root, false)],
            cancelled: false,
        }
    }

    /// Stops the traversal early; subsequent calls to `next` return `None`.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }
}

impl Iterator for PostDepthIter {
    type Item = NodeHandle;

    fn next(&mut self) -> Option<NodeHandle> {
        if self.cancelled {
            return None;
        }
        while let Some((node, expanded)) = self.stack.pop() {
            if expanded {
                return Some(node);
            }
            self.stack.push((node.clone(), true));
            for child in node.children().into_iter().flatten() {
                self.stack.push((child, false));
            }
        }
        None
    }
}

/// Post-order traversal with each internal node's sibling visit order
/// permuted by a caller-supplied seed, for reproducible randomized rehash
/// testing and load distribution.
pub struct PostDepthRandomizedIter {
    stack: Vec<(NodeHandle, bool)>,
    rng: StdRng,
    cancelled: bool,
}

impl PostDepthRandomizedIter {
    /// Starts a randomized post-order traversal; `seed` makes sibling
    /// permutation order reproducible across runs.
    pub fn new(root: NodeHandle, seed: u64) -> Self {
        Self {
            stack: vec![(root, false)],
            rng: StdRng::seed_from_u64(seed),
            cancelled: false,
        }
    }

    /// Stops the traversal early.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }
}

impl Iterator for PostDepthRandomizedIter {
    type Item = NodeHandle;

    fn next(&mut self) -> Option<NodeHandle> {
        if self.cancelled {
            return None;
        }
        while let Some((node, expanded)) = self.stack.pop() {
            if expanded {
                return Some(node);
            }
            self.stack.push((node.clone(), true));
            let mut children: Vec<NodeHandle> = node.children().into_iter().flatten().collect();
            children.shuffle(&mut self.rng);
            for child in children {
                self.stack.push((child, false));
            }
        }
        None
    }
}

/// Pre-order (parent before children) depth-first traversal.
pub struct PreDepthIter {
    stack: Vec<NodeHandle>,
    cancelled: bool,
}

impl PreDepthIter {
    /// Starts a pre-order traversal rooted at `root`.
    pub fn new(root: NodeHandle) -> Self {
        Self {
            stack: vec![root],
            cancelled: false,
        }
    }

    /// Stops the traversal early.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }
}

impl Iterator for PreDepthIter {
    type Item = NodeHandle;

    fn next(&mut self) -> Option<NodeHandle> {
        if self.cancelled {
            return None;
        }
        let node = self.stack.pop()?;
        for child in node.children().into_iter().rev().flatten() {
            self.stack.push(child);
        }
        Some(node)
    }
}

/// Breadth-first (level-order) traversal.
pub struct BreadthIter {
    queue: VecDeque<NodeHandle>,
    cancelled: bool,
}

impl BreadthIter {
    /// Starts a breadth-first traversal rooted at `root`.
    pub fn new(root: NodeHandle) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(root);
        Self {
            queue,
            cancelled: false,
        }
    }

    /// Stops the traversal early.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }
}

impl Iterator for BreadthIter {
    type Item = NodeHandle;

    fn next(&mut self) -> Option<NodeHandle> {
        if self.cancelled {
            return None;
        }
        let node = self.queue.pop_front()?;
        for child in node.children().into_iter().flatten() {
            self.queue.push_back(child);
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{LeafPayload, Node};

    #[derive(Debug, Clone)]
    struct P(u8);
    impl LeafPayload for P {
        fn class_id(&self) -> u64 {
            1
        }
        fn version(&self) -> u32 {
            1
        }
        fn serialize(&self) -> Vec<u8> {
            vec![self.0]
        }
        fn clone_payload(&self) -> Box<dyn LeafPayload> {
            Box::new(self.clone())
        }
    }

    fn sample_tree() -> NodeHandle {
        let l1 = Node::new_leaf(Box::new(P(1)));
        let l2 = Node::new_leaf(Box::new(P(2)));
        let internal = Node::new_internal(9, 1, 2, 2, 2);
        internal.set_child(0, Some(l1)).unwrap();
        internal.set_child(1, Some(l2)).unwrap();
        internal
    }

    #[test]
    fn post_order_visits_children_before_parent() {
        let tree = sample_tree();
        let order: Vec<bool> = PostDepthIter::new(tree).map(|n| n.is_leaf()).collect();
        assert_eq!(order, vec![true, true, false]);
    }

    #[test]
    fn pre_order_visits_parent_before_children() {
        let tree = sample_tree();
        let order: Vec<bool> = PreDepthIter::new(tree).map(|n| n.is_leaf()).collect();
        assert_eq!(order, vec![false, true, true]);
    }

    #[test]
    fn breadth_visits_level_by_level() {
        let tree = sample_tree();
        let order: Vec<bool> = BreadthIter::new(tree).map(|n| n.is_leaf()).collect();
        assert_eq!(order, vec![false, true, true]);
    }

    #[test]
    fn randomized_post_order_is_reproducible_for_same_seed() {
        let tree_a = sample_tree();
        let tree_b = sample_tree();
        let order_a: Vec<u64> = PostDepthRandomizedIter::new(tree_a, 42)
            .map(|n| n.class_id())
            .collect();
        let order_b: Vec<u64> = PostDepthRandomizedIter::new(tree_b, 42)
            .map(|n| n.class_id())
            .collect();
        assert_eq!(order_a, order_b);
    }

    #[test]
    fn cancel_stops_traversal_early() {
        let tree = sample_tree();
        let mut iter = PostDepthIter::new(tree);
        assert!(iter.next().is_some());
        iter.cancel();
        assert!(iter.next().is_none());
    }
}
