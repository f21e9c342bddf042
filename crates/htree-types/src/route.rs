//! `Route`: the path from the tree root expressed as a sequence of child indices.

use std::cmp::Ordering;
use std::fmt;

/// An ordered sequence of non-negative child indices identifying a node's position
/// in a tree. The empty route is the root. Routes are totally ordered
/// lexicographically, which gives `PostDepth`/`PreDepth` traversal a natural sort
/// key independent of the tree's in-memory shape.
///
/// A `Route` is only meaningful for a node with refcount <= 1 (see the data model's
/// ownership invariant) — a node shared by two parents has an undefined route, and
/// callers that need a position for such a node must fast-copy first.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Route {
    indices: Vec<u32>,
}

impl Route {
    /// The empty route, denoting the tree root.
    pub fn root() -> Self {
        Self { indices: Vec::new() }
    }

    /// Builds a route from an explicit sequence of child indices.
    pub fn from_indices(indices: Vec<u32>) -> Self {
        Self { indices }
    }

    /// `true` for the root route.
    pub fn is_root(&self) -> bool {
        self.indices.is_empty()
    }

    /// Number of steps from the root.
    pub fn depth(&self) -> usize {
        self.indices.len()
    }

    /// The child indices, root-to-leaf.
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Returns a new route extended by one more child index.
    pub fn child(&self, index: u32) -> Route {
        let mut indices = self.indices.clone();
        indices.push(index);
        Route { indices }
    }

    /// Returns the parent route, or `None` for the root.
    pub fn parent(&self) -> Option<Route> {
        if self.indices.is_empty() {
            None
        } else {
            Some(Route {
                indices: self.indices[..self.indices.len() - 1].to_vec(),
            })
        }
    }

    /// `true` if `self` is a strict ancestor of `other` (a prefix, and shorter).
    pub fn is_ancestor_of(&self, other: &Route) -> bool {
        self.indices.len() < other.indices.len() && other.indices.starts_with(&self.indices)
    }

    /// `true` if `self` is a strict descendant of `other`.
    pub fn is_descendant_of(&self, other: &Route) -> bool {
        other.is_ancestor_of(self)
    }
}

impl PartialOrd for Route {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Route {
    fn cmp(&self, other: &Self) -> Ordering {
        self.indices.cmp(&other.indices)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/")?;
        for (i, idx) in self.indices.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{idx}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_empty() {
        let r = Route::root();
        assert!(r.is_root());
        assert_eq!(r.depth(), 0);
        assert!(r.parent().is_none());
    }

    #[test]
    fn lexicographic_order() {
        let a = Route::from_indices(vec![0, 1]);
        let b = Route::from_indices(vec![0, 2]);
        let c = Route::from_indices(vec![1]);
        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
    }

    #[test]
    fn ancestor_descendant() {
        let root = Route::root();
        let child = root.child(3);
        let grandchild = child.child(0);
        assert!(root.is_ancestor_of(&child));
        assert!(root.is_ancestor_of(&grandchild));
        assert!(child.is_ancestor_of(&grandchild));
        assert!(!child.is_ancestor_of(&child));
        assert!(grandchild.is_descendant_of(&root));
        assert!(!grandchild.is_ancestor_of(&root));
    }

    #[test]
    fn parent_round_trip() {
        let r = Route::from_indices(vec![2, 5, 1]);
        let p = r.parent().unwrap();
        assert_eq!(p.indices(), &[2, 5]);
        assert_eq!(p.child(1), r);
    }
}
