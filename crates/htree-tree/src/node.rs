//! The merkle node model: a tagged `Leaf`/`Internal` variant behind a shared
//! handle, with an explicit refcount protocol layered on top of `Arc`'s own
//! strong count (Section 4.1). `Arc` gives us memory safety for structural
//! sharing; the `AtomicI64` field reproduces the teacher-independent contract
//! this spec requires: `acquire`/`release_handle`/`explicit_release` and the
//! `-1` "released" terminal state.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use htree_types::error::TreeError;
use htree_types::{Hash, Route};

/// A self-serializing application payload carried by a leaf node.
///
/// `class_id`/`version` identify the payload's wire shape to a [`crate::class_registry::ClassRegistry`];
/// `serialize` produces the bytes that feed both the leaf's hash preimage and
/// its on-disk representation.
pub trait LeafPayload: Send + Sync + fmt::Debug {
    /// Registered class id for this payload's type.
    fn class_id(&self) -> u64;
    /// Per-class wire version.
    fn version(&self) -> u32;
    /// Self-serializes this payload's bytes.
    fn serialize(&self) -> Vec<u8>;
    /// `true` if this leaf should be written to an external side-stream
    /// rather than inline in the main serialization stream (Section 4.3).
    fn is_external(&self) -> bool {
        false
    }
    /// Clones this payload behind a fresh box, used by fast-copy/path-copy.
    fn clone_payload(&self) -> Box<dyn LeafPayload>;
}

/// The tagged union at the heart of the node model.
enum Variant {
    Leaf(Box<dyn LeafPayload>),
    Internal(InternalData),
}

struct InternalData {
    class_id: u64,
    version: u32,
    min_children: u32,
    max_children: u32,
    children: Vec<Option<NodeHandle>>,
}

/// A shared handle to a node. Cloning a `NodeHandle` is a cheap `Arc` clone;
/// it does **not** by itself adjust the logical refcount — callers that take
/// ownership of a handle as a child pointer must call [`Node::acquire`].
pub type NodeHandle = Arc<Node>;

/// A merkle tree node: `Leaf` or `Internal`, with a lazily-computed cached
/// hash, an optional route (meaningful only while refcount <= 1), and the
/// explicit reference-count state machine from Section 4.1.
pub struct Node {
    variant: RwLock<Variant>,
    hash: RwLock<Option<Hash>>,
    route: RwLock<Option<Route>>,
    refcount: AtomicI64,
    immutable: AtomicBool,
    archived: AtomicBool,
}

impl Node {
    /// Builds a fresh leaf node: refcount 0, no route, no cached hash.
    pub fn new_leaf(payload: Box<dyn LeafPayload>) -> NodeHandle {
        Arc::new(Node {
            variant: RwLock::new(Variant::Leaf(payload)),
            hash: RwLock::new(None),
            route: RwLock::new(None),
            refcount: AtomicI64::new(0),
            immutable: AtomicBool::new(false),
            archived: AtomicBool::new(false),
        })
    }

    /// Builds a fresh internal node with `child_count` empty (`None`) slots.
    pub fn new_internal(
        class_id: u64,
        version: u32,
        min_children: u32,
        max_children: u32,
        child_count: u32,
    ) -> NodeHandle {
        Arc::new(Node {
            variant: RwLock::new(Variant::Internal(InternalData {
                class_id,
                version,
                min_children,
                max_children,
                children: vec![None; child_count as usize],
            })),
            hash: RwLock::new(None),
            route: RwLock::new(None),
            refcount: AtomicI64::new(0),
            immutable: AtomicBool::new(false),
            archived: AtomicBool::new(false),
        })
    }

    /// Builds a fresh internal node from already-assembled children (used by
    /// whole-tree deserialization's `finalize` step).
    pub fn new_internal_with_children(
        class_id: u64,
        version: u32,
        min_children: u32,
        max_children: u32,
        children: Vec<Option<NodeHandle>>,
    ) -> NodeHandle {
        let node = Arc::new(Node {
            variant: RwLock::new(Variant::Internal(InternalData {
                class_id,
                version,
                min_children,
                max_children,
                children,
            })),
            hash: RwLock::new(None),
            route: RwLock::new(None),
            refcount: AtomicI64::new(0),
            immutable: AtomicBool::new(false),
            archived: AtomicBool::new(false),
        });
        if let Variant::Internal(data) = &*node.variant.read().expect("lock poisoned") {
            for child in data.children.iter().flatten() {
                let _ = child.acquire();
            }
        }
        node
    }

    /// `true` for leaf nodes.
    pub fn is_leaf(&self) -> bool {
        matches!(&*self.variant.read().expect("lock poisoned"), Variant::Leaf(_))
    }

    /// `true` for internal nodes.
    pub fn is_internal(&self) -> bool {
        !self.is_leaf()
    }

    /// The registered class id of this node's payload/shape.
    pub fn class_id(&self) -> u64 {
        match &*self.variant.read().expect("lock poisoned") {
            Variant::Leaf(p) => p.class_id(),
            Variant::Internal(d) => d.class_id,
        }
    }

    /// The wire version of this node's payload/shape.
    pub fn version(&self) -> u32 {
        match &*self.variant.read().expect("lock poisoned") {
            Variant::Leaf(p) => p.version(),
            Variant::Internal(d) => d.version,
        }
    }

    /// Number of child slots (0 for a leaf).
    pub fn child_count(&self) -> usize {
        match &*self.variant.read().expect("lock poisoned") {
            Variant::Leaf(_) => 0,
            Variant::Internal(d) => d.children.len(),
        }
    }

    /// The child at `index`, if present and in range.
    pub fn child(&self, index: usize) -> Option<NodeHandle> {
        match &*self.variant.read().expect("lock poisoned") {
            Variant::Leaf(_) => None,
            Variant::Internal(d) => d.children.get(index).cloned().flatten(),
        }
    }

    /// All children, in order, `None` for empty slots (empty for a leaf).
    pub fn children(&self) -> Vec<Option<NodeHandle>> {
        match &*self.variant.read().expect("lock poisoned") {
            Variant::Leaf(_) => Vec::new(),
            Variant::Internal(d) => d.children.clone(),
        }
    }

    /// Sets the child at `index`, acquiring the new child and releasing the
    /// slot's previous occupant. Invalidates this node's own cached hash;
    /// ancestor invalidation is the caller's (`Tree`'s) responsibility via
    /// path-copy, per Section 4.1.
    pub fn set_child(&self, index: usize, child: Option<NodeHandle>) -> Result<(), TreeError> {
        if self.immutable.load(Ordering::Acquire) {
            return Err(TreeError::ReferenceCountError(
                "node is immutable".to_string(),
            ));
        }
        let mut guard = self.variant.write().expect("lock poisoned");
        match &mut *guard {
            Variant::Leaf(_) => Err(TreeError::IllegalChildType {
                index: index as u32,
                expected: "Internal",
                actual: "Leaf",
            }),
            Variant::Internal(d) => {
                let hi = d.children.len().saturating_sub(1) as u32;
                if index >= d.children.len() {
                    return Err(TreeError::IllegalChildIndex {
                        lo: 0,
                        hi,
                        got: index as u32,
                    });
                }
                if let Some(new_child) = &child {
                    new_child.acquire()?;
                }
                let previous = std::mem::replace(&mut d.children[index], child);
                drop(guard);
                if let Some(old) = previous {
                    old.release_handle()?;
                }
                *self.hash.write().expect("lock poisoned") = None;
                Ok(())
            }
        }
    }

    /// Replaces a leaf's payload in place. Invalidates this node's cached hash.
    pub fn set_payload(&self, payload: Box<dyn LeafPayload>) -> Result<(), TreeError> {
        if self.immutable.load(Ordering::Acquire) {
            return Err(TreeError::ReferenceCountError(
                "node is immutable".to_string(),
            ));
        }
        let mut guard = self.variant.write().expect("lock poisoned");
        match &mut *guard {
            Variant::Leaf(p) => {
                *p = payload;
                drop(guard);
                *self.hash.write().expect("lock poisoned") = None;
                Ok(())
            }
            Variant::Internal(_) => Err(TreeError::IllegalChildType {
                index: 0,
                expected: "Leaf",
                actual: "Internal",
            }),
        }
    }

    /// Returns a clone of this leaf's payload, or `None` for an internal node.
    pub fn leaf_payload_clone(&self) -> Option<Box<dyn LeafPayload>> {
        match &*self.variant.read().expect("lock poisoned") {
            Variant::Leaf(p) => Some(p.clone_payload()),
            Variant::Internal(_) => None,
        }
    }

    /// Min/max legal child counts for an internal node's class/version; `(0, 0)` for a leaf.
    pub fn child_count_bounds(&self) -> (u32, u32) {
        match &*self.variant.read().expect("lock poisoned") {
            Variant::Leaf(_) => (0, 0),
            Variant::Internal(d) => (d.min_children, d.max_children),
        }
    }

    /// The cached hash, if rehashing has already run over this node.
    pub fn cached_hash(&self) -> Option<Hash> {
        self.hash.read().expect("lock poisoned").clone()
    }

    /// Installs a freshly computed hash into the cache.
    pub fn set_cached_hash(&self, hash: Hash) {
        *self.hash.write().expect("lock poisoned") = Some(hash);
    }

    /// Clears the cached hash, forcing recomputation on the next rehash pass.
    pub fn invalidate_hash(&self) {
        *self.hash.write().expect("lock poisoned") = None;
    }

    /// The node's route, if it has one assigned and is not currently shared
    /// (refcount > 1 makes the route undefined per the data model).
    pub fn route(&self) -> Result<Option<Route>, TreeError> {
        if self.refcount.load(Ordering::Acquire) > 1 {
            return Err(TreeError::RouteConflict);
        }
        Ok(self.route.read().expect("lock poisoned").clone())
    }

    /// Sets this node's route. Fails with `RouteConflict` unless refcount <= 1,
    /// i.e. the node is not shared by more than one parent (Section 4.1).
    pub fn set_route(&self, route: Route) -> Result<(), TreeError> {
        if self.refcount.load(Ordering::Acquire) > 1 {
            return Err(TreeError::RouteConflict);
        }
        *self.route.write().expect("lock poisoned") = Some(route);
        Ok(())
    }

    /// Current refcount value. `-1` means released, `0` unowned-but-live,
    /// positive is the live owner count.
    pub fn refcount(&self) -> i64 {
        self.refcount.load(Ordering::Acquire)
    }

    /// `acquire`: `c >= 0 -> c+1`; errors if the node was already released.
    pub fn acquire(&self) -> Result<i64, TreeError> {
        loop {
            let c = self.refcount.load(Ordering::Acquire);
            if c < 0 {
                return Err(TreeError::ReferenceCountError(
                    "acquire on a released node".to_string(),
                ));
            }
            if self
                .refcount
                .compare_exchange(c, c + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(c + 1);
            }
        }
    }

    /// `release_handle`: `c > 0 -> c-1`; if this crossed to 0, runs `on_release`.
    pub fn release_handle(&self) -> Result<i64, TreeError> {
        loop {
            let c = self.refcount.load(Ordering::Acquire);
            if c <= 0 {
                return Err(TreeError::ReferenceCountError(
                    "release_handle on a node with refcount <= 0".to_string(),
                ));
            }
            if self
                .refcount
                .compare_exchange(c, c - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if c - 1 == 0 {
                    self.on_release()?;
                }
                return Ok(c - 1);
            }
        }
    }

    /// `explicit_release`: only legal when `c == 0`; sets `c = -1` and runs `on_release`.
    pub fn explicit_release(&self) -> Result<(), TreeError> {
        if self
            .refcount
            .compare_exchange(0, -1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TreeError::ReferenceCountError(
                "explicit_release requires refcount == 0".to_string(),
            ));
        }
        self.on_release()
    }

    fn on_release(&self) -> Result<(), TreeError> {
        if let Variant::Internal(d) = &*self.variant.read().expect("lock poisoned") {
            for child in d.children.iter().flatten() {
                child.release_handle()?;
            }
        }
        Ok(())
    }

    /// `true` once this node's mutating operations are frozen (builder-style
    /// nodes become immutable once attached to a published tree).
    pub fn is_immutable(&self) -> bool {
        self.immutable.load(Ordering::Acquire)
    }

    /// Freezes this node against further mutation.
    pub fn set_immutable(&self, value: bool) {
        self.immutable.store(value, Ordering::Release);
    }

    /// `true` if this subtree's query-serving metadata has been pruned
    /// (Section 9's "archived" open question: hash-based diff still works,
    /// metadata-returning queries are refused).
    pub fn is_archived(&self) -> bool {
        self.archived.load(Ordering::Acquire)
    }

    /// Marks/unmarks this node as archived.
    pub fn set_archived(&self, value: bool) {
        self.archived.store(value, Ordering::Release);
    }

    /// Shallow clone used by fast-copy/path-copy: same class/version/bounds,
    /// children or payload cloned (children are `Arc` clones, so this does
    /// not deep-copy a subtree), refcount reset to 0, hash and route cleared.
    pub fn shallow_clone(&self) -> NodeHandle {
        let variant = match &*self.variant.read().expect("lock poisoned") {
            Variant::Leaf(p) => Variant::Leaf(p.clone_payload()),
            Variant::Internal(d) => Variant::Internal(InternalData {
                class_id: d.class_id,
                version: d.version,
                min_children: d.min_children,
                max_children: d.max_children,
                children: d.children.clone(),
            }),
        };
        let node = Arc::new(Node {
            variant: RwLock::new(variant),
            hash: RwLock::new(None),
            route: RwLock::new(None),
            refcount: AtomicI64::new(0),
            immutable: AtomicBool::new(false),
            archived: AtomicBool::new(self.archived.load(Ordering::Acquire)),
        });
        if let Variant::Internal(d) = &*node.variant.read().expect("lock poisoned") {
            for child in d.children.iter().flatten() {
                let _ = child.acquire();
            }
        }
        node
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("class_id", &self.class_id())
            .field("version", &self.version())
            .field("is_leaf", &self.is_leaf())
            .field("refcount", &self.refcount())
            .field("hash", &self.cached_hash())
            .finish()
    }
}
