//! The persistent, reference-counted, cryptographically-hashed merkle state
//! tree: node model, traversal, bulk rehashing, self-describing
//! serialization, and structural diff (Sections 4.1-4.3 of the design).
//!
//! Tree reconciliation (teacher/learner, Section 4.4) lives in the sibling
//! `htree-reconcile` crate, which depends on this one for the node/route/
//! serialization primitives.
//!
//! Node-internal locks are only ever poisoned by an earlier panic inside the
//! same node's own accessors, so lock accessors use `expect("lock poisoned")`
//! rather than threading a recovery path through every call site.

pub mod class_registry;
pub mod node;
pub mod rehash;
pub mod serialize;
pub mod traversal;
pub mod tree;

pub use class_registry::{ClassRegistry, NodeClass};
pub use node::{LeafPayload, Node, NodeHandle};
pub use rehash::rehash;
pub use tree::{diff, DiffEntry, Tree};
