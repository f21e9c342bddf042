//! `ClassRegistry`: an explicit, per-call value mapping `class_id -> constructor`
//! (Section 9's re-architecture note) rather than the teacher-language pattern
//! of a process-wide static registry. Threaded through every deserialization
//! call that needs to turn `class_id ∥ version ∥ bytes` back into a node.

use std::sync::Arc;

use ahash::AHashMap;
use htree_types::error::TreeError;

use crate::node::{LeafPayload, NodeHandle};

/// Describes one registered node class: whether it is a leaf or internal
/// shape, and how to reconstruct it from deserialized parts.
pub trait NodeClass: Send + Sync {
    /// The class id this descriptor answers for.
    fn class_id(&self) -> u64;

    /// `true` if this class builds leaf nodes; `false` for internal nodes.
    fn is_leaf(&self) -> bool;

    /// Minimum legal child count (internal classes only).
    fn min_children(&self) -> u32 {
        0
    }

    /// Maximum legal child count (internal classes only).
    fn max_children(&self) -> u32 {
        0
    }

    /// Reconstructs a leaf payload from its raw serialized bytes. Only
    /// called for classes where [`NodeClass::is_leaf`] is `true`.
    fn read_leaf_payload(
        &self,
        version: u32,
        bytes: Vec<u8>,
    ) -> Result<Box<dyn LeafPayload>, TreeError>;

    /// Builds the finished internal node once all of its children have been
    /// deserialized, running any application-level initialization (the
    /// "finalize hook" of Section 4.3). Only called for classes where
    /// [`NodeClass::is_leaf`] is `false`.
    fn finalize_internal(
        &self,
        version: u32,
        children: Vec<Option<NodeHandle>>,
    ) -> Result<NodeHandle, TreeError>;
}

/// Maps `class_id -> NodeClass`, threaded explicitly through every
/// serialization/deserialization call rather than held as global state.
#[derive(Clone, Default)]
pub struct ClassRegistry {
    classes: AHashMap<u64, Arc<dyn NodeClass>>,
}

impl ClassRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            classes: AHashMap::new(),
        }
    }

    /// Registers a class descriptor, replacing any prior registration under
    /// the same `class_id`.
    pub fn register(&mut self, class: Arc<dyn NodeClass>) {
        self.classes.insert(class.class_id(), class);
    }

    /// Looks up a class descriptor by id.
    pub fn get(&self, class_id: u64) -> Option<&Arc<dyn NodeClass>> {
        self.classes.get(&class_id)
    }

    /// Looks up a class descriptor, failing with `ClassNotRegistered` if absent.
    pub fn require(&self, class_id: u64) -> Result<&Arc<dyn NodeClass>, TreeError> {
        self.get(class_id)
            .ok_or(TreeError::ClassNotRegistered(class_id))
    }
}
