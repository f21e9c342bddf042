//! Pluggable "custom view" subtrees (the `CustomViewRoot` lesson): an
//! application-defined representation that stands in for a node's ordinary
//! leaf/internal shape for the purposes of reconciliation.

use htree_tree::NodeHandle;
use htree_types::error::ReconcileError;

/// Detects and (de)serializes custom-view subtrees during teaching/learning.
pub trait CustomViewRegistry: Send + Sync {
    /// If `node` should be taught as a custom view rather than its ordinary
    /// shape, returns the view id and its exported bytes.
    fn export(&self, node: &NodeHandle) -> Option<(u64, Vec<u8>)>;

    /// Reconstructs a node from a `CustomViewRoot` lesson's payload.
    fn import(&self, view_id: u64, payload: Vec<u8>) -> Result<NodeHandle, ReconcileError>;
}

/// The registry used when an application has not opted into any custom
/// views: every node is taught via its ordinary leaf/internal shape.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCustomViews;

impl CustomViewRegistry for NoCustomViews {
    fn export(&self, _node: &NodeHandle) -> Option<(u64, Vec<u8>)> {
        None
    }

    fn import(&self, view_id: u64, _payload: Vec<u8>) -> Result<NodeHandle, ReconcileError> {
        Err(ReconcileError::Deserialize(format!(
            "no custom view registered for view_id {view_id}"
        )))
    }
}
