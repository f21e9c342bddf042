//! Bulk rehashing: a post-order traversal that computes and caches a hash for
//! every node whose cache is currently empty (Section 4.1). Sibling subtrees
//! are rehashed in parallel via `rayon` once the fan-out is wide enough to be
//! worth the overhead, mirroring the teacher's batch-hashing structure for
//! the jellyfish tree (`tree/jellyfish/tree.rs`).

use htree_crypto::Cryptographer;
use htree_types::Hash;
use rayon::prelude::*;

use crate::node::NodeHandle;

/// Below this many children, rehashing a node's subtrees sequentially avoids
/// the overhead of spinning up rayon's work-stealing machinery for no benefit.
const PARALLEL_FANOUT_THRESHOLD: usize = 4;

/// Recomputes and returns the hash of `root`, recursing into any child whose
/// cache is empty. Nodes whose hash is already cached are returned as-is
/// (the "lazy rehash" semantics the data model requires): a mutation
/// invalidates exactly the nodes on its path, so only those are ever redone.
pub fn rehash(root: &NodeHandle, crypto: &dyn Cryptographer) -> Hash {
    if let Some(h) = root.cached_hash() {
        return h;
    }

    let hash = if root.is_leaf() {
        let payload = root
            .leaf_payload_clone()
            .expect("is_leaf() implies a payload is present");
        let mut preimage = Vec::new();
        preimage.extend_from_slice(&payload.class_id().to_be_bytes());
        preimage.extend_from_slice(&payload.version().to_be_bytes());
        preimage.extend_from_slice(&payload.serialize());
        crypto.digest(&preimage)
    } else {
        let children = root.children();
        let child_hashes: Vec<Hash> = if children.len() >= PARALLEL_FANOUT_THRESHOLD {
            children
                .par_iter()
                .map(|c| match c {
                    Some(child) => rehash(child, crypto),
                    None => crypto.null_sentinel(),
                })
                .collect()
        } else {
            children
                .iter()
                .map(|c| match c {
                    Some(child) => rehash(child, crypto),
                    None => crypto.null_sentinel(),
                })
                .collect()
        };
        let mut preimage = Vec::new();
        preimage.extend_from_slice(&root.class_id().to_be_bytes());
        preimage.extend_from_slice(&root.version().to_be_bytes());
        for h in &child_hashes {
            preimage.extend_from_slice(h.as_bytes());
        }
        crypto.digest(&preimage)
    };

    root.set_cached_hash(hash.clone());
    tracing::trace!(class_id = root.class_id(), "rehashed node");
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{LeafPayload, Node};
    use htree_crypto::Sha384Cryptographer;

    #[derive(Debug, Clone)]
    struct Payload(Vec<u8>);
    impl LeafPayload for Payload {
        fn class_id(&self) -> u64 {
            7
        }
        fn version(&self) -> u32 {
            1
        }
        fn serialize(&self) -> Vec<u8> {
            self.0.clone()
        }
        fn clone_payload(&self) -> Box<dyn LeafPayload> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn binary_tree_hash_matches_literal_scenario() {
        let crypto = Sha384Cryptographer;
        let l1 = Node::new_leaf(Box::new(Payload(vec![0x01])));
        let l2 = Node::new_leaf(Box::new(Payload(vec![0x02])));
        let internal = Node::new_internal(9, 1, 2, 2, 2);
        internal.set_child(0, Some(l1.clone())).unwrap();
        internal.set_child(1, Some(l2.clone())).unwrap();

        let root_hash = rehash(&internal, &crypto);

        let h1 = crypto.digest(
            &[
                7u64.to_be_bytes().as_slice(),
                1u32.to_be_bytes().as_slice(),
                &[0x01],
            ]
            .concat(),
        );
        let h2 = crypto.digest(
            &[
                7u64.to_be_bytes().as_slice(),
                1u32.to_be_bytes().as_slice(),
                &[0x02],
            ]
            .concat(),
        );
        let expected = crypto.digest(
            &[
                9u64.to_be_bytes().as_slice(),
                1u32.to_be_bytes().as_slice(),
                h1.as_bytes(),
                h2.as_bytes(),
            ]
            .concat(),
        );
        assert_eq!(root_hash, expected);
    }

    #[test]
    fn same_bytes_same_hash_different_bytes_different_hash() {
        let crypto = Sha384Cryptographer;
        let l1 = Node::new_leaf(Box::new(Payload(vec![0x01])));
        let l2 = Node::new_leaf(Box::new(Payload(vec![0x02])));
        let internal = Node::new_internal(9, 1, 2, 2, 2);
        internal.set_child(0, Some(l1)).unwrap();
        internal.set_child(1, Some(l2)).unwrap();
        let before = rehash(&internal, &crypto);

        internal.set_child(1, Some(Node::new_leaf(Box::new(Payload(vec![0x02])))))
            .unwrap();
        let same_bytes = rehash(&internal, &crypto);
        assert_eq!(before, same_bytes);

        internal.set_child(1, Some(Node::new_leaf(Box::new(Payload(vec![0x03])))))
            .unwrap();
        let different_bytes = rehash(&internal, &crypto);
        assert_ne!(before, different_bytes);
    }

    #[test]
    fn lazy_rehash_skips_cached_nodes() {
        let crypto = Sha384Cryptographer;
        let l1 = Node::new_leaf(Box::new(Payload(vec![0x01])));
        let internal = Node::new_internal(9, 1, 1, 1, 1);
        internal.set_child(0, Some(l1.clone())).unwrap();
        rehash(&internal, &crypto);
        let cached_leaf_hash = l1.cached_hash().unwrap();

        // mutate the leaf directly without going through the tree so its
        // cache is cleared but the internal's is not touched by us here
        l1.set_payload(Box::new(Payload(vec![0xFF]))).unwrap();
        assert!(l1.cached_hash().is_none());
        let new_leaf_hash = rehash(&l1, &crypto);
        assert_ne!(cached_leaf_hash, new_leaf_hash);
    }
}
