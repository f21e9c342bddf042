//! The teacher: walks its tree depth-first, answering the learner's queries
//! (Section 4.4). Synchronous — exactly one lesson is ever in flight, so an
//! ordinary blocking `Read + Write` byte stream is all it needs; the
//! pipelined async side of the protocol lives entirely on the learner.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use htree_crypto::Cryptographer;
use htree_tree::{rehash, NodeHandle, Tree};
use htree_types::error::ReconcileError;
use htree_types::Hash;

use crate::custom_view::CustomViewRegistry;
use crate::message::{Lesson, Query};

/// Running counters for one [`Teacher::run`] call, useful for logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct TeachStats {
    pub lessons_sent: u64,
    pub leaf_payloads_sent: u64,
}

/// Drives the teacher's half of a reconciliation session over `stream`.
pub struct Teacher<'a, S> {
    stream: &'a mut S,
    crypto: &'a dyn Cryptographer,
    views: &'a dyn CustomViewRegistry,
}

impl<'a, S: Read + Write> Teacher<'a, S> {
    pub fn new(
        stream: &'a mut S,
        crypto: &'a dyn Cryptographer,
        views: &'a dyn CustomViewRegistry,
    ) -> Self {
        Self {
            stream,
            crypto,
            views,
        }
    }

    /// Runs one full session against `tree`: reads the learner's reported
    /// root hash and either confirms it already matches, or walks the tree
    /// sending lessons and answering the resulting queries until every
    /// mismatched subtree has crossed the wire.
    pub fn run(&mut self, tree: &Tree) -> Result<TeachStats, ReconcileError> {
        let mut stats = TeachStats::default();
        let their_root_hash = read_hash(self.stream)?;
        let our_root_hash = tree
            .root_hash()
            .unwrap_or_else(|| rehash(tree.root(), self.crypto));
        if their_root_hash == our_root_hash {
            write_lesson(self.stream, &Lesson::NodeIsUpToDate)?;
            stats.lessons_sent += 1;
            return Ok(stats);
        }
        self.teach_node(tree.root(), &mut stats)?;
        Ok(stats)
    }

    fn teach_node(&mut self, node: &NodeHandle, stats: &mut TeachStats) -> Result<(), ReconcileError> {
        if let Some((view_id, payload)) = self.views.export(node) {
            write_lesson(self.stream, &Lesson::CustomViewRoot { view_id, payload })?;
            stats.lessons_sent += 1;
            return Ok(());
        }

        if node.is_leaf() {
            let payload = node
                .leaf_payload_clone()
                .expect("is_leaf() implies a payload");
            write_lesson(
                self.stream,
                &Lesson::LeafData {
                    class_id: payload.class_id(),
                    version: payload.version(),
                    payload: payload.serialize(),
                },
            )?;
            stats.lessons_sent += 1;
            stats.leaf_payloads_sent += 1;
            return Ok(());
        }

        let children = node.children();
        let child_hashes: Vec<Hash> = children
            .iter()
            .map(|c| match c {
                Some(n) => n.cached_hash().unwrap_or_else(|| rehash(n, self.crypto)),
                None => self.crypto.null_sentinel(),
            })
            .collect();
        write_lesson(
            self.stream,
            &Lesson::InternalData {
                class_id: node.class_id(),
                version: node.version(),
                child_hashes,
            },
        )?;
        stats.lessons_sent += 1;

        for (i, child) in children.iter().enumerate() {
            match read_query(self.stream)? {
                Query::Have => {}
                Query::Need => match child {
                    Some(c) => self.teach_node(c, stats)?,
                    None => {
                        return Err(ReconcileError::UnexpectedRoute(format!(
                            "learner needs child {i}, which is null on the teacher's side"
                        )))
                    }
                },
            }
        }
        Ok(())
    }
}

fn read_hash<S: Read>(stream: &mut S) -> Result<Hash, ReconcileError> {
    let mut tag_buf = [0u8; 4];
    stream.read_exact(&mut tag_buf).map_err(ReconcileError::StreamIo)?;
    let tag = i32::from_be_bytes(tag_buf);
    let algorithm = htree_types::HashAlgorithm::from_wire_tag(tag)
        .ok_or_else(|| ReconcileError::Deserialize(format!("unknown hash algorithm tag {tag}")))?;
    let mut digest = vec![0u8; algorithm.digest_len()];
    stream.read_exact(&mut digest).map_err(ReconcileError::StreamIo)?;
    Ok(Hash::from_bytes(algorithm, digest))
}

fn write_lesson<S: Write>(stream: &mut S, lesson: &Lesson) -> Result<(), ReconcileError> {
    let bytes = lesson.encode();
    stream
        .write_u32::<BigEndian>(bytes.len() as u32)
        .map_err(ReconcileError::StreamIo)?;
    stream.write_all(&bytes).map_err(ReconcileError::StreamIo)
}

fn read_query<S: Read>(stream: &mut S) -> Result<Query, ReconcileError> {
    let byte = stream.read_u8().map_err(ReconcileError::StreamIo)?;
    Query::decode(byte)
}
