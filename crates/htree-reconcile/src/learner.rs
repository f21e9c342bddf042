//! The learner: asynchronously pulls lessons from the teacher and applies
//! them against its own tree, pipelining reads ahead of where the recursive
//! comparison has gotten to via a bounded "anticipated"/"received" queue
//! pair (Section 4.4). FIFO queue order, not message ids, is what keeps a
//! `Lesson` matched to the query that asked for it.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use htree_crypto::Cryptographer;
use htree_tree::{rehash, ClassRegistry, Node, NodeHandle, Tree};
use htree_types::error::ReconcileError;
use htree_types::{Hash, Route};

use crate::custom_view::CustomViewRegistry;
use crate::message::{Lesson, Query};

/// A placeholder pushed onto the anticipated queue: the reader task doesn't
/// need to know anything about what's expected next, only that exactly one
/// more `Lesson` is coming.
struct Anticipated;

struct ReaderHandle {
    anticipated_tx: mpsc::Sender<Anticipated>,
    received_rx: mpsc::Receiver<Result<Lesson, ReconcileError>>,
    task: JoinHandle<()>,
}

fn spawn_reader<R>(mut reader: R, anticipated_capacity: usize, received_capacity: usize) -> ReaderHandle
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (anticipated_tx, mut anticipated_rx) = mpsc::channel::<Anticipated>(anticipated_capacity);
    let (received_tx, received_rx) = mpsc::channel(received_capacity);
    let task = tokio::spawn(async move {
        while anticipated_rx.recv().await.is_some() {
            let result = read_lesson_async(&mut reader).await;
            let is_err = result.is_err();
            if received_tx.send(result).await.is_err() || is_err {
                break;
            }
        }
    });
    ReaderHandle {
        anticipated_tx,
        received_rx,
        task,
    }
}

async fn read_lesson_async<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Lesson, ReconcileError> {
    let len = reader.read_u32().await.map_err(ReconcileError::StreamIo)? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(ReconcileError::StreamIo)?;
    Lesson::decode(&buf)
}

async fn write_query_async<W: AsyncWrite + Unpin>(
    writer: &mut W,
    query: Query,
) -> Result<(), ReconcileError> {
    writer
        .write_u8(query.encode())
        .await
        .map_err(ReconcileError::StreamIo)
}

async fn write_hash_async<W: AsyncWrite + Unpin>(
    writer: &mut W,
    hash: &Hash,
) -> Result<(), ReconcileError> {
    writer
        .write_all(&hash.wire_encode())
        .await
        .map_err(ReconcileError::StreamIo)
}

/// Drives one reconciliation session from the learner's side against an
/// existing local tree, producing an updated [`Tree`] whose matching
/// subtrees are shared (by refcount) with the original rather than rebuilt.
pub struct Learner<'a, W> {
    writer: W,
    reader: ReaderHandle,
    registry: &'a ClassRegistry,
    crypto: &'a dyn Cryptographer,
    views: &'a dyn CustomViewRegistry,
    read_timeout: Duration,
    /// Nodes built during this session that are not yet attached to a
    /// finalized parent. Released on cancellation so nothing sits leaked at
    /// refcount 0 (Section 4.4's cancellation cleanup).
    pending: Vec<NodeHandle>,
}

impl<'a, W> Learner<'a, W>
where
    W: AsyncWrite + Unpin,
{
    /// Builds a learner session over a stream already split into its read
    /// and write halves.
    #[allow(clippy::too_many_arguments)]
    pub fn new<R>(
        reader: R,
        writer: W,
        registry: &'a ClassRegistry,
        crypto: &'a dyn Cryptographer,
        views: &'a dyn CustomViewRegistry,
        anticipated_capacity: usize,
        received_capacity: usize,
        read_timeout: Duration,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self {
            writer,
            reader: spawn_reader(reader, anticipated_capacity, received_capacity),
            registry,
            crypto,
            views,
            read_timeout,
            pending: Vec::new(),
        }
    }

    /// Runs the full session: reports `local_tree`'s root hash, then either
    /// accepts the teacher's confirmation that it is already up to date or
    /// recursively applies the lessons that follow.
    pub async fn learn(mut self, local_tree: &Tree) -> Result<Tree, ReconcileError> {
        let local_root_hash = local_tree
            .root_hash()
            .unwrap_or_else(|| local_tree.rehash(self.crypto));
        if let Err(e) = write_hash_async(&mut self.writer, &local_root_hash).await {
            self.cancel().await;
            return Err(e);
        }
        match self.run_inner(local_tree).await {
            Ok(tree) => Ok(tree),
            Err(e) => {
                self.cancel().await;
                Err(e)
            }
        }
    }

    async fn run_inner(&mut self, local_tree: &Tree) -> Result<Tree, ReconcileError> {
        let lesson = self.next_lesson().await?;
        match lesson {
            Lesson::NodeIsUpToDate => local_tree.fast_copy().map_err(ReconcileError::Tree),
            other => {
                let new_root = self
                    .apply_lesson(Route::root(), Some(local_tree.root().clone()), other)
                    .await?;
                Tree::new(new_root).map_err(ReconcileError::Tree)
            }
        }
    }

    /// Registers one more expected read, then blocks (with the configured
    /// timeout) for its result. A timeout is fatal to the session.
    async fn next_lesson(&mut self) -> Result<Lesson, ReconcileError> {
        self.reader
            .anticipated_tx
            .send(Anticipated)
            .await
            .map_err(|_| ReconcileError::Cancelled)?;
        tokio::time::timeout(self.read_timeout, self.reader.received_rx.recv())
            .await
            .map_err(|_| ReconcileError::Timeout(self.read_timeout))?
            .ok_or(ReconcileError::Cancelled)?
    }

    fn apply_lesson(
        &mut self,
        route: Route,
        local_node: Option<NodeHandle>,
        lesson: Lesson,
    ) -> Pin<Box<dyn Future<Output = Result<NodeHandle, ReconcileError>> + '_>> {
        Box::pin(async move {
            match lesson {
                Lesson::NodeIsUpToDate => local_node.ok_or_else(|| {
                    ReconcileError::UnexpectedRoute(format!(
                        "{route:?} has no local subtree to reuse"
                    ))
                }),
                Lesson::LeafData {
                    class_id,
                    version,
                    payload,
                } => {
                    let payload = self
                        .registry
                        .require(class_id)?
                        .read_leaf_payload(version, payload)?;
                    let node = Node::new_leaf(payload);
                    self.pending.push(node.clone());
                    Ok(node)
                }
                Lesson::InternalData {
                    class_id,
                    version,
                    child_hashes,
                } => {
                    let null_hash = self.crypto.null_sentinel();
                    let mut new_children = Vec::with_capacity(child_hashes.len());
                    for (i, teacher_hash) in child_hashes.iter().enumerate() {
                        let local_child = local_node.as_ref().and_then(|n| n.child(i));
                        let matches = match &local_child {
                            Some(n) => {
                                &n.cached_hash().unwrap_or_else(|| rehash(n, self.crypto)) == teacher_hash
                            }
                            None => teacher_hash == &null_hash,
                        };
                        if matches {
                            write_query_async(&mut self.writer, Query::Have).await?;
                            new_children.push(local_child);
                        } else {
                            write_query_async(&mut self.writer, Query::Need).await?;
                            let child_lesson = self.next_lesson().await?;
                            let child_node = self
                                .apply_lesson(route.child(i as u32), local_child, child_lesson)
                                .await?;
                            new_children.push(Some(child_node));
                        }
                    }
                    let node = self
                        .registry
                        .require(class_id)?
                        .finalize_internal(version, new_children)?;
                    self.pending.push(node.clone());
                    Ok(node)
                }
                Lesson::CustomViewRoot { view_id, payload } => {
                    let node = self.views.import(view_id, payload)?;
                    self.pending.push(node.clone());
                    Ok(node)
                }
            }
        })
    }

    /// Force-closes the write half (unblocking any in-flight blocking read
    /// on the teacher's side), stops the reader task, and releases every
    /// node built during this session that never made it into a finished
    /// root. A node already attached to some still-orphaned ancestor is
    /// released transitively when that ancestor is (its own refcount is 1,
    /// not 0, so the loop below skips it directly).
    async fn cancel(&mut self) {
        let _ = self.writer.shutdown().await;
        self.reader.task.abort();
        for node in self.pending.drain(..) {
            if node.refcount() == 0 {
                let _ = node.explicit_release();
            }
        }
    }
}
