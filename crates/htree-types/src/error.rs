//! Error taxonomy shared by the htree crates.
//!
//! Every public error enum implements [`ErrorCode`], giving it a stable string
//! discriminant independent of its `Display` message, so structured logs and
//! integration callers can match on error class without downcasting. The
//! variant doc comments tag which of the five buckets from the error-handling
//! design each variant belongs to: Invariant (`INV_`), Integrity (`INT_`),
//! Reconciliation (`REC_`), Transient (`TRN_`), Resource (`RES_`).

use thiserror::Error;

/// Assigns a stable, machine-readable string code to an error value.
pub trait ErrorCode {
    /// The unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors raised by the merkle node model and tree operations (Sections 4.1-4.3).
#[derive(Debug, Error)]
pub enum TreeError {
    /// Invariant: a child index fell outside an internal node's declared `[min, max]` range.
    #[error("illegal child index: expected [{lo}, {hi}], got {got}")]
    IllegalChildIndex {
        /// Minimum legal child index for this node's class/version.
        lo: u32,
        /// Maximum legal child index (inclusive) for this node's class/version.
        hi: u32,
        /// The index that was actually supplied.
        got: u32,
    },
    /// Invariant: a child was set to a node whose type does not match what the
    /// internal node's class/version expects at that index.
    #[error("illegal child type at index {index}: expected {expected}, got {actual}")]
    IllegalChildType {
        /// The child slot being assigned.
        index: u32,
        /// The type name the slot requires.
        expected: &'static str,
        /// The type name actually supplied.
        actual: &'static str,
    },
    /// Invariant: a node with refcount > 1 cannot have its route mutated; the
    /// caller must fast-copy first.
    #[error("route conflict: node is shared (refcount > 1) and its route cannot be moved")]
    RouteConflict,
    /// Invariant: an `acquire`/`release_handle`/`explicit_release` call violated
    /// the refcount state machine (e.g. releasing an already-released node).
    #[error("reference count error: {0}")]
    ReferenceCountError(String),
    /// Invariant: the node's declared child count fell outside `[min, max]` for
    /// its class/version during whole-tree deserialization.
    #[error("max child count exceeded: max {max}, declared {declared}")]
    MaxChildCountExceeded {
        /// Maximum legal child count.
        max: u32,
        /// The count declared in the serialized stream.
        declared: u32,
    },
    /// Integrity: no constructor is registered for this `class_id` in the
    /// `ClassRegistry` used for this deserialization.
    #[error("class_id {0:#x} is not registered")]
    ClassNotRegistered(u64),
    /// Integrity: the serialized stream ended before the expected number of
    /// children or bytes were read.
    #[error("unexpected end of stream while decoding")]
    UnexpectedEof,
    /// Archived subtrees refuse metadata-returning queries (Section 9, open question);
    /// this is not fatal, it signals the caller to fall back to hash-only handling.
    #[error("node at this route is archived; metadata queries are refused")]
    Archived,
}

impl ErrorCode for TreeError {
    fn code(&self) -> &'static str {
        match self {
            Self::IllegalChildIndex { .. } => "INV_ILLEGAL_CHILD_INDEX",
            Self::IllegalChildType { .. } => "INV_ILLEGAL_CHILD_TYPE",
            Self::RouteConflict => "INV_ROUTE_CONFLICT",
            Self::ReferenceCountError(_) => "INV_REFCOUNT_ERROR",
            Self::MaxChildCountExceeded { .. } => "INV_MAX_CHILD_COUNT_EXCEEDED",
            Self::ClassNotRegistered(_) => "INT_CLASS_NOT_REGISTERED",
            Self::UnexpectedEof => "INT_UNEXPECTED_EOF",
            Self::Archived => "INT_ARCHIVED_NODE",
        }
    }
}

/// Errors raised by `DiskHashMap`, `DiskKvStore`, and the data-file collection
/// (Sections 4.5-4.7).
#[derive(Debug, Error)]
pub enum StorageError {
    /// Invariant: a write session was attempted while one was already open, or
    /// a mutating call arrived from a thread other than the one that opened it.
    #[error("write session thread affinity violated: opened by {opened_by:?}, called from {called_from:?}")]
    ThreadAffinity {
        /// Thread id that called `begin_writing`.
        opened_by: std::thread::ThreadId,
        /// Thread id of the offending call.
        called_from: std::thread::ThreadId,
    },
    /// Invariant: a write-session method was called while the session state
    /// machine was not in the state that permits it.
    #[error("invalid write session transition: in state {state}, called {operation}")]
    InvalidSessionState {
        /// The session's current state name.
        state: &'static str,
        /// The operation that was attempted.
        operation: &'static str,
    },
    /// Invariant: `snapshot_begin` was called while a snapshot was already in progress.
    #[error("a snapshot is already in progress")]
    SnapshotInProgress,
    /// Resource: the map has reached a configured hard capacity.
    #[error("map is full")]
    MapFull,
    /// Integrity: a data file's header or bucket record failed a structural check.
    #[error("corrupt file {file}: {reason}")]
    CorruptFile {
        /// Name of the offending file.
        file: String,
        /// What failed to parse or validate.
        reason: String,
    },
    /// Transient: a merge's optimistic CAS against the index lost to a concurrent
    /// writer and should be retried or the entry dropped, per caller policy.
    #[error("merge aborted: {0}")]
    MergeAborted(String),
    /// The requested key does not exist.
    #[error("key not found")]
    NotFound,
    /// Resource: an I/O operation against the backing files failed.
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorCode for StorageError {
    fn code(&self) -> &'static str {
        match self {
            Self::ThreadAffinity { .. } => "INV_THREAD_AFFINITY",
            Self::InvalidSessionState { .. } => "INV_SESSION_STATE",
            Self::SnapshotInProgress => "INV_SNAPSHOT_IN_PROGRESS",
            Self::MapFull => "RES_MAP_FULL",
            Self::CorruptFile { .. } => "INT_CORRUPT_FILE",
            Self::MergeAborted(_) => "TRN_MERGE_ABORTED",
            Self::NotFound => "STORAGE_NOT_FOUND",
            Self::Io(_) => "RES_STORAGE_IO",
        }
    }
}

/// Errors raised by the teacher/learner tree-reconciliation protocol (Section 4.4).
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Reconciliation: the underlying byte stream returned an I/O error.
    #[error("reconciliation stream io error: {0}")]
    StreamIo(#[from] std::io::Error),
    /// Reconciliation: a `Lesson` message failed to deserialize.
    #[error("failed to deserialize lesson message: {0}")]
    Deserialize(String),
    /// Reconciliation: a configured per-read timeout fired before a response arrived.
    #[error("timed out waiting for a response after {0:?}")]
    Timeout(std::time::Duration),
    /// Reconciliation: the session was cancelled; pending anticipated messages
    /// were drained and released.
    #[error("reconciliation session cancelled")]
    Cancelled,
    /// Invariant: the learner received a lesson for a route it never queried.
    #[error("received lesson for unexpected route: {0:?}")]
    UnexpectedRoute(String),
    /// Passthrough: a node-model operation (e.g. `finalize_internal`,
    /// `explicit_release` during cancellation cleanup) failed while applying
    /// a lesson.
    #[error("tree error during reconciliation: {0}")]
    Tree(#[from] TreeError),
}

impl ErrorCode for ReconcileError {
    fn code(&self) -> &'static str {
        match self {
            Self::StreamIo(_) => "REC_STREAM_IO",
            Self::Deserialize(_) => "REC_DESERIALIZE",
            Self::Timeout(_) => "REC_TIMEOUT",
            Self::Cancelled => "REC_CANCELLED",
            Self::UnexpectedRoute(_) => "INV_UNEXPECTED_ROUTE",
            Self::Tree(_) => "REC_TREE_ERROR",
        }
    }
}

/// Errors raised by the object stream pipeline and verification iterator (Sections 4.8, 4.10).
#[derive(Debug, Error)]
pub enum StreamError {
    /// Integrity: the running-hash chain between two rotated files did not match;
    /// surfaced before any further object is yielded.
    #[error("invalid hash chain: file {file} end-hash did not match next file's start-hash")]
    InvalidChain {
        /// The file whose end-hash failed to match.
        file: String,
    },
    /// Invariant: `MultiStream` was constructed with zero downstream sinks.
    #[error("MultiStream requires at least one downstream sink")]
    EmptyMultiStream,
    /// Transient: a blocking `on_object` call on a `QueueThreadStream` was interrupted.
    #[error("queue stream interrupted")]
    Interrupted,
    /// Invariant: `stop()` was called from the worker thread itself, which would deadlock.
    #[error("QueueThreadStream::stop called from its own worker thread")]
    StopFromWorkerThread,
    /// Resource: the underlying stream file or signature file could not be written.
    #[error("stream io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorCode for StreamError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidChain { .. } => "INT_INVALID_CHAIN",
            Self::EmptyMultiStream => "INV_EMPTY_MULTISTREAM",
            Self::Interrupted => "TRN_INTERRUPTED",
            Self::StopFromWorkerThread => "INV_STOP_FROM_WORKER_THREAD",
            Self::Io(_) => "RES_STREAM_IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(TreeError::RouteConflict.code(), "INV_ROUTE_CONFLICT");
        assert_eq!(StorageError::MapFull.code(), "RES_MAP_FULL");
        assert_eq!(
            ReconcileError::Cancelled.code(),
            "REC_CANCELLED"
        );
        assert_eq!(
            StreamError::EmptyMultiStream.code(),
            "INV_EMPTY_MULTISTREAM"
        );
    }
}
