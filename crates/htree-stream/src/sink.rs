//! `Sink`: the interface every stage of the object stream pipeline
//! implements (Section 4.8). Sinks compose by wrapping one another —
//! `HashCalculator` and `RunningHashCalculator` fill in an [`Envelope`]'s
//! slots before forwarding to whatever sink they wrap.

use htree_types::error::StreamError;
use htree_types::Hash;

use crate::object::{Envelope, StreamObject};

/// A stage in the object stream pipeline.
pub trait Sink<T: StreamObject>: Send {
    /// Accepts the next object. May block (a `QueueThreadStream` blocks the
    /// caller when its queue is full).
    fn on_object(&mut self, object: Envelope<T>) -> Result<(), StreamError>;

    /// Primes this sink's notion of the running hash so far, used when a
    /// pipeline is rebuilt after a restart and must resume a chain rather
    /// than starting a new one.
    fn set_running_hash(&mut self, hash: Hash);

    /// Resets any accumulated state (e.g. a running hash) back to empty,
    /// without closing the sink.
    fn clear(&mut self);

    /// Flushes and releases any resources this sink owns. After `close`,
    /// further `on_object` calls are not expected to succeed.
    fn close(&mut self) -> Result<(), StreamError>;
}
