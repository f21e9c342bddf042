//! `StreamObject`: the per-record shape the pipeline moves through its
//! sinks. A stream file's records are framed identically to a merkle leaf's
//! serialized payload (`class_id ∥ version ∥ payload`, Section 6), so
//! `StreamObject` deliberately mirrors `htree_tree::LeafPayload`'s shape
//! rather than inventing a second one.

use htree_types::Hash;

/// One object moving through the stream pipeline. Implementors supply the
/// wire framing (`class_id`, `version`, `payload`) and the wall-clock instant
/// that drives `TimestampStreamFileWriter`'s rotation decision.
pub trait StreamObject: Send {
    /// Registered class id for this object's payload shape.
    fn class_id(&self) -> u64;

    /// Wire version of this object's payload encoding.
    fn version(&self) -> u32;

    /// The object's serialized payload bytes.
    fn payload(&self) -> Vec<u8>;

    /// Milliseconds since epoch used to assign this object to a rotation
    /// window; typically the time the object was produced.
    fn timestamp_ms(&self) -> i64;
}

/// One object in flight through the sink chain, carrying the two slots a
/// downstream sink may fill in: the object's own content hash and the
/// running hash folded over every object seen so far on this chain.
///
/// A sink that doesn't need a slot simply leaves it as whatever the upstream
/// sink set it to (or `None`, for a chain with no `HashCalculator`/
/// `RunningHashCalculator` ahead of it).
pub struct Envelope<T> {
    pub object: T,
    pub hash: Option<Hash>,
    pub running_hash: Option<Hash>,
}

impl<T> Envelope<T> {
    /// Wraps `object` with both hash slots empty, the state a fresh object
    /// enters the pipeline in.
    pub fn new(object: T) -> Self {
        Self {
            object,
            hash: None,
            running_hash: None,
        }
    }
}

impl<T: StreamObject> StreamObject for Envelope<T> {
    fn class_id(&self) -> u64 {
        self.object.class_id()
    }
    fn version(&self) -> u32 {
        self.object.version()
    }
    fn payload(&self) -> Vec<u8> {
        self.object.payload()
    }
    fn timestamp_ms(&self) -> i64 {
        self.object.timestamp_ms()
    }
}
