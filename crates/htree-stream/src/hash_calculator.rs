//! `HashCalculator`: fills in an object's content hash before forwarding it,
//! so every downstream sink (a `RunningHashCalculator`, a file writer) can
//! assume `envelope.hash` is already populated rather than recomputing it.

use std::sync::Arc;

use htree_crypto::Cryptographer;
use htree_types::error::StreamError;
use htree_types::Hash;

use crate::object::{Envelope, StreamObject};
use crate::sink::Sink;

/// The canonical content hash of a stream object: `digest(class_id ∥ version
/// ∥ payload)` (Section 4.8). Shared by [`HashCalculator`] and the fallback
/// paths in [`crate::running_hash_calculator::RunningHashCalculator`] and
/// [`crate::file_writer::TimestampStreamFileWriter`] so an object's content
/// hash is the same value no matter which sink in the chain computes it
/// first — the verification iterator recomputes this same preimage from the
/// bytes on disk and must agree with whichever sink wrote them.
pub fn content_hash<T: StreamObject>(crypto: &dyn Cryptographer, object: &T) -> Hash {
    let payload = object.payload();
    let mut preimage = Vec::with_capacity(8 + 4 + payload.len());
    preimage.extend_from_slice(&object.class_id().to_be_bytes());
    preimage.extend_from_slice(&object.version().to_be_bytes());
    preimage.extend_from_slice(&payload);
    crypto.digest(&preimage)
}

/// Computes [`content_hash`] for each object that doesn't already carry a
/// hash, then forwards to `downstream`.
pub struct HashCalculator<T, D> {
    crypto: Arc<dyn Cryptographer>,
    downstream: D,
    _marker: std::marker::PhantomData<T>,
}

impl<T, D> HashCalculator<T, D>
where
    T: StreamObject,
    D: Sink<T>,
{
    pub fn new(crypto: Arc<dyn Cryptographer>, downstream: D) -> Self {
        Self {
            crypto,
            downstream,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, D> Sink<T> for HashCalculator<T, D>
where
    T: StreamObject,
    D: Sink<T>,
{
    fn on_object(&mut self, mut envelope: Envelope<T>) -> Result<(), StreamError> {
        if envelope.hash.is_none() {
            envelope.hash = Some(content_hash(self.crypto.as_ref(), &envelope.object));
        }
        self.downstream.on_object(envelope)
    }

    fn set_running_hash(&mut self, hash: Hash) {
        self.downstream.set_running_hash(hash);
    }

    fn clear(&mut self) {
        self.downstream.clear();
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.downstream.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use htree_crypto::Sha384Cryptographer;

    struct Obj(Vec<u8>);
    impl StreamObject for Obj {
        fn class_id(&self) -> u64 {
            7
        }
        fn version(&self) -> u32 {
            1
        }
        fn payload(&self) -> Vec<u8> {
            self.0.clone()
        }
        fn timestamp_ms(&self) -> i64 {
            0
        }
    }

    struct Capture(Vec<Envelope<Obj>>);
    impl Sink<Obj> for Capture {
        fn on_object(&mut self, envelope: Envelope<Obj>) -> Result<(), StreamError> {
            self.0.push(envelope);
            Ok(())
        }
        fn set_running_hash(&mut self, _hash: Hash) {}
        fn clear(&mut self) {}
        fn close(&mut self) -> Result<(), StreamError> {
            Ok(())
        }
    }

    #[test]
    fn fills_hash_when_absent() {
        let mut calc = HashCalculator::new(Arc::new(Sha384Cryptographer), Capture(Vec::new()));
        calc.on_object(Envelope::new(Obj(b"payload".to_vec()))).unwrap();
        assert!(calc.downstream.0[0].hash.is_some());
    }

    #[test]
    fn leaves_an_existing_hash_untouched() {
        let mut calc = HashCalculator::new(Arc::new(Sha384Cryptographer), Capture(Vec::new()));
        let preset = Sha384Cryptographer.digest(b"preset");
        let mut envelope = Envelope::new(Obj(b"payload".to_vec()));
        envelope.hash = Some(preset.clone());
        calc.on_object(envelope).unwrap();
        assert_eq!(calc.downstream.0[0].hash, Some(preset));
    }
}
