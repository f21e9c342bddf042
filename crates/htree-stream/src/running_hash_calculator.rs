//! `RunningHashCalculator`: folds each object's content hash into a running
//! hash chain (`H_n = digest(H_{n-1} ∥ hash(object_n))`), so a reader of the
//! resulting stream file can verify the whole sequence without re-deriving
//! every object's hash itself.

use std::sync::Arc;

use htree_crypto::Cryptographer;
use htree_types::error::StreamError;
use htree_types::Hash;

use crate::hash_calculator::content_hash;
use crate::object::{Envelope, StreamObject};
use crate::sink::Sink;

/// Maintains the running hash across every object passed through, filling in
/// `envelope.running_hash` before forwarding to `downstream`. Requires
/// `envelope.hash` to already be populated (place a `HashCalculator`
/// upstream).
pub struct RunningHashCalculator<T, D> {
    crypto: Arc<dyn Cryptographer>,
    running: Option<Hash>,
    downstream: D,
    _marker: std::marker::PhantomData<T>,
}

impl<T, D> RunningHashCalculator<T, D>
where
    T: StreamObject,
    D: Sink<T>,
{
    pub fn new(crypto: Arc<dyn Cryptographer>, downstream: D) -> Self {
        Self {
            crypto,
            running: None,
            downstream,
            _marker: std::marker::PhantomData,
        }
    }

    /// The running hash as of the last object seen, or `None` if nothing has
    /// passed through yet.
    pub fn current(&self) -> Option<&Hash> {
        self.running.as_ref()
    }
}

impl<T, D> Sink<T> for RunningHashCalculator<T, D>
where
    T: StreamObject,
    D: Sink<T>,
{
    fn on_object(&mut self, mut envelope: Envelope<T>) -> Result<(), StreamError> {
        let object_hash = envelope
            .hash
            .clone()
            .unwrap_or_else(|| content_hash(self.crypto.as_ref(), &envelope.object));
        let next = self.crypto.running_hash(self.running.as_ref(), &object_hash);
        self.running = Some(next.clone());
        envelope.running_hash = Some(next);
        self.downstream.on_object(envelope)
    }

    fn set_running_hash(&mut self, hash: Hash) {
        self.running = Some(hash.clone());
        self.downstream.set_running_hash(hash);
    }

    fn clear(&mut self) {
        self.running = None;
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

    fn envelope_with_hash(crypto: &Sha384Cryptographer, bytes: &[u8]) -> Envelope<Obj> {
        let mut e = Envelope::new(Obj(bytes.to_vec()));
        e.hash = Some(crypto.digest(bytes));
        e
    }

    #[test]
    fn chains_running_hash_across_objects() {
        let crypto = Sha384Cryptographer;
        let mut calc = RunningHashCalculator::new(Arc::new(crypto), Capture(Vec::new()));
        calc.on_object(envelope_with_hash(&crypto, b"one")).unwrap();
        calc.on_object(envelope_with_hash(&crypto, b"two")).unwrap();

        let h1 = calc.downstream.0[0].running_hash.clone().unwrap();
        let h2 = calc.downstream.0[1].running_hash.clone().unwrap();
        assert_ne!(h1, h2);

        let expected_h1 = crypto.running_hash(None, &crypto.digest(b"one"));
        assert_eq!(h1, expected_h1);
    }

    #[test]
    fn set_running_hash_resumes_a_prior_chain() {
        let crypto = Sha384Cryptographer;
        let mut calc = RunningHashCalculator::new(Arc::new(crypto), Capture(Vec::new()));
        let resume_point = crypto.digest(b"resume-from-here");
        calc.set_running_hash(resume_point.clone());
        calc.on_object(envelope_with_hash(&crypto, b"next")).unwrap();

        let expected = crypto.running_hash(Some(&resume_point), &crypto.digest(b"next"));
        assert_eq!(calc.downstream.0[0].running_hash, Some(expected));
    }
}
