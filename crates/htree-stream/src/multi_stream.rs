//! `MultiStream`: fans one sequence of objects out to every sink in a fixed
//! set, e.g. feeding both a `TimestampStreamFileWriter` and a separate
//! `QueueThreadStream`-backed network publisher from the same pipeline.

use htree_types::error::StreamError;
use htree_types::Hash;

use crate::object::{Envelope, StreamObject};
use crate::sink::Sink;

/// Forwards every object to each of its downstream sinks, in order, stopping
/// at the first one that errors.
pub struct MultiStream<T: StreamObject> {
    sinks: Vec<Box<dyn Sink<T>>>,
}

impl<T: StreamObject> MultiStream<T> {
    /// Builds a fan-out over `sinks`. Fails with
    /// [`StreamError::EmptyMultiStream`] if `sinks` is empty — a `MultiStream`
    /// with nothing downstream has no purpose and almost certainly signals a
    /// wiring mistake at construction time.
    pub fn new(sinks: Vec<Box<dyn Sink<T>>>) -> Result<Self, StreamError> {
        if sinks.is_empty() {
            return Err(StreamError::EmptyMultiStream);
        }
        Ok(Self { sinks })
    }
}

impl<T: StreamObject + Clone> Sink<T> for MultiStream<T> {
    fn on_object(&mut self, envelope: Envelope<T>) -> Result<(), StreamError> {
        for sink in &mut self.sinks {
            let clone = Envelope {
                object: envelope.object.clone(),
                hash: envelope.hash.clone(),
                running_hash: envelope.running_hash.clone(),
            };
            sink.on_object(clone)?;
        }
        Ok(())
    }

    fn set_running_hash(&mut self, hash: Hash) {
        for sink in &mut self.sinks {
            sink.set_running_hash(hash.clone());
        }
    }

    fn clear(&mut self) {
        for sink in &mut self.sinks {
            sink.clear();
        }
    }

    fn close(&mut self) -> Result<(), StreamError> {
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.close() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Obj(u32);
    impl StreamObject for Obj {
        fn class_id(&self) -> u64 {
            1
        }
        fn version(&self) -> u32 {
            1
        }
        fn payload(&self) -> Vec<u8> {
            self.0.to_be_bytes().to_vec()
        }
        fn timestamp_ms(&self) -> i64 {
            0
        }
    }

    struct Counter(std::sync::Arc<std::sync::Mutex<usize>>);
    impl Sink<Obj> for Counter {
        fn on_object(&mut self, _object: Envelope<Obj>) -> Result<(), StreamError> {
            *self.0.lock().unwrap() += 1;
            Ok(())
        }
        fn set_running_hash(&mut self, _hash: Hash) {}
        fn clear(&mut self) {
            *self.0.lock().unwrap() = 0;
        }
        fn close(&mut self) -> Result<(), StreamError> {
            Ok(())
        }
    }

    #[test]
    fn empty_multi_stream_is_rejected() {
        let result = MultiStream::<Obj>::new(Vec::new());
        assert!(matches!(result, Err(StreamError::EmptyMultiStream)));
    }

    #[test]
    fn fans_out_to_every_sink() {
        let a = std::sync::Arc::new(std::sync::Mutex::new(0));
        let b = std::sync::Arc::new(std::sync::Mutex::new(0));
        let mut multi = MultiStream::new(vec![
            Box::new(Counter(a.clone())) as Box<dyn Sink<Obj>>,
            Box::new(Counter(b.clone())) as Box<dyn Sink<Obj>>,
        ])
        .unwrap();
        multi.on_object(Envelope::new(Obj(1))).unwrap();
        multi.on_object(Envelope::new(Obj(2))).unwrap();
        assert_eq!(*a.lock().unwrap(), 2);
        assert_eq!(*b.lock().unwrap(), 2);
    }
}
