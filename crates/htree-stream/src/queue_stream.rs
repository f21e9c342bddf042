//! `QueueThreadStream`: decouples a producer from a potentially slow
//! downstream sink (a file writer, a network publisher) by handing objects
//! to a dedicated worker thread over a bounded queue. `on_object` blocks the
//! caller once the queue is full rather than buffering without limit
//! (Section 5's "no unbounded queues" resource rule).

use std::sync::mpsc;
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use htree_types::config::QueueStreamConfig;
use htree_types::error::StreamError;
use htree_types::Hash;

use crate::object::{Envelope, StreamObject};
use crate::sink::Sink;

enum Command<T> {
    Object(Envelope<T>),
    SetRunningHash(Hash),
    Clear,
    Stop,
}

/// A sink that forwards every object to a downstream sink on a dedicated
/// worker thread, via a bounded channel.
pub struct QueueThreadStream<T: StreamObject + 'static> {
    sender: mpsc::SyncSender<Command<T>>,
    worker_thread_id: ThreadId,
    worker: Option<JoinHandle<Result<(), StreamError>>>,
    stop_grace_period: Duration,
}

impl<T: StreamObject + 'static> QueueThreadStream<T> {
    /// Spawns the worker thread, which owns `downstream` for its whole
    /// lifetime and runs `downstream.close()` once it sees `Stop`.
    pub fn new<D>(config: QueueStreamConfig, mut downstream: D) -> Self
    where
        D: Sink<T> + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel::<Command<T>>(config.queue_capacity.max(1));
        let worker = std::thread::spawn(move || -> Result<(), StreamError> {
            for command in receiver {
                match command {
                    Command::Object(envelope) => downstream.on_object(envelope)?,
                    Command::SetRunningHash(hash) => downstream.set_running_hash(hash),
                    Command::Clear => downstream.clear(),
                    Command::Stop => break,
                }
            }
            downstream.close()
        });
        Self {
            sender,
            worker_thread_id: worker.thread().id(),
            worker: Some(worker),
            stop_grace_period: Duration::from_millis(config.stop_grace_period_ms),
        }
    }

    /// Stops the worker thread and propagates its `downstream.close()`
    /// result. Equivalent to [`Sink::close`]; kept as its own name because
    /// callers usually reach for "stop" rather than "close" for a queue.
    pub fn stop(&mut self) -> Result<(), StreamError> {
        Sink::close(self)
    }

    fn join_worker(&mut self) -> Result<(), StreamError> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        let deadline = Instant::now() + self.stop_grace_period;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if !handle.is_finished() {
            tracing::warn!(
                "QueueThreadStream worker has not stopped within its configured grace period"
            );
        }
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(StreamError::Interrupted),
        }
    }
}

impl<T: StreamObject + 'static> Sink<T> for QueueThreadStream<T> {
    fn on_object(&mut self, object: Envelope<T>) -> Result<(), StreamError> {
        self.sender
            .send(Command::Object(object))
            .map_err(|_| StreamError::Interrupted)
    }

    fn set_running_hash(&mut self, hash: Hash) {
        let _ = self.sender.send(Command::SetRunningHash(hash));
    }

    fn clear(&mut self) {
        let _ = self.sender.send(Command::Clear);
    }

    /// Stops the worker and waits for it, forbidding a call from the worker
    /// thread itself (which would deadlock waiting on its own exit).
    fn close(&mut self) -> Result<(), StreamError> {
        if std::thread::current().id() == self.worker_thread_id {
            return Err(StreamError::StopFromWorkerThread);
        }
        let _ = self.sender.send(Command::Stop);
        self.join_worker()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

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

    struct Collect(Arc<Mutex<Vec<u32>>>);
    impl Sink<Obj> for Collect {
        fn on_object(&mut self, envelope: Envelope<Obj>) -> Result<(), StreamError> {
            self.0.lock().unwrap().push(envelope.object.0);
            Ok(())
        }
        fn set_running_hash(&mut self, _hash: Hash) {}
        fn clear(&mut self) {}
        fn close(&mut self) -> Result<(), StreamError> {
            Ok(())
        }
    }

    #[test]
    fn delivers_every_object_in_order_then_closes_cleanly() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let config = QueueStreamConfig {
            queue_capacity: 4,
            stop_grace_period_ms: 1_000,
        };
        let mut stream = QueueThreadStream::new(config, Collect(seen.clone()));
        for i in 0..10 {
            stream.on_object(Envelope::new(Obj(i))).unwrap();
        }
        stream.close().unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn stop_from_a_thread_other_than_the_worker_succeeds() {
        let config = QueueStreamConfig {
            queue_capacity: 4,
            stop_grace_period_ms: 1_000,
        };

        struct NoOp;
        impl Sink<Obj> for NoOp {
            fn on_object(&mut self, _object: Envelope<Obj>) -> Result<(), StreamError> {
                Ok(())
            }
            fn set_running_hash(&mut self, _hash: Hash) {}
            fn clear(&mut self) {}
            fn close(&mut self) -> Result<(), StreamError> {
                Ok(())
            }
        }

        let mut stream = QueueThreadStream::new(config, NoOp);
        assert!(stream.stop().is_ok());
    }

    #[test]
    fn stop_from_the_worker_thread_itself_is_refused() {
        struct NoOp;
        impl Sink<Obj> for NoOp {
            fn on_object(&mut self, _object: Envelope<Obj>) -> Result<(), StreamError> {
                Ok(())
            }
            fn set_running_hash(&mut self, _hash: Hash) {}
            fn clear(&mut self) {}
            fn close(&mut self) -> Result<(), StreamError> {
                Ok(())
            }
        }

        let config = QueueStreamConfig {
            queue_capacity: 4,
            stop_grace_period_ms: 1_000,
        };
        // simulate being called from the worker thread by spoofing the id
        // this sink was actually spawned with, rather than spinning up a
        // second stream solely to call back into itself from its own worker.
        let mut stream = QueueThreadStream::new(config, NoOp);
        stream.worker_thread_id = std::thread::current().id();
        assert!(matches!(stream.close(), Err(StreamError::StopFromWorkerThread)));
    }
}
