//! The object stream pipeline (Section 4.8): composable sinks that hash,
//! chain, fan out, queue, and durably persist a sequence of objects, plus a
//! forward-only iterator that verifies a rotated run of stream files.
#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

pub mod file_writer;
pub mod hash_calculator;
pub mod multi_stream;
pub mod object;
pub mod queue_stream;
pub mod running_hash_calculator;
pub mod sink;
pub mod verify;

pub use file_writer::{TimestampStreamFileWriter, STREAM_FORMAT_VERSION};
pub use hash_calculator::{content_hash, HashCalculator};
pub use multi_stream::MultiStream;
pub use object::{Envelope, StreamObject};
pub use queue_stream::QueueThreadStream;
pub use running_hash_calculator::RunningHashCalculator;
pub use sink::Sink;
pub use verify::{verify_directory, StreamVerifier, VerifiedRecord};
