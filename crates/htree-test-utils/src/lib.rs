//! Shared deterministic test fixtures for the htree crates: a fixed-seed
//! RNG, a temp-dir builder, and a one-shot tracing init helper so every
//! crate's integration tests don't re-derive this boilerplate.
//!
//! Grounded on the teacher's `test_utils` crate, minus the ZK-fixture
//! generation binary (`bin/generate_zk_fixtures.rs`), which has no
//! counterpart in this workspace's scope.

pub mod rng;
pub mod tempdir;
pub mod tracing_init;

pub use rng::TestRng;
pub use tempdir::scratch_dir;
pub use tracing_init::init_test_tracing;
