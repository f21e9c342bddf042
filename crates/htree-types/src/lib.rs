//! Shared primitives used across the htree crates: the content-addressed
//! `Hash` type, `Route` addressing, the error taxonomy, canonical-codec
//! helpers, and the configuration structs for the storage/stream tunables.

pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod route;

pub use error::ErrorCode;
pub use hash::{Hash, HashAlgorithm, NULL_CLASS_ID};
pub use route::Route;

/// Reserved 64-bit value marking a deleted key inside a `DiskHashMap` bucket.
pub const TOMBSTONE: i64 = i64::MIN;
