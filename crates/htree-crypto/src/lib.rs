//! Default cryptographic backend.
//!
//! The component design treats hashing and signing as external collaborators:
//! a `Cryptographer` providing `digest(bytes)` and `running_hash(prev, next, algo)`,
//! and a `Signer: Hash -> Bytes`. This crate supplies a concrete, runnable
//! implementation of both so the workspace builds and tests standalone, while
//! every consumer still depends only on the traits in [`cryptographer`] and
//! [`signer`] — a host application is free to substitute its own key
//! ceremony and hardware-backed signer without touching the tree or storage
//! crates.
#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

pub mod cryptographer;
pub mod signer;

pub use cryptographer::{Cryptographer, Sha384Cryptographer};
pub use signer::{FixedKeySigner, Signer};
