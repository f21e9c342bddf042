//! `Signer`: abstracted as `Hash -> Bytes` per the spec's scope boundary. Key
//! management and signature verification belong to the consensus platform,
//! out of scope here; this crate only needs something implementing the trait
//! so the stream writer can produce a signature record.

use htree_types::Hash;

/// Produces a signature over a hash. Real key management is a host-application
/// concern; this crate treats the signature bytes as opaque.
pub trait Signer: Send + Sync {
    /// Signs `hash`, returning opaque signature bytes.
    fn sign(&self, hash: &Hash) -> Vec<u8>;
}

/// A `Signer` that HMACs the hash with a fixed in-memory key.
///
/// Not suitable for production key custody — it exists so
/// `TimestampStreamFileWriter` has something concrete to call in tests and in
/// deployments that delegate real signing to an external service but still
/// want a deterministic companion signature during development.
pub struct FixedKeySigner {
    key: Vec<u8>,
}

impl FixedKeySigner {
    /// Builds a signer from a raw key. The key is never logged.
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }
}

impl Signer for FixedKeySigner {
    fn sign(&self, hash: &Hash) -> Vec<u8> {
        use sha2::{Digest, Sha384};
        let mut hasher = Sha384::new();
        hasher.update(&self.key);
        hasher.update(hash.as_bytes());
        hasher.finalize().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use htree_types::HashAlgorithm;

    #[test]
    fn signatures_are_deterministic_for_same_key_and_hash() {
        let signer = FixedKeySigner::new(b"test-key".to_vec());
        let h = Hash::from_bytes(HashAlgorithm::Sha384, vec![9u8; 48]);
        assert_eq!(signer.sign(&h), signer.sign(&h));
    }

    #[test]
    fn different_keys_produce_different_signatures() {
        let a = FixedKeySigner::new(b"key-a".to_vec());
        let b = FixedKeySigner::new(b"key-b".to_vec());
        let h = Hash::from_bytes(HashAlgorithm::Sha384, vec![1u8; 48]);
        assert_ne!(a.sign(&h), b.sign(&h));
    }
}
