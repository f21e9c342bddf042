//! The content-addressed digest type shared by every node, bucket entry, and
//! stream record in this workspace.

use std::fmt;

/// Reserved class id that always decodes to an absent (null) self-serializable object,
/// regardless of any bytes that follow it in the stream.
pub const NULL_CLASS_ID: u64 = 0x0;

/// Tag identifying which digest function produced a `Hash`'s bytes.
///
/// Kept distinct from the byte length so that a future algorithm can be added
/// without changing the `Hash` type's shape; `digest_len()` is what callers
/// should use to size buffers, not an assumption baked into `Hash` itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub enum HashAlgorithm {
    /// SHA-384, the default `Cryptographer` backend (see `htree-crypto`).
    Sha384,
}

impl HashAlgorithm {
    /// Digest length in bytes produced by this algorithm.
    pub const fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha384 => 48,
        }
    }

    /// Stable numeric tag, used as the `algorithm_tag` field of signature records
    /// (Section 6 of the spec) and wherever an algorithm identifier must cross
    /// the wire as a plain `i32`.
    pub const fn wire_tag(self) -> i32 {
        match self {
            HashAlgorithm::Sha384 => 1,
        }
    }

    /// Resolves a wire tag back into an algorithm, failing on anything unrecognized.
    pub fn from_wire_tag(tag: i32) -> Option<Self> {
        match tag {
            1 => Some(HashAlgorithm::Sha384),
            _ => None,
        }
    }
}

/// A fixed-width cryptographic digest, tagged with the algorithm that produced it.
///
/// Equality and ordering are pure byte comparisons (after comparing algorithm
/// tags), matching the data model's "immutable; equality = byte equality"
/// invariant. `Hash` never verifies that its bytes are an actual digest output —
/// construction from raw bytes is used for tests and for composing the
/// null-sentinel value.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash {
    algorithm: HashAlgorithm,
    bytes: Vec<u8>,
}

impl Hash {
    /// Builds a `Hash` from raw digest bytes, trusting the caller that `bytes.len()`
    /// matches `algorithm.digest_len()`.
    pub fn from_bytes(algorithm: HashAlgorithm, bytes: Vec<u8>) -> Self {
        debug_assert_eq!(bytes.len(), algorithm.digest_len());
        Self { algorithm, bytes }
    }

    /// The canonical null-sentinel hash used wherever an `Internal` node's child
    /// slot is empty: `digest(NULL_CLASS_ID_be8)` under the given algorithm.
    ///
    /// A fixed all-zero value would collide with a legitimately all-zero digest
    /// output in theory; hashing the reserved class id instead keeps the sentinel
    /// derivable from the same digest function used everywhere else.
    pub fn null_sentinel(algorithm: HashAlgorithm, digest: impl Fn(&[u8]) -> Vec<u8>) -> Self {
        let preimage = NULL_CLASS_ID.to_be_bytes();
        Self::from_bytes(algorithm, digest(&preimage))
    }

    /// The digest algorithm tag.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the hash, returning its raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Lower-case hex encoding of the digest bytes, used by manual `Debug` impls
    /// throughout this workspace rather than dumping raw byte arrays.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Wire-encodes this hash as `algorithm_tag:i32 (BE) ++ digest bytes`, the
    /// format every `Lesson` and stream signature record uses to carry a hash.
    pub fn wire_encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.bytes.len());
        out.extend_from_slice(&self.algorithm.wire_tag().to_be_bytes());
        out.extend_from_slice(&self.bytes);
        out
    }

    /// Decodes a hash previously produced by [`Hash::wire_encode`] from the
    /// front of `bytes`, returning the hash and the number of bytes consumed.
    /// `None` on a short buffer or an unrecognized algorithm tag.
    pub fn wire_decode(bytes: &[u8]) -> Option<(Hash, usize)> {
        if bytes.len() < 4 {
            return None;
        }
        let tag = i32::from_be_bytes(bytes[0..4].try_into().ok()?);
        let algorithm = HashAlgorithm::from_wire_tag(tag)?;
        let len = algorithm.digest_len();
        if bytes.len() < 4 + len {
            return None;
        }
        Some((Hash::from_bytes(algorithm, bytes[4..4 + len].to_vec()), 4 + len))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({:?}:{})", self.algorithm, self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_digest(input: &[u8]) -> Vec<u8> {
        // deterministic, non-cryptographic stand-in for the null-sentinel test
        let mut out = vec![0u8; HashAlgorithm::Sha384.digest_len()];
        for (i, b) in input.iter().enumerate() {
            out[i % out.len()] ^= *b;
        }
        out
    }

    #[test]
    fn equality_is_byte_equality() {
        let a = Hash::from_bytes(HashAlgorithm::Sha384, vec![1u8; 48]);
        let b = Hash::from_bytes(HashAlgorithm::Sha384, vec![1u8; 48]);
        let c = Hash::from_bytes(HashAlgorithm::Sha384, vec![2u8; 48]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn null_sentinel_is_deterministic() {
        let a = Hash::null_sentinel(HashAlgorithm::Sha384, fake_digest);
        let b = Hash::null_sentinel(HashAlgorithm::Sha384, fake_digest);
        assert_eq!(a, b);
    }

    #[test]
    fn wire_tag_round_trips() {
        let alg = HashAlgorithm::Sha384;
        assert_eq!(HashAlgorithm::from_wire_tag(alg.wire_tag()), Some(alg));
        assert_eq!(HashAlgorithm::from_wire_tag(-1), None);
    }

    #[test]
    fn hash_wire_round_trips_and_reports_consumed_length() {
        let h = Hash::from_bytes(HashAlgorithm::Sha384, vec![7u8; 48]);
        let mut buf = h.wire_encode();
        buf.extend_from_slice(b"trailing");
        let (decoded, consumed) = Hash::wire_decode(&buf).unwrap();
        assert_eq!(decoded, h);
        assert_eq!(consumed, 52);
    }

    #[test]
    fn hash_wire_decode_rejects_short_buffer() {
        assert!(Hash::wire_decode(&[1, 2, 3]).is_none());
    }
}
