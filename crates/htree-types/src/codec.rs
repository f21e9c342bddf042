//! The canonical, deterministic binary codec used for hash preimages and
//! whole-tree serialization payloads.
//!
//! A thin wrapper around `parity-scale-codec` (SCALE): compact, deterministic,
//! and the same codec the node model and reconciliation protocol both rely on
//! so two peers computing a hash over the same logical value always produce
//! the same bytes.

use parity_scale_codec::{Decode, DecodeAll, Encode};

/// Encodes a value into its canonical byte representation.
///
/// Used for anything that feeds a hash preimage or crosses the
/// teacher/learner wire as an opaque payload.
pub fn to_bytes_canonical<T: Encode>(v: &T) -> Vec<u8> {
    v.encode()
}

/// Decodes a value from its canonical byte representation, failing on any
/// trailing or malformed bytes.
pub fn from_bytes_canonical<T: Decode>(b: &[u8]) -> Result<T, String> {
    T::decode_all(&mut &*b).map_err(|e| format!("canonical decode failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parity_scale_codec::{Decode, Encode};

    #[derive(Encode, Decode, Debug, PartialEq, Eq)]
    struct Sample {
        id: u32,
        tags: Vec<u8>,
    }

    #[test]
    fn round_trips() {
        let s = Sample {
            id: 7,
            tags: vec![1, 2, 3],
        };
        let bytes = to_bytes_canonical(&s);
        let back: Sample = from_bytes_canonical(&bytes).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn truncated_input_fails() {
        let s = Sample {
            id: 9,
            tags: vec![1, 2, 3, 4, 5],
        };
        let mut bytes = to_bytes_canonical(&s);
        bytes.truncate(bytes.len() - 2);
        assert!(from_bytes_canonical::<Sample>(&bytes).is_err());
    }
}
