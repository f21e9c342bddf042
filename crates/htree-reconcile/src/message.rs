//! Wire messages exchanged between a [`crate::teacher::Teacher`] and a
//! [`crate::learner::Learner`]: `Lesson` (teacher -> learner, describing one
//! node) and `Query` (learner -> teacher, a one-bit have/need per child).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use htree_types::error::ReconcileError;
use htree_types::Hash;

const TAG_NODE_UP_TO_DATE: u8 = 0;
const TAG_LEAF_DATA: u8 = 1;
const TAG_INTERNAL_DATA: u8 = 2;
const TAG_CUSTOM_VIEW_ROOT: u8 = 3;

/// One step of the teacher's half of the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lesson {
    /// The learner's subtree at this route already has the right hash;
    /// nothing else follows for it.
    NodeIsUpToDate,
    /// A leaf's full, self-serialized payload.
    LeafData {
        class_id: u64,
        version: u32,
        payload: Vec<u8>,
    },
    /// An internal node's shape plus its children's hashes in order. The
    /// learner compares each against its own tree and answers with one
    /// [`Query`] per child.
    InternalData {
        class_id: u64,
        version: u32,
        child_hashes: Vec<Hash>,
    },
    /// A subtree handled by an application-defined view rather than the
    /// ordinary leaf/internal shape.
    CustomViewRoot { view_id: u64, payload: Vec<u8> },
}

impl Lesson {
    /// Encodes this lesson's body (the framing length prefix is added by the
    /// caller, since it differs between the synchronous and async readers).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Lesson::NodeIsUpToDate => {
                out.write_u8(TAG_NODE_UP_TO_DATE).expect("write to Vec cannot fail");
            }
            Lesson::LeafData {
                class_id,
                version,
                payload,
            } => {
                out.write_u8(TAG_LEAF_DATA).expect("write to Vec cannot fail");
                out.write_u64::<BigEndian>(*class_id).expect("write to Vec cannot fail");
                out.write_u32::<BigEndian>(*version).expect("write to Vec cannot fail");
                out.write_u32::<BigEndian>(payload.len() as u32)
                    .expect("write to Vec cannot fail");
                out.extend_from_slice(payload);
            }
            Lesson::InternalData {
                class_id,
                version,
                child_hashes,
            } => {
                out.write_u8(TAG_INTERNAL_DATA).expect("write to Vec cannot fail");
                out.write_u64::<BigEndian>(*class_id).expect("write to Vec cannot fail");
                out.write_u32::<BigEndian>(*version).expect("write to Vec cannot fail");
                out.write_u32::<BigEndian>(child_hashes.len() as u32)
                    .expect("write to Vec cannot fail");
                for h in child_hashes {
                    out.extend_from_slice(&h.wire_encode());
                }
            }
            Lesson::CustomViewRoot { view_id, payload } => {
                out.write_u8(TAG_CUSTOM_VIEW_ROOT).expect("write to Vec cannot fail");
                out.write_u64::<BigEndian>(*view_id).expect("write to Vec cannot fail");
                out.write_u32::<BigEndian>(payload.len() as u32)
                    .expect("write to Vec cannot fail");
                out.extend_from_slice(payload);
            }
        }
        out
    }

    /// Decodes a lesson body previously produced by [`Lesson::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, ReconcileError> {
        fn bad(reason: impl Into<String>) -> ReconcileError {
            ReconcileError::Deserialize(reason.into())
        }
        let mut cursor = bytes;
        let tag = cursor.read_u8().map_err(|_| bad("missing lesson tag"))?;
        match tag {
            TAG_NODE_UP_TO_DATE => Ok(Lesson::NodeIsUpToDate),
            TAG_LEAF_DATA => {
                let class_id = cursor.read_u64::<BigEndian>().map_err(|_| bad("class_id"))?;
                let version = cursor.read_u32::<BigEndian>().map_err(|_| bad("version"))?;
                let len = cursor
                    .read_u32::<BigEndian>()
                    .map_err(|_| bad("payload len"))? as usize;
                if cursor.len() != len {
                    return Err(bad("leaf payload length mismatch"));
                }
                Ok(Lesson::LeafData {
                    class_id,
                    version,
                    payload: cursor.to_vec(),
                })
            }
            TAG_INTERNAL_DATA => {
                let class_id = cursor.read_u64::<BigEndian>().map_err(|_| bad("class_id"))?;
                let version = cursor.read_u32::<BigEndian>().map_err(|_| bad("version"))?;
                let count = cursor
                    .read_u32::<BigEndian>()
                    .map_err(|_| bad("child count"))?;
                let mut child_hashes = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let (hash, consumed) =
                        Hash::wire_decode(cursor).ok_or_else(|| bad("child hash"))?;
                    child_hashes.push(hash);
                    cursor = &cursor[consumed..];
                }
                if !cursor.is_empty() {
                    return Err(bad("trailing bytes after child hashes"));
                }
                Ok(Lesson::InternalData {
                    class_id,
                    version,
                    child_hashes,
                })
            }
            TAG_CUSTOM_VIEW_ROOT => {
                let view_id = cursor.read_u64::<BigEndian>().map_err(|_| bad("view_id"))?;
                let len = cursor
                    .read_u32::<BigEndian>()
                    .map_err(|_| bad("payload len"))? as usize;
                if cursor.len() != len {
                    return Err(bad("custom view payload length mismatch"));
                }
                Ok(Lesson::CustomViewRoot {
                    view_id,
                    payload: cursor.to_vec(),
                })
            }
            other => Err(bad(format!("unknown lesson tag {other}"))),
        }
    }
}

/// The learner's one-bit answer about a single child slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// The learner's subtree at this slot already matches; skip it.
    Have,
    /// Send the lesson for this slot.
    Need,
}

impl Query {
    pub fn encode(self) -> u8 {
        match self {
            Query::Have => 0,
            Query::Need => 1,
        }
    }

    pub fn decode(byte: u8) -> Result<Self, ReconcileError> {
        match byte {
            0 => Ok(Query::Have),
            1 => Ok(Query::Need),
            other => Err(ReconcileError::Deserialize(format!(
                "unknown query byte {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use htree_types::HashAlgorithm;

    #[test]
    fn node_is_up_to_date_round_trips() {
        let bytes = Lesson::NodeIsUpToDate.encode();
        assert_eq!(Lesson::decode(&bytes).unwrap(), Lesson::NodeIsUpToDate);
    }

    #[test]
    fn leaf_data_round_trips() {
        let lesson = Lesson::LeafData {
            class_id: 7,
            version: 2,
            payload: vec![1, 2, 3, 4],
        };
        let bytes = lesson.encode();
        assert_eq!(Lesson::decode(&bytes).unwrap(), lesson);
    }

    #[test]
    fn internal_data_round_trips_with_multiple_child_hashes() {
        let h1 = Hash::from_bytes(HashAlgorithm::Sha384, vec![1u8; 48]);
        let h2 = Hash::from_bytes(HashAlgorithm::Sha384, vec![2u8; 48]);
        let lesson = Lesson::InternalData {
            class_id: 20,
            version: 1,
            child_hashes: vec![h1, h2],
        };
        let bytes = lesson.encode();
        assert_eq!(Lesson::decode(&bytes).unwrap(), lesson);
    }

    #[test]
    fn custom_view_root_round_trips() {
        let lesson = Lesson::CustomViewRoot {
            view_id: 99,
            payload: vec![9, 9, 9],
        };
        let bytes = lesson.encode();
        assert_eq!(Lesson::decode(&bytes).unwrap(), lesson);
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        assert!(Lesson::decode(&[0xFF]).is_err());
    }

    #[test]
    fn query_round_trips() {
        assert_eq!(Query::decode(Query::Have.encode()).unwrap(), Query::Have);
        assert_eq!(Query::decode(Query::Need.encode()).unwrap(), Query::Need);
        assert!(Query::decode(2).is_err());
    }
}
