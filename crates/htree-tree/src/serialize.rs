//! Self-describing serialization (Section 4.3): per-node framing
//! (`class_id ∥ version ∥ payload`), whole-tree pre-order serialization with
//! class-registry-driven reconstruction, and the "external" mode that routes
//! a large leaf's payload to a side stream keyed by its route.

use std::io::{self, Read, Write};

use htree_types::hash::NULL_CLASS_ID;
use htree_types::Route;

use crate::class_registry::ClassRegistry;
use crate::node::{LeafPayload, NodeHandle};

/// Sentinel payload length marking "this leaf's bytes live in the external
/// side stream, not inline here" (Section 4.3's external mode).
const EXTERNAL_SENTINEL_LEN: u32 = u32::MAX;

fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_be_bytes())
}

fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_be_bytes())
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

/// Writes a single self-serializing object's frame: `class_id ∥ version ∥ len ∥ payload`.
/// A `None` object is written as the reserved null sentinel (Section 4.3).
pub fn write_object<W: Write>(w: &mut W, payload: Option<&dyn LeafPayload>) -> io::Result<()> {
    match payload {
        None => {
            write_u64(w, NULL_CLASS_ID)?;
            write_u32(w, 0)?;
        }
        Some(p) => {
            write_u64(w, p.class_id())?;
            write_u32(w, p.version())?;
            let bytes = p.serialize();
            write_u32(w, bytes.len() as u32)?;
            w.write_all(&bytes)?;
        }
    }
    Ok(())
}

/// Reads a single self-serializing object's frame and reconstructs its
/// payload via `registry`. Returns `None` for the null sentinel, regardless
/// of any bytes declared to follow it (Section 8's boundary behavior).
pub fn read_object<R: Read>(
    r: &mut R,
    registry: &ClassRegistry,
) -> Result<Option<Box<dyn LeafPayload>>, htree_types::error::TreeError> {
    let class_id = read_u64(r).map_err(|_| htree_types::error::TreeError::UnexpectedEof)?;
    let version = read_u32(r).map_err(|_| htree_types::error::TreeError::UnexpectedEof)?;
    let len = read_u32(r).map_err(|_| htree_types::error::TreeError::UnexpectedEof)? as usize;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)
        .map_err(|_| htree_types::error::TreeError::UnexpectedEof)?;
    if class_id == NULL_CLASS_ID {
        return Ok(None);
    }
    let class = registry.require(class_id)?;
    Ok(Some(class.read_leaf_payload(version, bytes)?))
}

/// Whole-tree pre-order serialization: for each internal node, writes
/// `class_id ∥ version ∥ child_count`, followed by each child in order; for
/// each leaf, writes its object frame. `None` child slots are written as the
/// null sentinel.
pub fn write_tree<W: Write>(
    node: Option<&NodeHandle>,
    w: &mut W,
) -> Result<(), htree_types::error::TreeError> {
    match node {
        None => {
            write_u64(w, NULL_CLASS_ID).map_err(io_err)?;
            write_u32(w, 0).map_err(io_err)?;
        }
        Some(n) if n.is_leaf() => {
            let payload = n
                .leaf_payload_clone()
                .expect("is_leaf() implies a payload");
            write_object(w, Some(payload.as_ref())).map_err(io_err)?;
        }
        Some(n) => {
            write_u64(w, n.class_id()).map_err(io_err)?;
            write_u32(w, n.version()).map_err(io_err)?;
            let children = n.children();
            write_u32(w, children.len() as u32).map_err(io_err)?;
            for child in &children {
                write_tree(child.as_ref(), w)?;
            }
        }
    }
    Ok(())
}

fn io_err(e: io::Error) -> htree_types::error::TreeError {
    let _ = e;
    htree_types::error::TreeError::UnexpectedEof
}

/// Whole-tree deserialization. Internal nodes are reconstructed bottom-up:
/// children are read first, then the class's `finalize_internal` hook
/// assembles the node (the "bounded stack of partially-constructed
/// internals" of Section 4.3 is realized here as the recursive call stack,
/// each frame holding exactly one partially-filled internal node).
pub fn read_tree<R: Read>(
    r: &mut R,
    registry: &ClassRegistry,
) -> Result<Option<NodeHandle>, htree_types::error::TreeError> {
    let class_id = read_u64(r).map_err(|_| htree_types::error::TreeError::UnexpectedEof)?;
    let version = read_u32(r).map_err(|_| htree_types::error::TreeError::UnexpectedEof)?;
    if class_id == NULL_CLASS_ID {
        // Still must consume the trailing `child_count`/`len` field slot to
        // stay framed with the writer, whichever shape was on the wire for
        // this slot (both are a single u32).
        let _ = read_u32(r).map_err(|_| htree_types::error::TreeError::UnexpectedEof)?;
        return Ok(None);
    }
    let class = registry.require(class_id)?;
    if class.is_leaf() {
        let len = read_u32(r).map_err(|_| htree_types::error::TreeError::UnexpectedEof)? as usize;
        let mut bytes = vec![0u8; len];
        r.read_exact(&mut bytes)
            .map_err(|_| htree_types::error::TreeError::UnexpectedEof)?;
        let payload = class.read_leaf_payload(version, bytes)?;
        Ok(Some(crate::node::Node::new_leaf(payload)))
    } else {
        let child_count = read_u32(r).map_err(|_| htree_types::error::TreeError::UnexpectedEof)?;
        if child_count > class.max_children() {
            return Err(htree_types::error::TreeError::MaxChildCountExceeded {
                max: class.max_children(),
                declared: child_count,
            });
        }
        let mut children = Vec::with_capacity(child_count as usize);
        for _ in 0..child_count {
            children.push(read_tree(r, registry)?);
        }
        class.finalize_internal(version, children)
    }
}

/// Writes a tree, routing any leaf whose [`LeafPayload::is_external`] is
/// `true` to `side` instead of inline in `main`. The main stream records a
/// sentinel length for external leaves; `side` gets `route ∥ len ∥ payload`
/// entries in the same pre-order visitation sequence, so a matching reader
/// can pull them back out in lockstep.
pub fn write_tree_external<W: Write, S: Write>(
    node: Option<&NodeHandle>,
    route: Route,
    main: &mut W,
    side: &mut S,
) -> Result<(), htree_types::error::TreeError> {
    match node {
        None => {
            write_u64(main, NULL_CLASS_ID).map_err(io_err)?;
            write_u32(main, 0).map_err(io_err)?;
        }
        Some(n) if n.is_leaf() => {
            let payload = n
                .leaf_payload_clone()
                .expect("is_leaf() implies a payload");
            if payload.is_external() {
                write_u64(main, payload.class_id()).map_err(io_err)?;
                write_u32(main, payload.version()).map_err(io_err)?;
                write_u32(main, EXTERNAL_SENTINEL_LEN).map_err(io_err)?;

                write_u32(side, route.indices().len() as u32).map_err(io_err)?;
                for idx in route.indices() {
                    write_u32(side, *idx).map_err(io_err)?;
                }
                let bytes = payload.serialize();
                write_u32(side, bytes.len() as u32).map_err(io_err)?;
                side.write_all(&bytes).map_err(io_err)?;
            } else {
                write_object(main, Some(payload.as_ref())).map_err(io_err)?;
            }
        }
        Some(n) => {
            write_u64(main, n.class_id()).map_err(io_err)?;
            write_u32(main, n.version()).map_err(io_err)?;
            let children = n.children();
            write_u32(main, children.len() as u32).map_err(io_err)?;
            for (idx, child) in children.iter().enumerate() {
                write_tree_external(child.as_ref(), route.child(idx as u32), main, side)?;
            }
        }
    }
    Ok(())
}

/// Reads a tree written by [`write_tree_external`]. External leaves are
/// resolved by pulling the next entry off `side`, in the same pre-order
/// sequence the writer used; the route recorded in `side` is validated
/// against the route reconstructed during the walk.
pub fn read_tree_external<R: Read, S: Read>(
    main: &mut R,
    side: &mut S,
    route: Route,
    registry: &ClassRegistry,
) -> Result<Option<NodeHandle>, htree_types::error::TreeError> {
    let class_id = read_u64(main).map_err(|_| htree_types::error::TreeError::UnexpectedEof)?;
    let version = read_u32(main).map_err(|_| htree_types::error::TreeError::UnexpectedEof)?;
    if class_id == NULL_CLASS_ID {
        let _ = read_u32(main).map_err(|_| htree_types::error::TreeError::UnexpectedEof)?;
        return Ok(None);
    }
    let class = registry.require(class_id)?;
    if class.is_leaf() {
        let len = read_u32(main).map_err(|_| htree_types::error::TreeError::UnexpectedEof)?;
        let payload = if len == EXTERNAL_SENTINEL_LEN {
            let depth = read_u32(side).map_err(|_| htree_types::error::TreeError::UnexpectedEof)?;
            let mut indices = Vec::with_capacity(depth as usize);
            for _ in 0..depth {
                indices.push(read_u32(side).map_err(|_| htree_types::error::TreeError::UnexpectedEof)?);
            }
            let recorded_route = Route::from_indices(indices);
            if recorded_route != route {
                return Err(htree_types::error::TreeError::UnexpectedEof);
            }
            let payload_len =
                read_u32(side).map_err(|_| htree_types::error::TreeError::UnexpectedEof)? as usize;
            let mut bytes = vec![0u8; payload_len];
            side.read_exact(&mut bytes)
                .map_err(|_| htree_types::error::TreeError::UnexpectedEof)?;
            class.read_leaf_payload(version, bytes)?
        } else {
            let mut bytes = vec![0u8; len as usize];
            main.read_exact(&mut bytes)
                .map_err(|_| htree_types::error::TreeError::UnexpectedEof)?;
            class.read_leaf_payload(version, bytes)?
        };
        Ok(Some(crate::node::Node::new_leaf(payload)))
    } else {
        let child_count = read_u32(main).map_err(|_| htree_types::error::TreeError::UnexpectedEof)?;
        if child_count > class.max_children() {
            return Err(htree_types::error::TreeError::MaxChildCountExceeded {
                max: class.max_children(),
                declared: child_count,
            });
        }
        let mut children = Vec::with_capacity(child_count as usize);
        for idx in 0..child_count {
            children.push(read_tree_external(
                main,
                side,
                route.child(idx),
                registry,
            )?);
        }
        class.finalize_internal(version, children)
    }
}
