//! `WriteSession`: the `Idle -> Writing -> Flushing -> Publishing -> Idle`
//! state machine one `DiskHashMap` write batch drives through (Section 4.9),
//! including the single-writer thread-affinity check Section 4.5 calls for.

use std::thread::ThreadId;

use ahash::AHashMap;
use htree_types::error::StorageError;

/// The write session's current state, matching Section 4.9 exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Writing,
    Flushing,
    Publishing,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Writing => "Writing",
            SessionState::Flushing => "Flushing",
            SessionState::Publishing => "Publishing",
        }
    }
}

/// One mutation queued against a bucket during the `Writing` state: either a
/// put or, encoded as a `TOMBSTONE` value by the caller, a delete.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub key_hash: i32,
    pub key_bytes: Vec<u8>,
    pub value: i64,
}

/// Tracks the state machine plus the staging map accumulated during
/// `Writing`. Owned by the `DiskHashMap`; not `Send` across the session's
/// lifetime by construction — every mutating call checks the recorded
/// thread id and returns [`StorageError::ThreadAffinity`] on mismatch.
pub struct WriteSession {
    state: SessionState,
    owner_thread: Option<ThreadId>,
    staged: AHashMap<i32, Vec<PendingMutation>>,
}

impl Default for WriteSession {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            owner_thread: None,
            staged: AHashMap::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn check_thread(&self) -> Result<(), StorageError> {
        let current = std::thread::current().id();
        match self.owner_thread {
            Some(owner) if owner != current => Err(StorageError::ThreadAffinity {
                opened_by: owner,
                called_from: current,
            }),
            _ => Ok(()),
        }
    }

    /// `Idle -> Writing`. Records the calling thread and opens a fresh
    /// staging map.
    pub fn begin_writing(&mut self) -> Result<(), StorageError> {
        if self.state != SessionState::Idle {
            return Err(StorageError::InvalidSessionState {
                state: self.state.name(),
                operation: "begin_writing",
            });
        }
        self.owner_thread = Some(std::thread::current().id());
        self.staged.clear();
        self.state = SessionState::Writing;
        tracing::debug!("write session: Idle -> Writing");
        Ok(())
    }

    /// Stages a mutation for `bucket_index` during `Writing`.
    pub fn put(&mut self, bucket_index: i32, mutation: PendingMutation) -> Result<(), StorageError> {
        if self.state != SessionState::Writing {
            return Err(StorageError::InvalidSessionState {
                state: self.state.name(),
                operation: "put",
            });
        }
        self.check_thread()?;
        self.staged.entry(bucket_index).or_default().push(mutation);
        Ok(())
    }

    /// `Writing -> Flushing`, handing the caller the staged mutations to
    /// write into bucket data files, in ascending bucket-index order for
    /// locality.
    pub fn begin_flush(&mut self) -> Result<Vec<(i32, Vec<PendingMutation>)>, StorageError> {
        if self.state != SessionState::Writing {
            return Err(StorageError::InvalidSessionState {
                state: self.state.name(),
                operation: "end_writing",
            });
        }
        self.check_thread()?;
        self.state = SessionState::Flushing;
        tracing::debug!("write session: Writing -> Flushing");
        let mut buckets: Vec<_> = self.staged.drain().collect();
        buckets.sort_by_key(|(idx, _)| *idx);
        Ok(buckets)
    }

    /// `Flushing -> Publishing`, once every affected bucket has been
    /// rewritten to the new data file.
    pub fn begin_publish(&mut self) -> Result<(), StorageError> {
        if self.state != SessionState::Flushing {
            return Err(StorageError::InvalidSessionState {
                state: self.state.name(),
                operation: "publish",
            });
        }
        self.state = SessionState::Publishing;
        tracing::debug!("write session: Flushing -> Publishing");
        Ok(())
    }

    /// `Publishing -> Idle`, once the index updates have been applied. The
    /// data file is merge-eligible only after this returns.
    pub fn finish(&mut self) -> Result<(), StorageError> {
        if self.state != SessionState::Publishing {
            return Err(StorageError::InvalidSessionState {
                state: self.state.name(),
                operation: "finish",
            });
        }
        self.owner_thread = None;
        self.state = SessionState::Idle;
        tracing::debug!("write session: Publishing -> Idle");
        Ok(())
    }

    /// `close()`: only legal from `Idle`.
    pub fn close(&self) -> Result<(), StorageError> {
        if self.state != SessionState::Idle {
            return Err(StorageError::InvalidSessionState {
                state: self.state.name(),
                operation: "close",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_cycles_through_every_state() {
        let mut s = WriteSession::new();
        s.begin_writing().unwrap();
        assert_eq!(s.state(), SessionState::Writing);
        s.put(0, PendingMutation { key_hash: 1, key_bytes: vec![1], value: 9 }).unwrap();
        let batches = s.begin_flush().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(s.state(), SessionState::Flushing);
        s.begin_publish().unwrap();
        assert_eq!(s.state(), SessionState::Publishing);
        s.finish().unwrap();
        assert_eq!(s.state(), SessionState::Idle);
        s.close().unwrap();
    }

    #[test]
    fn put_before_begin_writing_is_rejected() {
        let mut s = WriteSession::new();
        let err = s
            .put(0, PendingMutation { key_hash: 1, key_bytes: vec![], value: 1 })
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidSessionState { .. }));
    }

    #[test]
    fn concurrent_begin_writing_fails() {
        let mut s = WriteSession::new();
        s.begin_writing().unwrap();
        let err = s.begin_writing().unwrap_err();
        assert!(matches!(err, StorageError::InvalidSessionState { .. }));
    }

    #[test]
    fn close_outside_idle_fails() {
        let mut s = WriteSession::new();
        s.begin_writing().unwrap();
        assert!(s.close().is_err());
    }
}
