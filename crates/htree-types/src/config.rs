//! Configuration structs for the tunables named by value in the component design.
//!
//! These carry no file-parsing logic of their own — a host application
//! deserializes them from whatever source it likes (env, file, literal) via
//! `serde` and passes the struct in. Defaults match the values this design
//! names explicitly.

use serde::{Deserialize, Serialize};

/// Sizing and session tunables for a `DiskHashMap` (Section 4.5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskHashMapConfig {
    /// Expected number of live entries the map should be sized for.
    pub map_size: u64,
    /// Target average number of entries per bucket once full (`AVG` in Section 4.5).
    pub avg_entries_per_bucket: u32,
    /// Target load factor (`LF` in Section 4.5).
    pub load_factor: f64,
    /// Fixed growth increment, in bytes, applied to a bucket's backing buffer
    /// when an insert exceeds its current capacity.
    pub bucket_growth_increment: u32,
    /// Minimum number of finalized files a merge filter should consider before
    /// a compaction pass is worth running.
    pub min_files_to_merge: usize,
}

impl Default for DiskHashMapConfig {
    fn default() -> Self {
        Self {
            map_size: 1_000_000,
            avg_entries_per_bucket: 20,
            load_factor: 0.6,
            bucket_growth_increment: 4096,
            min_files_to_merge: 4,
        }
    }
}

/// Rotation and signing tunables for `TimestampStreamFileWriter` (Section 4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamWriterConfig {
    /// Wall-clock rotation window `W`, in milliseconds.
    pub rotation_window_ms: u64,
    /// When `true`, suppress writes until the first clean window boundary after
    /// construction (used after reconnect so peers generate identical files).
    pub wait_for_complete_window: bool,
    /// File name extension for stream data files.
    pub stream_file_extension: String,
    /// File name extension for the companion signature files.
    pub signature_file_extension: String,
}

impl Default for StreamWriterConfig {
    fn default() -> Self {
        Self {
            rotation_window_ms: 2_000,
            wait_for_complete_window: false,
            stream_file_extension: "evts".to_string(),
            signature_file_extension: "evts_sig".to_string(),
        }
    }
}

/// Timeout and backpressure tunables for the `QueueThreadStream` (Section 4.8)
/// and the teacher/learner reconciliation protocol (Section 4.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Per-read timeout for the learner's pipelined reader, in milliseconds.
    /// Firing one is fatal to the session.
    pub read_timeout_ms: u64,
    /// Bounded capacity of the "anticipated message" descriptor queue.
    pub anticipated_queue_capacity: usize,
    /// Bounded capacity of the "received" results queue.
    pub received_queue_capacity: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 30_000,
            anticipated_queue_capacity: 256,
            received_queue_capacity: 256,
        }
    }
}

/// Bounded-queue tunables for any `QueueThreadStream` sink.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStreamConfig {
    /// Maximum number of objects buffered before `on_object` blocks the caller.
    pub queue_capacity: usize,
    /// Grace period allowed for a stopped worker to exit before it is reported
    /// as hanging (an observability signal, not an error, per Section 5).
    pub stop_grace_period_ms: u64,
}

impl Default for QueueStreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            stop_grace_period_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let m = DiskHashMapConfig::default();
        assert_eq!(m.avg_entries_per_bucket, 20);
        assert!((m.load_factor - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = StreamWriterConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: StreamWriterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rotation_window_ms, cfg.rotation_window_ms);
    }
}
