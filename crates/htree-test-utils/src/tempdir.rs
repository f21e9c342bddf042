//! Temp-dir builder shared by every crate's file-backed tests (data files,
//! snapshots, stream files).

use tempfile::TempDir;

/// Creates a fresh scratch directory, prefixed for easy identification in
/// `/tmp` during a failed test run.
pub fn scratch_dir(prefix: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(&format!("htree-{prefix}-"))
        .tempdir()
        .expect("failed to create scratch directory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_dir_exists_and_is_writable() {
        let dir = scratch_dir("test");
        let path = dir.path().join("probe");
        std::fs::write(&path, b"ok").unwrap();
        assert!(path.exists());
    }
}
