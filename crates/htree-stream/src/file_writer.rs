//! `TimestampStreamFileWriter`: the terminal sink that rotates a wall-clock
//! window's worth of objects into one file, writes a companion signature
//! file over the window's end running hash, and starts the next window's
//! file with that same hash as its `start_running_hash` (Section 4.8,
//! Section 6's stream file format).

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, WriteBytesExt};

use htree_crypto::{Cryptographer, Signer};
use htree_types::config::StreamWriterConfig;
use htree_types::error::StreamError;
use htree_types::Hash;

use crate::hash_calculator::content_hash;
use crate::object::{Envelope, StreamObject};
use crate::sink::Sink;

/// On-disk layout version for stream data files and their signature
/// companions, independent of any object's own wire version.
pub const STREAM_FORMAT_VERSION: i32 = 1;

fn window_start(timestamp_ms: i64, window_ms: u64) -> i64 {
    let window_ms = window_ms.max(1) as i64;
    timestamp_ms.div_euclid(window_ms) * window_ms
}

fn wall_clock_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

struct OpenWindow {
    window_start_ms: i64,
    path: PathBuf,
    file: BufWriter<File>,
    last_running_hash: Hash,
}

/// Writes rotated, signed stream files into a directory. One instance owns
/// exactly one window's file at a time.
pub struct TimestampStreamFileWriter<T: StreamObject> {
    dir: PathBuf,
    config: StreamWriterConfig,
    crypto: Arc<dyn Cryptographer>,
    signer: Option<Arc<dyn Signer>>,
    current: Option<OpenWindow>,
    last_running_hash: Hash,
    suppress_until_window: Option<i64>,
    _marker: PhantomData<T>,
}

impl<T: StreamObject> TimestampStreamFileWriter<T> {
    /// Builds a writer over `dir`. `resume_running_hash` should be the prior
    /// session's last known end running hash when reconnecting to an
    /// existing chain; `None` starts a fresh chain from the null sentinel.
    pub fn new(
        dir: PathBuf,
        config: StreamWriterConfig,
        crypto: Arc<dyn Cryptographer>,
        signer: Option<Arc<dyn Signer>>,
        resume_running_hash: Option<Hash>,
    ) -> Self {
        let last_running_hash = resume_running_hash.unwrap_or_else(|| crypto.null_sentinel());
        let suppress_until_window = if config.wait_for_complete_window {
            Some(window_start(wall_clock_ms(), config.rotation_window_ms))
        } else {
            None
        };
        Self {
            dir,
            config,
            crypto,
            signer,
            current: None,
            last_running_hash,
            suppress_until_window,
            _marker: PhantomData,
        }
    }

    fn stream_path(&self, window_start_ms: i64) -> PathBuf {
        self.dir.join(format!(
            "{window_start_ms:020}.{}",
            self.config.stream_file_extension
        ))
    }

    fn signature_path(&self, window_start_ms: i64) -> PathBuf {
        self.dir.join(format!(
            "{window_start_ms:020}.{}",
            self.config.signature_file_extension
        ))
    }

    fn open_window(&mut self, window_start_ms: i64) -> Result<(), StreamError> {
        let path = self.stream_path(window_start_ms);
        let mut file = BufWriter::new(
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)?,
        );
        file.write_i32::<BigEndian>(STREAM_FORMAT_VERSION)?;
        file.write_i64::<BigEndian>(window_start_ms)?;
        file.write_all(&self.last_running_hash.wire_encode())?;
        self.current = Some(OpenWindow {
            window_start_ms,
            path,
            file,
            last_running_hash: self.last_running_hash.clone(),
        });
        Ok(())
    }

    fn finish_current(&mut self) -> Result<(), StreamError> {
        let Some(mut window) = self.current.take() else {
            return Ok(());
        };
        window.file.write_all(&window.last_running_hash.wire_encode())?;
        window.file.flush()?;
        window.file.get_ref().sync_all()?;
        self.last_running_hash = window.last_running_hash.clone();
        if let Some(signer) = &self.signer {
            let signature = signer.sign(&window.last_running_hash);
            let sig_path = self.signature_path(window.window_start_ms);
            let mut sig_file = BufWriter::new(
                OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&sig_path)?,
            );
            sig_file.write_i32::<BigEndian>(STREAM_FORMAT_VERSION)?;
            sig_file.write_i64::<BigEndian>(window.window_start_ms)?;
            sig_file.write_u32::<BigEndian>(signature.len() as u32)?;
            sig_file.write_all(&signature)?;
            sig_file.flush()?;
            sig_file.get_ref().sync_all()?;
        }
        tracing::debug!(
            path = %window.path.display(),
            "stream window closed and signed"
        );
        Ok(())
    }
}

impl<T: StreamObject> Sink<T> for TimestampStreamFileWriter<T> {
    fn on_object(&mut self, envelope: Envelope<T>) -> Result<(), StreamError> {
        let window_start_ms = window_start(envelope.object.timestamp_ms(), self.config.rotation_window_ms);

        if let Some(suppressed) = self.suppress_until_window {
            if window_start_ms == suppressed {
                return Ok(());
            }
            self.suppress_until_window = None;
        }

        let needs_rotation = match &self.current {
            Some(w) => w.window_start_ms != window_start_ms,
            None => true,
        };
        if needs_rotation {
            self.finish_current()?;
            self.open_window(window_start_ms)?;
        }

        let object_hash = envelope
            .hash
            .clone()
            .unwrap_or_else(|| content_hash(self.crypto.as_ref(), &envelope.object));
        let Some(window) = self.current.as_mut() else {
            return Err(StreamError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "stream window failed to open",
            )));
        };
        let running_hash = envelope
            .running_hash
            .clone()
            .unwrap_or_else(|| self.crypto.running_hash(Some(&window.last_running_hash), &object_hash));

        let payload = envelope.object.payload();
        window.file.write_u64::<BigEndian>(envelope.object.class_id())?;
        window.file.write_u32::<BigEndian>(envelope.object.version())?;
        window.file.write_u32::<BigEndian>(payload.len() as u32)?;
        window.file.write_all(&payload)?;
        window.last_running_hash = running_hash;
        Ok(())
    }

    fn set_running_hash(&mut self, hash: Hash) {
        self.last_running_hash = hash.clone();
        if let Some(window) = &mut self.current {
            window.last_running_hash = hash;
        }
    }

    fn clear(&mut self) {
        self.last_running_hash = self.crypto.null_sentinel();
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.finish_current()
    }
}
