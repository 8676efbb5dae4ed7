//! Snapshot Sink and Reader

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

use crc::Digest;

use super::meta::SnapshotDescriptor;
use super::store::FileSnapshotStore;
use super::{CRC64, META_FILE, STATE_FILE};
use crate::error::{Error, Result};

/// Writer that feeds every byte it writes through the CRC-64 digest
struct HashingWriter {
    file: File,
    digest: Digest<'static, u64>,
}

impl Write for HashingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.file.write(buf)?;
        self.digest.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Handle for writing a new snapshot
///
/// Bytes written go to the state file of a `.tmp` directory. [`close`](Self::close)
/// makes the snapshot durable and visible; [`cancel`](Self::cancel) discards it.
pub struct SnapshotSink {
    store: FileSnapshotStore,
    dir: PathBuf,
    meta: SnapshotDescriptor,
    writer: Option<BufWriter<HashingWriter>>,
    closed: bool,
}

impl SnapshotSink {
    /// Write the initial metadata and open the state file
    pub(crate) fn begin(
        store: FileSnapshotStore,
        dir: PathBuf,
        meta: SnapshotDescriptor,
    ) -> Result<Self> {
        if let Err(e) = write_meta(&dir, &meta) {
            tracing::error!("snapshot: Failed to write metadata: {}", e);
            let _ = fs::remove_dir_all(&dir);
            return Err(e);
        }

        let file = match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dir.join(STATE_FILE))
        {
            Ok(file) => file,
            Err(e) => {
                tracing::error!("snapshot: Failed to create state file: {}", e);
                let _ = fs::remove_dir_all(&dir);
                return Err(Error::Io(e));
            }
        };

        let writer = BufWriter::new(HashingWriter {
            file,
            digest: CRC64.digest(),
        });

        Ok(Self {
            store,
            dir,
            meta,
            writer: Some(writer),
            closed: false,
        })
    }

    /// Permanent identifier of the snapshot
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    /// Metadata as it stands (size and checksum are filled in by `close`)
    pub fn descriptor(&self) -> &SnapshotDescriptor {
        &self.meta
    }

    /// Finalize the snapshot: flush, sync, record size and checksum,
    /// then move it into place and reap old snapshots
    ///
    /// Calling `close` more than once is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(e) = self.finalize() {
            tracing::error!("snapshot: Failed to finalize snapshot: {}", e);
            let _ = fs::remove_dir_all(&self.dir);
            return Err(e);
        }

        if let Err(e) = write_meta(&self.dir, &self.meta) {
            tracing::error!("snapshot: Failed to write metadata: {}", e);
            let _ = fs::remove_dir_all(&self.dir);
            return Err(e);
        }

        let final_path = self.store.path().join(&self.meta.id);
        fs::rename(&self.dir, &final_path).map_err(|e| {
            tracing::error!("snapshot: Failed to move snapshot into place: {}", e);
            Error::Io(e)
        })?;
        self.dir = final_path;

        self.store.reap(&self.meta).map_err(|e| {
            tracing::error!("snapshot: Failed to reap snapshots: {}", e);
            e
        })?;

        tracing::info!(
            "snapshot: {} finalized ({} bytes, crc {:#018x})",
            self.meta.id,
            self.meta.size,
            self.meta.checksum.unwrap_or_default()
        );
        Ok(())
    }

    /// Abandon the snapshot and remove its temporary directory
    ///
    /// Calling `cancel` after `close` (or twice) is a no-op.
    pub fn cancel(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Drop the file handle before removing the directory
        self.writer.take();
        fs::remove_dir_all(&self.dir)?;
        tracing::info!("snapshot: cancelled {}", self.meta.id);
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| Error::Snapshot("snapshot writer already released".into()))?;

        let hashing = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;

        let size = hashing.file.metadata()?.len();
        hashing.file.sync_all()?;

        self.meta.size = size;
        self.meta.checksum = Some(hashing.digest.finalize());
        Ok(())
    }
}

impl Write for SnapshotSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writer.as_mut() {
            Some(writer) if !self.closed => writer.write(buf),
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("snapshot {} is closed", self.meta.id),
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

/// Write `meta.json` into a snapshot directory and sync it
fn write_meta(dir: &std::path::Path, meta: &SnapshotDescriptor) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(dir.join(META_FILE))?;

    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, meta)?;
    writer.flush()?;

    let file = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(())
}

/// Buffered reader over a verified snapshot's state file
#[derive(Debug)]
pub struct SnapshotReader {
    inner: BufReader<File>,
}

impl SnapshotReader {
    pub(crate) fn new(file: File) -> Self {
        Self {
            inner: BufReader::new(file),
        }
    }
}

impl Read for SnapshotReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}
