//! File Snapshot Store

use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::meta::{sort_newest_first, SnapshotDescriptor};
use super::sink::{SnapshotReader, SnapshotSink};
use super::{CRC64, META_FILE, PERMISSION_TEST_FILE, SNAPSHOT_DIR, STATE_FILE, TMP_SUFFIX};
use crate::error::{Error, Result};

/// Snapshot store keeping snapshots as directories on local disk
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    /// `<base>/snapshots`
    path: PathBuf,
    /// Number of snapshots to keep
    retain: usize,
}

impl FileSnapshotStore {
    /// Create a store under `base`, verifying the directory is writable
    pub fn new(base: impl AsRef<Path>, retain: usize) -> Result<Self> {
        if retain < 1 {
            return Err(Error::Config("must retain at least one snapshot".into()));
        }

        let path = base.as_ref().join(SNAPSHOT_DIR);
        fs::create_dir_all(&path).map_err(|e| {
            Error::Snapshot(format!("snapshot path {} not accessible: {}", path.display(), e))
        })?;

        let store = Self { path, retain };
        store
            .test_permissions()
            .map_err(|e| Error::Snapshot(format!("permissions test failed: {}", e)))?;

        tracing::info!("Snapshot store ready at {} (retain {})", store.path.display(), retain);
        Ok(store)
    }

    /// Touch and remove a file to prove the directory is writable
    fn test_permissions(&self) -> std::io::Result<()> {
        let probe = self.path.join(PERMISSION_TEST_FILE);
        File::create(&probe)?;
        fs::remove_file(&probe)
    }

    /// Directory holding the snapshots
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of snapshots kept after reaping
    pub fn retain(&self) -> usize {
        self.retain
    }

    /// Name a snapshot by its position and creation time
    fn snapshot_name(term: u64, index: u64) -> String {
        format!("{}-{}-{}", term, index, chrono::Utc::now().timestamp_millis())
    }

    /// Start writing a new snapshot
    pub fn create(&self, index: u64, term: u64, peers: Vec<String>) -> Result<SnapshotSink> {
        let name = Self::snapshot_name(term, index);
        let dir = self.path.join(format!("{}{}", name, TMP_SUFFIX));
        tracing::info!("snapshot: Creating new snapshot at {}", dir.display());

        fs::create_dir(&dir).map_err(|e| {
            tracing::error!("snapshot: Failed to make snapshot directory: {}", e);
            Error::Io(e)
        })?;

        let meta = SnapshotDescriptor::pending(name, term, index, peers);
        SnapshotSink::begin(self.clone(), dir, meta)
    }

    /// Finalized snapshots, newest first, up to the retain count
    pub fn list(&self) -> Result<Vec<SnapshotDescriptor>> {
        let mut snapshots = self.all_snapshots()?;
        snapshots.truncate(self.retain);
        Ok(snapshots)
    }

    /// Every finalized snapshot with readable metadata, newest first
    fn all_snapshots(&self) -> Result<Vec<SnapshotDescriptor>> {
        let mut snapshots = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(TMP_SUFFIX) {
                tracing::warn!("snapshot: Found temporary snapshot: {}", name);
                continue;
            }

            match self.read_meta(&name) {
                Ok(meta) => snapshots.push(meta),
                Err(e) => {
                    tracing::warn!("snapshot: Failed to read metadata for {}: {}", name, e);
                }
            }
        }

        sort_newest_first(&mut snapshots);
        Ok(snapshots)
    }

    /// Read the metadata of a named snapshot
    fn read_meta(&self, name: &str) -> Result<SnapshotDescriptor> {
        let file = File::open(self.path.join(name).join(META_FILE))?;
        let meta = serde_json::from_reader(BufReader::new(file))?;
        Ok(meta)
    }

    /// Open a finalized snapshot after verifying its checksum
    pub fn open(&self, id: &str) -> Result<(SnapshotDescriptor, SnapshotReader)> {
        if id.is_empty() || id.contains(['/', '\\']) || id.ends_with(TMP_SUFFIX) {
            return Err(Error::SnapshotNotFound(id.to_string()));
        }
        if !self.path.join(id).is_dir() {
            return Err(Error::SnapshotNotFound(id.to_string()));
        }

        let meta = self.read_meta(id).map_err(|e| {
            tracing::error!("snapshot: Failed to get meta data to open snapshot: {}", e);
            e
        })?;
        let stored = meta.checksum.ok_or_else(|| {
            Error::Snapshot(format!("snapshot {} has no checksum", id))
        })?;

        let mut file = File::open(self.path.join(id).join(STATE_FILE)).map_err(|e| {
            tracing::error!("snapshot: Failed to open state file: {}", e);
            Error::Io(e)
        })?;

        let computed = {
            let mut digest = CRC64.digest();
            let mut reader = BufReader::new(&mut file);
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                digest.update(&buf[..n]);
            }
            digest.finalize()
        };

        if computed != stored {
            tracing::error!(
                "snapshot: CRC checksum failed for {} (stored: {:#018x} computed: {:#018x})",
                id,
                stored,
                computed
            );
            return Err(Error::SnapshotCorrupted {
                id: id.to_string(),
                stored,
                computed,
            });
        }

        file.seek(SeekFrom::Start(0))?;
        Ok((meta, SnapshotReader::new(file)))
    }

    /// Remove snapshots beyond the retain count, and any positioned after `current`
    pub fn reap(&self, current: &SnapshotDescriptor) -> Result<()> {
        let mut snapshots = self.all_snapshots()?;

        let mut future_reaped = false;
        for snapshot in snapshots.iter().filter(|s| s.is_after(current)) {
            self.remove_snapshot(snapshot);
            future_reaped = true;
        }

        if future_reaped {
            snapshots = self.all_snapshots()?;
        }

        for snapshot in snapshots.iter().skip(self.retain) {
            self.remove_snapshot(snapshot);
        }

        Ok(())
    }

    /// Delete one snapshot directory; failures are logged
    fn remove_snapshot(&self, snapshot: &SnapshotDescriptor) {
        let path = self.path.join(&snapshot.id);
        tracing::info!("snapshot: reaping snapshot {}", path.display());
        if let Err(e) = fs::remove_dir_all(&path) {
            tracing::error!("snapshot: Failed to reap snapshot {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn finalize(store: &FileSnapshotStore, term: u64, index: u64, data: &[u8]) -> String {
        let mut sink = store.create(index, term, vec!["node-1:10008".into()]).unwrap();
        sink.write_all(data).unwrap();
        let id = sink.id().to_string();
        sink.close().unwrap();
        id
    }

    fn positions(store: &FileSnapshotStore) -> Vec<(u64, u64)> {
        store
            .all_snapshots()
            .unwrap()
            .iter()
            .map(|s| (s.term, s.index))
            .collect()
    }

    #[test]
    fn test_store_creation() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), 2).unwrap();
        assert!(store.path().ends_with(SNAPSHOT_DIR));
        assert!(store.path().is_dir());
        assert!(!store.path().join(PERMISSION_TEST_FILE).exists());

        assert!(FileSnapshotStore::new(dir.path(), 0).is_err());
    }

    #[test]
    fn test_store_creation_on_unwritable_base() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();

        assert!(FileSnapshotStore::new(&blocker, 1).is_err());
    }

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), 3).unwrap();

        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let id = finalize(&store, 4, 17, &data);

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert_eq!(listed[0].size, data.len() as u64);
        assert_eq!(listed[0].checksum, Some(CRC64.checksum(&data)));

        let (meta, mut reader) = store.open(&id).unwrap();
        assert_eq!(meta.term, 4);
        assert_eq!(meta.index, 17);
        assert_eq!(meta.peers, vec!["node-1:10008".to_string()]);

        let mut restored = Vec::new();
        reader.read_to_end(&mut restored).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn test_corrupted_state_is_rejected() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), 3).unwrap();
        let id = finalize(&store, 1, 1, b"consensus state bytes");

        let state_path = store.path().join(&id).join(STATE_FILE);
        let mut bytes = fs::read(&state_path).unwrap();
        bytes[3] ^= 0xff;
        fs::write(&state_path, bytes).unwrap();

        let err = store.open(&id).unwrap_err();
        assert!(err.is_integrity_failure());
    }

    #[test]
    fn test_open_unknown_snapshot() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), 3).unwrap();

        assert!(matches!(store.open("9-9-9"), Err(Error::SnapshotNotFound(_))));
        assert!(matches!(store.open("../escape"), Err(Error::SnapshotNotFound(_))));
    }

    #[test]
    fn test_retention_keeps_newest() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), 2).unwrap();

        finalize(&store, 1, 1, b"first");
        finalize(&store, 1, 2, b"second");
        finalize(&store, 2, 1, b"third");

        assert_eq!(positions(&store), vec![(2, 1), (1, 2)]);
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn test_reap_removes_future_snapshots() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), 5).unwrap();

        finalize(&store, 2, 1, b"stray");
        finalize(&store, 1, 5, b"current");

        assert_eq!(positions(&store), vec![(1, 5)]);
    }

    #[test]
    fn test_list_skips_temporary_and_unreadable() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), 5).unwrap();

        let mut pending = store.create(3, 1, Vec::new()).unwrap();
        pending.write_all(b"partial").unwrap();

        fs::create_dir(store.path().join("7-7-7")).unwrap();
        fs::write(store.path().join("stray-file"), b"x").unwrap();

        finalize(&store, 1, 1, b"done");

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!((listed[0].term, listed[0].index), (1, 1));

        pending.cancel().unwrap();
    }
}
