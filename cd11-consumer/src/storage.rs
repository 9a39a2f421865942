//! Persistence seams: frame payload storage and gap state snapshots

use bytes::Bytes;
use cd11_protocol::{GapStateSnapshot, SnapshotError};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Storage failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// One stored data frame
#[derive(Debug, Clone)]
pub struct DataRecord {
    pub station: String,
    pub sequence_number: u64,
    pub reception_time: DateTime<Utc>,
    pub payload: Bytes,
}

/// Durable storage for data frame payloads
///
/// A failed store leaves the sequence number unrecorded so the provider
/// re-sends the frame.
pub trait FrameStore: Send + Sync {
    fn store(&self, record: &DataRecord) -> Result<(), StorageError>;
}

/// Durable storage for per-station gap state snapshots
pub trait GapSnapshotStore: Send + Sync {
    /// Load the snapshot for `station`, or `None` if none was persisted
    fn load(&self, station: &str) -> Result<Option<GapStateSnapshot>, StorageError>;

    /// Persist the snapshot for `station`, replacing any previous one
    fn save(&self, station: &str, snapshot: &GapStateSnapshot) -> Result<(), StorageError>;

    /// Remove the persisted snapshot for `station`, if any
    fn clear(&self, station: &str) -> Result<(), StorageError>;
}

/// Filesystem snapshot store: `<dir>/<station>.json`
pub struct FsSnapshotStore {
    dir: PathBuf,
}

impl FsSnapshotStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(FsSnapshotStore { dir })
    }

    fn path_for(&self, station: &str) -> PathBuf {
        self.dir.join(format!("{station}.json"))
    }
}

impl GapSnapshotStore for FsSnapshotStore {
    fn load(&self, station: &str) -> Result<Option<GapStateSnapshot>, StorageError> {
        let path = self.path_for(station);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let snapshot = GapStateSnapshot::from_json(&contents)?;
        debug!(station, path = %path.display(), "loaded gap state snapshot");
        Ok(Some(snapshot))
    }

    fn save(&self, station: &str, snapshot: &GapStateSnapshot) -> Result<(), StorageError> {
        let path = self.path_for(station);
        fs::write(&path, snapshot.to_json()?)?;
        debug!(station, path = %path.display(), "saved gap state snapshot");
        Ok(())
    }

    fn clear(&self, station: &str) -> Result<(), StorageError> {
        let path = self.path_for(station);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
