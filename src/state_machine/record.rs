use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::Job;
use crate::error::UploadError;

/// Fixed name of the resumption slot inside the state directory.
pub const RECORD_FILE_NAME: &str = "pending_upload.json";

/// Persisted resumption state for one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub pending: bool,
    /// Delimiter-joined `[scene, thumbnail, name, id, platform]`.
    pub job: String,
    pub written_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn pending(job: &Job) -> Self {
        Self {
            pending: true,
            job: job.encode(),
            written_at: Utc::now(),
        }
    }

    pub fn job(&self) -> Result<Job, UploadError> {
        Job::decode(&self.job)
    }
}

/// A single durable slot holding at most one [`ExecutionRecord`].
pub trait RecordStore {
    fn load(&self) -> Result<Option<ExecutionRecord>, UploadError>;
    fn save(&self, record: &ExecutionRecord) -> Result<(), UploadError>;
    fn clear(&self) -> Result<(), UploadError>;
}

/// File-backed record slot. Writes replace the file via rename so a reader
/// never observes a half-written record.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    path: PathBuf,
}

impl FileRecordStore {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(RECORD_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore for FileRecordStore {
    fn load(&self) -> Result<Option<ExecutionRecord>, UploadError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: ExecutionRecord = serde_json::from_str(&contents).map_err(|e| {
            UploadError::CorruptRecord(format!("{}: {e}", self.path.display()))
        })?;
        // A record whose flag was cleared is the same as no record.
        Ok(record.pending.then_some(record))
    }

    fn save(&self, record: &ExecutionRecord) -> Result<(), UploadError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), UploadError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory slot used by tests; survives as long as the value does.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    slot: std::rc::Rc<std::cell::RefCell<Option<ExecutionRecord>>>,
}

#[cfg(test)]
impl MemoryRecordStore {
    pub fn is_present(&self) -> bool {
        self.slot.borrow().is_some()
    }
}

#[cfg(test)]
impl RecordStore for MemoryRecordStore {
    fn load(&self) -> Result<Option<ExecutionRecord>, UploadError> {
        Ok(self.slot.borrow().clone())
    }

    fn save(&self, record: &ExecutionRecord) -> Result<(), UploadError> {
        *self.slot.borrow_mut() = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), UploadError> {
        *self.slot.borrow_mut() = None;
        Ok(())
    }
}
