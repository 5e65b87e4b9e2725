use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{fs, io};

use chrono::Utc;
use log::debug;

use crate::core::errors::TunnelError;
use crate::storage::record::ConnectionRecord;

/// Durable name → record mapping over a single JSON file.
///
/// Every mutation is a whole-file read-modify-write; the write lands via a
/// temp file and rename so the store is never left half-written. Two
/// processes mutating at once can still lose one of the updates (last
/// writer wins) — an accepted limitation of the file-based store.
#[derive(Debug, Clone)]
pub struct ConnectionStore {
    file: PathBuf,
}

impl ConnectionStore {
    /// Opens the store, creating an empty backing file on first use.
    /// Safe to call from every invocation.
    pub fn open(file: PathBuf) -> Result<Self, TunnelError> {
        if !file.exists() {
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent).map_err(|e| storage_err(&file, e))?;
            }
            fs::write(&file, "{}").map_err(|e| storage_err(&file, e))?;
        }
        Ok(Self { file })
    }

    /// Upserts `record` under its name, stamping `last_modified`.
    pub fn save(&self, record: &ConnectionRecord) -> Result<(), TunnelError> {
        if !ConnectionRecord::is_valid_name(&record.name) {
            return Err(TunnelError::InvalidName(record.name.clone()));
        }
        let mut connections = self.load()?;
        let mut record = record.clone();
        record.last_modified = Some(Utc::now());
        debug!("Saving connection '{}'", record.name);
        connections.insert(record.name.clone(), record);
        self.persist(&connections)
    }

    /// Absent is a valid outcome, not an error.
    pub fn get(&self, name: &str) -> Result<Option<ConnectionRecord>, TunnelError> {
        Ok(self.load()?.remove(name))
    }

    /// Every stored record, in name order. Empty is valid.
    pub fn list(&self) -> Result<BTreeMap<String, ConnectionRecord>, TunnelError> {
        self.load()
    }

    /// Removes a record (`Ok(true)` if it existed, `Ok(false)` if it didn't).
    pub fn delete(&self, name: &str) -> Result<bool, TunnelError> {
        let mut connections = self.load()?;
        if connections.remove(name).is_none() {
            return Ok(false);
        }
        debug!("Deleting connection '{}'", name);
        self.persist(&connections)?;
        Ok(true)
    }

    fn load(&self) -> Result<BTreeMap<String, ConnectionRecord>, TunnelError> {
        let text = fs::read_to_string(&self.file).map_err(|e| storage_err(&self.file, e))?;
        serde_json::from_str(&text)
            .map_err(|e| storage_err(&self.file, io::Error::new(io::ErrorKind::InvalidData, e)))
    }

    /// Whole-file rewrite via temp-then-rename: complete or not at all.
    fn persist(&self, connections: &BTreeMap<String, ConnectionRecord>) -> Result<(), TunnelError> {
        let text = serde_json::to_string_pretty(connections)
            .map_err(|e| storage_err(&self.file, io::Error::new(io::ErrorKind::InvalidData, e)))?;
        let tmp = self.file.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(|e| storage_err(&tmp, e))?;
        fs::rename(&tmp, &self.file).map_err(|e| storage_err(&self.file, e))?;
        Ok(())
    }
}

fn storage_err(path: &Path, source: io::Error) -> TunnelError {
    TunnelError::Storage {
        path: path.to_path_buf(),
        source,
    }
}
