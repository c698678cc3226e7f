use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

/// Directory under the project root holding everything the engine owns.
pub const WORKSPACE_DIR: &str = ".agent_workspace";

const BACKUPS_DIR: &str = "backups";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to read project file: {0}")]
    ReadError(std::io::Error),
    #[error("Failed to write project file: {0}")]
    WriteError(std::io::Error),
    #[error("Failed to create project directory: {0}")]
    CreateDirError(std::io::Error),
    #[error("Failed to parse project file: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Flat-file persistence rooted at the project directory. Relative paths
/// passed to the read/write methods resolve against that root. Every
/// overwrite of an existing file first copies it into the workspace backup
/// directory, so no state transition is destructive.
#[derive(Debug, Clone)]
pub struct ProjectStorage {
    root: PathBuf,
}

impl ProjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.root.join(WORKSPACE_DIR)
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.root.join(rel).exists()
    }

    /// Create a directory (and parents) under the root.
    pub fn ensure_dir(&self, rel: &str) -> Result<(), StorageError> {
        fs::create_dir_all(self.root.join(rel)).map_err(StorageError::CreateDirError)
    }

    /// Read a file, mapping "not found" to `None` so callers can treat a
    /// missing file as ordinary state.
    pub fn read_text(&self, rel: &str) -> Result<Option<String>, StorageError> {
        let path = self.root.join(rel);
        match fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::ReadError(e)),
        }
    }

    pub fn read_json<T: DeserializeOwned>(&self, rel: &str) -> Result<Option<T>, StorageError> {
        match self.read_text(rel)? {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    pub fn write_text(&self, rel: &str, contents: &str) -> Result<(), StorageError> {
        let target = self.root.join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(StorageError::CreateDirError)?;
        }
        self.backup_existing(&target)?;
        fs::write(&target, contents).map_err(|e| {
            error!(?e, "Failed to write project file: {:?}", target);
            StorageError::WriteError(e)
        })
    }

    /// Serialize pretty-printed; the files double as human-readable project
    /// artifacts.
    pub fn write_json<T: Serialize>(&self, rel: &str, value: &T) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(value)?;
        self.write_text(rel, &json)
    }

    /// Copy an about-to-be-overwritten file into
    /// `.agent_workspace/backups/{unix_millis}_{uuid}_{file_name}`.
    fn backup_existing(&self, target: &Path) -> Result<(), StorageError> {
        if !target.exists() {
            return Ok(());
        }
        let backups = self.workspace_dir().join(BACKUPS_DIR);
        fs::create_dir_all(&backups).map_err(StorageError::CreateDirError)?;
        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file");
        let backup_name = format!(
            "{}_{}_{}",
            chrono::Utc::now().timestamp_millis(),
            Uuid::new_v4(),
            file_name
        );
        fs::copy(target, backups.join(&backup_name)).map_err(StorageError::WriteError)?;
        debug!(backup = %backup_name, "backed up file before overwrite");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_missing_file_is_none() {
        let dir = tempdir().expect("Failed to create temp directory");
        let storage = ProjectStorage::new(dir.path());
        assert!(
            storage
                .read_text("tasks.json")
                .expect("Missing file should not be an error")
                .is_none()
        );
    }

    #[test]
    fn write_and_read_json_roundtrip() {
        let dir = tempdir().expect("Failed to create temp directory");
        let storage = ProjectStorage::new(dir.path());
        let value = serde_json::json!({"id": "p1", "title": "Demo"});
        storage
            .write_json("tasks.json", &value)
            .expect("Failed to write tasks file");

        let loaded: serde_json::Value = storage
            .read_json("tasks.json")
            .expect("Failed to read tasks file")
            .expect("Tasks file should exist");
        assert_eq!(loaded, value);

        let raw = storage
            .read_text("tasks.json")
            .expect("Failed to read raw text")
            .expect("Tasks file should exist");
        assert!(raw.contains('\n'), "JSON should be pretty-printed");
    }

    #[test]
    fn nested_writes_create_parent_directories() {
        let dir = tempdir().expect("Failed to create temp directory");
        let storage = ProjectStorage::new(dir.path());
        storage
            .write_text(".agent_workspace/history/transcript.json", "[]")
            .expect("Failed to write nested file");
        assert!(storage.exists(".agent_workspace/history/transcript.json"));
    }

    #[test]
    fn first_write_leaves_no_backup() {
        let dir = tempdir().expect("Failed to create temp directory");
        let storage = ProjectStorage::new(dir.path());
        storage
            .write_text("tasks.json", "{}")
            .expect("Failed to write tasks file");
        assert!(!storage.workspace_dir().join(BACKUPS_DIR).exists());
    }

    #[test]
    fn overwrite_backs_up_previous_content() {
        let dir = tempdir().expect("Failed to create temp directory");
        let storage = ProjectStorage::new(dir.path());
        storage
            .write_text("tasks.json", "first")
            .expect("Failed to write tasks file");
        storage
            .write_text("tasks.json", "second")
            .expect("Failed to overwrite tasks file");

        let backups = storage.workspace_dir().join(BACKUPS_DIR);
        let entries: Vec<_> = fs::read_dir(&backups)
            .expect("Backups directory should exist")
            .filter_map(Result::ok)
            .collect();
        assert_eq!(entries.len(), 1, "One overwrite means one backup");

        let name = entries[0].file_name();
        let name = name.to_str().expect("Backup name should be UTF-8");
        let parts: Vec<&str> = name.splitn(3, '_').collect();
        assert_eq!(parts.len(), 3, "Backup name should be millis_uuid_name");
        parts[0]
            .parse::<i64>()
            .expect("First segment should be a millisecond timestamp");
        Uuid::parse_str(parts[1]).expect("Second segment should be a UUID");
        assert_eq!(parts[2], "tasks.json");

        let saved = fs::read_to_string(entries[0].path()).expect("Failed to read backup");
        assert_eq!(saved, "first", "Backup should hold the pre-overwrite content");
    }
}
