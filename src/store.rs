//! Session Persistence
//!
//! Saves a session's index entries and configuration snapshot to the app
//! data directory so the CLI can answer questions across invocations.
//! Writes are atomic (tmp + rename) to survive a crash mid-write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::Settings;
use crate::index::IndexEntry;

/// Directory name under the platform data dir.
const APP_DIR_NAME: &str = "sourcebook";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("invalid session name")]
    InvalidName,
    #[error("app data directory not found")]
    NoDataDir,
}

/// Validate that a session name contains only safe characters (alphanumeric,
/// dash, underscore). Rejects any path traversal attempts.
pub fn validate_session_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::InvalidName);
    }
    if name.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
        Ok(())
    } else {
        Err(StoreError::InvalidName)
    }
}

/// A persisted session: configuration snapshot plus the index entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub name: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub model_name: String,
    pub embedding_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    #[serde(default)]
    pub entries: Vec<IndexEntry>,
}

impl SessionRecord {
    pub fn new(name: &str, settings: &Settings, entries: Vec<IndexEntry>) -> Self {
        let now = Utc::now();
        SessionRecord {
            name: name.to_string(),
            created: now,
            updated: now,
            model_name: settings.model_name.clone(),
            embedding_model: settings.embedding_model.clone(),
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
            entries,
        }
    }

    /// Number of distinct source documents represented.
    pub fn document_count(&self) -> usize {
        let mut doc_ids: Vec<&str> =
            self.entries.iter().map(|e| e.chunk.doc_id.as_str()).collect();
        doc_ids.sort_unstable();
        doc_ids.dedup();
        doc_ids.len()
    }
}

/// Summary row for session listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub name: String,
    pub updated: DateTime<Utc>,
    pub documents: usize,
    pub chunks: usize,
}

/// Default on-disk location for sessions.
pub fn default_data_dir() -> Result<PathBuf, StoreError> {
    let base = dirs::data_dir().ok_or(StoreError::NoDataDir)?;
    Ok(base.join(APP_DIR_NAME))
}

fn session_dir(base: &Path, name: &str) -> Result<PathBuf, StoreError> {
    validate_session_name(name)?;
    Ok(base.join("sessions").join(format!("sess_{}", name)))
}

/// Atomic write: write to a .tmp sibling then rename into place.
fn atomic_write(path: &Path, contents: &str) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Save a session, creating its directory if needed.
pub fn save_session(base: &Path, record: &SessionRecord) -> Result<(), StoreError> {
    let dir = session_dir(base, &record.name)?;
    fs::create_dir_all(&dir)?;
    let contents = serde_json::to_string(record)?;
    atomic_write(&dir.join("session.json"), &contents)?;
    tracing::info!(name = %record.name, chunks = record.entries.len(), "Saved session");
    Ok(())
}

/// Load a session by name.
pub fn load_session(base: &Path, name: &str) -> Result<SessionRecord, StoreError> {
    let path = session_dir(base, name)?.join("session.json");
    if !path.exists() {
        return Err(StoreError::NotFound(name.to_string()));
    }
    let contents = fs::read_to_string(&path)?;
    let record: SessionRecord = serde_json::from_str(&contents)?;
    Ok(record)
}

/// List all sessions, most recently updated first. Unparseable session files
/// are skipped with a warning.
pub fn list_sessions(base: &Path) -> Result<Vec<SessionSummary>, StoreError> {
    let sessions_dir = base.join("sessions");
    if !sessions_dir.exists() {
        return Ok(Vec::new());
    }

    let mut summaries = Vec::new();
    for entry in fs::read_dir(&sessions_dir)? {
        let entry = entry?;
        let path = entry.path().join("session.json");
        if !path.exists() {
            continue;
        }
        match fs::read_to_string(&path)
            .map_err(StoreError::from)
            .and_then(|c| serde_json::from_str::<SessionRecord>(&c).map_err(StoreError::from))
        {
            Ok(record) => summaries.push(SessionSummary {
                name: record.name.clone(),
                updated: record.updated,
                documents: record.document_count(),
                chunks: record.entries.len(),
            }),
            Err(e) => {
                tracing::warn!(path = ?path, error = %e, "Failed to read session");
            }
        }
    }

    summaries.sort_by(|a, b| b.updated.cmp(&a.updated));
    Ok(summaries)
}

/// Delete a session directory.
pub fn delete_session(base: &Path, name: &str) -> Result<(), StoreError> {
    let dir = session_dir(base, name)?;
    if !dir.exists() {
        return Err(StoreError::NotFound(name.to_string()));
    }
    fs::remove_dir_all(&dir)?;
    Ok(())
}
