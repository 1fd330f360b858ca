//! Per-session JSON persistence, one file per conversation under a
//! sessions directory.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DoctalkError, Result};
use crate::llm::ChatMessage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
}

impl From<&ChatMessage> for StoredMessage {
    fn from(m: &ChatMessage) -> Self {
        Self { role: m.role.to_string(), content: m.content.clone() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub messages: Vec<StoredMessage>,
    pub contexts: Vec<String>,
    pub created: DateTime<Utc>,
}

pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    pub fn list(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn load(&self, id: &str) -> Result<SessionRecord> {
        let path = self.path_for(id);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DoctalkError::SessionNotFound(id.to_string())
            } else {
                DoctalkError::Io(e)
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|e| DoctalkError::Serialization(e.to_string()))
    }

    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| DoctalkError::Serialization(e.to_string()))?;
        let tmp = self.path_for(&record.id).with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, self.path_for(&record.id))?;
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id);
        fs::remove_file(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DoctalkError::SessionNotFound(id.to_string())
            } else {
                DoctalkError::Io(e)
            }
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            messages: vec![StoredMessage { role: "user".into(), content: "hi".into() }],
            contexts: vec!["ctx".into()],
            created: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc),
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.save(&sample("abc")).unwrap();
        let loaded = store.load("abc").unwrap();
        assert_eq!(loaded.messages[0].content, "hi");
        assert_eq!(loaded.contexts, vec!["ctx".to_string()]);
    }

    #[test]
    fn list_returns_sorted_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.save(&sample("b")).unwrap();
        store.save(&sample("a")).unwrap();
        assert_eq!(store.list().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn load_missing_session_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(matches!(store.load("missing"), Err(DoctalkError::SessionNotFound(_))));
    }

    #[test]
    fn delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.save(&sample("x")).unwrap();
        store.delete("x").unwrap();
        assert!(matches!(store.load("x"), Err(DoctalkError::SessionNotFound(_))));
    }
}
