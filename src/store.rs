//! Local ephemeral key/value store carrying subject details and finished
//! responses between the intake step, the session and the reporting step.
//!
//! Values are stored as JSON. The typed helpers at the bottom are the only
//! way the engine reads or writes the two well-known keys, and they validate
//! what they read back.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::catalog::Catalog;
use crate::domain::{Response, SubjectDetails};

pub const SUBJECT_DETAILS_KEY: &str = "subject-details";
pub const RAW_RESPONSES_KEY: &str = "raw-responses";

#[derive(Debug, Error)]
pub enum LocalStoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("nothing stored under '{0}'")]
    Missing(String),

    #[error("invalid value under '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn put(&self, key: &str, value: Value) -> Result<(), LocalStoreError>;

    async fn get(&self, key: &str) -> Result<Option<Value>, LocalStoreError>;

    async fn remove(&self, key: &str) -> Result<(), LocalStoreError>;
}

/// Process-local store. One instance per taker.
#[derive(Debug, Clone, Default)]
pub struct MemoryLocalStore {
    values: Arc<RwLock<HashMap<String, Value>>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn put(&self, key: &str, value: Value) -> Result<(), LocalStoreError> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, LocalStoreError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

/// Directory-backed store: one `<key>.json` file per key.
#[derive(Debug, Clone)]
pub struct FileLocalStore {
    base_path: PathBuf,
}

impl FileLocalStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, LocalStoreError> {
        let safe = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(LocalStoreError::Invalid {
                key: key.to_string(),
                reason: "keys may only contain letters, digits, '-' and '_'".into(),
            });
        }
        Ok(self.base_path.join(format!("{key}.json")))
    }
}

#[async_trait]
impl LocalStore for FileLocalStore {
    async fn put(&self, key: &str, value: Value) -> Result<(), LocalStoreError> {
        let path = self.key_path(key)?;
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| LocalStoreError::Io(e.to_string()))?;
        let bytes = serde_json::to_vec_pretty(&value)
            .map_err(|e| LocalStoreError::Serialization(e.to_string()))?;
        fs::write(&path, bytes)
            .await
            .map_err(|e| LocalStoreError::Io(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, LocalStoreError> {
        let path = self.key_path(key)?;
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| LocalStoreError::Invalid {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LocalStoreError::Io(e.to_string())),
        }
    }

    async fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LocalStoreError::Io(e.to_string())),
        }
    }
}

// -------- Typed boundary --------

pub async fn save_subject_details(
    store: &dyn LocalStore,
    subject: &SubjectDetails,
) -> Result<(), LocalStoreError> {
    let value = serde_json::to_value(subject)
        .map_err(|e| LocalStoreError::Serialization(e.to_string()))?;
    store.put(SUBJECT_DETAILS_KEY, value).await
}

/// Subject details if present. Shape is checked, field rules are not.
pub async fn load_subject_details(
    store: &dyn LocalStore,
) -> Result<Option<SubjectDetails>, LocalStoreError> {
    match store.get(SUBJECT_DETAILS_KEY).await? {
        None => Ok(None),
        Some(v) => serde_json::from_value(v)
            .map(Some)
            .map_err(|e| LocalStoreError::Invalid {
                key: SUBJECT_DETAILS_KEY.into(),
                reason: e.to_string(),
            }),
    }
}

pub async fn save_raw_responses(
    store: &dyn LocalStore,
    responses: &[Response],
) -> Result<(), LocalStoreError> {
    let value = serde_json::to_value(responses)
        .map_err(|e| LocalStoreError::Serialization(e.to_string()))?;
    store.put(RAW_RESPONSES_KEY, value).await
}

/// Read finished responses back and check them against the catalog: every
/// question id must exist, every selected choice must belong to that
/// question, and no question may be answered twice.
#[instrument(level = "debug", skip_all)]
pub async fn load_raw_responses(
    store: &dyn LocalStore,
    catalog: &Catalog,
) -> Result<Vec<Response>, LocalStoreError> {
    let value = store
        .get(RAW_RESPONSES_KEY)
        .await?
        .ok_or_else(|| LocalStoreError::Missing(RAW_RESPONSES_KEY.into()))?;
    let responses: Vec<Response> =
        serde_json::from_value(value).map_err(|e| invalid_responses(e.to_string()))?;

    let mut seen = HashSet::new();
    for r in &responses {
        let question = catalog
            .find(r.question_id)
            .ok_or_else(|| invalid_responses(format!("unknown question id {}", r.question_id)))?;
        if !question.choices.contains(&r.selected_option) {
            return Err(invalid_responses(format!(
                "choice '{}' does not belong to question {}",
                r.selected_option.text, r.question_id
            )));
        }
        if !seen.insert(r.question_id) {
            return Err(invalid_responses(format!(
                "question {} answered more than once",
                r.question_id
            )));
        }
    }

    debug!(target: "assessment", count = responses.len(), "Loaded stored responses");
    Ok(responses)
}

fn invalid_responses(reason: String) -> LocalStoreError {
    LocalStoreError::Invalid {
        key: RAW_RESPONSES_KEY.into(),
        reason,
    }
}
