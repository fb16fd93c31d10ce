use crate::errors::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

pub const CONTACTS_KEY: &str = "crm-contacts";
pub const INTERACTIONS_KEY: &str = "crm-interactions";
pub const TASKS_KEY: &str = "crm-tasks";
pub const KPIS_KEY: &str = "kpi-kpis";

/// String-keyed JSON document storage, the shape browser local storage has.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> AppResult<()>;
    fn remove(&self, key: &str) -> AppResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| AppError::Internal("memory store mutex poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AppError::Internal("memory store mutex poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AppError::Internal("memory store mutex poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

/// Reads a JSON array stored under `key`.
///
/// Returns `None` when nothing is stored or the stored document does not parse;
/// the malformed case is logged and the caller falls back to its default.
pub fn load_collection<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> AppResult<Option<Vec<T>>> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };

    match serde_json::from_str::<Vec<T>>(&raw) {
        Ok(items) => Ok(Some(items)),
        Err(error) => {
            tracing::warn!(key, error = %error, "discarding malformed persisted collection");
            Ok(None)
        }
    }
}

pub fn save_collection<T: Serialize>(store: &dyn KeyValueStore, key: &str, items: &[T]) -> AppResult<()> {
    let raw = serde_json::to_string(items)?;
    store.set(key, &raw)?;
    tracing::debug!(key, count = items.len(), "persisted collection");
    Ok(())
}
