//! Narrow interfaces to non-transport collaborators.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::CoreResult;

/// A question-answering backend (LLM, rules engine, ...).
///
/// The core never retries on the backend's behalf; failures surface as
/// [`CoreError::Backend`](crate::CoreError::Backend) to the calling handler.
#[async_trait]
pub trait AskBackend: Send + Sync + 'static {
    async fn ask(&self, prompt: &str) -> CoreResult<String>;
}

/// Minimal key-value persistence for small documents (ban lists, settings).
///
/// Assumed single-writer and infrequent; it sits outside the concurrency
/// guarantees of the core.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn load(&self, key: &str) -> CoreResult<Option<Value>>;
    async fn save(&self, key: &str, value: &Value) -> CoreResult<()>;
}

/// In-memory [`KvStore`]; contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn load(&self, key: &str) -> CoreResult<Option<Value>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn save(&self, key: &str, value: &Value) -> CoreResult<()> {
        self.entries.write().insert(key.to_string(), value.clone());
        Ok(())
    }
}
