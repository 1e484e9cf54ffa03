//! `set_memory`: facts the model chooses to remember about the user.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ToolContext, ToolDefinition, ToolError, ToolHandler, parse_args};

#[derive(Default)]
struct MemoryInner {
    epoch: u64,
    entries: BTreeMap<String, String>,
}

/// Session-scoped key/value memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.lock().entries.insert(key.into(), value.into());
    }

    /// Write on behalf of a call made in `epoch`. Nothing is written, and
    /// `false` returned, once the store has been reset for a later session.
    pub fn set_in(&self, epoch: u64, key: impl Into<String>, value: impl Into<String>) -> bool {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            return false;
        }
        inner.entries.insert(key.into(), value.into());
        true
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().entries.get(key).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner.lock().entries.clone()
    }

    /// Drop every entry and start accepting writes for `epoch`.
    pub fn reset(&self, epoch: u64) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.epoch = epoch;
    }
}

#[derive(Deserialize)]
struct SetMemoryArgs {
    key: String,
    value: String,
}

pub struct SetMemoryTool {
    store: MemoryStore,
}

impl SetMemoryTool {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for SetMemoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "set_memory",
            "Saves important data about the user into memory.",
            json!({
                "type": "object",
                "properties": {
                    "key": {
                        "type": "string",
                        "description": "The key of the memory value. Always use lowercase and underscores, no other characters."
                    },
                    "value": {
                        "type": "string",
                        "description": "Value can be anything represented as a string"
                    }
                },
                "required": ["key", "value"]
            }),
        )
    }

    async fn call(&self, args: Value, ctx: ToolContext) -> Result<Value, ToolError> {
        let SetMemoryArgs { key, value } = parse_args(args)?;
        tracing::debug!("Remembering {}", key);
        if !self.store.set_in(ctx.epoch, key, value) {
            return Err(ToolError::Failed("Session has ended".to_string()));
        }
        Ok(json!({ "ok": true }))
    }
}
