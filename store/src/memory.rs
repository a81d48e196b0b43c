use crate::{Result, StoreOp};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

/// In-memory state store for tests and local development. Batches apply
/// under one lock, so they are atomic the way the remote store's PATCH is.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a key, for assertions.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.items.lock().get(key).cloned()
    }
}

#[async_trait]
impl crate::StateStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.items.lock().get(key).cloned())
    }

    async fn apply(&self, ops: Vec<StoreOp>) -> Result<()> {
        let mut items = self.items.lock();
        for op in ops {
            match op {
                StoreOp::Upsert { key, value } => {
                    items.insert(key, value);
                }
                StoreOp::Delete { key } => {
                    items.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StateStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_delete_roundtrip() {
        let store = MemoryStore::new();

        store
            .apply(vec![
                StoreOp::upsert("a", json!(1)),
                StoreOp::upsert("b", json!("two")),
            ])
            .await
            .unwrap();
        assert_eq!(store.read("a").await.unwrap(), Some(json!(1)));

        store.apply(vec![StoreOp::delete("a")]).await.unwrap();
        assert_eq!(store.read("a").await.unwrap(), None);
        assert_eq!(store.read("b").await.unwrap(), Some(json!("two")));
    }
}
