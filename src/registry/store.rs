//! Ephemeral key-value backend for the peer registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("key {0} holds the wrong kind of value")]
    WrongType(String),

    #[error("backend unreachable: {0}")]
    Unreachable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value store with plain string keys and hash keys.
///
/// Every operation is atomic on the single key it touches.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    /// Stores `value` unless the key already holds one. Returns whatever the key holds afterwards.
    async fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<String>;
    async fn delete(&self, key: &str) -> StoreResult<bool>;
    /// Deletes the key only while it still holds `expected`.
    async fn delete_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Sets a field, returning the value it replaced.
    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<Option<String>>;
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;
    /// Removes a field, returning the value it held.
    async fn hdel(&self, key: &str, field: &str) -> StoreResult<Option<String>>;
    async fn hkeys(&self, key: &str) -> StoreResult<Vec<String>>;
    async fn hvals(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Drops everything. Only for test and development bootstrap.
    async fn flush(&self) -> StoreResult<()>;
}

#[derive(Debug, Clone)]
enum Slot {
    Value(String),
    Hash(HashMap<String, String>),
}

/// In-process store. Contents vanish with the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slots: Arc<DashMap<String, Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType(key.to_owned())
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.slots.get(key).as_deref() {
            None => Ok(None),
            Some(Slot::Value(v)) => Ok(Some(v.clone())),
            Some(Slot::Hash(_)) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.slots.insert(key.to_owned(), Slot::Value(value.to_owned()));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<String> {
        match self.slots.entry(key.to_owned()) {
            Entry::Occupied(entry) => match entry.get() {
                Slot::Value(v) => Ok(v.clone()),
                Slot::Hash(_) => Err(wrong_type(key)),
            },
            Entry::Vacant(entry) => {
                entry.insert(Slot::Value(value.to_owned()));
                Ok(value.to_owned())
            }
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.slots.remove(key).is_some())
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool> {
        Ok(self
            .slots
            .remove_if(key, |_, slot| matches!(slot, Slot::Value(v) if v == expected))
            .is_some())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<Option<String>> {
        let mut slot = self
            .slots
            .entry(key.to_owned())
            .or_insert_with(|| Slot::Hash(HashMap::new()));
        match slot.value_mut() {
            Slot::Hash(hash) => Ok(hash.insert(field.to_owned(), value.to_owned())),
            Slot::Value(_) => Err(wrong_type(key)),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        match self.slots.get(key).as_deref() {
            None => Ok(None),
            Some(Slot::Hash(hash)) => Ok(hash.get(field).cloned()),
            Some(Slot::Value(_)) => Err(wrong_type(key)),
        }
    }

    async fn hdel(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let Entry::Occupied(mut entry) = self.slots.entry(key.to_owned()) else {
            return Ok(None);
        };
        let (removed, now_empty) = match entry.get_mut() {
            Slot::Hash(hash) => (hash.remove(field), hash.is_empty()),
            Slot::Value(_) => return Err(wrong_type(key)),
        };
        if now_empty {
            entry.remove();
        }
        Ok(removed)
    }

    async fn hkeys(&self, key: &str) -> StoreResult<Vec<String>> {
        match self.slots.get(key).as_deref() {
            None => Ok(Vec::new()),
            Some(Slot::Hash(hash)) => Ok(hash.keys().cloned().collect()),
            Some(Slot::Value(_)) => Err(wrong_type(key)),
        }
    }

    async fn hvals(&self, key: &str) -> StoreResult<Vec<String>> {
        match self.slots.get(key).as_deref() {
            None => Ok(Vec::new()),
            Some(Slot::Hash(hash)) => Ok(hash.values().cloned().collect()),
            Some(Slot::Value(_)) => Err(wrong_type(key)),
        }
    }

    async fn flush(&self) -> StoreResult<()> {
        self.slots.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_absent_keeps_first_value() {
        let store = MemoryStore::new();
        assert_eq!(store.set_if_absent("k", "one").await.unwrap(), "one");
        assert_eq!(store.set_if_absent("k", "two").await.unwrap(), "one");
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn delete_if_eq_only_matches_current_value() {
        let store = MemoryStore::new();
        store.set("k", "one").await.unwrap();
        assert!(!store.delete_if_eq("k", "two").await.unwrap());
        assert!(store.delete_if_eq("k", "one").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn hash_fields() {
        let store = MemoryStore::new();
        assert_eq!(store.hset("h", "a", "1").await.unwrap(), None);
        assert_eq!(store.hset("h", "a", "one").await.unwrap().as_deref(), Some("1"));
        store.hset("h", "a", "1").await.unwrap();
        store.hset("h", "b", "2").await.unwrap();
        assert_eq!(store.hget("h", "a").await.unwrap().as_deref(), Some("1"));

        let mut keys = store.hkeys("h").await.unwrap();
        keys.sort();
        assert_eq!(keys, ["a", "b"]);

        assert_eq!(store.hdel("h", "a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.hdel("h", "a").await.unwrap(), None);
        assert_eq!(store.hvals("h").await.unwrap(), ["2"]);

        // the last field takes the hash with it
        store.hdel("h", "b").await.unwrap();
        assert_eq!(store.get("h").await.unwrap(), None);
    }

    #[tokio::test]
    async fn wrong_type_is_an_error() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        assert!(matches!(store.hget("k", "f").await, Err(StoreError::WrongType(_))));
        store.hset("h", "f", "v").await.unwrap();
        assert!(matches!(store.get("h").await, Err(StoreError::WrongType(_))));
    }

    #[tokio::test]
    async fn flush_clears_everything() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        store.hset("h", "f", "v").await.unwrap();
        store.flush().await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.hkeys("h").await.unwrap(), Vec::<String>::new());
    }
}
