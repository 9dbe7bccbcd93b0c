//! Row-oriented key/value storage (§4.1), following the teacher's
//! mutex-guarded-state-struct shape (`InMemoryLedgerService`,
//! `InMemoryAuditLog`).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

type Tables = HashMap<String, HashMap<String, Value>>;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn save(&self, table: &str, id: &str, record: Value) -> StorageResult<()>;
    async fn load(&self, table: &str, id: &str) -> StorageResult<Option<Value>>;
    async fn load_all(&self, table: &str) -> StorageResult<Vec<Value>>;
    async fn find(
        &self,
        table: &str,
        predicate: &(dyn Fn(&Value) -> bool + Send + Sync),
    ) -> StorageResult<Vec<Value>>;
    async fn delete(&self, table: &str, id: &str) -> StorageResult<bool>;
}

/// Transactional handle over a cloned snapshot of the tables map, passed
/// into an `InMemoryStorage::atomic` closure. Dropped without commit on
/// `Err`; swapped back into the backing store on `Ok`.
#[derive(Clone)]
pub struct AtomicHandle {
    scratch: Arc<Mutex<Tables>>,
}

impl AtomicHandle {
    pub async fn save(&self, table: &str, id: &str, record: Value) {
        self.scratch
            .lock()
            .await
            .entry(table.to_string())
            .or_default()
            .insert(id.to_string(), record);
    }

    pub async fn load(&self, table: &str, id: &str) -> Option<Value> {
        self.scratch.lock().await.get(table).and_then(|t| t.get(id)).cloned()
    }

    pub async fn load_all(&self, table: &str) -> Vec<Value> {
        self.scratch
            .lock()
            .await
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn delete(&self, table: &str, id: &str) -> bool {
        self.scratch
            .lock()
            .await
            .get_mut(table)
            .map(|t| t.remove(id).is_some())
            .unwrap_or(false)
    }
}

/// Single mutex-guarded `HashMap<table, HashMap<id, Value>>`, mirroring the
/// teacher's one-struct-per-service pattern.
#[derive(Default)]
pub struct InMemoryStorage {
    tables: Mutex<Tables>,
}

impl InMemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Runs `f` against a snapshot of the current tables. On `Ok`, the
    /// snapshot (as mutated by `f`) replaces the backing store atomically;
    /// on `Err`, the snapshot and every write inside it are discarded. The
    /// error type is caller-chosen so business-level failures (not just
    /// `StorageError`) can carry data out of a rolled-back scope.
    pub async fn atomic<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(AtomicHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let snapshot = self.tables.lock().await.clone();
        let scratch = Arc::new(Mutex::new(snapshot));
        let handle = AtomicHandle {
            scratch: scratch.clone(),
        };

        let result = f(handle).await;

        if result.is_ok() {
            let committed = scratch.lock().await.clone();
            *self.tables.lock().await = committed;
        }

        result
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn save(&self, table: &str, id: &str, record: Value) -> StorageResult<()> {
        self.tables
            .lock()
            .await
            .entry(table.to_string())
            .or_default()
            .insert(id.to_string(), record);
        Ok(())
    }

    async fn load(&self, table: &str, id: &str) -> StorageResult<Option<Value>> {
        Ok(self.tables.lock().await.get(table).and_then(|t| t.get(id)).cloned())
    }

    async fn load_all(&self, table: &str) -> StorageResult<Vec<Value>> {
        Ok(self
            .tables
            .lock()
            .await
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn find(
        &self,
        table: &str,
        predicate: &(dyn Fn(&Value) -> bool + Send + Sync),
    ) -> StorageResult<Vec<Value>> {
        Ok(self
            .tables
            .lock()
            .await
            .get(table)
            .map(|t| t.values().filter(|v| predicate(v)).cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, table: &str, id: &str) -> StorageResult<bool> {
        Ok(self
            .tables
            .lock()
            .await
            .get_mut(table)
            .map(|t| t.remove(id).is_some())
            .unwrap_or(false))
    }
}

/// Reserved for a durable backend; config loading and migrations for it are
/// out of scope. Schema sketch: one table per named table with a JSONB
/// `record` column keyed by `id`, plus a `tables(name)` registry row.
#[cfg(feature = "postgres-store")]
pub struct PostgresStorage;

#[cfg(feature = "postgres-store")]
#[async_trait]
impl Storage for PostgresStorage {
    async fn save(&self, _table: &str, _id: &str, _record: Value) -> StorageResult<()> {
        Err(StorageError::Unavailable("postgres-store is not implemented".into()))
    }

    async fn load(&self, _table: &str, _id: &str) -> StorageResult<Option<Value>> {
        Err(StorageError::Unavailable("postgres-store is not implemented".into()))
    }

    async fn load_all(&self, _table: &str) -> StorageResult<Vec<Value>> {
        Err(StorageError::Unavailable("postgres-store is not implemented".into()))
    }

    async fn find(
        &self,
        _table: &str,
        _predicate: &(dyn Fn(&Value) -> bool + Send + Sync),
    ) -> StorageResult<Vec<Value>> {
        Err(StorageError::Unavailable("postgres-store is not implemented".into()))
    }

    async fn delete(&self, _table: &str, _id: &str) -> StorageResult<bool> {
        Err(StorageError::Unavailable("postgres-store is not implemented".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let storage = InMemoryStorage::new();
        storage
            .save("transactions", "txn-1", serde_json::json!({"state": "PENDING"}))
            .await
            .expect("save");

        let loaded = storage.load("transactions", "txn-1").await.expect("load");
        assert_eq!(loaded, Some(serde_json::json!({"state": "PENDING"})));
    }

    #[tokio::test]
    async fn atomic_scope_discards_writes_on_error() {
        let storage = InMemoryStorage::new();

        let result: StorageResult<()> = storage
            .atomic(|handle| async move {
                handle.save("transactions", "txn-1", serde_json::json!({})).await;
                Err(StorageError::Unavailable("boom".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(storage.load("transactions", "txn-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn atomic_scope_commits_writes_on_success() {
        let storage = InMemoryStorage::new();

        storage
            .atomic(|handle| async move {
                handle
                    .save("transactions", "txn-1", serde_json::json!({"state": "COMPLETED"}))
                    .await;
                Ok::<_, StorageError>(())
            })
            .await
            .expect("commit");

        assert_eq!(
            storage.load("transactions", "txn-1").await.unwrap(),
            Some(serde_json::json!({"state": "COMPLETED"}))
        );
    }

    #[tokio::test]
    async fn find_filters_by_predicate() {
        let storage = InMemoryStorage::new();
        storage
            .save("transactions", "txn-1", serde_json::json!({"state": "PENDING"}))
            .await
            .unwrap();
        storage
            .save("transactions", "txn-2", serde_json::json!({"state": "COMPLETED"}))
            .await
            .unwrap();

        let pending = storage
            .find("transactions", &|v| v["state"] == "PENDING")
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }
}
