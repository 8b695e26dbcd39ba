use async_trait::async_trait;
use exam_core::model::{AttemptId, TestId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Resume pointer contract.
///
/// Holds at most one attempt id per test and survives reloads. Answer content is
/// never stored here; the backend owns it.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Look up the in-progress attempt for `test_id`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backing store cannot be read.
    async fn get(&self, test_id: TestId) -> Result<Option<AttemptId>, StorageError>;

    /// Point `test_id` at `attempt_id`, replacing any previous pointer.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the pointer cannot be written.
    async fn set(&self, test_id: TestId, attempt_id: &AttemptId) -> Result<(), StorageError>;

    /// Remove the pointer for `test_id`. Clearing a missing pointer is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the pointer cannot be removed.
    async fn clear(&self, test_id: TestId) -> Result<(), StorageError>;
}

/// Process-local store for tests and prototyping.
///
/// Clones share the same map, so a "reloaded" controller built from a clone sees
/// the pointers written by the previous one.
#[derive(Clone, Default)]
pub struct InMemoryAttemptStore {
    pointers: Arc<Mutex<HashMap<TestId, AttemptId>>>,
}

impl InMemoryAttemptStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all pointers, for assertions.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn entries(&self) -> Result<HashMap<TestId, AttemptId>, StorageError> {
        let guard = self
            .pointers
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.clone())
    }
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn get(&self, test_id: TestId) -> Result<Option<AttemptId>, StorageError> {
        let guard = self
            .pointers
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&test_id).cloned())
    }

    async fn set(&self, test_id: TestId, attempt_id: &AttemptId) -> Result<(), StorageError> {
        let mut guard = self
            .pointers
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(test_id, attempt_id.clone());
        Ok(())
    }

    async fn clear(&self, test_id: TestId) -> Result<(), StorageError> {
        let mut guard = self
            .pointers
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(&test_id);
        Ok(())
    }
}

/// Store handle behind a trait object for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub attempts: Arc<dyn AttemptStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let attempts: Arc<dyn AttemptStore> = Arc::new(InMemoryAttemptStore::new());
        Self { attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(raw: &str) -> AttemptId {
        AttemptId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn set_get_clear_round_trip() {
        let store = InMemoryAttemptStore::new();
        let test_id = TestId::new(42);

        assert_eq!(store.get(test_id).await.unwrap(), None);
        store.set(test_id, &attempt("a1")).await.unwrap();
        assert_eq!(store.get(test_id).await.unwrap(), Some(attempt("a1")));

        store.clear(test_id).await.unwrap();
        assert_eq!(store.get(test_id).await.unwrap(), None);
        // clearing twice is fine
        store.clear(test_id).await.unwrap();
    }

    #[tokio::test]
    async fn pointers_are_per_test_and_shared_across_clones() {
        let store = InMemoryAttemptStore::new();
        let reloaded = store.clone();

        store.set(TestId::new(1), &attempt("a1")).await.unwrap();
        store.set(TestId::new(2), &attempt("b7")).await.unwrap();
        store.set(TestId::new(1), &attempt("a2")).await.unwrap();

        assert_eq!(reloaded.get(TestId::new(1)).await.unwrap(), Some(attempt("a2")));
        assert_eq!(reloaded.get(TestId::new(2)).await.unwrap(), Some(attempt("b7")));
        assert_eq!(reloaded.entries().unwrap().len(), 2);
    }
}
