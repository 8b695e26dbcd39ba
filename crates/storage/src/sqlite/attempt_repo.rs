use async_trait::async_trait;
use chrono::Utc;
use exam_core::model::{AttemptId, TestId};
use sqlx::Row;

use crate::repository::{AttemptStore, StorageError};

use super::SqliteRepository;

fn test_key(test_id: TestId) -> Result<i64, StorageError> {
    i64::try_from(test_id.value())
        .map_err(|_| StorageError::Serialization(format!("test id {test_id} out of range")))
}

#[async_trait]
impl AttemptStore for SqliteRepository {
    async fn get(&self, test_id: TestId) -> Result<Option<AttemptId>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT attempt_id
            FROM attempt_pointers
            WHERE test_id = ?1
            ",
        )
        .bind(test_key(test_id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| StorageError::Connection(err.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row
            .try_get("attempt_id")
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        AttemptId::parse(&raw)
            .map(Some)
            .map_err(|err| StorageError::Serialization(err.to_string()))
    }

    async fn set(&self, test_id: TestId, attempt_id: &AttemptId) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO attempt_pointers (test_id, attempt_id, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(test_id) DO UPDATE SET
                attempt_id = excluded.attempt_id,
                updated_at = excluded.updated_at
            ",
        )
        .bind(test_key(test_id)?)
        .bind(attempt_id.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|err| StorageError::Connection(err.to_string()))?;

        Ok(())
    }

    async fn clear(&self, test_id: TestId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM attempt_pointers WHERE test_id = ?1")
            .bind(test_key(test_id)?)
            .execute(&self.pool)
            .await
            .map_err(|err| StorageError::Connection(err.to_string()))?;
        Ok(())
    }
}
