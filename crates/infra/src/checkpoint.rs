//! Consumer checkpoint persistence.
//!
//! A checkpoint is the last log position a named consumer has fully forwarded.
//! It lets a consumer:
//! - resume after a restart without redelivering entries at or below it
//! - be rewound by deleting (or lowering) its row

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::instrument;

use omnistock_events::LogPosition;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint storage error: {0}")]
    Storage(String),

    #[error("stored checkpoint is corrupt: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last committed position for `consumer`, if any.
    async fn load(&self, consumer: &str) -> Result<Option<LogPosition>, CheckpointError>;

    /// Record `position` as fully forwarded for `consumer`.
    async fn save(&self, consumer: &str, position: LogPosition) -> Result<(), CheckpointError>;
}

#[async_trait]
impl<S> CheckpointStore for Arc<S>
where
    S: CheckpointStore + ?Sized,
{
    async fn load(&self, consumer: &str) -> Result<Option<LogPosition>, CheckpointError> {
        (**self).load(consumer).await
    }

    async fn save(&self, consumer: &str, position: LogPosition) -> Result<(), CheckpointError> {
        (**self).save(consumer, position).await
    }
}

/// In-memory checkpoint store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    positions: Mutex<HashMap<String, LogPosition>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, consumer: &str) -> Result<Option<LogPosition>, CheckpointError> {
        let positions = self
            .positions
            .lock()
            .map_err(|_| CheckpointError::Storage("lock poisoned".to_string()))?;
        Ok(positions.get(consumer).copied())
    }

    async fn save(&self, consumer: &str, position: LogPosition) -> Result<(), CheckpointError> {
        let mut positions = self
            .positions
            .lock()
            .map_err(|_| CheckpointError::Storage("lock poisoned".to_string()))?;
        positions.insert(consumer.to_string(), position);
        Ok(())
    }
}

/// Postgres-backed checkpoint store (`consumer_checkpoints` table).
#[derive(Debug, Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    #[instrument(skip(self), err)]
    async fn load(&self, consumer: &str) -> Result<Option<LogPosition>, CheckpointError> {
        let row = sqlx::query(
            r#"
            SELECT last_position
            FROM consumer_checkpoints
            WHERE consumer_name = $1
            "#,
        )
        .bind(consumer)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CheckpointError::Storage(format!("load failed: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row
            .try_get("last_position")
            .map_err(|e| CheckpointError::Storage(format!("load failed: {e}")))?;
        raw.parse()
            .map(Some)
            .map_err(|e| CheckpointError::Corrupt(format!("{consumer}: {e}")))
    }

    #[instrument(skip(self), fields(position = %position), err)]
    async fn save(&self, consumer: &str, position: LogPosition) -> Result<(), CheckpointError> {
        sqlx::query(
            r#"
            INSERT INTO consumer_checkpoints (consumer_name, last_position)
            VALUES ($1, $2)
            ON CONFLICT (consumer_name)
            DO UPDATE SET
                last_position = EXCLUDED.last_position,
                updated_at = NOW()
            "#,
        )
        .bind(consumer)
        .bind(position.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| CheckpointError::Storage(format!("save failed: {e}")))?;
        Ok(())
    }
}
