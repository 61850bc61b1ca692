// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Postgres-backed conversation repository.
//!
//! Sessions are keyed by `(project, session_id)`; the conversation travels as
//! its JSON serialization.  `last` returns the most recently updated session
//! for a project; `save_session` upserts.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::Row;

use conduit_model::{ConduitError, Conversation, ErrorCategory, SessionStore};

use crate::db::DbManager;

const CREATE_SQL: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    project    TEXT NOT NULL,
    session_id TEXT NOT NULL,
    name       TEXT,
    data       TEXT NOT NULL,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (project, session_id)
);";

pub struct SessionRepository {
    db: Arc<DbManager>,
    schema_ready: tokio::sync::Mutex<bool>,
}

impl SessionRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db, schema_ready: tokio::sync::Mutex::new(false) }
    }

    async fn pool(&self) -> Result<sqlx::PgPool, ConduitError> {
        let pool = self.db.get_pool().await?;
        let mut ready = self.schema_ready.lock().await;
        if !*ready {
            sqlx::query(CREATE_SQL)
                .execute(&pool)
                .await
                .map_err(db_err)?;
            *ready = true;
        }
        Ok(pool)
    }

    /// All session ids for a project, most recent first.
    pub async fn list(&self, project: &str) -> Result<Vec<String>, ConduitError> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            "SELECT session_id FROM sessions WHERE project = $1 ORDER BY updated_at DESC",
        )
        .bind(project)
        .fetch_all(&pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(|r| r.get("session_id")).collect())
    }

    pub async fn delete(&self, project: &str, session_id: &str) -> Result<(), ConduitError> {
        let pool = self.pool().await?;
        sqlx::query("DELETE FROM sessions WHERE project = $1 AND session_id = $2")
            .bind(project)
            .bind(session_id)
            .execute(&pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SessionRepository {
    async fn last(&self, project: &str) -> Result<Option<Conversation>, ConduitError> {
        let pool = self.pool().await?;
        let row = sqlx::query(
            "SELECT data FROM sessions WHERE project = $1 ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(project)
        .fetch_optional(&pool)
        .await
        .map_err(db_err)?;
        let Some(row) = row else { return Ok(None) };
        let data: String = row.get("data");
        let conversation = serde_json::from_str(&data).map_err(|e| {
            ConduitError::simple(
                "malformed_provider_response",
                format!("stored session is not decodable: {e}"),
                ErrorCategory::Parsing,
            )
        })?;
        Ok(Some(conversation))
    }

    async fn save_session(
        &self,
        project: &str,
        conversation: &Conversation,
        name: Option<&str>,
    ) -> Result<(), ConduitError> {
        let pool = self.pool().await?;
        let data = serde_json::to_string(conversation)
            .map_err(|e| ConduitError::validation(e.to_string()))?;
        sqlx::query(
            "INSERT INTO sessions (project, session_id, name, data, updated_at) \
             VALUES ($1, $2, $3, $4, CURRENT_TIMESTAMP) \
             ON CONFLICT (project, session_id) DO UPDATE \
             SET name = EXCLUDED.name, data = EXCLUDED.data, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(project)
        .bind(&conversation.id)
        .bind(name)
        .bind(&data)
        .execute(&pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

fn db_err(e: sqlx::Error) -> ConduitError {
    ConduitError::simple(
        "connection_error",
        format!("session repository error: {e}"),
        ErrorCategory::Network,
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // Live-database behavior is covered by deployments; here the state
    // machine around an unreachable DSN is what can be pinned down.

    #[tokio::test]
    async fn unreachable_database_is_a_network_error() {
        let db = Arc::new(DbManager::new("postgres://nobody@127.0.0.1:1/conduit"));
        let repo = SessionRepository::new(db);
        let err = repo.last("conduit").await.unwrap_err();
        assert_eq!(err.info.category, ErrorCategory::Network);
    }

    #[tokio::test]
    async fn save_on_unreachable_database_is_a_network_error() {
        let db = Arc::new(DbManager::new("postgres://nobody@127.0.0.1:1/conduit"));
        let repo = SessionRepository::new(db);
        let conversation = Conversation::new();
        let err = repo
            .save_session("conduit", &conversation, Some("demo"))
            .await
            .unwrap_err();
        assert_eq!(err.info.category, ErrorCategory::Network);
    }
}
