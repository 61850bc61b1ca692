// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Durable odometer layer: batched inserts into a shared `token_events`
//! table, plus the reporting queries the CLI exposes.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::Row;
use tracing::debug;

use conduit_model::ConduitError;

use super::event::TokenEvent;
use super::memory::TokenTotals;
use crate::db::DbManager;

const CREATE_SQL: &str = "
CREATE TABLE IF NOT EXISTS token_events (
    id            SERIAL PRIMARY KEY,
    provider      TEXT NOT NULL,
    model         TEXT NOT NULL,
    input_tokens  INTEGER NOT NULL,
    output_tokens INTEGER NOT NULL,
    timestamp     BIGINT NOT NULL,
    host          TEXT NOT NULL,
    created_at    TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);";

/// How events may be grouped by [`PersistentOdometer::get_aggregates`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Provider,
    Model,
    Host,
    Date,
}

impl GroupBy {
    fn select_clause(self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Model => "model",
            Self::Host => "host",
            // epoch seconds → calendar date, server-side
            Self::Date => "DATE(to_timestamp(timestamp))::text",
        }
    }
}

/// Overall totals reported by [`PersistentOdometer::get_overall_stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverallStats {
    pub requests: u64,
    pub input: u64,
    pub output: u64,
    pub total_tokens: u64,
    pub providers: u64,
    pub models: u64,
}

pub struct PersistentOdometer {
    db: Arc<DbManager>,
    schema_ready: tokio::sync::Mutex<bool>,
}

impl PersistentOdometer {
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

    /// Insert a batch of events.  Empty batches are a no-op.
    pub async fn store_events(&self, events: &[TokenEvent]) -> Result<(), ConduitError> {
        if events.is_empty() {
            return Ok(());
        }
        let pool = self.pool().await?;
        let mut tx = pool.begin().await.map_err(db_err)?;
        for e in events {
            sqlx::query(
                "INSERT INTO token_events \
                 (provider, model, input_tokens, output_tokens, timestamp, host) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&e.provider)
            .bind(&e.model)
            .bind(e.input_tokens as i32)
            .bind(e.output_tokens as i32)
            .bind(e.timestamp_s)
            .bind(&e.host)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        debug!(count = events.len(), "odometer flush stored events");
        Ok(())
    }

    /// One-query overall summary.
    pub async fn get_overall_stats(&self) -> Result<OverallStats, ConduitError> {
        let pool = self.pool().await?;
        let row = sqlx::query(
            "SELECT COUNT(*) AS requests, \
                    COALESCE(SUM(input_tokens), 0)::bigint AS total_input, \
                    COALESCE(SUM(output_tokens), 0)::bigint AS total_output, \
                    COUNT(DISTINCT provider) AS unique_providers, \
                    COUNT(DISTINCT model) AS unique_models \
             FROM token_events",
        )
        .fetch_one(&pool)
        .await
        .map_err(db_err)?;

        let input: i64 = row.get("total_input");
        let output: i64 = row.get("total_output");
        Ok(OverallStats {
            requests: row.get::<i64, _>("requests") as u64,
            input: input as u64,
            output: output as u64,
            total_tokens: (input + output) as u64,
            providers: row.get::<i64, _>("unique_providers") as u64,
            models: row.get::<i64, _>("unique_models") as u64,
        })
    }

    /// One-query grouped aggregation over an optional date window.
    pub async fn get_aggregates(
        &self,
        group_by: GroupBy,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<BTreeMap<String, TokenTotals>, ConduitError> {
        let pool = self.pool().await?;
        let group = group_by.select_clause();
        // The group expression comes from a closed enum, never from input.
        let sql = format!(
            "SELECT {group} AS group_key, \
                    COALESCE(SUM(input_tokens), 0)::bigint AS total_input, \
                    COALESCE(SUM(output_tokens), 0)::bigint AS total_output \
             FROM token_events \
             WHERE timestamp >= $1 AND timestamp <= $2 \
             GROUP BY group_key \
             ORDER BY (SUM(input_tokens) + SUM(output_tokens)) DESC",
        );
        let start_ts = start_date
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(0);
        let end_ts = end_date
            .and_then(|d| d.and_hms_opt(23, 59, 59))
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(i64::MAX);

        let rows = sqlx::query(&sql)
            .bind(start_ts)
            .bind(end_ts)
            .fetch_all(&pool)
            .await
            .map_err(db_err)?;

        let mut out = BTreeMap::new();
        for row in rows {
            let key: String = row.get("group_key");
            let input: i64 = row.get("total_input");
            let output: i64 = row.get("total_output");
            out.insert(
                key,
                TokenTotals {
                    input: input as u64,
                    output: output as u64,
                    total: (input + output) as u64,
                },
            );
        }
        Ok(out)
    }
}

fn db_err(e: sqlx::Error) -> ConduitError {
    ConduitError::simple(
        "connection_error",
        format!("odometer database error: {e}"),
        conduit_model::ErrorCategory::Network,
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
