//! Request audit log
//!
//! Append-only record of every handled request: endpoint, status, latency,
//! caller when known, and the parsed JSON body for mutating calls. Written
//! asynchronously off the response path and queried by time window from the
//! admin surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use utoipa::ToSchema;

use crate::error::AppError;

/// One audited request.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    pub id: i64,
    pub endpoint: String,
    pub method: String,
    pub status: i64,
    pub latency_ms: i64,
    pub caller_id: Option<i64>,
    pub ip: String,
    pub request_body: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload; the row id and server-side fields come back on read.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub endpoint: String,
    pub method: String,
    pub status: i64,
    pub latency_ms: i64,
    pub caller_id: Option<i64>,
    pub ip: String,
    pub request_body: Option<String>,
}

impl AuditEvent {
    pub async fn insert(pool: &SqlitePool, event: NewAuditEvent) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO audit_events \
             (endpoint, method, status, latency_ms, caller_id, ip, request_body, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&event.endpoint)
        .bind(&event.method)
        .bind(event.status)
        .bind(event.latency_ms)
        .bind(event.caller_id)
        .bind(&event.ip)
        .bind(&event.request_body)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Events inside a closed time window, newest first.
    pub async fn find_window(
        pool: &SqlitePool,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Self>, AppError> {
        sqlx::query_as(
            "SELECT * FROM audit_events WHERE created_at >= $1 AND created_at <= $2 \
             ORDER BY created_at DESC",
        )
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}
