// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session CRUD operations.

use chrono::Utc;
use rusqlite::params;

use crate::database::Database;
use crate::error::StorageError;
use crate::models::{NewSession, SessionRow, SessionStatus};

/// Create a new session row with `status = active`. Returns the assigned id.
pub async fn create_session(db: &Database, session: NewSession) -> Result<i64, StorageError> {
    db.connection()
        .call(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO sessions
                    (review_id, provider_id, model_id, context_item_id, status, agent_handle, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'active', NULL, ?5, ?5)",
                params![
                    session.review_id,
                    session.provider_id,
                    session.model_id,
                    session.context_item_id,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(Into::into)
}

/// Fetch a session by id.
pub async fn get_session(db: &Database, id: i64) -> Result<Option<SessionRow>, StorageError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, review_id, provider_id, model_id, context_item_id, status,
                        agent_handle, created_at, updated_at
                 FROM sessions WHERE id = ?1",
            )?;
            let result = stmt.query_row(params![id], row_to_session);
            match result {
                Ok(row) => Ok(Some(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(Into::into)
}

/// List every session with `status = active`. Used on startup to reconcile
/// persisted state against the (empty, just-booted) in-memory live map.
pub async fn list_active_sessions(db: &Database) -> Result<Vec<SessionRow>, StorageError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, review_id, provider_id, model_id, context_item_id, status,
                        agent_handle, created_at, updated_at
                 FROM sessions WHERE status = 'active' ORDER BY id ASC",
            )?;
            let rows = stmt.query_map([], row_to_session)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(Into::into)
}

/// Update a session's status.
pub async fn update_status(
    db: &Database,
    id: i64,
    status: SessionStatus,
) -> Result<(), StorageError> {
    db.connection()
        .call(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, id],
            )?;
            Ok(())
        })
        .await
        .map_err(Into::into)
}

/// Persist the provider-specific agent handle for later `Resume`.
pub async fn set_agent_handle(
    db: &Database,
    id: i64,
    agent_handle: &str,
) -> Result<(), StorageError> {
    let agent_handle = agent_handle.to_owned();
    db.connection()
        .call(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE sessions SET agent_handle = ?1, updated_at = ?2 WHERE id = ?3",
                params![agent_handle, now, id],
            )?;
            Ok(())
        })
        .await
        .map_err(Into::into)
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    let status_str: String = row.get(5)?;
    let status = SessionStatus::parse(&status_str).unwrap_or(SessionStatus::Error);
    Ok(SessionRow {
        id: row.get(0)?,
        review_id: row.get(1)?,
        provider_id: row.get(2)?,
        model_id: row.get(3)?,
        context_item_id: row.get(4)?,
        status,
        agent_handle: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
