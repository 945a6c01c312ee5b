// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message CRUD operations.
//!
//! `insert_turn` is the one operation that must be transactional: N
//! `context` rows plus the one `user`/`message` row that introduced them
//! commit together or not at all, so a crash never leaves an orphan context
//! row with no owning message.

use chrono::Utc;
use rusqlite::params;

use crate::database::Database;
use crate::error::StorageError;
use crate::models::{MessageRole, MessageRow, MessageType, NewMessage};

/// Insert a single message row (used for assistant completions and
/// standalone `SaveContext` calls, neither of which need the N+1 atomicity
/// of [`insert_turn`]).
pub async fn insert_message(db: &Database, msg: NewMessage) -> Result<i64, StorageError> {
    db.connection()
        .call(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO messages (session_id, role, type, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    msg.session_id,
                    msg.role.as_str(),
                    msg.kind.as_str(),
                    msg.content,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(Into::into)
}

/// Atomically insert zero or more `context` rows followed by the one `user`
/// `message` row that introduced them. Returns the user message's id.
///
/// Corresponds to `spec.md` §4.1's persistence atomicity rule and testable
/// property 9 (atomic context persist).
pub async fn insert_turn(
    db: &Database,
    session_id: i64,
    context_items: Vec<String>,
    user_text: String,
) -> Result<i64, StorageError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let now = Utc::now().to_rfc3339();

            for item in &context_items {
                tx.execute(
                    "INSERT INTO messages (session_id, role, type, content, created_at)
                     VALUES (?1, ?2, 'context', ?3, ?4)",
                    params![session_id, MessageRole::User.as_str(), item, now],
                )?;
            }

            tx.execute(
                "INSERT INTO messages (session_id, role, type, content, created_at)
                 VALUES (?1, ?2, 'message', ?3, ?4)",
                params![session_id, MessageRole::User.as_str(), user_text, now],
            )?;
            let message_id = tx.last_insert_rowid();

            tx.commit()?;
            Ok(message_id)
        })
        .await
        .map_err(Into::into)
}

/// Fetch every message (both kinds) for a session, in conversation order
/// (`id ASC`, per `spec.md` §3 — never by timestamp, which may tie).
pub async fn get_messages_for_session(
    db: &Database,
    session_id: i64,
) -> Result<Vec<MessageRow>, StorageError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, type, content, created_at
                 FROM messages WHERE session_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![session_id], row_to_message)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(Into::into)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    let role_str: String = row.get(2)?;
    let type_str: String = row.get(3)?;
    Ok(MessageRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: if role_str == "assistant" { MessageRole::Assistant } else { MessageRole::User },
        kind: if type_str == "context" { MessageType::Context } else { MessageType::Message },
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
#[path = "messages_tests.rs"]
mod tests;
