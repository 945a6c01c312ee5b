// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Database connection management with WAL mode, embedded migrations, and
//! the single-writer lifecycle.
//!
//! All writes are serialized through `tokio-rusqlite`'s single background
//! thread. Do NOT create additional `Connection` instances for writes.

use tracing::debug;

use crate::error::StorageError;
use crate::migrations;

/// A handle to the session store's single SQLite connection.
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Open (or create) the database at `path`, enable WAL mode, and run
    /// any pending migrations.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let conn = tokio_rusqlite::Connection::open(path).await?;
        conn.call(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", true)?;
            migrations::run_migrations(conn)?;
            Ok(())
        })
        .await?;
        debug!(path, "sqlite storage initialized");
        Ok(Self { conn })
    }

    /// Open an in-memory database. Used by tests.
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        conn.call(|conn| {
            migrations::run_migrations(conn)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Access the underlying async connection for query modules.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Close the connection, flushing any WAL checkpoint.
    pub async fn close(self) -> Result<(), StorageError> {
        self.conn.close().await?;
        debug!("sqlite connection closed");
        Ok(())
    }
}

#[cfg(test)]
#[path = "database_tests.rs"]
mod tests;
