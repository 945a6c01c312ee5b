// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Embedded database migrations using refinery.
//!
//! SQL migration files are compiled into the binary at build time via
//! `embed_migrations!`. Migrations run automatically on database open.

use crate::error::StorageError;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Run all pending migrations against the given connection.
///
/// Refinery tracks applied migrations in its own `refinery_schema_history`
/// table, so calling this against an already-current database is a no-op.
pub fn run_migrations(conn: &mut rusqlite::Connection) -> Result<(), StorageError> {
    embedded::migrations::runner().run(conn)?;
    Ok(())
}
