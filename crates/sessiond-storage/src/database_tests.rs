// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn open_in_memory_runs_migrations() -> anyhow::Result<()> {
    let db = Database::open_in_memory().await?;
    db.connection()
        .call(|conn| {
            let count: i64 = conn.query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'sessions'",
                [],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
        .map(|count| assert_eq!(count, 1))?;
    Ok(())
}

#[tokio::test]
async fn reopening_an_already_migrated_database_is_a_noop() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sessions.db");
    let path_str = path.to_string_lossy().into_owned();

    let db = Database::open(&path_str).await?;
    db.close().await?;

    // Second open against the same file must not fail re-running migrations.
    let db = Database::open(&path_str).await?;
    db.close().await?;
    Ok(())
}

#[tokio::test]
async fn close_releases_the_connection() -> anyhow::Result<()> {
    let db = Database::open_in_memory().await?;
    db.close().await?;
    Ok(())
}
