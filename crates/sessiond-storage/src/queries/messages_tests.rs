// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::database::Database;
use crate::models::NewSession;

async fn seeded_session(db: &Database) -> anyhow::Result<i64> {
    let id = crate::queries::sessions::create_session(
        db,
        NewSession {
            review_id: "review-1".into(),
            provider_id: "claude-ndjson".into(),
            model_id: None,
            context_item_id: None,
        },
    )
    .await?;
    Ok(id)
}

#[tokio::test]
async fn insert_message_roundtrip() -> anyhow::Result<()> {
    let db = Database::open_in_memory().await?;
    let session_id = seeded_session(&db).await?;

    let id = insert_message(
        &db,
        NewMessage {
            session_id,
            role: MessageRole::Assistant,
            kind: MessageType::Message,
            content: "hello".into(),
        },
    )
    .await?;

    let rows = get_messages_for_session(&db, session_id).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, id);
    assert_eq!(rows[0].role, MessageRole::Assistant);
    assert_eq!(rows[0].kind, MessageType::Message);
    assert_eq!(rows[0].content, "hello");
    Ok(())
}

#[tokio::test]
async fn insert_turn_persists_context_rows_before_the_message_row() -> anyhow::Result<()> {
    let db = Database::open_in_memory().await?;
    let session_id = seeded_session(&db).await?;

    let context = vec!["file-a.rs contents".to_string(), "file-b.rs contents".to_string()];
    let message_id = insert_turn(&db, session_id, context.clone(), "please review".into()).await?;

    let rows = get_messages_for_session(&db, session_id).await?;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].kind, MessageType::Context);
    assert_eq!(rows[0].content, context[0]);
    assert_eq!(rows[1].kind, MessageType::Context);
    assert_eq!(rows[1].content, context[1]);
    assert_eq!(rows[2].kind, MessageType::Message);
    assert_eq!(rows[2].content, "please review");
    assert_eq!(rows[2].id, message_id);

    // Conversation order is id order, and every row came from the same session.
    assert!(rows[0].id < rows[1].id && rows[1].id < rows[2].id);
    assert!(rows.iter().all(|row| row.session_id == session_id));
    Ok(())
}

#[tokio::test]
async fn insert_turn_with_no_context_still_inserts_the_message() -> anyhow::Result<()> {
    let db = Database::open_in_memory().await?;
    let session_id = seeded_session(&db).await?;

    insert_turn(&db, session_id, Vec::new(), "no attachments".into()).await?;

    let rows = get_messages_for_session(&db, session_id).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, MessageType::Message);
    assert_eq!(rows[0].content, "no attachments");
    Ok(())
}

#[tokio::test]
async fn get_messages_for_session_only_returns_that_session() -> anyhow::Result<()> {
    let db = Database::open_in_memory().await?;
    let session_a = seeded_session(&db).await?;
    let session_b = seeded_session(&db).await?;

    insert_turn(&db, session_a, Vec::new(), "turn in a".into()).await?;
    insert_turn(&db, session_b, Vec::new(), "turn in b".into()).await?;

    let rows_a = get_messages_for_session(&db, session_a).await?;
    assert_eq!(rows_a.len(), 1);
    assert_eq!(rows_a[0].content, "turn in a");
    Ok(())
}
