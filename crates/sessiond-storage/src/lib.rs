// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite persistence for the agent session core: the `sessions` and
//! `messages` tables, and the query functions that read and write them.
//!
//! Every write goes through a single `tokio-rusqlite` background thread, so
//! callers never need their own locking around the connection.

pub mod database;
pub mod error;
pub mod migrations;
pub mod models;
pub mod queries;

pub use database::Database;
pub use error::StorageError;
pub use models::{
    MessageRole, MessageRow, MessageType, NewMessage, NewSession, SessionRow, SessionStatus,
};
