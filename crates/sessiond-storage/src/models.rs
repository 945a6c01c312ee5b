// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Row types for the two logical tables: `sessions` and `messages`.

use serde::{Deserialize, Serialize};

/// `sessions.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Closed,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "closed" => Some(Self::Closed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// A persisted `sessions` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: i64,
    pub review_id: String,
    pub provider_id: String,
    pub model_id: Option<String>,
    pub context_item_id: Option<String>,
    pub status: SessionStatus,
    pub agent_handle: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// `messages.role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// `messages.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Message,
    Context,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Context => "context",
        }
    }
}

/// A persisted `messages` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: i64,
    pub session_id: i64,
    pub role: MessageRole,
    pub kind: MessageType,
    pub content: String,
    pub created_at: String,
}

/// A new session insert, before the database assigns an id.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub review_id: String,
    pub provider_id: String,
    pub model_id: Option<String>,
    pub context_item_id: Option<String>,
}

/// A new message insert, before the database assigns an id.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_id: i64,
    pub role: MessageRole,
    pub kind: MessageType,
    pub content: String,
}
