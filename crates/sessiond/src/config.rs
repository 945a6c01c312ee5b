// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

/// Agent session core: subprocess-backed AI chat sessions with WebSocket fan-out.
#[derive(Debug, Parser)]
#[command(name = "sessiond", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "AGENTCORE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, env = "AGENTCORE_PORT", default_value = "8080")]
    pub port: u16,

    /// Path to the SQLite database file.
    #[arg(long, env = "AGENTCORE_DB_PATH", default_value = "./agentcore.db")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "AGENTCORE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (json or text).
    #[arg(long, env = "AGENTCORE_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Override command for the ndjson-protocol provider.
    #[arg(long, env = "AGENTCORE_CLAUDE_CMD")]
    pub claude_cmd: Option<String>,

    /// Override command for the rpc-protocol provider.
    #[arg(long, env = "AGENTCORE_CODEX_CMD")]
    pub codex_cmd: Option<String>,

    /// Override command for the jsonl-protocol provider.
    #[arg(long, env = "AGENTCORE_GEMINI_CMD")]
    pub gemini_cmd: Option<String>,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("invalid log format: {}", self.log_format);
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
