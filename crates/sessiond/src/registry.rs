// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provider Registry: a static, pure, in-process table of known agent
//! providers plus a process-lifetime availability cache (`spec.md` §4.4).

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use parking_lot::Mutex;

const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Which wire protocol a provider's agent speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Ndjson,
    Rpc,
    Jsonl,
}

/// A known provider's launch configuration, after any overrides are applied.
#[derive(Debug, Clone)]
pub struct ProviderDef {
    pub id: String,
    pub display_name: String,
    pub kind: ProviderKind,
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// User-configured override for one provider. `command`/`args` replace the
/// default outright; `env` merges on top of the default; `extra_args`
/// appends to the (possibly already-overridden) args.
#[derive(Debug, Clone, Default)]
pub struct ProviderOverride {
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub env: Vec<(String, String)>,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Availability {
    pub available: bool,
    pub reason: Option<String>,
}

fn default_providers() -> Vec<ProviderDef> {
    vec![
        ProviderDef {
            id: "claude".into(),
            display_name: "Claude Code".into(),
            kind: ProviderKind::Ndjson,
            command: "claude".into(),
            args: vec!["--output-format".into(), "stream-json".into()],
            env: Vec::new(),
        },
        ProviderDef {
            id: "codex".into(),
            display_name: "Codex".into(),
            kind: ProviderKind::Rpc,
            command: "codex".into(),
            args: vec!["app-server".into()],
            env: Vec::new(),
        },
        ProviderDef {
            id: "gemini".into(),
            display_name: "Gemini CLI".into(),
            kind: ProviderKind::Jsonl,
            command: "gemini".into(),
            args: vec!["--experimental-acp".into()],
            env: Vec::new(),
        },
    ]
}

/// Pure, in-process table of known providers plus their process-lifetime
/// availability cache.
pub struct Registry {
    providers: HashMap<String, ProviderDef>,
    availability: Mutex<HashMap<String, Availability>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let providers = default_providers().into_iter().map(|p| (p.id.clone(), p)).collect();
        Self { providers, availability: Mutex::new(HashMap::new()) }
    }

    /// Merge per-provider overrides from user configuration. Unknown
    /// provider ids in the override map are ignored.
    pub fn apply_overrides(&mut self, overrides: &HashMap<String, ProviderOverride>) {
        for (id, over) in overrides {
            let Some(def) = self.providers.get_mut(id) else { continue };
            if let Some(command) = &over.command {
                def.command = command.clone();
            }
            if let Some(args) = &over.args {
                def.args = args.clone();
            }
            for (key, value) in &over.env {
                if let Some(existing) = def.env.iter_mut().find(|(k, _)| k == key) {
                    existing.1 = value.clone();
                } else {
                    def.env.push((key.clone(), value.clone()));
                }
            }
            def.args.extend(over.extra_args.iter().cloned());
        }
    }

    /// A deep copy of the provider's current definition, or `None` if unknown.
    pub fn get(&self, id: &str) -> Option<ProviderDef> {
        self.providers.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Probe one provider by spawning `<command> --version` with a 5 s
    /// deadline. Caches the result for the process lifetime.
    pub async fn check_availability(&self, id: &str) -> Availability {
        let availability = match self.providers.get(id) {
            Some(def) => probe(&def.command).await,
            None => Availability { available: false, reason: Some("unknown provider".into()) },
        };
        self.availability.lock().insert(id.to_owned(), availability.clone());
        availability
    }

    /// Probe every known provider concurrently and cache each result.
    pub async fn check_all(&self) -> HashMap<String, Availability> {
        let ids = self.ids();
        let results = futures_util::future::join_all(ids.iter().map(|id| self.check_availability(id))).await;
        ids.into_iter().zip(results).collect()
    }

    pub fn cached(&self, id: &str) -> Option<Availability> {
        self.availability.lock().get(id).cloned()
    }

    pub fn cached_all(&self) -> HashMap<String, Availability> {
        self.availability.lock().clone()
    }
}

async fn probe(command: &str) -> Availability {
    let mut cmd = tokio::process::Command::new(command);
    cmd.arg("--version").stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null()).kill_on_drop(true);

    let spawn_and_wait = async {
        let mut child = cmd.spawn()?;
        child.wait().await
    };

    match tokio::time::timeout(AVAILABILITY_TIMEOUT, spawn_and_wait).await {
        Ok(Ok(status)) if status.success() => Availability { available: true, reason: None },
        Ok(Ok(status)) => Availability { available: false, reason: Some(format!("exited with {status}")) },
        Ok(Err(err)) => Availability { available: false, reason: Some(err.to_string()) },
        Err(_) => Availability { available: false, reason: Some("timed out after 5s".into()) },
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
