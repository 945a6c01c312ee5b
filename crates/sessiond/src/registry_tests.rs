// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn known_providers_are_present() {
    let registry = Registry::new();
    assert!(registry.get("claude").is_some());
    assert!(registry.get("codex").is_some());
    assert!(registry.get("gemini").is_some());
    assert!(registry.get("nonexistent").is_none());
}

#[test]
fn command_override_replaces_the_default() {
    let mut registry = Registry::new();
    let mut overrides = HashMap::new();
    overrides.insert("claude".to_owned(), ProviderOverride { command: Some("/opt/claude".into()), ..Default::default() });
    registry.apply_overrides(&overrides);

    let def = registry.get("claude").expect("claude is a known provider");
    assert_eq!(def.command, "/opt/claude");
}

#[test]
fn args_override_replaces_default_args() {
    let mut registry = Registry::new();
    let mut overrides = HashMap::new();
    overrides.insert("claude".to_owned(), ProviderOverride { args: Some(vec!["--foo".into()]), ..Default::default() });
    registry.apply_overrides(&overrides);

    let def = registry.get("claude").expect("claude is a known provider");
    assert_eq!(def.args, vec!["--foo".to_owned()]);
}

#[test]
fn env_override_merges_with_defaults() {
    let mut registry = Registry::new();
    let mut overrides = HashMap::new();
    overrides.insert("claude".to_owned(), ProviderOverride { env: vec![("FOO".into(), "1".into())], ..Default::default() });
    registry.apply_overrides(&overrides);

    let def = registry.get("claude").expect("claude is a known provider");
    assert!(def.env.contains(&("FOO".to_owned(), "1".to_owned())));
}

#[test]
fn extra_args_append_after_override() {
    let mut registry = Registry::new();
    let mut overrides = HashMap::new();
    overrides.insert(
        "claude".to_owned(),
        ProviderOverride { args: Some(vec!["--base".into()]), extra_args: vec!["--verbose".into()], ..Default::default() },
    );
    registry.apply_overrides(&overrides);

    let def = registry.get("claude").expect("claude is a known provider");
    assert_eq!(def.args, vec!["--base".to_owned(), "--verbose".to_owned()]);
}

#[test]
fn override_for_unknown_provider_is_ignored() {
    let mut registry = Registry::new();
    let mut overrides = HashMap::new();
    overrides.insert("ghost".to_owned(), ProviderOverride { command: Some("x".into()), ..Default::default() });
    registry.apply_overrides(&overrides);
    assert!(registry.get("ghost").is_none());
}

#[tokio::test]
async fn check_availability_of_a_missing_binary_is_unavailable() {
    let mut registry = Registry::new();
    let mut overrides = HashMap::new();
    overrides.insert("claude".to_owned(), ProviderOverride { command: Some("definitely-not-a-real-binary".into()), ..Default::default() });
    registry.apply_overrides(&overrides);

    let availability = registry.check_availability("claude").await;
    assert!(!availability.available);
    assert!(availability.reason.is_some());
}

#[tokio::test]
async fn check_availability_caches_the_result() {
    let mut registry = Registry::new();
    let mut overrides = HashMap::new();
    overrides.insert("claude".to_owned(), ProviderOverride { command: Some("definitely-not-a-real-binary".into()), ..Default::default() });
    registry.apply_overrides(&overrides);

    assert!(registry.cached("claude").is_none());
    registry.check_availability("claude").await;
    assert!(registry.cached("claude").is_some());
}

#[tokio::test]
async fn check_all_probes_every_known_provider() {
    let mut registry = Registry::new();
    let mut overrides = HashMap::new();
    for id in ["claude", "codex", "gemini"] {
        overrides.insert(id.to_owned(), ProviderOverride { command: Some("definitely-not-a-real-binary".into()), ..Default::default() });
    }
    registry.apply_overrides(&overrides);

    let results = registry.check_all().await;
    assert_eq!(results.len(), 3);
    assert!(results.values().all(|a| !a.available));
    assert_eq!(registry.cached_all().len(), 3);
}
