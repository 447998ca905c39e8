use std::{fs, path::Path, sync::Arc, time::Duration};

use parley_options::{FeedbackConfig, OptionResolver};
use parley_rules::{start_rule_source_watcher, ReloadOutcome, RuleEngine, RuleSetOrigin};
use serde_json::json;
use tempfile::tempdir;

fn write_rules(path: &Path, patterns: serde_json::Value) {
    let document = json!({
        "version": "1.0",
        "languages": { "en_US": { "patterns": patterns } },
        "global_settings": { "max_options": 3, "cache_enabled": true, "hot_reload": true }
    });
    fs::write(
        path,
        serde_json::to_string_pretty(&document).expect("render rules"),
    )
    .expect("write rules");
}

fn greeting_only() -> serde_json::Value {
    json!({
        "greeting": { "triggers": ["hello"], "options": ["Hi there"], "priority": 1 }
    })
}

fn with_deploy() -> serde_json::Value {
    json!({
        "greeting": { "triggers": ["hello"], "options": ["Hi there"], "priority": 1 },
        "deploy": {
            "triggers": ["deploy"],
            "options": ["Ship it", "Hold off", "Deploy to staging first"],
            "priority": 0
        }
    })
}

#[test]
fn integration_rule_edit_is_visible_to_the_next_resolution() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("rules.json");
    write_rules(&path, greeting_only());

    let engine = Arc::new(RuleEngine::from_path(&path));
    assert_eq!(engine.origin(), RuleSetOrigin::File);
    let resolver = OptionResolver::with_rule_engine(Arc::clone(&engine));
    let config = FeedbackConfig::default();

    let before = resolver.resolve_with_report("ready to deploy now", None, &config, "en_US");
    assert_eq!(before.resolved.strategy, Some("fallback_options"));
    assert_eq!(before.resolved.options, config.fallback_options);

    write_rules(&path, with_deploy());
    assert!(engine.reload().is_applied());

    let after = resolver.resolve_with_report("ready to deploy now", None, &config, "en_US");
    assert_eq!(after.resolved.strategy, Some("rule_engine"));
    assert_eq!(
        after.resolved.options,
        vec![
            "Ship it".to_string(),
            "Hold off".to_string(),
            "Deploy to staging first".to_string(),
        ]
    );
}

#[test]
fn integration_broken_rule_edit_keeps_last_good_patterns() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("rules.json");
    write_rules(&path, with_deploy());

    let engine = Arc::new(RuleEngine::from_path(&path));
    let resolver = OptionResolver::with_rule_engine(Arc::clone(&engine));
    let config = FeedbackConfig::default();
    let generation = engine.generation();

    fs::write(&path, "{ not json").expect("corrupt rules");
    assert!(matches!(engine.reload(), ReloadOutcome::Invalid { .. }));
    assert_eq!(engine.generation(), generation);

    let options = resolver.resolve("deploy please", None, &config, "en_US");
    assert_eq!(options[0], "Ship it");
    assert_eq!(engine.stats().error_count, 1);
}

#[tokio::test]
async fn integration_watcher_picks_up_rule_edits() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("rules.json");
    write_rules(&path, greeting_only());

    let engine = Arc::new(RuleEngine::from_path(&path));
    let generation = engine.generation();
    let mut watcher =
        start_rule_source_watcher(Arc::clone(&engine), Duration::from_millis(20))
            .expect("start watcher");
    assert!(watcher.is_running());

    // Different length guarantees a new fingerprint even on coarse mtimes.
    write_rules(&path, with_deploy());
    let mut reloaded = false;
    for _ in 0..100 {
        if engine.generation() > generation {
            reloaded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    watcher.shutdown().await;

    assert!(reloaded, "watcher should publish the edited rule source");
    assert_eq!(
        engine.match_options("deploy the build", "en_US")[0],
        "Ship it"
    );
}
