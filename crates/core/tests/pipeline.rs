//! End-to-end tests for the pass tracking pipeline.
//!
//! These tests exercise the real `PassTracker` with:
//! - A file-backed SQLite snapshot store
//! - Pattern rules compiled from a TOML configuration
//! - The pass log recorded by the caller after each pass
//!
//! Pass executors are plain closures doing string edits; nothing touches the
//! network.

use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use passgate_core::config::AppConfig;
use passgate_core::db::Database;
use passgate_core::models::{Phase, PassDelta, Recommendation, SnapshotKey};
use passgate_core::rules::PatternRuleSet;
use passgate_core::snapshot::{self, SnapshotStore, SqliteSnapshotStore};
use passgate_core::tracker::PassTracker;

// ===========================================================================
// Helpers
// ===========================================================================

const CONFIG: &str = r#"
[tracker]
job_id = "landing-page"

[[rules]]
id = "banned-term"
pattern = '\bsynergy\b'
severity = "error"
case_insensitive = true

[[rules]]
id = "filler"
pattern = '\b(very|really)\b'
severity = "warning"

[[rules]]
id = "shouting"
pattern = '!!+'
severity = "info"
"#;

struct Harness {
    _dir: TempDir,
    db: Arc<Database>,
    tracker: PassTracker<PatternRuleSet>,
    deltas: Arc<Mutex<Vec<PassDelta>>>,
}

fn harness() -> Harness {
    let dir = TempDir::new().expect("failed to create temp dir");
    let config = AppConfig::from_toml_str(CONFIG).expect("config should parse");
    config.validate().expect("config should validate");

    let db = Arc::new(
        Database::open_initialized(dir.path().join("passgate.db")).expect("open database"),
    );
    let store = Arc::new(SqliteSnapshotStore::new(db.clone()));
    let rules = PatternRuleSet::from_config(&config.rules).expect("rules should compile");

    let deltas: Arc<Mutex<Vec<PassDelta>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = deltas.clone();
    let tracker = PassTracker::from_config(&config.tracker, rules, store)
        .on_delta_calculated(move |delta| sink.lock().unwrap().push(delta.clone()));

    Harness {
        _dir: dir,
        db,
        tracker,
        deltas,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn test_multi_pass_job_with_revert() {
    let h = harness();
    let mut content = String::from("This is a really very good plan!!");

    // Pass 1: remove filler words. Fixes `filler`, keeps `shouting`.
    let input = content.clone();
    let result = h
        .tracker
        .track_pass(1, &content, || async move {
            Ok(input.replace("really very ", ""))
        })
        .await
        .expect("pass 1 should complete");
    assert!(!result.was_reverted);
    assert_eq!(result.delta.rules_fixed, vec!["filler"]);
    assert_eq!(result.delta.rules_unchanged, vec!["shouting"]);
    h.db.insert_pass_log(h.tracker.job_id(), &result).unwrap();
    content = result.content;
    assert_eq!(content, "This is a good plan!!");

    // Pass 2: calms the tone but introduces a banned term.
    let input = content.clone();
    let result = h
        .tracker
        .track_pass(2, &content, || async move {
            Ok(input.replace("good plan!!", "plan with synergy."))
        })
        .await
        .expect("pass 2 should complete");
    assert!(result.was_reverted);
    assert_eq!(result.delta.rules_fixed, vec!["shouting"]);
    assert_eq!(result.delta.rules_regressed, vec!["banned-term"]);
    assert_eq!(result.delta.net_change, 0);
    assert!(result
        .revert_reason
        .as_deref()
        .unwrap()
        .contains("banned-term"));
    h.db.insert_pass_log(h.tracker.job_id(), &result).unwrap();
    content = result.content;
    assert_eq!(content, "This is a good plan!!");

    // Pass 3: calms the tone cleanly.
    let input = content.clone();
    let result = h
        .tracker
        .track_pass(3, &content, || async move { Ok(input.replace("!!", ".")) })
        .await
        .expect("pass 3 should complete");
    assert!(!result.was_reverted);
    h.db.insert_pass_log(h.tracker.job_id(), &result).unwrap();
    content = result.content;
    assert_eq!(content, "This is a good plan.");

    // History and observer saw the same deltas, in call order.
    let history = h.tracker.history();
    let passes: Vec<u32> = history.iter().map(|d| d.pass_number).collect();
    assert_eq!(passes, vec![1, 2, 3]);
    assert_eq!(*h.deltas.lock().unwrap(), history);

    // The pass log mirrors the outcomes.
    let log = h.db.list_pass_log(Some("landing-page"), 100).unwrap();
    assert_eq!(log.len(), 3);
    assert!(!log[0].was_reverted);
    assert!(log[1].was_reverted);
    assert_eq!(log[1].delta.recommendation, Recommendation::Revert);
    assert_eq!(log[2].delta.rules_fixed, vec!["shouting"]);
    assert_eq!(h.db.count_pass_log("landing-page").unwrap(), 3);
}

#[tokio::test]
async fn test_snapshots_persist_with_hashes_and_statuses() {
    let h = harness();
    let before = "really synergy";
    let result = h
        .tracker
        .track_pass(1, before, || async { Ok("Synergy".to_string()) })
        .await
        .unwrap();
    // Error rule unchanged, filler fixed: accepted.
    assert!(!result.was_reverted);

    let store = SqliteSnapshotStore::new(h.db.clone());
    let pair = store.get_pair("landing-page", 1).unwrap();
    assert!(pair.is_complete());

    let before_snap = pair.before.unwrap();
    assert_eq!(before_snap.content_hash, snapshot::hash(before));
    assert_eq!(before_snap.content_hash.len(), 64);
    assert_eq!(before_snap.failing_rule_count(), 2);
    assert!(before_snap.rule_statuses.contains_key("banned-term"));

    let after_snap = pair.after.unwrap();
    assert_eq!(after_snap.phase, Phase::After);
    assert!(after_snap.is_critical("banned-term"));
    assert!(!after_snap.rule_statuses.contains_key("filler"));

    let all = store.list_job("landing-page").unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_failed_executor_leaves_only_before_snapshot() {
    let h = harness();
    let err = h
        .tracker
        .track_pass(7, "draft", || async { Err(anyhow::anyhow!("model timed out")) })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("model timed out"));

    let store = SqliteSnapshotStore::new(h.db.clone());
    assert!(store
        .get(&SnapshotKey::new("landing-page", 7, Phase::Before))
        .unwrap()
        .is_some());
    assert!(store
        .get(&SnapshotKey::new("landing-page", 7, Phase::After))
        .unwrap()
        .is_none());
    assert!(h.tracker.history().is_empty());
    assert!(h.deltas.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_reset_clears_persisted_snapshots() {
    let h = harness();
    h.tracker
        .track_pass(1, "a", || async { Ok("b".to_string()) })
        .await
        .unwrap();

    let store = SqliteSnapshotStore::new(h.db.clone());
    store.reset().unwrap();
    let pair = store.get_pair("landing-page", 1).unwrap();
    assert!(pair.before.is_none());
    assert!(pair.after.is_none());
}

#[tokio::test]
async fn test_failed_retry_leaves_no_stale_pair() {
    let h = harness();
    h.tracker
        .track_pass(1, "draft", || async { Ok("edited".to_string()) })
        .await
        .unwrap();

    let _ = h
        .tracker
        .track_pass(1, "draft", || async { Err(anyhow::anyhow!("boom")) })
        .await
        .unwrap_err();

    let store = SqliteSnapshotStore::new(h.db.clone());
    let pair = store.get_pair("landing-page", 1).unwrap();
    assert!(pair.before.is_some());
    assert!(pair.after.is_none());
    assert_eq!(h.tracker.history().len(), 1);
}
