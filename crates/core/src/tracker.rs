//! Quality-gated pass tracking.
//!
//! The [`PassTracker`] wraps one iteration of an external content
//! transformation. Each call to [`PassTracker::track_pass`] walks a fixed
//! sequence of stages:
//!
//! 1. Detect violations in the incoming content and snapshot them.
//! 2. Run the pass executor.
//! 3. Detect violations in the output and snapshot them.
//! 4. Read both snapshots back and diff them.
//! 5. Record the delta, notify the observer, and decide whether to revert.
//!
//! A failure at any stage aborts the call: no later snapshot is written and
//! no history entry is recorded.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::TrackerConfig;
use crate::conflict::ConflictDetector;
use crate::errors::TrackerError;
use crate::models::{PassDelta, PassExecutionResult, Phase, SnapshotKey};
use crate::rules::ViolationDetector;
use crate::snapshot::SnapshotStore;

// ---------------------------------------------------------------------------
// Pass state machine
// ---------------------------------------------------------------------------

/// Stages of a single `track_pass` call, in the order they are reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PassStage {
    BeforeDetected,
    BeforeSnapshotted,
    Executed,
    AfterDetected,
    AfterSnapshotted,
    DeltaComputed,
    Decided,
    Returned,
}

impl std::fmt::Display for PassStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BeforeDetected => write!(f, "before_detected"),
            Self::BeforeSnapshotted => write!(f, "before_snapshotted"),
            Self::Executed => write!(f, "executed"),
            Self::AfterDetected => write!(f, "after_detected"),
            Self::AfterSnapshotted => write!(f, "after_snapshotted"),
            Self::DeltaComputed => write!(f, "delta_computed"),
            Self::Decided => write!(f, "decided"),
            Self::Returned => write!(f, "returned"),
        }
    }
}

/// Observer fired once per completed pass, before `track_pass` returns.
pub type DeltaCallback = Box<dyn Fn(&PassDelta) + Send + Sync>;

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Orchestrates snapshot capture, diffing and the revert policy for one job.
pub struct PassTracker<D> {
    job_id: String,
    auto_revert: bool,
    detector: D,
    store: Arc<dyn SnapshotStore>,
    on_delta_calculated: Option<DeltaCallback>,
    history: Mutex<Vec<PassDelta>>,
    /// Pass numbers with a `track_pass` call currently running.
    in_flight: Mutex<HashSet<u32>>,
}

impl<D: ViolationDetector> PassTracker<D> {
    /// Create a tracker for `job_id` with auto-revert enabled.
    pub fn new(job_id: impl Into<String>, detector: D, store: Arc<dyn SnapshotStore>) -> Self {
        let job_id = job_id.into();
        info!(job_id = %job_id, "initializing pass tracker");
        Self {
            job_id,
            auto_revert: true,
            detector,
            store,
            on_delta_calculated: None,
            history: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Create a tracker from the `[tracker]` section of the configuration.
    pub fn from_config(config: &TrackerConfig, detector: D, store: Arc<dyn SnapshotStore>) -> Self {
        Self::new(config.job_id.clone(), detector, store).with_auto_revert(config.auto_revert)
    }

    pub fn with_auto_revert(mut self, auto_revert: bool) -> Self {
        self.auto_revert = auto_revert;
        self
    }

    /// Register an observer invoked synchronously with every computed delta.
    pub fn on_delta_calculated<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PassDelta) + Send + Sync + 'static,
    {
        self.on_delta_calculated = Some(Box::new(callback));
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn auto_revert(&self) -> bool {
        self.auto_revert
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Deltas of every completed pass, in call order.
    pub fn history(&self) -> Vec<PassDelta> {
        lock_recover(&self.history).clone()
    }

    // -----------------------------------------------------------------------
    // Main entry point
    // -----------------------------------------------------------------------

    /// Run one pass under snapshot tracking.
    ///
    /// `execute_pass` produces the transformed content. When auto-revert is
    /// on and the delta calls for it, the returned `content` is
    /// `content_before` and `was_reverted` is set.
    ///
    /// Tracking a pass number again replaces its snapshots. Any "after"
    /// snapshot from an earlier run is removed before the executor starts, so
    /// a failed retry leaves only the new "before" side.
    ///
    /// No timeout is applied; wrap the returned future if the executor or
    /// detector may hang.
    pub async fn track_pass<F, Fut>(
        &self,
        pass_number: u32,
        content_before: &str,
        execute_pass: F,
    ) -> Result<PassExecutionResult, TrackerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<String>>,
    {
        let _lease = self.acquire_lease(pass_number)?;
        info!(job_id = %self.job_id, pass_number, "tracking pass");

        // -- before ----------------------------------------------------------
        let violations_before = self
            .detector
            .detect(content_before)
            .await
            .map_err(|source| TrackerError::Detection {
                pass_number,
                phase: Phase::Before,
                source,
            })?;
        self.stage(pass_number, PassStage::BeforeDetected);

        self.store.create(
            &self.job_id,
            pass_number,
            Phase::Before,
            content_before,
            &violations_before,
        )?;
        let stale_after = SnapshotKey::new(self.job_id.as_str(), pass_number, Phase::After);
        if self.store.remove(&stale_after)? {
            debug!(job_id = %self.job_id, pass_number, "removed after snapshot of an earlier run");
        }
        self.stage(pass_number, PassStage::BeforeSnapshotted);

        // -- execute ---------------------------------------------------------
        let content_after = execute_pass().await.map_err(|source| {
            warn!(
                job_id = %self.job_id,
                pass_number,
                error = %source,
                "pass executor failed"
            );
            TrackerError::Execution {
                pass_number,
                source,
            }
        })?;
        self.stage(pass_number, PassStage::Executed);

        // -- after -----------------------------------------------------------
        let violations_after = self
            .detector
            .detect(&content_after)
            .await
            .map_err(|source| TrackerError::Detection {
                pass_number,
                phase: Phase::After,
                source,
            })?;
        self.stage(pass_number, PassStage::AfterDetected);

        self.store.create(
            &self.job_id,
            pass_number,
            Phase::After,
            &content_after,
            &violations_after,
        )?;
        self.stage(pass_number, PassStage::AfterSnapshotted);

        // -- diff ------------------------------------------------------------
        let pair = self.store.get_pair(&self.job_id, pass_number)?;
        let (before, after) = match (pair.before, pair.after) {
            (Some(before), Some(after)) => (before, after),
            (before, after) => {
                let missing = match (before.is_none(), after.is_none()) {
                    (true, true) => "before and after snapshots",
                    (true, false) => "before snapshot",
                    _ => "after snapshot",
                };
                error!(
                    job_id = %self.job_id,
                    pass_number,
                    missing,
                    "snapshots written by this pass cannot be read back; storage layer is broken"
                );
                return Err(TrackerError::Integrity {
                    job_id: self.job_id.clone(),
                    pass_number,
                    missing: missing.to_string(),
                });
            }
        };

        let delta = ConflictDetector::compare_snapshots(&before, &after);
        self.stage(pass_number, PassStage::DeltaComputed);

        lock_recover(&self.history).push(delta.clone());
        if let Some(callback) = &self.on_delta_calculated {
            callback(&delta);
        }

        // -- decide ----------------------------------------------------------
        let revert = self.auto_revert && ConflictDetector::should_revert(&delta, &after);
        let revert_reason = if revert {
            ConflictDetector::revert_reason(&delta, &after)
        } else {
            None
        };
        self.stage(pass_number, PassStage::Decided);

        if revert {
            warn!(
                job_id = %self.job_id,
                pass_number,
                reason = revert_reason.as_deref().unwrap_or(""),
                "reverting pass"
            );
        } else {
            info!(
                job_id = %self.job_id,
                pass_number,
                net_change = delta.net_change,
                content_changed = before.content_hash != after.content_hash,
                "pass accepted"
            );
        }

        let content = if revert {
            content_before.to_string()
        } else {
            content_after
        };
        self.stage(pass_number, PassStage::Returned);

        Ok(PassExecutionResult {
            pass_number,
            content,
            content_before_pass: content_before.to_string(),
            delta,
            was_reverted: revert,
            revert_reason,
        })
    }

    fn stage(&self, pass_number: u32, stage: PassStage) {
        debug!(job_id = %self.job_id, pass_number, %stage, "pass stage reached");
    }

    fn acquire_lease(&self, pass_number: u32) -> Result<PassLease<'_>, TrackerError> {
        if !lock_recover(&self.in_flight).insert(pass_number) {
            warn!(job_id = %self.job_id, pass_number, "pass already in flight");
            return Err(TrackerError::PassInFlight {
                job_id: self.job_id.clone(),
                pass_number,
            });
        }
        Ok(PassLease {
            in_flight: &self.in_flight,
            pass_number,
        })
    }
}

// ---------------------------------------------------------------------------
// Pass lease RAII guard
// ---------------------------------------------------------------------------

/// Drop guard releasing a pass number from the in-flight set.
///
/// Released on every exit path of `track_pass`, including errors and a
/// dropped future.
struct PassLease<'a> {
    in_flight: &'a Mutex<HashSet<u32>>,
    pass_number: u32,
}

impl Drop for PassLease<'_> {
    fn drop(&mut self) {
        lock_recover(self.in_flight).remove(&self.pass_number);
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("tracker mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::StoreError;
    use crate::models::{ContentSnapshot, Recommendation, SnapshotKey, Violation};
    use crate::snapshot::MemorySnapshotStore;

    /// Detector returning canned violations per exact content string.
    #[derive(Default)]
    struct FixtureDetector {
        fixtures: HashMap<String, Vec<Violation>>,
        fail_on: Option<String>,
    }

    impl FixtureDetector {
        fn with(mut self, content: &str, violations: Vec<Violation>) -> Self {
            self.fixtures.insert(content.to_string(), violations);
            self
        }

        fn failing_on(mut self, content: &str) -> Self {
            self.fail_on = Some(content.to_string());
            self
        }
    }

    impl ViolationDetector for FixtureDetector {
        async fn detect(&self, content: &str) -> anyhow::Result<Vec<Violation>> {
            if self.fail_on.as_deref() == Some(content) {
                anyhow::bail!("detector unavailable");
            }
            Ok(self.fixtures.get(content).cloned().unwrap_or_default())
        }
    }

    /// Store that accepts writes but never returns anything.
    struct BlackholeStore;

    impl SnapshotStore for BlackholeStore {
        fn put(&self, _snapshot: ContentSnapshot) -> Result<(), StoreError> {
            Ok(())
        }
        fn get(&self, _key: &SnapshotKey) -> Result<Option<ContentSnapshot>, StoreError> {
            Ok(None)
        }
        fn remove(&self, _key: &SnapshotKey) -> Result<bool, StoreError> {
            Ok(false)
        }
        fn reset(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn tracker(detector: FixtureDetector) -> (PassTracker<FixtureDetector>, Arc<MemorySnapshotStore>) {
        let store = Arc::new(MemorySnapshotStore::new());
        let tracker = PassTracker::new("job-1", detector, store.clone());
        (tracker, store)
    }

    #[test]
    fn test_pass_stage_display_and_order() {
        assert_eq!(PassStage::BeforeDetected.to_string(), "before_detected");
        assert_eq!(PassStage::AfterSnapshotted.to_string(), "after_snapshotted");
        assert_eq!(PassStage::Returned.to_string(), "returned");
        assert!(PassStage::BeforeSnapshotted < PassStage::Executed);
        assert!(PassStage::DeltaComputed < PassStage::Decided);
    }

    #[tokio::test]
    async fn test_critical_regression_reverts() {
        let detector = FixtureDetector::default().with("after", vec![Violation::error("R1")]);
        let (tracker, _) = tracker(detector);

        let result = tracker
            .track_pass(1, "before", || async { Ok("after".to_string()) })
            .await
            .unwrap();

        assert!(result.was_reverted);
        assert_eq!(result.content, "before");
        assert_eq!(result.content, result.content_before_pass);
        assert_eq!(result.delta.rules_regressed, vec!["R1"]);
        assert_eq!(result.delta.recommendation, Recommendation::Revert);
        assert!(result.revert_reason.unwrap().contains("R1"));
    }

    #[tokio::test]
    async fn test_non_critical_trade_off_is_kept() {
        let detector = FixtureDetector::default()
            .with(
                "before",
                vec![
                    Violation::warning("A"),
                    Violation::warning("B"),
                    Violation::warning("C"),
                ],
            )
            .with("after", vec![Violation::warning("D")]);
        let (tracker, _) = tracker(detector);

        let result = tracker
            .track_pass(1, "before", || async { Ok("after".to_string()) })
            .await
            .unwrap();

        assert_eq!(result.delta.net_change, 2);
        assert!(!result.was_reverted);
        assert!(result.revert_reason.is_none());
        assert_eq!(result.content, "after");
    }

    #[tokio::test]
    async fn test_unchanged_clean_content() {
        let (tracker, store) = tracker(FixtureDetector::default());

        let result = tracker
            .track_pass(1, "same", || async { Ok("same".to_string()) })
            .await
            .unwrap();

        assert_eq!(result.delta.net_change, 0);
        assert!(result.delta.rules_fixed.is_empty());
        assert!(result.delta.rules_regressed.is_empty());
        assert!(!result.was_reverted);

        let pair = store.get_pair("job-1", 1).unwrap();
        assert_eq!(
            pair.before.unwrap().content_hash,
            pair.after.unwrap().content_hash
        );
    }

    #[tokio::test]
    async fn test_auto_revert_disabled_never_reverts() {
        let detector = FixtureDetector::default().with("after", vec![Violation::error("R1")]);
        let (tracker, _) = tracker(detector);
        let tracker = tracker.with_auto_revert(false);

        let result = tracker
            .track_pass(1, "before", || async { Ok("after".to_string()) })
            .await
            .unwrap();

        assert!(!result.was_reverted);
        assert!(result.revert_reason.is_none());
        assert_eq!(result.content, "after");
        // The delta still carries the policy outcome.
        assert_eq!(result.delta.recommendation, Recommendation::Revert);
    }

    #[tokio::test]
    async fn test_executor_failure_leaves_no_trace() {
        let (tracker, store) = tracker(FixtureDetector::default());
        tracker
            .track_pass(1, "v1", || async { Ok("v2".to_string()) })
            .await
            .unwrap();
        let history_before = tracker.history().len();

        let err = tracker
            .track_pass(2, "v2", || async { Err(anyhow::anyhow!("boom")) })
            .await
            .unwrap_err();

        match err {
            TrackerError::Execution {
                pass_number,
                source,
            } => {
                assert_eq!(pass_number, 2);
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(tracker.history().len(), history_before);

        let pair = store.get_pair("job-1", 2).unwrap();
        assert!(pair.before.is_some());
        assert!(pair.after.is_none());
    }

    #[tokio::test]
    async fn test_failed_retry_drops_earlier_after_snapshot() {
        let (tracker, store) = tracker(FixtureDetector::default());
        tracker
            .track_pass(1, "v1", || async { Ok("v2".to_string()) })
            .await
            .unwrap();
        assert!(store.get_pair("job-1", 1).unwrap().is_complete());

        let err = tracker
            .track_pass(1, "v1 revised", || async { Err(anyhow::anyhow!("boom")) })
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::Execution { .. }));

        let pair = store.get_pair("job-1", 1).unwrap();
        assert_eq!(
            pair.before.unwrap().content_hash,
            crate::snapshot::hash("v1 revised")
        );
        assert!(pair.after.is_none());
        assert_eq!(tracker.history().len(), 1);
    }

    #[tokio::test]
    async fn test_detection_failure_before_aborts_before_any_write() {
        let (tracker, store) = tracker(FixtureDetector::default().failing_on("draft"));

        let err = tracker
            .track_pass(1, "draft", || async { Ok("edited".to_string()) })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TrackerError::Detection {
                phase: Phase::Before,
                ..
            }
        ));
        assert!(store.is_empty());
        assert!(tracker.history().is_empty());
    }

    #[tokio::test]
    async fn test_detection_failure_after_skips_after_snapshot() {
        let (tracker, store) = tracker(FixtureDetector::default().failing_on("edited"));

        let err = tracker
            .track_pass(1, "draft", || async { Ok("edited".to_string()) })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TrackerError::Detection {
                phase: Phase::After,
                ..
            }
        ));
        let pair = store.get_pair("job-1", 1).unwrap();
        assert!(pair.before.is_some());
        assert!(pair.after.is_none());
        assert!(tracker.history().is_empty());
    }

    #[tokio::test]
    async fn test_integrity_failure_when_store_loses_snapshots() {
        let tracker = PassTracker::new("job-1", FixtureDetector::default(), Arc::new(BlackholeStore));

        let err = tracker
            .track_pass(1, "a", || async { Ok("b".to_string()) })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TrackerError::Integrity { ref missing, .. } if missing == "before and after snapshots"
        ));
        assert!(tracker.history().is_empty());
    }

    #[tokio::test]
    async fn test_history_in_call_order_and_callback() {
        let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();

        let store = Arc::new(MemorySnapshotStore::new());
        let tracker = PassTracker::new("job-1", FixtureDetector::default(), store)
            .on_delta_calculated(move |delta| seen_cb.lock().unwrap().push(delta.pass_number));

        for pass in [3, 1, 2] {
            tracker
                .track_pass(pass, "text", || async { Ok("text".to_string()) })
                .await
                .unwrap();
        }
        let _ = tracker
            .track_pass(4, "text", || async { Err(anyhow::anyhow!("nope")) })
            .await;

        let passes: Vec<u32> = tracker.history().iter().map(|d| d.pass_number).collect();
        assert_eq!(passes, vec![3, 1, 2]);
        assert_eq!(*seen.lock().unwrap(), vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn test_history_is_a_copy() {
        let (tracker, _) = tracker(FixtureDetector::default());
        tracker
            .track_pass(1, "x", || async { Ok("x".to_string()) })
            .await
            .unwrap();

        let mut copy = tracker.history();
        copy.clear();
        assert_eq!(tracker.history().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_same_pass_is_rejected() {
        let (tracker, _) = tracker(FixtureDetector::default());
        let entered = tokio::sync::Notify::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let entered_ref = &entered;
        let first = tracker.track_pass(1, "draft", move || async move {
            entered_ref.notify_one();
            release_rx.await.ok();
            Ok("edited".to_string())
        });
        let second = async {
            entered.notified().await;
            let result = tracker
                .track_pass(1, "draft", || async { Ok("other".to_string()) })
                .await;
            let _ = release_tx.send(());
            result
        };

        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap().content, "edited");
        assert!(matches!(
            second,
            Err(TrackerError::PassInFlight { pass_number: 1, .. })
        ));

        // Lease released: the same pass can be tracked again.
        assert!(tracker
            .track_pass(1, "edited", || async { Ok("edited".to_string()) })
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = TrackerConfig {
            job_id: "cfg-job".into(),
            auto_revert: false,
        };
        let tracker = PassTracker::from_config(
            &config,
            FixtureDetector::default(),
            Arc::new(MemorySnapshotStore::new()),
        );
        assert_eq!(tracker.job_id(), "cfg-job");
        assert!(!tracker.auto_revert());
    }
}
