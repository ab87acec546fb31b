//! Pass delta computation and revert policy.
//!
//! Given the before and after snapshots of one pass, the detector classifies
//! every failing rule as fixed, regressed, or unchanged, and decides whether
//! the pass should be reverted.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::models::{ContentSnapshot, PassDelta, Recommendation};

/// Stateless detector comparing two snapshots of the same pass.
pub struct ConflictDetector;

impl ConflictDetector {
    /// Compare the before and after snapshots of a pass.
    ///
    /// Rule ids in the returned lists are sorted. `recommendation` is filled
    /// in from [`should_revert`](Self::should_revert) so consumers of the
    /// delta alone see the policy outcome.
    pub fn compare_snapshots(before: &ContentSnapshot, after: &ContentSnapshot) -> PassDelta {
        let before_rules: BTreeSet<&str> = before.rule_statuses.keys().map(String::as_str).collect();
        let after_rules: BTreeSet<&str> = after.rule_statuses.keys().map(String::as_str).collect();

        let rules_fixed: Vec<String> = before_rules
            .difference(&after_rules)
            .map(|s| s.to_string())
            .collect();
        let rules_regressed: Vec<String> = after_rules
            .difference(&before_rules)
            .map(|s| s.to_string())
            .collect();
        let rules_unchanged: Vec<String> = before_rules
            .intersection(&after_rules)
            .map(|s| s.to_string())
            .collect();

        let net_change = rules_fixed.len() as i64 - rules_regressed.len() as i64;

        let mut delta = PassDelta {
            pass_number: after.pass_number,
            rules_fixed,
            rules_regressed,
            rules_unchanged,
            net_change,
            recommendation: Recommendation::Accept,
        };
        if Self::should_revert(&delta, after) {
            delta.recommendation = Recommendation::Revert;
        }

        info!(
            job_id = %after.job_id,
            pass_number = delta.pass_number,
            fixed = delta.rules_fixed.len(),
            regressed = delta.rules_regressed.len(),
            unchanged = delta.rules_unchanged.len(),
            net_change = delta.net_change,
            recommendation = %delta.recommendation,
            "pass delta computed"
        );
        delta
    }

    /// Regressed rules that carry `error` severity in the after snapshot.
    pub fn critical_regressions(delta: &PassDelta, after: &ContentSnapshot) -> Vec<String> {
        delta
            .rules_regressed
            .iter()
            .filter(|rule_id| after.is_critical(rule_id))
            .cloned()
            .collect()
    }

    /// `true` when the pass introduced a critical regression or made the
    /// net failing-rule count worse.
    pub fn should_revert(delta: &PassDelta, after: &ContentSnapshot) -> bool {
        let critical = Self::critical_regressions(delta, after);
        if !critical.is_empty() {
            debug!(pass_number = delta.pass_number, ?critical, "critical regression");
            return true;
        }
        delta.net_change < 0
    }

    /// Human-readable explanation for a revert, or `None` if the pass is
    /// acceptable. Critical rules are named ahead of the net balance.
    pub fn revert_reason(delta: &PassDelta, after: &ContentSnapshot) -> Option<String> {
        let critical = Self::critical_regressions(delta, after);
        if !critical.is_empty() {
            return Some(format!(
                "pass {} introduced critical violations: {}",
                delta.pass_number,
                critical.join(", ")
            ));
        }
        if delta.net_change < 0 {
            return Some(format!(
                "pass {} made compliance worse: {} rule(s) fixed, {} regressed (net {}): {}",
                delta.pass_number,
                delta.rules_fixed.len(),
                delta.rules_regressed.len(),
                delta.net_change,
                delta.rules_regressed.join(", ")
            ));
        }
        None
    }
}
