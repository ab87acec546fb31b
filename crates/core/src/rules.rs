//! Violation detection.
//!
//! [`ViolationDetector`] is the seam through which the tracker asks an
//! external analyser which rules a piece of content breaks.
//! [`PatternRuleSet`] is a regex-backed implementation driven by the
//! `[[rules]]` section of the configuration.

use std::collections::HashSet;
use std::future::Future;

use regex_lite::{Regex, RegexBuilder};
use tracing::{debug, info};

use crate::config::RuleConfig;
use crate::errors::RuleError;
use crate::models::{Severity, Violation};

// ---------------------------------------------------------------------------
// Detector trait
// ---------------------------------------------------------------------------

/// Reports the rule violations present in a content string.
///
/// Detection may suspend (for example while calling a remote analyser).
/// Failures surface as `anyhow::Error` and abort the pass being tracked.
pub trait ViolationDetector: Send + Sync {
    fn detect(&self, content: &str) -> impl Future<Output = anyhow::Result<Vec<Violation>>> + Send;
}

// ---------------------------------------------------------------------------
// Pattern rules
// ---------------------------------------------------------------------------

/// A single compiled rule: every match of `regex` is one violation.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub id: String,
    pub severity: Severity,
    pub message: Option<String>,
    regex: Regex,
}

impl PatternRule {
    pub fn new(
        id: impl Into<String>,
        pattern: &str,
        severity: Severity,
        case_insensitive: bool,
    ) -> Result<Self, RuleError> {
        let id = id.into();
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| RuleError::InvalidPattern {
                rule_id: id.clone(),
                detail: e.to_string(),
            })?;
        Ok(Self {
            id,
            severity,
            message: None,
            regex,
        })
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn scan(&self, content: &str, out: &mut Vec<Violation>) {
        for m in self.regex.find_iter(content) {
            out.push(Violation {
                rule_id: self.id.clone(),
                severity: self.severity,
                message: self.message.clone(),
                offset: Some(m.start()),
            });
        }
    }
}

/// An ordered set of pattern rules with unique ids.
#[derive(Debug, Clone, Default)]
pub struct PatternRuleSet {
    rules: Vec<PatternRule>,
}

impl PatternRuleSet {
    pub fn new(rules: Vec<PatternRule>) -> Result<Self, RuleError> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(RuleError::DuplicateId(rule.id.clone()));
            }
        }
        Ok(Self { rules })
    }

    /// Compile the `[[rules]]` entries of a configuration file.
    pub fn from_config(rules: &[RuleConfig]) -> Result<Self, RuleError> {
        let compiled = rules
            .iter()
            .map(|r| -> Result<PatternRule, RuleError> {
                let rule = PatternRule::new(&r.id, &r.pattern, r.severity, r.case_insensitive)?;
                Ok(match &r.message {
                    Some(msg) => rule.with_message(msg),
                    None => rule,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!(count = compiled.len(), "compiled pattern rules");
        Self::new(compiled)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    /// Synchronous scan; violations are grouped by rule in definition order.
    pub fn scan(&self, content: &str) -> Vec<Violation> {
        let mut violations = Vec::new();
        for rule in &self.rules {
            rule.scan(content, &mut violations);
        }
        debug!(
            rules = self.rules.len(),
            violations = violations.len(),
            "pattern scan complete"
        );
        violations
    }
}

impl ViolationDetector for PatternRuleSet {
    async fn detect(&self, content: &str) -> anyhow::Result<Vec<Violation>> {
        Ok(self.scan(content))
    }
}
