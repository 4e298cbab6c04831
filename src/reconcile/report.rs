//! Caller-visible run reports.

use serde::Serialize;

use crate::checks::outcome::Outcome;
use crate::config::validation::Violation;
use crate::state::differ::DiffAction;

/// What actually happened to one check during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionTaken {
    Create,
    Update,
    Delete,
    Noop,
}

impl From<DiffAction> for ActionTaken {
    fn from(action: DiffAction) -> Self {
        match action {
            DiffAction::Create => ActionTaken::Create,
            DiffAction::Update => ActionTaken::Update,
            DiffAction::Delete => ActionTaken::Delete,
            DiffAction::Unchanged => ActionTaken::Noop,
        }
    }
}

/// Per-check result line.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub name: String,
    pub action: ActionTaken,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckReport {
    pub fn ok(name: impl Into<String>, action: ActionTaken) -> Self {
        Self {
            name: name.into(),
            action,
            outcome: None,
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, action: ActionTaken, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action,
            outcome: None,
            error: Some(error.into()),
        }
    }
}

/// Aggregate counts for the summary line and exit code.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Summary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Everything a run produced: configuration violations plus per-check
/// results. Rendering is the caller's concern.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub violations: Vec<Violation>,
    pub checks: Vec<CheckReport>,
}

impl RunReport {
    /// A run succeeds only when nothing was rejected and nothing failed.
    pub fn success(&self) -> bool {
        self.violations.is_empty()
            && self
                .checks
                .iter()
                .all(|c| c.error.is_none() && c.outcome.as_ref().map(|o| o.passed()).unwrap_or(true))
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            failed: self.violations.iter().map(|v| &v.check).collect::<std::collections::HashSet<_>>().len(),
            ..Summary::default()
        };
        for check in &self.checks {
            let failed = check.error.is_some()
                || check.outcome.as_ref().map(|o| !o.passed()).unwrap_or(false);
            if failed {
                summary.failed += 1;
                continue;
            }
            match check.action {
                ActionTaken::Create => summary.created += 1,
                ActionTaken::Update => summary.updated += 1,
                ActionTaken::Delete => summary.deleted += 1,
                ActionTaken::Noop => summary.unchanged += 1,
            }
        }
        summary
    }
}
