//! Folding multi-unit results into a single verdict.
//!
//! # Design Decisions
//! - All-must-pass: any failing required sub-unit fails the check, no
//!   partial credit
//! - Propagation checks use an agreement ratio over the full queried set,
//!   so unanswered nameservers count against the ratio
//! - Message templates render last, from the final aggregated outcome

use std::collections::BTreeMap;

use regex::Regex;

use crate::checks::outcome::{Outcome, OutcomeStatus, UnitResult};
use crate::config::schema::CheckSpec;

/// Order-insensitive set equality between resolved and expected values.
pub fn set_match(actual: &[String], expected: &[String]) -> bool {
    if actual.len() != expected.len() {
        return false;
    }
    let mut a: Vec<&str> = actual.iter().map(String::as_str).collect();
    let mut b: Vec<&str> = expected.iter().map(String::as_str).collect();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

/// All-must-pass fold over sub-unit results.
pub fn fold_units(units: &[UnitResult]) -> OutcomeStatus {
    if units.iter().all(|u| u.passed) {
        OutcomeStatus::Success
    } else {
        OutcomeStatus::Failure
    }
}

/// Verdict of an agreement-ratio fold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropagationVerdict {
    pub status: OutcomeStatus,
    pub agreement_percentage: f64,
}

/// Fold a propagation check: `agreeing / queried` against the required
/// agreement ratio. An expired time budget can never turn into a pass.
pub fn fold_propagation(
    agreeing: usize,
    queried: usize,
    required_agreement: f64,
) -> PropagationVerdict {
    let agreement_percentage = if queried == 0 {
        0.0
    } else {
        agreeing as f64 / queried as f64 * 100.0
    };
    let status = if agreement_percentage / 100.0 >= required_agreement {
        OutcomeStatus::Success
    } else {
        OutcomeStatus::Failure
    };
    PropagationVerdict {
        status,
        agreement_percentage,
    }
}

/// Fields available to `{{check.*}}` message templates.
pub fn check_context(spec: &CheckSpec, outcome: Option<&Outcome>) -> BTreeMap<String, String> {
    let mut ctx = BTreeMap::new();
    ctx.insert("name".to_string(), spec.name.clone());
    ctx.insert("type".to_string(), spec.type_name().to_string());
    ctx.insert("target".to_string(), spec.target().to_string());

    if let Some(outcome) = outcome {
        let status = match outcome.status {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Failure => "failure",
            OutcomeStatus::Error => "error",
        };
        ctx.insert("status".to_string(), status.to_string());
        if let Some(ms) = outcome.metrics.response_time_ms {
            ctx.insert("response_time".to_string(), ms.to_string());
        }
        if let Some(days) = outcome.metrics.days_remaining {
            ctx.insert("days_remaining".to_string(), days.to_string());
        }
        if let Some(pct) = outcome.metrics.agreement_percentage {
            ctx.insert("agreement_percentage".to_string(), format!("{:.1}", pct));
        }
    }

    ctx
}

/// Render a `{{check.*}}` message template. Unknown fields are left as
/// written so a bad template is visible in the rendered message.
pub fn render_message(template: &str, context: &BTreeMap<String, String>) -> String {
    let re = Regex::new(r"\{\{\s*check\.([A-Za-z0-9_]+)\s*\}\}").expect("valid regex");
    re.replace_all(template, |caps: &regex::Captures<'_>| {
        context
            .get(&caps[1])
            .cloned()
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}
