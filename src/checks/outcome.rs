//! Structured results of executing a check.

use serde::Serialize;

/// Final status of one executed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// Every required sub-unit passed.
    Success,
    /// At least one assertion failed deterministically.
    Failure,
    /// The probe itself could not run (network, timeout, capability).
    Error,
}

/// Result of one sub-unit: a step, a port, or a nameserver.
#[derive(Debug, Clone, Serialize)]
pub struct UnitResult {
    /// Unit label, e.g. "step:login", "port:5432", "ns:8.8.8.8".
    pub unit: String,
    pub passed: bool,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
}

impl UnitResult {
    pub fn pass(unit: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            passed: true,
            detail: detail.into(),
            response_time_ms: None,
        }
    }

    pub fn fail(unit: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            passed: false,
            detail: detail.into(),
            response_time_ms: None,
        }
    }

    pub fn timed(mut self, response_time_ms: u64) -> Self {
        self.response_time_ms = Some(response_time_ms);
        self
    }
}

/// Numeric measurements; which fields are set depends on the check kind.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutcomeMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agreement_percentage: Option<f64>,
}

/// The transient result of executing one CheckSpec.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub check: String,
    pub status: OutcomeStatus,
    pub units: Vec<UnitResult>,
    pub metrics: OutcomeMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Outcome {
    /// Probe-level error outcome (no assertions were evaluated).
    pub fn error(check: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            status: OutcomeStatus::Error,
            units: Vec::new(),
            metrics: OutcomeMetrics::default(),
            message: None,
            error: Some(error.into()),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}
