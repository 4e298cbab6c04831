//! HTTP check execution.
//!
//! Runs the declared step chain (or a single implicit step) in order. Each
//! step's `extract` bindings populate a context visible to later steps as
//! `{{steps.<name>.<binding>}}`. Steps fail closed: the first failing step
//! skips the remainder.

use std::collections::BTreeMap;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use crate::checks::outcome::{Outcome, OutcomeMetrics, OutcomeStatus, UnitResult};
use crate::checks::probe::{HttpProbeRequest, HttpProbeResponse, Probes};
use crate::config::schema::{CheckSpec, Criterion, HttpSpec, StepSpec};
use crate::resilience::retry::run_probe;

pub(crate) async fn run(spec: &CheckSpec, http: &HttpSpec, probes: &Probes) -> Outcome {
    let step_re =
        Regex::new(r"\{\{\s*steps\.([A-Za-z0-9_-]+)\.([A-Za-z0-9_]+)\s*\}\}").expect("valid regex");
    let steps = effective_steps(http);

    let mut context: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut units = Vec::new();
    let mut metrics = OutcomeMetrics::default();
    let mut status = OutcomeStatus::Success;
    let mut error = None;

    for step in &steps {
        let unit = format!("step:{}", step.name);
        let request = build_request(http, step, spec.timeout, &context, &step_re);

        let response = match run_probe(&spec.retry, || probes.http.send(&request)).await {
            Ok(response) => response,
            Err(probe_error) => {
                tracing::warn!(
                    check = %spec.name,
                    step = %step.name,
                    error = %probe_error,
                    "HTTP probe failed"
                );
                units.push(UnitResult::fail(unit, probe_error.to_string()));
                status = OutcomeStatus::Error;
                error = Some(probe_error.to_string());
                break;
            }
        };

        metrics.response_time_ms = Some(response.response_time_ms);

        let failures = evaluate_criteria(&step.success_criteria, &response);
        if !failures.is_empty() {
            units.push(
                UnitResult::fail(unit, failures.join("; ")).timed(response.response_time_ms),
            );
            status = OutcomeStatus::Failure;
            break;
        }

        match extract_bindings(&step.extract, &response) {
            Ok(bindings) => {
                context.insert(step.name.clone(), bindings);
                units.push(
                    UnitResult::pass(unit, format!("status {}", response.status))
                        .timed(response.response_time_ms),
                );
            }
            Err(detail) => {
                units.push(UnitResult::fail(unit, detail).timed(response.response_time_ms));
                status = OutcomeStatus::Failure;
                break;
            }
        }
    }

    Outcome {
        check: spec.name.clone(),
        status,
        units,
        metrics,
        message: None,
        error,
    }
}

/// The declared chain, or one implicit step from the top-level request
/// fields.
fn effective_steps(http: &HttpSpec) -> Vec<StepSpec> {
    if http.steps.is_empty() {
        vec![StepSpec {
            name: "request".to_string(),
            url: http.url.clone(),
            method: http.method.clone(),
            headers: http.headers.clone(),
            body: http.body.clone(),
            extract: BTreeMap::new(),
            success_criteria: http.success_criteria.clone(),
        }]
    } else {
        http.steps.clone()
    }
}

fn build_request(
    http: &HttpSpec,
    step: &StepSpec,
    timeout_secs: u64,
    context: &BTreeMap<String, BTreeMap<String, String>>,
    step_re: &Regex,
) -> HttpProbeRequest {
    let substitute = |text: &str| -> String {
        step_re
            .replace_all(text, |caps: &regex::Captures<'_>| {
                context
                    .get(&caps[1])
                    .and_then(|bindings| bindings.get(&caps[2]))
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    };

    let mut headers = BTreeMap::new();
    for (name, value) in &step.headers {
        headers.insert(name.clone(), substitute(value));
    }

    HttpProbeRequest {
        url: substitute(&step.url),
        method: step.method.clone(),
        headers,
        body: step.body.as_deref().map(substitute),
        timeout: Duration::from_secs(timeout_secs),
        follow_redirects: http.follow_redirects,
        verify_ssl: http.verify_ssl,
    }
}

/// Evaluate every criterion; returns the list of failure descriptions.
/// Without explicit criteria a non-4xx/5xx status passes.
fn evaluate_criteria(criteria: &[Criterion], response: &HttpProbeResponse) -> Vec<String> {
    if criteria.is_empty() {
        if response.status >= 400 {
            return vec![format!("unexpected status {}", response.status)];
        }
        return Vec::new();
    }

    let mut failures = Vec::new();
    for criterion in criteria {
        if let Some(expected) = criterion.status_code {
            if response.status != expected {
                failures.push(format!(
                    "expected status {}, got {}",
                    expected, response.status
                ));
            }
        }
        if let Some(bound) = criterion.response_time {
            if response.response_time_ms > bound {
                failures.push(format!(
                    "response time {}ms above bound {}ms",
                    response.response_time_ms, bound
                ));
            }
        }
        if let Some(content) = &criterion.content {
            if let Some(failure) = evaluate_content(content, response) {
                failures.push(failure);
            }
        }
    }
    failures
}

fn evaluate_content(
    content: &crate::config::schema::ContentAssertion,
    response: &HttpProbeResponse,
) -> Option<String> {
    match content.kind.as_str() {
        "json" => {
            let body: Value = match serde_json::from_str(&response.body) {
                Ok(body) => body,
                Err(_) => return Some("response body is not valid JSON".to_string()),
            };
            let path = content.path.as_deref().unwrap_or("$.");
            let actual = match resolve_json_path(&body, path) {
                Some(actual) => actual,
                None => return Some(format!("JSON path {} not found in body", path)),
            };
            let operator = content.operator.as_deref().unwrap_or("equals");
            let matched = match operator {
                "contains" => json_contains(actual, &content.value),
                _ => actual == &content.value,
            };
            if matched {
                None
            } else {
                Some(format!(
                    "body at {} {} {}, got {}",
                    path,
                    if operator == "contains" {
                        "does not contain"
                    } else {
                        "is not"
                    },
                    content.value,
                    actual
                ))
            }
        }
        _ => {
            let needle = match content.value.as_str() {
                Some(needle) => needle.to_string(),
                None => content.value.to_string(),
            };
            if response.body.contains(&needle) {
                None
            } else {
                Some(format!("body does not contain \"{}\"", needle))
            }
        }
    }
}

fn json_contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) => items.contains(expected),
        Value::String(s) => expected.as_str().map(|e| s.contains(e)).unwrap_or(false),
        _ => actual == expected,
    }
}

/// Resolve the step's extract bindings from the response. A missing path
/// is a step failure, not an error.
fn extract_bindings(
    extract: &BTreeMap<String, String>,
    response: &HttpProbeResponse,
) -> Result<BTreeMap<String, String>, String> {
    let mut bindings = BTreeMap::new();
    if extract.is_empty() {
        return Ok(bindings);
    }

    let body: Option<Value> = serde_json::from_str(&response.body).ok();
    for (name, path) in extract {
        let value = match path.as_str() {
            "status_code" => response.status.to_string(),
            "response_time_ms" => response.response_time_ms.to_string(),
            json_path => {
                let body = body
                    .as_ref()
                    .ok_or_else(|| format!("cannot extract {}: body is not JSON", name))?;
                let value = resolve_json_path(body, json_path)
                    .ok_or_else(|| format!("cannot extract {}: path {} not found", name, json_path))?;
                json_value_to_string(value)
            }
        };
        bindings.insert(name.clone(), value);
    }
    Ok(bindings)
}

/// Resolve a `$.a.b[0].c` style path against a JSON document.
pub(crate) fn resolve_json_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let rest = path.strip_prefix("$.").or_else(|| path.strip_prefix("$"))?;
    let mut current = root;
    if rest.is_empty() {
        return Some(current);
    }

    for segment in rest.split('.') {
        let (key, indexes) = split_indexes(segment)?;
        if !key.is_empty() {
            current = current.get(key)?;
        }
        for index in indexes {
            current = current.get(index)?;
        }
    }
    Some(current)
}

/// Split "items[0][1]" into ("items", [0, 1]).
fn split_indexes(segment: &str) -> Option<(&str, Vec<usize>)> {
    match segment.find('[') {
        None => Some((segment, Vec::new())),
        Some(start) => {
            let key = &segment[..start];
            let mut indexes = Vec::new();
            let mut rest = &segment[start..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let end = stripped.find(']')?;
                indexes.push(stripped[..end].parse().ok()?);
                rest = &stripped[end + 1..];
            }
            if rest.is_empty() {
                Some((key, indexes))
            } else {
                None
            }
        }
    }
}

fn json_value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
