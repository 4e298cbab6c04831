//! Remote API payload builders.
//!
//! Shapes the platform bodies for checks and their derived resources.
//! Monitors and SLOs are always derived in full from the spec; partial
//! patching of dependents is never done.

use serde_json::{json, Map, Value};

use crate::checks::aggregate::{check_context, render_message};
use crate::config::schema::{CheckKind, CheckSpec, Criterion, MonitorSpec, SloSpec, StepSpec};

pub const MANAGED_BY_TAG: &str = "managed-by:healthcheck-deployer";

/// Full check body for create/update.
pub fn check_payload(spec: &CheckSpec) -> Value {
    let mut body = json!({
        "name": spec.name,
        "type": spec.type_name(),
        "enabled": spec.enabled,
        "tags": spec.tags,
        "locations": spec.locations,
        "frequency": spec.frequency,
        "timeout": spec.timeout,
    });

    let config = match &spec.kind {
        CheckKind::Http(http) => {
            let mut config = json!({
                "request": {
                    "url": http.url,
                    "method": http.method,
                    "headers": http.headers,
                    "body": http.body,
                    "follow_redirects": http.follow_redirects,
                    "verify_ssl": http.verify_ssl,
                },
                "assertions": assertions(&http.success_criteria),
            });
            if !http.steps.is_empty() {
                config["steps"] = Value::Array(http.steps.iter().map(step_payload).collect());
            }
            config
        }
        CheckKind::Tcp(tcp) => {
            let mut config = json!({
                "hostname": tcp.hostname,
                "ports": tcp.effective_ports(),
                "assertions": [
                    {"type": "connection", "operator": "succeeds"},
                    {"type": "responseTime", "operator": "lessThan",
                     "target": spec.timeout * 1000},
                ],
            });
            if let Some(send) = &tcp.send_string {
                config["send_string"] = json!(send);
            }
            if let Some(expect) = &tcp.expect_string {
                config["expect_string"] = json!(expect);
                config["assertions"]
                    .as_array_mut()
                    .expect("assertions is an array")
                    .push(json!({"type": "response", "operator": "contains", "target": expect}));
            }
            config
        }
        CheckKind::Dns(dns) => {
            let mut config = json!({
                "hostname": dns.hostname,
                "record_type": dns.record_type,
                "nameservers": dns.nameservers,
                "assertions": [
                    {"type": "recordValue", "operator": "is", "target": dns.expected_values},
                ],
            });
            if let Some(propagation) = &dns.propagation {
                config["check_all_servers"] = json!(dns.check_all_servers);
                config["propagation"] = json!({
                    "required_agreement": propagation.required_agreement,
                    "max_check_time": propagation.max_check_time,
                });
            }
            config
        }
        CheckKind::Ssl(ssl) => json!({
            "hostname": ssl.hostname,
            "port": ssl.port,
            "expiry_threshold": ssl.expiry_threshold,
            "warning_threshold": ssl.warning_threshold,
            "minimum_key_strength": ssl.minimum_key_strength,
            "protocols": ssl.protocols,
            "cipher_suites": {
                "required": ssl.cipher_suites.required,
                "forbidden": ssl.cipher_suites.forbidden,
            },
        }),
    };

    body["config"] = config;
    body
}

fn step_payload(step: &StepSpec) -> Value {
    json!({
        "name": step.name,
        "request": {
            "url": step.url,
            "method": step.method,
            "headers": step.headers,
            "body": step.body,
        },
        "extract": step.extract,
        "assertions": assertions(&step.success_criteria),
    })
}

/// Translate success criteria into platform assertions.
fn assertions(criteria: &[Criterion]) -> Vec<Value> {
    let mut out = Vec::new();
    for criterion in criteria {
        if let Some(code) = criterion.status_code {
            out.push(json!({"type": "statusCode", "operator": "is", "target": code}));
        }
        if let Some(bound) = criterion.response_time {
            out.push(json!({"type": "responseTime", "operator": "lessThan", "target": bound}));
        }
        if let Some(content) = &criterion.content {
            let operator = content.operator.as_deref().unwrap_or(match content.kind.as_str() {
                "json" => "equals",
                _ => "contains",
            });
            let mut assertion = Map::new();
            assertion.insert("type".to_string(), json!("body"));
            assertion.insert("operator".to_string(), json!(operator));
            assertion.insert("target".to_string(), content.value.clone());
            if let Some(path) = &content.path {
                assertion.insert("property".to_string(), json!(path));
            }
            out.push(Value::Object(assertion));
        }
    }
    out
}

/// Monitor body derived from one enabled monitor kind.
pub fn monitor_payload(spec: &CheckSpec, kind: &str, monitor: &MonitorSpec) -> Value {
    let context = check_context(spec, None);
    let message = monitor
        .message
        .as_deref()
        .map(|template| render_message(template, &context))
        .unwrap_or_else(|| format!("{} {} monitor triggered", spec.name, kind));

    let mut thresholds = Map::new();
    if let Some(threshold) = monitor.threshold {
        thresholds.insert("critical".to_string(), json!(threshold));
    }
    if let Some(warning) = monitor.warning_threshold {
        thresholds.insert("warning".to_string(), json!(warning));
    }

    json!({
        "name": format!("{} - {}", spec.name, kind),
        "type": "metric alert",
        "query": monitor_query(spec, kind),
        "message": message,
        "thresholds": thresholds,
        "tags": monitor_tags(spec, kind),
    })
}

fn monitor_query(spec: &CheckSpec, kind: &str) -> String {
    format!(
        "avg(last_5m):healthcheck.{}{{check_name:{}}}",
        kind, spec.name
    )
}

/// Spec tags plus the deployer's bookkeeping tags.
pub fn monitor_tags(spec: &CheckSpec, monitor_kind: &str) -> Vec<String> {
    let mut tags = spec.tags.clone();
    tags.push(format!("check_type:{}", spec.type_name()));
    tags.push(format!("monitor_type:{}", monitor_kind));
    tags.push(MANAGED_BY_TAG.to_string());
    tags
}

/// SLO body derived from the check's slo block.
pub fn slo_payload(spec: &CheckSpec, slo: &SloSpec) -> Value {
    json!({
        "name": format!("{} SLO", spec.name),
        "type": "monitor",
        "target": slo.target,
        "timeframe": slo.window,
        "tags": monitor_tags(spec, "slo"),
    })
}
