//! Semantic validation of normalized checks.
//!
//! # Responsibilities
//! - Required-field presence per check type
//! - Value ranges (ports, frequency, timeout, percentage thresholds)
//! - Step-chain rules: unique names, backward-only references
//! - Duplicate check names across the whole set
//!
//! # Design Decisions
//! - Returns the complete violation list, never just the first
//! - Runs after normalization; a spec that passes is immutable from here on

use std::collections::{BTreeMap, HashSet};

use regex::Regex;
use thiserror::Error;

use crate::config::schema::{
    CheckKind, CheckSpec, Criterion, DnsSpec, HttpSpec, SslSpec, StepSpec, TcpSpec,
};

const VALID_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH"];
const VALID_RECORD_TYPES: &[&str] = &[
    "A", "AAAA", "CNAME", "MX", "NS", "PTR", "SOA", "SRV", "TXT",
];
/// Monitor kinds whose thresholds are percentages.
const PERCENTAGE_MONITOR_KINDS: &[&str] = &["availability", "uptime"];

/// A single rule violation, addressed by check and field.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize)]
#[error("{check}: {field}: {message}")]
pub struct Violation {
    pub check: String,
    pub field: String,
    pub message: String,
}

impl Violation {
    pub fn new(
        check: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            check: check.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate the whole spec set, collecting every violation.
pub fn validate_specs(specs: &[CheckSpec]) -> Result<(), Vec<Violation>> {
    let mut out = Vec::new();
    let step_ref_re =
        Regex::new(r"\{\{\s*steps\.([A-Za-z0-9_-]+)\.([A-Za-z0-9_]+)\s*\}\}").expect("valid regex");

    let mut seen = HashSet::new();
    for spec in specs {
        if !seen.insert(spec.name.as_str()) {
            out.push(Violation::new(
                &spec.name,
                "name",
                "duplicate check name",
            ));
        }
    }

    for spec in specs {
        validate_common(spec, &mut out);
        match &spec.kind {
            CheckKind::Http(http) => validate_http(spec, http, &step_ref_re, &mut out),
            CheckKind::Tcp(tcp) => validate_tcp(spec, tcp, &mut out),
            CheckKind::Dns(dns) => validate_dns(spec, dns, &mut out),
            CheckKind::Ssl(ssl) => validate_ssl(spec, ssl, &mut out),
        }
    }

    if out.is_empty() {
        Ok(())
    } else {
        Err(out)
    }
}

fn validate_common(spec: &CheckSpec, out: &mut Vec<Violation>) {
    if spec.name.is_empty() {
        out.push(Violation::new(&spec.name, "name", "check name is required"));
    }
    if spec.frequency == 0 {
        out.push(Violation::new(
            &spec.name,
            "frequency",
            "frequency must be greater than zero",
        ));
    } else if spec.frequency < 60 {
        tracing::warn!(
            check = %spec.name,
            frequency = spec.frequency,
            "Check frequency below 60s may impact platform quota"
        );
    }
    if spec.timeout == 0 {
        out.push(Violation::new(
            &spec.name,
            "timeout",
            "timeout must be greater than zero",
        ));
    }
    if spec.locations.is_empty() {
        out.push(Violation::new(
            &spec.name,
            "locations",
            "at least one probe location is required",
        ));
    }

    for (kind, monitor) in &spec.monitors {
        if PERCENTAGE_MONITOR_KINDS.contains(&kind.as_str()) {
            for (field, value) in [
                ("threshold", monitor.threshold),
                ("warning_threshold", monitor.warning_threshold),
            ] {
                if let Some(value) = value {
                    if !(0.0..=100.0).contains(&value) {
                        out.push(Violation::new(
                            &spec.name,
                            format!("monitors.{}.{}", kind, field),
                            "percentage threshold must be within [0, 100]",
                        ));
                    }
                }
            }
        }
    }

    if let Some(slo) = &spec.slo {
        if !(0.0..=100.0).contains(&slo.target) {
            out.push(Violation::new(
                &spec.name,
                "slo.target",
                "SLO target must be within [0, 100]",
            ));
        }
        let mut window_chars = slo.window.chars();
        let unit = window_chars.next_back();
        let digits = window_chars.as_str();
        let window_ok = !digits.is_empty()
            && digits.chars().all(|c| c.is_ascii_digit())
            && matches!(unit, Some('h' | 'd' | 'w' | 'm'));
        if !window_ok {
            out.push(Violation::new(
                &spec.name,
                "slo.window",
                "SLO window must look like \"7d\", \"4w\" or \"30d\"",
            ));
        }
    }
}

fn validate_http(
    spec: &CheckSpec,
    http: &HttpSpec,
    step_ref_re: &Regex,
    out: &mut Vec<Violation>,
) {
    if http.steps.is_empty() && http.url.is_empty() {
        out.push(Violation::new(&spec.name, "url", "URL is required for HTTP checks"));
    }
    if !http.url.is_empty() && url::Url::parse(&http.url).is_err() {
        out.push(Violation::new(&spec.name, "url", "URL is not parseable"));
    }
    if !VALID_METHODS.contains(&http.method.as_str()) {
        out.push(Violation::new(
            &spec.name,
            "method",
            format!("invalid HTTP method \"{}\"", http.method),
        ));
    }
    for (i, criterion) in http.success_criteria.iter().enumerate() {
        validate_criterion(spec, &format!("success_criteria[{}]", i), criterion, out);
    }

    validate_steps(spec, &http.steps, step_ref_re, out);
}

/// Step-chain rules: unique names, valid requests, and `{{steps.*}}`
/// references that only point at earlier steps' extract bindings.
fn validate_steps(
    spec: &CheckSpec,
    steps: &[StepSpec],
    step_ref_re: &Regex,
    out: &mut Vec<Violation>,
) {
    let mut bindings: BTreeMap<&str, &StepSpec> = BTreeMap::new();

    for (index, step) in steps.iter().enumerate() {
        let field = |suffix: &str| format!("steps[{}].{}", index, suffix);

        if step.name.is_empty() {
            out.push(Violation::new(&spec.name, field("name"), "step name is required"));
        }
        if bindings.contains_key(step.name.as_str()) {
            out.push(Violation::new(
                &spec.name,
                field("name"),
                format!("duplicate step name \"{}\"", step.name),
            ));
        }
        if step.url.is_empty() {
            out.push(Violation::new(&spec.name, field("url"), "step URL is required"));
        }
        if !VALID_METHODS.contains(&step.method.as_str()) {
            out.push(Violation::new(
                &spec.name,
                field("method"),
                format!("invalid HTTP method \"{}\"", step.method),
            ));
        }
        for (bind, path) in &step.extract {
            let pseudo = path == "status_code" || path == "response_time_ms";
            if !pseudo && !path.starts_with("$.") {
                out.push(Violation::new(
                    &spec.name,
                    field(&format!("extract.{}", bind)),
                    format!("extract path must be a JSON path (\"$.\"), got \"{}\"", path),
                ));
            }
        }
        for (i, criterion) in step.success_criteria.iter().enumerate() {
            validate_criterion(spec, &field(&format!("success_criteria[{}]", i)), criterion, out);
        }

        // References may only point backwards in the chain.
        let mut referenced = Vec::new();
        collect_step_refs(step, step_ref_re, &mut referenced);
        for (target, bind) in referenced {
            match bindings.get(target.as_str()) {
                None => {
                    let message = if steps.iter().any(|s| s.name == target) {
                        format!(
                            "step \"{}\" references step \"{}\" before it has run",
                            step.name, target
                        )
                    } else {
                        format!("step \"{}\" references unknown step \"{}\"", step.name, target)
                    };
                    out.push(Violation::new(&spec.name, field("references"), message));
                }
                Some(earlier) => {
                    if !earlier.extract.contains_key(&bind) {
                        out.push(Violation::new(
                            &spec.name,
                            field("references"),
                            format!(
                                "step \"{}\" does not extract a binding named \"{}\"",
                                target, bind
                            ),
                        ));
                    }
                }
            }
        }

        bindings.insert(&step.name, step);
    }
}

fn collect_step_refs(step: &StepSpec, re: &Regex, out: &mut Vec<(String, String)>) {
    let mut scan = |text: &str| {
        for caps in re.captures_iter(text) {
            out.push((caps[1].to_string(), caps[2].to_string()));
        }
    };
    scan(&step.url);
    for value in step.headers.values() {
        scan(value);
    }
    if let Some(body) = &step.body {
        scan(body);
    }
}

fn validate_criterion(spec: &CheckSpec, field: &str, criterion: &Criterion, out: &mut Vec<Violation>) {
    if criterion.status_code.is_none()
        && criterion.response_time.is_none()
        && criterion.content.is_none()
    {
        out.push(Violation::new(&spec.name, field, "empty success criterion"));
    }
    if let Some(code) = criterion.status_code {
        if !(100..=599).contains(&code) {
            out.push(Violation::new(
                &spec.name,
                format!("{}.status_code", field),
                format!("invalid status code {}", code),
            ));
        }
    }
    if let Some(time) = criterion.response_time {
        if time == 0 {
            out.push(Violation::new(
                &spec.name,
                format!("{}.response_time", field),
                "response time bound must be greater than zero",
            ));
        }
    }
    if let Some(content) = &criterion.content {
        if !matches!(content.kind.as_str(), "json" | "text") {
            out.push(Violation::new(
                &spec.name,
                format!("{}.content.type", field),
                format!("invalid content assertion type \"{}\"", content.kind),
            ));
        }
        if let Some(operator) = &content.operator {
            if !matches!(operator.as_str(), "equals" | "contains") {
                out.push(Violation::new(
                    &spec.name,
                    format!("{}.content.operator", field),
                    format!("invalid content operator \"{}\"", operator),
                ));
            }
        }
        if content.kind == "json" {
            match &content.path {
                Some(path) if path.starts_with("$.") => {}
                _ => out.push(Violation::new(
                    &spec.name,
                    format!("{}.content.path", field),
                    "json assertions need a JSON path starting with \"$.\"",
                )),
            }
        }
    }
}

fn validate_tcp(spec: &CheckSpec, tcp: &TcpSpec, out: &mut Vec<Violation>) {
    if tcp.hostname.is_empty() {
        out.push(Violation::new(
            &spec.name,
            "hostname",
            "hostname is required for TCP checks",
        ));
    }
    match (tcp.port, tcp.ports.is_empty()) {
        (None, true) => out.push(Violation::new(
            &spec.name,
            "port",
            "one of port or ports is required for TCP checks",
        )),
        (Some(_), false) => out.push(Violation::new(
            &spec.name,
            "ports",
            "port and ports are mutually exclusive",
        )),
        _ => {}
    }
    for port in tcp.port.iter().chain(tcp.ports.iter()) {
        if *port == 0 {
            out.push(Violation::new(&spec.name, "port", "port 0 is not valid"));
        }
    }
    if tcp.expect_string.is_some() && tcp.send_string.is_none() {
        out.push(Violation::new(
            &spec.name,
            "expect_string",
            "expect_string requires send_string",
        ));
    }
}

fn validate_dns(spec: &CheckSpec, dns: &DnsSpec, out: &mut Vec<Violation>) {
    if dns.hostname.is_empty() {
        out.push(Violation::new(
            &spec.name,
            "hostname",
            "hostname is required for DNS checks",
        ));
    }
    if !VALID_RECORD_TYPES.contains(&dns.record_type.as_str()) {
        out.push(Violation::new(
            &spec.name,
            "record_type",
            format!("invalid DNS record type \"{}\"", dns.record_type),
        ));
    }

    match (&dns.propagation, dns.check_all_servers) {
        (Some(propagation), true) => {
            if !(propagation.required_agreement > 0.0 && propagation.required_agreement <= 1.0) {
                out.push(Violation::new(
                    &spec.name,
                    "propagation.required_agreement",
                    "required agreement must be within (0, 1]",
                ));
            }
            if propagation.max_check_time == 0 {
                out.push(Violation::new(
                    &spec.name,
                    "propagation.max_check_time",
                    "max check time must be greater than zero",
                ));
            }
            if dns.nameservers.len() < 2 {
                out.push(Violation::new(
                    &spec.name,
                    "nameservers",
                    "propagation checks need at least two nameservers",
                ));
            }
            if dns.expected_values.is_empty() {
                out.push(Violation::new(
                    &spec.name,
                    "expected_values",
                    "propagation checks need expected values to agree on",
                ));
            }
        }
        (Some(_), false) => out.push(Violation::new(
            &spec.name,
            "propagation",
            "propagation requires check_all_servers: true",
        )),
        (None, _) => {}
    }
}

fn validate_ssl(spec: &CheckSpec, ssl: &SslSpec, out: &mut Vec<Violation>) {
    if ssl.hostname.is_empty() {
        out.push(Violation::new(
            &spec.name,
            "hostname",
            "hostname is required for SSL checks",
        ));
    }
    if ssl.port == 0 {
        out.push(Violation::new(&spec.name, "port", "port 0 is not valid"));
    }
    if ssl.expiry_threshold == 0 {
        out.push(Violation::new(
            &spec.name,
            "expiry_threshold",
            "expiry threshold must be greater than zero",
        ));
    }
    if let Some(warning) = ssl.warning_threshold {
        if warning < ssl.expiry_threshold {
            out.push(Violation::new(
                &spec.name,
                "warning_threshold",
                "warning threshold must be at or above the expiry threshold",
            ));
        }
    }
    for cipher in &ssl.cipher_suites.required {
        if ssl.cipher_suites.forbidden.contains(cipher) {
            out.push(Violation::new(
                &spec.name,
                "cipher_suites",
                format!("cipher \"{}\" is both required and forbidden", cipher),
            ));
        }
    }
}
