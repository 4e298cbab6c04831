//! Configuration schema definitions.
//!
//! Two layers of types live here. The raw layer (`DeployDoc`, `RawCheck`)
//! mirrors the declarative input tree exactly as users write it; checks stay
//! as untyped JSON values until defaults, templates and variables have been
//! merged in. The normalized layer (`CheckSpec`, `CheckKind`) is the typed,
//! immutable form the rest of the engine works with.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root of the declarative input document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployDoc {
    /// Schema version of the document.
    #[serde(default = "default_version")]
    pub version: String,

    /// Check declarations, kept untyped until layered merge completes.
    #[serde(default)]
    pub healthchecks: Vec<Value>,

    /// Per-type defaults, merged beneath every check of that type.
    #[serde(default)]
    pub defaults: BTreeMap<String, Value>,

    /// Named partial checks, merged beneath a check that references them.
    #[serde(default)]
    pub templates: BTreeMap<String, Value>,

    /// Explicit variable bindings; the process environment is the fallback.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// A single check declaration after layered merge, before typed conversion.
///
/// Carries the union of all per-type fields; the validator rejects fields
/// that are not legal for the declared `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCheck {
    pub name: String,
    #[serde(rename = "type")]
    pub check_type: String,

    /// Template reference, consumed by the normalizer before typed
    /// conversion.
    pub template: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default = "default_frequency")]
    pub frequency: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub monitors: BTreeMap<String, MonitorSpec>,
    pub slo: Option<SloSpec>,

    /// Free-text annotation, excluded from the content hash.
    pub notes: Option<String>,

    // HTTP fields
    pub url: Option<String>,
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub follow_redirects: Option<bool>,
    pub verify_ssl: Option<bool>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    #[serde(default)]
    pub success_criteria: Vec<Criterion>,

    // TCP / DNS / SSL shared fields
    pub hostname: Option<String>,
    pub port: Option<u16>,
    #[serde(default)]
    pub ports: Vec<u16>,
    pub send_string: Option<String>,
    pub expect_string: Option<String>,

    // DNS fields
    pub record_type: Option<String>,
    #[serde(default)]
    pub nameservers: Vec<String>,
    #[serde(default)]
    pub expected_values: Vec<String>,
    #[serde(default)]
    pub records: Vec<DnsRecordSpec>,
    pub check_all_servers: Option<bool>,
    pub propagation: Option<PropagationSpec>,

    // SSL fields
    pub expiry_threshold: Option<u32>,
    pub warning_threshold: Option<u32>,
    pub minimum_key_strength: Option<u32>,
    #[serde(default)]
    pub protocols: Vec<String>,
    pub cipher_suites: Option<CipherRules>,
}

fn default_enabled() -> bool {
    true
}

fn default_frequency() -> u32 {
    60
}

fn default_timeout() -> u64 {
    10
}

/// Retry policy for transient probe failures.
///
/// Assertion failures are deterministic outcomes and are never retried.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    #[serde(default = "default_retry_count")]
    pub count: u32,

    /// Seconds between attempts.
    #[serde(default = "default_retry_interval")]
    pub interval: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            count: default_retry_count(),
            interval: default_retry_interval(),
        }
    }
}

fn default_retry_count() -> u32 {
    2
}

fn default_retry_interval() -> u64 {
    5
}

/// Per-kind monitor derivation settings (`availability`, `latency`, ...).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorSpec {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub threshold: Option<f64>,
    pub warning_threshold: Option<f64>,
    /// Message template; `{{check.*}}` placeholders render at apply time.
    pub message: Option<String>,
}

/// Service level objective derived from a check.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SloSpec {
    /// Target percentage within [0, 100].
    pub target: f64,
    /// Rolling window, e.g. "30d".
    pub window: String,
}

/// One step of an HTTP step chain.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,

    /// Bound name -> JSON path into the response body. Bound values are
    /// visible to later steps as `{{steps.<step>.<name>}}`.
    #[serde(default)]
    pub extract: BTreeMap<String, String>,

    #[serde(default)]
    pub success_criteria: Vec<Criterion>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// One success criterion; a step or check passes only if every configured
/// assertion passes.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Criterion {
    /// Exact status code match.
    pub status_code: Option<u16>,
    /// Response time upper bound in milliseconds.
    pub response_time: Option<u64>,
    /// Body assertion.
    pub content: Option<ContentAssertion>,
}

/// Body assertion against the response payload.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ContentAssertion {
    /// "json" or "text".
    #[serde(rename = "type")]
    pub kind: String,
    /// JSON path for json assertions, e.g. "$.status".
    pub path: Option<String>,
    /// "equals" or "contains"; defaults to equals for json, contains for
    /// text.
    pub operator: Option<String>,
    pub value: Value,
}

/// One entry of a multi-record DNS declaration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DnsRecordSpec {
    pub record_type: String,
    #[serde(default)]
    pub expected_values: Vec<String>,
    /// Overrides the parent hostname for this record.
    pub hostname: Option<String>,
}

/// Agreement-ratio settings for DNS propagation checks.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PropagationSpec {
    /// Fraction of queried nameservers that must agree, within (0, 1].
    pub required_agreement: f64,

    /// Seconds to wait for nameserver answers before the check is a
    /// timeout failure.
    #[serde(default = "default_max_check_time")]
    pub max_check_time: u64,
}

fn default_max_check_time() -> u64 {
    60
}

/// Cipher suite rules for SSL checks.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CipherRules {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub forbidden: Vec<String>,
}

/// A fully normalized check. Immutable once validated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSpec {
    pub name: String,
    pub enabled: bool,
    pub tags: Vec<String>,
    pub locations: Vec<String>,
    pub frequency: u32,
    pub timeout: u64,
    pub retry: RetryPolicy,
    pub monitors: BTreeMap<String, MonitorSpec>,
    pub slo: Option<SloSpec>,
    pub notes: Option<String>,

    /// Parent check name for synthetic sub-checks expanded from a
    /// multi-record DNS declaration.
    pub parent: Option<String>,

    #[serde(flatten)]
    pub kind: CheckKind,
}

impl CheckSpec {
    /// Protocol name as written in the input document.
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            CheckKind::Http(_) => "http",
            CheckKind::Tcp(_) => "tcp",
            CheckKind::Dns(_) => "dns",
            CheckKind::Ssl(_) => "ssl",
        }
    }

    /// Probe target for reporting (url or hostname).
    pub fn target(&self) -> &str {
        match &self.kind {
            CheckKind::Http(h) => &h.url,
            CheckKind::Tcp(t) => &t.hostname,
            CheckKind::Dns(d) => &d.hostname,
            CheckKind::Ssl(s) => &s.hostname,
        }
    }
}

/// Closed set of check protocols. New types extend this enum and the
/// validator's per-type rule table together.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CheckKind {
    Http(HttpSpec),
    Tcp(TcpSpec),
    Dns(DnsSpec),
    Ssl(SslSpec),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpSpec {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub follow_redirects: bool,
    pub verify_ssl: bool,
    /// Explicit step chain; empty means a single implicit step built from
    /// the request fields above.
    pub steps: Vec<StepSpec>,
    pub success_criteria: Vec<Criterion>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TcpSpec {
    pub hostname: String,
    pub port: Option<u16>,
    /// Multi-port mode; each port is an independent sub-probe.
    pub ports: Vec<u16>,
    pub send_string: Option<String>,
    pub expect_string: Option<String>,
}

impl TcpSpec {
    /// Ports to probe, in declared order.
    pub fn effective_ports(&self) -> Vec<u16> {
        if self.ports.is_empty() {
            self.port.into_iter().collect()
        } else {
            self.ports.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DnsSpec {
    pub hostname: String,
    pub record_type: String,
    pub nameservers: Vec<String>,
    pub expected_values: Vec<String>,
    pub check_all_servers: bool,
    pub propagation: Option<PropagationSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SslSpec {
    pub hostname: String,
    pub port: u16,
    /// Days before expiry at which the check fails.
    pub expiry_threshold: u32,
    /// Days before expiry at which the check passes with a warning.
    pub warning_threshold: Option<u32>,
    pub minimum_key_strength: Option<u32>,
    /// Allowed protocol versions; empty means any.
    pub protocols: Vec<String>,
    pub cipher_suites: CipherRules,
}
