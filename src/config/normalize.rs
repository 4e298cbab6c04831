//! Spec normalization.
//!
//! # Data Flow
//! ```text
//! raw check declaration (untyped tree)
//!     → layered merge: defaults[type] → named template → explicit fields
//!     → variable substitution ({{VAR}} / ${VAR})
//!     → multi-record DNS expansion
//!     → typed CheckSpec
//! ```
//!
//! # Design Decisions
//! - Merge is field-by-field: maps merge recursively, scalars override
//! - Collection fields (tags, locations, nameservers) union across layers,
//!   first-seen order, duplicates dropped
//! - `{{steps.*}}` and `{{check.*}}` placeholders are exempt from variable
//!   substitution; they resolve at execution / render time
//! - Errors are collected per check; one bad check never hides another

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::{Map, Value};

use crate::config::schema::{
    CheckKind, CheckSpec, DeployDoc, DnsSpec, HttpSpec, RawCheck, SslSpec, TcpSpec,
};
use crate::config::validation::Violation;

/// Fields that union across merge layers instead of being replaced.
const UNION_FIELDS: &[&str] = &["tags", "locations", "nameservers"];

/// Fields legal only for a specific check type.
const HTTP_FIELDS: &[&str] = &[
    "url",
    "method",
    "headers",
    "body",
    "follow_redirects",
    "verify_ssl",
    "steps",
    "success_criteria",
];
const TCP_FIELDS: &[&str] = &["hostname", "port", "ports", "send_string", "expect_string"];
const DNS_FIELDS: &[&str] = &[
    "hostname",
    "record_type",
    "nameservers",
    "expected_values",
    "records",
    "check_all_servers",
    "propagation",
];
const SSL_FIELDS: &[&str] = &[
    "hostname",
    "port",
    "expiry_threshold",
    "warning_threshold",
    "minimum_key_strength",
    "protocols",
    "cipher_suites",
];

/// Resolve every declared check into a concrete `CheckSpec`.
///
/// Returns the specs that resolved cleanly together with the violations of
/// those that did not; a violation in one check does not stop the others.
pub fn normalize(doc: &DeployDoc) -> (Vec<CheckSpec>, Vec<Violation>) {
    let re_curly = Regex::new(r"\{\{\s*([A-Za-z0-9_][A-Za-z0-9_.]*)\s*\}\}").expect("valid regex");
    let re_dollar = Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("valid regex");
    let subst = Substituter {
        variables: &doc.variables,
        re_curly,
        re_dollar,
    };

    let mut specs = Vec::new();
    let mut violations = Vec::new();

    for (index, declared) in doc.healthchecks.iter().enumerate() {
        let name = declared
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("healthchecks[{}]", index));

        match resolve_one(declared, doc, &subst, &name) {
            Ok(raws) => {
                for (raw, parent) in raws {
                    match build_spec(raw, parent) {
                        Ok(spec) => specs.push(spec),
                        Err(mut errs) => violations.append(&mut errs),
                    }
                }
            }
            Err(mut errs) => violations.append(&mut errs),
        }
    }

    tracing::debug!(
        resolved = specs.len(),
        violations = violations.len(),
        "Normalization complete"
    );

    (specs, violations)
}

/// Merge layers, substitute variables and expand multi-record declarations
/// for a single check.
fn resolve_one(
    declared: &Value,
    doc: &DeployDoc,
    subst: &Substituter<'_>,
    name: &str,
) -> Result<Vec<(RawCheck, Option<String>)>, Vec<Violation>> {
    let obj = declared
        .as_object()
        .ok_or_else(|| vec![Violation::new(name, "", "check declaration must be a mapping")])?;

    let check_type = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| vec![Violation::new(name, "type", "check type is required")])?
        .to_lowercase();

    // Layered merge, lowest precedence first.
    let mut merged = Value::Object(Map::new());
    if let Some(defaults) = doc.defaults.get(&check_type) {
        merge_value(&mut merged, defaults);
    }
    if let Some(template_name) = obj.get("template").and_then(Value::as_str) {
        let template = doc.templates.get(template_name).ok_or_else(|| {
            vec![Violation::new(
                name,
                "template",
                format!("unknown template \"{}\"", template_name),
            )]
        })?;
        merge_value(&mut merged, template);
    }
    merge_value(&mut merged, declared);

    let mut violations = Vec::new();
    subst.apply(&mut merged, name, &mut String::new(), &mut violations);
    if !violations.is_empty() {
        return Err(violations);
    }

    let raw: RawCheck = serde_json::from_value(merged)
        .map_err(|e| vec![Violation::new(name, "", e.to_string())])?;

    check_field_legality(&raw, &mut violations);
    if !violations.is_empty() {
        return Err(violations);
    }

    Ok(expand_records(raw))
}

/// Field-by-field merge of `overlay` on top of `base`.
fn merge_value(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => {
                        if UNION_FIELDS.contains(&key.as_str())
                            && base_value.is_array()
                            && overlay_value.is_array()
                        {
                            union_arrays(base_value, overlay_value);
                        } else if base_value.is_object() && overlay_value.is_object() {
                            merge_value(base_value, overlay_value);
                        } else {
                            *base_value = overlay_value.clone();
                        }
                    }
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

fn union_arrays(base: &mut Value, overlay: &Value) {
    let base_items = base.as_array_mut().expect("checked by caller");
    for item in overlay.as_array().expect("checked by caller") {
        if !base_items.contains(item) {
            base_items.push(item.clone());
        }
    }
}

struct Substituter<'a> {
    variables: &'a BTreeMap<String, String>,
    re_curly: Regex,
    re_dollar: Regex,
}

impl Substituter<'_> {
    /// Substitute placeholders in every string leaf, tracking the field
    /// path for error reporting.
    fn apply(&self, value: &mut Value, check: &str, path: &mut String, out: &mut Vec<Violation>) {
        match value {
            Value::String(s) => {
                let mut missing = Vec::new();
                let replaced = self.substitute(s, &mut missing);
                for var in missing {
                    out.push(Violation::new(
                        check,
                        path.as_str(),
                        format!("unresolved variable \"{}\"", var),
                    ));
                }
                *s = replaced;
            }
            Value::Object(map) => {
                for (key, child) in map {
                    let len = path.len();
                    if !path.is_empty() {
                        path.push('.');
                    }
                    path.push_str(key);
                    self.apply(child, check, path, out);
                    path.truncate(len);
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter_mut().enumerate() {
                    let len = path.len();
                    path.push_str(&format!("[{}]", i));
                    self.apply(child, check, path, out);
                    path.truncate(len);
                }
            }
            _ => {}
        }
    }

    fn substitute(&self, input: &str, missing: &mut Vec<String>) -> String {
        let pass1 = self.re_curly.replace_all(input, |caps: &regex::Captures<'_>| {
            let var = &caps[1];
            if var.starts_with("steps.") || var.starts_with("check.") {
                return caps[0].to_string();
            }
            match self.lookup(var) {
                Some(value) => value,
                None => {
                    missing.push(var.to_string());
                    caps[0].to_string()
                }
            }
        });
        self.re_dollar
            .replace_all(&pass1, |caps: &regex::Captures<'_>| {
                let var = &caps[1];
                match self.lookup(var) {
                    Some(value) => value,
                    None => {
                        missing.push(var.to_string());
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    fn lookup(&self, var: &str) -> Option<String> {
        self.variables
            .get(var)
            .cloned()
            .or_else(|| std::env::var(var).ok())
    }
}

/// Reject protocol fields that are not legal for the declared type.
fn check_field_legality(raw: &RawCheck, out: &mut Vec<Violation>) {
    let legal: &[&str] = match raw.check_type.as_str() {
        "http" => HTTP_FIELDS,
        "tcp" => TCP_FIELDS,
        "dns" => DNS_FIELDS,
        "ssl" => SSL_FIELDS,
        other => {
            out.push(Violation::new(
                &raw.name,
                "type",
                format!("unsupported check type \"{}\"", other),
            ));
            return;
        }
    };

    for field in set_protocol_fields(raw) {
        if !legal.contains(&field) {
            out.push(Violation::new(
                &raw.name,
                field,
                format!("field is not valid for {} checks", raw.check_type),
            ));
        }
    }
}

/// Protocol-specific fields actually present on the declaration.
fn set_protocol_fields(raw: &RawCheck) -> Vec<&'static str> {
    let mut set = Vec::new();
    if raw.url.is_some() {
        set.push("url");
    }
    if raw.method.is_some() {
        set.push("method");
    }
    if !raw.headers.is_empty() {
        set.push("headers");
    }
    if raw.body.is_some() {
        set.push("body");
    }
    if raw.follow_redirects.is_some() {
        set.push("follow_redirects");
    }
    if raw.verify_ssl.is_some() {
        set.push("verify_ssl");
    }
    if !raw.steps.is_empty() {
        set.push("steps");
    }
    if !raw.success_criteria.is_empty() {
        set.push("success_criteria");
    }
    if raw.hostname.is_some() {
        set.push("hostname");
    }
    if raw.port.is_some() {
        set.push("port");
    }
    if !raw.ports.is_empty() {
        set.push("ports");
    }
    if raw.send_string.is_some() {
        set.push("send_string");
    }
    if raw.expect_string.is_some() {
        set.push("expect_string");
    }
    if raw.record_type.is_some() {
        set.push("record_type");
    }
    if !raw.nameservers.is_empty() {
        set.push("nameservers");
    }
    if !raw.expected_values.is_empty() {
        set.push("expected_values");
    }
    if !raw.records.is_empty() {
        set.push("records");
    }
    if raw.check_all_servers.is_some() {
        set.push("check_all_servers");
    }
    if raw.propagation.is_some() {
        set.push("propagation");
    }
    if raw.expiry_threshold.is_some() {
        set.push("expiry_threshold");
    }
    if raw.warning_threshold.is_some() {
        set.push("warning_threshold");
    }
    if raw.minimum_key_strength.is_some() {
        set.push("minimum_key_strength");
    }
    if !raw.protocols.is_empty() {
        set.push("protocols");
    }
    if raw.cipher_suites.is_some() {
        set.push("cipher_suites");
    }
    set
}

/// Expand a multi-record DNS declaration into one synthetic sub-check per
/// record, each keeping a back-reference to the parent name.
fn expand_records(raw: RawCheck) -> Vec<(RawCheck, Option<String>)> {
    if raw.check_type != "dns" || raw.records.is_empty() {
        return vec![(raw, None)];
    }

    let parent = raw.name.clone();
    let mut used_names: Vec<String> = Vec::new();
    let mut expanded = Vec::with_capacity(raw.records.len());

    for record in raw.records.clone() {
        let base_name = format!("{}-{}", parent, record.record_type.to_lowercase());
        let mut name = base_name.clone();
        let mut suffix = 2;
        while used_names.contains(&name) {
            name = format!("{}-{}", base_name, suffix);
            suffix += 1;
        }
        used_names.push(name.clone());

        let mut sub = raw.clone();
        sub.name = name;
        sub.records = Vec::new();
        sub.record_type = Some(record.record_type);
        sub.expected_values = record.expected_values;
        if let Some(hostname) = record.hostname {
            sub.hostname = Some(hostname);
        }
        expanded.push((sub, Some(parent.clone())));
    }

    expanded
}

/// Convert a merged raw check into the typed spec.
fn build_spec(raw: RawCheck, parent: Option<String>) -> Result<CheckSpec, Vec<Violation>> {
    let kind = match raw.check_type.as_str() {
        "http" => CheckKind::Http(HttpSpec {
            url: raw.url.unwrap_or_default(),
            method: raw.method.unwrap_or_else(|| "GET".to_string()).to_uppercase(),
            headers: raw.headers,
            body: raw.body,
            follow_redirects: raw.follow_redirects.unwrap_or(true),
            verify_ssl: raw.verify_ssl.unwrap_or(true),
            steps: raw.steps,
            success_criteria: raw.success_criteria,
        }),
        "tcp" => CheckKind::Tcp(TcpSpec {
            hostname: raw.hostname.unwrap_or_default(),
            port: raw.port,
            ports: raw.ports,
            send_string: raw.send_string,
            expect_string: raw.expect_string,
        }),
        "dns" => CheckKind::Dns(DnsSpec {
            hostname: raw.hostname.unwrap_or_default(),
            record_type: raw.record_type.unwrap_or_else(|| "A".to_string()).to_uppercase(),
            nameservers: raw.nameservers,
            expected_values: raw.expected_values,
            check_all_servers: raw.check_all_servers.unwrap_or(false),
            propagation: raw.propagation,
        }),
        "ssl" => CheckKind::Ssl(SslSpec {
            hostname: raw.hostname.unwrap_or_default(),
            port: raw.port.unwrap_or(443),
            expiry_threshold: raw.expiry_threshold.unwrap_or(30),
            warning_threshold: raw.warning_threshold,
            minimum_key_strength: raw.minimum_key_strength,
            protocols: raw.protocols,
            cipher_suites: raw.cipher_suites.unwrap_or_default(),
        }),
        other => {
            return Err(vec![Violation::new(
                &raw.name,
                "type",
                format!("unsupported check type \"{}\"", other),
            )])
        }
    };

    Ok(CheckSpec {
        name: raw.name,
        enabled: raw.enabled,
        tags: raw.tags,
        locations: raw.locations,
        frequency: raw.frequency,
        timeout: raw.timeout,
        retry: raw.retry,
        monitors: raw.monitors,
        slo: raw.slo,
        notes: raw.notes,
        parent,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc_from(value: Value) -> DeployDoc {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn explicit_field_wins_over_template_and_defaults() {
        let doc = doc_from(json!({
            "defaults": {"http": {"timeout": 30}},
            "templates": {"web": {"timeout": 20}},
            "healthchecks": [
                {"name": "a", "type": "http", "url": "https://a", "template": "web", "timeout": 10},
                {"name": "b", "type": "http", "url": "https://b", "template": "web"},
                {"name": "c", "type": "http", "url": "https://c"}
            ]
        }));

        let (specs, violations) = normalize(&doc);
        assert!(violations.is_empty(), "{:?}", violations);
        assert_eq!(specs[0].timeout, 10);
        assert_eq!(specs[1].timeout, 20);
        assert_eq!(specs[2].timeout, 30);
    }

    #[test]
    fn collection_fields_union_across_layers() {
        let doc = doc_from(json!({
            "defaults": {"http": {"tags": ["env:prod"]}},
            "templates": {"web": {"tags": ["team:core", "env:prod"]}},
            "healthchecks": [
                {"name": "a", "type": "http", "url": "https://a", "template": "web",
                 "tags": ["service:api"]}
            ]
        }));

        let (specs, violations) = normalize(&doc);
        assert!(violations.is_empty(), "{:?}", violations);
        assert_eq!(specs[0].tags, vec!["env:prod", "team:core", "service:api"]);
    }

    #[test]
    fn unresolved_variable_names_field_and_check() {
        let doc = doc_from(json!({
            "healthchecks": [
                {"name": "a", "type": "http", "url": "https://api.example.com/{{PATH}}"}
            ]
        }));

        let (specs, violations) = normalize(&doc);
        assert!(specs.is_empty());
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].check, "a");
        assert_eq!(violations[0].field, "url");
        assert!(violations[0].message.contains("PATH"));
    }

    #[test]
    fn variables_resolve_from_explicit_block() {
        let doc = doc_from(json!({
            "variables": {"PATH": "health"},
            "healthchecks": [
                {"name": "a", "type": "http", "url": "https://api.example.com/{{PATH}}"}
            ]
        }));

        let (specs, violations) = normalize(&doc);
        assert!(violations.is_empty(), "{:?}", violations);
        match &specs[0].kind {
            CheckKind::Http(h) => assert_eq!(h.url, "https://api.example.com/health"),
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn step_placeholders_survive_substitution() {
        let doc = doc_from(json!({
            "healthchecks": [
                {"name": "a", "type": "http", "url": "https://a", "steps": [
                    {"name": "login", "url": "https://a/login",
                     "extract": {"token": "$.access_token"}},
                    {"name": "me", "url": "https://a/me",
                     "headers": {"Authorization": "Bearer {{steps.login.token}}"}}
                ]}
            ]
        }));

        let (specs, violations) = normalize(&doc);
        assert!(violations.is_empty(), "{:?}", violations);
        match &specs[0].kind {
            CheckKind::Http(h) => assert_eq!(
                h.steps[1].headers["Authorization"],
                "Bearer {{steps.login.token}}"
            ),
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn multi_record_dns_expands_into_sub_checks() {
        let doc = doc_from(json!({
            "healthchecks": [
                {"name": "zone", "type": "dns", "hostname": "example.com",
                 "tags": ["dns"],
                 "records": [
                    {"record_type": "A", "expected_values": ["192.0.2.1"]},
                    {"record_type": "TXT", "expected_values": ["v=spf1"]}
                 ]}
            ]
        }));

        let (specs, violations) = normalize(&doc);
        assert!(violations.is_empty(), "{:?}", violations);
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "zone-a");
        assert_eq!(specs[1].name, "zone-txt");
        assert_eq!(specs[0].parent.as_deref(), Some("zone"));
        assert_eq!(specs[1].tags, vec!["dns"]);
        match &specs[1].kind {
            CheckKind::Dns(d) => {
                assert_eq!(d.record_type, "TXT");
                assert_eq!(d.expected_values, vec!["v=spf1"]);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn illegal_field_for_type_is_rejected() {
        let doc = doc_from(json!({
            "healthchecks": [
                {"name": "a", "type": "tcp", "hostname": "db.internal", "port": 5432,
                 "url": "https://nope"}
            ]
        }));

        let (specs, violations) = normalize(&doc);
        assert!(specs.is_empty());
        assert_eq!(violations[0].field, "url");
    }
}
