//! Probe execution tests: HTTP step chains against a mock server, and the
//! transient-retry boundary.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use healthcheck_deployer::checks::outcome::OutcomeStatus;
use healthcheck_deployer::checks::probe::{
    HttpProbe, HttpProbeRequest, HttpProbeResponse, ProbeError, Probes, ReqwestHttpProbe,
};
use healthcheck_deployer::checks::run_check;
use healthcheck_deployer::engine::Deployer;
use healthcheck_deployer::state::MemoryStateStore;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;
use common::{doc, ScriptedRemote};

fn deployer() -> Deployer {
    Deployer::new(
        Probes::builtin(),
        Arc::new(ScriptedRemote::new()),
        Arc::new(MemoryStateStore::new()),
    )
}

#[tokio::test]
async fn step_chain_substitutes_extracted_values() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok-123"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    // Only matches when the extracted token was substituted verbatim.
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("Authorization", "Bearer tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let document = doc(json!({
        "healthchecks": [
            {"name": "session-flow", "type": "http", "locations": ["aws:us-east-1"],
             "retry": {"count": 0, "interval": 0},
             "steps": [
                {"name": "Authentication", "url": format!("{}/login", server.uri()),
                 "method": "POST",
                 "extract": {"token": "$.access_token"},
                 "success_criteria": [{"status_code": 200}]},
                {"name": "Profile", "url": format!("{}/me", server.uri()),
                 "headers": {"Authorization": "Bearer {{steps.Authentication.token}}"},
                 "success_criteria": [
                    {"status_code": 200},
                    {"content": {"type": "json", "path": "$.status", "value": "ok"}}
                 ]}
             ]}
        ]
    }));

    let report = deployer().run_checks(&document, None).await;
    assert!(report.violations.is_empty(), "{:?}", report.violations);

    let outcome = report.checks[0].outcome.as_ref().unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Success, "{:?}", outcome);
    assert_eq!(outcome.units.len(), 2);
}

#[tokio::test]
async fn failing_step_skips_the_rest_of_the_chain() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/first"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    // Must never be reached once the first step fails.
    Mock::given(method("GET"))
        .and(path("/second"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let document = doc(json!({
        "healthchecks": [
            {"name": "chain", "type": "http", "locations": ["aws:us-east-1"],
             "retry": {"count": 0, "interval": 0},
             "steps": [
                {"name": "first", "url": format!("{}/first", server.uri()),
                 "success_criteria": [{"status_code": 200}]},
                {"name": "second", "url": format!("{}/second", server.uri())}
             ]}
        ]
    }));

    let report = deployer().run_checks(&document, None).await;
    let outcome = report.checks[0].outcome.as_ref().unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Failure);
    assert_eq!(outcome.units.len(), 1);
    assert_eq!(outcome.units[0].unit, "step:first");
    assert!(outcome.units[0].detail.contains("500"));
}

/// Fails with a transient network error a fixed number of times, then
/// delegates to the real probe.
struct FlakyHttpProbe {
    failures: AtomicU32,
    inner: ReqwestHttpProbe,
}

#[async_trait]
impl HttpProbe for FlakyHttpProbe {
    async fn send(&self, request: &HttpProbeRequest) -> Result<HttpProbeResponse, ProbeError> {
        if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            if n > 0 {
                Some(n - 1)
            } else {
                None
            }
        }).is_ok()
        {
            return Err(ProbeError::Network("connection reset by peer".to_string()));
        }
        self.inner.send(request).await
    }
}

#[tokio::test]
async fn two_transient_failures_then_success_is_reported_as_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let document = doc(json!({
        "healthchecks": [
            {"name": "flaky", "type": "http", "locations": ["aws:us-east-1"],
             "url": format!("{}/health", server.uri()),
             "retry": {"count": 2, "interval": 0},
             "success_criteria": [{"status_code": 200}]}
        ]
    }));
    let (specs, violations) = Deployer::resolve(&document);
    assert!(violations.is_empty(), "{:?}", violations);

    let mut probes = Probes::builtin();
    probes.http = Arc::new(FlakyHttpProbe {
        failures: AtomicU32::new(2),
        inner: ReqwestHttpProbe,
    });

    let outcome = run_check(&specs[0], &probes).await;
    assert_eq!(outcome.status, OutcomeStatus::Success, "{:?}", outcome);
    // No assertion failure was recorded along the way.
    assert!(outcome.units.iter().all(|u| u.passed));
}

#[tokio::test]
async fn retries_exhausted_surface_as_probe_error() {
    let document = doc(json!({
        "healthchecks": [
            {"name": "down", "type": "http", "locations": ["aws:us-east-1"],
             "url": "http://127.0.0.1:9/health",
             "retry": {"count": 1, "interval": 0},
             "timeout": 1}
        ]
    }));
    let (specs, violations) = Deployer::resolve(&document);
    assert!(violations.is_empty(), "{:?}", violations);

    let outcome = run_check(&specs[0], &Probes::builtin()).await;
    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert!(outcome.error.is_some());
}
