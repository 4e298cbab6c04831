//! DNS check execution.
//!
//! Two modes. Plain resolution queries each configured nameserver (or the
//! system resolver) and requires an exact, order-insensitive match against
//! `expected_values`. Propagation mode (`check_all_servers: true` plus a
//! `propagation` block) queries every nameserver concurrently and passes on
//! an agreement ratio, bounded by a time budget that can never turn a
//! partial answer set into a silent pass.

use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};

use crate::checks::aggregate::{fold_propagation, fold_units, set_match};
use crate::checks::outcome::{Outcome, OutcomeMetrics, OutcomeStatus, UnitResult};
use crate::checks::probe::{DnsQuery, ProbeError, Probes};
use crate::config::schema::{CheckSpec, DnsSpec, PropagationSpec};
use crate::resilience::retry::run_probe;

pub(crate) async fn run(spec: &CheckSpec, dns: &DnsSpec, probes: &Probes) -> Outcome {
    match (&dns.propagation, dns.check_all_servers) {
        (Some(propagation), true) => run_propagation(spec, dns, propagation, probes).await,
        _ => run_plain(spec, dns, probes).await,
    }
}

async fn run_plain(spec: &CheckSpec, dns: &DnsSpec, probes: &Probes) -> Outcome {
    let servers: Vec<Option<String>> = if dns.nameservers.is_empty() {
        vec![None]
    } else {
        dns.nameservers.iter().cloned().map(Some).collect()
    };

    let mut units = Vec::new();
    for server in servers {
        let unit = unit_label(&server);
        let query = DnsQuery {
            hostname: dns.hostname.clone(),
            record_type: dns.record_type.clone(),
            nameserver: server,
            timeout: Duration::from_secs(spec.timeout),
        };

        match run_probe(&spec.retry, || probes.dns.resolve(&query)).await {
            Ok(values) => units.push(judge_answer(&unit, &values, &dns.expected_values)),
            Err(error @ ProbeError::Unsupported(_)) => {
                return Outcome::error(&spec.name, error.to_string());
            }
            Err(error) => {
                tracing::warn!(
                    check = %spec.name,
                    nameserver = %unit,
                    error = %error,
                    "DNS resolution failed"
                );
                return Outcome::error(&spec.name, error.to_string());
            }
        }
    }

    Outcome {
        check: spec.name.clone(),
        status: fold_units(&units),
        units,
        metrics: OutcomeMetrics::default(),
        message: None,
        error: None,
    }
}

/// Query all nameservers concurrently and fold the agreement ratio.
async fn run_propagation(
    spec: &CheckSpec,
    dns: &DnsSpec,
    propagation: &PropagationSpec,
    probes: &Probes,
) -> Outcome {
    let deadline =
        tokio::time::Instant::now() + Duration::from_secs(propagation.max_check_time);
    let queried = dns.nameservers.len();

    let mut in_flight: FuturesUnordered<_> = dns
        .nameservers
        .iter()
        .map(|server| {
            let query = DnsQuery {
                hostname: dns.hostname.clone(),
                record_type: dns.record_type.clone(),
                nameserver: Some(server.clone()),
                timeout: Duration::from_secs(spec.timeout),
            };
            async move {
                let result = run_probe(&spec.retry, || probes.dns.resolve(&query)).await;
                (query.nameserver.clone(), result)
            }
        })
        .collect();

    let mut units = Vec::new();
    let mut agreeing = 0usize;
    let mut timed_out = false;

    loop {
        tokio::select! {
            next = in_flight.next() => match next {
                Some((server, result)) => {
                    let unit = unit_label(&server);
                    match result {
                        Ok(values) => {
                            let judged = judge_answer(&unit, &values, &dns.expected_values);
                            if judged.passed {
                                agreeing += 1;
                            }
                            units.push(judged);
                        }
                        Err(error) => {
                            units.push(UnitResult::fail(unit, error.to_string()));
                        }
                    }
                }
                None => break,
            },
            _ = tokio::time::sleep_until(deadline) => {
                timed_out = true;
                break;
            }
        }
    }

    let verdict = fold_propagation(agreeing, queried, propagation.required_agreement);
    let mut status = verdict.status;

    if timed_out && status != OutcomeStatus::Success {
        status = OutcomeStatus::Failure;
        units.push(UnitResult::fail(
            "propagation",
            format!(
                "time budget of {}s expired with {} of {} nameservers answered",
                propagation.max_check_time,
                units.len(),
                queried
            ),
        ));
    }

    Outcome {
        check: spec.name.clone(),
        status,
        units,
        metrics: OutcomeMetrics {
            agreement_percentage: Some(verdict.agreement_percentage),
            ..OutcomeMetrics::default()
        },
        message: None,
        error: None,
    }
}

fn unit_label(server: &Option<String>) -> String {
    match server {
        Some(server) => format!("ns:{}", server),
        None => "ns:system".to_string(),
    }
}

/// Judge one nameserver's answer against the expected values. Without
/// expectations, any non-empty answer passes.
fn judge_answer(unit: &str, values: &[String], expected: &[String]) -> UnitResult {
    if expected.is_empty() {
        if values.is_empty() {
            UnitResult::fail(unit, "no records returned")
        } else {
            UnitResult::pass(unit, format!("resolved to {}", values.join(", ")))
        }
    } else if set_match(values, expected) {
        UnitResult::pass(unit, format!("resolved to {}", values.join(", ")))
    } else {
        UnitResult::fail(
            unit,
            format!(
                "expected [{}], got [{}]",
                expected.join(", "),
                values.join(", ")
            ),
        )
    }
}
