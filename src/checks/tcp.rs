//! TCP check execution.
//!
//! Multi-port checks treat every port as an independent sub-probe; the
//! aggregate fails if any port fails. A refused or timed-out connection is
//! the check's subject matter, so after retries it becomes a failing unit
//! rather than a system error.

use std::time::Duration;

use futures_util::future::join_all;

use crate::checks::aggregate::fold_units;
use crate::checks::outcome::{Outcome, OutcomeMetrics, UnitResult};
use crate::checks::probe::{ProbeError, Probes, TcpProbeRequest};
use crate::config::schema::{CheckSpec, TcpSpec};
use crate::resilience::retry::run_probe;

pub(crate) async fn run(spec: &CheckSpec, tcp: &TcpSpec, probes: &Probes) -> Outcome {
    let ports = tcp.effective_ports();

    let probes_of_ports = ports.iter().map(|port| {
        let request = TcpProbeRequest {
            hostname: tcp.hostname.clone(),
            port: *port,
            timeout: Duration::from_secs(spec.timeout),
            send: tcp.send_string.clone(),
            read_reply: tcp.expect_string.is_some(),
        };
        async move {
            let result = run_probe(&spec.retry, || probes.tcp.exchange(&request)).await;
            (request.port, result)
        }
    });

    let mut units = Vec::new();
    let mut metrics = OutcomeMetrics::default();
    let mut capability_error = None;

    for (port, result) in join_all(probes_of_ports).await {
        let unit = format!("port:{}", port);
        match result {
            Ok(reply) => {
                metrics.response_time_ms = Some(
                    metrics
                        .response_time_ms
                        .unwrap_or(0)
                        .max(reply.connect_time_ms),
                );
                match (&tcp.expect_string, &reply.reply) {
                    (Some(expected), Some(received)) => {
                        if received.contains(expected) {
                            units.push(
                                UnitResult::pass(unit, "connected, reply matched")
                                    .timed(reply.connect_time_ms),
                            );
                        } else {
                            units.push(
                                UnitResult::fail(
                                    unit,
                                    format!("reply did not contain \"{}\"", expected),
                                )
                                .timed(reply.connect_time_ms),
                            );
                        }
                    }
                    (Some(expected), None) => {
                        units.push(UnitResult::fail(
                            unit,
                            format!("no reply received, expected \"{}\"", expected),
                        ));
                    }
                    _ => {
                        units.push(
                            UnitResult::pass(unit, "connected").timed(reply.connect_time_ms),
                        );
                    }
                }
            }
            Err(error @ ProbeError::Unsupported(_)) => {
                capability_error = Some(error.to_string());
                break;
            }
            Err(error) => {
                tracing::debug!(
                    check = %spec.name,
                    port,
                    error = %error,
                    "TCP connection failed"
                );
                units.push(UnitResult::fail(unit, error.to_string()));
            }
        }
    }

    if let Some(error) = capability_error {
        return Outcome::error(&spec.name, error);
    }

    Outcome {
        check: spec.name.clone(),
        status: fold_units(&units),
        units,
        metrics,
        message: None,
        error: None,
    }
}
