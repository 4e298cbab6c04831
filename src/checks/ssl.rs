//! SSL/TLS check execution.
//!
//! Evaluates the negotiated session reported by the TLS capability:
//! certificate expiry against thresholds, key strength, allowed protocol
//! versions and cipher suite rules. A forbidden cipher observed is an
//! immediate failure regardless of every other criterion.

use std::time::Duration;

use crate::checks::aggregate::fold_units;
use crate::checks::outcome::{Outcome, OutcomeMetrics, UnitResult};
use crate::checks::probe::Probes;
use crate::config::schema::{CheckSpec, SslSpec};
use crate::resilience::retry::run_probe;

pub(crate) async fn run(spec: &CheckSpec, ssl: &SslSpec, probes: &Probes) -> Outcome {
    let timeout = Duration::from_secs(spec.timeout);
    let session = match run_probe(&spec.retry, || {
        probes.tls.inspect(&ssl.hostname, ssl.port, timeout)
    })
    .await
    {
        Ok(session) => session,
        Err(error) => {
            tracing::warn!(
                check = %spec.name,
                hostname = %ssl.hostname,
                error = %error,
                "TLS inspection failed"
            );
            return Outcome::error(&spec.name, error.to_string());
        }
    };

    let mut units = Vec::new();

    if ssl.cipher_suites.forbidden.contains(&session.cipher_suite) {
        units.push(UnitResult::fail(
            "cipher",
            format!("forbidden cipher suite {} negotiated", session.cipher_suite),
        ));
    } else if !ssl.cipher_suites.required.is_empty()
        && !ssl.cipher_suites.required.contains(&session.cipher_suite)
    {
        units.push(UnitResult::fail(
            "cipher",
            format!(
                "negotiated cipher {} is not in the required set",
                session.cipher_suite
            ),
        ));
    } else {
        units.push(UnitResult::pass(
            "cipher",
            format!("negotiated {}", session.cipher_suite),
        ));
    }

    if !ssl.protocols.is_empty() && !ssl.protocols.contains(&session.protocol) {
        units.push(UnitResult::fail(
            "protocol",
            format!("negotiated protocol {} is not allowed", session.protocol),
        ));
    } else {
        units.push(UnitResult::pass(
            "protocol",
            format!("negotiated {}", session.protocol),
        ));
    }

    if let Some(minimum) = ssl.minimum_key_strength {
        if session.key_strength_bits < minimum {
            units.push(UnitResult::fail(
                "key_strength",
                format!(
                    "key strength {} bits below minimum {}",
                    session.key_strength_bits, minimum
                ),
            ));
        } else {
            units.push(UnitResult::pass(
                "key_strength",
                format!("{} bits", session.key_strength_bits),
            ));
        }
    }

    let days = session.days_until_expiry;
    if days <= i64::from(ssl.expiry_threshold) {
        units.push(UnitResult::fail(
            "expiry",
            format!(
                "certificate expires in {} days (threshold {})",
                days, ssl.expiry_threshold
            ),
        ));
    } else if ssl
        .warning_threshold
        .map(|warning| days <= i64::from(warning))
        .unwrap_or(false)
    {
        units.push(UnitResult::pass(
            "expiry",
            format!("certificate expires in {} days (warning)", days),
        ));
    } else {
        units.push(UnitResult::pass(
            "expiry",
            format!("certificate expires in {} days", days),
        ));
    }

    Outcome {
        check: spec.name.clone(),
        status: fold_units(&units),
        units,
        metrics: OutcomeMetrics {
            days_remaining: Some(days),
            ..OutcomeMetrics::default()
        },
        message: None,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::outcome::OutcomeStatus;
    use crate::checks::probe::{ProbeError, TlsProbe, TlsSessionInfo};
    use crate::config::schema::{CheckKind, CipherRules, RetryPolicy};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    struct FixedTls(TlsSessionInfo);

    #[async_trait]
    impl TlsProbe for FixedTls {
        async fn inspect(
            &self,
            _hostname: &str,
            _port: u16,
            _timeout: Duration,
        ) -> Result<TlsSessionInfo, ProbeError> {
            Ok(self.0.clone())
        }
    }

    fn ssl_spec(cipher_suites: CipherRules, expiry_threshold: u32) -> CheckSpec {
        CheckSpec {
            name: "cert".to_string(),
            enabled: true,
            tags: Vec::new(),
            locations: vec!["aws:us-east-1".to_string()],
            frequency: 300,
            timeout: 10,
            retry: RetryPolicy {
                count: 0,
                interval: 0,
            },
            monitors: BTreeMap::new(),
            slo: None,
            notes: None,
            parent: None,
            kind: CheckKind::Ssl(SslSpec {
                hostname: "example.com".to_string(),
                port: 443,
                expiry_threshold,
                warning_threshold: None,
                minimum_key_strength: Some(2048),
                protocols: vec!["TLSv1.3".to_string()],
                cipher_suites,
            }),
        }
    }

    fn session(cipher: &str, days: i64) -> TlsSessionInfo {
        TlsSessionInfo {
            protocol: "TLSv1.3".to_string(),
            cipher_suite: cipher.to_string(),
            key_strength_bits: 4096,
            days_until_expiry: days,
        }
    }

    fn run_with(spec: &CheckSpec, tls: TlsSessionInfo) -> impl std::future::Future<Output = Outcome> + '_ {
        let ssl = match &spec.kind {
            CheckKind::Ssl(s) => s.clone(),
            _ => unreachable!(),
        };
        let mut probes = Probes::builtin();
        probes.tls = Arc::new(FixedTls(tls));
        async move { run(spec, &ssl, &probes).await }
    }

    #[tokio::test]
    async fn forbidden_cipher_fails_even_with_valid_expiry() {
        let spec = ssl_spec(
            CipherRules {
                required: Vec::new(),
                forbidden: vec!["TLS_RSA_WITH_RC4_128_SHA".to_string()],
            },
            30,
        );

        let outcome = run_with(&spec, session("TLS_RSA_WITH_RC4_128_SHA", 300)).await;
        assert_eq!(outcome.status, OutcomeStatus::Failure);
        assert!(outcome.units[0].detail.contains("forbidden"));
    }

    #[tokio::test]
    async fn expiry_below_threshold_fails() {
        let spec = ssl_spec(CipherRules::default(), 30);
        let outcome = run_with(&spec, session("TLS_AES_256_GCM_SHA384", 10)).await;
        assert_eq!(outcome.status, OutcomeStatus::Failure);
        assert_eq!(outcome.metrics.days_remaining, Some(10));
    }

    #[tokio::test]
    async fn healthy_session_passes() {
        let spec = ssl_spec(CipherRules::default(), 30);
        let outcome = run_with(&spec, session("TLS_AES_256_GCM_SHA384", 90)).await;
        assert_eq!(outcome.status, OutcomeStatus::Success);
    }
}
