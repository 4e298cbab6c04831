//! Check execution subsystem.
//!
//! # Data Flow
//! ```text
//! validated CheckSpec
//!     → run_check (dispatch on kind)
//!     → protocol module (http.rs / tcp.rs / dns.rs / ssl.rs)
//!     → probe capability (probe.rs)
//!     → sub-unit results
//!     → aggregate.rs (fold + message render)
//!     → Outcome
//! ```
//!
//! # Design Decisions
//! - Closed dispatch over the kind enum; adding a check type extends the
//!   enum, the validator rule table and this dispatcher together
//! - Probes are injected capabilities; no socket or resolver code here
//! - Transient errors retry per the check's retry policy, assertion
//!   failures never do

pub mod aggregate;
pub mod dns;
pub mod http;
pub mod outcome;
pub mod probe;
pub mod ssl;
pub mod tcp;

use crate::config::schema::{CheckKind, CheckSpec};
use outcome::Outcome;
use probe::Probes;

const DEFAULT_MESSAGE: &str = "{{check.name}} ({{check.type}} {{check.target}}): {{check.status}}";

/// Execute one validated check against the injected probe capabilities.
pub async fn run_check(spec: &CheckSpec, probes: &Probes) -> Outcome {
    tracing::debug!(check = %spec.name, kind = spec.type_name(), "Executing check");

    let mut result = match &spec.kind {
        CheckKind::Http(http_spec) => http::run(spec, http_spec, probes).await,
        CheckKind::Tcp(tcp_spec) => tcp::run(spec, tcp_spec, probes).await,
        CheckKind::Dns(dns_spec) => dns::run(spec, dns_spec, probes).await,
        CheckKind::Ssl(ssl_spec) => ssl::run(spec, ssl_spec, probes).await,
    };

    let context = aggregate::check_context(spec, Some(&result));
    result.message = Some(aggregate::render_message(DEFAULT_MESSAGE, &context));

    tracing::info!(
        check = %spec.name,
        status = ?result.status,
        units = result.units.len(),
        "Check executed"
    );

    result
}
