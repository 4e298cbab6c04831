//! Deployment engine facade.
//!
//! # Data Flow
//! ```text
//! DeployDoc
//!     → resolve (normalize + validate, violations combined)
//!     → state::plan (diff against stored records)
//!     → Applier (deploy)  |  run_check fan-out (local execution)
//!     → RunReport
//! ```
//!
//! # Design Decisions
//! - Violations never abort the run; valid checks proceed while invalid
//!   ones are reported
//! - A name filter suppresses orphan deletion: a partial view of the
//!   desired set must not delete everything else
//! - Probe fan-out respects a global concurrency cap and a run deadline;
//!   checks not started by the deadline are reported as errors, in-flight
//!   ones complete

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::checks::outcome::Outcome;
use crate::checks::probe::Probes;
use crate::checks::run_check;
use crate::config::schema::{CheckSpec, DeployDoc};
use crate::config::{normalize, validate_specs, Violation};
use crate::reconcile::{ActionTaken, Applier, ApplyOptions, CheckReport, RunReport};
use crate::remote::RemoteApi;
use crate::state::store::{ResourceRecord, StateError, StateStore};
use crate::state::{plan, DiffAction};

#[derive(Debug, Clone)]
pub struct DeployerOptions {
    pub apply: ApplyOptions,
    /// Global cap on concurrently executing checks during local runs.
    pub probe_concurrency: usize,
}

impl Default for DeployerOptions {
    fn default() -> Self {
        Self {
            apply: ApplyOptions::default(),
            probe_concurrency: 8,
        }
    }
}

/// Ties the capabilities together: probes, remote API and state store.
pub struct Deployer {
    probes: Probes,
    remote: Arc<dyn RemoteApi>,
    store: Arc<dyn StateStore>,
    options: DeployerOptions,
}

impl Deployer {
    pub fn new(probes: Probes, remote: Arc<dyn RemoteApi>, store: Arc<dyn StateStore>) -> Self {
        Self::with_options(probes, remote, store, DeployerOptions::default())
    }

    pub fn with_options(
        probes: Probes,
        remote: Arc<dyn RemoteApi>,
        store: Arc<dyn StateStore>,
        options: DeployerOptions,
    ) -> Self {
        Self {
            probes,
            remote,
            store,
            options,
        }
    }

    /// Normalize and validate a document. Checks that resolve and validate
    /// cleanly are returned; everything else becomes a violation.
    pub fn resolve(doc: &DeployDoc) -> (Vec<CheckSpec>, Vec<Violation>) {
        let (mut specs, mut violations) = normalize(doc);

        if let Err(mut semantic) = validate_specs(&specs) {
            let rejected: HashSet<String> = semantic.iter().map(|v| v.check.clone()).collect();
            specs.retain(|spec| !rejected.contains(&spec.name));
            violations.append(&mut semantic);
        }

        (specs, violations)
    }

    /// Reconcile the document against the remote platform.
    ///
    /// `filter` restricts the run to one check name (synthetic sub-checks
    /// of that name included). `dry_run` computes and reports the plan
    /// without touching the remote platform or the store.
    pub async fn deploy(
        &self,
        doc: &DeployDoc,
        filter: Option<&str>,
        dry_run: bool,
    ) -> Result<RunReport, StateError> {
        let (mut specs, violations) = Self::resolve(doc);
        if let Some(name) = filter {
            specs.retain(|s| s.name == name || s.parent.as_deref() == Some(name));
        }

        let mut entries = plan(&specs, &*self.store).await?;
        if filter.is_some() {
            // A filtered run sees only part of the desired set; orphan
            // deletion would remove every other stored check.
            entries.retain(|e| e.action != DiffAction::Delete);
        }

        let checks = if dry_run {
            entries
                .iter()
                .map(|e| CheckReport::ok(&e.name, e.action.into()))
                .collect()
        } else {
            let applier = Applier::new(
                Arc::clone(&self.remote),
                Arc::clone(&self.store),
                self.options.apply.clone(),
            );
            applier.apply(entries).await
        };

        Ok(RunReport { violations, checks })
    }

    /// Execute probes locally and report outcomes, leaving remote state
    /// and the store untouched.
    pub async fn run_checks(&self, doc: &DeployDoc, filter: Option<&str>) -> RunReport {
        let (mut specs, violations) = Self::resolve(doc);
        if let Some(name) = filter {
            specs.retain(|s| s.name == name || s.parent.as_deref() == Some(name));
        }

        let deadline = tokio::time::Instant::now() + run_budget(&specs);
        let semaphore = Arc::new(Semaphore::new(self.options.probe_concurrency));

        let mut handles = Vec::with_capacity(specs.len());
        for spec in specs {
            if !spec.enabled {
                handles.push((spec.name.clone(), None));
                continue;
            }
            let probes = self.probes.clone();
            let semaphore = Arc::clone(&semaphore);
            let name = spec.name.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                if tokio::time::Instant::now() >= deadline {
                    return Outcome::error(&spec.name, "run deadline exceeded before probe started");
                }
                run_check(&spec, &probes).await
            });
            handles.push((name, Some(handle)));
        }

        let mut checks = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            match handle {
                None => {
                    checks.push(CheckReport {
                        name,
                        action: ActionTaken::Noop,
                        outcome: None,
                        error: None,
                    });
                }
                Some(handle) => match handle.await {
                    Ok(outcome) => checks.push(CheckReport {
                        name,
                        action: ActionTaken::Noop,
                        outcome: Some(outcome),
                        error: None,
                    }),
                    Err(join_error) => {
                        tracing::error!(check = %name, error = %join_error, "Probe task panicked");
                        checks.push(CheckReport::failed(name, ActionTaken::Noop, "probe task panicked"));
                    }
                },
            }
        }

        RunReport { violations, checks }
    }

    /// Delete one check and its dependents from the platform and the
    /// store. `keep_monitors` leaves derived monitors and SLOs in place.
    pub async fn delete(&self, name: &str, keep_monitors: bool) -> Result<CheckReport, StateError> {
        let record = match self.store.get(name).await? {
            Some(record) => record,
            None => {
                return Ok(CheckReport::failed(
                    name,
                    ActionTaken::Delete,
                    "no stored record for this check",
                ))
            }
        };

        let record = if keep_monitors {
            ResourceRecord {
                monitor_ids: Default::default(),
                slo_id: None,
                ..record
            }
        } else {
            record
        };

        let applier = Applier::new(
            Arc::clone(&self.remote),
            Arc::clone(&self.store),
            self.options.apply.clone(),
        );
        let entry = crate::state::PlanEntry {
            name: name.to_string(),
            action: DiffAction::Delete,
            spec: None,
            record: Some(record),
            new_hash: None,
        };
        let mut reports = applier.apply(vec![entry]).await;
        Ok(reports.remove(0))
    }

    /// Stored records, for listing and filtering by the CLI.
    pub async fn list(&self) -> Result<Vec<(String, ResourceRecord)>, StateError> {
        let mut out = Vec::new();
        let mut names = self.store.names().await?;
        names.sort();
        for name in names {
            if let Some(record) = self.store.get(&name).await? {
                out.push((name, record));
            }
        }
        Ok(out)
    }
}

/// Overall probe budget: every check's worst case (attempts times timeout
/// plus retry spacing) under the concurrency cap, plus a fixed margin.
fn run_budget(specs: &[CheckSpec]) -> Duration {
    let total: u64 = specs
        .iter()
        .map(|s| s.timeout * u64::from(s.retry.count + 1) + s.retry.interval * u64::from(s.retry.count))
        .sum();
    Duration::from_secs(total + 30)
}
