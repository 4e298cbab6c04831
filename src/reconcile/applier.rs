//! Plan execution against the remote platform.
//!
//! # Ordering
//! ```text
//! Create:  check → monitors → SLO
//! Update:  update check → delete stale dependents → recreate dependents
//! Delete:  SLO → monitors → check
//! ```
//!
//! # Design Decisions
//! - Different checks reconcile in parallel under a concurrency cap;
//!   operations within one check serialize
//! - The stored record is rewritten only after every operation for that
//!   check succeeded; any failure leaves the prior record untouched so the
//!   next run reattempts exactly the failed items
//! - A permanent remote error aborts only the affected check, never the
//!   batch
//! - Entries that have not started when the run deadline passes are
//!   reported as errors; entries already in flight run to completion

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::config::schema::CheckSpec;
use crate::reconcile::payload::{check_payload, monitor_payload, slo_payload};
use crate::reconcile::report::{ActionTaken, CheckReport};
use crate::remote::{RemoteApi, RemoteError, ResourceKind};
use crate::resilience::backoff::calculate_backoff;
use crate::state::differ::{DiffAction, PlanEntry};
use crate::state::store::{ResourceRecord, StateStore};

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Attempts per remote call, including the first.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Checks reconciling concurrently.
    pub concurrency: usize,
    /// Overall run deadline; unset means unbounded.
    pub deadline: Option<Duration>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 250,
            backoff_max_ms: 5_000,
            concurrency: 4,
            deadline: None,
        }
    }
}

/// Executes a diff plan against the remote capability and the state store.
#[derive(Clone)]
pub struct Applier {
    remote: Arc<dyn RemoteApi>,
    store: Arc<dyn StateStore>,
    options: ApplyOptions,
}

impl Applier {
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        store: Arc<dyn StateStore>,
        options: ApplyOptions,
    ) -> Self {
        Self {
            remote,
            store,
            options,
        }
    }

    /// Apply every plan entry, isolating failures per check. Reports come
    /// back in plan order.
    pub async fn apply(&self, plan: Vec<PlanEntry>) -> Vec<CheckReport> {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));
        let deadline = self
            .options
            .deadline
            .map(|d| tokio::time::Instant::now() + d);

        let mut handles = Vec::with_capacity(plan.len());
        for entry in plan {
            let applier = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let name = entry.name.clone();
            let action = entry.action;

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                if let Some(deadline) = deadline {
                    if tokio::time::Instant::now() >= deadline {
                        return CheckReport::failed(
                            entry.name,
                            entry.action.into(),
                            "run deadline exceeded before apply started",
                        );
                    }
                }
                applier.apply_entry(entry).await
            });
            handles.push((name, action, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (name, action, handle) in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(join_error) => {
                    tracing::error!(check = %name, error = %join_error, "Apply task panicked");
                    reports.push(CheckReport::failed(name, action.into(), "apply task panicked"));
                }
            }
        }
        reports
    }

    async fn apply_entry(&self, entry: PlanEntry) -> CheckReport {
        // Per-name exclusivity: two runs must not race on one check.
        let _guard = self.store.lock(&entry.name).await;

        let result = match entry.action {
            DiffAction::Unchanged => {
                tracing::debug!(check = %entry.name, "Unchanged, no remote calls");
                return CheckReport::ok(entry.name, ActionTaken::Noop);
            }
            DiffAction::Create => self.create(&entry).await,
            DiffAction::Update => self.update(&entry).await,
            DiffAction::Delete => self.remove(&entry).await,
        };

        match result {
            Ok(report) => report,
            Err(error) => {
                tracing::error!(
                    check = %entry.name,
                    action = ?entry.action,
                    error = %error,
                    "Reconciliation failed, stored record untouched"
                );
                CheckReport::failed(entry.name, entry.action.into(), error)
            }
        }
    }

    async fn create(&self, entry: &PlanEntry) -> Result<CheckReport, String> {
        let spec = entry.spec.as_ref().ok_or("plan entry carries no spec")?;
        let hash = entry.new_hash.clone().ok_or("plan entry carries no hash")?;

        let payload = check_payload(spec);
        let check_id = self
            .with_retries(&spec.name, "create check", || {
                self.remote.create(ResourceKind::Check, &payload)
            })
            .await
            .map_err(|e| e.to_string())?;

        let (monitor_ids, slo_id) = self.create_dependents(spec).await?;

        self.store
            .put(
                &spec.name,
                ResourceRecord {
                    remote_id: check_id,
                    content_hash: hash,
                    monitor_ids,
                    slo_id,
                },
            )
            .await
            .map_err(|e| e.to_string())?;

        tracing::info!(check = %spec.name, "Check created");
        Ok(CheckReport::ok(&spec.name, ActionTaken::Create))
    }

    async fn update(&self, entry: &PlanEntry) -> Result<CheckReport, String> {
        let spec = entry.spec.as_ref().ok_or("plan entry carries no spec")?;
        let record = entry.record.as_ref().ok_or("plan entry carries no record")?;
        let hash = entry.new_hash.clone().ok_or("plan entry carries no hash")?;

        let payload = check_payload(spec);
        self.with_retries(&spec.name, "update check", || {
            self.remote.update(ResourceKind::Check, &record.remote_id, &payload)
        })
        .await
        .map_err(|e| e.to_string())?;

        // Dependents are replaced wholesale, never patched.
        if let Some(slo_id) = &record.slo_id {
            self.delete_dependent(&spec.name, ResourceKind::Slo, slo_id)
                .await?;
        }
        for monitor_id in record.monitor_ids.values() {
            self.delete_dependent(&spec.name, ResourceKind::Monitor, monitor_id)
                .await?;
        }
        let (monitor_ids, slo_id) = self.create_dependents(spec).await?;

        self.store
            .put(
                &spec.name,
                ResourceRecord {
                    remote_id: record.remote_id.clone(),
                    content_hash: hash,
                    monitor_ids,
                    slo_id,
                },
            )
            .await
            .map_err(|e| e.to_string())?;

        tracing::info!(check = %spec.name, "Check updated");
        Ok(CheckReport::ok(&spec.name, ActionTaken::Update))
    }

    async fn remove(&self, entry: &PlanEntry) -> Result<CheckReport, String> {
        if let Some(record) = &entry.record {
            // Dependents go first, then the owning check.
            if let Some(slo_id) = &record.slo_id {
                self.delete_dependent(&entry.name, ResourceKind::Slo, slo_id)
                    .await?;
            }
            for monitor_id in record.monitor_ids.values() {
                self.delete_dependent(&entry.name, ResourceKind::Monitor, monitor_id)
                    .await?;
            }
            self.with_retries(&entry.name, "delete check", || {
                self.remote.delete(ResourceKind::Check, &record.remote_id)
            })
            .await
            .map_err(|e| e.to_string())?;
        }

        self.store
            .delete(&entry.name)
            .await
            .map_err(|e| e.to_string())?;

        tracing::info!(check = %entry.name, "Orphaned check deleted");
        Ok(CheckReport::ok(&entry.name, ActionTaken::Delete))
    }

    async fn create_dependents(
        &self,
        spec: &CheckSpec,
    ) -> Result<(BTreeMap<String, String>, Option<String>), String> {
        let mut monitor_ids = BTreeMap::new();
        for (kind, monitor) in &spec.monitors {
            if !monitor.enabled {
                continue;
            }
            let payload = monitor_payload(spec, kind, monitor);
            let id = self
                .with_retries(&spec.name, "create monitor", || {
                    self.remote.create(ResourceKind::Monitor, &payload)
                })
                .await
                .map_err(|e| e.to_string())?;
            monitor_ids.insert(kind.clone(), id);
        }

        let mut slo_id = None;
        if let Some(slo) = &spec.slo {
            let payload = slo_payload(spec, slo);
            let id = self
                .with_retries(&spec.name, "create slo", || {
                    self.remote.create(ResourceKind::Slo, &payload)
                })
                .await
                .map_err(|e| e.to_string())?;
            slo_id = Some(id);
        }

        Ok((monitor_ids, slo_id))
    }

    /// Delete a derived resource. A dependent that is already gone is
    /// treated as deleted; drift on dependents must not wedge the check.
    async fn delete_dependent(
        &self,
        check: &str,
        kind: ResourceKind,
        id: &str,
    ) -> Result<(), String> {
        match self
            .with_retries(check, "delete dependent", || self.remote.delete(kind, id))
            .await
        {
            Ok(()) => Ok(()),
            Err(RemoteError::NotFound) => {
                tracing::warn!(check, kind = ?kind, id, "Dependent already gone");
                Ok(())
            }
            Err(error) => Err(error.to_string()),
        }
    }

    /// Bounded retries with exponential backoff on transient remote
    /// failures. Permanent failures return immediately.
    async fn with_retries<T, F, Fut>(
        &self,
        check: &str,
        operation: &str,
        mut call: F,
    ) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 1u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < self.options.max_attempts => {
                    let delay = calculate_backoff(
                        attempt,
                        self.options.backoff_base_ms,
                        self.options.backoff_max_ms,
                    );
                    tracing::warn!(
                        check,
                        operation,
                        attempt,
                        delay = ?delay,
                        error = %error,
                        "Transient remote failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
