//! Desired-state vs stored-state diffing.
//!
//! The correctness-critical property of the whole tool lives here:
//! re-running against unmodified input must classify every check as
//! Unchanged and perform zero remote calls.

use std::collections::HashSet;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::schema::CheckSpec;
use crate::state::store::{ResourceRecord, StateError, StateStore};

/// Content hash over the semantically relevant fields of a normalized
/// spec. `notes` is cosmetic and excluded, so editing it never triggers
/// an Update. serde_json maps serialize with sorted keys, which makes the
/// encoding canonical.
pub fn content_hash(spec: &CheckSpec) -> String {
    let mut value = serde_json::to_value(spec).expect("CheckSpec serializes to JSON");
    if let Some(map) = value.as_object_mut() {
        map.remove("notes");
    }
    let canonical = value.to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffAction {
    Create,
    Update,
    Unchanged,
    Delete,
}

/// One planned operation: a desired spec with its classification, or an
/// orphaned record scheduled for deletion.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub name: String,
    pub action: DiffAction,
    pub spec: Option<CheckSpec>,
    pub record: Option<ResourceRecord>,
    pub new_hash: Option<String>,
}

/// Classify every desired spec and every orphaned record.
///
/// Desired specs keep their declaration order; orphan deletions follow.
pub async fn plan(
    specs: &[CheckSpec],
    store: &dyn StateStore,
) -> Result<Vec<PlanEntry>, StateError> {
    let mut entries = Vec::with_capacity(specs.len());
    let desired: HashSet<&str> = specs.iter().map(|s| s.name.as_str()).collect();

    for spec in specs {
        let record = store.get(&spec.name).await?;
        let hash = content_hash(spec);
        let action = match &record {
            None => DiffAction::Create,
            Some(record) if record.content_hash == hash => DiffAction::Unchanged,
            Some(_) => DiffAction::Update,
        };
        entries.push(PlanEntry {
            name: spec.name.clone(),
            action,
            spec: Some(spec.clone()),
            record,
            new_hash: Some(hash),
        });
    }

    let mut orphans: Vec<String> = store
        .names()
        .await?
        .into_iter()
        .filter(|name| !desired.contains(name.as_str()))
        .collect();
    orphans.sort();

    for name in orphans {
        let record = store.get(&name).await?;
        entries.push(PlanEntry {
            name,
            action: DiffAction::Delete,
            spec: None,
            record,
            new_hash: None,
        });
    }

    let creates = entries.iter().filter(|e| e.action == DiffAction::Create).count();
    let updates = entries.iter().filter(|e| e.action == DiffAction::Update).count();
    let deletes = entries.iter().filter(|e| e.action == DiffAction::Delete).count();
    tracing::info!(creates, updates, deletes, total = entries.len(), "Plan computed");

    Ok(entries)
}
