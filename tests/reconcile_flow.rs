//! Reconciliation flow tests: idempotence, dependent replacement, orphan
//! removal ordering, partial-failure isolation and remote retry policy.

use std::sync::Arc;

use healthcheck_deployer::engine::{Deployer, DeployerOptions};
use healthcheck_deployer::checks::probe::Probes;
use healthcheck_deployer::reconcile::ActionTaken;
use healthcheck_deployer::remote::{RemoteError, ResourceKind};
use healthcheck_deployer::state::{MemoryStateStore, StateStore};
use serde_json::json;

mod common;
use common::{doc, ScriptedRemote};

fn deployer_with(remote: Arc<ScriptedRemote>, store: Arc<MemoryStateStore>) -> Deployer {
    let mut options = DeployerOptions::default();
    options.apply.backoff_base_ms = 1;
    options.apply.backoff_max_ms = 2;
    Deployer::with_options(Probes::builtin(), remote, store, options)
}

fn two_check_doc(api_url: &str) -> healthcheck_deployer::config::DeployDoc {
    doc(json!({
        "healthchecks": [
            {"name": "api", "type": "http", "url": api_url,
             "locations": ["aws:us-east-1"],
             "monitors": {"availability": {"enabled": true, "threshold": 99.9,
                                           "message": "{{check.name}} is down"}},
             "slo": {"target": 99.9, "window": "30d"}},
            {"name": "db", "type": "tcp", "hostname": "db.internal", "port": 5432,
             "locations": ["aws:us-east-1"]}
        ]
    }))
}

#[tokio::test]
async fn deploy_creates_checks_with_dependents() {
    let remote = Arc::new(ScriptedRemote::new());
    let store = Arc::new(MemoryStateStore::new());
    let deployer = deployer_with(Arc::clone(&remote), Arc::clone(&store));

    let report = deployer
        .deploy(&two_check_doc("https://api.example.com"), None, false)
        .await
        .unwrap();

    assert!(report.success(), "{:?}", report);
    assert!(report.checks.iter().all(|c| c.action == ActionTaken::Create));
    assert_eq!(remote.resource_count(ResourceKind::Check), 2);
    assert_eq!(remote.resource_count(ResourceKind::Monitor), 1);
    assert_eq!(remote.resource_count(ResourceKind::Slo), 1);

    let record = store.get("api").await.unwrap().unwrap();
    assert!(record.monitor_ids.contains_key("availability"));
    assert!(record.slo_id.is_some());

    // Check goes first, then its dependents.
    let calls = remote.calls();
    let check_pos = calls.iter().position(|c| c == "create:checks:api").unwrap();
    let monitor_pos = calls
        .iter()
        .position(|c| c.starts_with("create:monitors"))
        .unwrap();
    let slo_pos = calls.iter().position(|c| c.starts_with("create:slos")).unwrap();
    assert!(check_pos < monitor_pos && monitor_pos < slo_pos);
}

#[tokio::test]
async fn second_apply_of_unchanged_input_makes_zero_remote_calls() {
    let remote = Arc::new(ScriptedRemote::new());
    let store = Arc::new(MemoryStateStore::new());
    let deployer = deployer_with(Arc::clone(&remote), Arc::clone(&store));
    let document = two_check_doc("https://api.example.com");

    deployer.deploy(&document, None, false).await.unwrap();
    remote.reset_calls();

    let report = deployer.deploy(&document, None, false).await.unwrap();
    assert!(report.checks.iter().all(|c| c.action == ActionTaken::Noop));
    assert!(remote.calls().is_empty(), "{:?}", remote.calls());
}

#[tokio::test]
async fn semantic_change_updates_check_and_replaces_dependents() {
    let remote = Arc::new(ScriptedRemote::new());
    let store = Arc::new(MemoryStateStore::new());
    let deployer = deployer_with(Arc::clone(&remote), Arc::clone(&store));

    deployer
        .deploy(&two_check_doc("https://api.example.com"), None, false)
        .await
        .unwrap();
    let old_record = store.get("api").await.unwrap().unwrap();
    remote.reset_calls();

    let report = deployer
        .deploy(&two_check_doc("https://api.example.com/v2"), None, false)
        .await
        .unwrap();

    let api = report.checks.iter().find(|c| c.name == "api").unwrap();
    assert_eq!(api.action, ActionTaken::Update);
    let db = report.checks.iter().find(|c| c.name == "db").unwrap();
    assert_eq!(db.action, ActionTaken::Noop);

    let calls = remote.calls();
    let update_pos = calls
        .iter()
        .position(|c| c.starts_with("update:checks"))
        .unwrap();
    let old_monitor_delete = calls
        .iter()
        .position(|c| c.starts_with("delete:monitors"))
        .unwrap();
    let new_monitor_create = calls
        .iter()
        .position(|c| c.starts_with("create:monitors"))
        .unwrap();
    assert!(update_pos < old_monitor_delete && old_monitor_delete < new_monitor_create);

    let record = store.get("api").await.unwrap().unwrap();
    assert_eq!(record.remote_id, old_record.remote_id);
    assert_ne!(record.content_hash, old_record.content_hash);
    assert_ne!(record.monitor_ids, old_record.monitor_ids);
}

#[tokio::test]
async fn removed_check_is_deleted_dependents_first() {
    let remote = Arc::new(ScriptedRemote::new());
    let store = Arc::new(MemoryStateStore::new());
    let deployer = deployer_with(Arc::clone(&remote), Arc::clone(&store));

    deployer
        .deploy(&two_check_doc("https://api.example.com"), None, false)
        .await
        .unwrap();
    let api_record = store.get("api").await.unwrap().unwrap();
    remote.reset_calls();

    let empty = doc(json!({"healthchecks": []}));
    let report = deployer.deploy(&empty, None, false).await.unwrap();
    assert!(report.success(), "{:?}", report);
    assert!(report.checks.iter().all(|c| c.action == ActionTaken::Delete));

    // SLO, then monitors, then the owning check.
    let calls = remote.calls();
    let position = |call: String| calls.iter().position(|c| *c == call).unwrap();
    let slo_pos = position(format!(
        "delete:slos:{}",
        api_record.slo_id.as_ref().unwrap()
    ));
    let monitor_pos = position(format!(
        "delete:monitors:{}",
        api_record.monitor_ids["availability"]
    ));
    let check_pos = position(format!("delete:checks:{}", api_record.remote_id));
    assert!(slo_pos < monitor_pos && monitor_pos < check_pos);

    assert_eq!(store.get("api").await.unwrap(), None);
    assert_eq!(store.get("db").await.unwrap(), None);
    assert_eq!(remote.resource_count(ResourceKind::Check), 0);
}

#[tokio::test]
async fn permanent_failure_aborts_one_check_not_the_batch() {
    let remote = Arc::new(ScriptedRemote::new());
    let store = Arc::new(MemoryStateStore::new());
    let deployer = deployer_with(Arc::clone(&remote), Arc::clone(&store));

    remote.fail(
        "create:checks:api",
        RemoteError::Permanent("status 422".to_string()),
    );

    let document = two_check_doc("https://api.example.com");
    let report = deployer.deploy(&document, None, false).await.unwrap();

    assert!(!report.success());
    let api = report.checks.iter().find(|c| c.name == "api").unwrap();
    assert!(api.error.as_ref().unwrap().contains("422"));
    let db = report.checks.iter().find(|c| c.name == "db").unwrap();
    assert!(db.error.is_none());

    // Failed check left no record; the next run reattempts exactly it.
    assert_eq!(store.get("api").await.unwrap(), None);
    assert!(store.get("db").await.unwrap().is_some());
    remote.reset_calls();

    let report = deployer.deploy(&document, None, false).await.unwrap();
    assert!(report.success(), "{:?}", report);
    assert_eq!(remote.call_count("create:checks:api"), 1);
    assert_eq!(remote.call_count("create:checks:db"), 0);
}

#[tokio::test]
async fn transient_remote_failures_are_retried_with_backoff() {
    let remote = Arc::new(ScriptedRemote::new());
    let store = Arc::new(MemoryStateStore::new());
    let deployer = deployer_with(Arc::clone(&remote), Arc::clone(&store));

    remote.fail(
        "create:checks:api",
        RemoteError::Transient("status 503".to_string()),
    );
    remote.fail(
        "create:checks:api",
        RemoteError::Transient("status 503".to_string()),
    );

    let document = doc(json!({
        "healthchecks": [
            {"name": "api", "type": "http", "url": "https://api.example.com",
             "locations": ["aws:us-east-1"]}
        ]
    }));
    let report = deployer.deploy(&document, None, false).await.unwrap();

    assert!(report.success(), "{:?}", report);
    assert_eq!(remote.call_count("create:checks:api"), 3);
    assert!(store.get("api").await.unwrap().is_some());
}

#[tokio::test]
async fn dry_run_reports_the_plan_without_remote_calls() {
    let remote = Arc::new(ScriptedRemote::new());
    let store = Arc::new(MemoryStateStore::new());
    let deployer = deployer_with(Arc::clone(&remote), Arc::clone(&store));

    let report = deployer
        .deploy(&two_check_doc("https://api.example.com"), None, true)
        .await
        .unwrap();

    assert!(report.checks.iter().all(|c| c.action == ActionTaken::Create));
    assert!(remote.calls().is_empty());
    assert_eq!(store.get("api").await.unwrap(), None);
}

#[tokio::test]
async fn filtered_deploy_never_deletes_unlisted_checks() {
    let remote = Arc::new(ScriptedRemote::new());
    let store = Arc::new(MemoryStateStore::new());
    let deployer = deployer_with(Arc::clone(&remote), Arc::clone(&store));

    deployer
        .deploy(&two_check_doc("https://api.example.com"), None, false)
        .await
        .unwrap();
    remote.reset_calls();

    // Reconcile only "api"; "db" stays deployed even though the filtered
    // view does not contain it.
    let report = deployer
        .deploy(
            &two_check_doc("https://api.example.com/v2"),
            Some("api"),
            false,
        )
        .await
        .unwrap();

    assert_eq!(report.checks.len(), 1);
    assert_eq!(report.checks[0].action, ActionTaken::Update);
    assert_eq!(remote.call_count("delete:checks"), 0);
    assert!(store.get("db").await.unwrap().is_some());
}

#[tokio::test]
async fn delete_command_can_keep_monitors() {
    let remote = Arc::new(ScriptedRemote::new());
    let store = Arc::new(MemoryStateStore::new());
    let deployer = deployer_with(Arc::clone(&remote), Arc::clone(&store));

    deployer
        .deploy(&two_check_doc("https://api.example.com"), None, false)
        .await
        .unwrap();
    remote.reset_calls();

    let report = deployer.delete("api", true).await.unwrap();
    assert!(report.error.is_none(), "{:?}", report);

    assert_eq!(remote.call_count("delete:monitors"), 0);
    assert_eq!(remote.call_count("delete:slos"), 0);
    assert_eq!(remote.call_count("delete:checks"), 1);
    assert_eq!(remote.resource_count(ResourceKind::Monitor), 1);
    assert_eq!(store.get("api").await.unwrap(), None);
}
