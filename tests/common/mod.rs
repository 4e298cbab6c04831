//! Shared utilities for integration testing.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use healthcheck_deployer::config::DeployDoc;
use healthcheck_deployer::remote::{RemoteApi, RemoteError, ResourceKind};
use serde_json::Value;

/// Build a document from inline JSON.
#[allow(dead_code)]
pub fn doc(value: Value) -> DeployDoc {
    serde_json::from_value(value).expect("valid document")
}

/// Scriptable in-memory platform double.
///
/// Records every call as "op:kind:name-or-id" and can be told to fail
/// specific operations, most specific key first ("create:checks:api"
/// before "create:checks").
#[derive(Default)]
#[allow(dead_code)]
pub struct ScriptedRemote {
    resources: Mutex<BTreeMap<String, Value>>,
    counter: AtomicU64,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, VecDeque<RemoteError>>>,
}

#[allow(dead_code)]
impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure for the next call matching `key`.
    pub fn fail(&self, key: &str, error: RemoteError) {
        self.failures
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn resource(&self, kind: ResourceKind, id: &str) -> Option<Value> {
        self.resources
            .lock()
            .unwrap()
            .get(&format!("{}/{}", kind.path(), id))
            .cloned()
    }

    pub fn resource_count(&self, kind: ResourceKind) -> usize {
        let prefix = format!("{}/", kind.path());
        self.resources
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn take_failure(&self, specific: &str, generic: &str) -> Option<RemoteError> {
        let mut failures = self.failures.lock().unwrap();
        for key in [specific, generic] {
            if let Some(queue) = failures.get_mut(key) {
                if let Some(error) = queue.pop_front() {
                    return Some(error);
                }
            }
        }
        None
    }
}

#[async_trait]
impl RemoteApi for ScriptedRemote {
    async fn create(&self, kind: ResourceKind, body: &Value) -> Result<String, RemoteError> {
        let name = body["name"].as_str().unwrap_or("?");
        let generic = format!("create:{}", kind.path());
        let specific = format!("{}:{}", generic, name);
        self.record(specific.clone());
        if let Some(error) = self.take_failure(&specific, &generic) {
            return Err(error);
        }

        let id = format!(
            "{}-{}",
            kind.path().trim_end_matches('s'),
            self.counter.fetch_add(1, Ordering::SeqCst) + 1
        );
        self.resources
            .lock()
            .unwrap()
            .insert(format!("{}/{}", kind.path(), id), body.clone());
        Ok(id)
    }

    async fn update(&self, kind: ResourceKind, id: &str, body: &Value) -> Result<(), RemoteError> {
        let generic = format!("update:{}", kind.path());
        let specific = format!("{}:{}", generic, id);
        self.record(specific.clone());
        if let Some(error) = self.take_failure(&specific, &generic) {
            return Err(error);
        }

        let mut resources = self.resources.lock().unwrap();
        let key = format!("{}/{}", kind.path(), id);
        if !resources.contains_key(&key) {
            return Err(RemoteError::NotFound);
        }
        resources.insert(key, body.clone());
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), RemoteError> {
        let generic = format!("delete:{}", kind.path());
        let specific = format!("{}:{}", generic, id);
        self.record(specific.clone());
        if let Some(error) = self.take_failure(&specific, &generic) {
            return Err(error);
        }

        let key = format!("{}/{}", kind.path(), id);
        if self.resources.lock().unwrap().remove(&key).is_none() {
            return Err(RemoteError::NotFound);
        }
        Ok(())
    }

    async fn get(&self, kind: ResourceKind, id: &str) -> Result<Value, RemoteError> {
        let generic = format!("get:{}", kind.path());
        let specific = format!("{}:{}", generic, id);
        self.record(specific.clone());
        if let Some(error) = self.take_failure(&specific, &generic) {
            return Err(error);
        }

        self.resources
            .lock()
            .unwrap()
            .get(&format!("{}/{}", kind.path(), id))
            .cloned()
            .ok_or(RemoteError::NotFound)
    }
}
