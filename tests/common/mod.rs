//! Common test utilities and helpers

#![allow(dead_code)]

use async_trait::async_trait;
use ondevice_core::{
    ArtifactSource, ClientConfig, DecisioningError, DecisioningHandler, ExceptionHandler, FetchOutcome,
    OnDeviceDecisioningService, Result, TargetDeliveryRequest, TargetDeliveryResponse, Transport,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const CLIENT: &str = "testclient";
pub const GLOBAL_MBOX: &str = "target-global-mbox";

/// Install a test-friendly subscriber; repeated calls are ignored
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ondevice_core=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A rule serving one JSON option
pub fn rule(activity_id: u64, condition: Value, content: Value) -> Value {
    json!({
        "activityId": activity_id,
        "condition": condition,
        "consequence": {
            "options": [{"type": "json", "content": content, "eventToken": format!("token-{}", activity_id)}]
        },
        "meta": {
            "activity.id": activity_id,
            "activity.name": format!("Activity {}", activity_id),
            "activity.type": "ab",
            "experience.id": 0,
            "audience.ids": [activity_id * 10]
        }
    })
}

/// Artifact document with mbox rules; every rule-bearing mbox is local-capable
pub fn artifact_json(version: Value, mbox_rules: Value) -> String {
    let local: Vec<String> = mbox_rules
        .as_object()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    artifact_document(version, &local, mbox_rules)
}

pub fn artifact_document(version: Value, local_mboxes: &[String], mbox_rules: Value) -> String {
    json!({
        "version": version,
        "globalMbox": GLOBAL_MBOX,
        "geoTargetingEnabled": false,
        "responseTokens": ["activity.id", "activity.name"],
        "localMboxes": local_mboxes,
        "remoteMboxes": [],
        "localViews": [],
        "remoteViews": [],
        "meta": {"generatedAt": "2026-01-01T00:00:00Z", "environment": "production"},
        "rules": {"mboxes": mbox_rules, "views": {}}
    })
    .to_string()
}

/// Artifact source replaying a script, repeating the last entry
pub struct StubSource {
    script: Mutex<VecDeque<Option<String>>>,
    pub calls: AtomicUsize,
}

impl StubSource {
    /// `None` entries answer 304
    pub fn new(script: Vec<Option<String>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn not_modified() -> Arc<Self> {
        Self::new(vec![None])
    }
}

#[async_trait]
impl ArtifactSource for StubSource {
    async fn fetch(&self, _location: &str, _etag: Option<&str>) -> Result<FetchOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        let next = if script.len() > 1 {
            script.pop_front().flatten()
        } else {
            script.front().cloned().flatten()
        };
        Ok(match next {
            Some(body) => FetchOutcome::Modified {
                body: body.into_bytes(),
                etag: None,
            },
            None => FetchOutcome::NotModified,
        })
    }
}

/// Transport recording every notification batch
#[derive(Default)]
pub struct RecordingTransport {
    pub notifications: Mutex<Vec<TargetDeliveryRequest>>,
}

impl RecordingTransport {
    pub fn recorded(&self) -> Vec<TargetDeliveryRequest> {
        self.notifications.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn execute_request(&self, _request: &TargetDeliveryRequest) -> Result<TargetDeliveryResponse> {
        Err(DecisioningError::Transport("remote calls disabled in tests".to_string()))
    }

    async fn execute_notification(&self, request: &TargetDeliveryRequest) -> Result<u16> {
        self.notifications.lock().unwrap().push(request.clone());
        Ok(200)
    }
}

/// Transport whose notification calls block until released
pub struct BlockingTransport {
    pub started: AtomicUsize,
    pub completed: AtomicUsize,
    gate: Semaphore,
}

impl BlockingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        })
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }
}

#[async_trait]
impl Transport for BlockingTransport {
    async fn execute_request(&self, _request: &TargetDeliveryRequest) -> Result<TargetDeliveryResponse> {
        Err(DecisioningError::Transport("remote calls disabled in tests".to_string()))
    }

    async fn execute_notification(&self, _request: &TargetDeliveryRequest) -> Result<u16> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| DecisioningError::Transport(e.to_string()))?;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(200)
    }
}

/// Exception handler keeping the rendered errors
#[derive(Default)]
pub struct RecordingExceptionHandler {
    pub errors: Mutex<Vec<String>>,
}

impl RecordingExceptionHandler {
    pub fn count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }
}

impl ExceptionHandler for RecordingExceptionHandler {
    fn handle(&self, error: &DecisioningError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

#[derive(Default)]
pub struct CountingHandler {
    pub ready: AtomicUsize,
    pub downloads: AtomicUsize,
}

impl DecisioningHandler for CountingHandler {
    fn on_ready(&self) {
        self.ready.fetch_add(1, Ordering::SeqCst);
    }

    fn artifact_download_succeeded(&self, _body: &[u8]) {
        self.downloads.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn config_with_artifact(artifact: String) -> ClientConfig {
    let mut config = ClientConfig::new(CLIENT);
    config.artifact_payload = Some(artifact);
    config
}

/// Started service serving a preloaded artifact
pub fn start_service(config: ClientConfig, transport: Arc<dyn Transport>) -> OnDeviceDecisioningService {
    init_tracing();
    let service = OnDeviceDecisioningService::builder(config, transport)
        .artifact_source(StubSource::not_modified())
        .build()
        .expect("Failed to build service");
    service.start().expect("Failed to start service");
    service
}

/// Poll a condition every 10ms for up to two seconds
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
