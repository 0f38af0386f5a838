//! Rule artifact loader
//!
//! Polls the artifact location on a fixed interval and publishes every
//! valid artifact with a single atomic swap. Readers never see a partially
//! parsed artifact; an invalid or unsupported one is logged and the
//! previously published artifact keeps serving.
//!
//! # Schedule
//!
//! - First fetch right after `start`
//! - While nothing has ever been published, failed fetches retry after
//!   `retries × 1s`, at most 10 times
//! - Otherwise every polling interval (never below 5 minutes)
//! - `refresh` fetches immediately and restarts the interval

use crate::artifact::{artifact_url, RuleArtifact};
use crate::config::ClientConfig;
use crate::error::{DecisioningError, Result};
use crate::transport::{report, DecisioningHandler, ExceptionHandler};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, trace, warn};

const MAX_INITIAL_RETRIES: u32 = 10;
const RETRY_STEP: Duration = Duration::from_secs(1);

/// Result of one artifact request
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// New body, with the ETag to send next time
    Modified { body: Vec<u8>, etag: Option<String> },
    /// Server answered 304 for our ETag
    NotModified,
}

/// Where artifact bytes come from
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn fetch(&self, location: &str, etag: Option<&str>) -> Result<FetchOutcome>;
}

/// Conditional GET over HTTPS
pub struct HttpArtifactSource {
    client: reqwest::Client,
}

impl HttpArtifactSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifactSource {
    async fn fetch(&self, location: &str, etag: Option<&str>) -> Result<FetchOutcome> {
        let mut request = self
            .client
            .get(location)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(etag) = etag {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }
        if status != reqwest::StatusCode::OK {
            return Err(DecisioningError::ArtifactFetch {
                status: status.as_u16(),
                location: location.to_string(),
            });
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();
        Ok(FetchOutcome::Modified { body, etag })
    }
}

struct LoaderState {
    location: String,
    polling_interval: Duration,
    artifact_payload: Option<String>,
    source: Arc<dyn ArtifactSource>,
    artifact: ArcSwapOption<RuleArtifact>,
    etag: Mutex<Option<String>>,
    fetch_count: AtomicU64,
    last_fetch: ArcSwapOption<DateTime<Utc>>,
    retries: AtomicU32,
    ready: AtomicBool,
    refresh: Notify,
    handler: Option<Arc<dyn DecisioningHandler>>,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
}

struct PollTask {
    shutdown_tx: broadcast::Sender<()>,
    task_handle: tokio::task::JoinHandle<()>,
}

/// Owns the published artifact and the polling task
pub struct RuleLoader {
    state: Arc<LoaderState>,
    running: AtomicBool,
    task: Mutex<Option<PollTask>>,
}

impl RuleLoader {
    pub fn new(config: &ClientConfig, source: Arc<dyn ArtifactSource>) -> Self {
        Self {
            state: Arc::new(LoaderState {
                location: artifact_url(config),
                polling_interval: config.polling_interval(),
                artifact_payload: config.artifact_payload.clone(),
                source,
                artifact: ArcSwapOption::empty(),
                etag: Mutex::new(None),
                fetch_count: AtomicU64::new(0),
                last_fetch: ArcSwapOption::empty(),
                retries: AtomicU32::new(0),
                ready: AtomicBool::new(false),
                refresh: Notify::new(),
                handler: None,
                exception_handler: None,
            }),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Loader using `HttpArtifactSource` with the configured timeout
    pub fn http(config: &ClientConfig) -> Result<Self> {
        let source = HttpArtifactSource::new(config.request_timeout())?;
        Ok(Self::new(config, Arc::new(source)))
    }

    /// Attach lifecycle and exception handlers; only valid before `start`
    pub fn with_handlers(
        mut self,
        handler: Option<Arc<dyn DecisioningHandler>>,
        exception_handler: Option<Arc<dyn ExceptionHandler>>,
    ) -> Self {
        if let Some(state) = Arc::get_mut(&mut self.state) {
            state.handler = handler;
            state.exception_handler = exception_handler;
        }
        self
    }

    /// Publish the preloaded artifact (if any) and spawn the polling task.
    /// No-op while already running. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Rule loader already running");
            return;
        }

        self.state.retries.store(0, Ordering::SeqCst);
        self.state.publish_preloaded();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let state = Arc::clone(&self.state);
        let task_handle = tokio::spawn(async move {
            run_poll_loop(state, shutdown_rx).await;
        });

        if let Ok(mut task) = self.task.lock() {
            *task = Some(PollTask {
                shutdown_tx,
                task_handle,
            });
        }
        info!(location = %self.state.location, "Rule loader started");
    }

    /// Cancel polling and reset to a clean state. Safe to call repeatedly
    /// or without a prior `start`.
    ///
    /// Waits for the polling task to finish so a tick already past its
    /// fetch cannot publish after the reset.
    pub async fn stop(&self) {
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            let _ = task.shutdown_tx.send(());
            task.task_handle.abort();
            let _ = task.task_handle.await;
            info!("Rule loader stopped");
        }
        self.state.reset();
        self.running.store(false, Ordering::SeqCst);
    }

    /// Fetch now instead of waiting for the next tick
    pub fn refresh(&self) {
        self.state.refresh.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Latest published artifact
    pub fn artifact(&self) -> Option<Arc<RuleArtifact>> {
        self.state.artifact.load_full()
    }

    pub fn polling_interval(&self) -> Duration {
        self.state.polling_interval
    }

    /// Successful polling ticks since start
    pub fn fetch_count(&self) -> u64 {
        self.state.fetch_count.load(Ordering::SeqCst)
    }

    pub fn last_fetch(&self) -> Option<DateTime<Utc>> {
        self.state.last_fetch.load_full().map(|t| *t)
    }

    pub fn location(&self) -> &str {
        &self.state.location
    }
}

impl Drop for RuleLoader {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(task) = task.take() {
                task.task_handle.abort();
            }
        }
    }
}

impl LoaderState {
    fn publish_preloaded(&self) {
        let Some(payload) = self.artifact_payload.as_deref() else {
            return;
        };
        match RuleArtifact::from_json(payload) {
            Ok(artifact) => {
                info!(version = artifact.version(), "Published preloaded rule artifact");
                self.artifact.store(Some(Arc::new(artifact)));
                self.mark_ready();
            }
            Err(e) => {
                warn!(error = %e, "Preloaded rule artifact rejected");
                report(self.exception_handler.as_ref(), &e);
            }
        }
    }

    fn mark_ready(&self) {
        if !self.ready.swap(true, Ordering::SeqCst) {
            if let Some(handler) = &self.handler {
                handler.on_ready();
            }
        }
    }

    fn current_etag(&self) -> Option<String> {
        self.etag.lock().ok().and_then(|e| e.clone())
    }

    fn set_etag(&self, etag: Option<String>) {
        if let Ok(mut current) = self.etag.lock() {
            *current = etag;
        }
    }

    /// One fetch attempt; true when the published artifact is current
    async fn load(&self) -> bool {
        let etag = self.current_etag();
        let outcome = match self.source.fetch(&self.location, etag.as_deref()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(location = %self.location, error = %e, "Failed to get local-decisioning rule set");
                report(self.exception_handler.as_ref(), &e);
                return false;
            }
        };

        match outcome {
            FetchOutcome::NotModified => {
                trace!("Rule artifact not modified");
                self.artifact.load().is_some()
            }
            FetchOutcome::Modified { body, etag } => match RuleArtifact::from_slice(&body) {
                Ok(artifact) => {
                    debug!(version = artifact.version(), bytes = body.len(), "Publishing rule artifact");
                    self.set_etag(etag);
                    self.artifact.store(Some(Arc::new(artifact)));
                    if let Some(handler) = &self.handler {
                        handler.artifact_download_succeeded(&body);
                    }
                    true
                }
                Err(e) => {
                    warn!(location = %self.location, error = %e, "Rejected rule artifact");
                    report(self.exception_handler.as_ref(), &e);
                    false
                }
            },
        }
    }

    /// Run one tick and return the delay until the next one
    async fn tick(&self) -> Duration {
        let success = self.load().await;

        if !success && self.artifact.load().is_none() {
            let attempt = self.retries.fetch_add(1, Ordering::SeqCst);
            let (delay, message) = if attempt < MAX_INITIAL_RETRIES {
                let delay = RETRY_STEP * (attempt + 1);
                debug!(?delay, "Download of local-decisioning rules failed, retrying");
                (delay, format!("Download of local-decisioning rules failed, retrying in {} ms", delay.as_millis()))
            } else {
                warn!("Exhausted retries trying to download local-decisioning rules");
                (
                    self.polling_interval,
                    "Exhausted retries trying to download local-decisioning rules".to_string(),
                )
            };
            if let Some(handler) = &self.handler {
                handler.artifact_download_failed(&DecisioningError::Other(message));
            }
            return delay;
        }

        if success {
            self.mark_ready();
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            self.last_fetch.store(Some(Arc::new(Utc::now())));
        }
        self.polling_interval
    }

    fn reset(&self) {
        self.artifact.store(None);
        self.set_etag(None);
        self.fetch_count.store(0, Ordering::SeqCst);
        self.last_fetch.store(None);
        self.retries.store(0, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
    }
}

async fn run_poll_loop(state: Arc<LoaderState>, mut shutdown_rx: broadcast::Receiver<()>) {
    loop {
        let delay = state.tick().await;

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = state.refresh.notified() => {
                debug!("Rule artifact refresh requested");
            }
            _ = shutdown_rx.recv() => {
                debug!("Rule loader received shutdown signal");
                break;
            }
        }
    }
}
