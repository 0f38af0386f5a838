//! Cluster locator
//!
//! Issues one remote request at start-up to learn which edge cluster the
//! SDK talks to. The returned tnt id carries the cluster as a suffix
//! (`<id>.<hint>_<n>`); the hint is cached and used when generating
//! visitor ids and sending notifications. Failures just leave it unset.

use crate::transport::Transport;
use crate::types::{ChannelType, Context, DeliveryRequest, TargetDeliveryRequest};
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Cluster hint from a tnt id of the form `<id>.<hint>_<n>`
pub fn location_hint_from_tnt_id(tnt_id: &str) -> Option<String> {
    let parts: Vec<&str> = tnt_id.split('.').collect();
    let [_, node] = parts.as_slice() else {
        return None;
    };
    let details: Vec<&str> = node.split('_').collect();
    match details.as_slice() {
        [hint, _] => Some(hint.to_string()),
        _ => None,
    }
}

/// tnt id suffix for a cluster hint
pub fn node_details(hint: &str) -> String {
    format!("{}_0", hint)
}

pub struct ClusterLocator {
    transport: Arc<dyn Transport>,
    hint: Arc<ArcSwapOption<String>>,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ClusterLocator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            hint: Arc::new(ArcSwapOption::empty()),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Spawn the lookup. No-op while running. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let transport = Arc::clone(&self.transport);
        let hint = Arc::clone(&self.hint);
        let handle = tokio::spawn(async move {
            let request = TargetDeliveryRequest::new(DeliveryRequest {
                context: Some(Context {
                    channel: ChannelType::Web,
                    ..Default::default()
                }),
                ..Default::default()
            });

            let response = match transport.execute_request(&request).await {
                Ok(response) => response,
                Err(e) => {
                    debug!(error = %e, "Cluster lookup failed");
                    return;
                }
            };
            if response.status != 200 {
                debug!(status = response.status, "Cluster lookup returned no id");
                return;
            }
            let located = response
                .response
                .id
                .as_ref()
                .and_then(|id| id.tnt_id.as_deref())
                .and_then(location_hint_from_tnt_id);
            if let Some(located) = located {
                info!(location_hint = %located, "Cluster located");
                hint.store(Some(Arc::new(located)));
            }
        });

        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
    }

    /// Cancel a pending lookup. Safe to call repeatedly or without a prior `start`.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.task.lock().ok().and_then(|mut t| t.take()) {
            handle.abort();
        }
    }

    pub fn location_hint(&self) -> Option<String> {
        self.hint.load_full().map(|hint| hint.as_ref().clone())
    }
}

impl Drop for ClusterLocator {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().ok().and_then(|mut t| t.take()) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecisioningError, Result};
    use crate::types::{DeliveryResponse, TargetDeliveryResponse, VisitorId};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct StubTransport {
        tnt_id: Option<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn execute_request(&self, request: &TargetDeliveryRequest) -> Result<TargetDeliveryResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(
                request.request.context.as_ref().map(|c| c.channel),
                Some(ChannelType::Web)
            );
            match self.tnt_id {
                Some(tnt_id) => Ok(TargetDeliveryResponse {
                    response: DeliveryResponse {
                        status: 200,
                        id: Some(VisitorId::with_tnt_id(tnt_id)),
                        ..Default::default()
                    },
                    status: 200,
                    ..Default::default()
                }),
                None => Err(DecisioningError::Transport("connection refused".to_string())),
            }
        }

        async fn execute_notification(&self, _request: &TargetDeliveryRequest) -> Result<u16> {
            Ok(200)
        }
    }

    fn locator(tnt_id: Option<&'static str>) -> (ClusterLocator, Arc<StubTransport>) {
        let transport = Arc::new(StubTransport {
            tnt_id,
            calls: AtomicUsize::new(0),
        });
        (ClusterLocator::new(transport.clone()), transport)
    }

    #[test]
    fn test_location_hint_from_tnt_id() {
        assert_eq!(location_hint_from_tnt_id("abc123.35_0"), Some("35".to_string()));
        assert_eq!(location_hint_from_tnt_id("abc123"), None);
        assert_eq!(location_hint_from_tnt_id("abc.35"), None);
        assert_eq!(location_hint_from_tnt_id("a.b.35_0"), None);
        assert_eq!(location_hint_from_tnt_id("abc.35_0_1"), None);
        assert_eq!(node_details("35"), "35_0");
    }

    #[tokio::test]
    async fn test_locates_once() {
        let (locator, transport) = locator(Some("abc123.28_0"));
        locator.start();
        locator.start();

        for _ in 0..100 {
            if locator.location_hint().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(locator.location_hint().as_deref(), Some("28"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        locator.stop();
        locator.stop();
    }

    #[tokio::test]
    async fn test_failure_leaves_hint_unset() {
        let (locator, transport) = locator(None);
        locator.start();
        for _ in 0..20 {
            if transport.calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert!(locator.location_hint().is_none());
    }

    #[test]
    fn test_stop_without_start() {
        let (locator, _) = locator(None);
        locator.stop();
        assert!(locator.location_hint().is_none());
    }
}
