//! On-device decisioning service
//!
//! Wires the loader, collators, rule execution, notification pool and
//! cluster locator together for one client configuration and answers
//! delivery requests from the published artifact.
//!
//! # Request flow
//!
//! 1. No artifact yet: `503`, nothing decided
//! 2. Feasibility check: `200` when everything is local, `206` otherwise
//! 3. Visitor id resolved (or generated) for allocation
//! 4. Prefetch items, then execute items, each decided independently
//! 5. Display notifications for execute matches go to the worker pool

use crate::artifact::RuleArtifact;
use crate::assembler::{DetailsExecutor, DetailsInput, ResponseTarget};
use crate::collator::Collators;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::executor::RuleExecutor;
use crate::feasibility::{evaluate_feasibility, FeasibilityVerdict};
use crate::geo::{GeoClient, HttpGeoClient};
use crate::loader::{ArtifactSource, HttpArtifactSource, RuleLoader};
use crate::locator::{node_details, ClusterLocator};
use crate::logic::{ConditionEvaluator, JsonLogic};
use crate::notification::NotificationDeliveryService;
use crate::trace::{ArtifactTraceInfo, TraceRecorder};
use crate::transport::{report, DecisioningHandler, ExceptionHandler, Transport};
use crate::types::{
    DecisioningMethod, DeliveryRequest, DeliveryResponse, ExecuteResponse, Notification, PrefetchResponse,
    RequestDetails, TargetDeliveryRequest, TargetDeliveryResponse, VisitorId,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const STATUS_OK: u16 = 200;
pub const STATUS_PARTIAL_CONTENT: u16 = 206;
pub const STATUS_SERVICE_UNAVAILABLE: u16 = 503;

pub const MESSAGE_LOCAL_RESPONSE: &str = "Local-decisioning response";
pub const MESSAGE_RULES_UNAVAILABLE: &str = "Local-decisioning rules not available";

/// Builder for `OnDeviceDecisioningService`; only the config and transport are required
pub struct ServiceBuilder {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    handler: Option<Arc<dyn DecisioningHandler>>,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
    evaluator: Option<Arc<dyn ConditionEvaluator>>,
    collators: Collators,
    artifact_source: Option<Arc<dyn ArtifactSource>>,
    geo_client: Option<Arc<dyn GeoClient>>,
}

impl ServiceBuilder {
    pub fn decisioning_handler(mut self, handler: Arc<dyn DecisioningHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.exception_handler = Some(handler);
        self
    }

    /// Replace the default JSON-logic interpreter
    pub fn evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn collators(mut self, collators: Collators) -> Self {
        self.collators = collators;
        self
    }

    /// Fetch artifacts from somewhere other than the artifact host
    pub fn artifact_source(mut self, source: Arc<dyn ArtifactSource>) -> Self {
        self.artifact_source = Some(source);
        self
    }

    pub fn geo_client(mut self, geo_client: Arc<dyn GeoClient>) -> Self {
        self.geo_client = Some(geo_client);
        self
    }

    /// Validate the configuration and assemble the service
    pub fn build(self) -> Result<OnDeviceDecisioningService> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let source: Arc<dyn ArtifactSource> = match self.artifact_source {
            Some(source) => source,
            None => Arc::new(HttpArtifactSource::new(config.request_timeout())?),
        };
        let geo_client: Arc<dyn GeoClient> = match self.geo_client {
            Some(geo_client) => geo_client,
            None => Arc::new(HttpGeoClient::new(&config)?),
        };
        let evaluator: Arc<dyn ConditionEvaluator> = match self.evaluator {
            Some(evaluator) => evaluator,
            None => Arc::new(JsonLogic),
        };

        let loader = RuleLoader::new(&config, source).with_handlers(self.handler, self.exception_handler.clone());
        let notifications = NotificationDeliveryService::new(
            config.notification_pool.clone(),
            Arc::clone(&self.transport),
            self.exception_handler.clone(),
        );
        let locator = ClusterLocator::new(Arc::clone(&self.transport));
        let rule_executor = RuleExecutor::new(config.client.clone(), evaluator, self.exception_handler.clone());
        let details_executor = DetailsExecutor::new(Arc::clone(&config), rule_executor);

        Ok(OnDeviceDecisioningService {
            config,
            loader,
            notifications,
            locator,
            details_executor,
            collators: self.collators,
            geo_client,
            exception_handler: self.exception_handler,
        })
    }
}

/// Local decisioning for one client configuration
pub struct OnDeviceDecisioningService {
    config: Arc<ClientConfig>,
    loader: RuleLoader,
    notifications: NotificationDeliveryService,
    locator: ClusterLocator,
    details_executor: DetailsExecutor,
    collators: Collators,
    geo_client: Arc<dyn GeoClient>,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
}

impl OnDeviceDecisioningService {
    pub fn builder(config: ClientConfig, transport: Arc<dyn Transport>) -> ServiceBuilder {
        ServiceBuilder {
            config,
            transport,
            handler: None,
            exception_handler: None,
            evaluator: None,
            collators: Collators::default(),
            artifact_source: None,
            geo_client: None,
        }
    }

    /// Start artifact polling, the notification pool and the cluster lookup.
    /// Must be called inside a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        self.notifications.start()?;
        self.loader.start();
        self.locator.start();
        info!(client = %self.config.client, "On-device decisioning started");
        Ok(())
    }

    /// Stop every background task. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.loader.stop().await;
        self.locator.stop();
        self.notifications.stop().await;
        info!(client = %self.config.client, "On-device decisioning stopped");
    }

    /// Fetch the artifact now instead of waiting for the next poll
    pub fn refresh(&self) {
        self.loader.refresh();
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn artifact(&self) -> Option<Arc<RuleArtifact>> {
        self.loader.artifact()
    }

    pub fn loader(&self) -> &RuleLoader {
        &self.loader
    }

    pub fn notifications(&self) -> &NotificationDeliveryService {
        &self.notifications
    }

    pub fn location_hint(&self) -> Option<String> {
        self.locator.location_hint()
    }

    /// Which parts of a request can be answered locally right now
    pub fn evaluate_feasibility(&self, request: &TargetDeliveryRequest) -> FeasibilityVerdict {
        let artifact = self.loader.artifact();
        evaluate_feasibility(request, artifact.as_deref())
    }

    /// Decide a request from the published artifact. Never performs I/O;
    /// fails only when display notifications cannot be queued.
    pub fn execute_request(&self, request: &TargetDeliveryRequest) -> Result<TargetDeliveryResponse> {
        let delivery = &request.request;
        let request_id = delivery
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let Some(artifact) = self.loader.artifact() else {
            debug!(request_id = %request_id, "No rule artifact published yet");
            return Ok(TargetDeliveryResponse {
                response: DeliveryResponse {
                    status: STATUS_SERVICE_UNAVAILABLE,
                    request_id: Some(request_id),
                    id: delivery.id.clone(),
                    client: Some(self.config.client.clone()),
                    ..Default::default()
                },
                status: STATUS_SERVICE_UNAVAILABLE,
                message: MESSAGE_RULES_UNAVAILABLE.to_string(),
                ..Default::default()
            });
        };

        let verdict = evaluate_feasibility(request, Some(&artifact));
        let status = if verdict.all_local {
            STATUS_OK
        } else {
            STATUS_PARTIAL_CONTENT
        };
        let (visitor_id, response_id) = self.resolve_visitor_id(delivery.id.as_ref());
        let mut recorder = delivery
            .trace
            .as_ref()
            .map(|_| TraceRecorder::new(&self.config.client, &artifact, &self.trace_info(), request));

        let mut prefetch = PrefetchResponse::default();
        let mut execute = ExecuteResponse::default();
        let mut notifications = Vec::new();

        for details in delivery.prefetch_details() {
            self.decide(
                request,
                details,
                &visitor_id,
                &artifact,
                recorder.as_mut(),
                ResponseTarget::Prefetch(&mut prefetch),
                &mut notifications,
            );
        }
        for details in delivery.execute_details() {
            self.decide(
                request,
                details,
                &visitor_id,
                &artifact,
                recorder.as_mut(),
                ResponseTarget::Execute(&mut execute),
                &mut notifications,
            );
        }

        let response = TargetDeliveryResponse {
            response: DeliveryResponse {
                status,
                request_id: Some(request_id),
                id: response_id,
                client: Some(self.config.client.clone()),
                prefetch: Some(prefetch),
                execute: Some(execute),
            },
            status,
            message: if verdict.all_local {
                MESSAGE_LOCAL_RESPONSE.to_string()
            } else {
                verdict.reason.clone().unwrap_or_default()
            },
            remote_mboxes: verdict.remote_mboxes,
            remote_views: verdict.remote_views,
        };

        if !notifications.is_empty() {
            self.send_notifications(request, response.response.id.as_ref(), notifications)?;
        }
        if self.config.log_requests {
            debug!(response = ?response, "On-device decisioning response");
        }
        Ok(response)
    }

    /// Like `execute_request`, but first resolves an IP-only geo through the
    /// geo client when the artifact enables geo targeting
    pub async fn execute_request_with_geo(&self, mut request: TargetDeliveryRequest) -> Result<TargetDeliveryResponse> {
        let geo_enabled = self
            .loader
            .artifact()
            .map_or(false, |artifact| artifact.geo_targeting_enabled);
        if geo_enabled {
            self.resolve_geo(&mut request).await;
        }
        self.execute_request(&request)
    }

    async fn resolve_geo(&self, request: &mut TargetDeliveryRequest) {
        let Some(geo) = request.request.context.as_mut().and_then(|c| c.geo.as_mut()) else {
            return;
        };
        if !geo.needs_lookup() {
            return;
        }
        let Some(ip_address) = geo.ip_address.clone() else {
            return;
        };
        match self.geo_client.lookup_geo(&ip_address).await {
            Ok(resolved) => *geo = resolved,
            Err(e) => {
                warn!(error = %e, "Geo lookup failed, deciding without location");
                report(self.exception_handler.as_ref(), &e);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn decide(
        &self,
        request: &TargetDeliveryRequest,
        details: RequestDetails<'_>,
        visitor_id: &str,
        artifact: &RuleArtifact,
        recorder: Option<&mut TraceRecorder>,
        target: ResponseTarget<'_>,
        notifications: &mut Vec<Notification>,
    ) {
        let context = self.collators.base_context(request, &details);
        let input = DetailsInput {
            request,
            details,
            context: &context,
            visitor_id,
            artifact,
        };
        self.details_executor
            .execute_details(&input, recorder, target, notifications);
    }

    /// Allocation id for the request and the id to echo in the response.
    /// Generated ids carry the cluster hint when one is known.
    fn resolve_visitor_id(&self, id: Option<&VisitorId>) -> (String, Option<VisitorId>) {
        let found = id.and_then(|id| {
            [
                id.third_party_id.as_deref(),
                id.first_authenticated_customer_id(),
                id.marketing_cloud_visitor_id.as_deref(),
                id.tnt_id.as_deref(),
            ]
            .into_iter()
            .flatten()
            .find(|candidate| !candidate.trim().is_empty())
            .map(str::to_string)
        });
        if let Some(found) = found {
            return (found, id.cloned());
        }

        let tnt_id = match self.locator.location_hint() {
            Some(hint) => format!("{}.{}", Uuid::new_v4(), node_details(&hint)),
            None => Uuid::new_v4().to_string(),
        };
        let mut response_id = id.cloned().unwrap_or_default();
        response_id.tnt_id = Some(tnt_id.clone());
        (tnt_id, Some(response_id))
    }

    fn trace_info(&self) -> ArtifactTraceInfo {
        ArtifactTraceInfo {
            polling_interval: self.loader.polling_interval(),
            fetch_count: self.loader.fetch_count(),
            last_fetch: self.loader.last_fetch(),
            location: self.loader.location().to_string(),
        }
    }

    fn send_notifications(
        &self,
        request: &TargetDeliveryRequest,
        response_id: Option<&VisitorId>,
        notifications: Vec<Notification>,
    ) -> Result<()> {
        let delivery = &request.request;
        let count = notifications.len();
        let batch = TargetDeliveryRequest {
            request: DeliveryRequest {
                request_id: Some(Uuid::new_v4().to_string()),
                impression_id: Some(Uuid::new_v4().to_string()),
                id: delivery.id.clone().or_else(|| response_id.cloned()),
                environment_id: delivery.environment_id,
                property: delivery.property.clone(),
                trace: delivery.trace.clone(),
                context: delivery.context.clone(),
                experience_cloud: delivery.experience_cloud.clone(),
                qa_mode: delivery.qa_mode.clone(),
                notifications,
                ..Default::default()
            },
            session_id: request.session_id.clone(),
            location_hint: request
                .location_hint
                .clone()
                .or_else(|| self.locator.location_hint()),
            decisioning_method: DecisioningMethod::ServerSide,
        };
        self.notifications.send_notification(batch)?;
        debug!(count, "Queued display notifications");
        Ok(())
    }
}
