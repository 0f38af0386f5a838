//! Request and response data model
//!
//! Serde mirror of the delivery wire format, trimmed to the fields the
//! decisioning engine reads or writes. JSON field names are camelCase.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Trace payload attached to response items when a request asks for it
pub type TraceMap = Map<String, Value>;

/// Visitor identity as sent by the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorId {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tnt_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub third_party_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marketing_cloud_visitor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub customer_ids: Vec<CustomerId>,
}

impl VisitorId {
    pub fn with_tnt_id(tnt_id: impl Into<String>) -> Self {
        Self {
            tnt_id: Some(tnt_id.into()),
            ..Default::default()
        }
    }

    /// First authenticated customer id with a non-empty value
    pub fn first_authenticated_customer_id(&self) -> Option<&str> {
        self.customer_ids
            .iter()
            .find(|c| !c.id.is_empty() && c.authenticated_state == AuthenticatedState::Authenticated)
            .map(|c| c.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerId {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integration_code: Option<String>,
    #[serde(default)]
    pub authenticated_state: AuthenticatedState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticatedState {
    #[default]
    Unknown,
    Authenticated,
    LoggedOut,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    #[default]
    Web,
    Mobile,
}

/// Device/browser context shared by every item in a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    #[serde(default)]
    pub channel: ChannelType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_hints: Option<ClientHints>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<Geo>,
}

/// User-agent client hints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientHints {
    #[serde(rename = "browserUAWithFullVersion", skip_serializing_if = "Option::is_none")]
    pub browser_ua_with_full_version: Option<String>,
    #[serde(rename = "browserUAWithMajorVersion", skip_serializing_if = "Option::is_none")]
    pub browser_ua_with_major_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referring_url: Option<String>,
}

impl Address {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            referring_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
}

impl Geo {
    /// Only an IP address is known; everything else needs a lookup
    pub fn needs_lookup(&self) -> bool {
        fn blank(v: &Option<String>) -> bool {
            v.as_deref().map_or(true, str::is_empty)
        }
        !blank(&self.ip_address)
            && blank(&self.city)
            && blank(&self.state_code)
            && blank(&self.country_code)
            && self.latitude.is_none()
            && self.longitude.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Property {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Presence of this block turns on trace collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub authorization_token: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub usage: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub purchased_product_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
}

/// A named content slot request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MboxRequest {
    #[serde(default)]
    pub index: i32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<Product>,
}

impl MboxRequest {
    pub fn new(index: i32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// A view request; an absent name asks for every view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, String>,
}

impl ViewRequest {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn selector(&self) -> ViewSelector {
        match &self.name {
            Some(name) => ViewSelector::Named(name.clone()),
            None => ViewSelector::All,
        }
    }
}

/// Which views a view request targets
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ViewSelector {
    All,
    Named(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLoadRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<Product>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mboxes: Vec<MboxRequest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub views: Vec<ViewRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_load: Option<PageLoadRequest>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mboxes: Vec<MboxRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_load: Option<PageLoadRequest>,
}

/// One requested item, borrowed from the request
#[derive(Debug, Clone, Copy)]
pub enum RequestDetails<'a> {
    Mbox(&'a MboxRequest),
    View(&'a ViewRequest),
    PageLoad(&'a PageLoadRequest),
}

impl<'a> RequestDetails<'a> {
    pub fn address(&self) -> Option<&'a Address> {
        match self {
            RequestDetails::Mbox(m) => m.address.as_ref(),
            RequestDetails::View(v) => v.address.as_ref(),
            RequestDetails::PageLoad(p) => p.address.as_ref(),
        }
    }

    pub fn parameters(&self) -> &'a HashMap<String, String> {
        match self {
            RequestDetails::Mbox(m) => &m.parameters,
            RequestDetails::View(v) => &v.parameters,
            RequestDetails::PageLoad(p) => &p.parameters,
        }
    }

    /// Mbox name, when this item is an mbox request
    pub fn mbox_name(&self) -> Option<&'a str> {
        match self {
            RequestDetails::Mbox(m) => Some(m.name.as_str()),
            _ => None,
        }
    }

    pub fn is_view(&self) -> bool {
        matches!(self, RequestDetails::View(_))
    }
}

/// Delivery request body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impression_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<VisitorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<Property>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Trace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experience_cloud: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qa_mode: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefetch: Option<PrefetchRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execute: Option<ExecuteRequest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<Notification>,
}

impl DeliveryRequest {
    pub fn property_token(&self) -> Option<&str> {
        self.property
            .as_ref()
            .and_then(|p| p.token.as_deref())
            .filter(|t| !t.is_empty())
    }

    /// Prefetch items in mbox, view, page-load order
    pub fn prefetch_details(&self) -> Vec<RequestDetails<'_>> {
        let Some(prefetch) = &self.prefetch else {
            return Vec::new();
        };
        let mut details: Vec<RequestDetails<'_>> =
            prefetch.mboxes.iter().map(RequestDetails::Mbox).collect();
        details.extend(prefetch.views.iter().map(RequestDetails::View));
        if let Some(page_load) = &prefetch.page_load {
            details.push(RequestDetails::PageLoad(page_load));
        }
        details
    }

    /// Execute items in mbox, page-load order
    pub fn execute_details(&self) -> Vec<RequestDetails<'_>> {
        let Some(execute) = &self.execute else {
            return Vec::new();
        };
        let mut details: Vec<RequestDetails<'_>> =
            execute.mboxes.iter().map(RequestDetails::Mbox).collect();
        if let Some(page_load) = &execute.page_load {
            details.push(RequestDetails::PageLoad(page_load));
        }
        details
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisioningMethod {
    #[default]
    ServerSide,
    OnDevice,
    Hybrid,
}

/// Delivery request plus the SDK-level metadata that never goes on the wire body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetDeliveryRequest {
    pub request: DeliveryRequest,
    pub session_id: Option<String>,
    pub location_hint: Option<String>,
    pub decisioning_method: DecisioningMethod,
}

impl TargetDeliveryRequest {
    pub fn new(request: DeliveryRequest) -> Self {
        Self {
            request,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Html,
    Json,
    Redirect,
    Dynamic,
    Actions,
}

/// One content option of a matched experience
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseOption {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub option_type: Option<OptionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_token: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub response_tokens: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Click,
    #[default]
    Display,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selectors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MboxResponse {
    pub index: i32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ResponseOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<Metric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceMap>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ResponseOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<Metric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceMap>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLoadResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ResponseOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<Metric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceMap>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mboxes: Vec<MboxResponse>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub views: Vec<View>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_load: Option<PageLoadResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mboxes: Vec<MboxResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_load: Option<PageLoadResponse>,
}

/// Delivery response body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResponse {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<VisitorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefetch: Option<PrefetchResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execute: Option<ExecuteResponse>,
}

/// Delivery response plus local-execution status for the caller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetDeliveryResponse {
    pub response: DeliveryResponse,
    pub status: u16,
    pub message: String,
    pub remote_mboxes: Vec<String>,
    pub remote_views: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationMbox {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Display/click event reported back to the remote service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impression_id: Option<String>,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mbox: Option<NotificationMbox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<NotificationView>,
}
