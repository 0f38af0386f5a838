//! Decisioning trace
//!
//! One recorder per request, created only when the request carries a trace
//! block and shared by every item of that request. It collects artifact,
//! profile and request metadata plus a record per evaluated activity, and
//! hands out snapshots that are attached to each item's response entry.
//! Records accumulate across items, so later entries see earlier activities.

use crate::artifact::{meta_keys, Rule, RuleArtifact};
use crate::types::{Notification, RequestDetails, TargetDeliveryRequest, TraceMap, VisitorId};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::time::Duration;
use url::Url;

const MATCHED_IDS: &str = "matchedSegmentIds";
const UNMATCHED_IDS: &str = "unmatchedSegmentIds";
const MATCHED_RULES: &str = "matchedRuleConditions";
const UNMATCHED_RULES: &str = "unmatchedRuleConditions";

/// Loader facts reported in the `artifact` section
#[derive(Debug, Clone, Default)]
pub struct ArtifactTraceInfo {
    pub polling_interval: Duration,
    pub fetch_count: u64,
    pub last_fetch: Option<DateTime<Utc>>,
    pub location: String,
}

/// Per-request trace accumulator
#[derive(Debug, Clone)]
pub struct TraceRecorder {
    global_mbox: String,
    base: TraceMap,
    campaigns: Vec<(String, TraceMap)>,
    evaluated_targets: Vec<(String, TraceMap)>,
}

impl TraceRecorder {
    pub fn new(
        client: &str,
        artifact: &RuleArtifact,
        info: &ArtifactTraceInfo,
        request: &TargetDeliveryRequest,
    ) -> Self {
        let mut base = Map::new();
        base.insert("clientCode".to_string(), Value::String(client.to_string()));
        base.insert("artifact".to_string(), Value::Object(artifact_trace(artifact, info)));
        base.insert(
            "profile".to_string(),
            Value::Object(profile_trace(request.request.id.as_ref())),
        );
        Self {
            global_mbox: artifact.global_mbox.clone(),
            base,
            campaigns: Vec::new(),
            evaluated_targets: Vec::new(),
        }
    }

    /// Record which item is being decided
    pub fn update_request(&mut self, request: &TargetDeliveryRequest, details: &RequestDetails<'_>, execute: bool) {
        let mut req = Map::new();
        req.insert("sessionId".to_string(), json!(request.session_id));
        req.insert("environmentId".to_string(), json!(request.request.environment_id));

        let mbox = match details {
            RequestDetails::View(view) => {
                req.insert("view".to_string(), serde_json::to_value(view).unwrap_or(Value::Null));
                None
            }
            RequestDetails::Mbox(m) => serde_json::to_value(m).ok(),
            RequestDetails::PageLoad(p) => serde_json::to_value(p).ok(),
        };
        if let Some(value) = mbox {
            let mut mbox = value.as_object().cloned().unwrap_or_default();
            mbox.entry("name")
                .or_insert_with(|| Value::String(self.global_mbox.clone()));
            let kind = if execute { "execute" } else { "prefetch" };
            mbox.insert("type".to_string(), Value::String(kind.to_string()));
            req.insert("mbox".to_string(), Value::Object(mbox));
        }

        if let Some(url) = details.address().and_then(|a| a.url.as_deref()) {
            req.insert("pageURL".to_string(), Value::String(url.to_string()));
            if let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)) {
                req.insert("host".to_string(), Value::String(host));
            }
        }

        self.base.insert("request".to_string(), Value::Object(req));
    }

    /// Record a rule evaluation outcome for its activity
    pub fn add_campaign(&mut self, rule: &Rule, context: &Map<String, Value>, matched: bool) {
        let Some(activity_id) = activity_key(rule) else {
            return;
        };

        if matched && !self.campaigns.iter().any(|(id, _)| *id == activity_id) {
            let mut campaign = campaign_trace(rule);
            campaign.insert("branchId".to_string(), meta(rule, meta_keys::EXPERIENCE_ID));
            campaign.insert("offers".to_string(), meta(rule, meta_keys::OFFER_ID));
            self.campaigns.push((activity_id.clone(), campaign));
        }

        let index = match self.evaluated_targets.iter().position(|(id, _)| *id == activity_id) {
            Some(index) => index,
            None => {
                let mut target = campaign_trace(rule);
                target.insert("context".to_string(), Value::Object(context.clone()));
                for key in [MATCHED_IDS, UNMATCHED_IDS, MATCHED_RULES, UNMATCHED_RULES] {
                    target.insert(key.to_string(), Value::Array(Vec::new()));
                }
                self.evaluated_targets.push((activity_id, target));
                self.evaluated_targets.len() - 1
            }
        };

        let (ids_key, rules_key) = if matched {
            (MATCHED_IDS, MATCHED_RULES)
        } else {
            (UNMATCHED_IDS, UNMATCHED_RULES)
        };
        let target = &mut self.evaluated_targets[index].1;
        if let Some(Value::Array(ids)) = target.get_mut(ids_key) {
            ids.extend(rule.audience_ids());
        }
        if let Some(Value::Array(rules)) = target.get_mut(rules_key) {
            rules.push(rule.condition.clone());
        }
    }

    /// Attach the display notification to the matched activity's record
    pub fn add_notification(&mut self, rule: &Rule, notification: &Notification) {
        let Some(activity_id) = activity_key(rule) else {
            return;
        };
        if let Some((_, campaign)) = self.campaigns.iter_mut().find(|(id, _)| *id == activity_id) {
            let value = serde_json::to_value(notification).unwrap_or(Value::Null);
            campaign.insert("notifications".to_string(), Value::Array(vec![value]));
        }
    }

    /// Snapshot of everything recorded so far
    pub fn current_trace(&self) -> TraceMap {
        let mut trace = self.base.clone();
        trace.insert(
            "campaigns".to_string(),
            Value::Array(self.campaigns.iter().map(|(_, c)| Value::Object(c.clone())).collect()),
        );
        trace.insert(
            "evaluatedCampaignTargets".to_string(),
            Value::Array(
                self.evaluated_targets
                    .iter()
                    .map(|(_, t)| Value::Object(t.clone()))
                    .collect(),
            ),
        );
        trace
    }
}

fn meta(rule: &Rule, key: &str) -> Value {
    rule.meta_value(key).cloned().unwrap_or(Value::Null)
}

fn activity_key(rule: &Rule) -> Option<String> {
    match rule.meta_value(meta_keys::ACTIVITY_ID)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn campaign_trace(rule: &Rule) -> TraceMap {
    let mut campaign = Map::new();
    campaign.insert("id".to_string(), meta(rule, meta_keys::ACTIVITY_ID));
    campaign.insert("activityName".to_string(), meta(rule, meta_keys::ACTIVITY_NAME));
    campaign.insert("activityType".to_string(), meta(rule, meta_keys::ACTIVITY_TYPE));
    campaign
}

fn artifact_trace(artifact: &RuleArtifact, info: &ArtifactTraceInfo) -> TraceMap {
    let mut trace = artifact.meta.clone();
    trace.insert("artifactVersion".to_string(), json!(artifact.version));
    trace.insert(
        "pollingInterval".to_string(),
        json!(info.polling_interval.as_millis() as u64),
    );
    trace.insert("artifactRetrievalCount".to_string(), json!(info.fetch_count));
    trace.insert("artifactLocation".to_string(), json!(info.location));
    trace.insert("pollingHalted".to_string(), Value::Bool(false));
    trace.insert(
        "artifactLastRetrieved".to_string(),
        info.last_fetch
            .map(|t| Value::String(t.format("%Y-%m-%dT%H:%MZ").to_string()))
            .unwrap_or(Value::Null),
    );
    trace
}

fn profile_trace(visitor_id: Option<&VisitorId>) -> TraceMap {
    let mut profile = Map::new();
    let Some(visitor_id) = visitor_id else {
        return profile;
    };
    let Some(tnt_id) = visitor_id.tnt_id.as_deref() else {
        return profile;
    };

    let mut id = Map::new();
    match tnt_id.rfind('.') {
        Some(idx) if idx < tnt_id.len() - 1 => {
            id.insert("tntId".to_string(), json!(&tnt_id[..idx]));
            id.insert("profileLocation".to_string(), json!(&tnt_id[idx + 1..]));
        }
        _ => {
            id.insert("tntId".to_string(), json!(tnt_id));
        }
    }
    if let Some(mcid) = &visitor_id.marketing_cloud_visitor_id {
        id.insert("marketingCloudVisitorId".to_string(), json!(mcid));
    }
    if let Some(third_party) = &visitor_id.third_party_id {
        id.insert("thirdPartyId".to_string(), json!(third_party));
    }
    if !visitor_id.customer_ids.is_empty() {
        id.insert(
            "customerIds".to_string(),
            serde_json::to_value(&visitor_id.customer_ids).unwrap_or(Value::Null),
        );
    }
    profile.insert("visitorId".to_string(), Value::Object(id));
    profile
}
