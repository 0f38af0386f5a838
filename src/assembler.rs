//! Response assembly
//!
//! `DetailsExecutor` decides one requested item (mbox, view or page load):
//! it picks the candidate rules, gates them by property token, runs each
//! through the `RuleExecutor` and routes matches into the prefetch or
//! execute response. Items where nothing matched still get a placeholder
//! entry carrying only the trace.

use crate::artifact::{Consequence, Rule, RuleArtifact};
use crate::config::ClientConfig;
use crate::executor::RuleExecutor;
use crate::trace::TraceRecorder;
use crate::types::{
    ExecuteResponse, MboxResponse, MetricType, Notification, NotificationMbox, NotificationView,
    PageLoadResponse, PrefetchResponse, RequestDetails, ResponseOption, TargetDeliveryRequest,
    TraceMap, View, ViewSelector,
};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

/// Response section a decided item is written into
pub enum ResponseTarget<'r> {
    Prefetch(&'r mut PrefetchResponse),
    Execute(&'r mut ExecuteResponse),
}

impl ResponseTarget<'_> {
    fn is_execute(&self) -> bool {
        matches!(self, ResponseTarget::Execute(_))
    }
}

/// Per-item inputs shared by every rule evaluated for it
pub struct DetailsInput<'a> {
    pub request: &'a TargetDeliveryRequest,
    pub details: RequestDetails<'a>,
    pub context: &'a Map<String, Value>,
    pub visitor_id: &'a str,
    pub artifact: &'a RuleArtifact,
}

#[derive(Clone)]
pub struct DetailsExecutor {
    config: Arc<ClientConfig>,
    rule_executor: RuleExecutor,
}

impl DetailsExecutor {
    pub fn new(config: Arc<ClientConfig>, rule_executor: RuleExecutor) -> Self {
        Self {
            config,
            rule_executor,
        }
    }

    /// Decide one item and write its response entry into `target`.
    /// Execute-path matches also append a display notification.
    pub fn execute_details(
        &self,
        input: &DetailsInput<'_>,
        mut trace: Option<&mut TraceRecorder>,
        mut target: ResponseTarget<'_>,
        notifications: &mut Vec<Notification>,
    ) {
        let details = input.details;
        if let Some(recorder) = trace.as_deref_mut() {
            recorder.update_request(input.request, &details, target.is_execute());
        }

        let property_token = input.request.request.property_token();
        let evaluate_all = details
            .mbox_name()
            .map_or(false, |name| self.config.evaluates_all_rules(name));

        let mut handled = false;
        let mut skip_keys: HashSet<&str> = HashSet::new();

        for rule in candidate_rules(&details, input.artifact) {
            if !rule.applies_to_property(property_token) {
                continue;
            }
            let rule_key = rule.rule_key.as_deref();
            if rule_key.map_or(false, |key| skip_keys.contains(key)) {
                continue;
            }

            let consequence = self.rule_executor.execute(
                input.context,
                &details,
                input.visitor_id,
                rule,
                &input.artifact.response_tokens,
                trace.as_deref_mut(),
            );
            let Some(consequence) = consequence else {
                continue;
            };
            if !handle_match(consequence, rule, &details, trace.as_deref_mut(), &mut target, notifications) {
                continue;
            }

            handled = true;
            match details {
                RequestDetails::Mbox(_) if !evaluate_all => break,
                RequestDetails::Mbox(_) => {}
                _ => {
                    if let Some(key) = rule_key {
                        skip_keys.insert(key);
                    }
                }
            }
        }

        if !handled {
            unhandled_response(&details, trace.as_deref(), &mut target);
        }
    }
}

/// Rules to try for an item, in evaluation order
fn candidate_rules<'a>(details: &RequestDetails<'_>, artifact: &'a RuleArtifact) -> Vec<&'a Rule> {
    match details {
        RequestDetails::View(view) => match view.selector() {
            ViewSelector::Named(name) => artifact.view_rules(&name).iter().collect(),
            ViewSelector::All => artifact.all_view_rules().collect(),
        },
        RequestDetails::Mbox(mbox) => artifact.mbox_rules(&mbox.name).iter().collect(),
        RequestDetails::PageLoad(_) => artifact.mbox_rules(&artifact.global_mbox).iter().collect(),
    }
}

fn current_trace(trace: Option<&TraceRecorder>) -> Option<TraceMap> {
    trace.map(TraceRecorder::current_trace)
}

/// Route a matched consequence; false when the item has nowhere to go
fn handle_match(
    consequence: Consequence,
    rule: &Rule,
    details: &RequestDetails<'_>,
    mut trace: Option<&mut TraceRecorder>,
    target: &mut ResponseTarget<'_>,
    notifications: &mut Vec<Notification>,
) -> bool {
    trace!(activity_id = %rule.activity_id, options = consequence.options.len(), "Rule matched");

    if details.is_view() {
        let ResponseTarget::Prefetch(prefetch) = target else {
            return false;
        };
        let view = View {
            name: consequence.name,
            key: consequence.key,
            options: consequence.options,
            metrics: consequence.metrics,
            trace: current_trace(trace.as_deref()),
        };
        merge_view(&mut prefetch.views, view);
        return true;
    }

    let Consequence {
        mut options,
        metrics,
        ..
    } = consequence;

    if target.is_execute() {
        let notification = display_notification(details, &options);
        if let Some(recorder) = trace.as_deref_mut() {
            recorder.add_notification(rule, &notification);
        }
        notifications.push(notification);
        for option in options.iter_mut() {
            option.event_token = None;
        }
    }

    match details {
        RequestDetails::Mbox(mbox) => {
            let response = MboxResponse {
                index: mbox.index,
                name: mbox.name.clone(),
                options,
                metrics,
                trace: current_trace(trace.as_deref()),
            };
            match target {
                ResponseTarget::Prefetch(prefetch) => prefetch.mboxes.push(response),
                ResponseTarget::Execute(execute) => execute.mboxes.push(response),
            }
        }
        _ => {
            let page_load = match target {
                ResponseTarget::Prefetch(prefetch) => prefetch.page_load.get_or_insert_with(Default::default),
                ResponseTarget::Execute(execute) => execute.page_load.get_or_insert_with(Default::default),
            };
            page_load.trace = current_trace(trace.as_deref());
            page_load.options.extend(options);
            for metric in metrics {
                if !page_load.metrics.contains(&metric) {
                    page_load.metrics.push(metric);
                }
            }
        }
    }
    true
}

/// Views with the same name accumulate options and metrics
fn merge_view(views: &mut Vec<View>, view: View) {
    match views.iter_mut().find(|existing| existing.name == view.name) {
        Some(existing) => {
            existing.options.extend(view.options);
            existing.metrics.extend(view.metrics);
        }
        None => views.push(view),
    }
}

fn unhandled_response(details: &RequestDetails<'_>, trace: Option<&TraceRecorder>, target: &mut ResponseTarget<'_>) {
    let trace = current_trace(trace);
    match (details, target) {
        (RequestDetails::View(_), ResponseTarget::Prefetch(prefetch)) => {
            prefetch.views.push(View {
                trace,
                ..Default::default()
            });
        }
        (RequestDetails::View(_), ResponseTarget::Execute(_)) => {}
        (RequestDetails::Mbox(mbox), target) => {
            let response = MboxResponse {
                index: mbox.index,
                name: mbox.name.clone(),
                trace,
                ..Default::default()
            };
            match target {
                ResponseTarget::Prefetch(prefetch) => prefetch.mboxes.push(response),
                ResponseTarget::Execute(execute) => execute.mboxes.push(response),
            }
        }
        (RequestDetails::PageLoad(_), target) => {
            let response = PageLoadResponse {
                trace,
                ..Default::default()
            };
            match target {
                ResponseTarget::Prefetch(prefetch) => prefetch.page_load = Some(response),
                ResponseTarget::Execute(execute) => execute.page_load = Some(response),
            }
        }
    }
}

fn display_notification(details: &RequestDetails<'_>, options: &[ResponseOption]) -> Notification {
    let mut notification = Notification {
        id: Uuid::new_v4().to_string(),
        impression_id: Some(Uuid::new_v4().to_string()),
        metric_type: MetricType::Display,
        timestamp: Utc::now().timestamp_millis(),
        tokens: options.iter().filter_map(|o| o.event_token.clone()).collect(),
        ..Default::default()
    };
    match details {
        RequestDetails::View(view) => {
            notification.view = Some(NotificationView {
                name: view.name.clone(),
                key: view.key.clone(),
            });
        }
        RequestDetails::Mbox(mbox) => {
            notification.mbox = Some(NotificationMbox {
                name: mbox.name.clone(),
            });
        }
        RequestDetails::PageLoad(_) => {}
    }
    notification
}
