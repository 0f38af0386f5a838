//! Single-rule execution
//!
//! Builds the rule's evaluation context (base context plus the rule's own
//! `allocation`), evaluates the condition, and on a match returns the
//! consequence with response tokens and campaign macros applied.
//! Evaluation failures never propagate: they are logged, reported, and
//! count as a non-match.

use crate::allocation::allocate;
use crate::artifact::{Consequence, Rule};
use crate::collator::geo::{CITY, COUNTRY, LATITUDE, LONGITUDE, REGION};
use crate::collator::GEO;
use crate::error::DecisioningError;
use crate::logic::ConditionEvaluator;
use crate::macros::apply_campaign_macros;
use crate::trace::TraceRecorder;
use crate::transport::{report, ExceptionHandler};
use crate::types::RequestDetails;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{trace, warn};

pub const ALLOCATION: &str = "allocation";

/// Response token tagging how the decision was made
pub const EXECUTION_TYPE_TOKEN: &str = "activity.executionType";
pub const EXECUTION_TYPE_CLIENT_SIDE: &str = "client-side";

/// Geo context keys and the response token each maps to
const GEO_TOKENS: [(&str, &str); 5] = [
    (LATITUDE, "geo.latitude"),
    (LONGITUDE, "geo.longitude"),
    (CITY, "geo.city"),
    (REGION, "geo.state"),
    (COUNTRY, "geo.country"),
];

/// Evaluates individual rules for one client
#[derive(Clone)]
pub struct RuleExecutor {
    client: String,
    evaluator: Arc<dyn ConditionEvaluator>,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
}

impl RuleExecutor {
    pub fn new(
        client: impl Into<String>,
        evaluator: Arc<dyn ConditionEvaluator>,
        exception_handler: Option<Arc<dyn ExceptionHandler>>,
    ) -> Self {
        Self {
            client: client.into(),
            evaluator,
            exception_handler,
        }
    }

    /// Evaluate one rule; `Some` carries the consequence to serve
    pub fn execute(
        &self,
        base_context: &Map<String, Value>,
        details: &RequestDetails<'_>,
        visitor_id: &str,
        rule: &Rule,
        response_tokens: &HashSet<String>,
        trace: Option<&mut TraceRecorder>,
    ) -> Option<Consequence> {
        let mut context = base_context.clone();
        let allocation = allocate(&self.client, &rule.activity_id, visitor_id);
        context.insert(ALLOCATION.to_string(), Value::from(allocation));

        let data = Value::Object(context);
        trace!(activity_id = %rule.activity_id, condition = %rule.condition, "Evaluating rule");

        let matched = match self.evaluator.matches(&rule.condition, &data) {
            Ok(matched) => matched,
            Err(e) => {
                let error = match e {
                    DecisioningError::ConditionEvaluation(_) => e,
                    other => DecisioningError::ConditionEvaluation(other.to_string()),
                };
                warn!(activity_id = %rule.activity_id, error = %error, "Rule evaluation failed");
                report(self.exception_handler.as_ref(), &error);
                return None;
            }
        };

        if let (Some(trace), Value::Object(context)) = (trace, &data) {
            trace.add_campaign(rule, context, matched);
        }
        if !matched {
            return None;
        }

        let mut consequence = rule.consequence.clone();
        if let Value::Object(context) = &data {
            add_response_tokens(&mut consequence, rule, context, response_tokens);
        }
        apply_campaign_macros(&mut consequence.options, rule, details);
        Some(consequence)
    }
}

fn add_response_tokens(
    consequence: &mut Consequence,
    rule: &Rule,
    context: &Map<String, Value>,
    token_keys: &HashSet<String>,
) {
    if token_keys.is_empty() {
        return;
    }
    let Some(option) = consequence.options.first_mut() else {
        return;
    };
    let tokens = &mut option.response_tokens;
    tokens.insert(
        EXECUTION_TYPE_TOKEN.to_string(),
        Value::String(EXECUTION_TYPE_CLIENT_SIDE.to_string()),
    );

    if let Some(Value::Object(geo)) = context.get(GEO) {
        for (geo_key, token_key) in GEO_TOKENS {
            let Some(value) = geo.get(geo_key) else {
                continue;
            };
            let is_default = value.is_null() || value.as_str() == Some("");
            if token_keys.contains(token_key) && !is_default {
                tokens.insert(token_key.to_string(), value.clone());
            }
        }
    }

    for (key, value) in &rule.meta {
        if token_keys.contains(key) {
            tokens.insert(key.clone(), value.clone());
        }
    }
}
