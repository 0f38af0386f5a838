//! Rule artifact model
//!
//! The artifact is parsed once, validated, and then shared read-only by
//! every request through an `Arc`. Only the loader creates instances.

use crate::config::ClientConfig;
use crate::error::{DecisioningError, Result};
use crate::types::{Metric, ResponseOption};
use serde::{Deserialize, Deserializer};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Major artifact version this engine understands
pub const SUPPORTED_MAJOR_VERSION: &str = "1";

/// Rule meta keys read by the engine
pub mod meta_keys {
    pub const ACTIVITY_ID: &str = "activity.id";
    pub const ACTIVITY_NAME: &str = "activity.name";
    pub const ACTIVITY_TYPE: &str = "activity.type";
    pub const EXPERIENCE_ID: &str = "experience.id";
    pub const AUDIENCE_IDS: &str = "audience.ids";
    pub const OFFER_ID: &str = "offer.id";
}

/// Validated, immutable rule artifact
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleArtifact {
    pub version: Option<String>,
    #[serde(default)]
    pub global_mbox: String,
    #[serde(default)]
    pub geo_targeting_enabled: bool,
    #[serde(default)]
    pub local_mboxes: HashSet<String>,
    #[serde(default)]
    pub remote_mboxes: HashSet<String>,
    #[serde(default)]
    pub local_views: HashSet<String>,
    #[serde(default)]
    pub remote_views: HashSet<String>,
    #[serde(default)]
    pub response_tokens: HashSet<String>,
    pub rules: Option<RuleSet>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

/// Rules keyed by mbox and view name. Names keep the artifact's declaration
/// order and each list is in evaluation order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub mboxes: IndexMap<String, Vec<Rule>>,
    #[serde(default)]
    pub views: IndexMap<String, Vec<Rule>>,
}

/// A single targeting rule
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default)]
    pub rule_key: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub activity_id: String,
    #[serde(default)]
    pub property_tokens: Vec<String>,
    #[serde(default)]
    pub condition: Value,
    #[serde(default)]
    pub consequence: Consequence,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

/// Content served when a rule matches
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Consequence {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub options: Vec<ResponseOption>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

impl RuleArtifact {
    /// Parse an artifact body, rejecting unsupported versions and bodies without rules
    pub fn from_json(body: &str) -> Result<Self> {
        let artifact: RuleArtifact = serde_json::from_str(body)?;
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let artifact: RuleArtifact = serde_json::from_slice(body)?;
        artifact.validate()?;
        Ok(artifact)
    }

    fn validate(&self) -> Result<()> {
        if self.rules.is_none() {
            return Err(DecisioningError::InvalidArtifact(
                "artifact has no rules".to_string(),
            ));
        }
        let major_prefix = format!("{}.", SUPPORTED_MAJOR_VERSION);
        match self.version.as_deref() {
            Some(v) if v.starts_with(&major_prefix) => Ok(()),
            other => Err(DecisioningError::UnsupportedVersion(other.map(str::to_string))),
        }
    }

    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or_default()
    }

    pub fn rules(&self) -> &RuleSet {
        static EMPTY: once_cell::sync::Lazy<RuleSet> = once_cell::sync::Lazy::new(RuleSet::default);
        self.rules.as_ref().unwrap_or(&EMPTY)
    }

    /// Rules for an mbox, empty when the artifact has none
    pub fn mbox_rules(&self, name: &str) -> &[Rule] {
        self.rules().mboxes.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn view_rules(&self, name: &str) -> &[Rule] {
        self.rules().views.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every view rule, view by view in declaration order
    pub fn all_view_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules().views.values().flatten()
    }
}

impl Rule {
    /// A rule with property tokens only applies to requests carrying one of them.
    /// Requests without a token are not gated.
    pub fn applies_to_property(&self, token: Option<&str>) -> bool {
        match token {
            Some(token) if !self.property_tokens.is_empty() => {
                self.property_tokens.iter().any(|t| t == token)
            }
            _ => true,
        }
    }

    pub fn meta_value(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    /// Audience ids from rule meta
    pub fn audience_ids(&self) -> Vec<Value> {
        match self.meta.get(meta_keys::AUDIENCE_IDS) {
            Some(Value::Array(ids)) => ids.clone(),
            _ => Vec::new(),
        }
    }
}

/// Artifact location for a client and environment
pub fn artifact_url(config: &ClientConfig) -> String {
    format!(
        "https://{}/{}/{}/v1/rules.json",
        config.artifact_hostname,
        config.client,
        config.environment.to_lowercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn artifact_json(version: Value) -> String {
        json!({
            "version": version,
            "globalMbox": "target-global-mbox",
            "localMboxes": ["hero"],
            "remoteMboxes": [],
            "localViews": [],
            "remoteViews": [],
            "responseTokens": ["activity.id"],
            "meta": {"generatedAt": "2026-01-01T00:00:00Z"},
            "rules": {
                "mboxes": {
                    "hero": [{
                        "ruleKey": "123",
                        "activityId": 1001,
                        "propertyTokens": ["tok"],
                        "condition": {"<": [{"var": "allocation"}, 50]},
                        "consequence": {
                            "name": "hero",
                            "options": [{"type": "json", "content": {"experience": "a"}, "eventToken": "evt"}],
                            "metrics": []
                        },
                        "meta": {"activity.id": 1001, "audience.ids": [1, 2]}
                    }]
                },
                "views": {}
            }
        })
        .to_string()
    }

    #[test]
    fn test_parse_valid_artifact() {
        let artifact = RuleArtifact::from_json(&artifact_json(json!("1.0.0"))).unwrap();
        assert_eq!(artifact.version(), "1.0.0");
        assert_eq!(artifact.global_mbox, "target-global-mbox");
        assert!(artifact.local_mboxes.contains("hero"));

        let rules = artifact.mbox_rules("hero");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].activity_id, "1001");
        assert_eq!(rules[0].audience_ids(), vec![json!(1), json!(2)]);
        assert_eq!(rules[0].consequence.options[0].event_token.as_deref(), Some("evt"));
        assert!(artifact.mbox_rules("missing").is_empty());
    }

    #[test]
    fn test_version_gate() {
        let err = RuleArtifact::from_json(&artifact_json(json!("2.0.0"))).unwrap_err();
        assert!(matches!(err, DecisioningError::UnsupportedVersion(Some(ref v)) if v == "2.0.0"));

        let err = RuleArtifact::from_json(&artifact_json(Value::Null)).unwrap_err();
        assert!(matches!(err, DecisioningError::UnsupportedVersion(None)));

        // "10.x" must not pass as major version 1
        assert!(RuleArtifact::from_json(&artifact_json(json!("10.0.0"))).is_err());
    }

    #[test]
    fn test_view_rules_keep_declared_order() {
        // raw text: a `json!` object would sort its keys
        let body = r#"{
            "version": "1.0.0",
            "globalMbox": "target-global-mbox",
            "rules": {
                "mboxes": {},
                "views": {
                    "zeta": [{"activityId": 1, "condition": true}],
                    "alpha": [{"activityId": 2, "condition": true}, {"activityId": 3, "condition": true}]
                }
            }
        }"#;
        let artifact = RuleArtifact::from_json(body).unwrap();

        let ids: Vec<_> = artifact.all_view_rules().map(|r| r.activity_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        let names: Vec<_> = artifact.rules().views.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(artifact.view_rules("alpha").len(), 2);
    }

    #[test]
    fn test_missing_rules_is_invalid() {
        let err = RuleArtifact::from_json(r#"{"version": "1.0.0"}"#).unwrap_err();
        assert!(matches!(err, DecisioningError::InvalidArtifact(_)));
    }

    #[test]
    fn test_property_gating() {
        let rule = Rule {
            property_tokens: vec!["a".to_string()],
            ..Default::default()
        };
        assert!(rule.applies_to_property(None));
        assert!(rule.applies_to_property(Some("a")));
        assert!(!rule.applies_to_property(Some("b")));
        assert!(Rule::default().applies_to_property(Some("b")));
    }

    #[test]
    fn test_artifact_url() {
        let mut config = ClientConfig::new("acme");
        config.environment = "Staging".to_string();
        assert_eq!(
            artifact_url(&config),
            "https://assets.adobetarget.com/acme/staging/v1/rules.json"
        );
    }
}
