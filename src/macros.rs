//! Campaign macro substitution
//!
//! HTML options and action `content` strings may carry `${...}`
//! placeholders such as `${activity.id}` or `${mbox.name}`. Values come
//! from rule meta first, then the mbox name/index, then request
//! parameters. Unknown macros are left untouched.

use crate::artifact::Rule;
use crate::types::{OptionType, RequestDetails, ResponseOption};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

static MACRO_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\$\{([a-zA-Z0-9_.]*?)\}").expect("Valid campaign macro regex"));

/// Legacy macro names and their current spelling
const RENAMES: [(&str, &str); 2] = [("campaign", "activity"), ("recipe", "experience")];

/// Segments dropped from macro keys
const REMOVED_SEGMENTS: [&str; 1] = ["mbox"];

const ACTION_CONTENT: &str = "content";

/// Replace macros in every eligible option in place
pub fn apply_campaign_macros(options: &mut [ResponseOption], rule: &Rule, details: &RequestDetails<'_>) {
    let replacer = MacroReplacer { rule, details };
    for option in options.iter_mut() {
        match (option.option_type, option.content.as_mut()) {
            (Some(OptionType::Html), Some(Value::String(html))) => {
                *html = replacer.replace(html);
            }
            (Some(OptionType::Actions), Some(Value::Array(actions))) => {
                for action in actions.iter_mut() {
                    if let Some(Value::String(content)) = action.get_mut(ACTION_CONTENT) {
                        *content = replacer.replace(content);
                    }
                }
            }
            _ => {}
        }
    }
}

struct MacroReplacer<'a, 'b> {
    rule: &'a Rule,
    details: &'a RequestDetails<'b>,
}

impl MacroReplacer<'_, '_> {
    fn replace(&self, text: &str) -> String {
        MACRO_PATTERN
            .replace_all(text, |caps: &Captures<'_>| {
                let key = sanitize_key(&caps[1]);
                self.value(&key).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    fn value(&self, key: &str) -> Option<String> {
        if let Some(meta) = self.rule.meta.get(key) {
            return Some(value_to_string(meta));
        }
        if let RequestDetails::Mbox(mbox) = self.details {
            match key {
                "name" => return Some(mbox.name.clone()),
                "index" => return Some(mbox.index.to_string()),
                _ => {}
            }
        }
        self.details.parameters().get(key).cloned()
    }
}

fn sanitize_key(raw: &str) -> String {
    let renamed = RENAMES
        .iter()
        .fold(raw.to_string(), |key, (legacy, current)| key.replace(legacy, current));
    let segments: Vec<&str> = renamed.split('.').collect();
    let tail = &segments[segments.len().saturating_sub(2)..];
    tail.iter()
        .copied()
        .filter(|segment| !REMOVED_SEGMENTS.contains(segment))
        .collect::<Vec<_>>()
        .join(".")
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
