//! User-agent context: `browserType`, `browserVersion`, `platform`
//!
//! Browser and platform detection are ordered first-match tables; the
//! categories overlap (every Chrome UA also says "Safari"), so order matters.
//! Client hints, when present, take precedence over the raw user agent.

use super::ParamsCollator;
use crate::types::{ClientHints, RequestDetails, TargetDeliveryRequest};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

pub const BROWSER_TYPE: &str = "browserType";
pub const BROWSER_VERSION: &str = "browserVersion";
pub const PLATFORM: &str = "platform";
pub const UNKNOWN: &str = "unknown";

const COMPATIBILITY_START: &str = "(compatible;";
const COMPATIBILITY_END: &str = ")";
const MAX_SECTION_LEVEL: usize = 5;

type BrowserMatcher = fn(&str) -> bool;

fn is_chrome(ua: &str) -> bool {
    (ua.contains("Chrome") || ua.contains("CriOS")) && !ua.contains("OPR") && !ua.contains("Edge/")
}

fn is_firefox(ua: &str) -> bool {
    ua.contains("Firefox")
}

fn is_ie(ua: &str) -> bool {
    ua.contains("MSIE") || ua.contains("Trident")
}

fn is_opera(ua: &str) -> bool {
    ua.contains("Opera") || ua.contains("OPR")
}

fn is_ipad(ua: &str) -> bool {
    ua.contains("iPad")
}

fn is_iphone(ua: &str) -> bool {
    ua.contains("iPhone")
}

fn is_safari(ua: &str) -> bool {
    ua.contains("Safari") && !ua.contains("Chrome") && !ua.contains("OPR") && !ua.contains("CriOS")
}

fn is_edge(ua: &str) -> bool {
    ua.contains("Edge")
}

static BROWSER_TYPES: &[(&str, BrowserMatcher)] = &[
    ("chrome", is_chrome),
    ("firefox", is_firefox),
    ("ie", is_ie),
    ("opera", is_opera),
    ("ipad", is_ipad),
    ("iphone", is_iphone),
    ("safari", is_safari),
    ("edge", is_edge),
];

static PLATFORMS: &[(&str, &str)] = &[
    ("Windows", "windows"),
    ("Macintosh", "mac"),
    ("Mac OS", "mac"),
    ("macOS", "mac"),
    ("Linux", "linux"),
];

fn patterns(definitions: &[&str]) -> Vec<Regex> {
    definitions
        .iter()
        .map(|d| Regex::new(&format!("(?i){}", d)).expect("Valid browser version regex"))
        .collect()
}

static VERSION_PATTERNS: Lazy<Vec<(&'static str, Vec<Regex>)>> = Lazy::new(|| {
    vec![
        ("chrome", patterns(&[r"chrome/(\d+)", r"crios/(\d+)", r#"Chrome";v="(\d+)"#])),
        ("firefox", patterns(&[r"firefox/(\d+)"])),
        ("ie", patterns(&[r"msie\s(\d+)", r"rv:(\d+)"])),
        (
            "opera",
            patterns(&[r"version/(\d+)", r"opera/(\d+)", r"opera\s*(\d+)", r"OPR/(\d+)"]),
        ),
        ("ipad", patterns(&[r"version/(\d+)"])),
        ("iphone", patterns(&[r"version/(\d+)"])),
        ("safari", patterns(&[r"version/(\d+)"])),
        ("edge", patterns(&[r"edge/(\d+)", r#"Edge";v="(\d+)"#])),
    ]
});

#[derive(Debug, Clone, Copy, Default)]
pub struct UserParamsCollator;

impl ParamsCollator for UserParamsCollator {
    fn collate(&self, request: &TargetDeliveryRequest, _details: &RequestDetails<'_>) -> Map<String, Value> {
        let context = request.request.context.as_ref();
        let user_agent = context
            .and_then(|c| c.user_agent.as_deref())
            .filter(|ua| !ua.is_empty());
        let hints = context.and_then(|c| c.client_hints.as_ref());

        let browser_info = browser_info(user_agent, hints);
        let browser_type = browser_info.map_or(UNKNOWN, parse_browser_type);

        let mut user = Map::new();
        user.insert(BROWSER_TYPE.to_string(), Value::String(browser_type.to_string()));
        user.insert(
            PLATFORM.to_string(),
            Value::String(parse_platform(user_agent, hints).to_string()),
        );
        user.insert(
            BROWSER_VERSION.to_string(),
            Value::String(browser_info.map_or_else(
                || UNKNOWN.to_string(),
                |info| parse_browser_version(info, browser_type),
            )),
        );
        user
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn browser_info<'a>(user_agent: Option<&'a str>, hints: Option<&'a ClientHints>) -> Option<&'a str> {
    hints
        .and_then(|h| {
            non_empty(&h.browser_ua_with_full_version)
                .or_else(|| non_empty(&h.browser_ua_with_major_version))
        })
        .or(user_agent)
}

pub fn parse_browser_type(browser_info: &str) -> &'static str {
    if browser_info.is_empty() {
        return UNKNOWN;
    }
    BROWSER_TYPES
        .iter()
        .find(|(_, matches)| matches(browser_info))
        .map_or(UNKNOWN, |(name, _)| *name)
}

pub fn parse_platform(user_agent: Option<&str>, hints: Option<&ClientHints>) -> &'static str {
    let source = hints
        .and_then(|h| non_empty(&h.platform))
        .or(user_agent);
    let Some(source) = source else {
        return UNKNOWN;
    };
    PLATFORMS
        .iter()
        .find(|(token, _)| source.contains(token))
        .map_or(UNKNOWN, |(_, platform)| *platform)
}

pub fn parse_browser_version(browser_info: &str, browser_type: &str) -> String {
    let Some((_, regexes)) = VERSION_PATTERNS.iter().find(|(name, _)| *name == browser_type) else {
        return UNKNOWN.to_string();
    };
    main_and_compatibility_sections(browser_info)
        .iter()
        .filter(|section| !section.is_empty())
        .find_map(|section| {
            regexes
                .iter()
                .find_map(|re| re.captures(section).and_then(|c| c.get(1)))
                .map(|m| m.as_str().to_string())
        })
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Split a user agent into the main text and nested `(compatible; ...)` sections,
/// one accumulated string per nesting level
fn main_and_compatibility_sections(user_agent: &str) -> Vec<String> {
    let has_section = user_agent
        .find(COMPATIBILITY_START)
        .map_or(false, |start| user_agent[start..].contains(COMPATIBILITY_END));
    if !has_section {
        return vec![user_agent.to_string()];
    }

    let bytes = user_agent.as_bytes();
    let mut levels: Vec<String> = Vec::new();
    let mut level = 0usize;
    let mut region_start = 0usize;
    let mut current = 0usize;

    let store = |levels: &mut Vec<String>, level: usize, from: usize, to: usize| {
        while levels.len() <= level {
            levels.push(String::new());
        }
        levels[level].push_str(&user_agent[from..to]);
    };

    while current < bytes.len() {
        if bytes[current..].starts_with(COMPATIBILITY_START.as_bytes()) {
            store(&mut levels, level, region_start, current);
            level = (level + 1).min(MAX_SECTION_LEVEL);
            current += COMPATIBILITY_START.len();
            region_start = current;
        } else if bytes[current..].starts_with(COMPATIBILITY_END.as_bytes()) {
            store(&mut levels, level, region_start, current);
            level = level.saturating_sub(1);
            current += COMPATIBILITY_END.len();
            region_start = current;
        } else {
            current += 1;
        }
    }
    store(&mut levels, level, region_start, current);
    levels
}
