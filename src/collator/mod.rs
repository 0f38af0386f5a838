//! Context collators
//!
//! Each collator turns request facts into a flat key/value map. The
//! `Collators` set nests those maps under their context keys to build the
//! base evaluation context for one request item:
//!
//! ```text
//! { current_timestamp, current_day, current_time, ...,
//!   user: {..}, page: {..}, referring: {..}, geo: {..}, mbox: {..} }
//! ```
//!
//! The rule executor adds `allocation` per rule on top of this base.

pub mod custom;
pub mod geo;
pub mod page;
pub mod time;
pub mod user;

pub use custom::CustomParamsCollator;
pub use geo::GeoParamsCollator;
pub use page::PageParamsCollator;
pub use time::TimeParamsCollator;
pub use user::UserParamsCollator;

use crate::types::{RequestDetails, TargetDeliveryRequest};
use serde_json::{Map, Value};
use std::sync::Arc;

pub const USER: &str = "user";
pub const GEO: &str = "geo";
pub const PAGE: &str = "page";
pub const REFERRING: &str = "referring";
pub const MBOX: &str = "mbox";

/// Suffix for lowercased variants of string values
pub const LOWER_CASE_SUFFIX: &str = "_lc";

/// Builds one context map from a request and the item being decided
pub trait ParamsCollator: Send + Sync {
    fn collate(&self, request: &TargetDeliveryRequest, details: &RequestDetails<'_>) -> Map<String, Value>;
}

/// The full set of collators used to build a base context
#[derive(Clone)]
pub struct Collators {
    time: Arc<dyn ParamsCollator>,
    user: Arc<dyn ParamsCollator>,
    page: Arc<dyn ParamsCollator>,
    referring: Arc<dyn ParamsCollator>,
    geo: Arc<dyn ParamsCollator>,
    custom: Arc<dyn ParamsCollator>,
}

impl Default for Collators {
    fn default() -> Self {
        Self {
            time: Arc::new(TimeParamsCollator::default()),
            user: Arc::new(UserParamsCollator),
            page: Arc::new(PageParamsCollator::page()),
            referring: Arc::new(PageParamsCollator::referring()),
            geo: Arc::new(GeoParamsCollator),
            custom: Arc::new(CustomParamsCollator),
        }
    }
}

impl Collators {
    /// Replace the time collator, e.g. with a fixed clock
    pub fn with_time(mut self, time: Arc<dyn ParamsCollator>) -> Self {
        self.time = time;
        self
    }

    pub fn with_user(mut self, user: Arc<dyn ParamsCollator>) -> Self {
        self.user = user;
        self
    }

    pub fn with_geo(mut self, geo: Arc<dyn ParamsCollator>) -> Self {
        self.geo = geo;
        self
    }

    pub fn with_custom(mut self, custom: Arc<dyn ParamsCollator>) -> Self {
        self.custom = custom;
        self
    }

    /// Base evaluation context for one request item
    pub fn base_context(&self, request: &TargetDeliveryRequest, details: &RequestDetails<'_>) -> Map<String, Value> {
        let mut context = self.time.collate(request, details);
        context.insert(USER.to_string(), Value::Object(self.user.collate(request, details)));
        context.insert(PAGE.to_string(), Value::Object(self.page.collate(request, details)));
        context.insert(
            REFERRING.to_string(),
            Value::Object(self.referring.collate(request, details)),
        );
        context.insert(GEO.to_string(), Value::Object(self.geo.collate(request, details)));
        context.insert(MBOX.to_string(), Value::Object(self.custom.collate(request, details)));
        context
    }
}

/// Insert `key` and `key_lc` for a string value
pub(crate) fn insert_with_lowercase(map: &mut Map<String, Value>, key: &str, value: &str) {
    map.insert(key.to_string(), Value::String(value.to_string()));
    map.insert(
        format!("{}{}", key, LOWER_CASE_SUFFIX),
        Value::String(value.to_lowercase()),
    );
}
