//! Geo context from `context.geo`

use super::ParamsCollator;
use crate::types::{RequestDetails, TargetDeliveryRequest};
use serde_json::{Map, Value};

pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const CITY: &str = "city";
pub const REGION: &str = "region";
pub const COUNTRY: &str = "country";

#[derive(Debug, Clone, Copy, Default)]
pub struct GeoParamsCollator;

/// Geo values used when the request carries no geo block
pub fn default_geo_params() -> Map<String, Value> {
    let mut params = Map::new();
    params.insert(LATITUDE.to_string(), Value::Null);
    params.insert(LONGITUDE.to_string(), Value::Null);
    params.insert(CITY.to_string(), Value::String(String::new()));
    params.insert(REGION.to_string(), Value::String(String::new()));
    params.insert(COUNTRY.to_string(), Value::String(String::new()));
    params
}

fn upper(value: &Option<String>) -> String {
    value.as_deref().unwrap_or_default().to_uppercase()
}

impl ParamsCollator for GeoParamsCollator {
    fn collate(&self, request: &TargetDeliveryRequest, _details: &RequestDetails<'_>) -> Map<String, Value> {
        let Some(geo) = request.request.context.as_ref().and_then(|c| c.geo.as_ref()) else {
            return default_geo_params();
        };
        let mut params = Map::new();
        params.insert(LATITUDE.to_string(), geo.latitude.map_or(Value::Null, Value::from));
        params.insert(LONGITUDE.to_string(), geo.longitude.map_or(Value::Null, Value::from));
        params.insert(CITY.to_string(), Value::String(upper(&geo.city).replace(' ', "")));
        params.insert(REGION.to_string(), Value::String(upper(&geo.state_code)));
        params.insert(COUNTRY.to_string(), Value::String(upper(&geo.country_code)));
        params
    }
}
