//! Custom `mbox.*` context from request parameters
//!
//! Parameters from the page load and every requested mbox are merged, then
//! the current item's own parameters are applied last so they win on
//! duplicate keys. Each value is also exposed lowercased as `<key>_lc`.

use super::{insert_with_lowercase, ParamsCollator};
use crate::types::{RequestDetails, TargetDeliveryRequest};
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct CustomParamsCollator;

impl ParamsCollator for CustomParamsCollator {
    fn collate(&self, request: &TargetDeliveryRequest, details: &RequestDetails<'_>) -> Map<String, Value> {
        let mut custom = Map::new();
        let delivery = &request.request;

        let page_loads = [
            delivery.prefetch.as_ref().and_then(|p| p.page_load.as_ref()),
            delivery.execute.as_ref().and_then(|e| e.page_load.as_ref()),
        ];
        for page_load in page_loads.into_iter().flatten() {
            add_parameters(&mut custom, &page_load.parameters);
        }

        let prefetch_mboxes = delivery.prefetch.iter().flat_map(|p| p.mboxes.iter());
        let execute_mboxes = delivery.execute.iter().flat_map(|e| e.mboxes.iter());
        for mbox in prefetch_mboxes.chain(execute_mboxes) {
            add_parameters(&mut custom, &mbox.parameters);
        }

        add_parameters(&mut custom, details.parameters());
        custom
    }
}

fn add_parameters(custom: &mut Map<String, Value>, parameters: &HashMap<String, String>) {
    for (key, value) in parameters {
        insert_with_lowercase(custom, key, value);
    }
}
