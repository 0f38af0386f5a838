//! Time context: `current_timestamp`, `current_day`, `current_time`, all UTC

use super::ParamsCollator;
use crate::types::{RequestDetails, TargetDeliveryRequest};
use chrono::{DateTime, Datelike, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;

pub const CURRENT_TIMESTAMP: &str = "current_timestamp";
pub const CURRENT_DAY: &str = "current_day";
pub const CURRENT_TIME: &str = "current_time";
pub const CURRENT_HOUR: &str = "current_hour";
pub const CURRENT_MINUTE: &str = "current_minute";

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct TimeParamsCollator {
    clock: Clock,
}

impl Default for TimeParamsCollator {
    fn default() -> Self {
        Self {
            clock: Arc::new(Utc::now),
        }
    }
}

impl TimeParamsCollator {
    pub fn with_clock(clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        Self {
            clock: Arc::new(clock),
        }
    }

    /// Collator that always reports the same instant
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::with_clock(move || at)
    }
}

impl ParamsCollator for TimeParamsCollator {
    fn collate(&self, _request: &TargetDeliveryRequest, _details: &RequestDetails<'_>) -> Map<String, Value> {
        let now = (self.clock)();
        let mut time = Map::new();
        time.insert(CURRENT_TIMESTAMP.to_string(), Value::from(now.timestamp_millis()));
        // ISO weekday, Monday = 1
        time.insert(
            CURRENT_DAY.to_string(),
            Value::String(now.weekday().number_from_monday().to_string()),
        );
        time.insert(CURRENT_TIME.to_string(), Value::String(now.format("%H%M").to_string()));
        time.insert(CURRENT_HOUR.to_string(), Value::String(now.format("%H").to_string()));
        time.insert(CURRENT_MINUTE.to_string(), Value::String(now.format("%M").to_string()));
        time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageLoadRequest;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_clock() {
        // Sunday 2026-03-01 07:05:09.123 UTC
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 7, 5, 9).unwrap()
            + chrono::Duration::milliseconds(123);
        let collator = TimeParamsCollator::fixed(at);
        let request = TargetDeliveryRequest::default();
        let page_load = PageLoadRequest::default();

        let time = collator.collate(&request, &RequestDetails::PageLoad(&page_load));
        assert_eq!(time[CURRENT_TIMESTAMP], at.timestamp_millis());
        assert_eq!(time[CURRENT_DAY], "7");
        assert_eq!(time[CURRENT_TIME], "0705");
        assert_eq!(time[CURRENT_HOUR], "07");
        assert_eq!(time[CURRENT_MINUTE], "05");
    }
}
