use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::parse::value_as_f64;
use crate::domain::{PricePoint, PriceSeries};

/// One entry of a forward price attribute. Field names differ between
/// providers (Tibber export, Nordpool, EPEX integrations).
#[derive(Debug, Deserialize)]
struct RawPrice {
    #[serde(alias = "startsAt", alias = "start")]
    start_time: Option<String>,
    #[serde(alias = "endsAt", alias = "end")]
    end_time: Option<String>,
    #[serde(alias = "total", alias = "price")]
    price_per_kwh: Option<Value>,
}

fn parse_time(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw.trim()).ok()
}

/// Parse a price-feed attribute into a series. Entries that cannot be read
/// are skipped rather than failing the whole feed.
pub fn parse_price_feed(value: &Value) -> PriceSeries {
    let Some(entries) = value.as_array() else {
        debug!("price attribute is not a list");
        return PriceSeries::default();
    };

    let mut skipped = 0usize;
    let points: Vec<PricePoint> = entries
        .iter()
        .filter_map(|entry| {
            let point = serde_json::from_value::<RawPrice>(entry.clone())
                .ok()
                .and_then(|raw| {
                    let start = parse_time(raw.start_time.as_deref()?)?;
                    let end = raw.end_time.as_deref().and_then(parse_time);
                    let price = value_as_f64(raw.price_per_kwh.as_ref()?)?;
                    Some(PricePoint::new(start, end, price))
                });
            if point.is_none() {
                skipped += 1;
            }
            point
        })
        .collect();

    if skipped > 0 {
        debug!(skipped, kept = points.len(), "skipped unreadable price entries");
    }
    PriceSeries::new(points)
}
