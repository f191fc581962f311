use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};

/// Slot length assumed when a feed entry carries no end time.
pub const DEFAULT_SLOT_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    /// €/kWh
    pub price: f64,
}

impl PricePoint {
    pub fn new(
        start: DateTime<FixedOffset>,
        end: Option<DateTime<FixedOffset>>,
        price: f64,
    ) -> Self {
        Self {
            start,
            end: end.unwrap_or(start + Duration::minutes(DEFAULT_SLOT_MINUTES)),
            price,
        }
    }

    pub fn contains(&self, t: DateTime<FixedOffset>) -> bool {
        self.start <= t && t < self.end
    }

    pub fn duration_hours(&self) -> f64 {
        (self.end - self.start).num_seconds().max(0) as f64 / 3600.0
    }
}

/// Forward price curve ordered by start time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(mut points: Vec<PricePoint>) -> Self {
        points.sort_by_key(|p| p.start);
        Self { points }
    }

    /// Only the points that have not ended yet.
    pub fn future(&self, now: DateTime<FixedOffset>) -> Self {
        Self {
            points: self.points.iter().filter(|p| p.end > now).copied().collect(),
        }
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point_at(&self, t: DateTime<FixedOffset>) -> Option<&PricePoint> {
        self.points.iter().find(|p| p.contains(t))
    }

    /// Highest-priced point; the earliest one wins a tie.
    pub fn peak(&self) -> Option<&PricePoint> {
        self.points.iter().fold(None, |best: Option<&PricePoint>, p| match best {
            Some(b) if b.price >= p.price => Some(b),
            _ => Some(p),
        })
    }
}
