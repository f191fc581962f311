use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::domain::{
    PlanAction, PlanStatus, PlanningSnapshot, PriceDiagnostics, PriceSeries, Settings,
};

/// Fewer future points than this and the curve is not trusted
pub const MIN_FUTURE_POINTS: usize = 8;
/// SoC added on top of the current level when a charge window opens
pub const CHARGE_TARGET_STEP: f64 = 30.0;
/// Weight of the price span in the dynamic expensive level
pub const DYNAMIC_SPAN_FACTOR: f64 = 0.25;

/// Outcome of one planning pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    pub action: PlanAction,
    pub status: PlanStatus,
    pub reason: String,
    pub next_peak: Option<DateTime<FixedOffset>>,
    pub latest_cheap_start: Option<DateTime<FixedOffset>>,
    pub target_soc: Option<f64>,
    /// Charge power requested with `PlanAction::Charge`
    pub charge_w: Option<f64>,
}

impl PlanResult {
    fn none(status: PlanStatus, reason: &str) -> Self {
        Self {
            action: PlanAction::None,
            status,
            reason: reason.to_string(),
            next_peak: None,
            latest_cheap_start: None,
            target_soc: None,
            charge_w: None,
        }
    }

    pub fn snapshot(&self) -> PlanningSnapshot {
        PlanningSnapshot {
            status: self.status,
            next_peak: self.next_peak,
            latest_cheap_start: self.latest_cheap_start,
            target_soc: self.target_soc,
        }
    }
}

/// Peak detection plus margin-based cheap-window search.
///
/// `prices` may contain past points; only those still running at `now`
/// are considered. The function is pure: identical inputs give identical
/// results.
pub fn plan(
    settings: &Settings,
    soc: f64,
    price_now: Option<f64>,
    prices: &PriceSeries,
    now: DateTime<FixedOffset>,
) -> PlanResult {
    let future = prices.future(now);
    if future.len() < MIN_FUTURE_POINTS || price_now.is_none() {
        return PlanResult::none(PlanStatus::NoData, "not enough price data");
    }
    let Some(peak) = future.peak().copied() else {
        return PlanResult::none(PlanStatus::NoData, "not enough price data");
    };

    if peak.price < settings.expensive_price && peak.price < settings.very_expensive_price {
        return PlanResult::none(PlanStatus::NoPeakDetected, "no price peak ahead");
    }

    if peak.price >= settings.very_expensive_price && soc > settings.soc_min {
        return PlanResult {
            action: PlanAction::Discharge,
            status: PlanStatus::PeakDischarge,
            reason: "discharge during price peak".to_string(),
            next_peak: Some(peak.start),
            latest_cheap_start: None,
            target_soc: Some(settings.soc_min),
            charge_w: None,
        };
    }

    let target_price = peak.price * (1.0 - settings.profit_margin_pct / 100.0);
    let latest_cheap = future
        .points()
        .iter()
        .filter(|p| p.end <= peak.start && p.price <= target_price)
        .max_by_key(|p| p.start)
        .copied();

    let Some(cheap) = latest_cheap else {
        return PlanResult {
            next_peak: Some(peak.start),
            ..PlanResult::none(PlanStatus::WaitingForCheapWindow, "no cheap window before peak")
        };
    };

    if cheap.contains(now) {
        PlanResult {
            action: PlanAction::Charge,
            status: PlanStatus::ChargeWindowActive,
            reason: "last cheap window before price peak".to_string(),
            next_peak: Some(peak.start),
            latest_cheap_start: Some(cheap.start),
            target_soc: Some(settings.soc_max.min(soc + CHARGE_TARGET_STEP)),
            charge_w: Some(settings.max_charge_w),
        }
    } else {
        PlanResult {
            next_peak: Some(peak.start),
            latest_cheap_start: Some(cheap.start),
            ..PlanResult::none(PlanStatus::WaitingForCheapWindow, "waiting for cheap window")
        }
    }
}

/// Forward price statistics and the energy needed to cover the expensive
/// slots. Informational only.
pub fn diagnostics(
    settings: &Settings,
    soc: f64,
    capacity_kwh: f64,
    prices: &PriceSeries,
    now: DateTime<FixedOffset>,
) -> Option<PriceDiagnostics> {
    let future = prices.future(now);
    if future.is_empty() {
        return None;
    }
    let values: Vec<f64> = future.points().iter().map(|p| p.price).collect();
    let min_price = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max_price = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg_price = values.iter().sum::<f64>() / values.len() as f64;
    let span = max_price - min_price;
    let dynamic_expensive = avg_price + DYNAMIC_SPAN_FACTOR * span;
    let effective_expensive = settings.expensive_price.max(dynamic_expensive);

    let peak_slots: Vec<_> = future
        .points()
        .iter()
        .filter(|p| p.price >= effective_expensive)
        .collect();
    let usable_kwh = capacity_kwh * (soc - settings.soc_min).max(0.0) / 100.0;
    let needed_kwh: f64 = peak_slots
        .iter()
        .map(|p| settings.max_discharge_w / 1000.0 * p.duration_hours())
        .sum();

    Some(PriceDiagnostics {
        min_price,
        max_price,
        avg_price,
        span,
        dynamic_expensive,
        effective_expensive,
        peak_slots: peak_slots.len(),
        usable_kwh,
        needed_kwh,
        missing_kwh: (needed_kwh - usable_kwh).max(0.0),
    })
}
