//! Average charge price and profit bookkeeping.

use chrono::{DateTime, Duration, FixedOffset};
use tracing::{debug, info};

use crate::domain::{EngineState, PowerState, RechargeFloor};

/// How long the re-charge floor blocks charging after a cycle ends
pub const RECHARGE_FLOOR_MINUTES: i64 = 30;
/// Δt is capped at this many ticks so a long pause books nothing absurd
pub const MAX_DT_TICKS: f64 = 5.0;
const SOC_EPSILON: f64 = 0.05;

/// Hours elapsed since the previous cycle, capped. First cycle books 0.
pub fn elapsed_hours(
    last: Option<DateTime<FixedOffset>>,
    now: DateTime<FixedOffset>,
    tick_seconds: u64,
) -> f64 {
    let Some(last) = last else {
        return 0.0;
    };
    let secs = (now - last).num_milliseconds() as f64 / 1000.0;
    let cap = MAX_DT_TICKS * tick_seconds.max(1) as f64;
    secs.clamp(0.0, cap) / 3600.0
}

/// Weighted running average of the price paid for the energy in the battery.
pub fn record_charge(state: &mut EngineState, kwh: f64, price: f64) {
    if kwh <= 0.0 {
        return;
    }
    let trade = &mut state.trade;
    let total = trade.charged_kwh + kwh;
    let avg = match trade.avg_charge_price {
        Some(avg) if trade.charged_kwh > 0.0 => (avg * trade.charged_kwh + price * kwh) / total,
        _ => price,
    };
    trade.avg_charge_price = Some(avg);
    trade.charged_kwh = total;
}

/// Book the energy moved by the setpoint that was in force since the last
/// cycle, then close the trade cycle if SoC has just reached soc_min.
///
/// Emergency charging counts towards the lifetime totals only.
pub fn account(
    state: &mut EngineState,
    soc: f64,
    soc_min: f64,
    price_now: Option<f64>,
    dt_hours: f64,
    now: DateTime<FixedOffset>,
) {
    match state.power_state {
        PowerState::Charging => {
            let kwh = state.applied.active_input_w() * dt_hours / 1000.0;
            state.totals.charged_kwh += kwh;
            if let Some(price) = price_now {
                if !state.emergency_active {
                    record_charge(state, kwh, price);
                }
            }
        }
        PowerState::Discharging => {
            let kwh = state.applied.active_output_w() * dt_hours / 1000.0;
            state.totals.discharged_kwh += kwh;
            if let (Some(price), Some(avg)) = (price_now, state.trade.avg_charge_price) {
                if price > avg {
                    state.totals.profit_eur += kwh * (price - avg);
                }
            }
        }
        PowerState::Idle => {}
    }

    let crossed = state.last_soc.is_some_and(|last| last > soc_min + SOC_EPSILON) && soc <= soc_min;
    if crossed {
        close_cycle(state, price_now, now);
    }

    if let Some(floor) = state.trade.recharge_floor {
        if now >= floor.until {
            debug!("re-charge floor expired");
            state.trade.recharge_floor = None;
        }
    }
}

fn close_cycle(state: &mut EngineState, price_now: Option<f64>, now: DateTime<FixedOffset>) {
    info!(
        avg_charge_price = ?state.trade.avg_charge_price,
        charged_kwh = state.trade.charged_kwh,
        "trade cycle closed at minimum state of charge"
    );
    state.trade.avg_charge_price = None;
    state.trade.charged_kwh = 0.0;
    state.trade.recharge_floor = price_now.map(|price| RechargeFloor {
        price,
        until: now + Duration::minutes(RECHARGE_FLOOR_MINUTES),
    });
}

/// Whether a planned charge at `price_now` is blocked by the floor.
pub fn recharge_blocked(
    state: &EngineState,
    price_now: Option<f64>,
    now: DateTime<FixedOffset>,
) -> bool {
    match state.trade.recharge_floor {
        Some(floor) if now < floor.until => match price_now {
            Some(price) => price >= floor.price,
            None => true,
        },
        _ => false,
    }
}
