//! Ordered decision rules.
//!
//! Each rule is a pure function of the cycle context that either claims the
//! cycle with a [`Decision`] or passes. The first rule that claims wins; the
//! safety clamp is applied to whatever comes out.

use chrono::{DateTime, Duration, FixedOffset};
use tracing::debug;

use super::delta::DeltaDischargeController;
use super::signal::Signals;
use super::trade::recharge_blocked;
use crate::domain::{
    Decision, DecisionReason, EngineState, ManualAction, OperationMode, PlanAction, PowerState,
    Settings,
};
use crate::optimizer::PlanResult;

/// Smoothed house load needed before autonomous discharge starts (W)
pub const HOUSE_LOAD_FLOOR_W: f64 = 150.0;
/// Live import needed before autonomous discharge starts (W)
pub const DEFICIT_FLOOR_W: f64 = 80.0;
/// Planner discharge commits only this close to the peak
pub const PEAK_LOOKAHEAD_MINUTES: i64 = 30;
/// Reserve above soc_min kept by very-expensive forcing (%)
pub const VERY_EXPENSIVE_RESERVE: f64 = 2.0;
/// Consecutive PV-export detections needed for a soft discharge exit
pub const SURPLUS_EXIT_STREAK: u32 = 3;
/// Consecutive floor-hold cycles needed for a soft discharge exit
pub const FLOOR_EXIT_CYCLES: u32 = 6;
/// Smoothed surplus below which PV charging stops (W)
pub const SURPLUS_STOP_W: f64 = 1.0;

/// Everything a rule may look at. Built once per cycle.
pub struct RuleContext<'a> {
    pub settings: &'a Settings,
    pub mode: OperationMode,
    pub manual_action: ManualAction,
    pub soc: f64,
    pub price_now: Option<f64>,
    pub signals: &'a Signals,
    pub state: &'a EngineState,
    pub plan: &'a PlanResult,
    pub controller: &'a DeltaDischargeController,
    /// Latch value after this cycle's update
    pub emergency_active: bool,
    pub surplus_streak: u32,
    pub floor_hold_cycles: u32,
    pub now: DateTime<FixedOffset>,
}

impl RuleContext<'_> {
    /// Delta-controlled output for this cycle. A discharge that is just
    /// starting begins from the keep-alive floor.
    pub fn discharge_w(&self) -> f64 {
        let prev = if self.state.power_state == PowerState::Discharging {
            self.state.discharge_target_w
        } else {
            self.state
                .discharge_target_w
                .max(self.controller.gains().keepalive_w)
        };
        self.controller.next(
            self.signals.deficit_w(),
            prev,
            self.settings.max_discharge_w,
            self.soc,
            self.settings.soc_min,
        )
    }

    /// Low surplus at a known, moderate price: grid energy is cheap enough
    /// that the battery is better saved for later.
    pub fn cheap_winter(&self) -> bool {
        let cheap = match self.price_now {
            Some(price) => {
                price < self.settings.expensive_price
                    && self.signals.ema_surplus_w < self.settings.surplus_threshold_w
            }
            None => false,
        };
        match self.mode {
            OperationMode::Winter => cheap,
            OperationMode::Automatic => cheap && self.state.trade.avg_charge_price.is_some(),
            OperationMode::Summer | OperationMode::Manual => false,
        }
    }
}

pub type Rule = fn(&RuleContext) -> Option<Decision>;

/// Rules in priority order.
pub const RULES: [(&str, Rule); 5] = [
    ("emergency", emergency),
    ("manual", manual),
    ("planner", planner),
    ("price_forcing", price_forcing),
    ("state_machine", state_machine),
];

/// Run the rule table and the safety clamp.
pub fn decide(ctx: &RuleContext) -> Decision {
    let decision = RULES
        .iter()
        .find_map(|(name, rule)| {
            let d = rule(ctx)?;
            debug!(
                rule = *name,
                reason = %d.reason,
                input_w = d.input_w,
                output_w = d.output_w,
                "rule matched"
            );
            Some(d)
        })
        .unwrap_or_else(|| Decision::idle(DecisionReason::Idle));
    safety_clamp(ctx, decision)
}

fn emergency(ctx: &RuleContext) -> Option<Decision> {
    if !ctx.emergency_active {
        return None;
    }
    let w = ctx.settings.emergency_charge_w.min(ctx.settings.max_charge_w);
    Some(Decision::charge(w, DecisionReason::Emergency))
}

fn manual(ctx: &RuleContext) -> Option<Decision> {
    if ctx.mode != OperationMode::Manual {
        return None;
    }
    let d = match ctx.manual_action {
        ManualAction::Standby => Decision::idle(DecisionReason::Manual),
        ManualAction::Charge if ctx.soc < ctx.settings.soc_max => {
            Decision::charge(ctx.settings.max_charge_w, DecisionReason::Manual)
        }
        ManualAction::Charge => Decision::idle(DecisionReason::Manual),
        ManualAction::Discharge if ctx.soc > ctx.settings.soc_min => {
            Decision::discharge(ctx.discharge_w(), DecisionReason::Manual)
        }
        ManualAction::Discharge => Decision::idle(DecisionReason::Manual),
    };
    Some(d)
}

fn planner(ctx: &RuleContext) -> Option<Decision> {
    if !ctx.mode.uses_prices() {
        return None;
    }
    let plan = ctx.plan;
    match plan.action {
        PlanAction::Charge => {
            let target = plan.target_soc.unwrap_or(ctx.settings.soc_max);
            if ctx.soc >= target {
                return None;
            }
            if recharge_blocked(ctx.state, ctx.price_now, ctx.now) {
                debug!(price_now = ?ctx.price_now, "planned charge blocked by re-charge floor");
                return None;
            }
            let w = plan
                .charge_w
                .unwrap_or(ctx.settings.max_charge_w)
                .min(ctx.settings.max_charge_w);
            Some(Decision::charge(w, DecisionReason::PlannedCharge))
        }
        PlanAction::Discharge => {
            let peak = plan.next_peak?;
            let near = ctx.now >= peak - Duration::minutes(PEAK_LOOKAHEAD_MINUTES);
            if near && ctx.soc > ctx.settings.soc_min {
                Some(Decision::discharge(ctx.discharge_w(), DecisionReason::PeakDischarge))
            } else {
                None
            }
        }
        PlanAction::None => None,
    }
}

fn price_forcing(ctx: &RuleContext) -> Option<Decision> {
    if !ctx.mode.uses_prices() {
        return None;
    }
    let price = ctx.price_now?;
    let s = ctx.settings;
    if price >= s.very_expensive_price && ctx.soc > s.soc_min + VERY_EXPENSIVE_RESERVE {
        return Some(Decision::discharge(ctx.discharge_w(), DecisionReason::VeryExpensive));
    }
    let above_avg = ctx.state.trade.avg_charge_price.map_or(true, |avg| price > avg);
    if price >= s.expensive_price
        && ctx.state.power_state == PowerState::Idle
        && ctx.signals.deficit_w() > 0.0
        && above_avg
        && ctx.soc > s.soc_min
    {
        return Some(Decision::discharge(ctx.discharge_w(), DecisionReason::ProfitDischarge));
    }
    None
}

fn state_machine(ctx: &RuleContext) -> Option<Decision> {
    let s = ctx.settings;
    let sig = ctx.signals;
    let d = match ctx.state.power_state {
        PowerState::Idle => {
            if sig.ema_house_load_w > HOUSE_LOAD_FLOOR_W
                && sig.deficit_w() > DEFICIT_FLOOR_W
                && ctx.soc > s.soc_min
                && !ctx.cheap_winter()
            {
                Decision::discharge(ctx.discharge_w(), DecisionReason::Autarky)
            } else if sig.real_pv_surplus
                && ctx.soc < s.soc_max
                && ctx.state.discharge_target_w <= 0.0
            {
                Decision::charge(s.max_charge_w.min(sig.ema_surplus_w), DecisionReason::PvSurplus)
            } else {
                Decision::idle(DecisionReason::Idle)
            }
        }
        PowerState::Discharging => {
            let exit = sig.ema_house_load_w < HOUSE_LOAD_FLOOR_W
                || ctx.soc <= s.soc_min
                || ctx.surplus_streak >= SURPLUS_EXIT_STREAK
                || ctx.floor_hold_cycles >= FLOOR_EXIT_CYCLES;
            if exit {
                debug!(
                    ema_house_load_w = sig.ema_house_load_w,
                    surplus_streak = ctx.surplus_streak,
                    floor_hold_cycles = ctx.floor_hold_cycles,
                    "leaving discharge"
                );
                Decision::idle(DecisionReason::Idle)
            } else {
                Decision::discharge(ctx.discharge_w(), DecisionReason::Autarky)
            }
        }
        PowerState::Charging => {
            if ctx.soc >= s.soc_max || sig.ema_surplus_w < SURPLUS_STOP_W {
                Decision::idle(DecisionReason::Idle)
            } else {
                Decision::charge(s.max_charge_w.min(sig.ema_surplus_w), DecisionReason::PvSurplus)
            }
        }
    };
    Some(d)
}

/// Never discharge at or below soc_min.
pub fn safety_clamp(ctx: &RuleContext, decision: Decision) -> Decision {
    if decision.power_state == PowerState::Discharging && ctx.soc <= ctx.settings.soc_min {
        return Decision::idle(DecisionReason::SafetyClamp);
    }
    decision
}

/// Hysteresis counters for the soft discharge exit, advanced by one cycle.
pub fn advance_counters(
    state: &EngineState,
    signals: &Signals,
    controller: &DeltaDischargeController,
) -> (u32, u32) {
    if state.power_state != PowerState::Discharging {
        return (0, 0);
    }
    let near_zero = state.discharge_target_w <= controller.gains().keepalive_w;
    let streak = if near_zero && signals.pv_export_seen {
        state.surplus_streak + 1
    } else {
        0
    };
    let hold = if controller.is_resting_on_floor(state.discharge_target_w, signals.deficit_w()) {
        state.floor_hold_cycles + 1
    } else {
        0
    };
    (streak, hold)
}
