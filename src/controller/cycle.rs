//! One control cycle as a pure function of inputs and engine state.

use chrono::{DateTime, FixedOffset};
use tracing::debug;

use super::delta::DeltaDischargeController;
use super::rules::{advance_counters, decide, RuleContext};
use super::safety::{EmergencyLatch, SafetyEvent};
use super::signal::{self, Signals};
use super::status::{recommendation, StatusFreeze};
use super::trade;
use crate::domain::{
    Decision, DeviceProfile, EngineState, MeasurementSnapshot, PlanStatus, PowerState,
    PriceDiagnostics,
    PriceSeries, Settings, StatusSnapshot,
};
use crate::error::EngineError;
use crate::optimizer::{self, PlanResult};
use crate::sensors::OperatorControls;

pub struct CycleInput<'a> {
    pub measurement: &'a MeasurementSnapshot,
    pub prices: &'a PriceSeries,
    pub controls: &'a OperatorControls,
    pub profile: &'a DeviceProfile,
    pub tick_seconds: u64,
    pub now: DateTime<FixedOffset>,
}

#[derive(Debug)]
pub struct CycleOutcome {
    pub decision: Decision,
    pub settings: Settings,
    pub signals: Signals,
    pub plan: PlanResult,
    pub diagnostics: Option<PriceDiagnostics>,
    /// Emergency latch transition taken this cycle
    pub safety_event: Option<SafetyEvent>,
    /// Degraded-but-handled conditions met during the cycle
    pub degraded: Vec<EngineError>,
}

/// Evaluate one cycle and advance `state`. Performs no I/O.
pub fn evaluate(input: &CycleInput, state: &mut EngineState) -> CycleOutcome {
    let m = input.measurement;
    let now = input.now;
    let soc = m.soc_percent;
    let settings = input.controls.settings.sanitized(input.profile);
    let mode = input.controls.mode;
    let mut degraded = Vec::new();

    let signals = signal::condition(m, state, now);

    let dt_hours = trade::elapsed_hours(state.last_cycle_at, now, input.tick_seconds);
    trade::account(state, soc, settings.soc_min, m.price_now, dt_hours, now);

    let mut latch = EmergencyLatch::new(state.emergency_active);
    let safety_event = latch.update(soc, settings.emergency_soc, settings.soc_min);

    let plan = optimizer::plan(&settings, soc, m.price_now, input.prices, now);
    let diagnostics =
        optimizer::diagnostics(&settings, soc, input.profile.capacity_kwh, input.prices, now);
    if mode.uses_prices() {
        if m.price_now.is_none() {
            degraded.push(EngineError::PriceUnavailable(
                "no current price, using PV rules only".into(),
            ));
        }
        if plan.status == PlanStatus::NoData {
            degraded.push(EngineError::PlanningDataInsufficient(plan.reason.clone()));
        }
    }

    let controller = DeltaDischargeController::new(input.profile.gains);
    let (surplus_streak, floor_hold_cycles) = advance_counters(state, &signals, &controller);

    let decision = {
        let ctx = RuleContext {
            settings: &settings,
            mode,
            manual_action: input.controls.manual_action,
            soc,
            price_now: m.price_now,
            signals: &signals,
            state: &*state,
            plan: &plan,
            controller: &controller,
            emergency_active: latch.is_active(),
            surplus_streak,
            floor_hold_cycles,
            now,
        };
        decide(&ctx)
    };

    let discharging = decision.power_state == PowerState::Discharging;
    state.power_state = decision.power_state;
    state.discharge_target_w = if discharging {
        decision.output_w.clamp(0.0, settings.max_discharge_w)
    } else {
        0.0
    };
    state.emergency_active = latch.is_active();
    state.surplus_streak = if discharging { surplus_streak } else { 0 };
    state.floor_hold_cycles = if discharging { floor_hold_cycles } else { 0 };
    state.planning = plan.snapshot();
    signal::store(&signals, state, now);
    state.last_soc = Some(soc);
    state.last_cycle_at = Some(now);

    debug!(
        plan_status = %plan.status,
        surplus_streak,
        floor_hold_cycles,
        emergency_active = state.emergency_active,
        "cycle evaluated"
    );

    CycleOutcome {
        decision,
        settings,
        signals,
        plan,
        diagnostics,
        safety_event,
        degraded,
    }
}

/// Status category; an idle price-rule cycle without a price says so.
fn status_category(
    outcome: &CycleOutcome,
    m: &MeasurementSnapshot,
    controls: &OperatorControls,
) -> String {
    let category = outcome.decision.reason.category();
    if category == "idle" && m.price_now.is_none() && controls.mode.uses_prices() {
        return "price_invalid".to_string();
    }
    category.to_string()
}

/// Snapshot of a completed cycle for collaborators.
pub fn snapshot(
    outcome: &CycleOutcome,
    input: &CycleInput,
    state: &EngineState,
    freeze: &mut StatusFreeze,
) -> StatusSnapshot {
    let d = &outcome.decision;
    let m = input.measurement;
    if let Some(event) = outcome.safety_event {
        debug!(?event, "latch transition, status text released");
        freeze.release();
    }
    let (status_text, recommendation) = freeze.apply(
        d.reason,
        d.reason.describe().to_string(),
        recommendation(d).to_string(),
        input.now,
    );
    StatusSnapshot {
        timestamp: input.now,
        operation_mode: input.controls.mode,
        status: status_category(outcome, m, input.controls),
        reason: d.reason.to_string(),
        status_text,
        recommendation,
        power_state: d.power_state,
        hardware_mode: d.mode,
        input_w: d.input_w,
        output_w: d.output_w,
        soc_percent: Some(m.soc_percent),
        price_now: m.price_now,
        price_valid: m.price_now.is_some(),
        emergency_active: state.emergency_active,
        net_grid_w: Some(outcome.signals.net_grid_w),
        ema_surplus_w: outcome.signals.ema_surplus_w,
        ema_house_load_w: outcome.signals.ema_house_load_w,
        real_pv_surplus: outcome.signals.real_pv_surplus,
        planning: state.planning,
        plan_reason: outcome.plan.reason.clone(),
        avg_charge_price: state.trade.avg_charge_price,
        trade_charged_kwh: state.trade.charged_kwh,
        totals: state.totals,
        details: outcome.diagnostics,
    }
}

/// Snapshot for a cycle that could not read its required sensors. Counters
/// come from the persisted state; nothing was decided.
pub fn degraded_snapshot(
    state: &EngineState,
    mode: crate::domain::OperationMode,
    now: DateTime<FixedOffset>,
    freeze: &mut StatusFreeze,
) -> StatusSnapshot {
    let reason = crate::domain::DecisionReason::SensorInvalid;
    let (status_text, recommendation) =
        freeze.apply(reason, reason.describe().to_string(), "standby".to_string(), now);
    let applied = state.applied;
    StatusSnapshot {
        timestamp: now,
        operation_mode: mode,
        status: reason.category().to_string(),
        reason: reason.to_string(),
        status_text,
        recommendation,
        power_state: state.power_state,
        hardware_mode: applied.mode.unwrap_or_default(),
        input_w: applied.active_input_w(),
        output_w: applied.active_output_w(),
        soc_percent: None,
        price_now: None,
        price_valid: false,
        emergency_active: state.emergency_active,
        net_grid_w: None,
        ema_surplus_w: state.ema_surplus_w,
        ema_house_load_w: state.ema_house_load_w,
        real_pv_surplus: false,
        planning: state.planning,
        plan_reason: String::new(),
        avg_charge_price: state.trade.avg_charge_price,
        trade_charged_kwh: state.trade.charged_kwh,
        totals: state.totals,
        details: None,
    }
}
