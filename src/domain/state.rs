use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::{HardwareMode, PlanningSnapshot, PowerState};

/// Bumped whenever a field changes meaning; older blobs go through
/// `repo::migrate_state`.
pub const STATE_VERSION: u32 = 2;

/// Everything the engine carries from one cycle to the next.
///
/// Mutated only inside a cycle and saved at its end. Every field has a
/// default so a blob written by an older build still loads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineState {
    pub power_state: PowerState,
    pub discharge_target_w: f64,
    pub emergency_active: bool,
    pub ema_surplus_w: f64,
    pub ema_house_load_w: f64,
    pub ema_updated_at: Option<DateTime<FixedOffset>>,
    pub trade: TradeState,
    pub totals: EnergyTotals,
    pub applied: AppliedSetpoint,
    pub planning: PlanningSnapshot,
    /// Consecutive real-PV-surplus detections while discharging near zero
    pub surplus_streak: u32,
    /// Consecutive cycles with the delta controller resting on its floor
    pub floor_hold_cycles: u32,
    pub last_soc: Option<f64>,
    pub last_cycle_at: Option<DateTime<FixedOffset>>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            power_state: PowerState::Idle,
            discharge_target_w: 0.0,
            emergency_active: false,
            ema_surplus_w: 0.0,
            ema_house_load_w: 0.0,
            ema_updated_at: None,
            trade: TradeState::default(),
            totals: EnergyTotals::default(),
            applied: AppliedSetpoint::default(),
            planning: PlanningSnapshot::default(),
            surplus_streak: 0,
            floor_hold_cycles: 0,
            last_soc: None,
            last_cycle_at: None,
        }
    }
}

/// Running state of the current charge/discharge cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeState {
    pub avg_charge_price: Option<f64>,
    pub charged_kwh: f64,
    pub recharge_floor: Option<RechargeFloor>,
}

/// Price remembered at a cycle boundary to stop an immediate re-charge at
/// the same or a higher price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RechargeFloor {
    pub price: f64,
    pub until: DateTime<FixedOffset>,
}

/// Lifetime counters, never reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyTotals {
    pub charged_kwh: f64,
    pub discharged_kwh: f64,
    pub profit_eur: f64,
}

/// What the actuator was last told. `None` means never written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppliedSetpoint {
    pub mode: Option<HardwareMode>,
    pub input_w: Option<f64>,
    pub output_w: Option<f64>,
    /// Set on a mode switch; the next cycle leaves the limits alone.
    pub settle_pending: bool,
}

impl AppliedSetpoint {
    /// Output power the battery is presumed to deliver right now.
    pub fn active_output_w(&self) -> f64 {
        match self.mode {
            Some(HardwareMode::Output) => self.output_w.unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Input power the battery is presumed to absorb right now.
    pub fn active_input_w(&self) -> f64 {
        match self.mode {
            Some(HardwareMode::Input) => self.input_w.unwrap_or(0.0),
            _ => 0.0,
        }
    }
}
