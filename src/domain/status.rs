use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::{EnergyTotals, HardwareMode, OperationMode, PlanningSnapshot, PowerState};

/// Read-only view of one completed cycle, published to collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp: DateTime<FixedOffset>,
    pub operation_mode: OperationMode,
    /// Coarse status category (emergency, manual, peak_based, ...)
    pub status: String,
    /// Detailed decision reason
    pub reason: String,
    pub status_text: String,
    pub recommendation: String,
    pub power_state: PowerState,
    pub hardware_mode: HardwareMode,
    pub input_w: f64,
    pub output_w: f64,
    pub soc_percent: Option<f64>,
    pub price_now: Option<f64>,
    pub price_valid: bool,
    pub emergency_active: bool,
    pub net_grid_w: Option<f64>,
    pub ema_surplus_w: f64,
    pub ema_house_load_w: f64,
    pub real_pv_surplus: bool,
    pub planning: PlanningSnapshot,
    pub plan_reason: String,
    pub avg_charge_price: Option<f64>,
    pub trade_charged_kwh: f64,
    pub totals: EnergyTotals,
    pub details: Option<PriceDiagnostics>,
}

/// Forward price statistics, informational only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceDiagnostics {
    pub min_price: f64,
    pub max_price: f64,
    pub avg_price: f64,
    pub span: f64,
    pub dynamic_expensive: f64,
    pub effective_expensive: f64,
    pub peak_slots: usize,
    pub usable_kwh: f64,
    pub needed_kwh: f64,
    pub missing_kwh: f64,
}
