//! Signal conditioning: raw meter readings to smoothed surplus and house load.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::domain::{EngineState, MeasurementSnapshot, PowerState};

/// EMA time constant (s)
pub const EMA_TAU_S: f64 = 45.0;
/// Raw export required before surplus is believed to come from PV (W)
pub const PV_SURPLUS_MIN_EXPORT_W: f64 = 80.0;
/// PV must exceed the raw export by this margin (W)
pub const PV_SURPLUS_MARGIN_W: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signals {
    /// import - export; positive means the house draws from the grid
    pub net_grid_w: f64,
    pub house_load_raw_w: f64,
    pub surplus_raw_w: f64,
    pub ema_house_load_w: f64,
    pub ema_surplus_w: f64,
    /// Export that PV clearly accounts for, regardless of battery state
    pub pv_export_seen: bool,
    /// `pv_export_seen` while the battery is not discharging
    pub real_pv_surplus: bool,
}

impl Signals {
    /// Live import the battery would have to cover.
    pub fn deficit_w(&self) -> f64 {
        self.net_grid_w
    }
}

/// EMA weight for a sample `dt_s` seconds after the previous one.
pub fn ema_alpha(dt_s: Option<f64>) -> f64 {
    match dt_s {
        None => 1.0,
        Some(dt) if dt <= 0.0 => 0.0,
        Some(dt) => dt / (EMA_TAU_S + dt),
    }
}

fn smooth(prev: f64, sample: f64, alpha: f64) -> f64 {
    prev + alpha * (sample - prev)
}

/// Condition one measurement against the previous cycle's state.
///
/// Discharge power currently applied is added back to PV when estimating
/// house load, and charge power already absorbed counts towards surplus.
pub fn condition(
    m: &MeasurementSnapshot,
    state: &EngineState,
    now: DateTime<FixedOffset>,
) -> Signals {
    let applied_out = state.applied.active_output_w();
    let applied_in = state.applied.active_input_w();

    let net_grid_w = m.net_grid_w();
    let eigen_w = (m.pv_w + applied_out - m.grid_export_w).max(0.0);
    let house_load_raw_w = (m.grid_import_w + eigen_w).max(0.0);
    let surplus_raw_w = (m.grid_export_w + applied_in - m.grid_import_w).max(0.0);

    let dt_s = state
        .ema_updated_at
        .map(|t| (now - t).num_milliseconds() as f64 / 1000.0);
    let alpha = ema_alpha(dt_s);

    let ema_house_load_w = smooth(state.ema_house_load_w, house_load_raw_w, alpha);
    let ema_surplus_w = smooth(state.ema_surplus_w, surplus_raw_w, alpha);

    let pv_export_seen =
        m.grid_export_w > PV_SURPLUS_MIN_EXPORT_W && m.pv_w - m.grid_export_w > PV_SURPLUS_MARGIN_W;
    let real_pv_surplus = pv_export_seen && state.power_state != PowerState::Discharging;

    Signals {
        net_grid_w,
        house_load_raw_w,
        surplus_raw_w,
        ema_house_load_w,
        ema_surplus_w,
        pv_export_seen,
        real_pv_surplus,
    }
}

/// Carry the smoothed values into the state for the next cycle.
pub fn store(signals: &Signals, state: &mut EngineState, now: DateTime<FixedOffset>) {
    state.ema_house_load_w = signals.ema_house_load_w;
    state.ema_surplus_w = signals.ema_surplus_w;
    state.ema_updated_at = Some(now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AppliedSetpoint, HardwareMode};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2025, 6, 1, 12, 0, 0)
            .unwrap()
    }

    fn m(pv: f64, import: f64, export: f64) -> MeasurementSnapshot {
        MeasurementSnapshot {
            soc_percent: 50.0,
            pv_w: pv,
            grid_import_w: import,
            grid_export_w: export,
            price_now: None,
        }
    }

    #[test]
    fn test_first_sample_taken_verbatim() {
        let s = condition(&m(2000.0, 0.0, 1700.0), &EngineState::default(), t0());
        assert_eq!(s.house_load_raw_w, 300.0);
        assert_eq!(s.ema_house_load_w, 300.0);
        assert_eq!(s.ema_surplus_w, 1700.0);
        assert!(s.real_pv_surplus);
    }

    #[test]
    fn test_ema_weight_follows_elapsed_time() {
        let mut state = EngineState::default();
        let first = condition(&m(0.0, 400.0, 0.0), &state, t0());
        store(&first, &mut state, t0());

        let later = t0() + Duration::seconds(45);
        let second = condition(&m(0.0, 800.0, 0.0), &state, later);
        // alpha = 45 / (45 + 45) = 0.5
        assert!((second.ema_house_load_w - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_discharge_power_counts_as_house_load() {
        let state = EngineState {
            power_state: PowerState::Discharging,
            applied: AppliedSetpoint {
                mode: Some(HardwareMode::Output),
                output_w: Some(350.0),
                ..AppliedSetpoint::default()
            },
            ..EngineState::default()
        };
        let s = condition(&m(0.0, 50.0, 0.0), &state, t0());
        assert_eq!(s.house_load_raw_w, 400.0);
    }

    #[test]
    fn test_battery_export_is_not_pv_surplus() {
        let state = EngineState {
            power_state: PowerState::Discharging,
            ..EngineState::default()
        };
        let s = condition(&m(600.0, 0.0, 200.0), &state, t0());
        assert!(!s.real_pv_surplus);
        assert!(s.pv_export_seen);

        // export nearly equal to PV means the battery is pushing it out
        let s = condition(&m(230.0, 0.0, 200.0), &EngineState::default(), t0());
        assert!(!s.real_pv_surplus);
    }

    #[test]
    fn test_active_charge_keeps_surplus() {
        let state = EngineState {
            power_state: PowerState::Charging,
            applied: AppliedSetpoint {
                mode: Some(HardwareMode::Input),
                input_w: Some(1000.0),
                ..AppliedSetpoint::default()
            },
            ..EngineState::default()
        };
        let s = condition(&m(1500.0, 0.0, 200.0), &state, t0());
        assert_eq!(s.surplus_raw_w, 1200.0);
    }

    #[test]
    fn test_alpha_edges() {
        assert_eq!(ema_alpha(None), 1.0);
        assert_eq!(ema_alpha(Some(0.0)), 0.0);
        assert!((ema_alpha(Some(10.0)) - 10.0 / 55.0).abs() < 1e-12);
    }
}
