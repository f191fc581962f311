/// Incremental ("delta") discharge controller
///
/// Rather than computing an absolute setpoint, each cycle nudges the previous
/// output power by a bounded step derived from the residual grid import.
///
/// # Behaviour
/// - **Anti-export guard**: net export beyond the guard cuts output hard
/// - **Step up / down**: proportional to the error, with a minimum step and a cap
/// - **Deadband**: inside the band the previous value is held unchanged
/// - **Keep-alive**: near-zero import floors the output instead of snapping to 0
///
/// error = deficit - target_import
use crate::domain::ControllerGains;

/// SoC margin above soc_min below which no discharge is issued (%)
pub const SOC_MARGIN: f64 = 0.05;
/// Smallest upward step (W)
pub const MIN_STEP_UP_W: f64 = 40.0;
/// Smallest downward step (W)
pub const MIN_STEP_DOWN_W: f64 = 60.0;
/// Multiplier applied to the export when the guard cuts output
pub const EXPORT_CUT_FACTOR: f64 = 1.4;

#[derive(Debug, Clone, Copy)]
pub struct DeltaDischargeController {
    gains: ControllerGains,
}

impl DeltaDischargeController {
    pub fn new(gains: ControllerGains) -> Self {
        Self { gains }
    }

    pub fn gains(&self) -> &ControllerGains {
        &self.gains
    }

    /// Next output setpoint.
    ///
    /// # Arguments
    /// * `deficit_w` - live net grid import (negative while exporting)
    /// * `prev_w` - output setpoint issued last cycle
    /// * `max_discharge_w` - hard ceiling for this cycle
    pub fn next(
        &self,
        deficit_w: f64,
        prev_w: f64,
        max_discharge_w: f64,
        soc: f64,
        soc_min: f64,
    ) -> f64 {
        if soc <= soc_min + SOC_MARGIN {
            return 0.0;
        }
        let g = &self.gains;
        let max_w = max_discharge_w.max(0.0);
        let prev_w = prev_w.clamp(0.0, max_w);

        if deficit_w < -g.export_guard_w {
            let cut = EXPORT_CUT_FACTOR * (deficit_w.abs() + g.target_import_w);
            return (prev_w - cut).clamp(0.0, max_w);
        }

        let error = deficit_w - g.target_import_w;
        let mut next = if error > g.deadband_w {
            prev_w + g.max_step_up_w.min(MIN_STEP_UP_W.max(g.gain_up * error))
        } else if error < -g.deadband_w {
            prev_w - g.max_step_down_w.min(MIN_STEP_DOWN_W.max(g.gain_down * error.abs()))
        } else {
            prev_w
        };
        next = next.clamp(0.0, max_w);

        if prev_w > 0.0 && deficit_w < g.keepalive_deficit_w && next < g.keepalive_w {
            next = g.keepalive_w.min(max_w);
        }
        next
    }

    /// True when the controller has nothing left to do: resting at or below
    /// the keep-alive floor while the residual import sits inside the deadband.
    pub fn is_resting_on_floor(&self, output_w: f64, deficit_w: f64) -> bool {
        let g = &self.gains;
        output_w <= g.keepalive_w && (deficit_w - g.target_import_w).abs() <= g.deadband_w
    }
}
