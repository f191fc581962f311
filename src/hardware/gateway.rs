//! # Hardware Setpoint Gateway
//!
//! Applies one decision per cycle to the actuator:
//! - the mode is written only when it changes
//! - a limit is written only when it moved by more than [`LIMIT_TOLERANCE_W`]
//!   (a drop to exactly 0 is always written)
//! - switching to input zeroes the output limit first, and does not switch
//!   at all if that write fails; switching to output
//!   re-asserts the output limit right after the mode
//! - the cycle after a mode switch leaves the limits alone
//!
//! Actuator failures are logged and leave the remembered setpoint untouched,
//! so the next cycle tries again.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::Actuator;
use crate::domain::{AppliedSetpoint, Decision, HardwareMode};

/// Limit changes at or below this are not written (W)
pub const LIMIT_TOLERANCE_W: f64 = 25.0;

pub struct SetpointGateway {
    actuator: Arc<dyn Actuator>,
}

fn needs_write(last: Option<f64>, target: f64) -> bool {
    match last {
        None => true,
        Some(last) => (target - last).abs() > LIMIT_TOLERANCE_W || (target == 0.0 && last != 0.0),
    }
}

impl SetpointGateway {
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self { actuator }
    }

    async fn write_limit(
        &self,
        mode: HardwareMode,
        watts: f64,
        applied: &mut AppliedSetpoint,
    ) -> bool {
        match self.actuator.set_power_limit(mode, watts).await {
            Ok(()) => {
                debug!(%mode, watts, "power limit written");
                match mode {
                    HardwareMode::Input => applied.input_w = Some(watts),
                    HardwareMode::Output => applied.output_w = Some(watts),
                }
                true
            }
            Err(e) => {
                warn!(%mode, watts, error = %e, "power limit write failed");
                false
            }
        }
    }

    async fn write_mode(&self, mode: HardwareMode, applied: &mut AppliedSetpoint) -> bool {
        match self.actuator.select_mode(mode).await {
            Ok(()) => {
                info!(from = ?applied.mode, to = %mode, "hardware mode switched");
                applied.mode = Some(mode);
                true
            }
            Err(e) => {
                warn!(%mode, error = %e, "mode switch failed");
                false
            }
        }
    }

    /// Push `decision` to the actuator, updating `applied` with what was
    /// actually written.
    pub async fn apply(&self, decision: &Decision, applied: &mut AppliedSetpoint) {
        if applied.mode != Some(decision.mode) {
            let switched = match decision.mode {
                HardwareMode::Input => {
                    if applied.output_w != Some(0.0)
                        && !self.write_limit(HardwareMode::Output, 0.0, applied).await
                    {
                        warn!("output limit not zeroed, mode switch postponed");
                        return;
                    }
                    let switched = self.write_mode(HardwareMode::Input, applied).await;
                    if switched {
                        self.write_limit(HardwareMode::Input, decision.input_w, applied).await;
                    }
                    switched
                }
                HardwareMode::Output => {
                    let switched = self.write_mode(HardwareMode::Output, applied).await;
                    if switched {
                        self.write_limit(HardwareMode::Output, decision.output_w, applied).await;
                    }
                    switched
                }
            };
            applied.settle_pending = switched;
            return;
        }

        if applied.settle_pending {
            debug!("mode switch settling, limits left unchanged");
            applied.settle_pending = false;
            return;
        }

        let (target, last) = match decision.mode {
            HardwareMode::Input => (decision.input_w, applied.input_w),
            HardwareMode::Output => (decision.output_w, applied.output_w),
        };
        if needs_write(last, target) {
            self.write_limit(decision.mode, target, applied).await;
        }
    }
}
