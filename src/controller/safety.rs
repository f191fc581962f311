use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Safety event types
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SafetyEvent {
    /// SoC dropped to the emergency threshold; forced charging begins
    EmergencyEntered { soc_percent: f64, limit_percent: f64 },
    /// SoC recovered to soc_min; normal operation resumes
    EmergencyCleared { soc_percent: f64, limit_percent: f64 },
}

/// Hysteretic emergency latch.
///
/// Sets when SoC falls to `emergency_soc` and stays set until SoC has
/// climbed back to `soc_min` and strictly past `emergency_soc`, so the
/// battery cannot bounce around the emergency threshold even when both
/// thresholds coincide.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EmergencyLatch {
    active: bool,
}

impl EmergencyLatch {
    pub fn new(active: bool) -> Self {
        Self { active }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Feed one SoC sample. Returns the transition, if any.
    pub fn update(&mut self, soc: f64, emergency_soc: f64, soc_min: f64) -> Option<SafetyEvent> {
        if !self.active && soc <= emergency_soc {
            self.active = true;
            error!(
                soc_percent = soc,
                limit_percent = emergency_soc,
                "SAFETY: state of charge at emergency level, forcing charge"
            );
            return Some(SafetyEvent::EmergencyEntered {
                soc_percent: soc,
                limit_percent: emergency_soc,
            });
        }
        if self.active && soc >= soc_min && soc > emergency_soc {
            self.active = false;
            info!(soc_percent = soc, limit_percent = soc_min, "emergency charge complete");
            return Some(SafetyEvent::EmergencyCleared {
                soc_percent: soc,
                limit_percent: soc_min,
            });
        }
        None
    }
}
