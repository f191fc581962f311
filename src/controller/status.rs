use chrono::{DateTime, Duration, FixedOffset};

use crate::domain::{Decision, DecisionReason, PowerState};

/// Operator-facing recommendation for a decision.
pub fn recommendation(decision: &Decision) -> &'static str {
    match (decision.power_state, decision.reason) {
        (PowerState::Charging, DecisionReason::PlannedCharge) => "planned_charge",
        (PowerState::Charging, _) => "charge",
        (PowerState::Discharging, _) => "discharge",
        (PowerState::Idle, _) => "standby",
    }
}

/// Holds the status text and recommendation steady for a while so the
/// dashboard does not flicker between neighbouring decisions. Emergency and
/// sensor faults always show immediately.
#[derive(Debug, Clone)]
pub struct StatusFreeze {
    hold: Duration,
    shown: Option<(String, String)>,
    since: Option<DateTime<FixedOffset>>,
}

impl StatusFreeze {
    pub fn new(hold_seconds: u64) -> Self {
        Self {
            hold: Duration::seconds(hold_seconds as i64),
            shown: None,
            since: None,
        }
    }

    /// Drop the held text so the next cycle shows its own immediately.
    pub fn release(&mut self) {
        self.since = None;
    }

    /// Returns the (status_text, recommendation) pair to publish.
    pub fn apply(
        &mut self,
        reason: DecisionReason,
        status_text: String,
        recommendation: String,
        now: DateTime<FixedOffset>,
    ) -> (String, String) {
        let urgent = matches!(reason, DecisionReason::Emergency | DecisionReason::SensorInvalid);
        let fresh = (status_text, recommendation);
        let held = match (&self.shown, self.since) {
            (Some(shown), Some(since)) if !urgent && now - since < self.hold => Some(shown.clone()),
            _ => None,
        };
        match held {
            Some(shown) => shown,
            None => {
                if self.shown.as_ref() != Some(&fresh) {
                    self.since = Some(now);
                }
                self.shown = Some(fresh.clone());
                fresh
            }
        }
    }
}
