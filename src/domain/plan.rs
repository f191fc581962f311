use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Charge,
    Discharge,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    NoData,
    NoPeakDetected,
    PeakDischarge,
    ChargeWindowActive,
    WaitingForCheapWindow,
}

/// The part of a planner result that is persisted and shown to operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningSnapshot {
    pub status: PlanStatus,
    pub next_peak: Option<DateTime<FixedOffset>>,
    pub latest_cheap_start: Option<DateTime<FixedOffset>>,
    pub target_soc: Option<f64>,
}
