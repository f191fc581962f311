use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Engine power state. Charging maps to input mode, discharging to output mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    #[default]
    Idle,
    Charging,
    Discharging,
}

/// Actuator operating mode as exposed by the AC mode selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HardwareMode {
    #[default]
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    #[default]
    Automatic,
    /// PV autarky only, price rules disabled
    Summer,
    /// Price priority, battery saved for expensive hours
    Winter,
    Manual,
}

impl OperationMode {
    pub fn uses_prices(&self) -> bool {
        matches!(self, OperationMode::Automatic | OperationMode::Winter)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum ManualAction {
    #[default]
    Standby,
    Charge,
    Discharge,
}

/// Why a cycle ended in the decision it did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    SensorInvalid,
    Emergency,
    Manual,
    PlannedCharge,
    PeakDischarge,
    VeryExpensive,
    ProfitDischarge,
    PvSurplus,
    Autarky,
    SafetyClamp,
    #[default]
    Idle,
}

impl DecisionReason {
    /// Coarse category shown to operators.
    pub fn category(&self) -> &'static str {
        match self {
            DecisionReason::SensorInvalid => "sensor_invalid",
            DecisionReason::Emergency => "emergency",
            DecisionReason::Manual => "manual",
            DecisionReason::PlannedCharge
            | DecisionReason::PeakDischarge
            | DecisionReason::VeryExpensive => "peak_based",
            DecisionReason::ProfitDischarge => "profit_based",
            DecisionReason::PvSurplus | DecisionReason::Autarky => "autarky",
            DecisionReason::SafetyClamp | DecisionReason::Idle => "idle",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            DecisionReason::SensorInvalid => "required sensor unavailable, holding last setpoints",
            DecisionReason::Emergency => "state of charge critically low, emergency charging",
            DecisionReason::Manual => "manual action selected by operator",
            DecisionReason::PlannedCharge => {
                "charging in the last cheap window before a price peak"
            }
            DecisionReason::PeakDischarge => "discharging during predicted price peak",
            DecisionReason::VeryExpensive => {
                "price very expensive, covering house load from battery"
            }
            DecisionReason::ProfitDischarge => {
                "price above average charge price, discharging for profit"
            }
            DecisionReason::PvSurplus => "charging from PV surplus",
            DecisionReason::Autarky => "covering house load from battery",
            DecisionReason::SafetyClamp => "discharge blocked at minimum state of charge",
            DecisionReason::Idle => "no action required",
        }
    }
}

/// One cycle's outcome: exclusive input or output power.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub power_state: PowerState,
    pub mode: HardwareMode,
    pub input_w: f64,
    pub output_w: f64,
    pub reason: DecisionReason,
}

impl Decision {
    pub fn idle(reason: DecisionReason) -> Self {
        Self {
            power_state: PowerState::Idle,
            mode: HardwareMode::Input,
            input_w: 0.0,
            output_w: 0.0,
            reason,
        }
    }

    pub fn charge(input_w: f64, reason: DecisionReason) -> Self {
        Self {
            power_state: PowerState::Charging,
            mode: HardwareMode::Input,
            input_w: input_w.max(0.0),
            output_w: 0.0,
            reason,
        }
    }

    pub fn discharge(output_w: f64, reason: DecisionReason) -> Self {
        Self {
            power_state: PowerState::Discharging,
            mode: HardwareMode::Output,
            input_w: 0.0,
            output_w: output_w.max(0.0),
            reason,
        }
    }
}
