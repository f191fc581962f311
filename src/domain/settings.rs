use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::warn;

/// Operator-owned thresholds, re-read every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Lowest SoC the battery may be discharged to (%)
    pub soc_min: f64,
    /// Highest SoC the battery may be charged to (%)
    pub soc_max: f64,
    pub max_charge_w: f64,
    pub max_discharge_w: f64,
    /// Price-now at or above which discharging becomes profitable (€/kWh)
    pub expensive_price: f64,
    /// Price-now at or above which discharging is forced (€/kWh)
    pub very_expensive_price: f64,
    /// SoC at or below which the emergency latch engages (%)
    pub emergency_soc: f64,
    pub emergency_charge_w: f64,
    /// Required spread between a charge window and the peak it feeds (%)
    pub profit_margin_pct: f64,
    /// Smoothed surplus below which a cheap-winter condition may hold (W)
    pub surplus_threshold_w: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            soc_min: 12.0,
            soc_max: 100.0,
            max_charge_w: 2000.0,
            max_discharge_w: 700.0,
            expensive_price: 0.35,
            very_expensive_price: 0.49,
            emergency_soc: 8.0,
            emergency_charge_w: 300.0,
            profit_margin_pct: 20.0,
            surplus_threshold_w: 100.0,
        }
    }
}

impl Settings {
    /// Clamp every field to what the hardware can do and restore the
    /// `soc_min < soc_max` invariant.
    pub fn sanitized(self, profile: &DeviceProfile) -> Self {
        let mut s = self;
        s.soc_min = s.soc_min.clamp(0.0, 100.0);
        s.soc_max = s.soc_max.clamp(0.0, 100.0);
        if s.soc_min >= s.soc_max {
            warn!(
                soc_min = s.soc_min,
                soc_max = s.soc_max,
                "soc_min must be below soc_max, falling back to profile defaults"
            );
            s.soc_min = profile.default_soc_min;
            s.soc_max = profile.default_soc_max;
        }
        s.emergency_soc = s.emergency_soc.clamp(0.0, s.soc_min);
        s.max_charge_w = s.max_charge_w.clamp(0.0, profile.max_input_w);
        s.max_discharge_w = s.max_discharge_w.clamp(0.0, profile.max_output_w);
        s.emergency_charge_w = s.emergency_charge_w.clamp(0.0, s.max_charge_w);
        s.profit_margin_pct = s.profit_margin_pct.clamp(0.0, 100.0);
        s.expensive_price = s.expensive_price.max(0.0);
        s.very_expensive_price = s.very_expensive_price.max(0.0);
        s.surplus_threshold_w = s.surplus_threshold_w.max(0.0);
        s
    }
}

/// Static per-hardware-class limits and delta controller gains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub name: String,
    pub max_input_w: f64,
    pub max_output_w: f64,
    pub capacity_kwh: f64,
    pub default_soc_min: f64,
    pub default_soc_max: f64,
    pub gains: ControllerGains,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControllerGains {
    /// No adjustment while |error| stays within this band (W)
    pub deadband_w: f64,
    /// Residual grid import deliberately left uncovered (W)
    pub target_import_w: f64,
    /// Net export beyond which the anti-export cut takes over (W)
    pub export_guard_w: f64,
    pub max_step_up_w: f64,
    pub max_step_down_w: f64,
    pub gain_up: f64,
    pub gain_down: f64,
    /// Minimum output held while the controller is active (W)
    pub keepalive_w: f64,
    /// Import below which the keep-alive floor applies (W)
    pub keepalive_deficit_w: f64,
}

impl Default for ControllerGains {
    fn default() -> Self {
        Self {
            deadband_w: 40.0,
            target_import_w: 35.0,
            export_guard_w: 40.0,
            max_step_up_w: 500.0,
            max_step_down_w: 800.0,
            gain_up: 0.55,
            gain_down: 0.7,
            keepalive_w: 30.0,
            keepalive_deficit_w: 15.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum ProfileKind {
    #[strum(serialize = "solarflow_800")]
    #[serde(rename = "solarflow_800")]
    Solarflow800,
    #[strum(serialize = "solarflow_2400_ac")]
    #[serde(rename = "solarflow_2400_ac")]
    Solarflow2400Ac,
    #[strum(serialize = "hyper_2000")]
    #[serde(rename = "hyper_2000")]
    Hyper2000,
}

impl DeviceProfile {
    pub fn solarflow_800() -> Self {
        Self {
            name: ProfileKind::Solarflow800.to_string(),
            max_input_w: 1200.0,
            max_output_w: 800.0,
            capacity_kwh: 1.92,
            default_soc_min: 12.0,
            default_soc_max: 100.0,
            gains: ControllerGains::default(),
        }
    }

    pub fn solarflow_2400_ac() -> Self {
        Self {
            name: ProfileKind::Solarflow2400Ac.to_string(),
            max_input_w: 2400.0,
            max_output_w: 2400.0,
            capacity_kwh: 2.88,
            default_soc_min: 10.0,
            default_soc_max: 100.0,
            gains: ControllerGains {
                max_step_up_w: 800.0,
                max_step_down_w: 1200.0,
                ..ControllerGains::default()
            },
        }
    }

    pub fn hyper_2000() -> Self {
        Self {
            name: ProfileKind::Hyper2000.to_string(),
            max_input_w: 1200.0,
            max_output_w: 1200.0,
            capacity_kwh: 1.92,
            default_soc_min: 10.0,
            default_soc_max: 100.0,
            gains: ControllerGains::default(),
        }
    }

    pub fn for_kind(kind: ProfileKind) -> Self {
        match kind {
            ProfileKind::Solarflow800 => Self::solarflow_800(),
            ProfileKind::Solarflow2400Ac => Self::solarflow_2400_ac(),
            ProfileKind::Hyper2000 => Self::hyper_2000(),
        }
    }

    /// Resolve a configured profile name, defaulting to the smallest device.
    pub fn by_name(name: &str) -> Self {
        match name.parse::<ProfileKind>() {
            Ok(kind) => Self::for_kind(kind),
            Err(_) => {
                warn!(profile = name, "unknown device profile, using solarflow_800");
                Self::solarflow_800()
            }
        }
    }
}
