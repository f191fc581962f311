//! # Simulated Site
//!
//! A battery, PV array, house load and price feed in one place, exposed
//! through the same [`SensorStore`] and [`Actuator`] seams as Home Assistant
//! so the full engine runs without hardware.
//!
//! - **PV**: half-sine between 06:00 and 20:00 local time
//! - **House**: base load with morning and evening bumps plus optional noise
//! - **Battery**: SoC integrated from the applied setpoint between steps
//! - **Prices**: hourly curve for the next 24 h with an evening peak

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, FixedOffset, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::{json, Value};
use std::f64::consts::PI;
use std::sync::Mutex;
use tracing::debug;

use crate::config::{EntityConfig, GridMode};
use crate::domain::HardwareMode;
use crate::hardware::Actuator;
use crate::sensors::SensorStore;

pub const SOC_ENTITY: &str = "sensor.sim_battery_soc";
pub const PV_ENTITY: &str = "sensor.sim_pv_power";
pub const GRID_IMPORT_ENTITY: &str = "sensor.sim_grid_import";
pub const GRID_EXPORT_ENTITY: &str = "sensor.sim_grid_export";
pub const PRICE_NOW_ENTITY: &str = "sensor.sim_price_now";
pub const PRICE_FEED_ENTITY: &str = "sensor.sim_price_feed";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub capacity_kwh: f64,
    pub initial_soc: f64,
    pub pv_peak_w: f64,
    pub base_load_w: f64,
    /// Standard deviation-ish amplitude of the load noise (W)
    pub noise_w: f64,
    pub round_trip_efficiency: f64,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            capacity_kwh: 1.92,
            initial_soc: 50.0,
            pv_peak_w: 1600.0,
            base_load_w: 300.0,
            noise_w: 40.0,
            round_trip_efficiency: 0.92,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteReadings {
    pub soc_percent: f64,
    pub pv_w: f64,
    pub house_w: f64,
    pub grid_import_w: f64,
    pub grid_export_w: f64,
}

struct SiteState {
    soc_percent: f64,
    mode: HardwareMode,
    input_limit_w: f64,
    output_limit_w: f64,
    readings: SiteReadings,
    last_step: Option<DateTime<FixedOffset>>,
    feed: Value,
    price_now: f64,
    rng: StdRng,
}

pub struct SimulatedSite {
    cfg: SimulationConfig,
    state: Mutex<SiteState>,
}

/// PV output at a local time of day.
pub fn pv_curve(peak_w: f64, now: DateTime<FixedOffset>) -> f64 {
    let hour = now.hour() as f64 + now.minute() as f64 / 60.0;
    if !(6.0..20.0).contains(&hour) {
        return 0.0;
    }
    peak_w * (PI * (hour - 6.0) / 14.0).sin()
}

/// House load without noise.
pub fn load_curve(base_w: f64, now: DateTime<FixedOffset>) -> f64 {
    match now.hour() {
        6..=8 => base_w + 400.0,
        17..=21 => base_w + 600.0,
        _ => base_w,
    }
}

/// €/kWh for a local hour: cheap nights, moderate days, an evening peak.
pub fn price_curve(hour: u32) -> f64 {
    match hour {
        0..=5 => 0.22,
        6..=8 => 0.34,
        9..=15 => 0.28,
        16 => 0.38,
        17..=19 => 0.52,
        20..=21 => 0.40,
        _ => 0.26,
    }
}

fn price_feed(now: DateTime<FixedOffset>) -> Value {
    let start = now.duration_trunc(Duration::hours(1)).unwrap_or(now);
    let entries: Vec<Value> = (0..24)
        .map(|i| {
            let t = start + Duration::hours(i);
            json!({
                "start_time": t.to_rfc3339(),
                "end_time": (t + Duration::hours(1)).to_rfc3339(),
                "price_per_kwh": price_curve(t.hour()),
            })
        })
        .collect();
    Value::Array(entries)
}

impl SimulatedSite {
    pub fn new(cfg: SimulationConfig) -> Self {
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let soc = cfg.initial_soc.clamp(0.0, 100.0);
        Self {
            state: Mutex::new(SiteState {
                soc_percent: soc,
                mode: HardwareMode::Input,
                input_limit_w: 0.0,
                output_limit_w: 0.0,
                readings: SiteReadings {
                    soc_percent: soc,
                    pv_w: 0.0,
                    house_w: cfg.base_load_w,
                    grid_import_w: cfg.base_load_w,
                    grid_export_w: 0.0,
                },
                last_step: None,
                feed: Value::Array(Vec::new()),
                price_now: price_curve(0),
                rng,
            }),
            cfg,
        }
    }

    /// Entity layout the site answers to.
    pub fn entities() -> EntityConfig {
        EntityConfig {
            soc: SOC_ENTITY.into(),
            pv: PV_ENTITY.into(),
            grid_mode: GridMode::Split,
            grid_import: Some(GRID_IMPORT_ENTITY.into()),
            grid_export: Some(GRID_EXPORT_ENTITY.into()),
            price_now: Some(PRICE_NOW_ENTITY.into()),
            price_export: Some(PRICE_FEED_ENTITY.into()),
            ..EntityConfig::default()
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SiteState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Advance the physics to `now` and recompute the readings.
    pub fn step(&self, now: DateTime<FixedOffset>) -> SiteReadings {
        let cfg = &self.cfg;
        let mut s = self.lock();

        let dt_h = s
            .last_step
            .map(|last| (now - last).num_milliseconds().max(0) as f64 / 3_600_000.0)
            .unwrap_or(0.0);
        let (charge_w, discharge_w) = battery_flow(&s);
        let capacity_wh = cfg.capacity_kwh.max(0.01) * 1000.0;
        let eff = cfg.round_trip_efficiency.clamp(0.5, 1.0).sqrt();
        let delta_wh = charge_w * eff * dt_h - discharge_w / eff * dt_h;
        s.soc_percent = (s.soc_percent + delta_wh / capacity_wh * 100.0).clamp(0.0, 100.0);

        let (charge_w, discharge_w) = battery_flow(&s);
        let noise = if cfg.noise_w > 0.0 {
            s.rng.gen_range(-cfg.noise_w..=cfg.noise_w)
        } else {
            0.0
        };
        let pv_w = pv_curve(cfg.pv_peak_w, now).max(0.0);
        let house_w = (load_curve(cfg.base_load_w, now) + noise).max(0.0);
        let net = house_w + charge_w - pv_w - discharge_w;

        s.readings = SiteReadings {
            soc_percent: s.soc_percent,
            pv_w,
            house_w,
            grid_import_w: net.max(0.0),
            grid_export_w: (-net).max(0.0),
        };
        s.feed = price_feed(now);
        s.price_now = price_curve(now.hour());
        s.last_step = Some(now);
        debug!(
            soc_percent = s.soc_percent,
            pv_w,
            house_w,
            net_grid_w = net,
            "simulation step"
        );
        s.readings
    }

    pub fn readings(&self) -> SiteReadings {
        self.lock().readings
    }

    /// Currently applied (mode, input limit, output limit).
    pub fn setpoint(&self) -> (HardwareMode, f64, f64) {
        let s = self.lock();
        (s.mode, s.input_limit_w, s.output_limit_w)
    }
}

/// (charge W, discharge W) the battery is moving with the current setpoint.
fn battery_flow(s: &SiteState) -> (f64, f64) {
    match s.mode {
        HardwareMode::Input if s.soc_percent < 100.0 => (s.input_limit_w, 0.0),
        HardwareMode::Output if s.soc_percent > 0.0 => (0.0, s.output_limit_w),
        _ => (0.0, 0.0),
    }
}

#[async_trait]
impl SensorStore for SimulatedSite {
    async fn get(&self, entity_id: &str) -> Result<Option<String>> {
        let s = self.lock();
        let r = s.readings;
        let value = match entity_id {
            SOC_ENTITY => r.soc_percent,
            PV_ENTITY => r.pv_w,
            GRID_IMPORT_ENTITY => r.grid_import_w,
            GRID_EXPORT_ENTITY => r.grid_export_w,
            PRICE_NOW_ENTITY => s.price_now,
            _ => return Ok(None),
        };
        Ok(Some(format!("{value:.3}")))
    }

    async fn get_attribute(&self, entity_id: &str, name: &str) -> Result<Option<Value>> {
        if entity_id == PRICE_FEED_ENTITY && name == "data" {
            return Ok(Some(self.lock().feed.clone()));
        }
        Ok(None)
    }
}

#[async_trait]
impl Actuator for SimulatedSite {
    async fn select_mode(&self, mode: HardwareMode) -> Result<()> {
        self.lock().mode = mode;
        Ok(())
    }

    async fn set_power_limit(&self, mode: HardwareMode, watts: f64) -> Result<()> {
        let mut s = self.lock();
        match mode {
            HardwareMode::Input => s.input_limit_w = watts.max(0.0),
            HardwareMode::Output => s.output_limit_w = watts.max(0.0),
        }
        Ok(())
    }
}
