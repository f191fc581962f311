use anyhow::{Context, Result};
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use validator::Validate;

use crate::domain::Settings;
use crate::simulation::SimulationConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub controller: ControllerConfig,
    #[serde(default)]
    pub home_assistant: HomeAssistantConfig,
    #[serde(default)]
    pub entities: EntityConfig,
    #[serde(default)]
    pub controls: ControlsConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}
impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

fn default_request_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    HomeAssistant,
    Simulation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    pub tick_seconds: u64,
    pub installation_id: String,
    pub state_dir: PathBuf,
    #[serde(default = "default_profile")]
    pub device_profile: String,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_freeze")]
    pub status_freeze_seconds: u64,
}

fn default_profile() -> String {
    "solarflow_800".to_string()
}

fn default_freeze() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HomeAssistantConfig {
    pub base_url: String,
    pub token: String,
    pub timeout_secs: u64,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8123".to_string(),
            token: String::new(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GridMode {
    /// No grid meter; house load cannot be derived
    #[default]
    None,
    /// One signed sensor, positive import, negative export
    Single,
    /// Separate import and export sensors
    Split,
}

/// Entity ids of the site's sensors and the actuator controls.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EntityConfig {
    pub soc: String,
    pub pv: String,
    pub grid_mode: GridMode,
    pub grid_power: Option<String>,
    pub grid_import: Option<String>,
    pub grid_export: Option<String>,
    pub price_now: Option<String>,
    pub price_export: Option<String>,
    pub price_attribute: String,
    pub ac_mode: String,
    pub input_limit: String,
    pub output_limit: String,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            soc: String::new(),
            pv: String::new(),
            grid_mode: GridMode::None,
            grid_power: None,
            grid_import: None,
            grid_export: None,
            price_now: None,
            price_export: None,
            price_attribute: "data".to_string(),
            ac_mode: String::new(),
            input_limit: String::new(),
            output_limit: String::new(),
        }
    }
}

/// Optional operator-control entities. Unset ones fall back to `[settings]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlsConfig {
    pub operation_mode: Option<String>,
    pub manual_action: Option<String>,
    pub soc_min: Option<String>,
    pub soc_max: Option<String>,
    pub max_charge_w: Option<String>,
    pub max_discharge_w: Option<String>,
    pub expensive_price: Option<String>,
    pub very_expensive_price: Option<String>,
    pub emergency_soc: Option<String>,
    pub emergency_charge_w: Option<String>,
    pub profit_margin_pct: Option<String>,
    pub surplus_threshold_w: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct SettingsConfig {
    #[validate(range(min = 0.0, max = 100.0))]
    pub soc_min: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub soc_max: f64,
    #[validate(range(min = 0.0))]
    pub max_charge_w: f64,
    #[validate(range(min = 0.0))]
    pub max_discharge_w: f64,
    #[validate(range(min = 0.0))]
    pub expensive_price: f64,
    #[validate(range(min = 0.0))]
    pub very_expensive_price: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub emergency_soc: f64,
    #[validate(range(min = 0.0))]
    pub emergency_charge_w: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub profit_margin_pct: f64,
    #[validate(range(min = 0.0))]
    pub surplus_threshold_w: f64,
    pub operation_mode: crate::domain::OperationMode,
    pub manual_action: crate::domain::ManualAction,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        let s = Settings::default();
        Self {
            soc_min: s.soc_min,
            soc_max: s.soc_max,
            max_charge_w: s.max_charge_w,
            max_discharge_w: s.max_discharge_w,
            expensive_price: s.expensive_price,
            very_expensive_price: s.very_expensive_price,
            emergency_soc: s.emergency_soc,
            emergency_charge_w: s.emergency_charge_w,
            profit_margin_pct: s.profit_margin_pct,
            surplus_threshold_w: s.surplus_threshold_w,
            operation_mode: Default::default(),
            manual_action: Default::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Toml::file("config/local.toml"))
            .merge(Env::prefixed("SMARTFLOW__").split("__"));
        let cfg: Self = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.settings
            .validate()
            .context("invalid [settings] section")?;
        if self.controller.tick_seconds == 0 {
            anyhow::bail!("controller.tick_seconds must be at least 1");
        }
        if self.controller.backend == Backend::HomeAssistant {
            match self.entities.grid_mode {
                GridMode::Split
                    if self.entities.grid_import.is_none() || self.entities.grid_export.is_none() =>
                {
                    anyhow::bail!(
                        "grid_mode = \"split\" needs entities.grid_import and entities.grid_export"
                    );
                }
                GridMode::Single if self.entities.grid_power.is_none() => {
                    anyhow::bail!("grid_mode = \"single\" needs entities.grid_power");
                }
                _ => {}
            }
            if self.home_assistant.token.is_empty() {
                anyhow::bail!(
                    "home_assistant.token must be set (SMARTFLOW__HOME_ASSISTANT__TOKEN)"
                );
            }
        }
        Ok(())
    }
}
