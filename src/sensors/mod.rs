pub mod parse;
pub mod prices;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{ControlsConfig, EntityConfig, GridMode, SettingsConfig};
use crate::domain::{ManualAction, MeasurementSnapshot, OperationMode, PriceSeries, Settings};
use crate::error::{EngineError, EngineResult};

pub use parse::{parse_numeric, parse_text};
pub use prices::parse_price_feed;

/// Read access to the host's entity states.
///
/// `Ok(None)` means the entity or attribute does not exist; transport
/// failures are errors.
#[async_trait]
pub trait SensorStore: Send + Sync {
    async fn get(&self, entity_id: &str) -> Result<Option<String>>;
    async fn get_attribute(&self, entity_id: &str, name: &str) -> Result<Option<Value>>;
}

/// Operator choices for one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperatorControls {
    pub mode: OperationMode,
    pub manual_action: ManualAction,
    pub settings: Settings,
}

/// Turns raw entity states into typed cycle inputs.
pub struct SiteReader {
    entities: EntityConfig,
    controls: ControlsConfig,
    defaults: SettingsConfig,
}

impl SiteReader {
    pub fn new(entities: EntityConfig, controls: ControlsConfig, defaults: SettingsConfig) -> Self {
        Self {
            entities,
            controls,
            defaults,
        }
    }

    async fn numeric(&self, store: &dyn SensorStore, entity: &str) -> EngineResult<Option<f64>> {
        let raw = store
            .get(entity)
            .await
            .map_err(|e| EngineError::update_failed(format!("reading {entity}"), e))?;
        Ok(parse_numeric(raw.as_deref()))
    }

    async fn required(&self, store: &dyn SensorStore, entity: &str) -> EngineResult<f64> {
        self.numeric(store, entity)
            .await?
            .ok_or_else(|| EngineError::sensor_invalid(entity, "missing or not numeric"))
    }

    /// Grid meter as (import, export), zero when no meter is configured or
    /// the reading is missing.
    async fn grid(&self, store: &dyn SensorStore) -> EngineResult<(f64, f64)> {
        let e = &self.entities;
        let pair = match e.grid_mode {
            GridMode::None => (0.0, 0.0),
            GridMode::Single => {
                let w = match &e.grid_power {
                    Some(id) => self.numeric(store, id).await?,
                    None => None,
                };
                match w {
                    Some(w) => (w.max(0.0), (-w).max(0.0)),
                    None => {
                        warn!(entity = ?e.grid_power, "grid power unavailable, assuming zero");
                        (0.0, 0.0)
                    }
                }
            }
            GridMode::Split => {
                let import = match &e.grid_import {
                    Some(id) => self.numeric(store, id).await?,
                    None => None,
                };
                let export = match &e.grid_export {
                    Some(id) => self.numeric(store, id).await?,
                    None => None,
                };
                if import.is_none() || export.is_none() {
                    warn!(?import, ?export, "grid import/export unavailable, assuming zero");
                }
                (import.unwrap_or(0.0).max(0.0), export.unwrap_or(0.0).max(0.0))
            }
        };
        Ok(pair)
    }

    /// Fresh measurement. Missing SoC or PV is `SensorInvalid`.
    pub async fn read_measurement(
        &self,
        store: &dyn SensorStore,
        prices: &PriceSeries,
        now: DateTime<FixedOffset>,
    ) -> EngineResult<MeasurementSnapshot> {
        let soc = self.required(store, &self.entities.soc).await?;
        if !(0.0..=100.0).contains(&soc) {
            return Err(EngineError::sensor_invalid(
                self.entities.soc.as_str(),
                format!("state of charge {soc} out of range"),
            ));
        }
        let pv = self.required(store, &self.entities.pv).await?.max(0.0);
        let (grid_import_w, grid_export_w) = self.grid(store).await?;

        let price_entity = match &self.entities.price_now {
            Some(id) => self.numeric(store, id).await?,
            None => None,
        };
        let price_now = price_entity.or_else(|| prices.point_at(now).map(|p| p.price));

        Ok(MeasurementSnapshot {
            soc_percent: soc,
            pv_w: pv,
            grid_import_w,
            grid_export_w,
            price_now,
        })
    }

    /// Forward price curve; any failure degrades to an empty series.
    pub async fn read_prices(&self, store: &dyn SensorStore) -> PriceSeries {
        let Some(entity) = &self.entities.price_export else {
            return PriceSeries::default();
        };
        match store.get_attribute(entity, &self.entities.price_attribute).await {
            Ok(Some(value)) => parse_price_feed(&value),
            Ok(None) => {
                debug!(entity = %entity, "price feed attribute missing");
                PriceSeries::default()
            }
            Err(e) => {
                warn!(entity = %entity, error = %e, "price feed read failed");
                PriceSeries::default()
            }
        }
    }

    async fn control_value(
        &self,
        store: &dyn SensorStore,
        entity: Option<&String>,
    ) -> Option<String> {
        let entity = entity?;
        match store.get(entity).await {
            Ok(raw) => parse_text(raw.as_deref()),
            Err(e) => {
                warn!(entity = %entity, error = %e, "control read failed, using default");
                None
            }
        }
    }

    async fn setting(&self, store: &dyn SensorStore, entity: Option<&String>, default: f64) -> f64 {
        self.control_value(store, entity)
            .await
            .and_then(|s| parse_numeric(Some(s.as_str())))
            .unwrap_or(default)
    }

    /// Operator mode, manual action and thresholds, read fresh every cycle.
    pub async fn read_controls(&self, store: &dyn SensorStore) -> OperatorControls {
        let c = &self.controls;
        let d = &self.defaults;

        let mode = self
            .control_value(store, c.operation_mode.as_ref())
            .await
            .and_then(|s| s.parse::<OperationMode>().ok())
            .unwrap_or(d.operation_mode);
        let manual_action = self
            .control_value(store, c.manual_action.as_ref())
            .await
            .and_then(|s| s.parse::<ManualAction>().ok())
            .unwrap_or(d.manual_action);

        let settings = Settings {
            soc_min: self.setting(store, c.soc_min.as_ref(), d.soc_min).await,
            soc_max: self.setting(store, c.soc_max.as_ref(), d.soc_max).await,
            max_charge_w: self.setting(store, c.max_charge_w.as_ref(), d.max_charge_w).await,
            max_discharge_w: self
                .setting(store, c.max_discharge_w.as_ref(), d.max_discharge_w)
                .await,
            expensive_price: self
                .setting(store, c.expensive_price.as_ref(), d.expensive_price)
                .await,
            very_expensive_price: self
                .setting(store, c.very_expensive_price.as_ref(), d.very_expensive_price)
                .await,
            emergency_soc: self.setting(store, c.emergency_soc.as_ref(), d.emergency_soc).await,
            emergency_charge_w: self
                .setting(store, c.emergency_charge_w.as_ref(), d.emergency_charge_w)
                .await,
            profit_margin_pct: self
                .setting(store, c.profit_margin_pct.as_ref(), d.profit_margin_pct)
                .await,
            surplus_threshold_w: self
                .setting(store, c.surplus_threshold_w.as_ref(), d.surplus_threshold_w)
                .await,
        };

        OperatorControls {
            mode,
            manual_action,
            settings,
        }
    }
}
