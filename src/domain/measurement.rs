use serde::{Deserialize, Serialize};

/// Fresh readings taken at the start of a cycle.
///
/// Grid values are split into non-negative import and export parts even when
/// the site exposes a single signed meter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSnapshot {
    pub soc_percent: f64,
    pub pv_w: f64,
    pub grid_import_w: f64,
    pub grid_export_w: f64,
    pub price_now: Option<f64>,
}

impl MeasurementSnapshot {
    /// Build from a signed grid reading: positive is import, negative export.
    pub fn from_signed_grid(
        soc_percent: f64,
        pv_w: f64,
        grid_w: f64,
        price_now: Option<f64>,
    ) -> Self {
        Self {
            soc_percent,
            pv_w,
            grid_import_w: grid_w.max(0.0),
            grid_export_w: (-grid_w).max(0.0),
            price_now,
        }
    }

    pub fn net_grid_w(&self) -> f64 {
        self.grid_import_w - self.grid_export_w
    }
}
