//! Persistent engine state.
//!
//! The state is stored as a versioned JSON blob keyed by installation id.
//! Missing, corrupt or newer-than-known blobs load as a fresh start.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{EngineState, STATE_VERSION};

#[async_trait]
pub trait StateStore: Send + Sync {
    /// `Ok(None)` for a fresh start.
    async fn load(&self) -> Result<Option<EngineState>>;
    async fn save(&self, state: &EngineState) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredState {
    version: u32,
    state: Value,
}

/// Version 1 kept the trade fields flat at the top level.
fn migrate_v1(mut state: Map<String, Value>) -> Map<String, Value> {
    let avg = state.remove("trade_avg_charge_price");
    let kwh = state.remove("trade_charged_kwh");
    if avg.is_some() || kwh.is_some() {
        let mut trade = Map::new();
        if let Some(avg) = avg {
            trade.insert("avg_charge_price".into(), avg);
        }
        if let Some(kwh) = kwh {
            trade.insert("charged_kwh".into(), kwh);
        }
        state.insert("trade".into(), Value::Object(trade));
    }
    let mut totals = Map::new();
    for key in ["charged_kwh", "discharged_kwh", "profit_eur"] {
        if let Some(v) = state.remove(key) {
            totals.insert(key.into(), v);
        }
    }
    if !totals.is_empty() {
        state.insert("totals".into(), Value::Object(totals));
    }
    state
}

/// Bring a stored blob up to the current layout and merge it with defaults.
/// Returns `None` when the blob cannot be used.
pub fn migrate_state(raw: &str) -> Option<EngineState> {
    let stored: StoredState = match serde_json::from_str(raw) {
        Ok(stored) => stored,
        Err(e) => {
            warn!(error = %e, "stored state unreadable, starting fresh");
            return None;
        }
    };
    if stored.version > STATE_VERSION {
        warn!(
            stored = stored.version,
            supported = STATE_VERSION,
            "stored state is from a newer version, starting fresh"
        );
        return None;
    }
    let Value::Object(mut fields) = stored.state else {
        warn!("stored state is not an object, starting fresh");
        return None;
    };
    if stored.version < 2 {
        debug!(from = stored.version, "migrating stored state");
        fields = migrate_v1(fields);
    }
    match serde_json::from_value(Value::Object(fields)) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "stored state does not match layout, starting fresh");
            None
        }
    }
}

pub fn encode_state(state: &EngineState) -> Result<String> {
    let stored = StoredState {
        version: STATE_VERSION,
        state: serde_json::to_value(state)?,
    };
    Ok(serde_json::to_string_pretty(&stored)?)
}

/// `<state_dir>/<installation_id>.json`, replaced atomically on save.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(state_dir: impl AsRef<Path>, installation_id: &str) -> Self {
        Self {
            path: state_dir.as_ref().join(format!("{installation_id}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> Result<Option<EngineState>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no stored state, starting fresh");
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            }
        };
        Ok(migrate_state(&raw))
    }

    async fn save(&self, state: &EngineState) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let body = encode_state(state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

/// Keeps the encoded blob in memory; for tests and the simulation backend.
#[derive(Default)]
pub struct MemoryStateStore {
    blob: Mutex<Option<String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            blob: Mutex::new(Some(raw.into())),
        }
    }

    pub async fn raw(&self) -> Option<String> {
        self.blob.lock().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<EngineState>> {
        Ok(self.blob.lock().await.as_deref().and_then(migrate_state))
    }

    async fn save(&self, state: &EngineState) -> Result<()> {
        *self.blob.lock().await = Some(encode_state(state)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PowerState;

    #[tokio::test]
    async fn test_memory_round_trip_keeps_counters() {
        let store = MemoryStateStore::new();
        let mut state = EngineState::default();
        state.totals.profit_eur = 1.25;
        state.power_state = PowerState::Discharging;
        store.save(&state).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(state));
    }

    #[test]
    fn test_v1_blob_migrated() {
        let raw = r#"{"version":1,"state":{
            "power_state":"charging",
            "trade_avg_charge_price":0.21,
            "trade_charged_kwh":3.5,
            "profit_eur":4.0,
            "unknown_field":true
        }}"#;
        let state = migrate_state(raw).unwrap();
        assert_eq!(state.power_state, PowerState::Charging);
        assert_eq!(state.trade.avg_charge_price, Some(0.21));
        assert_eq!(state.trade.charged_kwh, 3.5);
        assert_eq!(state.totals.profit_eur, 4.0);
    }

    #[test]
    fn test_corrupt_or_newer_blob_is_fresh_start() {
        assert!(migrate_state("{not json").is_none());
        assert!(migrate_state(r#"{"version":99,"state":{}}"#).is_none());
        assert!(migrate_state(r#"{"version":2,"state":[1,2]}"#).is_none());
    }

    #[tokio::test]
    async fn test_file_store_missing_then_saved() {
        let dir = std::env::temp_dir().join(format!("smartflow-repo-{}", std::process::id()));
        let store = JsonFileStore::new(&dir, "site-a");
        let _ = tokio::fs::remove_file(store.path()).await;
        assert!(store.load().await.unwrap().is_none());

        let mut state = EngineState::default();
        state.trade.charged_kwh = 2.0;
        store.save(&state).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap().trade.charged_kwh, 2.0);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
