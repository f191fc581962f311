pub mod cycle;
pub mod delta;
pub mod rules;
pub mod safety;
pub mod signal;
pub mod status;
pub mod trade;

use chrono::{DateTime, FixedOffset, Local};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::domain::{DeviceProfile, EngineState, OperationMode, StatusSnapshot};
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::hardware::{Actuator, SetpointGateway};
use crate::repo::StateStore;
use crate::sensors::{SensorStore, SiteReader};

pub use cycle::{evaluate, CycleInput, CycleOutcome};
pub use delta::DeltaDischargeController;
pub use safety::EmergencyLatch;
pub use status::StatusFreeze;

/// Health of the last cycle, served next to the snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleHealth {
    pub last_cycle_ok: bool,
    pub last_cycle_at: Option<DateTime<FixedOffset>>,
    pub last_error: Option<String>,
    pub cycles: u64,
    pub failed_cycles: u64,
}

#[derive(Debug, Default)]
struct Published {
    snapshot: Option<StatusSnapshot>,
    health: CycleHealth,
}

/// Read side of the engine: the most recent completed snapshot. Never
/// exposes a cycle in progress.
#[derive(Clone, Default)]
pub struct StatusHandle {
    inner: Arc<RwLock<Published>>,
}

impl StatusHandle {
    pub async fn snapshot(&self) -> Option<StatusSnapshot> {
        self.inner.read().await.snapshot.clone()
    }

    pub async fn health(&self) -> CycleHealth {
        self.inner.read().await.health.clone()
    }

    pub(crate) async fn publish(
        &self,
        snapshot: Option<StatusSnapshot>,
        result: Result<(), String>,
        at: DateTime<FixedOffset>,
    ) {
        let mut p = self.inner.write().await;
        if let Some(s) = snapshot {
            p.snapshot = Some(s);
        }
        p.health.cycles += 1;
        p.health.last_cycle_at = Some(at);
        match result {
            Ok(()) => {
                p.health.last_cycle_ok = true;
                p.health.last_error = None;
            }
            Err(e) => {
                p.health.last_cycle_ok = false;
                p.health.failed_cycles += 1;
                p.health.last_error = Some(e);
            }
        }
    }
}

/// Wires sensors, decision logic, persistence and the actuator together.
/// Owns the engine state exclusively.
pub struct SmartFlowEngine {
    sensors: Arc<dyn SensorStore>,
    gateway: SetpointGateway,
    store: Arc<dyn StateStore>,
    reader: SiteReader,
    profile: DeviceProfile,
    tick_seconds: u64,
    state: EngineState,
    /// Operation mode as last read from the operator controls
    mode: OperationMode,
    freeze: StatusFreeze,
    status: StatusHandle,
}

impl SmartFlowEngine {
    /// Build the engine and load persisted state. A store that cannot be
    /// read is logged and treated as a fresh start.
    pub async fn new(
        cfg: &Config,
        reader: SiteReader,
        sensors: Arc<dyn SensorStore>,
        actuator: Arc<dyn Actuator>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let state = match store.load().await {
            Ok(Some(state)) => {
                info!(
                    power_state = %state.power_state,
                    profit_eur = state.totals.profit_eur,
                    "engine state restored"
                );
                state
            }
            Ok(None) => EngineState::default(),
            Err(e) => {
                warn!(error = %e, "loading engine state failed, starting fresh");
                EngineState::default()
            }
        };
        Self {
            sensors,
            gateway: SetpointGateway::new(actuator),
            store,
            reader,
            profile: DeviceProfile::by_name(&cfg.controller.device_profile),
            tick_seconds: cfg.controller.tick_seconds.max(1),
            state,
            mode: cfg.settings.operation_mode,
            freeze: StatusFreeze::new(cfg.controller.status_freeze_seconds),
            status: StatusHandle::default(),
        }
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// One full cycle: read, decide, account, persist, actuate, publish.
    pub async fn run_cycle(&mut self, now: DateTime<FixedOffset>) -> EngineResult<StatusSnapshot> {
        let result = self.cycle(now).await;
        match &result {
            Ok(snapshot) => self.status.publish(Some(snapshot.clone()), Ok(()), now).await,
            Err(e @ EngineError::SensorInvalid { .. }) => {
                let degraded =
                    cycle::degraded_snapshot(&self.state, self.mode, now, &mut self.freeze);
                self.status.publish(Some(degraded), Err(e.to_string()), now).await;
            }
            Err(e) => self.status.publish(None, Err(e.to_string()), now).await,
        }
        result
    }

    async fn cycle(&mut self, now: DateTime<FixedOffset>) -> EngineResult<StatusSnapshot> {
        let sensors = self.sensors.as_ref();
        let controls = self.reader.read_controls(sensors).await;
        self.mode = controls.mode;
        let prices = self.reader.read_prices(sensors).await;
        let measurement = self.reader.read_measurement(sensors, &prices, now).await?;

        let input = CycleInput {
            measurement: &measurement,
            prices: &prices,
            controls: &controls,
            profile: &self.profile,
            tick_seconds: self.tick_seconds,
            now,
        };
        let outcome = evaluate(&input, &mut self.state);
        for note in &outcome.degraded {
            debug!(kind = ?note.kind(), detail = %note, "degraded input");
        }

        self.store
            .save(&self.state)
            .await
            .map_err(|e| EngineError::update_failed("saving engine state", e))?;

        let decision = outcome.decision;
        self.gateway.apply(&decision, &mut self.state.applied).await;

        let snapshot = cycle::snapshot(&outcome, &input, &self.state, &mut self.freeze);
        info!(
            mode = %controls.mode,
            reason = %decision.reason,
            power_state = %decision.power_state,
            input_w = decision.input_w,
            output_w = decision.output_w,
            soc_percent = measurement.soc_percent,
            price_now = ?measurement.price_now,
            net_grid_w = outcome.signals.net_grid_w,
            "cycle complete"
        );
        Ok(snapshot)
    }

    /// Run cycles forever on a fixed interval. A failed cycle is logged and
    /// the next tick is the retry.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(self.tick_seconds));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_seconds = self.tick_seconds, profile = %self.profile.name, "engine started");
        loop {
            interval.tick().await;
            let now = Local::now().fixed_offset();
            if let Err(e) = self.run_cycle(now).await {
                match e.kind() {
                    ErrorKind::SensorInvalid => {
                        warn!(error = %e, "sensor invalid, holding last setpoints")
                    }
                    _ => error!(error = ?e, "cycle failed"),
                }
            }
        }
    }
}
