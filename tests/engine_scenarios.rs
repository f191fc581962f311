//! End-to-end cycles through the engine with in-memory sensors, actuator
//! and state store.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, TimeZone};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use smartflow_controller::config::{
    Backend, Config, ControlsConfig, ControllerConfig, EntityConfig, GridMode, HomeAssistantConfig,
    ServerConfig, SettingsConfig,
};
use smartflow_controller::controller::{evaluate, CycleInput};
use smartflow_controller::domain::{
    DecisionReason, DeviceProfile, EngineState, HardwareMode, ManualAction, MeasurementSnapshot,
    OperationMode, PlanStatus, PowerState, PriceSeries, RechargeFloor, Settings, TradeState,
};
use smartflow_controller::hardware::Actuator;
use smartflow_controller::repo::{encode_state, MemoryStateStore, StateStore};
use smartflow_controller::sensors::{OperatorControls, SensorStore, SiteReader};
use smartflow_controller::simulation::SimulationConfig;
use smartflow_controller::{ErrorKind, SmartFlowEngine};

const SOC: &str = "sensor.battery_soc";
const PV: &str = "sensor.pv_power";
const IMPORT: &str = "sensor.grid_import";
const EXPORT: &str = "sensor.grid_export";
const PRICE: &str = "sensor.price_now";
const MAX_DISCHARGE: &str = "number.max_discharge";
const MODE: &str = "select.operation_mode";
const FEED: &str = "sensor.price_feed";

#[derive(Default)]
struct FakeSensors {
    states: Mutex<HashMap<String, String>>,
    attributes: Mutex<HashMap<(String, String), Value>>,
}

impl FakeSensors {
    fn set(&self, entity: &str, value: f64) {
        self.set_text(entity, &value.to_string());
    }

    fn set_text(&self, entity: &str, value: &str) {
        self.states
            .lock()
            .unwrap()
            .insert(entity.to_string(), value.to_string());
    }

    fn set_attribute(&self, entity: &str, name: &str, value: Value) {
        self.attributes
            .lock()
            .unwrap()
            .insert((entity.to_string(), name.to_string()), value);
    }

    fn remove(&self, entity: &str) {
        self.states.lock().unwrap().remove(entity);
    }

    fn site(&self, soc: f64, pv: f64, import: f64, export: f64, price: f64) {
        self.set(SOC, soc);
        self.set(PV, pv);
        self.set(IMPORT, import);
        self.set(EXPORT, export);
        self.set(PRICE, price);
    }
}

#[async_trait]
impl SensorStore for FakeSensors {
    async fn get(&self, entity_id: &str) -> Result<Option<String>> {
        Ok(self.states.lock().unwrap().get(entity_id).cloned())
    }

    async fn get_attribute(&self, entity_id: &str, name: &str) -> Result<Option<Value>> {
        Ok(self
            .attributes
            .lock()
            .unwrap()
            .get(&(entity_id.to_string(), name.to_string()))
            .cloned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Call {
    Mode(HardwareMode),
    Limit(HardwareMode, f64),
}

#[derive(Default)]
struct RecordingActuator {
    calls: Mutex<Vec<Call>>,
}

impl RecordingActuator {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Actuator for RecordingActuator {
    async fn select_mode(&self, mode: HardwareMode) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Mode(mode));
        Ok(())
    }

    async fn set_power_limit(&self, mode: HardwareMode, watts: f64) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Limit(mode, watts));
        Ok(())
    }
}

fn entities() -> EntityConfig {
    EntityConfig {
        soc: SOC.into(),
        pv: PV.into(),
        grid_mode: GridMode::Split,
        grid_import: Some(IMPORT.into()),
        grid_export: Some(EXPORT.into()),
        price_now: Some(PRICE.into()),
        ..EntityConfig::default()
    }
}

fn config(profile: &str) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            request_timeout_secs: 5,
        },
        controller: ControllerConfig {
            tick_seconds: 10,
            installation_id: "test-site".into(),
            state_dir: PathBuf::from("unused"),
            device_profile: profile.into(),
            backend: Backend::Simulation,
            status_freeze_seconds: 0,
        },
        home_assistant: HomeAssistantConfig::default(),
        entities: entities(),
        controls: ControlsConfig::default(),
        settings: SettingsConfig::default(),
        simulation: SimulationConfig::default(),
    }
}

fn at(hour: u32, minute: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(3600)
        .unwrap()
        .with_ymd_and_hms(2025, 1, 15, hour, minute, 0)
        .unwrap()
}

struct Rig {
    sensors: Arc<FakeSensors>,
    actuator: Arc<RecordingActuator>,
    store: Arc<MemoryStateStore>,
    engine: SmartFlowEngine,
}

async fn rig_with(cfg: &Config, store: Arc<MemoryStateStore>) -> Rig {
    let sensors = Arc::new(FakeSensors::default());
    let actuator = Arc::new(RecordingActuator::default());
    let reader = SiteReader::new(cfg.entities.clone(), cfg.controls.clone(), cfg.settings.clone());
    let engine =
        SmartFlowEngine::new(cfg, reader, sensors.clone(), actuator.clone(), store.clone()).await;
    Rig {
        sensors,
        actuator,
        store,
        engine,
    }
}

async fn rig(profile: &str) -> Rig {
    rig_with(&config(profile), Arc::new(MemoryStateStore::new())).await
}

#[tokio::test]
async fn test_expensive_evening_discharges() {
    let mut rig = rig("solarflow_800").await;
    rig.sensors.site(50.0, 0.0, 300.0, 0.0, 0.50);

    let snap = rig.engine.run_cycle(at(19, 0)).await.unwrap();
    assert_eq!(snap.power_state, PowerState::Discharging);
    assert_eq!(snap.hardware_mode, HardwareMode::Output);
    assert!(snap.output_w > 0.0);
    assert!(snap.output_w <= SettingsConfig::default().max_discharge_w);
    assert_eq!(snap.input_w, 0.0);

    let calls = rig.actuator.calls();
    assert_eq!(calls.first(), Some(&Call::Mode(HardwareMode::Output)));
    assert!(calls.contains(&Call::Limit(HardwareMode::Output, snap.output_w)));
}

#[tokio::test]
async fn test_sunny_noon_charges_from_surplus() {
    let mut rig = rig("solarflow_2400_ac").await;
    rig.sensors.site(95.0, 2000.0, 0.0, 1700.0, 0.10);

    let snap = rig.engine.run_cycle(at(12, 0)).await.unwrap();
    assert_eq!(snap.power_state, PowerState::Charging);
    assert_eq!(snap.reason, DecisionReason::PvSurplus.to_string());
    assert_eq!(snap.input_w, 1700.0);
    assert_eq!(snap.output_w, 0.0);
    assert!(snap.real_pv_surplus);

    // switching to input zeroes the output side before the mode write
    let calls = rig.actuator.calls();
    assert_eq!(calls[0], Call::Limit(HardwareMode::Output, 0.0));
    assert_eq!(calls[1], Call::Mode(HardwareMode::Input));
    assert_eq!(calls[2], Call::Limit(HardwareMode::Input, 1700.0));
}

#[tokio::test]
async fn test_critical_soc_latches_emergency_charge() {
    let mut rig = rig("solarflow_800").await;
    rig.sensors.site(5.0, 0.0, 400.0, 0.0, 0.50);

    let snap = rig.engine.run_cycle(at(19, 0)).await.unwrap();
    assert_eq!(snap.status, "emergency");
    assert!(snap.emergency_active);
    assert_eq!(snap.input_w, 300.0);
    assert_eq!(snap.output_w, 0.0);

    // still latched above the emergency threshold but below soc_min
    rig.sensors.set(SOC, 10.0);
    let snap = rig.engine.run_cycle(at(19, 1)).await.unwrap();
    assert!(snap.emergency_active);
    assert_eq!(snap.power_state, PowerState::Charging);

    rig.sensors.set(SOC, 12.5);
    let snap = rig.engine.run_cycle(at(19, 2)).await.unwrap();
    assert!(!snap.emergency_active);
    assert_ne!(snap.status, "emergency");
}

#[tokio::test]
async fn test_small_target_change_not_rewritten() {
    let mut cfg = config("solarflow_800");
    cfg.controls.max_discharge_w = Some(MAX_DISCHARGE.into());
    let mut rig = rig_with(&cfg, Arc::new(MemoryStateStore::new())).await;
    rig.sensors.site(60.0, 0.0, 500.0, 0.0, 0.50);
    rig.sensors.set(MAX_DISCHARGE, 250.0);

    rig.engine.run_cycle(at(19, 0)).await.unwrap();
    assert_eq!(rig.engine.state().applied.output_w, Some(250.0));
    // settle cycle after the mode switch
    rig.engine.run_cycle(at(19, 1)).await.unwrap();
    rig.actuator.clear();

    // operator lowers the ceiling by less than the write tolerance
    rig.sensors.set(MAX_DISCHARGE, 240.0);
    rig.engine.run_cycle(at(19, 2)).await.unwrap();
    assert_eq!(rig.engine.state().discharge_target_w, 240.0);
    assert_eq!(rig.engine.state().applied.output_w, Some(250.0));
    assert!(rig.actuator.calls().is_empty());

    rig.sensors.set(MAX_DISCHARGE, 200.0);
    rig.engine.run_cycle(at(19, 3)).await.unwrap();
    assert_eq!(rig.actuator.calls(), vec![Call::Limit(HardwareMode::Output, 200.0)]);
}

#[tokio::test]
async fn test_missing_soc_holds_setpoints() {
    let mut rig = rig("solarflow_800").await;
    rig.sensors.site(50.0, 0.0, 300.0, 0.0, 0.50);
    rig.engine.run_cycle(at(19, 0)).await.unwrap();
    let saved = rig.store.raw().await;
    rig.actuator.clear();

    rig.sensors.remove(SOC);
    let err = rig.engine.run_cycle(at(19, 1)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SensorInvalid);
    assert!(rig.actuator.calls().is_empty());
    assert_eq!(rig.store.raw().await, saved);

    let status = rig.engine.status_handle();
    let snap = status.snapshot().await.unwrap();
    assert_eq!(snap.status, "sensor_invalid");
    assert_eq!(snap.power_state, PowerState::Discharging);
    let health = status.health().await;
    assert!(!health.last_cycle_ok);
    assert_eq!(health.failed_cycles, 1);
}

#[tokio::test]
async fn test_degraded_snapshot_reports_operator_mode() {
    let mut cfg = config("solarflow_800");
    cfg.controls.operation_mode = Some(MODE.into());
    let mut rig = rig_with(&cfg, Arc::new(MemoryStateStore::new())).await;
    rig.sensors.site(50.0, 0.0, 50.0, 0.0, 0.20);
    rig.sensors.set_text(MODE, "winter");
    let snap = rig.engine.run_cycle(at(10, 0)).await.unwrap();
    assert_eq!(snap.operation_mode, OperationMode::Winter);

    rig.sensors.set_text(MODE, "summer");
    rig.sensors.remove(SOC);
    rig.engine.run_cycle(at(10, 1)).await.unwrap_err();
    let snap = rig.engine.status_handle().snapshot().await.unwrap();
    assert_eq!(snap.status, "sensor_invalid");
    assert_eq!(snap.operation_mode, OperationMode::Summer);
}

/// Hourly feed from midnight: cheap 02:00-04:00, a peak at 17:00, flat
/// 0.38 elsewhere (above the margin-adjusted peak price).
fn price_feed(peak: f64) -> Value {
    let midnight = at(0, 0);
    let entries: Vec<Value> = (0..36)
        .map(|i| {
            let start = midnight + Duration::hours(i);
            let price = match i {
                2 | 3 => 0.20,
                17 => peak,
                _ => 0.38,
            };
            json!({ "start_time": start.to_rfc3339(), "price_per_kwh": price })
        })
        .collect();
    Value::Array(entries)
}

/// Prices come from the feed only; no price-now entity.
fn feed_config() -> Config {
    let mut cfg = config("solarflow_800");
    cfg.entities.price_now = None;
    cfg.entities.price_export = Some(FEED.into());
    cfg
}

#[tokio::test]
async fn test_feed_drives_planned_charge_in_cheap_window() {
    let mut rig = rig_with(&feed_config(), Arc::new(MemoryStateStore::new())).await;
    rig.sensors.site(40.0, 0.0, 50.0, 0.0, 0.0);
    rig.sensors.set_attribute(FEED, "data", price_feed(0.45));

    let snap = rig.engine.run_cycle(at(3, 10)).await.unwrap();
    assert_eq!(snap.price_now, Some(0.20));
    assert_eq!(snap.planning.status, PlanStatus::ChargeWindowActive);
    assert_eq!(snap.planning.latest_cheap_start, Some(at(3, 0)));
    assert_eq!(snap.planning.next_peak, Some(at(17, 0)));
    assert_eq!(snap.reason, DecisionReason::PlannedCharge.to_string());
    assert_eq!(snap.recommendation, "planned_charge");
    assert_eq!(snap.input_w, 1200.0);
    assert!(rig
        .actuator
        .calls()
        .contains(&Call::Limit(HardwareMode::Input, 1200.0)));
    assert!(snap.details.is_some());

    // outside the window the plan waits
    let snap = rig.engine.run_cycle(at(5, 0)).await.unwrap();
    assert_eq!(snap.planning.status, PlanStatus::WaitingForCheapWindow);
    assert_ne!(snap.reason, DecisionReason::PlannedCharge.to_string());
}

fn state_with_floor(price: f64) -> MemoryStateStore {
    let state = EngineState {
        trade: TradeState {
            recharge_floor: Some(RechargeFloor {
                price,
                until: at(3, 30),
            }),
            ..TradeState::default()
        },
        ..EngineState::default()
    };
    MemoryStateStore::with_raw(encode_state(&state).unwrap())
}

#[tokio::test]
async fn test_recharge_floor_blocks_planned_charge() {
    let mut rig = rig_with(&feed_config(), Arc::new(state_with_floor(0.15))).await;
    rig.sensors.site(40.0, 0.0, 50.0, 0.0, 0.0);
    rig.sensors.set_attribute(FEED, "data", price_feed(0.45));

    let snap = rig.engine.run_cycle(at(3, 10)).await.unwrap();
    assert_eq!(snap.planning.status, PlanStatus::ChargeWindowActive);
    assert_eq!(snap.power_state, PowerState::Idle);
    assert!(rig.engine.state().trade.recharge_floor.is_some());

    // a floor above the window price lets the charge through
    let mut rig = rig_with(&feed_config(), Arc::new(state_with_floor(0.25))).await;
    rig.sensors.site(40.0, 0.0, 50.0, 0.0, 0.0);
    rig.sensors.set_attribute(FEED, "data", price_feed(0.45));
    let snap = rig.engine.run_cycle(at(3, 10)).await.unwrap();
    assert_eq!(snap.reason, DecisionReason::PlannedCharge.to_string());

    // and the floor expires on its own
    let snap = rig.engine.run_cycle(at(3, 31)).await.unwrap();
    assert!(rig.engine.state().trade.recharge_floor.is_none());
    assert_eq!(snap.power_state, PowerState::Charging);
}

#[tokio::test]
async fn test_peak_discharge_commits_inside_lookahead() {
    let mut rig = rig_with(&feed_config(), Arc::new(MemoryStateStore::new())).await;
    rig.sensors.site(60.0, 0.0, 0.0, 0.0, 0.0);
    rig.sensors.set_attribute(FEED, "data", price_feed(0.55));

    // 40 minutes before the peak: planned but not committed
    let snap = rig.engine.run_cycle(at(16, 20)).await.unwrap();
    assert_eq!(snap.planning.status, PlanStatus::PeakDischarge);
    assert_eq!(snap.planning.next_peak, Some(at(17, 0)));
    assert_eq!(snap.power_state, PowerState::Idle);
    assert!(rig.actuator.calls().iter().all(|c| *c != Call::Mode(HardwareMode::Output)));

    // 25 minutes before the peak: committed
    let snap = rig.engine.run_cycle(at(16, 35)).await.unwrap();
    assert_eq!(snap.reason, DecisionReason::PeakDischarge.to_string());
    assert_eq!(snap.hardware_mode, HardwareMode::Output);
    assert!(snap.output_w > 0.0);
    assert!(rig.actuator.calls().contains(&Call::Mode(HardwareMode::Output)));
}

#[tokio::test]
async fn test_missing_price_falls_back_to_pv_rules() {
    let mut rig = rig("solarflow_800").await;
    rig.sensors.site(50.0, 0.0, 50.0, 0.0, 0.0);
    rig.sensors.remove(PRICE);

    let snap = rig.engine.run_cycle(at(3, 0)).await.unwrap();
    assert!(!snap.price_valid);
    assert_eq!(snap.status, "price_invalid");
    assert!(rig.engine.status_handle().health().await.last_cycle_ok);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let cfg = config("solarflow_800");
    let store = Arc::new(MemoryStateStore::new());
    let mut first = rig_with(&cfg, store.clone()).await;
    first.sensors.site(5.0, 0.0, 400.0, 0.0, 0.20);
    first.engine.run_cycle(at(2, 0)).await.unwrap();
    first.engine.run_cycle(at(2, 1)).await.unwrap();
    let before = first.engine.state().clone();
    assert!(before.emergency_active);
    assert!(before.totals.charged_kwh > 0.0);

    let second = rig_with(&cfg, store).await;
    let after = second.engine.state();
    assert!(after.emergency_active);
    assert_eq!(after.power_state, PowerState::Charging);
    assert_eq!(after.trade, before.trade);
    assert_eq!(after.totals, before.totals);
}

#[tokio::test]
async fn test_corrupt_blob_starts_fresh() {
    let cfg = config("solarflow_800");
    let store = Arc::new(MemoryStateStore::with_raw("{ not json"));
    let rig = rig_with(&cfg, store).await;
    assert_eq!(rig.engine.state(), &EngineState::default());
}

#[tokio::test]
async fn test_status_unavailable_before_first_cycle() {
    let rig = rig("solarflow_800").await;
    let status = rig.engine.status_handle();
    assert!(status.snapshot().await.is_none());
    assert_eq!(status.health().await.cycles, 0);
}

#[tokio::test]
async fn test_trade_cycle_resets_at_soc_min() {
    let mut rig = rig("solarflow_800").await;
    rig.sensors.site(40.0, 2000.0, 0.0, 1700.0, 0.20);
    rig.engine.run_cycle(at(12, 0)).await.unwrap();
    rig.engine.run_cycle(at(12, 1)).await.unwrap();
    assert_eq!(rig.engine.state().trade.avg_charge_price, Some(0.20));

    // expensive evening, discharge down through soc_min
    rig.sensors.site(40.0, 0.0, 400.0, 0.0, 0.55);
    rig.engine.run_cycle(at(19, 0)).await.unwrap();
    rig.engine.run_cycle(at(19, 1)).await.unwrap();
    assert_eq!(rig.engine.state().power_state, PowerState::Discharging);

    rig.sensors.set(SOC, 11.0);
    rig.engine.run_cycle(at(19, 2)).await.unwrap();
    let state = rig.engine.state();
    assert!(state.trade.avg_charge_price.is_none());
    assert_eq!(state.trade.charged_kwh, 0.0);
    assert!(state.trade.recharge_floor.is_some());
    assert!(state.totals.profit_eur > 0.0);
    assert_ne!(state.power_state, PowerState::Discharging);
}

fn controls(mode: OperationMode, manual_action: ManualAction) -> OperatorControls {
    OperatorControls {
        mode,
        manual_action,
        settings: Settings::default(),
    }
}

fn mode_strategy() -> impl Strategy<Value = OperationMode> {
    prop_oneof![
        Just(OperationMode::Automatic),
        Just(OperationMode::Summer),
        Just(OperationMode::Winter),
        Just(OperationMode::Manual),
    ]
}

fn action_strategy() -> impl Strategy<Value = ManualAction> {
    prop_oneof![
        Just(ManualAction::Standby),
        Just(ManualAction::Charge),
        Just(ManualAction::Discharge),
    ]
}

fn power_state_strategy() -> impl Strategy<Value = PowerState> {
    prop_oneof![
        Just(PowerState::Idle),
        Just(PowerState::Charging),
        Just(PowerState::Discharging),
    ]
}

proptest! {
    #[test]
    fn emergency_always_wins(
        soc in 0.0f64..=8.0,
        pv in 0.0f64..3000.0,
        import in 0.0f64..3000.0,
        export in 0.0f64..3000.0,
        price in proptest::option::of(0.0f64..1.0),
        mode in mode_strategy(),
        action in action_strategy(),
        prior in power_state_strategy(),
    ) {
        let m = MeasurementSnapshot {
            soc_percent: soc,
            pv_w: pv,
            grid_import_w: import,
            grid_export_w: export,
            price_now: price,
        };
        let c = controls(mode, action);
        let profile = DeviceProfile::solarflow_800();
        let prices = PriceSeries::default();
        let input = CycleInput {
            measurement: &m,
            prices: &prices,
            controls: &c,
            profile: &profile,
            tick_seconds: 10,
            now: at(18, 0),
        };
        let mut state = EngineState { power_state: prior, ..EngineState::default() };
        let outcome = evaluate(&input, &mut state);
        prop_assert_eq!(outcome.decision.reason, DecisionReason::Emergency);
        prop_assert_eq!(outcome.decision.power_state, PowerState::Charging);
        prop_assert_eq!(outcome.decision.input_w, 300.0);
        prop_assert_eq!(outcome.decision.output_w, 0.0);
        prop_assert!(state.emergency_active);
    }

    #[test]
    fn decisions_stay_within_limits(
        soc in 0.0f64..=100.0,
        pv in 0.0f64..3000.0,
        import in 0.0f64..3000.0,
        export in 0.0f64..3000.0,
        price in proptest::option::of(0.0f64..1.0),
        mode in mode_strategy(),
        action in action_strategy(),
        prior in power_state_strategy(),
        prior_target in 0.0f64..900.0,
        minutes in 0i64..1440,
    ) {
        let m = MeasurementSnapshot {
            soc_percent: soc,
            pv_w: pv,
            grid_import_w: import,
            grid_export_w: export,
            price_now: price,
        };
        let c = controls(mode, action);
        let profile = DeviceProfile::solarflow_800();
        let prices = PriceSeries::default();
        let settings = c.settings.sanitized(&profile);
        let now = at(0, 0) + Duration::minutes(minutes);
        let input = CycleInput {
            measurement: &m,
            prices: &prices,
            controls: &c,
            profile: &profile,
            tick_seconds: 10,
            now,
        };
        let mut state = EngineState {
            power_state: prior,
            discharge_target_w: prior_target,
            ..EngineState::default()
        };
        let d = evaluate(&input, &mut state).decision;

        prop_assert!(d.input_w >= 0.0 && d.input_w <= settings.max_charge_w);
        prop_assert!(d.output_w >= 0.0 && d.output_w <= settings.max_discharge_w);
        prop_assert!(d.input_w == 0.0 || d.output_w == 0.0);
        if d.power_state == PowerState::Discharging {
            prop_assert!(soc > settings.soc_min);
            prop_assert_eq!(d.mode, HardwareMode::Output);
        }
        prop_assert!(
            state.discharge_target_w >= 0.0
                && state.discharge_target_w <= settings.max_discharge_w
        );
    }
}

#[tokio::test]
async fn test_state_store_trait_object_round_trip() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    assert!(store.load().await.unwrap().is_none());
    let mut state = EngineState::default();
    state.totals.discharged_kwh = 1.5;
    store.save(&state).await.unwrap();
    assert_eq!(store.load().await.unwrap().unwrap().totals.discharged_kwh, 1.5);
}
