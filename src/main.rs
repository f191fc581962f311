use anyhow::{Context, Result};
use chrono::Local;
use std::sync::Arc;
use tracing::{info, warn};

use smartflow_controller::api::{self, ApiState};
use smartflow_controller::config::{Backend, Config};
use smartflow_controller::controller::SmartFlowEngine;
use smartflow_controller::hardware::{Actuator, HomeAssistantActuator, HomeAssistantClient};
use smartflow_controller::repo::JsonFileStore;
use smartflow_controller::sensors::{SensorStore, SiteReader};
use smartflow_controller::simulation::SimulatedSite;
use smartflow_controller::telemetry::{init_tracing, shutdown_signal};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = Config::load().context("loading configuration")?;

    let (entities, sensors, actuator): (_, Arc<dyn SensorStore>, Arc<dyn Actuator>) =
        match cfg.controller.backend {
            Backend::HomeAssistant => {
                let client = HomeAssistantClient::from_config(&cfg.home_assistant)?;
                let actuator = HomeAssistantActuator::new(client.clone(), &cfg.entities);
                info!(base_url = %cfg.home_assistant.base_url, "using Home Assistant backend");
                (cfg.entities.clone(), Arc::new(client), Arc::new(actuator))
            }
            Backend::Simulation => {
                let site = Arc::new(SimulatedSite::new(cfg.simulation.clone()));
                site.step(Local::now().fixed_offset());
                let stepper = site.clone();
                let tick = cfg.controller.tick_seconds.max(1);
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(std::time::Duration::from_secs(tick));
                    loop {
                        interval.tick().await;
                        stepper.step(Local::now().fixed_offset());
                    }
                });
                warn!("using simulation backend, no hardware is controlled");
                let sensors: Arc<dyn SensorStore> = site.clone();
                (SimulatedSite::entities(), sensors, site as Arc<dyn Actuator>)
            }
        };

    let reader = SiteReader::new(entities, cfg.controls.clone(), cfg.settings.clone());
    let store = Arc::new(JsonFileStore::new(
        &cfg.controller.state_dir,
        &cfg.controller.installation_id,
    ));
    let engine = SmartFlowEngine::new(&cfg, reader, sensors, actuator, store).await;

    let app = api::router(
        ApiState {
            status: engine.status_handle(),
        },
        &cfg,
    );
    let engine_task = tokio::spawn(engine.run());

    let addr = cfg.server.socket_addr()?;
    info!(
        %addr,
        installation_id = %cfg.controller.installation_id,
        "starting SmartFlow controller"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine_task.abort();
    warn!("shutdown complete");
    Ok(())
}
