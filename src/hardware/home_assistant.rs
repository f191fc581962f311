//! Home Assistant REST backend: entity states in, service calls out.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::Actuator;
use crate::config::{EntityConfig, HomeAssistantConfig};
use crate::domain::HardwareMode;
use crate::sensors::SensorStore;

#[derive(Debug, Error)]
pub enum HaError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Service call {service} failed: {reason}")]
    ServiceCallFailed { service: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type HaResult<T> = std::result::Result<T, HaError>;

#[derive(Debug, Clone, Deserialize)]
pub struct HaEntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Value,
}

/// Thin client over `/api/states` and `/api/services`.
#[derive(Clone)]
pub struct HomeAssistantClient {
    base_url: String,
    token: String,
    client: Client,
}

impl HomeAssistantClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> HaResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HaError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        })
    }

    pub fn from_config(cfg: &HomeAssistantConfig) -> HaResult<Self> {
        if cfg.token.is_empty() {
            return Err(HaError::Config("home_assistant.token is empty".into()));
        }
        Self::new(&cfg.base_url, &cfg.token, Duration::from_secs(cfg.timeout_secs.max(1)))
    }

    /// Entity state; `None` when Home Assistant does not know the entity.
    pub async fn get_state(&self, entity_id: &str) -> HaResult<Option<HaEntityState>> {
        let url = format!("{}/api/states/{}", self.base_url, entity_id);
        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
        match response.status() {
            StatusCode::OK => {
                let state = response.json::<HaEntityState>().await?;
                debug!(entity = entity_id, state = %state.state, "entity state");
                Ok(Some(state))
            }
            StatusCode::NOT_FOUND => {
                debug!(entity = entity_id, "entity not found");
                Ok(None)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(HaError::AuthenticationFailed),
            status => Err(HaError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    pub async fn call_service(&self, domain: &str, service: &str, data: Value) -> HaResult<()> {
        let url = format!("{}/api/services/{}/{}", self.base_url, domain, service);
        debug!(domain, service, %data, "calling service");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&data)
            .send()
            .await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(HaError::AuthenticationFailed),
            status => {
                let reason = response.text().await.unwrap_or_default();
                warn!(domain, service, status = status.as_u16(), %reason, "service call rejected");
                Err(HaError::ServiceCallFailed {
                    service: format!("{domain}.{service}"),
                    reason,
                })
            }
        }
    }
}

#[async_trait]
impl SensorStore for HomeAssistantClient {
    async fn get(&self, entity_id: &str) -> Result<Option<String>> {
        Ok(self.get_state(entity_id).await?.map(|s| s.state))
    }

    async fn get_attribute(&self, entity_id: &str, name: &str) -> Result<Option<Value>> {
        Ok(self
            .get_state(entity_id)
            .await?
            .and_then(|s| s.attributes.get(name).cloned()))
    }
}

/// Drives the AC mode select and the two limit numbers of one battery.
pub struct HomeAssistantActuator {
    client: HomeAssistantClient,
    ac_mode: String,
    input_limit: String,
    output_limit: String,
}

impl HomeAssistantActuator {
    pub fn new(client: HomeAssistantClient, entities: &EntityConfig) -> Self {
        Self {
            client,
            ac_mode: entities.ac_mode.clone(),
            input_limit: entities.input_limit.clone(),
            output_limit: entities.output_limit.clone(),
        }
    }
}

#[async_trait]
impl Actuator for HomeAssistantActuator {
    async fn select_mode(&self, mode: HardwareMode) -> Result<()> {
        self.client
            .call_service(
                "select",
                "select_option",
                json!({ "entity_id": self.ac_mode, "option": mode.to_string() }),
            )
            .await?;
        Ok(())
    }

    async fn set_power_limit(&self, mode: HardwareMode, watts: f64) -> Result<()> {
        let entity = match mode {
            HardwareMode::Input => &self.input_limit,
            HardwareMode::Output => &self.output_limit,
        };
        self.client
            .call_service(
                "number",
                "set_value",
                json!({ "entity_id": entity, "value": watts.max(0.0).round() }),
            )
            .await?;
        Ok(())
    }
}
