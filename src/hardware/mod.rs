pub mod gateway;
pub mod home_assistant;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::HardwareMode;

pub use gateway::{SetpointGateway, LIMIT_TOLERANCE_W};
pub use home_assistant::{HaError, HaResult, HomeAssistantActuator, HomeAssistantClient};

/// Battery inverter control surface. Calls carry no acknowledgement; the
/// next cycle's measurement is the only feedback.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn select_mode(&self, mode: HardwareMode) -> Result<()>;
    async fn set_power_limit(&self, mode: HardwareMode, watts: f64) -> Result<()>;
}
