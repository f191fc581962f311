use thiserror::Error;

/// Coarse error kind callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SensorInvalid,
    PriceUnavailable,
    PlanningDataInsufficient,
    UpdateFailed,
}

/// Errors raised while running one control cycle.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A required reading (SoC, PV) is missing or unparseable.
    #[error("Sensor invalid: {entity} ({detail})")]
    SensorInvalid { entity: String, detail: String },

    /// No usable price-now; price rules are skipped for the cycle.
    #[error("Price unavailable: {0}")]
    PriceUnavailable(String),

    #[error("Planning data insufficient: {0}")]
    PlanningDataInsufficient(String),

    /// Anything unexpected, wrapped with its original cause.
    #[error("Update failed: {context}")]
    UpdateFailed {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::SensorInvalid { .. } => ErrorKind::SensorInvalid,
            EngineError::PriceUnavailable(_) => ErrorKind::PriceUnavailable,
            EngineError::PlanningDataInsufficient(_) => ErrorKind::PlanningDataInsufficient,
            EngineError::UpdateFailed { .. } => ErrorKind::UpdateFailed,
        }
    }

    pub fn sensor_invalid(entity: impl Into<String>, detail: impl Into<String>) -> Self {
        EngineError::SensorInvalid {
            entity: entity.into(),
            detail: detail.into(),
        }
    }

    pub fn update_failed(context: impl Into<String>, source: anyhow::Error) -> Self {
        EngineError::UpdateFailed {
            context: context.into(),
            source,
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
