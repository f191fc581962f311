pub mod api;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod hardware;
pub mod optimizer;
pub mod repo;
pub mod sensors;
pub mod simulation;
pub mod telemetry;

pub use controller::{SmartFlowEngine, StatusHandle};
pub use error::{EngineError, EngineResult, ErrorKind};
