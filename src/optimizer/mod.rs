pub mod planner;

pub use planner::{diagnostics, plan, PlanResult};
