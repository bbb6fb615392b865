//! Closed-loop glucose automation core.
//!
//! Ingests glucose/therapy data from Nightscout, forecasts short-horizon
//! glucose, evaluates safety-gated automation rules, and dispatches
//! temp-target/carb actions back out. See `coordinator` for the
//! top-level pipeline (C11, spec.md §4.8).

pub mod analyze;
pub mod audit;
pub mod calibration;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod net;
pub mod pk;
pub mod predict;
pub mod rules;
pub mod sanitize;
pub mod storage;
pub mod telemetry;
pub mod time;
pub mod units;

pub use coordinator::{AutomationCoordinator, CycleOutcome};
pub use error::CoreError;
