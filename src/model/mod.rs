//! Core data model (spec.md §3).

pub mod action;
pub mod forecast;
pub mod glucose;
pub mod pattern;
pub mod profile_estimate;
pub mod rule;
pub mod telemetry;
pub mod therapy;

pub use action::{ActionCommand, ActionStatus, ActionType};
pub use forecast::{ensure_horizon_30, sort_by_horizon, Forecast};
pub use glucose::{GlucosePoint, GlucoseQuality};
pub use pattern::{DayType, PatternWindow, TimeSlot};
pub use profile_estimate::{ProfileEstimate, ProfileSegmentEstimate};
pub use rule::{ActionProposal, RuleDecision, RuleState};
pub use telemetry::{TelemetryQuality, TelemetrySample};
pub use therapy::{TherapyEvent, TherapyKind};
