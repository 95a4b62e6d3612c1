//! Position module - open-position registry and exit monitoring

pub mod monitor;
pub mod store;

pub use monitor::{
    evaluate_exit, CloseOutcome, ExitLimits, ExitReason, PositionMonitor, SweepReport,
};
pub use store::{Position, PositionState, PositionStore};
