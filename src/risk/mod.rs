//! Risk module - admission gate and realized PnL accounting

pub mod accountant;
pub mod gate;

pub use accountant::{
    AccountantLimits, DailyReport, DailyStats, PositionSummary, RiskAccountant, RiskLevel,
    RiskMetrics, TradeRecord,
};
pub use gate::{RiskBlock, RiskDecision, RiskGate, RiskLimits, RiskSnapshot};
