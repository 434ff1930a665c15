//! Token budgeting, reservation, and optimization
//!
//! This crate tracks token spend across named budgets. Callers reserve
//! capacity before dispatching work, consume what the provider actually
//! charged, and release the hold afterwards. A broadcast channel carries
//! threshold alerts and accounting events, and [`TokenOptimizer`] rewrites
//! request content to spend less in the first place.

pub mod budget;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod optimizer;
pub mod reservation;
pub mod rules;

pub use budget::{BudgetPeriod, TokenBudget, DEFAULT_ALERT_THRESHOLDS};
pub use config::BudgetConfig;
pub use error::{BudgetError, Result};
pub use events::{AlertLevel, BudgetEvent, TokenAlert};
pub use manager::{
    BudgetStatusReport, OptimizationSuggestion, ProviderEfficiency, ProviderUsage,
    SuggestionKind, SuggestionPriority, TokenBudgetManager, UsageRecord, UsageSummary,
    DEFAULT_COST_PER_TOKEN,
};
pub use optimizer::{
    OptimizerStats, PatternReport, TextPatterns, TokenOptimizer, DEFAULT_PROVIDER,
};
pub use reservation::TokenReservation;
pub use rules::{OptimizationRule, OptimizationStrategy, RiskLevel};
