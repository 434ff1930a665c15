use thiserror::Error;

/// Errors from budget accounting
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BudgetError {
    /// No single budget can hold the requested reservation
    #[error("Insufficient tokens: requested {requested}, available {available}")]
    InsufficientTokens { requested: u64, available: u64 },

    /// The projected monetary spend was vetoed by the cost collaborator
    #[error("Cost limit exceeded: estimated cost {estimated_cost:.4}")]
    CostLimitExceeded { estimated_cost: f64 },
}

pub type Result<T> = std::result::Result<T, BudgetError>;
