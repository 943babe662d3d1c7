// src/infra/errors.rs — Error types for kaizen

use thiserror::Error;

use crate::core::ledger::{DefectId, DefectStatus};

#[derive(Error, Debug)]
pub enum KaizenError {
    // Budget errors (not retriable)
    #[error("Daily budget exceeded: {remaining} units remaining, {needed} needed")]
    BudgetExceeded { remaining: u64, needed: u64 },

    // The callee kept rate limiting
    #[error("Rate limited on all {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    // Ledger misuse
    #[error("Invalid transition for defect #{id}: {from} -> {to}")]
    InvalidTransition {
        id: DefectId,
        from: DefectStatus,
        to: DefectStatus,
    },

    #[error("Defect #{0} not found")]
    UnknownDefect(DefectId),

    #[error("Improvement #{0} not found")]
    UnknownImprovement(u64),

    #[error("Finding reported by {phase} names no component")]
    UnattributedFinding { phase: String },

    // Unit-of-work errors
    #[error("Work failed: {message}")]
    WorkFailure { message: String },

    #[error("Run cancelled")]
    Cancelled,

    // Infra
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KaizenError {
    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, KaizenError::BudgetExceeded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_budget_refusal_is_budget_exceeded() {
        assert!(KaizenError::BudgetExceeded {
            remaining: 10,
            needed: 20
        }
        .is_budget_exceeded());
        assert!(!KaizenError::RetriesExhausted { attempts: 3 }.is_budget_exceeded());
        assert!(!KaizenError::WorkFailure {
            message: "budget mentioned in body".into()
        }
        .is_budget_exceeded());
        assert!(!KaizenError::Cancelled.is_budget_exceeded());
    }

    #[test]
    fn test_display_messages() {
        let e = KaizenError::BudgetExceeded {
            remaining: 500,
            needed: 2000,
        };
        assert_eq!(
            e.to_string(),
            "Daily budget exceeded: 500 units remaining, 2000 needed"
        );
        let e = KaizenError::InvalidTransition {
            id: DefectId(4),
            from: DefectStatus::Open,
            to: DefectStatus::Verified,
        };
        assert_eq!(
            e.to_string(),
            "Invalid transition for defect #4: OPEN -> VERIFIED"
        );
    }
}
