use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{core::types::OrderStatus, issuance::activities::ActivityName};

/// Reasons an orchestration pass stops before completing.
///
/// `Suspended` is not a failure: the instance is waiting on a durable timer
/// and resumes by replaying its history once `resume_at` has passed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestrationError {
    #[error("suspended until {}", resume_at.to_rfc3339())]
    Suspended { resume_at: DateTime<Utc> },
    #[error("{activity} failed at step {step}: {reason}")]
    Activity {
        step: usize,
        activity: ActivityName,
        reason: String,
    },
    #[error("{activity} did not succeed after {attempts} attempt(s) over {waited_secs}s: {reason}")]
    WaitExpired {
        activity: ActivityName,
        attempts: u32,
        waited_secs: i64,
        reason: String,
    },
    #[error("order became invalid after {activity}")]
    OrderInvalid { activity: ActivityName },
    #[error("order status moved backwards from {from} to {to}")]
    StatusRegression { from: OrderStatus, to: OrderStatus },
    #[error("{activity} returned an order in status {found}, expected {expected}")]
    UnexpectedStatus {
        activity: ActivityName,
        expected: OrderStatus,
        found: OrderStatus,
    },
    #[error("{results} challenge result(s) for {authorizations} authorization(s)")]
    ChallengeCountMismatch {
        authorizations: usize,
        results: usize,
    },
    #[error("DNS provider asked for {requested}s of propagation delay; the maximum is {max}s")]
    PropagationTooLong { requested: u64, max: u64 },
    #[error("non-deterministic replay at step {step}: expected {expected}, history has {found}")]
    NonDeterministic {
        step: usize,
        expected: String,
        found: String,
    },
    #[error("invalid orchestration input: {0}")]
    InvalidInput(String),
    #[error("history store error: {0}")]
    History(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for OrchestrationError {
    fn from(value: serde_json::Error) -> Self {
        OrchestrationError::Serialization(value.to_string())
    }
}
