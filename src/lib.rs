//! Durable ACME certificate issuance.
//!
//! [`issuance::issue_certificate`] is the issuance state machine. It runs
//! inside an [`runtime::OrchestrationContext`] that records every activity
//! result and timer in a [`storage::HistoryStore`], so a [`runtime::Host`] can
//! replay an instance after a restart without repeating side effects.

pub mod config;
pub mod core;
pub mod domain;
pub mod issuance;
pub mod runtime;
pub mod storage;

pub use config::{OrchestratorConfig, RetryPolicy};
pub use crate::core::types::{
    CertificateRequest, ChallengeResult, CompletedEvent, Dns01Authorization, IssuedCertificate,
    KeyAlgorithm, KeyCurve, KeyParams, Order, OrderStatus,
};

/// Installs `env_logger` (filtered by `RUST_LOG`, default `info`). Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
