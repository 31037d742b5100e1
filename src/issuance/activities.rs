use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{
    CertificateRequest, ChallengeResult, Dns01Authorization, IssuedCertificate, Order,
};

/// Side-effecting operations the orchestrator drives.
///
/// Implementations talk to the DNS provider, the HTTP challenge host, the
/// ACME CA, the secret store and the webhook sink. The orchestrator only
/// reaches them through the replay-aware proxy, so an implementation is
/// invoked at most once per recorded step.
///
/// Return [`ActivityError::Retriable`] for conditions that are expected to
/// clear on their own (record not propagated yet, order still pending); the
/// orchestrator retries those on a durable timer within its configured bounds.
pub trait IssuanceActivities: Send + Sync {
    fn resolve_zones(&self) -> Result<Vec<String>, ActivityError>;

    fn dns01_precondition(&self, dns_names: &[String]) -> Result<(), ActivityError>;
    fn http01_precondition(&self, dns_names: &[String]) -> Result<(), ActivityError>;

    fn create_order(&self, dns_names: &[String]) -> Result<Order, ActivityError>;

    fn dns01_authorization(
        &self,
        authorizations: &[String],
    ) -> Result<Dns01Authorization, ActivityError>;
    fn http01_authorization(
        &self,
        authorizations: &[String],
    ) -> Result<Vec<ChallengeResult>, ActivityError>;

    fn check_dns_challenge(&self, challenges: &[ChallengeResult]) -> Result<(), ActivityError>;
    fn check_http_challenge(&self, challenges: &[ChallengeResult]) -> Result<(), ActivityError>;

    fn answer_challenges(&self, challenges: &[ChallengeResult]) -> Result<(), ActivityError>;

    fn check_is_ready(
        &self,
        order: &Order,
        challenges: &[ChallengeResult],
    ) -> Result<Order, ActivityError>;

    fn cleanup_dns_challenge(&self, challenges: &[ChallengeResult]) -> Result<(), ActivityError>;
    fn cleanup_http_challenge(&self, challenges: &[ChallengeResult])
    -> Result<(), ActivityError>;

    fn finalize_order(
        &self,
        request: &CertificateRequest,
        order: &Order,
    ) -> Result<Order, ActivityError>;

    fn check_is_valid(&self, order: &Order) -> Result<Order, ActivityError>;

    fn merge_certificate(
        &self,
        certificate_name: &str,
        order: &Order,
    ) -> Result<IssuedCertificate, ActivityError>;

    fn send_completed_event(
        &self,
        certificate_id: &str,
        expires_on: DateTime<Utc>,
        dns_names: &[String],
    ) -> Result<(), ActivityError>;
}

/// Failure reported by an activity.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityError {
    #[error("{0}")]
    Retriable(String),
    #[error("{0}")]
    Fatal(String),
}

impl ActivityError {
    pub fn retriable(reason: impl Into<String>) -> Self {
        ActivityError::Retriable(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        ActivityError::Fatal(reason.into())
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, ActivityError::Retriable(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            ActivityError::Retriable(reason) | ActivityError::Fatal(reason) => reason,
        }
    }
}

impl From<anyhow::Error> for ActivityError {
    fn from(value: anyhow::Error) -> Self {
        ActivityError::Fatal(format!("{value:#}"))
    }
}

/// Stable activity names recorded in the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityName {
    ResolveZones,
    Dns01Precondition,
    Http01Precondition,
    CreateOrder,
    Dns01Authorization,
    Http01Authorization,
    CheckDnsChallenge,
    CheckHttpChallenge,
    AnswerChallenges,
    CheckIsReady,
    CleanupDnsChallenge,
    CleanupHttpChallenge,
    FinalizeOrder,
    CheckIsValid,
    MergeCertificate,
    SendCompletedEvent,
}

impl ActivityName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityName::ResolveZones => "ResolveZones",
            ActivityName::Dns01Precondition => "Dns01Precondition",
            ActivityName::Http01Precondition => "Http01Precondition",
            ActivityName::CreateOrder => "CreateOrder",
            ActivityName::Dns01Authorization => "Dns01Authorization",
            ActivityName::Http01Authorization => "Http01Authorization",
            ActivityName::CheckDnsChallenge => "CheckDnsChallenge",
            ActivityName::CheckHttpChallenge => "CheckHttpChallenge",
            ActivityName::AnswerChallenges => "AnswerChallenges",
            ActivityName::CheckIsReady => "CheckIsReady",
            ActivityName::CleanupDnsChallenge => "CleanupDnsChallenge",
            ActivityName::CleanupHttpChallenge => "CleanupHttpChallenge",
            ActivityName::FinalizeOrder => "FinalizeOrder",
            ActivityName::CheckIsValid => "CheckIsValid",
            ActivityName::MergeCertificate => "MergeCertificate",
            ActivityName::SendCompletedEvent => "SendCompletedEvent",
        }
    }
}

impl fmt::Display for ActivityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
