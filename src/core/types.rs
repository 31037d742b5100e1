use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported private key algorithms for the certificate signing request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Rsa,
    Ec,
}

/// Named curves accepted for EC keys.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum KeyCurve {
    #[serde(rename = "P-256")]
    P256,
    #[serde(rename = "P-384")]
    P384,
    #[serde(rename = "P-521")]
    P521,
}

/// Key parameters the secret store uses when it builds the CSR.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyParams {
    pub algorithm: KeyAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve: Option<KeyCurve>,
}

impl Default for KeyParams {
    fn default() -> Self {
        Self {
            algorithm: KeyAlgorithm::Rsa,
            size: Some(2048),
            curve: None,
        }
    }
}

/// Input of one orchestration run.
///
/// Created by the renewal scheduler and consumed once; it never changes while
/// the run is in flight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertificateRequest {
    /// Logical certificate identifier in the secret store.
    pub certificate_name: String,
    /// Ordered DNS names; the first entry is the primary subject.
    pub dns_names: Vec<String>,
    #[serde(default)]
    pub key: KeyParams,
    /// Reuse the existing private key instead of generating a new one.
    #[serde(default)]
    pub reuse_key: bool,
}

impl CertificateRequest {
    pub fn new(certificate_name: impl Into<String>, dns_names: Vec<String>) -> Self {
        Self {
            certificate_name: certificate_name.into(),
            dns_names,
            key: KeyParams::default(),
            reuse_key: false,
        }
    }
}

/// ACME order status. Ordering follows the lifecycle; `Invalid` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Ready => "ready",
            OrderStatus::Processing => "processing",
            OrderStatus::Valid => "valid",
            OrderStatus::Invalid => "invalid",
        }
    }

    fn rank(&self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Ready => Some(1),
            OrderStatus::Processing => Some(2),
            OrderStatus::Valid => Some(3),
            OrderStatus::Invalid => None,
        }
    }

    /// Whether an order may move from `self` to `next`.
    ///
    /// Any non-terminal status may divert to `Invalid`; otherwise status only
    /// moves forward (or stays put).
    pub fn can_advance_to(&self, next: OrderStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(_), None) => true,
            (Some(current), Some(next)) => next >= current,
            (None, _) => false,
        }
    }

    /// True once the order has reached at least `other` on the success path.
    pub fn at_least(&self, other: OrderStatus) -> bool {
        match (self.rank(), other.rank()) {
            (Some(current), Some(other)) => current >= other,
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ACME order as seen by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Order {
    /// Order URL at the CA
    pub url: String,
    pub status: OrderStatus,
    /// Authorization URLs, one per DNS identifier
    pub authorizations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalize: Option<String>,
    /// Certificate URL, present once the order is valid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
}

/// Challenge material produced for one authorization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChallengeResult {
    /// Challenge URL to answer at the CA
    pub url: String,
    pub dns_name: String,
    /// TXT record name (DNS-01) or resource path (HTTP-01)
    pub resource_name: String,
    /// TXT record value (DNS-01) or key authorization (HTTP-01)
    pub resource_value: String,
}

/// Output of the DNS-01 authorization activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dns01Authorization {
    pub challenge_results: Vec<ChallengeResult>,
    /// Provider-specified propagation delay; `None` falls back to the configured default.
    #[serde(default)]
    pub propagation_seconds: Option<u64>,
}

/// Certificate stored by the merge step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub id: String,
    pub expires_on: DateTime<Utc>,
    pub dns_names: Vec<String>,
}

/// Payload of the completion notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletedEvent {
    pub certificate_id: String,
    pub expires_on: DateTime<Utc>,
    pub dns_names: Vec<String>,
}
