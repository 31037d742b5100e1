use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::{
    fs,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use uuid::Uuid;

use cert_renewal::{
    issuance::{ActivityError, ActivityName, IssuanceActivities},
    runtime::{HistoryEvent, Host, ManualClock},
    storage::MemoryHistoryStore,
    CertificateRequest, ChallengeResult, CompletedEvent, Dns01Authorization, IssuedCertificate,
    OrchestratorConfig, Order, OrderStatus, RetryPolicy,
};

/// Scriptable stand-in for the CA, DNS provider, challenge host, secret
/// store and webhook sink. Records every invocation in call order.
pub struct FakeActivities {
    zones: Vec<String>,
    created_status: OrderStatus,
    finalized_status: OrderStatus,
    propagation_seconds: Option<u64>,
    precondition_error: Option<ActivityError>,
    panic_on_merge: Option<String>,
    not_ready: Mutex<usize>,
    calls: Mutex<Vec<ActivityName>>,
    completed: Mutex<Vec<CompletedEvent>>,
}

impl FakeActivities {
    pub fn with_zones(zones: &[&str]) -> Self {
        Self {
            zones: zones.iter().map(|zone| zone.to_string()).collect(),
            created_status: OrderStatus::Pending,
            finalized_status: OrderStatus::Valid,
            propagation_seconds: None,
            precondition_error: None,
            panic_on_merge: None,
            not_ready: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
        }
    }

    pub fn created_status(mut self, status: OrderStatus) -> Self {
        self.created_status = status;
        self
    }

    pub fn finalized_status(mut self, status: OrderStatus) -> Self {
        self.finalized_status = status;
        self
    }

    pub fn propagation_seconds(mut self, seconds: u64) -> Self {
        self.propagation_seconds = Some(seconds);
        self
    }

    pub fn failing_precondition(mut self, error: ActivityError) -> Self {
        self.precondition_error = Some(error);
        self
    }

    /// MergeCertificate panics for this certificate name.
    pub fn panicking_merge_for(mut self, certificate_name: &str) -> Self {
        self.panic_on_merge = Some(certificate_name.to_string());
        self
    }

    /// CheckIsReady reports "still pending" (retriable) this many times first.
    pub fn not_ready_for(self, checks: usize) -> Self {
        *self.not_ready.lock().unwrap() = checks;
        self
    }

    pub fn calls(&self) -> Vec<ActivityName> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, activity: ActivityName) -> usize {
        self.calls().iter().filter(|call| **call == activity).count()
    }

    pub fn completed_events(&self) -> Vec<CompletedEvent> {
        self.completed.lock().unwrap().clone()
    }

    fn log(&self, activity: ActivityName) {
        self.calls.lock().unwrap().push(activity);
    }

    fn order(&self, status: OrderStatus, authorizations: Vec<String>) -> Order {
        Order {
            url: "https://acme.test/order/1".into(),
            status,
            authorizations,
            finalize: Some("https://acme.test/order/1/finalize".into()),
            certificate: (status == OrderStatus::Valid)
                .then(|| "https://acme.test/cert/1".to_string()),
        }
    }

    fn challenges(&self, authorizations: &[String], prefix: &str) -> Vec<ChallengeResult> {
        authorizations
            .iter()
            .enumerate()
            .map(|(index, authorization)| ChallengeResult {
                url: format!("{authorization}/challenge"),
                dns_name: authorization
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string(),
                resource_name: format!("{prefix}{index}"),
                resource_value: format!("token-{index}"),
            })
            .collect()
    }
}

impl IssuanceActivities for FakeActivities {
    fn resolve_zones(&self) -> Result<Vec<String>, ActivityError> {
        self.log(ActivityName::ResolveZones);
        Ok(self.zones.clone())
    }

    fn dns01_precondition(&self, _dns_names: &[String]) -> Result<(), ActivityError> {
        self.log(ActivityName::Dns01Precondition);
        self.precondition_error.clone().map_or(Ok(()), Err)
    }

    fn http01_precondition(&self, _dns_names: &[String]) -> Result<(), ActivityError> {
        self.log(ActivityName::Http01Precondition);
        self.precondition_error.clone().map_or(Ok(()), Err)
    }

    fn create_order(&self, dns_names: &[String]) -> Result<Order, ActivityError> {
        self.log(ActivityName::CreateOrder);
        let authorizations = dns_names
            .iter()
            .map(|name| format!("https://acme.test/authz/{name}"))
            .collect();
        Ok(self.order(self.created_status, authorizations))
    }

    fn dns01_authorization(
        &self,
        authorizations: &[String],
    ) -> Result<Dns01Authorization, ActivityError> {
        self.log(ActivityName::Dns01Authorization);
        Ok(Dns01Authorization {
            challenge_results: self.challenges(authorizations, "_acme-challenge."),
            propagation_seconds: self.propagation_seconds,
        })
    }

    fn http01_authorization(
        &self,
        authorizations: &[String],
    ) -> Result<Vec<ChallengeResult>, ActivityError> {
        self.log(ActivityName::Http01Authorization);
        Ok(self.challenges(authorizations, "/.well-known/acme-challenge/"))
    }

    fn check_dns_challenge(&self, _challenges: &[ChallengeResult]) -> Result<(), ActivityError> {
        self.log(ActivityName::CheckDnsChallenge);
        Ok(())
    }

    fn check_http_challenge(&self, _challenges: &[ChallengeResult]) -> Result<(), ActivityError> {
        self.log(ActivityName::CheckHttpChallenge);
        Ok(())
    }

    fn answer_challenges(&self, _challenges: &[ChallengeResult]) -> Result<(), ActivityError> {
        self.log(ActivityName::AnswerChallenges);
        Ok(())
    }

    fn check_is_ready(
        &self,
        order: &Order,
        _challenges: &[ChallengeResult],
    ) -> Result<Order, ActivityError> {
        self.log(ActivityName::CheckIsReady);
        let mut not_ready = self.not_ready.lock().unwrap();
        if *not_ready > 0 {
            *not_ready -= 1;
            return Err(ActivityError::retriable("order is still pending"));
        }
        Ok(self.order(OrderStatus::Ready, order.authorizations.clone()))
    }

    fn cleanup_dns_challenge(&self, _challenges: &[ChallengeResult]) -> Result<(), ActivityError> {
        self.log(ActivityName::CleanupDnsChallenge);
        Ok(())
    }

    fn cleanup_http_challenge(
        &self,
        _challenges: &[ChallengeResult],
    ) -> Result<(), ActivityError> {
        self.log(ActivityName::CleanupHttpChallenge);
        Ok(())
    }

    fn finalize_order(
        &self,
        _request: &CertificateRequest,
        order: &Order,
    ) -> Result<Order, ActivityError> {
        self.log(ActivityName::FinalizeOrder);
        Ok(self.order(self.finalized_status, order.authorizations.clone()))
    }

    fn check_is_valid(&self, order: &Order) -> Result<Order, ActivityError> {
        self.log(ActivityName::CheckIsValid);
        Ok(self.order(OrderStatus::Valid, order.authorizations.clone()))
    }

    fn merge_certificate(
        &self,
        certificate_name: &str,
        _order: &Order,
    ) -> Result<IssuedCertificate, ActivityError> {
        self.log(ActivityName::MergeCertificate);
        if self.panic_on_merge.as_deref() == Some(certificate_name) {
            panic!("secret store crashed while merging {certificate_name}");
        }
        Ok(IssuedCertificate {
            id: format!("https://vault.test/certificates/{certificate_name}/1"),
            expires_on: DateTime::parse_from_rfc3339("2027-01-12T00:00:00Z")
                .map_err(|err| ActivityError::fatal(err.to_string()))?
                .with_timezone(&Utc),
            dns_names: Vec::new(),
        })
    }

    fn send_completed_event(
        &self,
        certificate_id: &str,
        expires_on: DateTime<Utc>,
        dns_names: &[String],
    ) -> Result<(), ActivityError> {
        self.log(ActivityName::SendCompletedEvent);
        self.completed.lock().unwrap().push(CompletedEvent {
            certificate_id: certificate_id.to_string(),
            expires_on,
            dns_names: dns_names.to_vec(),
        });
        Ok(())
    }
}

pub fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

pub fn request(certificate_name: &str, dns_names: &[&str]) -> CertificateRequest {
    CertificateRequest::new(certificate_name, names(dns_names))
}

/// Config with short, deterministic waits.
pub fn test_config() -> OrchestratorConfig {
    let policy = RetryPolicy {
        first_retry_interval_secs: 5,
        backoff_coefficient: 1.0,
        max_retry_interval_secs: 5,
        max_attempts: 12,
        max_wait_secs: 60,
    };
    OrchestratorConfig {
        activity_retry: policy.clone(),
        challenge_check: policy.clone(),
        ready_wait: policy.clone(),
        valid_wait: policy,
        ..OrchestratorConfig::default()
    }
}

pub struct Harness {
    pub host: Host,
    pub store: Arc<MemoryHistoryStore>,
    pub clock: ManualClock,
    pub activities: Arc<FakeActivities>,
}

pub fn harness(activities: FakeActivities) -> Harness {
    harness_with_config(activities, test_config())
}

pub fn harness_with_config(activities: FakeActivities, config: OrchestratorConfig) -> Harness {
    let store = Arc::new(MemoryHistoryStore::new());
    let clock = ManualClock::default();
    let activities = Arc::new(activities);
    let host = Host::new(
        store.clone(),
        activities.clone(),
        Arc::new(clock.clone()),
        config,
    );
    Harness {
        host,
        store,
        clock,
        activities,
    }
}

pub fn timers(history: &[HistoryEvent]) -> Vec<Duration> {
    history
        .iter()
        .filter_map(|event| match event {
            HistoryEvent::TimerCreated {
                timestamp, fire_at, ..
            } => Some(*fire_at - *timestamp),
            _ => None,
        })
        .collect()
}

pub fn create_temp_dir() -> Result<PathBuf> {
    let mut path = std::env::temp_dir();
    path.push(format!("renewal_integration_{}", Uuid::new_v4().as_simple()));
    fs::create_dir_all(&path)?;
    Ok(path)
}
