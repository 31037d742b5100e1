use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    config::{try_duration_secs, OrchestratorConfig, RetryPolicy},
    core::types::{
        CertificateRequest, ChallengeResult, CompletedEvent, Dns01Authorization,
        IssuedCertificate, Order, OrderStatus,
    },
    issuance::{
        activities::{ActivityName, IssuanceActivities},
        strategy::{select_strategy, ChallengeStrategy},
    },
    runtime::{context::OrchestrationContext, error::OrchestrationError},
};

/// Instance input recorded in `OrchestrationStarted`: the validated request
/// and the configuration the host was running with when it started it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssuanceInput {
    pub request: CertificateRequest,
    pub config: OrchestratorConfig,
}

/// Typed, replay-aware view of [`IssuanceActivities`].
///
/// Each method records its input and result under the next step index and
/// retries retriable failures with the policy configured for that activity.
pub struct ActivityProxy<'c, 'a> {
    ctx: &'c mut OrchestrationContext<'a>,
    activities: &'c dyn IssuanceActivities,
    config: &'c OrchestratorConfig,
}

impl<'c, 'a> ActivityProxy<'c, 'a> {
    pub fn new(
        ctx: &'c mut OrchestrationContext<'a>,
        activities: &'c dyn IssuanceActivities,
        config: &'c OrchestratorConfig,
    ) -> Self {
        Self {
            ctx,
            activities,
            config,
        }
    }

    pub fn context(&mut self) -> &mut OrchestrationContext<'a> {
        self.ctx
    }

    fn is_live(&self) -> bool {
        !self.ctx.is_replaying()
    }

    fn policy(&self, activity: ActivityName) -> &'c RetryPolicy {
        let config = self.config;
        match activity {
            ActivityName::CheckDnsChallenge | ActivityName::CheckHttpChallenge => {
                &config.challenge_check
            }
            ActivityName::CheckIsReady => &config.ready_wait,
            ActivityName::CheckIsValid => &config.valid_wait,
            _ => &config.activity_retry,
        }
    }

    pub fn resolve_zones(&mut self) -> Result<Vec<String>, OrchestrationError> {
        let activities = self.activities;
        let policy = self.policy(ActivityName::ResolveZones);
        self.ctx
            .call_activity_with_retry(ActivityName::ResolveZones, &(), policy, || {
                activities.resolve_zones()
            })
    }

    pub fn dns01_precondition(&mut self, dns_names: &[String]) -> Result<(), OrchestrationError> {
        let activities = self.activities;
        let policy = self.policy(ActivityName::Dns01Precondition);
        self.ctx
            .call_activity_with_retry(ActivityName::Dns01Precondition, dns_names, policy, || {
                activities.dns01_precondition(dns_names)
            })
    }

    pub fn http01_precondition(&mut self, dns_names: &[String]) -> Result<(), OrchestrationError> {
        let activities = self.activities;
        let policy = self.policy(ActivityName::Http01Precondition);
        self.ctx
            .call_activity_with_retry(ActivityName::Http01Precondition, dns_names, policy, || {
                activities.http01_precondition(dns_names)
            })
    }

    pub fn create_order(&mut self, dns_names: &[String]) -> Result<Order, OrchestrationError> {
        let activities = self.activities;
        let policy = self.policy(ActivityName::CreateOrder);
        self.ctx
            .call_activity_with_retry(ActivityName::CreateOrder, dns_names, policy, || {
                activities.create_order(dns_names)
            })
    }

    pub fn dns01_authorization(
        &mut self,
        authorizations: &[String],
    ) -> Result<Dns01Authorization, OrchestrationError> {
        let activities = self.activities;
        let policy = self.policy(ActivityName::Dns01Authorization);
        self.ctx.call_activity_with_retry(
            ActivityName::Dns01Authorization,
            authorizations,
            policy,
            || activities.dns01_authorization(authorizations),
        )
    }

    pub fn http01_authorization(
        &mut self,
        authorizations: &[String],
    ) -> Result<Vec<ChallengeResult>, OrchestrationError> {
        let activities = self.activities;
        let policy = self.policy(ActivityName::Http01Authorization);
        self.ctx.call_activity_with_retry(
            ActivityName::Http01Authorization,
            authorizations,
            policy,
            || activities.http01_authorization(authorizations),
        )
    }

    pub fn check_dns_challenge(
        &mut self,
        challenges: &[ChallengeResult],
    ) -> Result<(), OrchestrationError> {
        let activities = self.activities;
        let policy = self.policy(ActivityName::CheckDnsChallenge);
        self.ctx
            .call_activity_with_retry(ActivityName::CheckDnsChallenge, challenges, policy, || {
                activities.check_dns_challenge(challenges)
            })
    }

    pub fn check_http_challenge(
        &mut self,
        challenges: &[ChallengeResult],
    ) -> Result<(), OrchestrationError> {
        let activities = self.activities;
        let policy = self.policy(ActivityName::CheckHttpChallenge);
        self.ctx
            .call_activity_with_retry(ActivityName::CheckHttpChallenge, challenges, policy, || {
                activities.check_http_challenge(challenges)
            })
    }

    pub fn answer_challenges(
        &mut self,
        challenges: &[ChallengeResult],
    ) -> Result<(), OrchestrationError> {
        let activities = self.activities;
        let policy = self.policy(ActivityName::AnswerChallenges);
        self.ctx
            .call_activity_with_retry(ActivityName::AnswerChallenges, challenges, policy, || {
                activities.answer_challenges(challenges)
            })
    }

    pub fn check_is_ready(
        &mut self,
        order: &Order,
        challenges: &[ChallengeResult],
    ) -> Result<Order, OrchestrationError> {
        let activities = self.activities;
        let policy = self.policy(ActivityName::CheckIsReady);
        self.ctx.call_activity_with_retry(
            ActivityName::CheckIsReady,
            &(order, challenges),
            policy,
            || activities.check_is_ready(order, challenges),
        )
    }

    pub fn cleanup_dns_challenge(
        &mut self,
        challenges: &[ChallengeResult],
    ) -> Result<(), OrchestrationError> {
        let activities = self.activities;
        let policy = self.policy(ActivityName::CleanupDnsChallenge);
        self.ctx.call_activity_with_retry(
            ActivityName::CleanupDnsChallenge,
            challenges,
            policy,
            || activities.cleanup_dns_challenge(challenges),
        )
    }

    pub fn cleanup_http_challenge(
        &mut self,
        challenges: &[ChallengeResult],
    ) -> Result<(), OrchestrationError> {
        let activities = self.activities;
        let policy = self.policy(ActivityName::CleanupHttpChallenge);
        self.ctx.call_activity_with_retry(
            ActivityName::CleanupHttpChallenge,
            challenges,
            policy,
            || activities.cleanup_http_challenge(challenges),
        )
    }

    pub fn finalize_order(
        &mut self,
        request: &CertificateRequest,
        order: &Order,
    ) -> Result<Order, OrchestrationError> {
        let activities = self.activities;
        let policy = self.policy(ActivityName::FinalizeOrder);
        self.ctx.call_activity_with_retry(
            ActivityName::FinalizeOrder,
            &(request, order),
            policy,
            || activities.finalize_order(request, order),
        )
    }

    pub fn check_is_valid(&mut self, order: &Order) -> Result<Order, OrchestrationError> {
        let activities = self.activities;
        let policy = self.policy(ActivityName::CheckIsValid);
        self.ctx
            .call_activity_with_retry(ActivityName::CheckIsValid, order, policy, || {
                activities.check_is_valid(order)
            })
    }

    pub fn merge_certificate(
        &mut self,
        certificate_name: &str,
        order: &Order,
    ) -> Result<IssuedCertificate, OrchestrationError> {
        let activities = self.activities;
        let policy = self.policy(ActivityName::MergeCertificate);
        self.ctx.call_activity_with_retry(
            ActivityName::MergeCertificate,
            &(certificate_name, order),
            policy,
            || activities.merge_certificate(certificate_name, order),
        )
    }

    pub fn send_completed_event(
        &mut self,
        certificate_id: &str,
        expires_on: DateTime<Utc>,
        dns_names: &[String],
    ) -> Result<(), OrchestrationError> {
        let activities = self.activities;
        let policy = self.policy(ActivityName::SendCompletedEvent);
        let event = CompletedEvent {
            certificate_id: certificate_id.to_string(),
            expires_on,
            dns_names: dns_names.to_vec(),
        };
        self.ctx
            .call_activity_with_retry(ActivityName::SendCompletedEvent, &event, policy, || {
                activities.send_completed_event(certificate_id, expires_on, dns_names)
            })
    }
}

/// Runs (or resumes) the issuance state machine for the [`IssuanceInput`]
/// recorded as the instance input.
///
/// Control flow depends only on that input and on values returned through the
/// activity proxy, so replaying the recorded history reproduces the same
/// sequence of steps without repeating side effects.
pub fn issue_certificate(
    ctx: &mut OrchestrationContext<'_>,
    activities: &dyn IssuanceActivities,
) -> Result<IssuedCertificate, OrchestrationError> {
    let IssuanceInput { request, config } = ctx.input()?;
    if request.dns_names.is_empty() {
        return Err(OrchestrationError::InvalidInput(
            "certificate request has no DNS names".to_string(),
        ));
    }
    let instance_id = ctx.instance_id().to_string();
    let mut proxy = ActivityProxy::new(ctx, activities, &config);

    let zones = proxy.resolve_zones()?;
    let strategy = select_strategy(&request.dns_names, &zones);
    if proxy.is_live() {
        info!(
            "[orchestrator] {} issuing {} for {:?} using {}",
            instance_id, request.certificate_name, request.dns_names, strategy
        );
    }

    match strategy {
        ChallengeStrategy::Dns01 => proxy.dns01_precondition(&request.dns_names)?,
        ChallengeStrategy::Http01 => proxy.http01_precondition(&request.dns_names)?,
    }

    let mut order = proxy.create_order(&request.dns_names)?;
    ensure_transition(None, &order, ActivityName::CreateOrder)?;

    if order.status == OrderStatus::Ready {
        if proxy.is_live() {
            info!(
                "[orchestrator] {} order {} already ready; skipping challenges",
                instance_id, order.url
            );
        }
    } else {
        order = complete_challenges(&mut proxy, strategy, order)?;
    }

    let finalized = proxy.finalize_order(&request, &order)?;
    ensure_transition(Some(order.status), &finalized, ActivityName::FinalizeOrder)?;
    order = finalized;

    if order.status != OrderStatus::Valid {
        let checked = proxy.check_is_valid(&order)?;
        ensure_transition(Some(order.status), &checked, ActivityName::CheckIsValid)?;
        if checked.status != OrderStatus::Valid {
            return Err(OrchestrationError::UnexpectedStatus {
                activity: ActivityName::CheckIsValid,
                expected: OrderStatus::Valid,
                found: checked.status,
            });
        }
        order = checked;
    }

    let certificate = proxy.merge_certificate(&request.certificate_name, &order)?;
    proxy.send_completed_event(&certificate.id, certificate.expires_on, &request.dns_names)?;

    if proxy.is_live() {
        info!(
            "[orchestrator] {} stored certificate {} (expires {})",
            instance_id,
            certificate.id,
            certificate.expires_on.to_rfc3339()
        );
    }
    Ok(certificate)
}

// Authorize, wait, answer and clean up; returns the order once it is ready.
fn complete_challenges(
    proxy: &mut ActivityProxy<'_, '_>,
    strategy: ChallengeStrategy,
    order: Order,
) -> Result<Order, OrchestrationError> {
    let challenges = match strategy {
        ChallengeStrategy::Dns01 => {
            let authorization = proxy.dns01_authorization(&order.authorizations)?;
            ensure_challenge_count(&order, &authorization.challenge_results)?;

            let max = proxy.config.max_propagation_secs;
            let seconds = authorization
                .propagation_seconds
                .unwrap_or(proxy.config.default_propagation_secs);
            let too_long = OrchestrationError::PropagationTooLong {
                requested: seconds,
                max,
            };
            if seconds > max {
                return Err(too_long);
            }
            let delay = try_duration_secs(seconds).ok_or(too_long)?;
            if seconds > 0 {
                if proxy.is_live() {
                    info!(
                        "[orchestrator] {} waiting {}s for DNS propagation",
                        proxy.ctx.instance_id(),
                        seconds
                    );
                }
                proxy.context().sleep_for(delay)?;
            }

            proxy.check_dns_challenge(&authorization.challenge_results)?;
            authorization.challenge_results
        }
        ChallengeStrategy::Http01 => {
            let challenges = proxy.http01_authorization(&order.authorizations)?;
            ensure_challenge_count(&order, &challenges)?;
            proxy.check_http_challenge(&challenges)?;
            challenges
        }
    };

    proxy.answer_challenges(&challenges)?;

    let ready = proxy.check_is_ready(&order, &challenges)?;
    ensure_transition(Some(order.status), &ready, ActivityName::CheckIsReady)?;
    if !ready.status.at_least(OrderStatus::Ready) {
        return Err(OrchestrationError::UnexpectedStatus {
            activity: ActivityName::CheckIsReady,
            expected: OrderStatus::Ready,
            found: ready.status,
        });
    }

    match strategy {
        ChallengeStrategy::Dns01 => proxy.cleanup_dns_challenge(&challenges)?,
        ChallengeStrategy::Http01 => proxy.cleanup_http_challenge(&challenges)?,
    }

    Ok(ready)
}

fn ensure_transition(
    previous: Option<OrderStatus>,
    order: &Order,
    activity: ActivityName,
) -> Result<(), OrchestrationError> {
    if order.status == OrderStatus::Invalid {
        return Err(OrchestrationError::OrderInvalid { activity });
    }
    match previous {
        Some(from) if !from.can_advance_to(order.status) => {
            Err(OrchestrationError::StatusRegression {
                from,
                to: order.status,
            })
        }
        _ => Ok(()),
    }
}

fn ensure_challenge_count(
    order: &Order,
    challenges: &[ChallengeResult],
) -> Result<(), OrchestrationError> {
    if challenges.len() != order.authorizations.len() {
        return Err(OrchestrationError::ChallengeCountMismatch {
            authorizations: order.authorizations.len(),
            results: challenges.len(),
        });
    }
    Ok(())
}
