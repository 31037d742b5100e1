//! Instance lifecycle: start, replay passes, recovery and operator queries.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::OrchestratorConfig,
    core::types::CertificateRequest,
    issuance::{
        activities::IssuanceActivities,
        orchestrator::{issue_certificate, IssuanceInput},
        request::validate_request,
    },
    runtime::{
        clock::{Clock, SystemClock},
        context::OrchestrationContext,
        error::OrchestrationError,
        history::{HistoryEvent, InstanceRecord, InstanceStatus},
    },
    storage::history::HistoryStore,
};

/// Result of one replay pass over an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed { reason: String },
    Suspended { resume_at: DateTime<Utc> },
}

impl RunOutcome {
    fn status(&self) -> InstanceStatus {
        match self {
            RunOutcome::Completed => InstanceStatus::Completed,
            RunOutcome::Failed { reason } => InstanceStatus::Failed {
                reason: reason.clone(),
            },
            RunOutcome::Suspended { resume_at } => InstanceStatus::Suspended {
                resume_at: *resume_at,
            },
        }
    }
}

/// Runs issuance orchestrations against a history store.
///
/// A pass replays the recorded history and continues live until the
/// orchestration completes, fails or waits on a durable timer. Nothing is
/// kept in memory between passes, so any host sharing the store can pick an
/// instance up after a restart. Passes over the same instance are serialized
/// within a host: a second concurrent pass fails instead of running.
pub struct Host {
    store: Arc<dyn HistoryStore>,
    activities: Arc<dyn IssuanceActivities>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    in_flight: Mutex<HashSet<String>>,
}

// Held for the duration of a pass; releases the instance on drop.
struct PassClaim<'h> {
    in_flight: &'h Mutex<HashSet<String>>,
    instance_id: String,
}

impl Drop for PassClaim<'_> {
    fn drop(&mut self) {
        lock_in_flight(self.in_flight).remove(&self.instance_id);
    }
}

fn lock_in_flight(in_flight: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    in_flight
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Host {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        activities: Arc<dyn IssuanceActivities>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            activities,
            clock,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_system_clock(
        store: Arc<dyn HistoryStore>,
        activities: Arc<dyn IssuanceActivities>,
        config: OrchestratorConfig,
    ) -> Self {
        Self::new(store, activities, Arc::new(SystemClock), config)
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Validates the request and schedules a new instance for it. The host's
    /// configuration is recorded with the request and governs the instance
    /// for its whole life.
    pub fn start(&self, request: &CertificateRequest) -> Result<String> {
        self.config
            .validate()
            .context("invalid orchestrator configuration")?;
        let request = validate_request(request)?;
        let instance_id = Uuid::new_v4().to_string();
        let now = self.clock.now();

        self.store.create_instance(&InstanceRecord {
            instance_id: instance_id.clone(),
            certificate_name: request.certificate_name.clone(),
            dns_names: request.dns_names.clone(),
            status: InstanceStatus::Pending,
            created_at: now,
            updated_at: now,
        })?;
        let input = serde_json::to_value(IssuanceInput {
            request: request.clone(),
            config: self.config.clone(),
        })
        .context("failed to serialize instance input")?;
        self.store.append_event(
            &instance_id,
            0,
            &HistoryEvent::OrchestrationStarted {
                timestamp: now,
                input,
            },
        )?;

        info!(
            "[host] started {} for {} ({})",
            instance_id,
            request.certificate_name,
            request.dns_names.join(", ")
        );
        Ok(instance_id)
    }

    /// Starts a fresh instance for the request of an earlier one, under this
    /// host's current configuration.
    pub fn restart(&self, instance_id: &str) -> Result<String> {
        let history = self.store.load_history(instance_id)?;
        let input: IssuanceInput = match history.first() {
            Some(HistoryEvent::OrchestrationStarted { input, .. }) => {
                serde_json::from_value(input.clone())
                    .with_context(|| format!("invalid recorded input for {instance_id}"))?
            }
            _ => return Err(anyhow!("instance not found: {instance_id}")),
        };
        let new_id = self.start(&input.request)?;
        info!("[host] restarted {} as {}", instance_id, new_id);
        Ok(new_id)
    }

    /// Executes one replay pass and persists the resulting status.
    ///
    /// Terminal instances are reported without being re-executed. Storage
    /// failures are returned as errors and leave the instance resumable, as
    /// does a call made while another pass over the instance is in progress.
    pub fn run_once(&self, instance_id: &str) -> Result<RunOutcome> {
        let _claim = self.claim(instance_id)?;
        let record = self
            .store
            .get_instance(instance_id)?
            .ok_or_else(|| anyhow!("instance not found: {instance_id}"))?;
        match record.status {
            InstanceStatus::Completed => return Ok(RunOutcome::Completed),
            InstanceStatus::Failed { reason } => return Ok(RunOutcome::Failed { reason }),
            _ => {}
        }

        self.store
            .update_status(instance_id, &InstanceStatus::Running)?;
        let history = self.store.load_history(instance_id)?;
        debug!(
            "[host] replaying {} ({} recorded events)",
            instance_id,
            history.len()
        );
        let tail = (history.len(), history.last().cloned());

        let outcome = match OrchestrationContext::new(
            instance_id,
            history,
            self.store.as_ref(),
            self.clock.as_ref(),
        ) {
            Ok(mut ctx) => {
                let result = issue_certificate(&mut ctx, self.activities.as_ref());
                settle(&mut ctx, result.map(|_| ()))?
            }
            Err(err) => {
                let reason = err.to_string();
                self.append_failure(instance_id, tail, &reason)?;
                RunOutcome::Failed { reason }
            }
        };

        match &outcome {
            RunOutcome::Completed => info!("[host] {} completed", instance_id),
            RunOutcome::Failed { reason } => warn!("[host] {} failed: {}", instance_id, reason),
            RunOutcome::Suspended { resume_at } => debug!(
                "[host] {} suspended until {}",
                instance_id,
                resume_at.to_rfc3339()
            ),
        }
        self.store.update_status(instance_id, &outcome.status())?;
        Ok(outcome)
    }

    /// Runs passes until the instance completes or fails, sleeping on the
    /// host clock through each suspension.
    pub fn run_to_completion(&self, instance_id: &str) -> Result<RunOutcome> {
        loop {
            match self.run_once(instance_id)? {
                RunOutcome::Suspended { resume_at } => self.clock.sleep_until(resume_at),
                outcome => return Ok(outcome),
            }
        }
    }

    /// Instances that still need work, for example after a restart.
    pub fn recover(&self) -> Result<Vec<InstanceRecord>> {
        let pending: Vec<InstanceRecord> = self
            .store
            .list_instances()?
            .into_iter()
            .filter(|record| !record.status.is_terminal())
            .collect();
        if !pending.is_empty() {
            info!("[host] recovered {} unfinished instance(s)", pending.len());
        }
        Ok(pending)
    }

    /// Runs one pass for every unfinished instance that is not waiting on a
    /// future timer.
    pub fn run_due(&self) -> Result<Vec<(String, RunOutcome)>> {
        let now = self.clock.now();
        let mut outcomes = Vec::new();
        for record in self.recover()? {
            if record.status.resume_at().is_some_and(|resume_at| resume_at > now) {
                continue;
            }
            let outcome = self.run_once(&record.instance_id)?;
            outcomes.push((record.instance_id, outcome));
        }
        Ok(outcomes)
    }

    fn claim(&self, instance_id: &str) -> Result<PassClaim<'_>> {
        if !lock_in_flight(&self.in_flight).insert(instance_id.to_string()) {
            return Err(anyhow!("a pass over {instance_id} is already in progress"));
        }
        Ok(PassClaim {
            in_flight: &self.in_flight,
            instance_id: instance_id.to_string(),
        })
    }

    // Terminal event for a history the replay context refused to load.
    fn append_failure(
        &self,
        instance_id: &str,
        (recorded, last): (usize, Option<HistoryEvent>),
        reason: &str,
    ) -> Result<()> {
        if let Some(HistoryEvent::OrchestrationFailed { .. }) = last {
            return Ok(());
        }
        let now = self.clock.now();
        let timestamp = last.map_or(now, |event| event.timestamp().max(now));
        self.store.append_event(
            instance_id,
            recorded,
            &HistoryEvent::OrchestrationFailed {
                timestamp,
                reason: reason.to_string(),
            },
        )
    }

    pub fn status(&self, instance_id: &str) -> Result<Option<InstanceRecord>> {
        self.store.get_instance(instance_id)
    }

    pub fn history(&self, instance_id: &str) -> Result<Vec<HistoryEvent>> {
        self.store.load_history(instance_id)
    }

    pub fn purge(&self, instance_id: &str) -> Result<()> {
        self.store.purge(instance_id)?;
        info!("[host] purged {}", instance_id);
        Ok(())
    }
}

fn settle(
    ctx: &mut OrchestrationContext<'_>,
    result: Result<(), OrchestrationError>,
) -> Result<RunOutcome> {
    let failure = match result.and_then(|()| ctx.finish_completed()) {
        Ok(()) => return Ok(RunOutcome::Completed),
        Err(OrchestrationError::Suspended { resume_at }) => {
            return Ok(RunOutcome::Suspended { resume_at });
        }
        Err(OrchestrationError::History(err)) => {
            return Err(anyhow!("history store error for {}: {err}", ctx.instance_id()));
        }
        Err(err) => err,
    };

    let reason = failure.to_string();
    ctx.finish_failed(&reason)
        .map_err(|err| anyhow!("failed to record failure for {}: {err}", ctx.instance_id()))?;
    Ok(RunOutcome::Failed { reason })
}
