//! Replay-aware execution context for one orchestration pass.
//!
//! Each durable operation (activity call or timer) takes the next step index.
//! While the recorded history still has events, operations are answered from
//! it and verified against what the code asks for; once the history runs out
//! the context executes live and appends each result before handing it back.

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    config::RetryPolicy,
    issuance::activities::{ActivityError, ActivityName},
    runtime::{clock::Clock, error::OrchestrationError, history::HistoryEvent},
    storage::history::HistoryStore,
};

pub struct OrchestrationContext<'a> {
    instance_id: String,
    history: Vec<HistoryEvent>,
    position: usize,
    next_step: usize,
    current_time: DateTime<Utc>,
    input: Value,
    store: &'a dyn HistoryStore,
    clock: &'a dyn Clock,
}

impl<'a> OrchestrationContext<'a> {
    /// Builds a context over a loaded history, which must begin with
    /// `OrchestrationStarted`.
    pub fn new(
        instance_id: impl Into<String>,
        history: Vec<HistoryEvent>,
        store: &'a dyn HistoryStore,
        clock: &'a dyn Clock,
    ) -> Result<Self, OrchestrationError> {
        let instance_id = instance_id.into();
        let (input, started_at) = match history.first() {
            Some(HistoryEvent::OrchestrationStarted { timestamp, input }) => {
                (input.clone(), *timestamp)
            }
            Some(other) => {
                return Err(OrchestrationError::NonDeterministic {
                    step: 0,
                    expected: "OrchestrationStarted".to_string(),
                    found: other.describe(),
                });
            }
            None => {
                return Err(OrchestrationError::History(format!(
                    "history for {instance_id} is empty"
                )));
            }
        };

        Ok(Self {
            instance_id,
            history,
            position: 1,
            next_step: 0,
            current_time: started_at,
            input,
            store,
            clock,
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn input<T: DeserializeOwned>(&self) -> Result<T, OrchestrationError> {
        serde_json::from_value(self.input.clone())
            .map_err(|err| OrchestrationError::InvalidInput(err.to_string()))
    }

    /// True while the context is still answering from recorded history.
    pub fn is_replaying(&self) -> bool {
        self.position < self.history.len()
    }

    /// Deterministic orchestration time: the timestamp of the last event
    /// consumed or recorded. Identical on every replay.
    pub fn current_utc_datetime(&self) -> DateTime<Utc> {
        self.current_time
    }

    /// Runs an activity once, without retries.
    pub fn call_activity<I, O, F>(
        &mut self,
        activity: ActivityName,
        input: &I,
        invoke: F,
    ) -> Result<O, OrchestrationError>
    where
        I: Serialize + ?Sized,
        O: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<O, ActivityError>,
    {
        let (step, outcome) = self.run_step(activity, input, invoke)?;
        outcome.map_err(|err| OrchestrationError::Activity {
            step,
            activity,
            reason: err.reason().to_string(),
        })
    }

    /// Runs an activity, retrying retriable failures on durable timers.
    ///
    /// Gives up with [`OrchestrationError::WaitExpired`] once the policy's
    /// attempt count is used up or the next retry would land past its
    /// maximum wait. Fatal failures are returned straight away.
    pub fn call_activity_with_retry<I, O, F>(
        &mut self,
        activity: ActivityName,
        input: &I,
        policy: &RetryPolicy,
        mut invoke: F,
    ) -> Result<O, OrchestrationError>
    where
        I: Serialize + ?Sized,
        O: Serialize + DeserializeOwned,
        F: FnMut() -> Result<O, ActivityError>,
    {
        let started = self.current_utc_datetime();
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt: u32 = 1;
        let mut interval = policy.first_interval();

        loop {
            let (step, outcome) = self.run_step(activity, input, &mut invoke)?;
            match outcome {
                Ok(output) => return Ok(output),
                Err(err) if err.is_retriable() => {
                    let waited = self.current_utc_datetime() - started;
                    let exhausted = waited
                        .checked_add(&interval)
                        .is_none_or(|next| next > policy.max_wait());
                    if attempt >= max_attempts || exhausted {
                        if !self.is_replaying() {
                            warn!(
                                "[orchestrator] {} {} gave up after {} attempt(s) ({}s): {}",
                                self.instance_id,
                                activity,
                                attempt,
                                waited.num_seconds(),
                                err
                            );
                        }
                        return Err(OrchestrationError::WaitExpired {
                            activity,
                            attempts: attempt,
                            waited_secs: waited.num_seconds(),
                            reason: err.reason().to_string(),
                        });
                    }
                    if !self.is_replaying() {
                        debug!(
                            "[orchestrator] {} {} not ready (attempt {}), retrying in {}s: {}",
                            self.instance_id,
                            activity,
                            attempt,
                            interval.num_seconds(),
                            err
                        );
                    }
                    self.sleep_for(interval)?;
                    attempt += 1;
                    interval = policy.next_interval(interval);
                }
                Err(err) => {
                    return Err(OrchestrationError::Activity {
                        step,
                        activity,
                        reason: err.reason().to_string(),
                    });
                }
            }
        }
    }

    /// Durable timer: returns once orchestration time has reached `fire_at`.
    ///
    /// If the deadline is still in the future the pass stops with
    /// [`OrchestrationError::Suspended`]; the next pass replays up to here and
    /// proceeds without waiting again once the deadline has passed.
    pub fn create_timer(&mut self, fire_at: DateTime<Utc>) -> Result<(), OrchestrationError> {
        let step = self.take_step();

        match self.peek().cloned() {
            Some(HistoryEvent::TimerCreated {
                step: recorded_step,
                fire_at: recorded,
                ..
            }) if recorded_step == step && recorded == fire_at => {
                self.consume();
            }
            Some(other) => {
                return Err(OrchestrationError::NonDeterministic {
                    step,
                    expected: format!("TimerCreated({}) at step {step}", fire_at.to_rfc3339()),
                    found: other.describe(),
                });
            }
            None => {
                let timestamp = self.live_now();
                self.record(HistoryEvent::TimerCreated {
                    step,
                    timestamp,
                    fire_at,
                })?;
            }
        }

        match self.peek().cloned() {
            Some(HistoryEvent::TimerFired {
                step: recorded_step,
                ..
            }) if recorded_step == step => {
                self.consume();
                Ok(())
            }
            Some(other) => Err(OrchestrationError::NonDeterministic {
                step,
                expected: format!("TimerFired at step {step}"),
                found: other.describe(),
            }),
            None => {
                let now = self.clock.now();
                if now < fire_at {
                    return Err(OrchestrationError::Suspended { resume_at: fire_at });
                }
                let timestamp = now.max(self.current_time);
                self.record(HistoryEvent::TimerFired {
                    step,
                    timestamp,
                    fire_at,
                })
            }
        }
    }

    /// Durable timer relative to orchestration time.
    pub fn sleep_for(&mut self, delay: Duration) -> Result<(), OrchestrationError> {
        let fire_at = self
            .current_utc_datetime()
            .checked_add_signed(delay)
            .ok_or_else(|| {
                OrchestrationError::InvalidInput(format!(
                    "timer delay of {}s is out of range",
                    delay.num_seconds()
                ))
            })?;
        self.create_timer(fire_at)
    }

    /// Records successful completion; a no-op when it is already recorded.
    pub(crate) fn finish_completed(&mut self) -> Result<(), OrchestrationError> {
        match self.peek().cloned() {
            Some(HistoryEvent::OrchestrationCompleted { .. }) => {
                self.consume();
                Ok(())
            }
            Some(other) => Err(OrchestrationError::NonDeterministic {
                step: self.next_step,
                expected: "OrchestrationCompleted".to_string(),
                found: other.describe(),
            }),
            None => {
                let timestamp = self.live_now();
                self.record(HistoryEvent::OrchestrationCompleted { timestamp })
            }
        }
    }

    /// Records failure; a no-op when a failure is already recorded.
    pub(crate) fn finish_failed(&mut self, reason: &str) -> Result<(), OrchestrationError> {
        // A failure can surface mid-history (for example a non-deterministic
        // replay), so skip to the end instead of verifying the tail.
        if let Some(HistoryEvent::OrchestrationFailed { .. }) = self.history.last() {
            return Ok(());
        }
        let timestamp = self.live_now();
        self.position = self.history.len();
        self.record(HistoryEvent::OrchestrationFailed {
            timestamp,
            reason: reason.to_string(),
        })
    }

    fn run_step<I, O, F>(
        &mut self,
        activity: ActivityName,
        input: &I,
        invoke: F,
    ) -> Result<(usize, Result<O, ActivityError>), OrchestrationError>
    where
        I: Serialize + ?Sized,
        O: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<O, ActivityError>,
    {
        let step = self.take_step();
        let input_value = serde_json::to_value(input)?;

        if let Some(event) = self.peek().cloned() {
            let outcome = match event {
                HistoryEvent::ActivityCompleted {
                    step: recorded_step,
                    activity: recorded_activity,
                    input: recorded_input,
                    output,
                    ..
                } if recorded_step == step
                    && recorded_activity == activity
                    && recorded_input == input_value =>
                {
                    Ok(serde_json::from_value(output)?)
                }
                HistoryEvent::ActivityFailed {
                    step: recorded_step,
                    activity: recorded_activity,
                    input: recorded_input,
                    reason,
                    retriable,
                    ..
                } if recorded_step == step
                    && recorded_activity == activity
                    && recorded_input == input_value =>
                {
                    Err(if retriable {
                        ActivityError::Retriable(reason)
                    } else {
                        ActivityError::Fatal(reason)
                    })
                }
                other => {
                    return Err(OrchestrationError::NonDeterministic {
                        step,
                        expected: format!("{activity} at step {step} with input {input_value}"),
                        found: other.describe(),
                    });
                }
            };
            self.consume();
            debug!(
                "[replay] {} step {} {} answered from history",
                self.instance_id, step, activity
            );
            return Ok((step, outcome));
        }

        debug!(
            "[orchestrator] {} step {} invoking {}",
            self.instance_id, step, activity
        );
        let outcome = invoke();
        let timestamp = self.live_now();
        match outcome {
            Ok(output) => {
                let output = serde_json::to_value(&output)?;
                self.record(HistoryEvent::ActivityCompleted {
                    step,
                    timestamp,
                    activity,
                    input: input_value,
                    output: output.clone(),
                })?;
                // Hand back the recorded form so live and replayed passes see the same value.
                Ok((step, Ok(serde_json::from_value(output)?)))
            }
            Err(err) => {
                self.record(HistoryEvent::ActivityFailed {
                    step,
                    timestamp,
                    activity,
                    input: input_value,
                    reason: err.reason().to_string(),
                    retriable: err.is_retriable(),
                })?;
                Ok((step, Err(err)))
            }
        }
    }

    fn take_step(&mut self) -> usize {
        let step = self.next_step;
        self.next_step += 1;
        step
    }

    fn peek(&self) -> Option<&HistoryEvent> {
        self.history.get(self.position)
    }

    fn consume(&mut self) {
        if let Some(event) = self.history.get(self.position) {
            self.current_time = event.timestamp();
            self.position += 1;
        }
    }

    // Never lets orchestration time run backwards, even if the wall clock does.
    fn live_now(&self) -> DateTime<Utc> {
        self.clock.now().max(self.current_time)
    }

    fn record(&mut self, event: HistoryEvent) -> Result<(), OrchestrationError> {
        debug_assert!(!self.is_replaying());
        self.store
            .append_event(&self.instance_id, self.history.len(), &event)
            .map_err(|err| OrchestrationError::History(format!("{err:#}")))?;
        self.current_time = event.timestamp();
        self.history.push(event);
        self.position = self.history.len();
        Ok(())
    }
}
