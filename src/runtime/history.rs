use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::issuance::activities::ActivityName;

/// One entry of an instance's append-only event history.
///
/// `step` is the index of the durable operation (activity call or timer) in
/// the orchestration's control flow. A timer occupies one step and two events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEvent {
    OrchestrationStarted {
        timestamp: DateTime<Utc>,
        input: Value,
    },
    ActivityCompleted {
        step: usize,
        timestamp: DateTime<Utc>,
        activity: ActivityName,
        input: Value,
        output: Value,
    },
    ActivityFailed {
        step: usize,
        timestamp: DateTime<Utc>,
        activity: ActivityName,
        input: Value,
        reason: String,
        retriable: bool,
    },
    TimerCreated {
        step: usize,
        timestamp: DateTime<Utc>,
        fire_at: DateTime<Utc>,
    },
    TimerFired {
        step: usize,
        timestamp: DateTime<Utc>,
        fire_at: DateTime<Utc>,
    },
    OrchestrationCompleted {
        timestamp: DateTime<Utc>,
    },
    OrchestrationFailed {
        timestamp: DateTime<Utc>,
        reason: String,
    },
}

impl HistoryEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            HistoryEvent::OrchestrationStarted { timestamp, .. }
            | HistoryEvent::ActivityCompleted { timestamp, .. }
            | HistoryEvent::ActivityFailed { timestamp, .. }
            | HistoryEvent::TimerCreated { timestamp, .. }
            | HistoryEvent::TimerFired { timestamp, .. }
            | HistoryEvent::OrchestrationCompleted { timestamp }
            | HistoryEvent::OrchestrationFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Short description used in non-determinism reports.
    pub fn describe(&self) -> String {
        match self {
            HistoryEvent::OrchestrationStarted { .. } => "OrchestrationStarted".to_string(),
            HistoryEvent::ActivityCompleted { step, activity, .. } => {
                format!("ActivityCompleted({activity}) at step {step}")
            }
            HistoryEvent::ActivityFailed { step, activity, .. } => {
                format!("ActivityFailed({activity}) at step {step}")
            }
            HistoryEvent::TimerCreated { step, fire_at, .. } => {
                format!("TimerCreated({}) at step {step}", fire_at.to_rfc3339())
            }
            HistoryEvent::TimerFired { step, .. } => format!("TimerFired at step {step}"),
            HistoryEvent::OrchestrationCompleted { .. } => "OrchestrationCompleted".to_string(),
            HistoryEvent::OrchestrationFailed { .. } => "OrchestrationFailed".to_string(),
        }
    }
}

/// Lifecycle state of an orchestration instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Running,
    Suspended { resume_at: DateTime<Utc> },
    Completed,
    Failed { reason: String },
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Running => "running",
            InstanceStatus::Suspended { .. } => "suspended",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Completed | InstanceStatus::Failed { .. })
    }

    pub fn resume_at(&self) -> Option<DateTime<Utc>> {
        match self {
            InstanceStatus::Suspended { resume_at } => Some(*resume_at),
            _ => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            InstanceStatus::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub certificate_name: String,
    pub dns_names: Vec<String>,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
