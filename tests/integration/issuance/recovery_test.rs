use std::{fs, sync::Arc};

use anyhow::{anyhow, Result};
use chrono::Duration;

use cert_renewal::{
    issuance::ActivityName,
    runtime::{Clock, HistoryEvent, Host, InstanceStatus, ManualClock, RunOutcome},
    storage::{Db, SqliteHistoryStore},
    OrchestratorConfig,
};

use super::test_utils::{create_temp_dir, request, test_config, timers, FakeActivities};

fn sqlite_host(
    data_dir: &std::path::Path,
    activities: Arc<FakeActivities>,
    clock: &ManualClock,
) -> Result<Host> {
    sqlite_host_with_config(data_dir, activities, clock, test_config())
}

fn sqlite_host_with_config(
    data_dir: &std::path::Path,
    activities: Arc<FakeActivities>,
    clock: &ManualClock,
    config: OrchestratorConfig,
) -> Result<Host> {
    let store = SqliteHistoryStore::initialize(Db::initialize_with_path(data_dir)?)?;
    Ok(Host::new(
        Arc::new(store),
        activities,
        Arc::new(clock.clone()),
        config,
    ))
}

#[test]
fn suspended_instance_resumes_after_restart() -> Result<()> {
    let temp_dir = create_temp_dir()?;
    let clock = ManualClock::default();

    let first_run = Arc::new(FakeActivities::with_zones(&["example.com"]));
    let id = {
        let host = sqlite_host(&temp_dir, first_run.clone(), &clock)?;
        let id = host.start(&request("example", &["example.com"]))?;
        assert!(matches!(host.run_once(&id)?, RunOutcome::Suspended { .. }));
        id
    };
    assert_eq!(first_run.calls().len(), 4);

    // A new process with fresh collaborators picks the instance up from disk.
    clock.advance(Duration::seconds(10));
    let second_run = Arc::new(FakeActivities::with_zones(&["example.com"]));
    let host = sqlite_host(&temp_dir, second_run.clone(), &clock)?;

    let pending = host.recover()?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].instance_id, id);
    assert!(matches!(pending[0].status, InstanceStatus::Suspended { .. }));

    assert_eq!(host.run_once(&id)?, RunOutcome::Completed);
    assert_eq!(
        second_run.calls(),
        vec![
            ActivityName::CheckDnsChallenge,
            ActivityName::AnswerChallenges,
            ActivityName::CheckIsReady,
            ActivityName::CleanupDnsChallenge,
            ActivityName::FinalizeOrder,
            ActivityName::MergeCertificate,
            ActivityName::SendCompletedEvent,
        ]
    );
    assert_eq!(first_run.calls().len(), 4);
    assert!(host.recover()?.is_empty());

    fs::remove_dir_all(&temp_dir)?;
    Ok(())
}

#[test]
fn resumed_instance_keeps_the_config_it_started_with() -> Result<()> {
    let temp_dir = create_temp_dir()?;
    let clock = ManualClock::default();

    let id = {
        let host = sqlite_host(
            &temp_dir,
            Arc::new(FakeActivities::with_zones(&["example.com"])),
            &clock,
        )?;
        let id = host.start(&request("example", &["example.com"]))?;
        assert!(matches!(host.run_once(&id)?, RunOutcome::Suspended { .. }));
        id
    };

    // The new process runs with a longer propagation delay and no retries.
    let mut changed = test_config();
    changed.default_propagation_secs = 30;
    changed.ready_wait.max_attempts = 1;
    let activities = Arc::new(FakeActivities::with_zones(&["example.com"]).not_ready_for(1));
    let host = sqlite_host_with_config(&temp_dir, activities.clone(), &clock, changed)?;

    clock.advance(Duration::seconds(10));
    assert!(matches!(host.run_once(&id)?, RunOutcome::Suspended { .. }));
    clock.advance(Duration::seconds(5));
    assert_eq!(host.run_once(&id)?, RunOutcome::Completed);

    assert_eq!(activities.count(ActivityName::CheckIsReady), 2);
    assert_eq!(
        timers(&host.history(&id)?),
        vec![Duration::seconds(10), Duration::seconds(5)]
    );

    // Restarting picks up the new configuration.
    let retry = host.restart(&id)?;
    assert!(matches!(host.run_once(&retry)?, RunOutcome::Suspended { .. }));
    assert_eq!(timers(&host.history(&retry)?), vec![Duration::seconds(30)]);

    fs::remove_dir_all(&temp_dir)?;
    Ok(())
}

#[test]
fn run_due_skips_instances_waiting_on_future_timers() -> Result<()> {
    let temp_dir = create_temp_dir()?;
    let clock = ManualClock::default();
    let activities = Arc::new(FakeActivities::with_zones(&["example.com"]));
    let host = sqlite_host(&temp_dir, activities.clone(), &clock)?;

    let waiting = host.start(&request("dns", &["example.com"]))?;
    assert!(matches!(host.run_once(&waiting)?, RunOutcome::Suspended { .. }));
    let fresh = host.start(&request("http", &["foo.org"]))?;

    let outcomes = host.run_due()?;
    assert_eq!(outcomes, vec![(fresh.clone(), RunOutcome::Completed)]);

    clock.advance(Duration::seconds(10));
    let outcomes = host.run_due()?;
    assert_eq!(outcomes, vec![(waiting, RunOutcome::Completed)]);

    fs::remove_dir_all(&temp_dir)?;
    Ok(())
}

#[test]
fn persisted_history_is_complete_and_ordered() -> Result<()> {
    let temp_dir = create_temp_dir()?;
    let clock = ManualClock::default();
    let host = sqlite_host(
        &temp_dir,
        Arc::new(FakeActivities::with_zones(&["example.com"])),
        &clock,
    )?;
    let id = host.start(&request("example", &["example.com"]))?;
    assert_eq!(host.run_to_completion(&id)?, RunOutcome::Completed);

    let history = host.history(&id)?;
    assert!(matches!(
        history.first(),
        Some(HistoryEvent::OrchestrationStarted { .. })
    ));
    assert!(matches!(
        history.last(),
        Some(HistoryEvent::OrchestrationCompleted { .. })
    ));
    assert!(history
        .windows(2)
        .all(|pair| pair[0].timestamp() <= pair[1].timestamp()));

    let fired = history
        .iter()
        .find_map(|event| match event {
            HistoryEvent::TimerFired { timestamp, fire_at, .. } => Some((*timestamp, *fire_at)),
            _ => None,
        })
        .ok_or_else(|| anyhow!("timer never fired"))?;
    assert!(fired.0 >= fired.1);
    assert!(clock.now() >= fired.1);

    let record = host.status(&id)?.ok_or_else(|| anyhow!("missing instance"))?;
    assert_eq!(record.status, InstanceStatus::Completed);

    host.purge(&id)?;
    assert!(host.status(&id)?.is_none());
    assert!(host.history(&id)?.is_empty());

    fs::remove_dir_all(&temp_dir)?;
    Ok(())
}
