use std::sync::Arc;

use anyhow::Result;

use cert_renewal::{
    issuance::ActivityName,
    runtime::{worker, Host, RunOutcome},
    storage::MemoryHistoryStore,
};

use super::test_utils::{request, test_config, FakeActivities};

#[tokio::test]
async fn drives_instances_concurrently_through_timers() -> Result<()> {
    // One-second propagation delay on the real clock keeps the timer path honest.
    let activities = Arc::new(FakeActivities::with_zones(&["example.com"]).propagation_seconds(1));
    let host = Arc::new(Host::with_system_clock(
        Arc::new(MemoryHistoryStore::new()),
        activities.clone(),
        test_config(),
    ));

    let ids = vec![
        host.start(&request("dns-a", &["a.example.com"]))?,
        host.start(&request("dns-b", &["*.example.com"]))?,
        host.start(&request("http-c", &["c.example.org"]))?,
    ];

    let results = worker::drive_all(host.clone(), ids.clone()).await;
    assert_eq!(results.len(), 3);
    for ((id, outcome), expected) in results.into_iter().zip(&ids) {
        assert_eq!(&id, expected);
        assert_eq!(outcome?, RunOutcome::Completed);
    }
    assert_eq!(activities.count(ActivityName::MergeCertificate), 3);
    assert_eq!(activities.count(ActivityName::CheckDnsChallenge), 2);
    assert_eq!(activities.count(ActivityName::CheckHttpChallenge), 1);
    Ok(())
}

#[tokio::test]
async fn drive_recovered_finishes_started_instances() -> Result<()> {
    let activities = Arc::new(FakeActivities::with_zones(&[]));
    let host = Arc::new(Host::with_system_clock(
        Arc::new(MemoryHistoryStore::new()),
        activities.clone(),
        test_config(),
    ));
    let id = host.start(&request("foo", &["foo.org"]))?;

    let results = worker::drive_recovered(host.clone()).await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, id);
    assert!(host.recover()?.is_empty());
    assert_eq!(activities.count(ActivityName::SendCompletedEvent), 1);
    Ok(())
}

#[tokio::test]
async fn drive_all_reports_every_instance_even_when_a_pass_panics() -> Result<()> {
    let activities = Arc::new(FakeActivities::with_zones(&[]).panicking_merge_for("crashes"));
    let host = Arc::new(Host::with_system_clock(
        Arc::new(MemoryHistoryStore::new()),
        activities.clone(),
        test_config(),
    ));
    let ids = vec![
        host.start(&request("crashes", &["crash.example.org"]))?,
        host.start(&request("works", &["works.example.org"]))?,
    ];

    let results = worker::drive_all(host.clone(), ids.clone()).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, ids[0]);
    assert!(results[0].1.is_err());
    assert_eq!(results[1].0, ids[1]);
    assert_eq!(results[1].1.as_ref().ok(), Some(&RunOutcome::Completed));
    Ok(())
}
