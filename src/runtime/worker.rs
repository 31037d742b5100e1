//! Drives orchestration instances on the tokio runtime.
//!
//! Replay passes touch SQLite and call blocking collaborators, so each pass
//! runs on the blocking pool. Suspended instances wait on `tokio::time::sleep`
//! and hold no thread while they do.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::{debug, warn};
use tokio::task::{spawn_blocking, JoinSet};

use crate::runtime::host::{Host, RunOutcome};

/// Runs one instance until it completes or fails.
pub async fn drive_instance(host: Arc<Host>, instance_id: String) -> Result<RunOutcome> {
    loop {
        let pass_host = host.clone();
        let pass_id = instance_id.clone();
        let outcome = spawn_blocking(move || pass_host.run_once(&pass_id))
            .await
            .map_err(|err| anyhow!("orchestration pass join error: {err}"))??;

        match outcome {
            RunOutcome::Suspended { resume_at } => {
                let wait = (resume_at - host.clock().now())
                    .to_std()
                    .unwrap_or_default();
                debug!(
                    "[worker] {} sleeping {}ms until {}",
                    instance_id,
                    wait.as_millis(),
                    resume_at.to_rfc3339()
                );
                tokio::time::sleep(wait).await;
            }
            outcome => return Ok(outcome),
        }
    }
}

/// Runs every instance concurrently. There is one result per id, in input
/// order; a task that dies without reporting yields an error for its id.
pub async fn drive_all(
    host: Arc<Host>,
    instance_ids: Vec<String>,
) -> Vec<(String, Result<RunOutcome>)> {
    let mut tasks = JoinSet::new();
    for (index, instance_id) in instance_ids.iter().cloned().enumerate() {
        let host = host.clone();
        tasks.spawn(async move { (index, drive_instance(host, instance_id).await) });
    }

    let mut outcomes: Vec<Option<Result<RunOutcome>>> =
        instance_ids.iter().map(|_| None).collect();
    let mut lost = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => outcomes[index] = Some(outcome),
            Err(err) => {
                warn!("[worker] instance task join error: {err}");
                lost.push(err.to_string());
            }
        }
    }

    instance_ids
        .into_iter()
        .zip(outcomes)
        .map(|(instance_id, outcome)| {
            let outcome = outcome.unwrap_or_else(|| {
                Err(anyhow!(
                    "instance task for {instance_id} did not report: {}",
                    lost.join("; ")
                ))
            });
            (instance_id, outcome)
        })
        .collect()
}

/// Picks up every unfinished instance in the store and drives it.
pub async fn drive_recovered(host: Arc<Host>) -> Result<Vec<(String, Result<RunOutcome>)>> {
    let recover_host = host.clone();
    let pending = spawn_blocking(move || recover_host.recover())
        .await
        .map_err(|err| anyhow!("recovery join error: {err}"))??;
    let ids = pending.into_iter().map(|record| record.instance_id).collect();
    Ok(drive_all(host, ids).await)
}
