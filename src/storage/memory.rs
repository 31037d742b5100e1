use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{anyhow, Result};
use chrono::Utc;

use crate::runtime::history::{HistoryEvent, InstanceRecord, InstanceStatus};

use super::history::HistoryStore;

#[derive(Default)]
struct Inner {
    instances: HashMap<String, InstanceRecord>,
    histories: HashMap<String, Vec<HistoryEvent>>,
}

/// In-memory history store for tests and hosts that do not need to survive a restart.
#[derive(Clone, Default)]
pub struct MemoryHistoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|err| anyhow!("history store mutex poisoned: {err}"))
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn create_instance(&self, record: &InstanceRecord) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.instances.contains_key(&record.instance_id) {
            return Err(anyhow!("instance already exists: {}", record.instance_id));
        }
        inner
            .instances
            .insert(record.instance_id.clone(), record.clone());
        inner
            .histories
            .insert(record.instance_id.clone(), Vec::new());
        Ok(())
    }

    fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>> {
        Ok(self.lock()?.instances.get(instance_id).cloned())
    }

    fn list_instances(&self) -> Result<Vec<InstanceRecord>> {
        let mut records: Vec<InstanceRecord> = self.lock()?.instances.values().cloned().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });
        Ok(records)
    }

    fn update_status(&self, instance_id: &str, status: &InstanceStatus) -> Result<()> {
        let mut inner = self.lock()?;
        let record = inner
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| anyhow!("instance not found: {instance_id}"))?;
        record.status = status.clone();
        record.updated_at = Utc::now();
        Ok(())
    }

    fn append_event(
        &self,
        instance_id: &str,
        sequence: usize,
        event: &HistoryEvent,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        let history = inner
            .histories
            .get_mut(instance_id)
            .ok_or_else(|| anyhow!("instance not found: {instance_id}"))?;
        if history.len() != sequence {
            return Err(anyhow!(
                "history for {instance_id} has {} events; refusing to write sequence {sequence}",
                history.len()
            ));
        }
        history.push(event.clone());
        Ok(())
    }

    fn load_history(&self, instance_id: &str) -> Result<Vec<HistoryEvent>> {
        Ok(self
            .lock()?
            .histories
            .get(instance_id)
            .cloned()
            .unwrap_or_default())
    }

    fn purge(&self, instance_id: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.instances.remove(instance_id);
        inner.histories.remove(instance_id);
        Ok(())
    }
}
