use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

use crate::error::{DispatchError, Result};
use crate::models::{WorkerInstance, WorkerStatus, WorkerSummary};

#[derive(Debug, Clone)]
pub struct Registration {
  pub callbox_id: String,
  pub capabilities: Option<Value>,
  pub version: Option<String>,
  pub location: Option<String>,
}

#[derive(Debug, Default)]
pub struct HeartbeatUpdate {
  pub status: Option<WorkerStatus>,
  pub queue_size: Option<u32>,
  pub metrics: Option<Value>,
}

/// Known CallBox units. Records live for the lifetime of the process.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
  workers: HashMap<String, WorkerInstance>,
}

impl WorkerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Upsert. Re-registering an id replaces its record, counters included.
  pub fn register(&mut self, reg: Registration, now: DateTime<Utc>) -> WorkerInstance {
    let instance = WorkerInstance {
      id: reg.callbox_id.clone(),
      capabilities: reg.capabilities.unwrap_or_else(empty_object),
      version: reg.version.unwrap_or_else(|| "1.0.0".into()),
      location: reg.location.unwrap_or_else(|| "unknown".into()),
      last_heartbeat_at: now,
      status: WorkerStatus::Active,
      queue_size: 0,
      processed_count: 0,
      metrics: empty_object(),
    };
    let replaced = self.workers.insert(reg.callbox_id, instance.clone()).is_some();
    info!(callbox_id = %instance.id, replaced, location = %instance.location, "CallBox registered");
    instance
  }

  pub fn heartbeat(&mut self, id: &str, update: HeartbeatUpdate, now: DateTime<Utc>) -> Result<&WorkerInstance> {
    let worker = self
      .workers
      .get_mut(id)
      .ok_or_else(|| DispatchError::WorkerNotFound(id.to_string()))?;
    worker.last_heartbeat_at = now;
    if let Some(status) = update.status {
      worker.status = status;
    }
    if let Some(queue_size) = update.queue_size {
      worker.queue_size = queue_size;
    }
    if let Some(metrics) = update.metrics {
      merge_metrics(&mut worker.metrics, metrics);
    }
    Ok(worker)
  }

  pub fn get(&self, id: &str) -> Option<&WorkerInstance> {
    self.workers.get(id)
  }

  pub fn contains(&self, id: &str) -> bool {
    self.workers.contains_key(id)
  }

  pub fn iter(&self) -> impl Iterator<Item = &WorkerInstance> {
    self.workers.values()
  }

  pub fn len(&self) -> usize {
    self.workers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.workers.is_empty()
  }

  pub(crate) fn note_claimed(&mut self, id: &str, count: usize) {
    if let Some(worker) = self.workers.get_mut(id) {
      worker.queue_size = worker.queue_size.saturating_add(count as u32);
    }
  }

  pub(crate) fn note_released(&mut self, id: &str) {
    if let Some(worker) = self.workers.get_mut(id) {
      worker.queue_size = worker.queue_size.saturating_sub(1);
    }
  }

  pub(crate) fn note_finished(&mut self, id: &str) {
    if let Some(worker) = self.workers.get_mut(id) {
      worker.processed_count += 1;
      worker.queue_size = worker.queue_size.saturating_sub(1);
    }
  }

  /// Summaries ordered by id.
  pub fn summaries(&self) -> Vec<WorkerSummary> {
    let mut out: Vec<WorkerSummary> = self.workers.values().map(WorkerSummary::from).collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
  }
}

fn empty_object() -> Value {
  Value::Object(Default::default())
}

// Shallow merge, newer keys win.
fn merge_metrics(current: &mut Value, incoming: Value) {
  match (current, incoming) {
    (Value::Object(current), Value::Object(incoming)) => current.extend(incoming),
    (current, incoming) => *current = incoming,
  }
}
