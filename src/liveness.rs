//! Liveness is derived, never stored: a worker is live when it reports itself
//! active and its last heartbeat is younger than the liveness window.
//!
//! Only new-work distribution consults this. A worker whose heartbeat lapsed
//! can still claim and report on work it already owns.

use chrono::{DateTime, Duration, Utc};

use crate::config::{DEFAULT_LIVENESS_WINDOW_MS, duration_ms};
use crate::error::{DispatchError, Result};
use crate::models::{WorkerInstance, WorkerStatus};
use crate::registry::WorkerRegistry;

#[derive(Debug, Clone, Copy)]
pub struct LivenessMonitor {
  window: Duration,
}

impl Default for LivenessMonitor {
  fn default() -> Self {
    Self {
      window: Duration::milliseconds(DEFAULT_LIVENESS_WINDOW_MS as i64),
    }
  }
}

impl LivenessMonitor {
  pub fn new(window_ms: u64) -> Result<Self> {
    let window = duration_ms(window_ms)
      .ok_or_else(|| DispatchError::Config(format!("liveness window of {window_ms} ms is out of range")))?;
    Ok(Self { window })
  }

  pub fn window(&self) -> Duration {
    self.window
  }

  pub fn is_live(&self, worker: &WorkerInstance, now: DateTime<Utc>) -> bool {
    worker.status == WorkerStatus::Active && now - worker.last_heartbeat_at < self.window
  }

  /// Live workers ordered by id, so the round-robin cursor walks a stable list.
  pub fn live_workers(&self, registry: &WorkerRegistry, now: DateTime<Utc>) -> Vec<WorkerInstance> {
    let mut live: Vec<WorkerInstance> = registry
      .iter()
      .filter(|w| self.is_live(w, now))
      .cloned()
      .collect();
    live.sort_by(|a, b| a.id.cmp(&b.id));
    live
  }
}
