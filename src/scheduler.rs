//! Periodic distribution of upstream jobs.
//!
//! The scheduler is either stopped or running. While running it ticks once
//! immediately and then every `pollIntervalMs` (re-read each round, so config
//! changes apply without a restart). A tick reclaims timed-out claims, pulls a
//! batch from the [`JobSource`] when at least one CallBox is live, and queues
//! it. Ownership is decided later by whichever CallBox claims first; the
//! round-robin cursor only produces the per-tick distribution report.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::Store;
use crate::upstream::JobSource;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
  pub callbox_id: String,
  pub offered: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
  pub live_workers: usize,
  pub fetched: usize,
  pub submitted: usize,
  pub reclaimed: usize,
  pub distribution: Vec<Offer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
  pub is_running: bool,
  pub poll_interval_ms: u64,
  pub batch_size: usize,
  pub last_tick_at: Option<DateTime<Utc>>,
  pub tick_count: u64,
  pub connected_instances: usize,
  pub live_instances: usize,
  pub queue_length: usize,
}

struct Runner {
  shutdown: Arc<Notify>,
  handle: JoinHandle<()>,
}

#[derive(Default)]
struct RunState {
  runner: Option<Runner>,
  last_tick_at: Option<DateTime<Utc>>,
  tick_count: u64,
}

pub struct SyncScheduler {
  store: Arc<Store>,
  source: Arc<dyn JobSource>,
  cursor: AtomicUsize,
  state: Mutex<RunState>,
}

impl SyncScheduler {
  pub fn new(store: Arc<Store>, source: Arc<dyn JobSource>) -> Self {
    Self {
      store,
      source,
      cursor: AtomicUsize::new(0),
      state: Mutex::new(RunState::default()),
    }
  }

  /// Returns false when the scheduler was already running.
  pub async fn start(self: &Arc<Self>) -> bool {
    let mut state = self.state.lock().await;
    if state.runner.is_some() {
      debug!("Sync scheduler already running");
      return false;
    }

    let shutdown = Arc::new(Notify::new());
    let scheduler = Arc::clone(self);
    let stop = Arc::clone(&shutdown);
    let handle = tokio::spawn(async move {
      loop {
        scheduler.tick().await;
        let interval = Duration::from_millis(scheduler.store.config().await.poll_interval_ms);
        tokio::select! {
          _ = stop.notified() => break,
          _ = tokio::time::sleep(interval) => {}
        }
      }
    });

    state.runner = Some(Runner { shutdown, handle });
    info!("Sync scheduler started");
    true
  }

  /// Returns false when the scheduler was already stopped.
  pub async fn stop(&self) -> bool {
    let runner = self.state.lock().await.runner.take();
    let Some(runner) = runner else {
      debug!("Sync scheduler already stopped");
      return false;
    };

    // notify_one keeps a permit, so a stop issued mid-tick still ends the loop.
    runner.shutdown.notify_one();
    if let Err(e) = runner.handle.await {
      warn!("Sync scheduler task ended abnormally: {e}");
    }
    info!("Sync scheduler stopped");
    true
  }

  pub async fn is_running(&self) -> bool {
    self.state.lock().await.runner.is_some()
  }

  /// One distribution pass, regardless of whether the loop is running.
  pub async fn force_tick(&self) -> TickReport {
    info!("Forced sync tick");
    self.tick().await
  }

  /// Runs only the timeout sweep, returning the ids it touched.
  pub async fn reclaim(&self) -> Vec<String> {
    self
      .store
      .reclaim_expired()
      .await
      .into_iter()
      .map(|change| change.transaction.id)
      .collect()
  }

  async fn tick(&self) -> TickReport {
    let reclaimed = self.store.reclaim_expired().await.len();
    let live = self.store.live_workers().await;
    let mut report = TickReport {
      live_workers: live.len(),
      reclaimed,
      ..Default::default()
    };

    if live.is_empty() {
      info!(reclaimed, "No live CallBox, jobs stay upstream until the next tick");
      self.record_tick().await;
      return report;
    }

    let batch_size = self.store.config().await.batch_size;
    let jobs = self.source.fetch_batch(batch_size).await;
    report.fetched = jobs.len();
    if jobs.is_empty() {
      debug!(live = live.len(), reclaimed, "No upstream jobs to distribute");
      self.record_tick().await;
      return report;
    }

    let mut offered: BTreeMap<String, usize> = BTreeMap::new();
    for job in jobs {
      let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % live.len();
      let submitted = self.store.submit(job).await;
      debug!(transaction_id = %submitted.transaction.id, hint = %live[slot].id, "Transaction offered");
      *offered.entry(live[slot].id.clone()).or_default() += 1;
      report.submitted += 1;
    }
    report.distribution = offered
      .into_iter()
      .map(|(callbox_id, offered)| Offer { callbox_id, offered })
      .collect();

    info!(
      submitted = report.submitted,
      live = report.live_workers,
      reclaimed,
      "Synchronized upstream transactions"
    );
    self.record_tick().await;
    report
  }

  async fn record_tick(&self) {
    let mut state = self.state.lock().await;
    state.last_tick_at = Some(Utc::now());
    state.tick_count += 1;
  }

  pub async fn status(&self) -> SyncStatus {
    let (is_running, last_tick_at, tick_count) = {
      let state = self.state.lock().await;
      (state.runner.is_some(), state.last_tick_at, state.tick_count)
    };
    let config = self.store.config().await;
    let stats = self.store.stats().await;
    let live_instances = self.store.live_workers().await.len();
    SyncStatus {
      is_running,
      poll_interval_ms: config.poll_interval_ms,
      batch_size: config.batch_size,
      last_tick_at,
      tick_count,
      connected_instances: stats.connected_instances,
      live_instances,
      queue_length: stats.queue_length,
    }
  }
}
