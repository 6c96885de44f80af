//! Shared dispatch state.
//!
//! One async mutex guards the registry, the queue and the dispatch config, so
//! every operation here runs its whole read-modify-write as a single critical
//! section. Two claims racing for the same pending transaction are serialized
//! and the second one no longer sees it as `pending`.

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{ConfigUpdate, DispatchConfig, duration_ms};
use crate::error::{DispatchError, Result};
use crate::liveness::LivenessMonitor;
use crate::models::{
  DispatchStats, HistoryQuery, NewTransaction, ReportedStatus, Transaction, TransactionStatus, WorkerInstance,
};
use crate::queue::{StatusChange, Submitted, TransactionQueue, Transition};
use crate::registry::{HeartbeatUpdate, Registration, WorkerRegistry};

pub const MAX_CLAIM_BATCH: usize = 50;

#[derive(Debug, Default)]
struct Inner {
  registry: WorkerRegistry,
  queue: TransactionQueue,
  config: DispatchConfig,
}

#[derive(Debug, Clone)]
pub struct Claimed {
  pub transactions: Vec<Transaction>,
  pub total_pending: usize,
}

#[derive(Debug)]
pub struct Store {
  inner: Mutex<Inner>,
  liveness: LivenessMonitor,
}

impl Default for Store {
  fn default() -> Self {
    Self::new(DispatchConfig::default(), LivenessMonitor::default())
  }
}

impl Store {
  pub fn new(config: DispatchConfig, liveness: LivenessMonitor) -> Self {
    Self {
      inner: Mutex::new(Inner {
        config,
        ..Default::default()
      }),
      liveness,
    }
  }

  pub async fn register(&self, reg: Registration) -> (WorkerInstance, DispatchConfig) {
    let mut inner = self.inner.lock().await;
    let instance = inner.registry.register(reg, Utc::now());
    (instance, inner.config)
  }

  /// Returns the pending backlog so the worker can throttle itself.
  pub async fn heartbeat(&self, callbox_id: &str, update: HeartbeatUpdate) -> Result<(usize, DispatchConfig)> {
    let mut inner = self.inner.lock().await;
    inner.registry.heartbeat(callbox_id, update, Utc::now())?;
    Ok((inner.queue.pending_len(), inner.config))
  }

  pub async fn submit(&self, job: NewTransaction) -> Submitted {
    let mut inner = self.inner.lock().await;
    let max_retries = inner.config.max_retries;
    inner.queue.submit(job, max_retries, Utc::now())
  }

  pub async fn claim(&self, callbox_id: &str, limit: usize) -> Result<Claimed> {
    let mut inner = self.inner.lock().await;
    if !inner.registry.contains(callbox_id) {
      return Err(DispatchError::WorkerNotFound(callbox_id.to_string()));
    }
    let transactions = inner.queue.claim(callbox_id, limit.min(MAX_CLAIM_BATCH), Utc::now());
    inner.registry.note_claimed(callbox_id, transactions.len());
    if !transactions.is_empty() {
      info!(callbox_id, count = transactions.len(), "Transactions claimed");
    }
    Ok(Claimed {
      total_pending: inner.queue.pending_len(),
      transactions,
    })
  }

  pub async fn update_status(
    &self,
    transaction_id: &str,
    reported: ReportedStatus,
    callbox_id: &str,
    result: Option<Value>,
    error_message: Option<String>,
  ) -> Result<Transaction> {
    let mut inner = self.inner.lock().await;
    let change = inner
      .queue
      .update_status(transaction_id, reported, callbox_id, result, error_message, Utc::now())?;
    info!(transaction_id, callbox_id, reported = %reported, status = %change.transaction.status, "Transaction status updated");
    account(&mut inner.registry, &change);
    Ok(change.transaction)
  }

  /// Requeues (or fails) transactions whose claim outlived `timeoutMs`.
  pub async fn reclaim_expired(&self) -> Vec<StatusChange> {
    let mut inner = self.inner.lock().await;
    let Some(timeout) = duration_ms(inner.config.timeout_ms) else {
      warn!(timeout_ms = inner.config.timeout_ms, "Timeout out of range, skipping reclaim sweep");
      return Vec::new();
    };
    let changes = inner.queue.reclaim_expired(timeout, Utc::now());
    for change in &changes {
      account(&mut inner.registry, change);
    }
    changes
  }

  pub async fn config(&self) -> DispatchConfig {
    self.inner.lock().await.config
  }

  /// Dispatch config plus what the given worker advertised at registration.
  pub async fn worker_config(&self, callbox_id: Option<&str>) -> (DispatchConfig, Value) {
    let inner = self.inner.lock().await;
    let specific = callbox_id
      .and_then(|id| inner.registry.get(id))
      .map(|w| w.capabilities.clone())
      .unwrap_or_else(|| Value::Object(Default::default()));
    (inner.config, specific)
  }

  pub async fn update_config(&self, update: &ConfigUpdate) -> Result<DispatchConfig> {
    let mut inner = self.inner.lock().await;
    inner.config.apply(update)?;
    info!(config = ?inner.config, "Dispatch configuration updated");
    Ok(inner.config)
  }

  pub async fn stats(&self) -> DispatchStats {
    let inner = self.inner.lock().await;
    let queue = &inner.queue;
    DispatchStats {
      connected_instances: inner.registry.len(),
      queue_length: queue.len(),
      pending_transactions: queue.count(TransactionStatus::Pending),
      assigned_transactions: queue.count(TransactionStatus::Assigned),
      processing_transactions: queue.count(TransactionStatus::Processing),
      completed_transactions: queue.history().count(TransactionStatus::Completed),
      failed_transactions: queue.history().count(TransactionStatus::Failed),
      instances: inner.registry.summaries(),
    }
  }

  pub async fn clear(&self) -> usize {
    let dropped = self.inner.lock().await.queue.clear();
    info!(dropped, "Active queue cleared");
    dropped
  }

  /// Matching records and the total history size.
  pub async fn history(&self, query: &HistoryQuery) -> (Vec<Transaction>, usize) {
    let inner = self.inner.lock().await;
    let history = inner.queue.history();
    (history.query(query), history.len())
  }

  pub async fn find(&self, transaction_id: &str) -> Option<Transaction> {
    self.inner.lock().await.queue.find(transaction_id).cloned()
  }

  pub async fn live_workers(&self) -> Vec<WorkerInstance> {
    let inner = self.inner.lock().await;
    self.liveness.live_workers(&inner.registry, Utc::now())
  }

  pub async fn queue_length(&self) -> usize {
    self.inner.lock().await.queue.len()
  }
}

fn account(registry: &mut WorkerRegistry, change: &StatusChange) {
  match change.transition {
    Transition::InPlace => {}
    Transition::Requeued => registry.note_released(&change.owner),
    Transition::Finalized => registry.note_finished(&change.owner),
  }
}
