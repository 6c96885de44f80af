//! Active transaction queue.
//!
//! Holds every transaction that is `pending`, `assigned` or `processing`.
//! Pending transactions are additionally indexed by [`PendingKey`] so claims
//! walk them in priority-then-submission order without scanning the whole set.
//! Reaching `completed` or `failed` moves the record into [`History`] exactly once.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, Result};
use crate::history::History;
use crate::models::{NewTransaction, Priority, ReportedStatus, Transaction, TransactionStatus};

pub const RETRY_EXHAUSTED_MESSAGE: &str = "maximum retry attempts reached";
pub const TIMED_OUT_MESSAGE: &str = "processing timed out";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingKey {
  priority: Priority,
  seq: u64,
}

impl PartialOrd for PendingKey {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for PendingKey {
  // High priority first, then oldest submission first.
  fn cmp(&self, other: &Self) -> Ordering {
    rank(other.priority)
      .cmp(&rank(self.priority))
      .then(self.seq.cmp(&other.seq))
  }
}

fn rank(priority: Priority) -> u8 {
  match priority {
    Priority::Normal => 0,
    Priority::High => 1,
  }
}

#[derive(Debug)]
struct Entry {
  tx: Transaction,
  seq: u64,
}

impl Entry {
  fn key(&self) -> PendingKey {
    PendingKey { priority: self.tx.priority, seq: self.seq }
  }
}

#[derive(Debug, Clone)]
pub struct Submitted {
  pub transaction: Transaction,
  /// 1-based position in the pending order at submission time.
  pub queue_position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
  /// Still owned, status updated in place.
  InPlace,
  /// Returned to the pending pool without an owner.
  Requeued,
  /// Moved to history.
  Finalized,
}

#[derive(Debug, Clone)]
pub struct StatusChange {
  pub transaction: Transaction,
  /// Worker that owned the transaction when the change happened.
  pub owner: String,
  pub transition: Transition,
}

#[derive(Debug, Default)]
pub struct TransactionQueue {
  active: HashMap<String, Entry>,
  pending: BTreeMap<PendingKey, String>,
  history: History,
  next_seq: u64,
}

impl TransactionQueue {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn submit(&mut self, job: NewTransaction, max_retries: u32, now: DateTime<Utc>) -> Submitted {
    let tx = Transaction::new(job, max_retries, now);
    let seq = self.next_seq;
    self.next_seq += 1;

    let entry = Entry { tx: tx.clone(), seq };
    let key = entry.key();
    self.pending.insert(key, tx.id.clone());
    self.active.insert(tx.id.clone(), entry);

    let queue_position = self.pending.range(..key).count() + 1;
    info!(
      transaction_id = %tx.id,
      kind = %tx.kind,
      priority = ?tx.priority,
      queue_position,
      "Transaction queued"
    );
    Submitted { transaction: tx, queue_position }
  }

  /// Hands up to `limit` pending transactions to `worker_id`.
  ///
  /// A transaction is only taken while it is still `pending` and either
  /// unowned or already earmarked for this worker.
  pub fn claim(&mut self, worker_id: &str, limit: usize, now: DateTime<Utc>) -> Vec<Transaction> {
    let selected: Vec<PendingKey> = self
      .pending
      .iter()
      .filter(|(_, id)| {
        self.active.get(*id).is_some_and(|e| {
          e.tx.status == TransactionStatus::Pending
            && e.tx.assigned_to.as_deref().is_none_or(|owner| owner == worker_id)
        })
      })
      .map(|(key, _)| *key)
      .take(limit)
      .collect();

    let mut claimed = Vec::with_capacity(selected.len());
    for key in selected {
      let Some(id) = self.pending.remove(&key) else { continue };
      let Some(entry) = self.active.get_mut(&id) else { continue };
      entry.tx.status = TransactionStatus::Assigned;
      entry.tx.assigned_to = Some(worker_id.to_string());
      entry.tx.assigned_at = Some(now);
      entry.tx.updated_at = now;
      debug!(transaction_id = %id, callbox_id = worker_id, "Transaction claimed");
      claimed.push(entry.tx.clone());
    }
    claimed
  }

  pub fn update_status(
    &mut self,
    id: &str,
    reported: ReportedStatus,
    worker_id: &str,
    result: Option<Value>,
    error_message: Option<String>,
    now: DateTime<Utc>,
  ) -> Result<StatusChange> {
    let Some(mut entry) = self.active.remove(id) else {
      return Err(DispatchError::TransactionNotFound(id.to_string()));
    };

    if entry.tx.assigned_to.as_deref() != Some(worker_id) {
      let assigned_to = entry.tx.assigned_to.clone();
      self.active.insert(id.to_string(), entry);
      return Err(DispatchError::OwnershipConflict {
        transaction_id: id.to_string(),
        assigned_to,
        callbox_id: worker_id.to_string(),
      });
    }

    entry.tx.updated_at = now;
    entry.tx.processed_by = Some(worker_id.to_string());
    if result.is_some() {
      entry.tx.result = result;
    }
    if error_message.is_some() {
      entry.tx.error_message = error_message;
    }

    let owner = worker_id.to_string();
    let change = match reported {
      ReportedStatus::Processing => {
        entry.tx.status = TransactionStatus::Processing;
        let transaction = entry.tx.clone();
        self.active.insert(id.to_string(), entry);
        StatusChange { transaction, owner, transition: Transition::InPlace }
      }
      ReportedStatus::Completed => self.finalize(entry, TransactionStatus::Completed, None, owner),
      ReportedStatus::Failed => self.finalize(entry, TransactionStatus::Failed, None, owner),
      ReportedStatus::Retry => self.retry(entry, RETRY_EXHAUSTED_MESSAGE, owner, now),
    };
    Ok(change)
  }

  /// Returns owned transactions whose claim is older than `timeout` to the pending pool.
  pub fn reclaim_expired(&mut self, timeout: Duration, now: DateTime<Utc>) -> Vec<StatusChange> {
    let expired: Vec<(String, String)> = self
      .active
      .values()
      .filter(|e| e.tx.status.is_owned())
      .filter(|e| e.tx.assigned_at.is_some_and(|at| now - at > timeout))
      .filter_map(|e| e.tx.assigned_to.clone().map(|owner| (e.tx.id.clone(), owner)))
      .collect();

    expired
      .into_iter()
      .filter_map(|(id, owner)| {
        let mut entry = self.active.remove(&id)?;
        warn!(transaction_id = %id, callbox_id = %owner, "Claim timed out, reclaiming");
        entry.tx.updated_at = now;
        Some(self.retry(entry, TIMED_OUT_MESSAGE, owner, now))
      })
      .collect()
  }

  // Takes an entry already removed from the active set.
  fn retry(&mut self, mut entry: Entry, exhausted_message: &str, owner: String, now: DateTime<Utc>) -> StatusChange {
    entry.tx.retry_count += 1;
    if entry.tx.retry_count >= entry.tx.max_retries {
      info!(transaction_id = %entry.tx.id, retry_count = entry.tx.retry_count, "Retries exhausted");
      return self.finalize(entry, TransactionStatus::Failed, Some(exhausted_message), owner);
    }

    entry.tx.release(now);
    let transaction = entry.tx.clone();
    self.pending.insert(entry.key(), transaction.id.clone());
    self.active.insert(transaction.id.clone(), entry);
    info!(transaction_id = %transaction.id, retry_count = transaction.retry_count, "Transaction requeued for retry");
    StatusChange { transaction, owner, transition: Transition::Requeued }
  }

  // Takes an entry already removed from the active set.
  fn finalize(&mut self, mut entry: Entry, status: TransactionStatus, error_message: Option<&str>, owner: String) -> StatusChange {
    self.pending.remove(&entry.key());
    entry.tx.status = status;
    entry.tx.assigned_to = None;
    if let Some(message) = error_message {
      entry.tx.error_message = Some(message.to_string());
    }
    info!(transaction_id = %entry.tx.id, status = %status, callbox_id = %owner, "Transaction finalized");
    self.history.push(entry.tx.clone());
    StatusChange { transaction: entry.tx, owner, transition: Transition::Finalized }
  }

  /// Drops every active transaction. History is kept.
  pub fn clear(&mut self) -> usize {
    let dropped = self.active.len();
    self.active.clear();
    self.pending.clear();
    dropped
  }

  pub fn get(&self, id: &str) -> Option<&Transaction> {
    self.active.get(id).map(|e| &e.tx)
  }

  /// Looks in the active set first, then in history.
  pub fn find(&self, id: &str) -> Option<&Transaction> {
    self.get(id).or_else(|| self.history.get(id))
  }

  pub fn history(&self) -> &History {
    &self.history
  }

  pub fn len(&self) -> usize {
    self.active.len()
  }

  pub fn is_empty(&self) -> bool {
    self.active.is_empty()
  }

  pub fn pending_len(&self) -> usize {
    self.pending.len()
  }

  pub fn count(&self, status: TransactionStatus) -> usize {
    self.active.values().filter(|e| e.tx.status == status).count()
  }

  /// Pending transactions in claim order.
  pub fn pending(&self) -> Vec<&Transaction> {
    self
      .pending
      .values()
      .filter_map(|id| self.active.get(id).map(|e| &e.tx))
      .collect()
  }
}
