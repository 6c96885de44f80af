use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::DispatchError;

/// Mobile-money operation a CallBox executes over its SIM session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
  Recharge,
  Voucher,
  Deposit,
  Withdraw,
}

impl TransactionType {
  pub const ALL: [TransactionType; 4] = [
    TransactionType::Recharge,
    TransactionType::Voucher,
    TransactionType::Deposit,
    TransactionType::Withdraw,
  ];

  /// Vouchers are priced by their pay item, every other operation carries an amount.
  pub fn requires_amount(self) -> bool {
    !matches!(self, TransactionType::Voucher)
  }
}

impl fmt::Display for TransactionType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      TransactionType::Recharge => "recharge",
      TransactionType::Voucher => "voucher",
      TransactionType::Deposit => "deposit",
      TransactionType::Withdraw => "withdraw",
    };
    f.pad(s)
  }
}

impl FromStr for TransactionType {
  type Err = DispatchError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "recharge" => Ok(TransactionType::Recharge),
      "voucher" => Ok(TransactionType::Voucher),
      "deposit" => Ok(TransactionType::Deposit),
      "withdraw" => Ok(TransactionType::Withdraw),
      other => Err(DispatchError::Validation(format!("unsupported transaction type '{other}'"))),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  #[default]
  Normal,
  High,
}

impl FromStr for Priority {
  type Err = DispatchError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "normal" => Ok(Priority::Normal),
      "high" => Ok(Priority::High),
      other => Err(DispatchError::Validation(format!("unsupported priority '{other}'"))),
    }
  }
}

/// Lifecycle of a transaction. `Completed` and `Failed` only ever appear in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
  Pending,
  Assigned,
  Processing,
  Completed,
  Failed,
}

impl TransactionStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
  }

  /// Statuses in which a transaction has an owner.
  pub fn is_owned(self) -> bool {
    matches!(self, TransactionStatus::Assigned | TransactionStatus::Processing)
  }
}

impl fmt::Display for TransactionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      TransactionStatus::Pending => "pending",
      TransactionStatus::Assigned => "assigned",
      TransactionStatus::Processing => "processing",
      TransactionStatus::Completed => "completed",
      TransactionStatus::Failed => "failed",
    };
    f.pad(s)
  }
}

impl FromStr for TransactionStatus {
  type Err = DispatchError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pending" => Ok(TransactionStatus::Pending),
      "assigned" => Ok(TransactionStatus::Assigned),
      "processing" => Ok(TransactionStatus::Processing),
      "completed" => Ok(TransactionStatus::Completed),
      "failed" => Ok(TransactionStatus::Failed),
      other => Err(DispatchError::Validation(format!("unknown transaction status '{other}'"))),
    }
  }
}

/// Status a worker may report back for a transaction it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedStatus {
  Processing,
  Completed,
  Failed,
  Retry,
}

impl fmt::Display for ReportedStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ReportedStatus::Processing => "processing",
      ReportedStatus::Completed => "completed",
      ReportedStatus::Failed => "failed",
      ReportedStatus::Retry => "retry",
    };
    f.pad(s)
  }
}

impl FromStr for ReportedStatus {
  type Err = DispatchError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "processing" => Ok(ReportedStatus::Processing),
      "completed" => Ok(ReportedStatus::Completed),
      "failed" => Ok(ReportedStatus::Failed),
      "retry" => Ok(ReportedStatus::Retry),
      other => Err(DispatchError::Validation(format!("unsupported status '{other}'"))),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
  pub id: String,
  #[serde(rename = "type")]
  pub kind: TransactionType,
  pub phone_number: String,
  pub amount: Option<u64>,
  pub pay_item_id: Option<String>,
  pub customer_info: Value,
  pub priority: Priority,
  pub status: TransactionStatus,
  pub retry_count: u32,
  pub max_retries: u32,
  pub assigned_to: Option<String>,
  pub assigned_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub processed_by: Option<String>,
  pub result: Option<Value>,
  pub error_message: Option<String>,
}

impl Transaction {
  pub fn new(job: NewTransaction, max_retries: u32, now: DateTime<Utc>) -> Self {
    Self {
      id: format!("tx_{}", Uuid::new_v4().simple()),
      kind: job.kind,
      phone_number: job.phone_number,
      amount: job.amount,
      pay_item_id: job.pay_item_id,
      customer_info: job.customer_info.unwrap_or_else(|| Value::Object(Default::default())),
      priority: job.priority.unwrap_or_default(),
      status: TransactionStatus::Pending,
      retry_count: 0,
      max_retries,
      assigned_to: None,
      assigned_at: None,
      created_at: now,
      updated_at: now,
      processed_by: None,
      result: None,
      error_message: None,
    }
  }

  /// Back to the pending pool with no owner.
  pub(crate) fn release(&mut self, now: DateTime<Utc>) {
    self.status = TransactionStatus::Pending;
    self.assigned_to = None;
    self.assigned_at = None;
    self.updated_at = now;
  }
}

/// A job as handed to the engine, before it gets an id and a lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
  #[serde(rename = "type")]
  pub kind: TransactionType,
  pub phone_number: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub amount: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pay_item_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub customer_info: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<Priority>,
}

impl NewTransaction {
  pub fn new(kind: TransactionType, phone_number: impl Into<String>) -> Self {
    Self {
      kind,
      phone_number: phone_number.into(),
      amount: None,
      pay_item_id: None,
      customer_info: None,
      priority: None,
    }
  }

  pub fn amount(mut self, amount: u64) -> Self {
    self.amount = Some(amount);
    self
  }

  pub fn pay_item(mut self, pay_item_id: impl Into<String>) -> Self {
    self.pay_item_id = Some(pay_item_id.into());
    self
  }

  pub fn customer_info(mut self, info: Value) -> Self {
    self.customer_info = Some(info);
    self
  }

  pub fn priority(mut self, priority: Priority) -> Self {
    self.priority = Some(priority);
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
  #[default]
  Active,
  Inactive,
}

impl fmt::Display for WorkerStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(match self {
      WorkerStatus::Active => "active",
      WorkerStatus::Inactive => "inactive",
    })
  }
}

impl FromStr for WorkerStatus {
  type Err = DispatchError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "active" => Ok(WorkerStatus::Active),
      "inactive" => Ok(WorkerStatus::Inactive),
      other => Err(DispatchError::Validation(format!("unsupported callbox status '{other}'"))),
    }
  }
}

/// A registered CallBox unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInstance {
  pub id: String,
  pub capabilities: Value,
  pub version: String,
  pub location: String,
  pub last_heartbeat_at: DateTime<Utc>,
  pub status: WorkerStatus,
  pub queue_size: u32,
  pub processed_count: u64,
  pub metrics: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSummary {
  pub id: String,
  pub status: WorkerStatus,
  pub last_heartbeat_at: DateTime<Utc>,
  pub queue_size: u32,
  pub processed_count: u64,
}

impl From<&WorkerInstance> for WorkerSummary {
  fn from(w: &WorkerInstance) -> Self {
    Self {
      id: w.id.clone(),
      status: w.status,
      last_heartbeat_at: w.last_heartbeat_at,
      queue_size: w.queue_size,
      processed_count: w.processed_count,
    }
  }
}

/// Snapshot served by `GET /stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
  pub connected_instances: usize,
  pub queue_length: usize,
  pub pending_transactions: usize,
  pub assigned_transactions: usize,
  pub processing_transactions: usize,
  pub completed_transactions: usize,
  pub failed_transactions: usize,
  pub instances: Vec<WorkerSummary>,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
  pub limit: usize,
  pub status: Option<TransactionStatus>,
  pub callbox_id: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn transaction_serializes_with_wire_names() {
    let job = NewTransaction::new(TransactionType::Recharge, "+237670000000").amount(1000);
    let tx = Transaction::new(job, 3, Utc::now());
    let value = serde_json::to_value(&tx).unwrap();
    assert_eq!(value["type"], "recharge");
    assert_eq!(value["phoneNumber"], "+237670000000");
    assert_eq!(value["status"], "pending");
    assert_eq!(value["maxRetries"], 3);
    assert_eq!(value["priority"], "normal");
    assert!(value["assignedTo"].is_null());
    assert!(tx.id.starts_with("tx_"));
  }

  #[test]
  fn reported_status_rejects_engine_only_states() {
    assert_eq!("retry".parse::<ReportedStatus>().unwrap(), ReportedStatus::Retry);
    assert!("assigned".parse::<ReportedStatus>().is_err());
    assert!("pending".parse::<ReportedStatus>().is_err());
  }

  #[test]
  fn voucher_is_the_only_amountless_type() {
    let amountless: Vec<_> = TransactionType::ALL
      .iter()
      .filter(|t| !t.requires_amount())
      .collect();
    assert_eq!(amountless, vec![&TransactionType::Voucher]);
  }
}
