use crate::models::{HistoryQuery, Transaction, TransactionStatus};

/// Append-only store of finalized transactions.
#[derive(Debug, Default)]
pub struct History {
  records: Vec<Transaction>,
}

impl History {
  pub fn new() -> Self {
    Self::default()
  }

  pub(crate) fn push(&mut self, tx: Transaction) {
    debug_assert!(tx.status.is_terminal());
    self.records.push(tx);
  }

  pub fn get(&self, id: &str) -> Option<&Transaction> {
    self.records.iter().find(|t| t.id == id)
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  pub fn count(&self, status: TransactionStatus) -> usize {
    self.records.iter().filter(|t| t.status == status).count()
  }

  /// Newest update first; records finalized later win ties.
  pub fn query(&self, query: &HistoryQuery) -> Vec<Transaction> {
    let mut matching: Vec<&Transaction> = self
      .records
      .iter()
      .rev()
      .filter(|t| query.status.is_none_or(|s| t.status == s))
      .filter(|t| match &query.callbox_id {
        Some(id) => t.processed_by.as_deref() == Some(id.as_str()),
        None => true,
      })
      .collect();
    matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    matching.into_iter().take(query.limit).cloned().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{NewTransaction, TransactionType};
  use chrono::{Duration, Utc};

  fn finished(status: TransactionStatus, by: &str, minutes_ago: i64) -> Transaction {
    let now = Utc::now() - Duration::minutes(minutes_ago);
    let mut tx = Transaction::new(NewTransaction::new(TransactionType::Deposit, "+237690000000").amount(500), 3, now);
    tx.status = status;
    tx.processed_by = Some(by.into());
    tx
  }

  #[test]
  fn query_is_newest_first_and_bounded() {
    let mut history = History::new();
    history.push(finished(TransactionStatus::Completed, "cb-1", 10));
    history.push(finished(TransactionStatus::Completed, "cb-1", 1));
    history.push(finished(TransactionStatus::Failed, "cb-2", 5));

    let all = history.query(&HistoryQuery { limit: 2, ..Default::default() });
    assert_eq!(all.len(), 2);
    assert!(all[0].updated_at > all[1].updated_at);
    assert_eq!(all[1].status, TransactionStatus::Failed);
  }

  #[test]
  fn query_filters_by_status_and_worker() {
    let mut history = History::new();
    history.push(finished(TransactionStatus::Completed, "cb-1", 3));
    history.push(finished(TransactionStatus::Failed, "cb-1", 2));
    history.push(finished(TransactionStatus::Failed, "cb-2", 1));

    let failed_cb1 = history.query(&HistoryQuery {
      limit: 50,
      status: Some(TransactionStatus::Failed),
      callbox_id: Some("cb-1".into()),
    });
    assert_eq!(failed_cb1.len(), 1);
    assert_eq!(history.count(TransactionStatus::Failed), 2);
    assert_eq!(history.len(), 3);
  }
}
