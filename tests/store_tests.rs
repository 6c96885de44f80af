//! Claim, report and retry behaviour of the shared dispatch store.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use callbox::config::{ConfigUpdate, DispatchConfig};
use callbox::error::DispatchError;
use callbox::liveness::LivenessMonitor;
use callbox::models::{HistoryQuery, NewTransaction, Priority, ReportedStatus, TransactionStatus, TransactionType};
use callbox::registry::{HeartbeatUpdate, Registration};
use callbox::store::Store;

fn registration(id: &str) -> Registration {
  Registration {
    callbox_id: id.to_string(),
    capabilities: Some(json!({ "maxConcurrentTransactions": 2 })),
    version: None,
    location: Some("Douala".into()),
  }
}

fn recharge(phone: &str) -> NewTransaction {
  NewTransaction::new(TransactionType::Recharge, phone).amount(500)
}

#[tokio::test]
async fn retries_exhaust_into_failed_history() {
  let store = Store::default();
  store.register(registration("cb-1")).await;
  let id = store.submit(recharge("+237670000001")).await.transaction.id;

  for attempt in 1..=3u32 {
    let claimed = assert_ok!(store.claim("cb-1", 1).await);
    assert_eq!(claimed.transactions.len(), 1);
    let tx = assert_ok!(
      store
        .update_status(&id, ReportedStatus::Retry, "cb-1", None, Some("session dropped".into()))
        .await
    );
    assert_eq!(tx.retry_count, attempt);
    if attempt < 3 {
      assert_eq!(tx.status, TransactionStatus::Pending);
      assert!(tx.assigned_to.is_none());
    } else {
      assert_eq!(tx.status, TransactionStatus::Failed);
      assert_eq!(tx.error_message.as_deref(), Some("maximum retry attempts reached"));
    }
  }

  assert_eq!(store.queue_length().await, 0);
  let (history, total) = store.history(&HistoryQuery { limit: 10, ..Default::default() }).await;
  assert_eq!(total, 1);
  assert_eq!(history[0].id, id);

  let stats = store.stats().await;
  assert_eq!(stats.failed_transactions, 1);
  assert_eq!(stats.instances[0].processed_count, 1);
  assert_eq!(stats.instances[0].queue_size, 0);
}

#[tokio::test]
async fn retry_count_stops_at_max_retries() {
  let store = Store::default();
  store
    .update_config(&ConfigUpdate {
      max_retries: Some(2),
      ..Default::default()
    })
    .await
    .unwrap();
  store.register(registration("cb-1")).await;
  let id = store.submit(recharge("+237670000009")).await.transaction.id;

  let mut outcomes = Vec::new();
  for _ in 0..3 {
    let _ = store.claim("cb-1", 1).await;
    outcomes.push(store.update_status(&id, ReportedStatus::Retry, "cb-1", None, None).await);
  }

  let last = assert_ok!(outcomes[1].clone());
  assert_eq!(last.status, TransactionStatus::Failed);
  assert_eq!(last.retry_count, 2);
  assert!(matches!(&outcomes[2], Err(DispatchError::TransactionNotFound(missing)) if *missing == id));

  let finalized = assert_ok!(store.find(&id).await.ok_or("missing"));
  assert_eq!(finalized.retry_count, 2);
}

#[tokio::test]
async fn concurrent_claims_never_share_a_transaction() {
  let store = Arc::new(Store::default());
  for n in 0..4 {
    store.register(registration(&format!("cb-{n}"))).await;
  }
  for n in 0..10 {
    store.submit(recharge(&format!("+23767000{n:04}"))).await;
  }

  let claims = (0..4).map(|n| {
    let store = store.clone();
    tokio::spawn(async move { store.claim(&format!("cb-{n}"), 5).await })
  });
  let mut seen = Vec::new();
  for outcome in join_all(claims).await {
    let claimed = assert_ok!(assert_ok!(outcome));
    seen.extend(claimed.transactions.into_iter().map(|tx| tx.id));
  }

  assert_eq!(seen.len(), 10);
  seen.sort();
  seen.dedup();
  assert_eq!(seen.len(), 10);
}

#[tokio::test]
async fn reports_from_a_non_owner_are_rejected() {
  let store = Store::default();
  store.register(registration("cb-a")).await;
  store.register(registration("cb-b")).await;
  let id = store.submit(recharge("+237670000002")).await.transaction.id;
  assert_ok!(store.claim("cb-a", 1).await);

  let err = assert_err!(store.update_status(&id, ReportedStatus::Completed, "cb-b", None, None).await);
  assert!(matches!(err, DispatchError::OwnershipConflict { .. }));

  let tx = assert_ok!(store.find(&id).await.ok_or("missing"));
  assert_eq!(tx.status, TransactionStatus::Assigned);
  assert_eq!(tx.assigned_to.as_deref(), Some("cb-a"));
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
  let store = Store::default();
  let err = assert_err!(store.claim("ghost", 1).await);
  assert_eq!(err, DispatchError::WorkerNotFound("ghost".into()));

  let err = assert_err!(store.heartbeat("ghost", HeartbeatUpdate::default()).await);
  assert_eq!(err.status_code(), 404);

  store.register(registration("cb-1")).await;
  let err = assert_err!(store.update_status("tx_missing", ReportedStatus::Completed, "cb-1", None, None).await);
  assert_eq!(err, DispatchError::TransactionNotFound("tx_missing".into()));
}

#[tokio::test]
async fn high_priority_is_claimed_first() {
  let store = Store::default();
  store.register(registration("cb-1")).await;
  let normal = store.submit(recharge("+237670000010")).await;
  let urgent = store
    .submit(recharge("+237670000011").priority(Priority::High))
    .await;
  assert_eq!(normal.queue_position, 1);
  assert_eq!(urgent.queue_position, 1);

  let claimed = assert_ok!(store.claim("cb-1", 2).await);
  let ids: Vec<_> = claimed.transactions.iter().map(|tx| tx.id.clone()).collect();
  assert_eq!(ids, vec![urgent.transaction.id, normal.transaction.id]);
  assert_eq!(claimed.total_pending, 0);
}

#[tokio::test]
async fn completion_moves_to_history_and_credits_the_worker() {
  let store = Store::default();
  store.register(registration("cb-1")).await;
  let id = store.submit(recharge("+237670000003")).await.transaction.id;
  assert_ok!(store.claim("cb-1", 1).await);

  let tx = assert_ok!(store.update_status(&id, ReportedStatus::Processing, "cb-1", None, None).await);
  assert_eq!(tx.status, TransactionStatus::Processing);

  let tx = assert_ok!(
    store
      .update_status(&id, ReportedStatus::Completed, "cb-1", Some(json!({ "ref": "OP1" })), None)
      .await
  );
  assert_eq!(tx.status, TransactionStatus::Completed);
  assert_eq!(tx.processed_by.as_deref(), Some("cb-1"));

  let (history, _) = store
    .history(&HistoryQuery {
      limit: 10,
      status: Some(TransactionStatus::Completed),
      callbox_id: Some("cb-1".into()),
    })
    .await;
  assert_eq!(history.len(), 1);
  assert_eq!(history[0].result, Some(json!({ "ref": "OP1" })));
  assert_eq!(store.stats().await.instances[0].processed_count, 1);
}

#[tokio::test]
async fn stale_claims_are_reclaimed() {
  let store = Store::default();
  store.register(registration("cb-1")).await;
  store
    .update_config(&ConfigUpdate {
      timeout_ms: Some(10),
      ..Default::default()
    })
    .await
    .unwrap();
  let id = store.submit(recharge("+237670000004")).await.transaction.id;
  assert_ok!(store.claim("cb-1", 1).await);

  tokio::time::sleep(Duration::from_millis(30)).await;
  let changes = store.reclaim_expired().await;
  assert_eq!(changes.len(), 1);

  let tx = assert_ok!(store.find(&id).await.ok_or("missing"));
  assert_eq!(tx.status, TransactionStatus::Pending);
  assert_eq!(tx.retry_count, 1);
  assert_eq!(store.stats().await.instances[0].queue_size, 0);
}

#[tokio::test]
async fn config_updates_ignore_zero_and_reach_new_submissions() {
  let store = Store::new(DispatchConfig::default(), LivenessMonitor::default());
  let config = store
    .update_config(&ConfigUpdate {
      max_retries: Some(1),
      batch_size: Some(0),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(config.max_retries, 1);
  assert_eq!(config.batch_size, 5);

  let tx = store.submit(recharge("+237670000005")).await.transaction;
  assert_eq!(tx.max_retries, 1);
}

#[tokio::test]
async fn oversized_timeout_is_rejected_and_fresh_claims_survive_the_sweep() {
  let store = Store::default();
  store.register(registration("cb-1")).await;
  for timeout_ms in [1u64 << 63, 10_000_000_000_000_000_000] {
    let err = assert_err!(
      store
        .update_config(&ConfigUpdate {
          timeout_ms: Some(timeout_ms),
          ..Default::default()
        })
        .await
    );
    assert_eq!(err.status_code(), 400);
  }
  assert_eq!(store.config().await.timeout_ms, 30_000);

  let id = store.submit(recharge("+237670000006")).await.transaction.id;
  assert_ok!(store.claim("cb-1", 1).await);
  assert!(store.reclaim_expired().await.is_empty());

  let tx = assert_ok!(store.find(&id).await.ok_or("missing"));
  assert_eq!(tx.status, TransactionStatus::Assigned);
  assert_eq!(tx.retry_count, 0);
}
