use std::time::Duration;

use rand::Rng;
use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::info;

use crate::models::{Transaction, TransactionType};

/// How a simulated telecom session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
  Completed(Value),
  Retry(String),
  Failed(String),
}

/// USSD menu steps each operation walks through before the operator confirms.
fn stages(kind: TransactionType) -> &'static [&'static str] {
  match kind {
    TransactionType::Recharge => &["dial", "amount", "confirm"],
    TransactionType::Voucher => &["dial", "confirm"],
    TransactionType::Deposit | TransactionType::Withdraw => &["dial", "recipient", "amount", "pin", "confirm"],
  }
}

/// Plays a transaction's session with `step` between menu stages, then draws an outcome:
/// 80% completed, 15% retry, 5% failed.
pub async fn execute_session(tx: &Transaction, callbox_id: &str, step: Duration) -> SessionOutcome {
  let steps = stages(tx.kind);
  info!(callbox_id, transaction_id = %tx.id, kind = %tx.kind, steps = steps.len(), "Starting session");
  for stage in steps {
    sleep(step).await;
    info!(callbox_id, transaction_id = %tx.id, stage, "Session stage done");
  }

  let roll: f64 = rand::thread_rng().r#gen();
  if roll < 0.80 {
    SessionOutcome::Completed(json!({
      "operatorReference": format!("OP{}", rand::thread_rng().gen_range(100_000..1_000_000)),
      "stages": steps.len(),
    }))
  } else if roll < 0.95 {
    SessionOutcome::Retry("network busy, session dropped".into())
  } else {
    SessionOutcome::Failed("operator rejected the request".into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::NewTransaction;
  use chrono::Utc;

  #[tokio::test]
  async fn session_produces_an_outcome() {
    let tx = Transaction::new(NewTransaction::new(TransactionType::Voucher, "+237650000000"), 3, Utc::now());
    match execute_session(&tx, "cb-test", Duration::ZERO).await {
      SessionOutcome::Completed(result) => assert_eq!(result["stages"], 2),
      SessionOutcome::Retry(reason) | SessionOutcome::Failed(reason) => assert!(!reason.is_empty()),
    }
  }

  #[test]
  fn money_movements_take_the_longest_menu() {
    assert!(stages(TransactionType::Deposit).len() > stages(TransactionType::Recharge).len());
    assert_eq!(stages(TransactionType::Withdraw), stages(TransactionType::Deposit));
  }
}
