use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;
use warp::Filter;

use crate::auth::with_auth;
use crate::error::DispatchError;
use crate::models::{HistoryQuery, NewTransaction, Priority, ReportedStatus, TransactionStatus, TransactionType};
use crate::routes::{json_body, required, with_store};
use crate::store::Store;

const DEFAULT_CLAIM_LIMIT: usize = 5;
const DEFAULT_HISTORY_LIMIT: usize = 50;

static PHONE_NUMBER: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^\+?[0-9]{8,15}$").expect("phone number pattern compiles"));

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
  #[serde(rename = "type")]
  pub kind: Option<String>,
  pub phone_number: Option<String>,
  pub amount: Option<u64>,
  pub pay_item_id: Option<String>,
  pub customer_info: Option<Value>,
  pub priority: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingQuery {
  pub callbox_id: Option<String>,
  pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
  pub status: Option<String>,
  pub result: Option<Value>,
  pub error_message: Option<String>,
  pub callbox_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
  pub limit: Option<usize>,
  pub status: Option<String>,
  pub callbox_id: Option<String>,
}

pub fn validate_submission(req: SubmitRequest) -> Result<NewTransaction, DispatchError> {
  let kind: TransactionType = req
    .kind
    .ok_or_else(|| DispatchError::Validation("type is required".into()))?
    .parse()?;

  let phone_number = req
    .phone_number
    .map(|p| p.trim().to_string())
    .filter(|p| !p.is_empty())
    .ok_or_else(|| DispatchError::Validation("phoneNumber is required".into()))?;
  if !PHONE_NUMBER.is_match(&phone_number) {
    return Err(DispatchError::Validation(format!("invalid phoneNumber '{phone_number}'")));
  }

  match req.amount {
    Some(0) => return Err(DispatchError::Validation("amount must be positive".into())),
    None if kind.requires_amount() => {
      return Err(DispatchError::Validation(format!("amount is required for {kind}")));
    }
    _ => {}
  }

  let priority = req.priority.as_deref().map(str::parse::<Priority>).transpose()?;
  if let Some(info) = &req.customer_info {
    if !info.is_object() {
      return Err(DispatchError::Validation("customerInfo must be an object".into()));
    }
  }

  Ok(NewTransaction {
    kind,
    phone_number,
    amount: req.amount,
    pay_item_id: req.pay_item_id,
    customer_info: req.customer_info,
    priority,
  })
}

pub fn pending_route(store: Arc<Store>, token: Arc<str>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("transactions" / "pending")
    .and(warp::get())
    .and(with_auth(token))
    .and(warp::query::<PendingQuery>())
    .and(with_store(store))
    .and_then(handle_claim)
}

pub fn submit_route(store: Arc<Store>, token: Arc<str>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("transactions" / "submit")
    .and(warp::post())
    .and(with_auth(token))
    .and(json_body())
    .and(with_store(store))
    .and_then(handle_submit)
}

pub fn status_route(store: Arc<Store>, token: Arc<str>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("transactions" / String / "status")
    .and(warp::put())
    .and(with_auth(token))
    .and(json_body())
    .and(with_store(store))
    .and_then(handle_update_status)
}

pub fn clear_route(store: Arc<Store>, token: Arc<str>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("transactions" / "clear")
    .and(warp::delete())
    .and(with_auth(token))
    .and(with_store(store))
    .and_then(handle_clear)
}

pub fn history_route(store: Arc<Store>, token: Arc<str>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("transactions" / "history")
    .and(warp::get())
    .and(with_auth(token))
    .and(warp::query::<HistoryParams>())
    .and(with_store(store))
    .and_then(handle_history)
}

async fn handle_claim(query: PendingQuery, store: Arc<Store>) -> Result<impl warp::Reply, warp::Rejection> {
  let callbox_id = required(query.callbox_id, "callboxId")?;
  let limit = query.limit.unwrap_or(DEFAULT_CLAIM_LIMIT);
  if limit == 0 {
    return Err(warp::reject::custom(DispatchError::Validation("limit must be at least 1".into())));
  }

  let claimed = store.claim(&callbox_id, limit).await.map_err(warp::reject::custom)?;
  Ok(warp::reply::json(&json!({
    "success": true,
    "count": claimed.transactions.len(),
    "transactions": claimed.transactions,
    "totalPending": claimed.total_pending,
  })))
}

async fn handle_submit(body: SubmitRequest, store: Arc<Store>) -> Result<impl warp::Reply, warp::Rejection> {
  let job = validate_submission(body).map_err(warp::reject::custom)?;
  let submitted = store.submit(job).await;
  info!(transaction_id = %submitted.transaction.id, "Transaction submitted");

  Ok(warp::reply::json(&json!({
    "success": true,
    "message": "Transaction queued",
    "transactionId": submitted.transaction.id,
    "queuePosition": submitted.queue_position,
  })))
}

async fn handle_update_status(
  transaction_id: String,
  body: StatusRequest,
  store: Arc<Store>,
) -> Result<impl warp::Reply, warp::Rejection> {
  let reported: ReportedStatus = required(body.status, "status")?
    .parse()
    .map_err(warp::reject::custom)?;
  let callbox_id = required(body.callbox_id, "callboxId")?;

  let tx = store
    .update_status(&transaction_id, reported, &callbox_id, body.result, body.error_message)
    .await
    .map_err(warp::reject::custom)?;

  Ok(warp::reply::json(&json!({
    "success": true,
    "message": "Transaction status updated",
    "transaction": {
      "id": tx.id,
      "status": tx.status,
      "retryCount": tx.retry_count,
      "updatedAt": tx.updated_at,
    },
  })))
}

async fn handle_clear(store: Arc<Store>) -> Result<impl warp::Reply, warp::Rejection> {
  let dropped = store.clear().await;
  Ok(warp::reply::json(&json!({
    "success": true,
    "message": format!("{dropped} transactions removed from the queue"),
  })))
}

async fn handle_history(params: HistoryParams, store: Arc<Store>) -> Result<impl warp::Reply, warp::Rejection> {
  let status = params
    .status
    .as_deref()
    .map(str::parse::<TransactionStatus>)
    .transpose()
    .map_err(warp::reject::custom)?;
  let query = HistoryQuery {
    limit: params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
    status,
    callbox_id: params.callbox_id,
  };

  let (transactions, total) = store.history(&query).await;
  Ok(warp::reply::json(&json!({
    "success": true,
    "count": transactions.len(),
    "transactions": transactions,
    "totalHistory": total,
  })))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn request(kind: &str, phone: &str, amount: Option<u64>) -> SubmitRequest {
    SubmitRequest {
      kind: Some(kind.into()),
      phone_number: Some(phone.into()),
      amount,
      pay_item_id: None,
      customer_info: None,
      priority: None,
    }
  }

  #[test]
  fn voucher_needs_no_amount() {
    let job = validate_submission(request("voucher", "+237699000000", None)).unwrap();
    assert_eq!(job.kind, TransactionType::Voucher);
    assert!(job.amount.is_none());
  }

  #[test]
  fn recharge_without_amount_is_rejected() {
    let err = validate_submission(request("recharge", "+237699000000", None)).unwrap_err();
    assert!(matches!(err, DispatchError::Validation(m) if m.contains("amount")));
  }

  #[test]
  fn unknown_type_and_bad_phone_are_rejected() {
    assert!(validate_submission(request("transfer", "+237699000000", Some(10))).is_err());
    assert!(validate_submission(request("deposit", "6990; DROP", Some(10))).is_err());
    assert!(validate_submission(request("deposit", "", Some(10))).is_err());
  }

  #[test]
  fn priority_must_be_known() {
    let mut req = request("withdraw", "699000000", Some(5_000));
    req.priority = Some("urgent".into());
    assert!(validate_submission(req).is_err());
  }
}
