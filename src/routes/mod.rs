use std::convert::Infallible;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{error, warn};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::error::DispatchError;
use crate::scheduler::SyncScheduler;
use crate::store::Store;

pub mod callbox;
pub mod sse;
pub mod sync;
pub mod transactions;

const MAX_BODY_BYTES: u64 = 32 * 1024;

pub fn routes(
  store: Arc<Store>,
  scheduler: Arc<SyncScheduler>,
  token: Arc<str>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
  let callbox_api = warp::path("api").and(warp::path("call-box")).and(
    callbox::register_route(store.clone(), token.clone())
      .or(callbox::heartbeat_route(store.clone(), token.clone()))
      .or(callbox::get_config_route(store.clone(), token.clone()))
      .or(callbox::update_config_route(store.clone(), token.clone()))
      .or(callbox::stats_route(store.clone(), token.clone()))
      .or(transactions::pending_route(store.clone(), token.clone()))
      .or(transactions::submit_route(store.clone(), token.clone()))
      .or(transactions::status_route(store.clone(), token.clone()))
      .or(transactions::clear_route(store.clone(), token.clone()))
      .or(transactions::history_route(store.clone(), token.clone()))
      .or(sse::events_route(store, token.clone())),
  );

  let sync_api = warp::path("api")
    .and(warp::path("sync"))
    .and(sync::routes(scheduler, token));

  let health = warp::path!("health").and(warp::get()).map(|| "ok");

  health
    .or(callbox_api)
    .or(sync_api)
    .recover(handle_rejection)
}

pub(crate) fn with_store(store: Arc<Store>) -> impl Filter<Extract = (Arc<Store>,), Error = Infallible> + Clone {
  warp::any().map(move || store.clone())
}

pub(crate) fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
  T: DeserializeOwned + Send,
{
  warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// A present, non-blank string field.
pub(crate) fn required(value: Option<String>, field: &str) -> Result<String, Rejection> {
  match value.map(|v| v.trim().to_string()) {
    Some(v) if !v.is_empty() => Ok(v),
    _ => Err(warp::reject::custom(DispatchError::Validation(format!("{field} is required")))),
  }
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
  let (status, code, message) = if let Some(e) = err.find::<DispatchError>() {
    (e.status_code(), e.code(), e.to_string())
  } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
    (StatusCode::BAD_REQUEST, "MALFORMED_JSON", e.to_string())
  } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
    (StatusCode::BAD_REQUEST, "INVALID_QUERY", e.to_string())
  } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
    (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", "request body too large".to_string())
  } else if err.is_not_found() {
    (StatusCode::NOT_FOUND, "NOT_FOUND", "route not found".to_string())
  } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
    (StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED", "method not allowed".to_string())
  } else {
    error!("Unhandled rejection: {:?}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "internal server error".to_string())
  };

  if status.is_client_error() {
    warn!(code, %message, "Request rejected");
  }

  let body = warp::reply::json(&json!({
    "success": false,
    "error": message,
    "code": code,
  }));
  Ok(warp::reply::with_status(body, status))
}
