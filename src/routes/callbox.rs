//! CallBox lifecycle endpoints: register, heartbeat, config and fleet stats.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use warp::Filter;

use crate::auth::with_auth;
use crate::config::ConfigUpdate;
use crate::models::WorkerStatus;
use crate::registry::{HeartbeatUpdate, Registration};
use crate::routes::{json_body, required, with_store};
use crate::store::Store;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
  pub callbox_id: Option<String>,
  pub capabilities: Option<Value>,
  pub version: Option<String>,
  pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
  pub callbox_id: Option<String>,
  pub status: Option<String>,
  pub queue_size: Option<u32>,
  pub metrics: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigQuery {
  pub callbox_id: Option<String>,
}

pub fn register_route(store: Arc<Store>, token: Arc<str>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("register")
    .and(warp::post())
    .and(with_auth(token))
    .and(json_body())
    .and(with_store(store))
    .and_then(handle_register)
}

pub fn heartbeat_route(store: Arc<Store>, token: Arc<str>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("heartbeat")
    .and(warp::post())
    .and(with_auth(token))
    .and(json_body())
    .and(with_store(store))
    .and_then(handle_heartbeat)
}

pub fn get_config_route(store: Arc<Store>, token: Arc<str>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("config")
    .and(warp::get())
    .and(with_auth(token))
    .and(warp::query::<ConfigQuery>())
    .and(with_store(store))
    .and_then(handle_get_config)
}

pub fn update_config_route(store: Arc<Store>, token: Arc<str>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("config")
    .and(warp::put())
    .and(with_auth(token))
    .and(json_body())
    .and(with_store(store))
    .and_then(handle_update_config)
}

pub fn stats_route(store: Arc<Store>, token: Arc<str>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("stats")
    .and(warp::get())
    .and(with_auth(token))
    .and(with_store(store))
    .and_then(handle_stats)
}

async fn handle_register(body: RegisterRequest, store: Arc<Store>) -> Result<impl warp::Reply, warp::Rejection> {
  let callbox_id = required(body.callbox_id, "callboxId")?;
  let (instance, config) = store
    .register(Registration {
      callbox_id,
      capabilities: body.capabilities,
      version: body.version,
      location: body.location,
    })
    .await;

  Ok(warp::reply::json(&json!({
    "success": true,
    "message": "CallBox registered",
    "instance": instance,
    "config": config,
  })))
}

async fn handle_heartbeat(body: HeartbeatRequest, store: Arc<Store>) -> Result<impl warp::Reply, warp::Rejection> {
  let callbox_id = required(body.callbox_id, "callboxId")?;
  let status = body
    .status
    .map(|s| s.parse::<WorkerStatus>())
    .transpose()
    .map_err(warp::reject::custom)?;

  let (pending, config) = store
    .heartbeat(
      &callbox_id,
      HeartbeatUpdate {
        status,
        queue_size: body.queue_size,
        metrics: body.metrics,
      },
    )
    .await
    .map_err(warp::reject::custom)?;

  Ok(warp::reply::json(&json!({
    "success": true,
    "message": "Heartbeat received",
    "pendingTransactions": pending,
    "config": config,
  })))
}

async fn handle_get_config(query: ConfigQuery, store: Arc<Store>) -> Result<impl warp::Reply, warp::Rejection> {
  let (config, specific) = store.worker_config(query.callbox_id.as_deref()).await;
  let mut body = json!(config);
  body["callboxSpecific"] = specific;
  Ok(warp::reply::json(&json!({ "success": true, "config": body })))
}

async fn handle_update_config(update: ConfigUpdate, store: Arc<Store>) -> Result<impl warp::Reply, warp::Rejection> {
  let config = store.update_config(&update).await.map_err(warp::reject::custom)?;
  Ok(warp::reply::json(&json!({
    "success": true,
    "message": "Configuration updated",
    "config": config,
  })))
}

async fn handle_stats(store: Arc<Store>) -> Result<impl warp::Reply, warp::Rejection> {
  let stats = store.stats().await;
  Ok(warp::reply::json(&json!({ "success": true, "stats": stats })))
}
