//! Scheduler administration: status, start, stop, force a tick, reclaim stale claims.

use std::convert::Infallible;
use std::sync::Arc;

use serde_json::json;
use warp::Filter;

use crate::auth::with_auth;
use crate::scheduler::SyncScheduler;

fn with_scheduler(scheduler: Arc<SyncScheduler>) -> impl Filter<Extract = (Arc<SyncScheduler>,), Error = Infallible> + Clone {
  warp::any().map(move || scheduler.clone())
}

pub fn routes(
  scheduler: Arc<SyncScheduler>,
  token: Arc<str>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
  let status = warp::path!("status")
    .and(warp::get())
    .and(with_auth(token.clone()))
    .and(with_scheduler(scheduler.clone()))
    .and_then(handle_status);

  let start = warp::path!("start")
    .and(warp::post())
    .and(with_auth(token.clone()))
    .and(with_scheduler(scheduler.clone()))
    .and_then(handle_start);

  let stop = warp::path!("stop")
    .and(warp::post())
    .and(with_auth(token.clone()))
    .and(with_scheduler(scheduler.clone()))
    .and_then(handle_stop);

  let force = warp::path!("force")
    .and(warp::post())
    .and(with_auth(token.clone()))
    .and(with_scheduler(scheduler.clone()))
    .and_then(handle_force);

  let reclaim = warp::path!("reclaim")
    .and(warp::post())
    .and(with_auth(token))
    .and(with_scheduler(scheduler))
    .and_then(handle_reclaim);

  status.or(start).or(stop).or(force).or(reclaim)
}

async fn handle_status(scheduler: Arc<SyncScheduler>) -> Result<impl warp::Reply, warp::Rejection> {
  let status = scheduler.status().await;
  Ok(warp::reply::json(&json!({ "success": true, "syncStatus": status })))
}

async fn handle_start(scheduler: Arc<SyncScheduler>) -> Result<impl warp::Reply, warp::Rejection> {
  let started = scheduler.start().await;
  let message = if started { "Sync scheduler started" } else { "Sync scheduler already running" };
  Ok(warp::reply::json(&json!({ "success": true, "message": message })))
}

async fn handle_stop(scheduler: Arc<SyncScheduler>) -> Result<impl warp::Reply, warp::Rejection> {
  let stopped = scheduler.stop().await;
  let message = if stopped { "Sync scheduler stopped" } else { "Sync scheduler already stopped" };
  Ok(warp::reply::json(&json!({ "success": true, "message": message })))
}

async fn handle_force(scheduler: Arc<SyncScheduler>) -> Result<impl warp::Reply, warp::Rejection> {
  let report = scheduler.force_tick().await;
  Ok(warp::reply::json(&json!({
    "success": true,
    "message": "Forced synchronization executed",
    "report": report,
  })))
}

async fn handle_reclaim(scheduler: Arc<SyncScheduler>) -> Result<impl warp::Reply, warp::Rejection> {
  let reclaimed = scheduler.reclaim().await;
  Ok(warp::reply::json(&json!({ "success": true, "reclaimed": reclaimed })))
}
