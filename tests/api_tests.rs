//! HTTP surface, driven through `warp::test` without binding a socket.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use warp::http::StatusCode;
use warp::{Filter, Reply};

use callbox::models::{NewTransaction, ReportedStatus, TransactionType};
use callbox::registry::Registration;
use callbox::routes::routes;
use callbox::scheduler::SyncScheduler;
use callbox::store::Store;
use callbox::upstream::BufferedSource;

const TOKEN: &str = "test-secret";

fn api() -> impl Filter<Extract = impl Reply, Error = std::convert::Infallible> + Clone + 'static {
  api_with_store().1
}

fn api_with_store() -> (
  Arc<Store>,
  impl Filter<Extract = impl Reply, Error = std::convert::Infallible> + Clone + 'static,
) {
  let store = Arc::new(Store::default());
  let scheduler = Arc::new(SyncScheduler::new(store.clone(), Arc::new(BufferedSource::new())));
  (store.clone(), routes(store, scheduler, Arc::from(TOKEN)))
}

fn authorized(method: &str, path: &str) -> warp::test::RequestBuilder {
  warp::test::request()
    .method(method)
    .path(path)
    .header("authorization", format!("Bearer {TOKEN}"))
}

fn body(res: &warp::http::Response<warp::hyper::body::Bytes>) -> Value {
  serde_json::from_slice(res.body()).unwrap_or(Value::Null)
}

async fn register<F>(api: &F, id: &str)
where
  F: Filter + Clone + Send + Sync + 'static,
  F::Extract: Reply + Send,
{
  let res = authorized("POST", "/api/call-box/register")
    .json(&json!({ "callboxId": id, "capabilities": { "slots": 2 } }))
    .reply(api)
    .await;
  assert_eq!(res.status(), StatusCode::OK);
}

async fn submit<F>(api: &F, payload: Value) -> warp::http::Response<warp::hyper::body::Bytes>
where
  F: Filter + Clone + Send + Sync + 'static,
  F::Extract: Reply + Send,
{
  authorized("POST", "/api/call-box/transactions/submit")
    .json(&payload)
    .reply(api)
    .await
}

#[tokio::test]
async fn health_needs_no_token() {
  let res = warp::test::request().path("/health").reply(&api()).await;
  assert_eq!(res.status(), StatusCode::OK);
  assert_eq!(res.body().as_ref(), b"ok");
}

#[tokio::test]
async fn missing_or_wrong_token_is_unauthorized() {
  let api = api();
  let res = warp::test::request().path("/api/call-box/stats").reply(&api).await;
  assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
  let json = body(&res);
  assert_eq!(json["success"], false);
  assert_eq!(json["code"], "UNAUTHORIZED");

  let res = warp::test::request()
    .path("/api/sync/status")
    .header("authorization", "Bearer nope")
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_then_heartbeat() {
  let api = api();
  register(&api, "cb-1").await;

  let res = authorized("POST", "/api/call-box/heartbeat")
    .json(&json!({ "callboxId": "cb-1", "queueSize": 0, "metrics": { "signal": -70 } }))
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::OK);
  let json = body(&res);
  assert_eq!(json["pendingTransactions"], 0);
  assert_eq!(json["config"]["batchSize"], 5);
}

#[tokio::test]
async fn heartbeat_from_unknown_callbox_is_not_found() {
  let res = authorized("POST", "/api/call-box/heartbeat")
    .json(&json!({ "callboxId": "ghost" }))
    .reply(&api())
    .await;
  assert_eq!(res.status(), StatusCode::NOT_FOUND);
  assert_eq!(body(&res)["code"], "CALLBOX_NOT_FOUND");
}

#[tokio::test]
async fn register_requires_an_id_and_valid_json() {
  let api = api();
  let res = authorized("POST", "/api/call-box/register")
    .json(&json!({ "location": "Yaounde" }))
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::BAD_REQUEST);
  assert_eq!(body(&res)["code"], "VALIDATION_ERROR");

  let res = authorized("POST", "/api/call-box/register")
    .header("content-type", "application/json")
    .body("{not json")
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::BAD_REQUEST);
  assert_eq!(body(&res)["code"], "MALFORMED_JSON");
}

#[tokio::test]
async fn submit_validates_the_payload() {
  let api = api();
  let res = submit(&api, json!({ "type": "recharge", "phoneNumber": "+237670000000" })).await;
  assert_eq!(res.status(), StatusCode::BAD_REQUEST);

  let res = submit(&api, json!({ "type": "deposit", "phoneNumber": "12ab", "amount": 100 })).await;
  assert_eq!(res.status(), StatusCode::BAD_REQUEST);

  let res = submit(&api, json!({ "type": "voucher", "phoneNumber": "+237670000000" })).await;
  assert_eq!(res.status(), StatusCode::OK);
  let json = body(&res);
  assert_eq!(json["queuePosition"], 1);
  assert!(json["transactionId"].as_str().is_some_and(|id| id.starts_with("tx_")));
}

#[tokio::test]
async fn claim_report_and_history_flow() {
  let api = api();
  register(&api, "cb-1").await;
  register(&api, "cb-2").await;
  let json = body(&submit(&api, json!({ "type": "withdraw", "phoneNumber": "237699112233", "amount": 5000 })).await);
  let id = json["transactionId"].as_str().unwrap_or_default().to_string();

  let res = authorized("GET", "/api/call-box/transactions/pending?callboxId=cb-1&limit=3")
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::OK);
  let json = body(&res);
  assert_eq!(json["count"], 1);
  assert_eq!(json["transactions"][0]["assignedTo"], "cb-1");
  assert_eq!(json["transactions"][0]["status"], "assigned");

  let status_path = format!("/api/call-box/transactions/{id}/status");
  let res = authorized("PUT", &status_path)
    .json(&json!({ "status": "completed", "callboxId": "cb-2" }))
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::FORBIDDEN);
  assert_eq!(body(&res)["code"], "OWNERSHIP_CONFLICT");

  let res = authorized("PUT", &status_path)
    .json(&json!({ "status": "done", "callboxId": "cb-1" }))
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::BAD_REQUEST);

  let res = authorized("PUT", &status_path)
    .json(&json!({ "status": "completed", "callboxId": "cb-1", "result": { "ref": "OP42" } }))
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::OK);
  assert_eq!(body(&res)["transaction"]["status"], "completed");

  let res = authorized("GET", "/api/call-box/transactions/history?callboxId=cb-1")
    .reply(&api)
    .await;
  let json = body(&res);
  assert_eq!(json["count"], 1);
  assert_eq!(json["totalHistory"], 1);
  assert_eq!(json["transactions"][0]["id"], id.as_str());

  let res = authorized("GET", "/api/call-box/stats").reply(&api).await;
  let stats = body(&res)["stats"].clone();
  assert_eq!(stats["connectedInstances"], 2);
  assert_eq!(stats["completedTransactions"], 1);
  assert_eq!(stats["queueLength"], 0);
}

#[tokio::test]
async fn claim_rejects_unknown_workers_and_zero_limits() {
  let api = api();
  let res = authorized("GET", "/api/call-box/transactions/pending?callboxId=ghost")
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::NOT_FOUND);

  register(&api, "cb-1").await;
  let res = authorized("GET", "/api/call-box/transactions/pending?callboxId=cb-1&limit=0")
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn config_roundtrip_includes_worker_capabilities() {
  let api = api();
  register(&api, "cb-1").await;

  let res = authorized("PUT", "/api/call-box/config")
    .json(&json!({ "batchSize": 10, "maxRetries": 0 }))
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::OK);
  let json = body(&res);
  assert_eq!(json["config"]["batchSize"], 10);
  assert_eq!(json["config"]["maxRetries"], 3);

  let res = authorized("GET", "/api/call-box/config?callboxId=cb-1").reply(&api).await;
  let json = body(&res);
  assert_eq!(json["config"]["batchSize"], 10);
  assert_eq!(json["config"]["callboxSpecific"]["slots"], 2);

  let res = authorized("GET", "/api/call-box/config").reply(&api).await;
  assert_eq!(body(&res)["config"]["callboxSpecific"], json!({}));
}

#[tokio::test]
async fn config_rejects_timeouts_beyond_range() {
  let api = api();
  let res = authorized("PUT", "/api/call-box/config")
    .json(&json!({ "timeoutMs": 1u64 << 63, "batchSize": 9 }))
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::BAD_REQUEST);
  assert_eq!(body(&res)["code"], "VALIDATION_ERROR");

  let res = authorized("GET", "/api/call-box/config").reply(&api).await;
  let json = body(&res);
  assert_eq!(json["config"]["timeoutMs"], 30_000);
  assert_eq!(json["config"]["batchSize"], 5);
}

#[tokio::test]
async fn clear_empties_the_active_queue() {
  let api = api();
  for phone in ["+237670000001", "+237670000002"] {
    submit(&api, json!({ "type": "voucher", "phoneNumber": phone })).await;
  }
  let res = authorized("DELETE", "/api/call-box/transactions/clear").reply(&api).await;
  assert_eq!(res.status(), StatusCode::OK);
  assert_eq!(body(&res)["message"], "2 transactions removed from the queue");
}

#[tokio::test]
async fn sync_admin_routes() {
  let api = api();
  let res = authorized("GET", "/api/sync/status").reply(&api).await;
  assert_eq!(body(&res)["syncStatus"]["isRunning"], false);

  let res = authorized("POST", "/api/sync/force").reply(&api).await;
  let json = body(&res);
  assert_eq!(json["success"], true);
  assert_eq!(json["report"]["liveWorkers"], 0);

  let res = authorized("POST", "/api/sync/start").reply(&api).await;
  assert_eq!(body(&res)["message"], "Sync scheduler started");
  let res = authorized("POST", "/api/sync/stop").reply(&api).await;
  assert_eq!(body(&res)["message"], "Sync scheduler stopped");

  let res = authorized("POST", "/api/sync/reclaim").reply(&api).await;
  assert_eq!(body(&res)["reclaimed"], json!([]));
}

#[tokio::test]
async fn watching_an_unknown_transaction_is_not_found() {
  let res = authorized("GET", "/api/call-box/transactions/tx_missing/events")
    .reply(&api())
    .await;
  assert_eq!(res.status(), StatusCode::NOT_FOUND);
  assert_eq!(body(&res)["code"], "TRANSACTION_NOT_FOUND");
}

#[tokio::test(start_paused = true)]
async fn watch_stream_follows_a_transaction_until_it_finishes() {
  let (store, api) = api_with_store();
  store
    .register(Registration {
      callbox_id: "cb-1".into(),
      capabilities: None,
      version: None,
      location: None,
    })
    .await;
  let id = store
    .submit(NewTransaction::new(TransactionType::Voucher, "+237670000077"))
    .await
    .transaction
    .id;

  let watch = authorized("GET", &format!("/api/call-box/transactions/{id}/events")).reply(&api);
  let drive = async {
    // Polls land on whole seconds; every change below happens between two of them.
    tokio::time::sleep(Duration::from_millis(500)).await;
    store.claim("cb-1", 1).await.unwrap();
    store
      .update_status(&id, ReportedStatus::Retry, "cb-1", None, Some("busy".into()))
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    store.claim("cb-1", 1).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    store
      .update_status(&id, ReportedStatus::Completed, "cb-1", None, None)
      .await
      .unwrap();
  };
  let (res, ()) = tokio::join!(watch, drive);

  assert_eq!(res.status(), StatusCode::OK);
  let text = String::from_utf8_lossy(res.body()).to_string();
  let events: Vec<Value> = text
    .lines()
    .filter_map(|line| line.strip_prefix("data:"))
    .map(|data| serde_json::from_str(data.trim()).unwrap())
    .collect();
  let seen: Vec<(String, u64)> = events
    .iter()
    .map(|e| (e["status"].as_str().unwrap().to_string(), e["retryCount"].as_u64().unwrap()))
    .collect();
  assert_eq!(
    seen,
    vec![
      ("pending".to_string(), 0),
      ("pending".to_string(), 1),
      ("assigned".to_string(), 1),
      ("completed".to_string(), 1),
    ]
  );
  assert!(events.iter().all(|e| e["transactionId"] == id.as_str() && e["updatedAt"].is_string()));
  assert!(text.contains("event:status"));
}
