use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_stream::{StreamExt, wrappers::IntervalStream};
use warp::Filter;

use crate::auth::with_auth;
use crate::error::DispatchError;
use crate::models::{Transaction, TransactionStatus};
use crate::routes::with_store;
use crate::store::Store;

const WATCH_INTERVAL: Duration = Duration::from_secs(1);

pub fn events_route(store: Arc<Store>, token: Arc<str>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("transactions" / String / "events")
    .and(warp::get())
    .and(with_auth(token))
    .and(with_store(store))
    .and_then(handle_events)
}

fn status_event(tx: &Transaction) -> warp::sse::Event {
  warp::sse::Event::default().event("status").data(
    json!({
      "transactionId": tx.id,
      "status": tx.status,
      "retryCount": tx.retry_count,
      "updatedAt": tx.updated_at,
    })
    .to_string(),
  )
}

/// Streams status and retry-count changes of one transaction, closing after it reaches a terminal state.
async fn handle_events(transaction_id: String, store: Arc<Store>) -> Result<impl warp::Reply, warp::Rejection> {
  if store.find(&transaction_id).await.is_none() {
    return Err(warp::reject::custom(DispatchError::TransactionNotFound(transaction_id)));
  }

  let mut finished = false;
  // A retry cycle can land back on the same status between polls, so the retry count is compared too.
  let mut last: Option<(TransactionStatus, u32)> = None;
  let stream = IntervalStream::new(tokio::time::interval(WATCH_INTERVAL))
    .then(move |_| {
      let store = store.clone();
      let transaction_id = transaction_id.clone();
      async move { store.find(&transaction_id).await }
    })
    .map_while(move |tx| {
      if finished {
        return None;
      }
      let tx = tx?;
      finished = tx.status.is_terminal();
      Some(tx)
    })
    .filter_map(move |tx| {
      let seen = (tx.status, tx.retry_count);
      if last == Some(seen) {
        return None;
      }
      last = Some(seen);
      Some(Ok::<_, Infallible>(status_event(&tx)))
    });

  Ok(warp::sse::reply(warp::sse::keep_alive().stream(stream)))
}
