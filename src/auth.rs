use std::sync::Arc;

use warp::Filter;

use crate::error::DispatchError;

/// Rejects the request unless `Authorization: Bearer <token>` matches the shared secret.
pub fn with_auth(token: Arc<str>) -> impl Filter<Extract = (), Error = warp::Rejection> + Clone {
  warp::header::optional::<String>("authorization")
    .and_then(move |header: Option<String>| {
      let token = token.clone();
      async move {
        match header.as_deref().and_then(|h| h.strip_prefix("Bearer ")) {
          Some(presented) if presented == &*token => Ok(()),
          _ => Err(warp::reject::custom(DispatchError::Unauthorized)),
        }
      }
    })
    .untuple_one()
}
