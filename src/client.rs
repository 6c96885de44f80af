//! HTTP client for the CallBox side of the protocol, shared by the simulated
//! fleet and the terminal monitor.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::DispatchConfig;
use crate::models::{DispatchStats, ReportedStatus, Transaction};

#[derive(Debug, Clone)]
pub struct CallboxClient {
  http: reqwest::Client,
  base_url: String,
  token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatReply {
  pub pending_transactions: usize,
  pub config: DispatchConfig,
}

#[derive(Deserialize)]
struct RegisterReply {
  config: DispatchConfig,
}

#[derive(Deserialize)]
struct TransactionsReply {
  transactions: Vec<Transaction>,
}

#[derive(Deserialize)]
struct StatsReply {
  stats: DispatchStats,
}

impl CallboxClient {
  pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
    Self {
      http: reqwest::Client::new(),
      base_url: base_url.into().trim_end_matches('/').to_string(),
      token: token.into(),
    }
  }

  fn url(&self, path: &str) -> String {
    format!("{}/api/call-box/{}", self.base_url, path)
  }

  pub async fn register(&self, callbox_id: &str, capabilities: Value, location: &str) -> Result<DispatchConfig> {
    let reply: RegisterReply = self
      .http
      .post(self.url("register"))
      .bearer_auth(&self.token)
      .json(&json!({
        "callboxId": callbox_id,
        "capabilities": capabilities,
        "version": env!("CARGO_PKG_VERSION"),
        "location": location,
      }))
      .send()
      .await?
      .error_for_status()?
      .json()
      .await
      .context("decoding register reply")?;
    Ok(reply.config)
  }

  pub async fn heartbeat(&self, callbox_id: &str, queue_size: usize, metrics: Value) -> Result<HeartbeatReply> {
    let reply = self
      .http
      .post(self.url("heartbeat"))
      .bearer_auth(&self.token)
      .json(&json!({
        "callboxId": callbox_id,
        "status": "active",
        "queueSize": queue_size,
        "metrics": metrics,
      }))
      .send()
      .await?
      .error_for_status()?
      .json()
      .await
      .context("decoding heartbeat reply")?;
    Ok(reply)
  }

  pub async fn claim(&self, callbox_id: &str, limit: usize) -> Result<Vec<Transaction>> {
    let reply: TransactionsReply = self
      .http
      .get(self.url("transactions/pending"))
      .bearer_auth(&self.token)
      .query(&[("callboxId", callbox_id.to_string()), ("limit", limit.to_string())])
      .send()
      .await?
      .error_for_status()?
      .json()
      .await
      .context("decoding claim reply")?;
    Ok(reply.transactions)
  }

  pub async fn report(
    &self,
    transaction_id: &str,
    callbox_id: &str,
    status: ReportedStatus,
    result: Option<Value>,
    error_message: Option<String>,
  ) -> Result<()> {
    self
      .http
      .put(self.url(&format!("transactions/{transaction_id}/status")))
      .bearer_auth(&self.token)
      .json(&json!({
        "status": status.to_string(),
        "callboxId": callbox_id,
        "result": result,
        "errorMessage": error_message,
      }))
      .send()
      .await?
      .error_for_status()?;
    Ok(())
  }

  pub async fn stats(&self) -> Result<DispatchStats> {
    let reply: StatsReply = self
      .http
      .get(self.url("stats"))
      .bearer_auth(&self.token)
      .send()
      .await?
      .error_for_status()?
      .json()
      .await
      .context("decoding stats reply")?;
    Ok(reply.stats)
  }

  pub async fn history(&self, limit: usize) -> Result<Vec<Transaction>> {
    let reply: TransactionsReply = self
      .http
      .get(self.url("transactions/history"))
      .bearer_auth(&self.token)
      .query(&[("limit", limit.to_string())])
      .send()
      .await?
      .error_for_status()?
      .json()
      .await
      .context("decoding history reply")?;
    Ok(reply.transactions)
  }
}
