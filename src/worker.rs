use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use callbox::client::CallboxClient;
use callbox::models::{ReportedStatus, Transaction};
use callbox::worker_processing::{SessionOutcome, execute_session};
use futures::future::join_all;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const REGISTER_ATTEMPTS: usize = 5;
const DELAY: u64 = 100;

struct Unit {
  client: CallboxClient,
  callbox_id: String,
  location: String,
  slots: usize,
  step: Duration,
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::new(env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into())))
    .init();

  let api_url = env::var("CALLBOX_API_URL").unwrap_or_else(|_| "http://localhost:8080".into());
  let token = env::var("CALLBOX_TOKEN").context("CALLBOX_TOKEN must be set")?;
  let base_id = env::var("CALLBOX_ID").unwrap_or_else(|_| "callbox".into());
  let location = env::var("CALLBOX_LOCATION").unwrap_or_else(|_| "unknown".into());
  let fleet_size: usize = env_number("CALLBOX_FLEET_SIZE", 1)?;
  let slots: usize = env_number("CALLBOX_SLOTS", 2)?;
  let step = Duration::from_millis(env_number("CALLBOX_STEP_MS", 1_500)?);

  let client = CallboxClient::new(api_url, token);
  let units = (1..=fleet_size).map(|n| {
    let callbox_id = if fleet_size == 1 { base_id.clone() } else { format!("{base_id}-{n}") };
    let unit = Unit {
      client: client.clone(),
      callbox_id,
      location: location.clone(),
      slots: slots.max(1),
      step,
    };
    tokio::spawn(run_unit(unit))
  });

  for outcome in join_all(units).await {
    match outcome {
      Ok(Ok(())) => {}
      Ok(Err(e)) => error!("CallBox unit stopped: {e:#}"),
      Err(e) => error!("CallBox unit panicked: {e}"),
    }
  }
  Ok(())
}

fn env_number<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
  match env::var(name) {
    Ok(raw) => raw.parse().map_err(|_| anyhow::anyhow!("{name} must be a number, got '{raw}'")),
    Err(_) => Ok(default),
  }
}

async fn run_unit(unit: Unit) -> Result<()> {
  let capabilities = json!({
    "maxConcurrentTransactions": unit.slots,
    "supportedTypes": ["recharge", "voucher", "deposit", "withdraw"],
  });
  let mut config = Retry::spawn(ExponentialBackoff::from_millis(DELAY).take(REGISTER_ATTEMPTS), || {
    unit.client.register(&unit.callbox_id, capabilities.clone(), &unit.location)
  })
  .await
  .with_context(|| format!("registering {}", unit.callbox_id))?;
  info!(callbox_id = %unit.callbox_id, "Registered with dispatch engine");

  let semaphore = Arc::new(Semaphore::new(unit.slots));
  loop {
    let busy = unit.slots - semaphore.available_permits();
    match unit
      .client
      .heartbeat(&unit.callbox_id, busy, json!({ "busySlots": busy }))
      .await
    {
      Ok(reply) => config = reply.config,
      Err(e) => warn!(callbox_id = %unit.callbox_id, "Heartbeat failed: {e:#}"),
    }

    let free = semaphore.available_permits();
    if free > 0 {
      match unit.client.claim(&unit.callbox_id, free.min(config.batch_size)).await {
        Ok(claimed) => {
          for tx in claimed {
            let permit = semaphore.clone().acquire_owned().await?;
            let client = unit.client.clone();
            let callbox_id = unit.callbox_id.clone();
            let step = unit.step;
            tokio::spawn(async move {
              process(&client, &callbox_id, tx, step).await;
              drop(permit);
            });
          }
        }
        Err(e) => error!(callbox_id = %unit.callbox_id, "Claim failed: {e:#}"),
      }
    }

    tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
  }
}

async fn process(client: &CallboxClient, callbox_id: &str, tx: Transaction, step: Duration) {
  if let Err(e) = client
    .report(&tx.id, callbox_id, ReportedStatus::Processing, None, None)
    .await
  {
    error!(transaction_id = %tx.id, "Could not mark transaction processing: {e:#}");
    return;
  }

  let (status, result, error_message) = match execute_session(&tx, callbox_id, step).await {
    SessionOutcome::Completed(result) => (ReportedStatus::Completed, Some(result), None),
    SessionOutcome::Retry(reason) => (ReportedStatus::Retry, None, Some(reason)),
    SessionOutcome::Failed(reason) => (ReportedStatus::Failed, None, Some(reason)),
  };

  match client.report(&tx.id, callbox_id, status, result, error_message).await {
    Ok(()) => info!(transaction_id = %tx.id, status = %status, "Transaction reported"),
    Err(e) => error!(transaction_id = %tx.id, "Failed to report outcome: {e:#}"),
  }
}
