//! Where the scheduler pulls new jobs from.

use std::collections::VecDeque;

use futures::future::{BoxFuture, FutureExt};
use rand::Rng;
use serde_json::json;
use tokio::sync::Mutex;

use crate::models::{NewTransaction, Priority, TransactionType};

pub trait JobSource: Send + Sync {
  /// Up to `limit` jobs that have not been handed to the engine yet.
  fn fetch_batch(&self, limit: usize) -> BoxFuture<'_, Vec<NewTransaction>>;
}

/// In-memory inbox fed by the embedding platform.
#[derive(Debug, Default)]
pub struct BufferedSource {
  inbox: Mutex<VecDeque<NewTransaction>>,
}

impl BufferedSource {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn push(&self, job: NewTransaction) {
    self.inbox.lock().await.push_back(job);
  }

  pub async fn len(&self) -> usize {
    self.inbox.lock().await.len()
  }
}

impl JobSource for BufferedSource {
  fn fetch_batch(&self, limit: usize) -> BoxFuture<'_, Vec<NewTransaction>> {
    async move {
      let mut inbox = self.inbox.lock().await;
      let take = limit.min(inbox.len());
      inbox.drain(..take).collect()
    }
    .boxed()
  }
}

const OPERATORS: [&str; 3] = ["MTN", "Orange", "Moov"];

/// Generates a handful of plausible jobs per fetch, for demos and load tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedSource;

impl SimulatedSource {
  pub fn generate(limit: usize) -> Vec<NewTransaction> {
    let mut rng = rand::thread_rng();
    let count = rng.gen_range(0..=3).min(limit);
    (0..count)
      .map(|_| {
        let kind = TransactionType::ALL[rng.gen_range(0..TransactionType::ALL.len())];
        let operator = OPERATORS[rng.gen_range(0..OPERATORS.len())];
        let phone = format!("+237{}", rng.gen_range(600_000_000u64..1_000_000_000));
        let mut job = NewTransaction::new(kind, phone)
          .pay_item(format!("{operator}_{kind}_{}", rng.gen_range(0..100)))
          .customer_info(json!({
            "name": format!("Customer {}", rng.gen_range(0..1000)),
            "operator": operator,
          }))
          .priority(if rng.gen_bool(0.2) { Priority::High } else { Priority::Normal });
        if kind.requires_amount() {
          job = job.amount(rng.gen_range(1_000..11_000));
        }
        job
      })
      .collect()
  }
}

impl JobSource for SimulatedSource {
  fn fetch_batch(&self, limit: usize) -> BoxFuture<'_, Vec<NewTransaction>> {
    let jobs = Self::generate(limit);
    async move { jobs }.boxed()
  }
}
