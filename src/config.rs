use std::env;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};

pub const DEFAULT_LIVENESS_WINDOW_MS: u64 = 30_000;

/// Process-level settings for the API server, read once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
  pub callbox_token: String,
  pub server_port: u16,
  pub log_level: String,
  pub sync_autostart: bool,
  pub upstream: UpstreamKind,
  pub liveness_window_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamKind {
  Simulated,
  Buffered,
}

impl FromStr for UpstreamKind {
  type Err = DispatchError;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "simulated" => Ok(UpstreamKind::Simulated),
      "buffered" => Ok(UpstreamKind::Buffered),
      other => Err(DispatchError::Config(format!("UPSTREAM_SOURCE must be simulated or buffered, got '{other}'"))),
    }
  }
}

impl ServerConfig {
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|name| env::var(name).ok())
  }

  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let callbox_token = lookup("CALLBOX_TOKEN")
      .filter(|t| !t.is_empty())
      .ok_or_else(|| DispatchError::Config("required environment variable CALLBOX_TOKEN is not set".into()))?;

    let liveness_window_ms = parse_or(&lookup, "LIVENESS_WINDOW_MS", DEFAULT_LIVENESS_WINDOW_MS)?;
    if duration_ms(liveness_window_ms).is_none() {
      return Err(DispatchError::Config(format!(
        "LIVENESS_WINDOW_MS must be at most {} ms, got {liveness_window_ms}",
        i64::MAX
      )));
    }

    Ok(Self {
      callbox_token,
      server_port: parse_or(&lookup, "SERVER_PORT", 8080)?,
      log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".into()),
      sync_autostart: parse_or(&lookup, "SYNC_AUTOSTART", true)?,
      upstream: parse_or(&lookup, "UPSTREAM_SOURCE", UpstreamKind::Buffered)?,
      liveness_window_ms,
    })
  }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
  T: FromStr,
{
  match lookup(name) {
    Some(raw) => raw
      .parse()
      .map_err(|_| DispatchError::Config(format!("{name} has an invalid value '{raw}'"))),
    None => Ok(default),
  }
}

/// Dispatch tuning shared by the claim path and the scheduler. Mutable at runtime through `PUT /config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
  pub max_retries: u32,
  pub timeout_ms: u64,
  pub batch_size: usize,
  pub poll_interval_ms: u64,
}

impl Default for DispatchConfig {
  fn default() -> Self {
    Self {
      max_retries: 3,
      timeout_ms: 30_000,
      batch_size: 5,
      poll_interval_ms: 5_000,
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
  pub max_retries: Option<u32>,
  pub timeout_ms: Option<u64>,
  pub batch_size: Option<usize>,
  pub poll_interval_ms: Option<u64>,
}

/// `ms` as a chrono duration, or None when chrono cannot represent it.
pub(crate) fn duration_ms(ms: u64) -> Option<Duration> {
  i64::try_from(ms).ok().and_then(Duration::try_milliseconds)
}

impl DispatchConfig {
  /// Absent and zero fields leave the current value alone. Nothing changes
  /// when any field is out of range.
  pub fn apply(&mut self, update: &ConfigUpdate) -> Result<()> {
    if update.timeout_ms.is_some_and(|ms| duration_ms(ms).is_none()) {
      return Err(DispatchError::Validation(format!("timeoutMs must be at most {} ms", i64::MAX)));
    }
    if let Some(v) = update.max_retries.filter(|v| *v > 0) {
      self.max_retries = v;
    }
    if let Some(v) = update.timeout_ms.filter(|v| *v > 0) {
      self.timeout_ms = v;
    }
    if let Some(v) = update.batch_size.filter(|v| *v > 0) {
      self.batch_size = v;
    }
    if let Some(v) = update.poll_interval_ms.filter(|v| *v > 0) {
      self.poll_interval_ms = v;
    }
    Ok(())
  }
}
