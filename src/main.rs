use std::sync::Arc;

use anyhow::Context;
use callbox::config::{DispatchConfig, ServerConfig, UpstreamKind};
use callbox::liveness::LivenessMonitor;
use callbox::routes::routes;
use callbox::scheduler::SyncScheduler;
use callbox::store::Store;
use callbox::upstream::{BufferedSource, JobSource, SimulatedSource};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let config = ServerConfig::from_env().context("loading server configuration")?;
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::new(&config.log_level))
    .init();

  let store = Arc::new(Store::new(
    DispatchConfig::default(),
    LivenessMonitor::new(config.liveness_window_ms)?,
  ));
  let source: Arc<dyn JobSource> = match config.upstream {
    UpstreamKind::Simulated => Arc::new(SimulatedSource),
    UpstreamKind::Buffered => Arc::new(BufferedSource::new()),
  };
  let scheduler = Arc::new(SyncScheduler::new(store.clone(), source));
  if config.sync_autostart {
    scheduler.start().await;
  }

  let api = routes(store, scheduler.clone(), Arc::from(config.callbox_token.as_str()));
  let (addr, server) = warp::serve(api)
    .try_bind_with_graceful_shutdown(([0, 0, 0, 0], config.server_port), async {
      if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {e}");
      }
    })
    .with_context(|| format!("binding port {}", config.server_port))?;
  info!(%addr, upstream = ?config.upstream, "CallBox dispatch API listening");
  server.await;

  scheduler.stop().await;
  info!("Shut down cleanly");
  Ok(())
}
