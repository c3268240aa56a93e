use anyhow::Context;
use clap::Parser;
use std::{path::Path, sync::Arc};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vpc_block_csi_driver::{
  cli::{Cli, LogFormat},
  driver::Driver,
  env::DriverEnv,
  server,
};
use vpc_block_provider::{config, VpcCloud};
use vpc_csi_mount_utils::Mounter;

fn init_tracing(format: LogFormat) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
  match format {
    LogFormat::Text => subscriber.init(),
    LogFormat::Json => subscriber.json().init(),
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.log_format);

  let env = DriverEnv::from_env();
  info!(
    version = env!("CARGO_PKG_VERSION"),
    driver = %cli.driver_name,
    mode = ?cli.mode,
    metrics_address = %cli.metrics_address,
    "Starting VPC block CSI driver"
  );

  let cloud = if cli.mode.serves_controller() {
    let settings = config::load(
      &cli.config,
      cli.credentials.as_deref(),
      &env.vault_token_path,
    )
    .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if settings.account_id.is_empty() {
      warn!("No account id configured, snapshots of other accounts cannot be told apart");
    }
    Some(VpcCloud::new(settings).context("failed to create the VPC client")?)
  } else {
    None
  };

  if env.reconciler_enabled() {
    info!(cluster_id = ?env.cluster_id, "PV tag reconciliation follows the orchestrator PV watch");
  }

  let socket_group = env.sidecar_group_id;
  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let mut driver = Driver::new(
    cli.driver_name.clone(),
    cli.mode,
    env,
    Mounter::os(),
    shutdown_rx.clone(),
  );
  if let Some(cloud) = cloud {
    driver = driver.with_cloud(Arc::new(cloud));
  }

  tokio::spawn(async move {
    if let Err(e) = server::shutdown_signal().await {
      error!(error = %e, "Failed to listen for shutdown signals, stopping");
    }
    let _ = shutdown_tx.send(true);
  });

  let served = server::serve(Arc::new(driver), &cli.endpoint, socket_group, shutdown_rx).await;
  server::cleanup(&cli.endpoint, &cli.driver_name, Path::new(server::KUBELET_ROOT));
  served.context("CSI server failed")?;

  info!("Shut down");
  Ok(())
}
