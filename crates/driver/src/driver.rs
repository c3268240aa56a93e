use crate::{cli::Mode, env::DriverEnv, locks::NodeLockSet};
use std::{sync::Arc, time::Duration};
use tokio::sync::{watch, Mutex};
use tracing::{debug, Span};
use uuid::Uuid;
use vpc_block_provider::{messages::SESSION_FAILED, CloudProvider, UserError, VolumeProvider};
use vpc_csi_mount_utils::Mounter;
use vpc_csi_proto::IdentityService;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// State shared by the identity, controller and node services.
pub struct Driver {
  name: String,
  mode: Mode,
  pub(crate) env: DriverEnv,
  cloud: Option<Arc<dyn CloudProvider>>,
  pub(crate) mounter: Mounter,
  /// Serializes attach and detach per node.
  pub(crate) attach_locks: NodeLockSet,
  /// Serializes every node RPC.
  pub(crate) node_lock: Mutex<()>,
  shutdown: watch::Receiver<bool>,
  cpus: usize,
}

impl Driver {
  pub fn new(
    name: impl Into<String>,
    mode: Mode,
    env: DriverEnv,
    mounter: Mounter,
    shutdown: watch::Receiver<bool>,
  ) -> Self {
    let cpus = std::thread::available_parallelism()
      .map(|n| n.get())
      .unwrap_or(1);

    Driver {
      name: name.into(),
      mode,
      env,
      cloud: None,
      mounter,
      attach_locks: NodeLockSet::default(),
      node_lock: Mutex::new(()),
      shutdown,
      cpus,
    }
  }

  pub fn with_cloud(mut self, cloud: Arc<dyn CloudProvider>) -> Self {
    self.cloud = Some(cloud);
    self
  }

  pub fn with_cpus(mut self, cpus: usize) -> Self {
    self.cpus = cpus;
    self
  }

  #[inline]
  pub fn mode(&self) -> Mode {
    self.mode
  }

  #[inline]
  pub(crate) fn cpus(&self) -> usize {
    self.cpus
  }

  pub(crate) fn cloud(&self) -> Result<&dyn CloudProvider, UserError> {
    self
      .cloud
      .as_deref()
      .ok_or_else(|| SESSION_FAILED.error(&[&"no cloud provider configured"]))
  }

  pub(crate) async fn session(&self, request_id: &str) -> Result<Arc<dyn VolumeProvider>, UserError> {
    self.cloud()?.session(request_id).await
  }

  /// Sleep for `period` unless shutdown starts first.
  pub(crate) async fn pause(&self, period: Duration) {
    let mut shutdown = self.shutdown.clone();
    if *shutdown.borrow() {
      return;
    }

    debug!(?period, "Pausing before answering");
    tokio::select! {
      _ = tokio::time::sleep(period) => {}
      Ok(()) = shutdown.changed() => debug!("Pause cut short by shutdown"),
    }
  }
}

/// Fresh id for the provider calls of one RPC, recorded on the current
/// span.
pub(crate) fn request_id() -> String {
  let id = Uuid::new_v4().to_string();
  Span::current().record("request_id", &id.as_str());
  id
}

impl IdentityService for Driver {
  fn name(&self) -> &str {
    &self.name
  }

  fn version(&self) -> &str {
    VERSION
  }

  fn controller_service(&self) -> bool {
    self.mode.serves_controller()
  }

  fn volume_accessibility_constraints_support(&self) -> bool {
    true
  }

  fn ready(&self) -> bool {
    !self.mode.serves_controller() || self.cloud.is_some()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{env, harness};
  use std::time::Duration;
  use tokio::time::Instant;
  use vpc_csi_mount_utils::FakeMounter;

  #[test]
  fn identity() {
    let h = harness();
    assert_eq!(h.driver.name(), "vpc.block.csi.ibm.io");
    assert_eq!(h.driver.version(), VERSION);
    assert!(h.driver.controller_service());
    assert!(h.driver.volume_accessibility_constraints_support());
    assert!(h.driver.ready());
  }

  #[test]
  fn node_only_driver_does_not_advertise_controller() {
    let (_tx, rx) = watch::channel(false);
    let driver = Driver::new(
      "vpc.block.csi.ibm.io",
      Mode::Node,
      env(),
      Mounter::from(Arc::new(FakeMounter::default())),
      rx,
    );
    assert!(!driver.controller_service());
    assert!(driver.ready());
    assert_eq!(driver.cloud().err().unwrap().code(), "FailedToGetProviderSession");
  }

  #[tokio::test(start_paused = true)]
  async fn pause_sleeps_the_full_period() {
    let h = harness();
    let start = Instant::now();
    h.driver.pause(Duration::from_secs(600)).await;
    assert!(start.elapsed() >= Duration::from_secs(600));
  }

  #[tokio::test(start_paused = true)]
  async fn shutdown_cuts_pause_short() {
    let h = harness();
    let start = Instant::now();
    let driver = h.driver.clone();
    let paused = tokio::spawn(async move { driver.pause(Duration::from_secs(600)).await });

    tokio::time::sleep(Duration::from_secs(5)).await;
    h.shutdown.send(true).unwrap();
    paused.await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(600));
  }
}
