//! Pushes orchestrator metadata of persistent volumes back to the cloud as
//! volume tags.
//!
//! The PV watch itself lives in the orchestrator glue, which feeds
//! [`PvInfo`] updates into [`Reconciler::run`]. Reconciliation never gates
//! an RPC.

use crate::driver::request_id;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use vpc_block_provider::{CloudProvider, UserError, VolumeTagUpdate};

/// Longest tag the VPC API accepts.
const MAX_TAG_LEN: usize = 128;

/// The parts of a persistent volume that end up in the volume tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PvInfo {
  pub name: String,
  /// CSI driver the volume belongs to.
  pub driver: String,
  /// Volume id in the cloud.
  pub volume_handle: String,
  pub reclaim_policy: String,
  pub storage_class: String,
  pub claim_namespace: Option<String>,
  pub claim_name: Option<String>,
  pub provisioner: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
  Normal,
  Warning,
}

/// Sink for user visible events about a persistent volume.
#[async_trait]
pub trait EventRecorder: Send + Sync + 'static {
  async fn record(&self, pv: &PvInfo, kind: EventKind, reason: &str, message: &str);
}

/// Tag set describing `pv`. Empty values are left out.
pub fn volume_tags(pv: &PvInfo, cluster_id: &str) -> Vec<String> {
  let pairs = [
    ("clusterid", Some(cluster_id)),
    ("reclaimpolicy", Some(pv.reclaim_policy.as_str())),
    ("storageclass", Some(pv.storage_class.as_str())),
    ("namespace", pv.claim_namespace.as_deref()),
    ("pvc", pv.claim_name.as_deref()),
    ("pv", Some(pv.name.as_str())),
    ("provisioner", pv.provisioner.as_deref()),
  ];

  pairs
    .iter()
    .filter_map(|(key, value)| match value {
      Some(v) if !v.is_empty() => Some(format!("{}:{}", key, v)),
      _ => None,
    })
    .filter(|tag| {
      let fits = tag.len() <= MAX_TAG_LEN;
      if !fits {
        warn!(%tag, "Tag too long, skipped");
      }
      fits
    })
    .collect()
}

pub struct Reconciler<R> {
  cloud: Arc<dyn CloudProvider>,
  driver_name: String,
  cluster_id: String,
  recorder: R,
}

impl<R: EventRecorder> Reconciler<R> {
  pub fn new(
    cloud: Arc<dyn CloudProvider>,
    driver_name: impl Into<String>,
    cluster_id: impl Into<String>,
    recorder: R,
  ) -> Self {
    Reconciler {
      cloud,
      driver_name: driver_name.into(),
      cluster_id: cluster_id.into(),
      recorder,
    }
  }

  /// Push the tags of one volume. Returns false when the volume is not
  /// ours.
  #[instrument(skip(self, pv), fields(pv = %pv.name, request_id))]
  pub async fn reconcile(&self, pv: &PvInfo) -> Result<bool, UserError> {
    if pv.driver != self.driver_name || pv.volume_handle.is_empty() {
      debug!(driver = %pv.driver, "Volume of another driver, skipped");
      return Ok(false);
    }

    let update = VolumeTagUpdate {
      volume_id: pv.volume_handle.clone(),
      tags: volume_tags(pv, &self.cluster_id),
    };

    let request_id = request_id();
    let result = match self.cloud.session(&request_id).await {
      Ok(session) => session.update_volume(&update).await,
      Err(e) => Err(e),
    };

    match result {
      Ok(()) => {
        info!(volume_id = %update.volume_id, "Volume tags reconciled");
        let message = format!("Tags of volume {} updated", update.volume_id);
        self
          .recorder
          .record(pv, EventKind::Normal, "VolumeTagsUpdated", &message)
          .await;
        Ok(true)
      }
      Err(e) => {
        warn!(volume_id = %update.volume_id, error = %e, "Volume tag update failed");
        self
          .recorder
          .record(pv, EventKind::Warning, "VolumeTagsUpdateFailed", &e.to_string())
          .await;
        Err(e)
      }
    }
  }

  /// Reconcile every update until the stream ends or shutdown starts.
  pub async fn run<S>(&self, updates: S, mut shutdown: watch::Receiver<bool>)
  where
    S: Stream<Item = PvInfo> + Send,
  {
    futures::pin_mut!(updates);
    info!(driver = %self.driver_name, "PV reconciler started");

    loop {
      tokio::select! {
        pv = updates.next() => match pv {
          // Failures are already reported as events, the next update retries.
          Some(pv) => { let _ = self.reconcile(&pv).await; }
          None => break,
        },
        Ok(()) = shutdown.changed() => break,
      }
    }

    info!("PV reconciler stopped");
  }
}
