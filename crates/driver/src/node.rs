mod expand;
mod publish;
mod stage;
mod stats;

use crate::{
  driver::Driver,
  params::{REGION_TOPOLOGY_KEY, ZONE_TOPOLOGY_KEY},
  status::IntoStatus,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::instrument;
use vpc_block_provider::{messages::EMPTY_NODE_ID, UserError};
use vpc_csi_mount_utils::MountError;
use vpc_csi_proto::{
  node::{
    NodeCapabilities, NodeExpandVolumeRequest, NodeExpandVolumeResponse, NodeGetInfoResponse,
    NodeGetVolumeStatsRequest, NodeGetVolumeStatsResponse, NodePublishVolumeRequest,
    NodeStageVolumeRequest, NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest, Topology,
  },
  NodeService, Result,
};

/// Hosts with at least this many cores take the larger volume limit.
const LARGE_NODE_CPUS: usize = 4;
const LARGE_NODE_MAX_VOLUMES: u64 = 12;
const SMALL_NODE_MAX_VOLUMES: u64 = 4;

impl Driver {
  /// Device mounted at `path`, if any.
  async fn backing_device(&self, path: &Path) -> std::result::Result<Option<PathBuf>, MountError> {
    Ok(
      self
        .mounter
        .get_device_name_from_mount(path)
        .await?
        .map(|(device, _)| device),
    )
  }

  fn node_info(&self) -> std::result::Result<NodeGetInfoResponse, UserError> {
    let node_id = self
      .env
      .node_name
      .as_deref()
      .ok_or_else(|| EMPTY_NODE_ID.error(&[]).with_backend_error("KUBE_NODE_NAME is not set"))?;

    let mut topology = Topology::new();
    if let Some(zone) = &self.env.node_zone {
      topology.insert(ZONE_TOPOLOGY_KEY.to_owned(), zone.clone());
    }
    if let Some(region) = &self.env.node_region {
      topology.insert(REGION_TOPOLOGY_KEY.to_owned(), region.clone());
    }

    let max_volumes = if self.cpus() >= LARGE_NODE_CPUS {
      LARGE_NODE_MAX_VOLUMES
    } else {
      SMALL_NODE_MAX_VOLUMES
    };

    Ok(
      NodeGetInfoResponse::new(node_id)
        .with_max_volumes(max_volumes)
        .with_topology(topology),
    )
  }
}

#[async_trait]
impl NodeService for Driver {
  fn capabilities(&self) -> NodeCapabilities {
    NodeCapabilities::STAGE_UNSTAGE_VOLUME
      | NodeCapabilities::GET_VOLUME_STATS
      | NodeCapabilities::EXPAND_VOLUME
  }

  #[instrument(skip(self, request), fields(volume_id = %request.volume_id()))]
  async fn node_stage_volume(&self, request: NodeStageVolumeRequest) -> Result<()> {
    let _guard = self.node_lock.lock().await;
    self.stage_device(&request).await.into_status()
  }

  #[instrument(skip(self, request), fields(volume_id = %request.volume_id()))]
  async fn node_unstage_volume(&self, request: NodeUnstageVolumeRequest) -> Result<()> {
    let _guard = self.node_lock.lock().await;
    self
      .release_mount(request.staging_target_path())
      .await
      .into_status()
  }

  #[instrument(skip(self, request), fields(volume_id = %request.volume_id()))]
  async fn node_publish_volume(&self, request: NodePublishVolumeRequest) -> Result<()> {
    let _guard = self.node_lock.lock().await;
    self.publish_target(&request).await.into_status()
  }

  #[instrument(skip(self, request), fields(volume_id = %request.volume_id()))]
  async fn node_unpublish_volume(&self, request: NodeUnpublishVolumeRequest) -> Result<()> {
    let _guard = self.node_lock.lock().await;
    self
      .release_mount(request.target_path())
      .await
      .into_status()
  }

  #[instrument(skip(self, request), fields(volume_id = %request.volume_id()))]
  async fn node_get_volume_stats(
    &self,
    request: NodeGetVolumeStatsRequest,
  ) -> Result<NodeGetVolumeStatsResponse> {
    let _guard = self.node_lock.lock().await;
    self
      .volume_stats(request.volume_path())
      .await
      .into_status()
  }

  #[instrument(skip(self, request), fields(volume_id = %request.volume_id()))]
  async fn node_expand_volume(
    &self,
    request: NodeExpandVolumeRequest,
  ) -> Result<NodeExpandVolumeResponse> {
    let _guard = self.node_lock.lock().await;
    self.expand_filesystem(&request).await.into_status()
  }

  #[instrument(skip(self))]
  async fn node_get_info(&self) -> Result<NodeGetInfoResponse> {
    let _guard = self.node_lock.lock().await;
    self.node_info().into_status()
  }
}
