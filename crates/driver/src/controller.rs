mod publish;
mod snapshots;
mod volumes;

pub use publish::{
  ATTACH_STATUS_KEY, DEVICE_PATH_KEY, NODE_ID_KEY, REQUEST_ID_KEY, VOLUME_ID_KEY,
};

use crate::{
  driver::{request_id, Driver},
  status::IntoStatus,
};
use async_trait::async_trait;
use tracing::instrument;
use vpc_block_provider::api::MAX_LIMIT;
use vpc_csi_proto::{
  controller::{
    ControllerCapabilities, ControllerExpandVolumeRequest, ControllerExpandVolumeResponse,
    ControllerPublishVolumeRequest, ControllerPublishVolumeResponse,
    ControllerUnpublishVolumeRequest, CreateSnapshotRequest, CreateVolumeRequest,
    DeleteSnapshotRequest, DeleteVolumeRequest, ListSnapshotsRequest, ListSnapshotsResponse,
    ListVolumesRequest, ListVolumesResponse, Snapshot, ValidateVolumeCapabilitiesRequest,
    ValidateVolumeCapabilitiesResponse, Volume,
  },
  ControllerService, Result,
};

const DEFAULT_LIST_LIMIT: u32 = 50;

/// Page size for a list call. Zero means the default, anything above the
/// backend maximum is clamped.
fn list_limit(max_entries: Option<u32>) -> u32 {
  match max_entries {
    None | Some(0) => DEFAULT_LIST_LIMIT,
    Some(n) => n.min(MAX_LIMIT),
  }
}

#[async_trait]
impl ControllerService for Driver {
  fn capabilities(&self) -> ControllerCapabilities {
    ControllerCapabilities::CREATE_DELETE_VOLUME
      | ControllerCapabilities::PUBLISH_UNPUBLISH_VOLUME
      | ControllerCapabilities::LIST_VOLUMES
      | ControllerCapabilities::CREATE_DELETE_SNAPSHOT
      | ControllerCapabilities::LIST_SNAPSHOTS
      | ControllerCapabilities::EXPAND_VOLUME
  }

  #[instrument(skip(self, request), fields(name = %request.name(), request_id))]
  async fn create_volume(&self, request: CreateVolumeRequest) -> Result<Volume> {
    let request_id = request_id();
    self.create(request, &request_id).await.into_status()
  }

  #[instrument(skip(self, request), fields(volume_id = %request.volume_id(), request_id))]
  async fn delete_volume(&self, request: DeleteVolumeRequest) -> Result<()> {
    let request_id = request_id();
    self
      .delete(request.volume_id(), &request_id)
      .await
      .into_status()
  }

  #[instrument(
    skip(self, request),
    fields(volume_id = %request.volume_id(), node_id = %request.node_id(), request_id)
  )]
  async fn controller_publish_volume(
    &self,
    request: ControllerPublishVolumeRequest,
  ) -> Result<ControllerPublishVolumeResponse> {
    let request_id = request_id();
    self.publish(&request, &request_id).await.into_status()
  }

  #[instrument(
    skip(self, request),
    fields(volume_id = %request.volume_id(), node_id = %request.node_id(), request_id)
  )]
  async fn controller_unpublish_volume(
    &self,
    request: ControllerUnpublishVolumeRequest,
  ) -> Result<()> {
    let request_id = request_id();
    self
      .unpublish(request.volume_id(), request.node_id(), &request_id)
      .await
      .into_status()
  }

  #[instrument(skip(self, request), fields(volume_id = %request.volume_id(), request_id))]
  async fn validate_volume_capabilities(
    &self,
    request: ValidateVolumeCapabilitiesRequest,
  ) -> Result<ValidateVolumeCapabilitiesResponse> {
    let request_id = request_id();
    self.validate(request, &request_id).await.into_status()
  }

  #[instrument(skip(self, request), fields(request_id))]
  async fn list_volumes(&self, request: ListVolumesRequest) -> Result<ListVolumesResponse> {
    let request_id = request_id();
    self
      .list(
        list_limit(request.max_entries()),
        request.starting_token(),
        &request_id,
      )
      .await
      .into_status()
  }

  #[instrument(
    skip(self, request),
    fields(name = %request.name(), source_volume_id = %request.source_volume_id(), request_id)
  )]
  async fn create_snapshot(&self, request: CreateSnapshotRequest) -> Result<Snapshot> {
    let request_id = request_id();
    self
      .take_snapshot(request.source_volume_id(), request.name(), &request_id)
      .await
      .into_status()
  }

  #[instrument(skip(self, request), fields(snapshot_id = %request.snapshot_id(), request_id))]
  async fn delete_snapshot(&self, request: DeleteSnapshotRequest) -> Result<()> {
    let request_id = request_id();
    self
      .drop_snapshot(request.snapshot_id(), &request_id)
      .await
      .into_status()
  }

  #[instrument(skip(self, request), fields(request_id))]
  async fn list_snapshots(&self, request: ListSnapshotsRequest) -> Result<ListSnapshotsResponse> {
    let request_id = request_id();
    self
      .find_snapshots(&request, &request_id)
      .await
      .into_status()
  }

  #[instrument(skip(self, request), fields(volume_id = %request.volume_id(), request_id))]
  async fn controller_expand_volume(
    &self,
    request: ControllerExpandVolumeRequest,
  ) -> Result<ControllerExpandVolumeResponse> {
    let request_id = request_id();
    self.expand(&request, &request_id).await.into_status()
  }
}
