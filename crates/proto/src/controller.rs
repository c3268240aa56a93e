mod capabilities;
mod create_snapshot;
mod create_volume;
mod delete_snapshot;
mod delete_volume;
mod expand_volume;
mod list_snapshots;
mod list_volumes;
mod publish_volume;
mod snapshot;
mod unpublish_volume;
mod validate_volume_capabilities;

use crate::{
  proto,
  utils::{record_request, record_status, Record},
  IdentityService, Result,
};
use async_trait::async_trait;
use std::{convert::TryInto, sync::Arc};
use tracing::instrument;

pub use crate::volume::*;
pub use capabilities::*;
pub use create_snapshot::*;
pub use create_volume::*;
pub use delete_snapshot::*;
pub use delete_volume::*;
pub use expand_volume::*;
pub use list_snapshots::*;
pub use list_volumes::*;
pub use publish_volume::*;
pub use snapshot::*;
pub use unpublish_volume::*;
pub use validate_volume_capabilities::*;

#[async_trait]
pub trait ControllerService: IdentityService {
  /// Get the set of services provided by this controller.
  #[inline]
  fn capabilities(&self) -> ControllerCapabilities {
    ControllerCapabilities::empty()
  }

  /// Provision a new volume. Idempotent by `name`: a compatible volume
  /// that already exists is returned as is.
  #[allow(unused_variables)]
  async fn create_volume(&self, request: CreateVolumeRequest) -> Result<Volume> {
    unsupported!("CreateVolume")
  }

  /// Deprovision a volume. A volume that no longer exists is a success.
  #[allow(unused_variables)]
  async fn delete_volume(&self, request: DeleteVolumeRequest) -> Result<()> {
    unsupported!("DeleteVolume")
  }

  /// Make the volume available on the given node, i.e. attach it to the
  /// instance. Publishing an already published volume is a success.
  #[allow(unused_variables)]
  async fn controller_publish_volume(
    &self,
    request: ControllerPublishVolumeRequest,
  ) -> Result<ControllerPublishVolumeResponse> {
    unsupported!("ControllerPublishVolume")
  }

  /// Reverse of `controller_publish_volume`. A volume that is not
  /// attached to the node is a success.
  #[allow(unused_variables)]
  async fn controller_unpublish_volume(
    &self,
    request: ControllerUnpublishVolumeRequest,
  ) -> Result<()> {
    unsupported!("ControllerUnpublishVolume")
  }

  /// Check whether a pre-provisioned volume has all the capabilities the
  /// CO wants. Confirmed only if every capability is supported.
  async fn validate_volume_capabilities(
    &self,
    request: ValidateVolumeCapabilitiesRequest,
  ) -> Result<ValidateVolumeCapabilitiesResponse>;

  /// Return the volumes the plugin knows about. The CO does not expect a
  /// consistent view when paging.
  #[allow(unused_variables)]
  async fn list_volumes(&self, request: ListVolumesRequest) -> Result<ListVolumesResponse> {
    unsupported!("ListVolumes")
  }

  /// Cut a snapshot of a volume. Idempotent by `name`.
  #[allow(unused_variables)]
  async fn create_snapshot(&self, request: CreateSnapshotRequest) -> Result<Snapshot> {
    unsupported!("CreateSnapshot")
  }

  /// Delete a snapshot. A snapshot that no longer exists is a success.
  #[allow(unused_variables)]
  async fn delete_snapshot(&self, request: DeleteSnapshotRequest) -> Result<()> {
    unsupported!("DeleteSnapshot")
  }

  #[allow(unused_variables)]
  async fn list_snapshots(&self, request: ListSnapshotsRequest) -> Result<ListSnapshotsResponse> {
    unsupported!("ListSnapshots")
  }

  /// Grow a volume. A volume that is already at least as big as
  /// requested is a success.
  #[allow(unused_variables)]
  async fn controller_expand_volume(
    &self,
    request: ControllerExpandVolumeRequest,
  ) -> Result<ControllerExpandVolumeResponse> {
    unsupported!("ControllerExpandVolume")
  }
}

pub struct Controller<T: ControllerService>(Arc<T>);

pub fn controller_server<T: ControllerService>(
  service: Arc<T>,
) -> proto::controller_server::ControllerServer<Controller<T>> {
  proto::controller_server::ControllerServer::new(Controller(service))
}

#[async_trait]
impl<T: ControllerService> proto::controller_server::Controller for Controller<T> {
  #[instrument(
    name = "controller.create_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn create_volume(
    &self,
    request: tonic::Request<proto::CreateVolumeRequest>,
  ) -> Result<tonic::Response<proto::CreateVolumeResponse>> {
    let request = record_request(request.into_inner().try_into().map_err(record_status)?);
    let response = self
      .0
      .create_volume(request)
      .await
      .map_err(record_status)?
      .record_response()
      .into();
    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "controller.delete_volume", skip(self, request), fields(request))]
  async fn delete_volume(
    &self,
    request: tonic::Request<proto::DeleteVolumeRequest>,
  ) -> Result<tonic::Response<proto::DeleteVolumeResponse>> {
    let request = record_request(request.into_inner().try_into().map_err(record_status)?);
    self.0.delete_volume(request).await.map_err(record_status)?;
    Ok(tonic::Response::new(proto::DeleteVolumeResponse {}))
  }

  #[instrument(
    name = "controller.controller_publish_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn controller_publish_volume(
    &self,
    request: tonic::Request<proto::ControllerPublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerPublishVolumeResponse>> {
    let request = record_request(request.into_inner().try_into().map_err(record_status)?);
    let response = self
      .0
      .controller_publish_volume(request)
      .await
      .map_err(record_status)?
      .record_response()
      .into();
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "controller.controller_unpublish_volume",
    skip(self, request),
    fields(request)
  )]
  async fn controller_unpublish_volume(
    &self,
    request: tonic::Request<proto::ControllerUnpublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerUnpublishVolumeResponse>> {
    let request = record_request(request.into_inner().try_into().map_err(record_status)?);
    self
      .0
      .controller_unpublish_volume(request)
      .await
      .map_err(record_status)?;
    Ok(tonic::Response::new(
      proto::ControllerUnpublishVolumeResponse {},
    ))
  }

  #[instrument(
    name = "controller.validate_volume_capabilities",
    skip(self, request),
    fields(request, response)
  )]
  async fn validate_volume_capabilities(
    &self,
    request: tonic::Request<proto::ValidateVolumeCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::ValidateVolumeCapabilitiesResponse>> {
    let request = record_request(request.into_inner().try_into().map_err(record_status)?);
    let response = self
      .0
      .validate_volume_capabilities(request)
      .await
      .map_err(record_status)?
      .record_response()
      .into();
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "controller.list_volumes",
    skip(self, request),
    fields(request, response)
  )]
  async fn list_volumes(
    &self,
    request: tonic::Request<proto::ListVolumesRequest>,
  ) -> Result<tonic::Response<proto::ListVolumesResponse>> {
    let request = record_request(request.into_inner().try_into().map_err(record_status)?);
    let response = self
      .0
      .list_volumes(request)
      .await
      .map_err(record_status)?
      .record_response()
      .into();
    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "controller.get_capacity", skip(self, _request))]
  async fn get_capacity(
    &self,
    _request: tonic::Request<proto::GetCapacityRequest>,
  ) -> Result<tonic::Response<proto::GetCapacityResponse>> {
    unsupported!("GetCapacity")
  }

  #[instrument(
    name = "controller.controller_get_capabilities",
    skip(self, _request),
    fields(response)
  )]
  async fn controller_get_capabilities(
    &self,
    _request: tonic::Request<proto::ControllerGetCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::ControllerGetCapabilitiesResponse>> {
    let response = self.0.capabilities().record_response().into();
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "controller.create_snapshot",
    skip(self, request),
    fields(request, response)
  )]
  async fn create_snapshot(
    &self,
    request: tonic::Request<proto::CreateSnapshotRequest>,
  ) -> Result<tonic::Response<proto::CreateSnapshotResponse>> {
    let request = record_request(request.into_inner().try_into().map_err(record_status)?);
    let response = self
      .0
      .create_snapshot(request)
      .await
      .map_err(record_status)?
      .record_response()
      .into();
    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "controller.delete_snapshot", skip(self, request), fields(request))]
  async fn delete_snapshot(
    &self,
    request: tonic::Request<proto::DeleteSnapshotRequest>,
  ) -> Result<tonic::Response<proto::DeleteSnapshotResponse>> {
    let request = record_request(request.into_inner().try_into().map_err(record_status)?);
    self.0.delete_snapshot(request).await.map_err(record_status)?;
    Ok(tonic::Response::new(proto::DeleteSnapshotResponse {}))
  }

  #[instrument(
    name = "controller.list_snapshots",
    skip(self, request),
    fields(request, response)
  )]
  async fn list_snapshots(
    &self,
    request: tonic::Request<proto::ListSnapshotsRequest>,
  ) -> Result<tonic::Response<proto::ListSnapshotsResponse>> {
    let request = record_request(request.into_inner().try_into().map_err(record_status)?);
    let response = self
      .0
      .list_snapshots(request)
      .await
      .map_err(record_status)?
      .record_response()
      .into();
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "controller.controller_expand_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn controller_expand_volume(
    &self,
    request: tonic::Request<proto::ControllerExpandVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerExpandVolumeResponse>> {
    let request = record_request(request.into_inner().try_into().map_err(record_status)?);
    let response = self
      .0
      .controller_expand_volume(request)
      .await
      .map_err(record_status)?
      .record_response()
      .into();
    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "controller.controller_get_volume", skip(self, _request))]
  async fn controller_get_volume(
    &self,
    _request: tonic::Request<proto::ControllerGetVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerGetVolumeResponse>> {
    unsupported!("ControllerGetVolume")
  }

  #[instrument(name = "controller.controller_modify_volume", skip(self, _request))]
  async fn controller_modify_volume(
    &self,
    _request: tonic::Request<proto::ControllerModifyVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerModifyVolumeResponse>> {
    unsupported!("ControllerModifyVolume")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proto::controller_server::Controller as _;

  struct ReadOnly;

  impl IdentityService for ReadOnly {
    fn name(&self) -> &str {
      "test.csi"
    }

    fn version(&self) -> &str {
      "0.0.0"
    }
  }

  #[async_trait]
  impl ControllerService for ReadOnly {
    async fn validate_volume_capabilities(
      &self,
      request: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse> {
      Ok(ValidateVolumeCapabilitiesResponse::NotConfirmed(format!(
        "{} unknown",
        request.volume_id()
      )))
    }
  }

  #[tokio::test]
  async fn unimplemented_rpcs() {
    let controller = Controller(Arc::new(ReadOnly));

    let status = controller
      .get_capacity(tonic::Request::new(proto::GetCapacityRequest::default()))
      .await
      .unwrap_err();
    assert_eq!(status.code(), tonic::Code::Unimplemented);

    let status = controller
      .controller_modify_volume(tonic::Request::new(
        proto::ControllerModifyVolumeRequest::default(),
      ))
      .await
      .unwrap_err();
    assert_eq!(status.code(), tonic::Code::Unimplemented);

    let status = controller
      .delete_volume(tonic::Request::new(proto::DeleteVolumeRequest {
        volume_id: "r006-1".into(),
        ..Default::default()
      }))
      .await
      .unwrap_err();
    assert_eq!(status.code(), tonic::Code::Unimplemented);
  }

  #[tokio::test]
  async fn invalid_request_never_reaches_service() {
    let controller = Controller(Arc::new(ReadOnly));

    let status = controller
      .validate_volume_capabilities(tonic::Request::new(
        proto::ValidateVolumeCapabilitiesRequest {
          volume_id: "r006-1".into(),
          ..Default::default()
        },
      ))
      .await
      .unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
  }
}
