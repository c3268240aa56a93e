use crate::driver::Driver;
use std::path::Path;
use tracing::{debug, info};
use vpc_block_provider::{messages::*, UserError};
use vpc_csi_proto::node::{NodeExpandVolumeRequest, NodeExpandVolumeResponse};

impl Driver {
  pub(super) async fn expand_filesystem(
    &self,
    request: &NodeExpandVolumeRequest,
  ) -> Result<NodeExpandVolumeResponse, UserError> {
    let path = request.volume_path();
    let block = match request.volume_capability() {
      Some(capability) => capability.is_block(),
      None => self.mounter.is_block_device(path).await.unwrap_or(false),
    };

    if block {
      // Raw block volumes have no filesystem, the new size is visible as is.
      let device = self
        .backing_device(path)
        .await
        .map_err(|e| BLOCK_SIZE_FAILED.error(&[&path.display()]).with_backend_error(e))?
        .unwrap_or_else(|| path.to_owned());
      let size = self.device_size(&device).await?;
      debug!(device = %device.display(), size, "Block volume size");
      return Ok(NodeExpandVolumeResponse::new(Some(size)));
    }

    let mounted = self
      .mounter
      .is_mount_point(path)
      .await
      .map_err(|e| VOLUME_PATH_NOT_MOUNTED.error(&[&path.display()]).with_backend_error(e))?;
    let device = if mounted {
      self
        .backing_device(path)
        .await
        .map_err(|e| FILESYSTEM_RESIZE_FAILED.error(&[&path.display()]).with_backend_error(e))?
    } else {
      None
    };
    let device = device.ok_or_else(|| VOLUME_PATH_NOT_MOUNTED.error(&[&path.display()]))?;

    self
      .mounter
      .resize(&device, path)
      .await
      .map_err(|e| FILESYSTEM_RESIZE_FAILED.error(&[&path.display()]).with_backend_error(e))?;

    let size = self.device_size(&device).await?;
    info!(device = %device.display(), size, "Filesystem expanded");
    Ok(NodeExpandVolumeResponse::new(Some(size)))
  }

  pub(super) async fn device_size(&self, device: &Path) -> Result<u64, UserError> {
    self
      .mounter
      .block_size(device)
      .await
      .map_err(|e| BLOCK_SIZE_FAILED.error(&[&device.display()]).with_backend_error(e))
  }
}

#[cfg(test)]
mod tests {
  use crate::testing::*;
  use std::{convert::TryFrom, path::Path};
  use tonic::Code;
  use vpc_csi_mount_utils::{DiskFormat, FakeAction, MounterImpl};
  use vpc_csi_proto::{node::*, proto, NodeService};

  const DEVICE: &str = "/dev/disk/by-id/virtio-r006-0001";
  const STAGING: &str = "/var/lib/kubelet/plugins/staging/pv-1";

  fn expand_request(
    path: &str,
    capability: Option<proto::VolumeCapability>,
  ) -> NodeExpandVolumeRequest {
    NodeExpandVolumeRequest::try_from(proto::NodeExpandVolumeRequest {
      volume_id: "r006-0001".into(),
      volume_path: path.into(),
      volume_capability: capability,
      ..Default::default()
    })
    .unwrap()
  }

  #[tokio::test]
  async fn mounted_filesystem_is_resized() {
    let h = harness();
    h.mounter
      .add_device(DEVICE, DiskFormat::Filesystem("ext4".into()), 20 << 30);
    h.mounter.add_path(STAGING);
    h.mounter
      .mount(Path::new(DEVICE), Path::new(STAGING), "ext4", &[])
      .unwrap();
    h.mounter.reset_log();

    let response = h
      .driver
      .node_expand_volume(expand_request(STAGING, Some(mount_capability("ext4"))))
      .await
      .unwrap();

    assert_eq!(response.capacity_bytes(), Some(20 << 30));
    assert_eq!(
      h.mounter.get_log(),
      vec![FakeAction::Resize {
        device: DEVICE.into()
      }]
    );
  }

  #[tokio::test]
  async fn unmounted_path_is_failed_precondition() {
    let h = harness();
    h.mounter.add_path(STAGING);

    let status = h
      .driver
      .node_expand_volume(expand_request(STAGING, Some(mount_capability("ext4"))))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::FailedPrecondition);

    let status = h
      .driver
      .node_expand_volume(expand_request("/var/lib/kubelet/missing", None))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::FailedPrecondition);
  }

  #[tokio::test]
  async fn block_volume_reports_device_size() {
    let h = harness();
    h.mounter.add_device(DEVICE, DiskFormat::Unformatted, 30 << 30);

    let response = h
      .driver
      .node_expand_volume(expand_request(DEVICE, Some(block_capability())))
      .await
      .unwrap();

    assert_eq!(response.capacity_bytes(), Some(30 << 30));
    assert!(h.mounter.get_log().is_empty());
  }
}
