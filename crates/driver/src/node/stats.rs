use crate::driver::Driver;
use std::path::Path;
use vpc_block_provider::{messages::*, UserError};
use vpc_csi_mount_utils::PathState;
use vpc_csi_proto::node::{NodeGetVolumeStatsResponse, VolumeUsage};

impl Driver {
  pub(super) async fn volume_stats(&self, path: &Path) -> Result<NodeGetVolumeStatsResponse, UserError> {
    let state = self
      .mounter
      .path_state(path)
      .await
      .map_err(|e| FS_STATS_FAILED.error(&[&path.display()]).with_backend_error(e))?;
    if state == PathState::NotExists {
      return Err(VOLUME_PATH_NOT_FOUND.error(&[&path.display()]));
    }

    let block = self
      .mounter
      .is_block_device(path)
      .await
      .map_err(|e| FS_STATS_FAILED.error(&[&path.display()]).with_backend_error(e))?;

    if block {
      let device = self
        .backing_device(path)
        .await
        .map_err(|e| BLOCK_SIZE_FAILED.error(&[&path.display()]).with_backend_error(e))?
        .unwrap_or_else(|| path.to_owned());
      let size = self.device_size(&device).await?;
      return Ok(NodeGetVolumeStatsResponse::new(vec![VolumeUsage::bytes(
        size, None, None,
      )]));
    }

    let stats = self
      .mounter
      .fs_stats(path)
      .await
      .map_err(|e| FS_STATS_FAILED.error(&[&path.display()]).with_backend_error(e))?;

    Ok(NodeGetVolumeStatsResponse::new(vec![
      VolumeUsage::bytes(
        stats.total_bytes,
        Some(stats.available_bytes),
        Some(stats.used_bytes),
      ),
      VolumeUsage::inodes(stats.total_inodes, stats.free_inodes, stats.used_inodes),
    ]))
  }
}

#[cfg(test)]
mod tests {
  use crate::testing::*;
  use std::{convert::TryFrom, path::Path};
  use tonic::Code;
  use vpc_csi_mount_utils::{DiskFormat, FsStats, MounterImpl};
  use vpc_csi_proto::{node::*, proto, NodeService};

  const TARGET: &str = "/var/lib/kubelet/pods/p1/volumes/pv-1/mount";

  fn stats_request(path: &str) -> NodeGetVolumeStatsRequest {
    NodeGetVolumeStatsRequest::try_from(proto::NodeGetVolumeStatsRequest {
      volume_id: "r006-0001".into(),
      volume_path: path.into(),
      ..Default::default()
    })
    .unwrap()
  }

  #[tokio::test]
  async fn filesystem_reports_bytes_and_inodes() {
    let h = harness();
    h.mounter.add_path(TARGET);
    h.mounter.set_fs_stats(
      TARGET,
      FsStats {
        total_bytes: 1000,
        available_bytes: 600,
        used_bytes: 400,
        total_inodes: 100,
        free_inodes: 90,
        used_inodes: 10,
      },
    );

    let response = h.driver.node_get_volume_stats(stats_request(TARGET)).await.unwrap();
    assert_eq!(
      response.usage(),
      &[
        VolumeUsage::bytes(1000, Some(600), Some(400)),
        VolumeUsage::inodes(100, 90, 10),
      ]
    );
  }

  #[tokio::test]
  async fn block_reports_device_size() {
    let h = harness();
    let device = "/dev/disk/by-id/virtio-r006-0001";
    let target = "/var/lib/kubelet/plugins/volumeDevices/publish/pv-1/p1";
    h.mounter.add_device(device, DiskFormat::Unformatted, 10 << 30);
    h.mounter.make_file(Path::new(target)).unwrap();
    h.mounter
      .mount(Path::new(device), Path::new(target), "", &["bind".into()])
      .unwrap();

    let response = h.driver.node_get_volume_stats(stats_request(target)).await.unwrap();
    assert_eq!(response.usage(), &[VolumeUsage::bytes(10 << 30, None, None)]);
  }

  #[tokio::test]
  async fn missing_path_is_not_found() {
    let h = harness();
    let status = h
      .driver
      .node_get_volume_stats(stats_request(TARGET))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
  }
}
