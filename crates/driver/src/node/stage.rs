use crate::{controller::DEVICE_PATH_KEY, driver::Driver, params};
use std::{
  path::{Path, PathBuf},
  time::Duration,
};
use tokio::fs;
use tracing::{debug, info, warn};
use vpc_block_provider::{messages::*, UserError};
use vpc_csi_mount_utils::PathState;
use vpc_csi_proto::node::NodeStageVolumeRequest;

/// Time udev gets to create the device links after a rescan.
const DEVICE_SETTLE_PERIOD: Duration = Duration::from_secs(20);

impl Driver {
  pub(super) async fn stage_device(&self, request: &NodeStageVolumeRequest) -> Result<(), UserError> {
    let capability = request.volume_capability();
    if !params::is_supported(capability) {
      return Err(UNSUPPORTED_ACCESS_MODE.error(&[&format!("{:?}", capability.access_mode())]));
    }

    let mount = match capability.mount() {
      Some(mount) => mount,
      None => {
        debug!("Raw block volume, nothing to stage");
        return Ok(());
      }
    };

    let staging = request.staging_target_path();
    let advertised = request
      .publish_context()
      .get(DEVICE_PATH_KEY)
      .filter(|p| !p.is_empty())
      .ok_or_else(|| {
        VOLUME_INVALID_ARGUMENTS.error(&[&format!("publish context has no {}", DEVICE_PATH_KEY)])
      })?;
    let device = self
      .find_device_path(Path::new(advertised), request.volume_id())
      .await?;

    self
      .mounter
      .make_dir(staging)
      .await
      .map_err(|e| CREATE_MOUNT_TARGET_FAILED.error(&[&staging.display()]).with_backend_error(e))?;

    let mounted = self
      .backing_device(staging)
      .await
      .map_err(|e| MOUNT_FAILED.error(&[&device.display(), &staging.display()]).with_backend_error(e))?;
    if let Some(mounted) = mounted {
      if same_device(&mounted, &device).await {
        info!(device = %device.display(), "Volume already staged");
        return Ok(());
      }
    }

    let fs_type = mount.fs_type().unwrap_or(params::DEFAULT_FS_TYPE);
    self
      .mounter
      .format_and_mount(&device, staging, fs_type, mount.mount_flags().to_vec())
      .await
      .map_err(|e| {
        FORMAT_AND_MOUNT_FAILED
          .error(&[&device.display(), &staging.display()])
          .with_backend_error(e)
      })?;

    // The volume may have been expanded while it was detached.
    self
      .mounter
      .resize(&device, staging)
      .await
      .map_err(|e| FILESYSTEM_RESIZE_FAILED.error(&[&staging.display()]).with_backend_error(e))?;

    info!(device = %device.display(), %fs_type, "Volume staged");
    Ok(())
  }

  /// Unmount and remove a staging or target path. Missing paths succeed.
  pub(super) async fn release_mount(&self, path: &Path) -> Result<(), UserError> {
    self
      .mounter
      .cleanup_mount_point(path)
      .await
      .map_err(|e| UNMOUNT_FAILED.error(&[&path.display()]).with_backend_error(e))?;

    info!(path = %path.display(), "Mount point released");
    Ok(())
  }

  /// Resolve the device advertised by the controller. A device that is
  /// missing gets one udev rescan before giving up.
  pub(super) async fn find_device_path(
    &self,
    device: &Path,
    volume_id: &str,
  ) -> Result<PathBuf, UserError> {
    if self.device_exists(device, volume_id).await? {
      return Ok(device.to_owned());
    }

    info!(device = %device.display(), "Device not present, rescanning");
    if let Err(e) = self.mounter.rescan().await {
      warn!(error = %e, "udev rescan failed");
    }
    tokio::time::sleep(DEVICE_SETTLE_PERIOD).await;

    if self.device_exists(device, volume_id).await? {
      return Ok(device.to_owned());
    }

    Err(DEVICE_PATH_NOT_FOUND.error(&[&device.display(), &volume_id]))
  }

  async fn device_exists(&self, device: &Path, volume_id: &str) -> Result<bool, UserError> {
    match self.mounter.path_state(device).await {
      Ok(state) => Ok(state == PathState::Exists),
      Err(e) => Err(
        DEVICE_PATH_NOT_FOUND
          .error(&[&device.display(), &volume_id])
          .with_backend_error(e),
      ),
    }
  }
}

/// The mount table lists `/dev/vdX` while the controller advertises a
/// `/dev/disk/by-id` link, so both sides are resolved before comparing.
async fn same_device(a: &Path, b: &Path) -> bool {
  if a == b {
    return true;
  }
  match (fs::canonicalize(a).await, fs::canonicalize(b).await) {
    (Ok(a), Ok(b)) => a == b,
    _ => false,
  }
}
