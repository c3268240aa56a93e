use crate::{controller::DEVICE_PATH_KEY, driver::Driver, params};
use std::path::Path;
use tracing::info;
use vpc_block_provider::{messages::*, UserError};
use vpc_csi_proto::node::NodePublishVolumeRequest;

impl Driver {
  pub(super) async fn publish_target(
    &self,
    request: &NodePublishVolumeRequest,
  ) -> Result<(), UserError> {
    let capability = request.volume_capability();
    if !params::is_supported(capability) {
      return Err(UNSUPPORTED_ACCESS_MODE.error(&[&format!("{:?}", capability.access_mode())]));
    }

    let target = request.target_path();
    let mounted = self
      .mounter
      .is_mount_point(target)
      .await
      .map_err(|e| CREATE_MOUNT_TARGET_FAILED.error(&[&target.display()]).with_backend_error(e))?;
    if mounted {
      info!(target = %target.display(), "Volume already published");
      return Ok(());
    }

    let mut options = vec!["bind".to_owned()];
    if request.readonly() {
      options.push("ro".to_owned());
    }

    match capability.mount() {
      Some(mount) => {
        let staging = request
          .staging_target_path()
          .ok_or_else(|| EMPTY_STAGING_PATH.error(&[]))?;
        let fs_type = mount.fs_type().unwrap_or(params::DEFAULT_FS_TYPE);

        self.make_target(target, false).await?;
        self.bind(staging, target, fs_type, options).await?;
      }
      None => {
        let advertised = request
          .publish_context()
          .get(DEVICE_PATH_KEY)
          .filter(|p| !p.is_empty())
          .ok_or_else(|| {
            VOLUME_INVALID_ARGUMENTS
              .error(&[&format!("publish context has no {}", DEVICE_PATH_KEY)])
          })?;
        let device = self
          .find_device_path(Path::new(advertised), request.volume_id())
          .await?;

        // A device can only be bind mounted onto a file.
        self.make_target(target, true).await?;
        self.bind(&device, target, "", options).await?;
      }
    }

    info!(target = %target.display(), readonly = request.readonly(), "Volume published");
    Ok(())
  }

  async fn make_target(&self, target: &Path, file: bool) -> Result<(), UserError> {
    let result = if file {
      match target.parent() {
        Some(parent) => match self.mounter.make_dir(parent).await {
          Ok(()) => self.mounter.make_file(target).await,
          Err(e) => Err(e),
        },
        None => self.mounter.make_file(target).await,
      }
    } else {
      self.mounter.make_dir(target).await
    };

    result.map_err(|e| CREATE_MOUNT_TARGET_FAILED.error(&[&target.display()]).with_backend_error(e))
  }

  async fn bind(
    &self,
    source: &Path,
    target: &Path,
    fs_type: &str,
    options: Vec<String>,
  ) -> Result<(), UserError> {
    self
      .mounter
      .mount(source, target, fs_type, options)
      .await
      .map_err(|e| {
        MOUNT_FAILED
          .error(&[&source.display(), &target.display()])
          .with_backend_error(e)
      })
  }
}
