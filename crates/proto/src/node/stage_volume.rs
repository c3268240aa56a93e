use crate::{
  proto,
  secrets::Secrets,
  utils::{required, required_path},
  volume::{required_capability, VolumeCapability},
};
use std::{
  collections::HashMap,
  convert::TryFrom,
  path::{Path, PathBuf},
};

#[derive(Debug)]
pub struct NodeStageVolumeRequest {
  volume_id: String,
  publish_context: HashMap<String, String>,
  staging_target_path: PathBuf,
  volume_capability: VolumeCapability,
  secrets: Secrets,
  volume_context: HashMap<String, String>,
}

impl NodeStageVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// Context returned by `ControllerPublishVolume`, carries the device
  /// path the volume was attached at.
  #[inline]
  pub fn publish_context(&self) -> &HashMap<String, String> {
    &self.publish_context
  }

  /// Absolute path the volume is staged at. It may not exist yet.
  #[inline]
  pub fn staging_target_path(&self) -> &Path {
    &self.staging_target_path
  }

  #[inline]
  pub fn volume_capability(&self) -> &VolumeCapability {
    &self.volume_capability
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }

  #[inline]
  pub fn volume_context(&self) -> &HashMap<String, String> {
    &self.volume_context
  }
}

impl TryFrom<proto::NodeStageVolumeRequest> for NodeStageVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodeStageVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = required(value.volume_id, "NodeStageVolumeRequest.volume_id")?;
    let staging_target_path = required_path(
      value.staging_target_path,
      "NodeStageVolumeRequest.staging_target_path",
    )?;
    let volume_capability = required_capability(
      value.volume_capability,
      "NodeStageVolumeRequest.volume_capability",
    )?;

    Ok(NodeStageVolumeRequest {
      volume_id,
      publish_context: value.publish_context,
      staging_target_path,
      volume_capability,
      secrets: value.secrets.into(),
      volume_context: value.volume_context,
    })
  }
}
