use crate::{
  proto,
  secrets::Secrets,
  utils::{optional_path, required, required_path},
  volume::{required_capability, VolumeCapability},
};
use std::{
  collections::HashMap,
  convert::TryFrom,
  path::{Path, PathBuf},
};

#[derive(Debug)]
pub struct NodePublishVolumeRequest {
  volume_id: String,
  publish_context: HashMap<String, String>,
  staging_target_path: Option<PathBuf>,
  target_path: PathBuf,
  volume_capability: VolumeCapability,
  readonly: bool,
  secrets: Secrets,
  volume_context: HashMap<String, String>,
}

impl NodePublishVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  #[inline]
  pub fn publish_context(&self) -> &HashMap<String, String> {
    &self.publish_context
  }

  /// Set whenever the plugin advertises `STAGE_UNSTAGE_VOLUME`.
  #[inline]
  pub fn staging_target_path(&self) -> Option<&Path> {
    self.staging_target_path.as_deref()
  }

  /// Path the volume is published at. For block volumes this is a file,
  /// for mount volumes a directory.
  #[inline]
  pub fn target_path(&self) -> &Path {
    &self.target_path
  }

  #[inline]
  pub fn volume_capability(&self) -> &VolumeCapability {
    &self.volume_capability
  }

  #[inline]
  pub fn readonly(&self) -> bool {
    self.readonly
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

impl TryFrom<proto::NodePublishVolumeRequest> for NodePublishVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodePublishVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = required(value.volume_id, "NodePublishVolumeRequest.volume_id")?;
    let staging_target_path = optional_path(
      value.staging_target_path,
      "NodePublishVolumeRequest.staging_target_path",
    )?;
    let target_path = required_path(
      value.target_path,
      "NodePublishVolumeRequest.target_path",
    )?;
    let volume_capability = required_capability(
      value.volume_capability,
      "NodePublishVolumeRequest.volume_capability",
    )?;

    Ok(NodePublishVolumeRequest {
      volume_id,
      publish_context: value.publish_context,
      staging_target_path,
      target_path,
      volume_capability,
      readonly: value.readonly,
      secrets: value.secrets.into(),
      volume_context: value.volume_context,
    })
  }
}
