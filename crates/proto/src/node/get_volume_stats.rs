use crate::{
  proto,
  utils::{optional_path, required, required_path},
  volume::VolumeUsage,
};
use std::{
  convert::TryFrom,
  path::{Path, PathBuf},
};

#[derive(Debug)]
pub struct NodeGetVolumeStatsRequest {
  volume_id: String,
  volume_path: PathBuf,
  staging_target_path: Option<PathBuf>,
}

impl NodeGetVolumeStatsRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// Any path the volume is published or staged at.
  #[inline]
  pub fn volume_path(&self) -> &Path {
    &self.volume_path
  }

  #[inline]
  pub fn staging_target_path(&self) -> Option<&Path> {
    self.staging_target_path.as_deref()
  }
}

impl TryFrom<proto::NodeGetVolumeStatsRequest> for NodeGetVolumeStatsRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodeGetVolumeStatsRequest) -> Result<Self, Self::Error> {
    Ok(NodeGetVolumeStatsRequest {
      volume_id: required(value.volume_id, "NodeGetVolumeStatsRequest.volume_id")?,
      volume_path: required_path(value.volume_path, "NodeGetVolumeStatsRequest.volume_path")?,
      staging_target_path: optional_path(
        value.staging_target_path,
        "NodeGetVolumeStatsRequest.staging_target_path",
      )?,
    })
  }
}

#[derive(Debug)]
pub struct NodeGetVolumeStatsResponse {
  usage: Vec<VolumeUsage>,
}

impl NodeGetVolumeStatsResponse {
  pub fn new(usage: Vec<VolumeUsage>) -> Self {
    NodeGetVolumeStatsResponse { usage }
  }

  #[inline]
  pub fn usage(&self) -> &[VolumeUsage] {
    &self.usage
  }
}

impl From<NodeGetVolumeStatsResponse> for proto::NodeGetVolumeStatsResponse {
  fn from(value: NodeGetVolumeStatsResponse) -> Self {
    proto::NodeGetVolumeStatsResponse {
      usage: value.usage.into_iter().map(Into::into).collect(),
      volume_condition: None,
    }
  }
}
