use crate::{
  proto,
  utils::{required, required_path},
};
use std::{
  convert::TryFrom,
  path::{Path, PathBuf},
};

#[derive(Debug)]
pub struct NodeUnpublishVolumeRequest {
  volume_id: String,
  target_path: PathBuf,
}

impl NodeUnpublishVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  #[inline]
  pub fn target_path(&self) -> &Path {
    &self.target_path
  }
}

impl TryFrom<proto::NodeUnpublishVolumeRequest> for NodeUnpublishVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodeUnpublishVolumeRequest) -> Result<Self, Self::Error> {
    Ok(NodeUnpublishVolumeRequest {
      volume_id: required(value.volume_id, "NodeUnpublishVolumeRequest.volume_id")?,
      target_path: required_path(value.target_path, "NodeUnpublishVolumeRequest.target_path")?,
    })
  }
}
