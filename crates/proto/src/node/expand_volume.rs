use crate::{
  proto,
  secrets::Secrets,
  utils::{optional_path, required, required_path},
  volume::{capacity_range, CapacityRange, VolumeCapability},
};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
  path::{Path, PathBuf},
};

#[derive(Debug)]
pub struct NodeExpandVolumeRequest {
  volume_id: String,
  volume_path: PathBuf,
  capacity_range: Option<CapacityRange>,
  staging_target_path: Option<PathBuf>,
  volume_capability: Option<VolumeCapability>,
  secrets: Secrets,
}

impl NodeExpandVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// Path the volume is published or staged at.
  #[inline]
  pub fn volume_path(&self) -> &Path {
    &self.volume_path
  }

  #[inline]
  pub fn capacity_range(&self) -> Option<CapacityRange> {
    self.capacity_range
  }

  #[inline]
  pub fn staging_target_path(&self) -> Option<&Path> {
    self.staging_target_path.as_deref()
  }

  #[inline]
  pub fn volume_capability(&self) -> Option<&VolumeCapability> {
    self.volume_capability.as_ref()
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }
}

impl TryFrom<proto::NodeExpandVolumeRequest> for NodeExpandVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodeExpandVolumeRequest) -> Result<Self, Self::Error> {
    Ok(NodeExpandVolumeRequest {
      volume_id: required(value.volume_id, "NodeExpandVolumeRequest.volume_id")?,
      volume_path: required_path(value.volume_path, "NodeExpandVolumeRequest.volume_path")?,
      capacity_range: capacity_range(value.capacity_range)?,
      staging_target_path: optional_path(
        value.staging_target_path,
        "NodeExpandVolumeRequest.staging_target_path",
      )?,
      volume_capability: value.volume_capability.map(TryInto::try_into).transpose()?,
      secrets: value.secrets.into(),
    })
  }
}

#[derive(Debug, Default)]
pub struct NodeExpandVolumeResponse {
  capacity_bytes: Option<u64>,
}

impl NodeExpandVolumeResponse {
  pub fn new(capacity_bytes: Option<u64>) -> Self {
    NodeExpandVolumeResponse { capacity_bytes }
  }

  #[inline]
  pub fn capacity_bytes(&self) -> Option<u64> {
    self.capacity_bytes
  }
}

impl From<NodeExpandVolumeResponse> for proto::NodeExpandVolumeResponse {
  fn from(value: NodeExpandVolumeResponse) -> Self {
    proto::NodeExpandVolumeResponse {
      capacity_bytes: value.capacity_bytes.unwrap_or_default() as i64,
    }
  }
}
