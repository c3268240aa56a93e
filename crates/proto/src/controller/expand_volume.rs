use crate::{
  proto,
  secrets::Secrets,
  utils::required,
  volume::{CapacityRange, VolumeCapability},
};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
};

#[derive(Debug)]
pub struct ControllerExpandVolumeRequest {
  volume_id: String,
  capacity_range: CapacityRange,
  secrets: Secrets,
  volume_capability: Option<VolumeCapability>,
}

impl ControllerExpandVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// The requested new size. At least one bound is set.
  #[inline]
  pub fn capacity_range(&self) -> CapacityRange {
    self.capacity_range
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }

  #[inline]
  pub fn volume_capability(&self) -> Option<&VolumeCapability> {
    self.volume_capability.as_ref()
  }
}

impl TryFrom<proto::ControllerExpandVolumeRequest> for ControllerExpandVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ControllerExpandVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = required(value.volume_id, "ControllerExpandVolumeRequest.volume_id")?;

    let capacity_range: Option<CapacityRange> = match value.capacity_range {
      None => None,
      Some(v) => v.try_into()?,
    };
    let capacity_range = capacity_range.ok_or_else(|| {
      tonic::Status::invalid_argument("ControllerExpandVolumeRequest.capacity_range missing")
    })?;

    let volume_capability = value.volume_capability.map(TryInto::try_into).transpose()?;

    Ok(ControllerExpandVolumeRequest {
      volume_id,
      capacity_range,
      secrets: value.secrets.into(),
      volume_capability,
    })
  }
}

#[derive(Debug)]
pub struct ControllerExpandVolumeResponse {
  capacity_bytes: u64,
  node_expansion_required: bool,
}

impl ControllerExpandVolumeResponse {
  pub fn new(capacity_bytes: u64, node_expansion_required: bool) -> Self {
    ControllerExpandVolumeResponse {
      capacity_bytes,
      node_expansion_required,
    }
  }

  #[inline]
  pub fn capacity_bytes(&self) -> u64 {
    self.capacity_bytes
  }

  #[inline]
  pub fn node_expansion_required(&self) -> bool {
    self.node_expansion_required
  }
}

impl From<ControllerExpandVolumeResponse> for proto::ControllerExpandVolumeResponse {
  fn from(value: ControllerExpandVolumeResponse) -> Self {
    proto::ControllerExpandVolumeResponse {
      capacity_bytes: value.capacity_bytes as i64,
      node_expansion_required: value.node_expansion_required,
    }
  }
}
