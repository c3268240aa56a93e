use crate::{proto, secrets::Secrets, utils::required, volume::VolumeCapability};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
};

#[derive(Debug)]
pub struct ControllerPublishVolumeRequest {
  volume_id: String,
  node_id: String,
  volume_capability: VolumeCapability,
  readonly: bool,
  secrets: Secrets,
  volume_context: HashMap<String, String>,
}

impl ControllerPublishVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// Matches the node id returned by `NodeGetInfo`, which for this plugin
  /// is the compute instance id.
  #[inline]
  pub fn node_id(&self) -> &str {
    &self.node_id
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

impl TryFrom<proto::ControllerPublishVolumeRequest> for ControllerPublishVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ControllerPublishVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = required(value.volume_id, "ControllerPublishVolumeRequest.volume_id")?;
    let node_id = required(value.node_id, "ControllerPublishVolumeRequest.node_id")?;
    let volume_capability = value
      .volume_capability
      .ok_or_else(|| {
        tonic::Status::invalid_argument("ControllerPublishVolumeRequest.volume_capability missing")
      })?
      .try_into()?;

    Ok(ControllerPublishVolumeRequest {
      volume_id,
      node_id,
      volume_capability,
      readonly: value.readonly,
      secrets: value.secrets.into(),
      volume_context: value.volume_context,
    })
  }
}

/// Opaque static publish properties handed to `NodeStageVolume` and
/// `NodePublishVolume`. Must not contain sensitive information.
#[derive(Debug, Default)]
pub struct ControllerPublishVolumeResponse {
  publish_context: HashMap<String, String>,
}

impl ControllerPublishVolumeResponse {
  pub fn new(publish_context: HashMap<String, String>) -> Self {
    ControllerPublishVolumeResponse { publish_context }
  }

  #[inline]
  pub fn publish_context(&self) -> &HashMap<String, String> {
    &self.publish_context
  }
}

impl From<ControllerPublishVolumeResponse> for proto::ControllerPublishVolumeResponse {
  #[inline]
  fn from(value: ControllerPublishVolumeResponse) -> Self {
    proto::ControllerPublishVolumeResponse {
      publish_context: value.publish_context,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn capability_is_required() {
    let err = ControllerPublishVolumeRequest::try_from(proto::ControllerPublishVolumeRequest {
      volume_id: "r006-1".into(),
      node_id: "i-1".into(),
      ..Default::default()
    })
    .unwrap_err();

    assert_eq!(err.code(), tonic::Code::InvalidArgument);
    assert_eq!(
      err.message(),
      "ControllerPublishVolumeRequest.volume_capability missing"
    );
  }
}
