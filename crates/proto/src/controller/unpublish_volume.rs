use crate::{proto, secrets::Secrets, utils::required};
use std::{collections::HashMap, convert::TryFrom};

#[derive(Debug)]
pub struct ControllerUnpublishVolumeRequest {
  volume_id: String,
  node_id: String,
  secrets: Secrets,
}

impl ControllerUnpublishVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// Instance the volume is detached from. Detaching from every node at
  /// once is not supported, so this is always set.
  #[inline]
  pub fn node_id(&self) -> &str {
    &self.node_id
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }
}

impl TryFrom<proto::ControllerUnpublishVolumeRequest> for ControllerUnpublishVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ControllerUnpublishVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = required(value.volume_id, "ControllerUnpublishVolumeRequest.volume_id")?;
    let node_id = required(value.node_id, "ControllerUnpublishVolumeRequest.node_id")?;

    Ok(ControllerUnpublishVolumeRequest {
      volume_id,
      node_id,
      secrets: value.secrets.into(),
    })
  }
}
