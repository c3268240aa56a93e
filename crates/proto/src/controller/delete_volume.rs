use crate::{proto, secrets::Secrets, utils::required};
use std::{collections::HashMap, convert::TryFrom};

#[derive(Debug)]
pub struct DeleteVolumeRequest {
  volume_id: String,
  secrets: Secrets,
}

impl DeleteVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }
}

impl TryFrom<proto::DeleteVolumeRequest> for DeleteVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::DeleteVolumeRequest) -> Result<Self, Self::Error> {
    Ok(DeleteVolumeRequest {
      volume_id: required(value.volume_id, "DeleteVolumeRequest.volume_id")?,
      secrets: value.secrets.into(),
    })
  }
}
