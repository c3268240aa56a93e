use crate::{proto, secrets::Secrets, utils::required};
use std::{collections::HashMap, convert::TryFrom};

#[derive(Debug)]
pub struct CreateSnapshotRequest {
  source_volume_id: String,
  name: String,
  secrets: Secrets,
  parameters: HashMap<String, String>,
}

impl CreateSnapshotRequest {
  /// The ID of the source volume to be snapshotted.
  #[inline]
  pub fn source_volume_id(&self) -> &str {
    &self.source_volume_id
  }

  /// The suggested name for the snapshot, used for idempotency.
  #[inline]
  pub fn name(&self) -> &str {
    &self.name
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }

  #[inline]
  pub fn parameters(&self) -> &HashMap<String, String> {
    &self.parameters
  }
}

impl TryFrom<proto::CreateSnapshotRequest> for CreateSnapshotRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::CreateSnapshotRequest) -> Result<Self, Self::Error> {
    let source_volume_id = required(
      value.source_volume_id,
      "CreateSnapshotRequest.source_volume_id",
    )?;
    let name = required(value.name, "CreateSnapshotRequest.name")?;

    Ok(CreateSnapshotRequest {
      source_volume_id,
      name,
      secrets: value.secrets.into(),
      parameters: value.parameters,
    })
  }
}
