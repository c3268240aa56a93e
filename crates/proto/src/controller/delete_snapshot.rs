use crate::{proto, secrets::Secrets, utils::required};
use std::{collections::HashMap, convert::TryFrom};

#[derive(Debug)]
pub struct DeleteSnapshotRequest {
  snapshot_id: String,
  secrets: Secrets,
}

impl DeleteSnapshotRequest {
  /// Either a bare snapshot id or its CRN.
  #[inline]
  pub fn snapshot_id(&self) -> &str {
    &self.snapshot_id
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }
}

impl TryFrom<proto::DeleteSnapshotRequest> for DeleteSnapshotRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::DeleteSnapshotRequest) -> Result<Self, Self::Error> {
    Ok(DeleteSnapshotRequest {
      snapshot_id: required(value.snapshot_id, "DeleteSnapshotRequest.snapshot_id")?,
      secrets: value.secrets.into(),
    })
  }
}
