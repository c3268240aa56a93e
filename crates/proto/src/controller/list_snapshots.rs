use super::Snapshot;
use crate::{
  proto,
  secrets::Secrets,
  utils::{max_entries, optional},
};
use std::{collections::HashMap, convert::TryFrom};

#[derive(Debug)]
pub struct ListSnapshotsRequest {
  max_entries: Option<u32>,
  starting_token: Option<String>,
  source_volume_id: Option<String>,
  snapshot_id: Option<String>,
  secrets: Secrets,
}

impl ListSnapshotsRequest {
  pub fn new(
    max_entries: Option<u32>,
    starting_token: Option<String>,
    source_volume_id: Option<String>,
    snapshot_id: Option<String>,
  ) -> Self {
    ListSnapshotsRequest {
      max_entries,
      starting_token,
      source_volume_id,
      snapshot_id,
      secrets: Secrets::default(),
    }
  }

  #[inline]
  pub fn max_entries(&self) -> Option<u32> {
    self.max_entries
  }

  #[inline]
  pub fn starting_token(&self) -> Option<&str> {
    self.starting_token.as_deref()
  }

  /// Restricts the listing to snapshots of one volume.
  #[inline]
  pub fn source_volume_id(&self) -> Option<&str> {
    self.source_volume_id.as_deref()
  }

  /// Restricts the listing to a single snapshot, given by id or CRN.
  #[inline]
  pub fn snapshot_id(&self) -> Option<&str> {
    self.snapshot_id.as_deref()
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }
}

impl TryFrom<proto::ListSnapshotsRequest> for ListSnapshotsRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ListSnapshotsRequest) -> Result<Self, Self::Error> {
    Ok(ListSnapshotsRequest {
      max_entries: max_entries(value.max_entries, "ListSnapshotsRequest.max_entries")?,
      starting_token: optional(value.starting_token),
      source_volume_id: optional(value.source_volume_id),
      snapshot_id: optional(value.snapshot_id),
      secrets: value.secrets.into(),
    })
  }
}

#[derive(Debug, Default)]
pub struct ListSnapshotsResponse {
  entries: Vec<Snapshot>,
  next_token: Option<String>,
}

impl ListSnapshotsResponse {
  pub fn new(entries: Vec<Snapshot>, next_token: Option<String>) -> Self {
    ListSnapshotsResponse {
      entries,
      next_token,
    }
  }

  #[inline]
  pub fn entries(&self) -> &[Snapshot] {
    &self.entries
  }

  #[inline]
  pub fn next_token(&self) -> Option<&str> {
    self.next_token.as_deref()
  }
}

impl From<ListSnapshotsResponse> for proto::ListSnapshotsResponse {
  fn from(value: ListSnapshotsResponse) -> Self {
    proto::ListSnapshotsResponse {
      entries: value.entries.into_iter().map(Into::into).collect(),
      next_token: value.next_token.unwrap_or_default(),
    }
  }
}
