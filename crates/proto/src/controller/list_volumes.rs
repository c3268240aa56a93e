use crate::{
  proto,
  utils::{max_entries, optional},
  volume::Volume,
};
use std::convert::TryFrom;

#[derive(Debug)]
pub struct ListVolumesRequest {
  max_entries: Option<u32>,
  starting_token: Option<String>,
}

impl ListVolumesRequest {
  pub fn new(max_entries: Option<u32>, starting_token: Option<String>) -> Self {
    ListVolumesRequest {
      max_entries,
      starting_token,
    }
  }

  /// Page size asked for by the CO. `None` means no restriction.
  #[inline]
  pub fn max_entries(&self) -> Option<u32> {
    self.max_entries
  }

  /// `next_token` of a previous `ListVolumes` call.
  #[inline]
  pub fn starting_token(&self) -> Option<&str> {
    self.starting_token.as_deref()
  }
}

impl TryFrom<proto::ListVolumesRequest> for ListVolumesRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ListVolumesRequest) -> Result<Self, Self::Error> {
    Ok(ListVolumesRequest {
      max_entries: max_entries(value.max_entries, "ListVolumesRequest.max_entries")?,
      starting_token: optional(value.starting_token),
    })
  }
}

#[derive(Debug)]
pub struct VolumeListEntry {
  volume: Volume,
  published_node_ids: Vec<String>,
}

impl VolumeListEntry {
  pub fn new(volume: Volume) -> Self {
    VolumeListEntry {
      volume,
      published_node_ids: Vec::new(),
    }
  }

  pub fn with_published_nodes(mut self, node_ids: Vec<String>) -> Self {
    self.published_node_ids = node_ids;
    self
  }

  #[inline]
  pub fn volume(&self) -> &Volume {
    &self.volume
  }
}

impl From<VolumeListEntry> for proto::list_volumes_response::Entry {
  fn from(value: VolumeListEntry) -> Self {
    let status = if value.published_node_ids.is_empty() {
      None
    } else {
      Some(proto::list_volumes_response::VolumeStatus {
        published_node_ids: value.published_node_ids,
        volume_condition: None,
      })
    };

    proto::list_volumes_response::Entry {
      volume: Some(value.volume.into()),
      status,
    }
  }
}

#[derive(Debug)]
pub struct ListVolumesResponse {
  entries: Vec<VolumeListEntry>,
  next_token: Option<String>,
}

impl ListVolumesResponse {
  pub fn new(entries: Vec<VolumeListEntry>, next_token: Option<String>) -> Self {
    ListVolumesResponse {
      entries,
      next_token,
    }
  }

  #[inline]
  pub fn entries(&self) -> &[VolumeListEntry] {
    &self.entries
  }

  #[inline]
  pub fn next_token(&self) -> Option<&str> {
    self.next_token.as_deref()
  }
}

impl From<ListVolumesResponse> for proto::ListVolumesResponse {
  fn from(value: ListVolumesResponse) -> Self {
    proto::ListVolumesResponse {
      entries: value.entries.into_iter().map(Into::into).collect(),
      next_token: value.next_token.unwrap_or_default(),
    }
  }
}
