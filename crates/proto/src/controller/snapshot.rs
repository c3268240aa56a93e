use crate::proto;
use std::time::{SystemTime, UNIX_EPOCH};

/// A point-in-time copy of a volume as reported to the CO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
  size_bytes: u64,
  snapshot_id: String,
  source_volume_id: String,
  creation_time: Option<SystemTime>,
  ready_to_use: bool,
}

impl Snapshot {
  pub fn new(
    snapshot_id: impl Into<String>,
    source_volume_id: impl Into<String>,
    size_bytes: u64,
  ) -> Self {
    Snapshot {
      size_bytes,
      snapshot_id: snapshot_id.into(),
      source_volume_id: source_volume_id.into(),
      creation_time: None,
      ready_to_use: false,
    }
  }

  pub fn with_creation_time(mut self, creation_time: Option<SystemTime>) -> Self {
    self.creation_time = creation_time;
    self
  }

  pub fn with_ready_to_use(mut self, ready_to_use: bool) -> Self {
    self.ready_to_use = ready_to_use;
    self
  }

  #[inline]
  pub fn snapshot_id(&self) -> &str {
    &self.snapshot_id
  }

  #[inline]
  pub fn source_volume_id(&self) -> &str {
    &self.source_volume_id
  }

  #[inline]
  pub fn size_bytes(&self) -> u64 {
    self.size_bytes
  }

  #[inline]
  pub fn ready_to_use(&self) -> bool {
    self.ready_to_use
  }
}

fn timestamp(time: SystemTime) -> prost_types::Timestamp {
  match time.duration_since(UNIX_EPOCH) {
    Ok(d) => prost_types::Timestamp {
      seconds: d.as_secs() as i64,
      nanos: d.subsec_nanos() as i32,
    },
    Err(_) => prost_types::Timestamp::default(),
  }
}

impl From<Snapshot> for proto::Snapshot {
  fn from(value: Snapshot) -> Self {
    proto::Snapshot {
      size_bytes: value.size_bytes as i64,
      snapshot_id: value.snapshot_id,
      source_volume_id: value.source_volume_id,
      creation_time: value.creation_time.map(timestamp),
      ready_to_use: value.ready_to_use,
      group_snapshot_id: String::new(),
    }
  }
}

impl From<Snapshot> for proto::CreateSnapshotResponse {
  #[inline]
  fn from(value: Snapshot) -> Self {
    proto::CreateSnapshotResponse {
      snapshot: Some(value.into()),
    }
  }
}

impl From<Snapshot> for proto::list_snapshots_response::Entry {
  #[inline]
  fn from(value: Snapshot) -> Self {
    proto::list_snapshots_response::Entry {
      snapshot: Some(value.into()),
    }
  }
}
