use chrono::{DateTime, Utc};
use std::fmt;

pub const GIB: u64 = 1 << 30;

/// Device ids are truncated to this many characters by virtio.
const VIRTIO_SERIAL_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
  pub id: String,
  pub crn: Option<String>,
  pub name: String,
  pub capacity_gib: u64,
  pub iops: Option<i64>,
  pub profile: Option<String>,
  pub zone: String,
  pub region: String,
  pub resource_group_id: Option<String>,
  pub encryption_key_crn: Option<String>,
  pub tags: Vec<String>,
  pub bandwidth: Option<i32>,
  pub status: String,
  pub created_at: Option<DateTime<Utc>>,
  pub source_snapshot_id: Option<String>,
}

impl Volume {
  pub fn capacity_bytes(&self) -> u64 {
    self.capacity_gib * GIB
  }

  pub fn is_available(&self) -> bool {
    self.status == "available"
  }
}

/// Region of a zone name such as `us-south-1`.
pub fn region_of_zone(zone: &str) -> &str {
  match zone.rfind('-') {
    Some(pos) if zone[pos + 1..].chars().all(|c| c.is_ascii_digit()) => &zone[..pos],
    _ => zone,
  }
}

/// Everything needed to create a volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeRequest {
  pub name: String,
  pub capacity_gib: u64,
  pub iops: Option<i64>,
  pub profile: String,
  pub zone: String,
  pub resource_group_id: Option<String>,
  pub encryption_key_crn: Option<String>,
  pub tags: Vec<String>,
  pub bandwidth: Option<i32>,
  pub source_snapshot_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeList {
  pub volumes: Vec<Volume>,
  pub next: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
  pub id: String,
  pub crn: Option<String>,
  pub name: String,
  pub source_volume_id: String,
  pub size_bytes: u64,
  pub ready_to_use: bool,
  pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotList {
  pub snapshots: Vec<Snapshot>,
  pub next: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachStatus {
  Attaching,
  Attached,
  Detaching,
  Detached,
  Other(String),
}

impl From<&str> for AttachStatus {
  fn from(value: &str) -> Self {
    match value {
      "attaching" => AttachStatus::Attaching,
      "attached" => AttachStatus::Attached,
      "detaching" => AttachStatus::Detaching,
      "detached" | "deleted" => AttachStatus::Detached,
      other => AttachStatus::Other(other.to_owned()),
    }
  }
}

impl fmt::Display for AttachStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      AttachStatus::Attaching => "attaching",
      AttachStatus::Attached => "attached",
      AttachStatus::Detaching => "detaching",
      AttachStatus::Detached => "detached",
      AttachStatus::Other(s) => s,
    })
  }
}

/// Identifies an attachment either by its own id or by the (volume,
/// instance) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRequest {
  pub volume_id: String,
  pub instance_id: String,
  pub attachment_id: Option<String>,
}

impl AttachmentRequest {
  pub fn new(volume_id: impl Into<String>, instance_id: impl Into<String>) -> Self {
    AttachmentRequest {
      volume_id: volume_id.into(),
      instance_id: instance_id.into(),
      attachment_id: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeAttachment {
  pub id: String,
  pub volume_id: String,
  pub instance_id: String,
  pub status: AttachStatus,
  pub device_id: Option<String>,
}

impl VolumeAttachment {
  /// Host path of the attached disk. Only stable once attached.
  pub fn device_path(&self) -> Option<String> {
    self.device_id.as_deref().filter(|d| !d.is_empty()).map(|d| {
      let serial: String = d.chars().take(VIRTIO_SERIAL_LEN).collect();
      format!("/dev/disk/by-id/virtio-{}", serial)
    })
  }
}

/// Tags pushed back for an orchestrator volume object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeTagUpdate {
  pub volume_id: String,
  pub tags: Vec<String>,
}
