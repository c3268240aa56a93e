use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
  fmt,
};

use crate::proto;

/// Topology segments, e.g. `topology.kubernetes.io/zone => us-south-1`.
pub type Topology = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeContentSource {
  Snapshot(String),
  Volume(String),
}

impl VolumeContentSource {
  #[inline]
  pub fn snapshot_id(&self) -> Option<&str> {
    match self {
      VolumeContentSource::Snapshot(id) => Some(id),
      VolumeContentSource::Volume(_) => None,
    }
  }
}

impl TryFrom<proto::VolumeContentSource> for Option<VolumeContentSource> {
  type Error = tonic::Status;

  fn try_from(value: proto::VolumeContentSource) -> Result<Self, Self::Error> {
    use proto::volume_content_source::Type;

    #[inline]
    fn non_empty(v: String, error: &'static str) -> Result<String, tonic::Status> {
      if v.is_empty() {
        Err(tonic::Status::invalid_argument(error))
      } else {
        Ok(v)
      }
    }

    Ok(match value.r#type {
      None => None,
      Some(Type::Volume(v)) => Some(VolumeContentSource::Volume(non_empty(
        v.volume_id,
        "VolumeContentSource.volume_id cannot be empty",
      )?)),
      Some(Type::Snapshot(v)) => Some(VolumeContentSource::Snapshot(non_empty(
        v.snapshot_id,
        "VolumeContentSource.snapshot_id cannot be empty",
      )?)),
    })
  }
}

impl From<VolumeContentSource> for proto::VolumeContentSource {
  fn from(value: VolumeContentSource) -> Self {
    use proto::volume_content_source::{SnapshotSource, Type, VolumeSource};

    let r#type = match value {
      VolumeContentSource::Snapshot(snapshot_id) => Type::Snapshot(SnapshotSource { snapshot_id }),
      VolumeContentSource::Volume(volume_id) => Type::Volume(VolumeSource { volume_id }),
    };

    proto::VolumeContentSource {
      r#type: Some(r#type),
    }
  }
}

/// A provisioned volume as reported back to the CO.
#[derive(Debug, Clone)]
pub struct Volume {
  volume_id: String,
  capacity_bytes: u64,
  volume_context: HashMap<String, String>,
  content_source: Option<VolumeContentSource>,
  accessible_topology: Vec<Topology>,
}

impl Volume {
  pub fn new(volume_id: impl Into<String>, capacity_bytes: u64) -> Self {
    Volume {
      volume_id: volume_id.into(),
      capacity_bytes,
      volume_context: HashMap::new(),
      content_source: None,
      accessible_topology: Vec::new(),
    }
  }

  pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.volume_context.insert(key.into(), value.into());
    self
  }

  pub fn with_topology(mut self, topology: Topology) -> Self {
    self.accessible_topology.push(topology);
    self
  }

  pub fn with_content_source(mut self, source: Option<VolumeContentSource>) -> Self {
    self.content_source = source;
    self
  }

  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  #[inline]
  pub fn capacity_bytes(&self) -> u64 {
    self.capacity_bytes
  }

  #[inline]
  pub fn volume_context(&self) -> &HashMap<String, String> {
    &self.volume_context
  }

  #[inline]
  pub fn content_source(&self) -> Option<&VolumeContentSource> {
    self.content_source.as_ref()
  }

  #[inline]
  pub fn accessible_topology(&self) -> &[Topology] {
    &self.accessible_topology
  }
}

impl From<Volume> for proto::Volume {
  fn from(value: Volume) -> Self {
    proto::Volume {
      capacity_bytes: value.capacity_bytes as i64,
      volume_id: value.volume_id,
      volume_context: value.volume_context,
      content_source: value.content_source.map(Into::into),
      accessible_topology: value
        .accessible_topology
        .into_iter()
        .map(|segments| proto::Topology { segments })
        .collect(),
    }
  }
}

impl From<Volume> for proto::CreateVolumeResponse {
  #[inline]
  fn from(value: Volume) -> Self {
    proto::CreateVolumeResponse {
      volume: Some(value.into()),
    }
  }
}

#[derive(Debug, Default, Clone)]
pub struct TopologyRequirement {
  requisite: Vec<Topology>,
  preferred: Vec<Topology>,
}

impl TopologyRequirement {
  #[inline]
  pub fn requisite(&self) -> &[Topology] {
    &self.requisite
  }

  /// Preferred topologies, most preferred first.
  #[inline]
  pub fn preferred(&self) -> &[Topology] {
    &self.preferred
  }
}

impl From<proto::TopologyRequirement> for TopologyRequirement {
  fn from(value: proto::TopologyRequirement) -> Self {
    TopologyRequirement {
      requisite: value.requisite.into_iter().map(|t| t.segments).collect(),
      preferred: value.preferred.into_iter().map(|t| t.segments).collect(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct VolumeCapability {
  access_mode: AccessMode,
  access_type: AccessType,
}

impl VolumeCapability {
  pub fn new(access_mode: AccessMode, access_type: AccessType) -> Self {
    VolumeCapability {
      access_mode,
      access_type,
    }
  }

  #[inline]
  pub fn access_mode(&self) -> AccessMode {
    self.access_mode
  }

  #[inline]
  pub fn access_type(&self) -> &AccessType {
    &self.access_type
  }

  #[inline]
  pub fn is_block(&self) -> bool {
    matches!(self.access_type, AccessType::Block)
  }

  #[inline]
  pub fn mount(&self) -> Option<&MountVolume> {
    match &self.access_type {
      AccessType::Mount(m) => Some(m),
      AccessType::Block => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AccessMode {
  Unknown,
  /// Can only be published once as read/write on a single node, at
  /// any given time.
  SingleNodeWriter,
  /// Can only be published once as readonly on a single node, at
  /// any given time.
  SingleNodeReaderOnly,
  /// Can be published as readonly at multiple nodes simultaneously.
  MultiNodeReaderOnly,
  /// Can be published at multiple nodes simultaneously. Only one of
  /// the node can be used as read/write. The rest will be readonly.
  MultiNodeSingleWriter,
  /// Can be published as read/write at multiple nodes
  /// simultaneously.
  MultiNodeMultiWriter,
  /// Published once as read/write on a single node by a single workload.
  SingleNodeSingleWriter,
  /// Published as read/write on a single node by many workloads.
  SingleNodeMultiWriter,
}

impl From<proto::volume_capability::AccessMode> for AccessMode {
  fn from(value: proto::volume_capability::AccessMode) -> Self {
    use proto::volume_capability::access_mode::Mode;

    match Mode::from_i32(value.mode) {
      Some(Mode::SingleNodeWriter) => AccessMode::SingleNodeWriter,
      Some(Mode::SingleNodeReaderOnly) => AccessMode::SingleNodeReaderOnly,
      Some(Mode::MultiNodeReaderOnly) => AccessMode::MultiNodeReaderOnly,
      Some(Mode::MultiNodeSingleWriter) => AccessMode::MultiNodeSingleWriter,
      Some(Mode::MultiNodeMultiWriter) => AccessMode::MultiNodeMultiWriter,
      Some(Mode::SingleNodeSingleWriter) => AccessMode::SingleNodeSingleWriter,
      Some(Mode::SingleNodeMultiWriter) => AccessMode::SingleNodeMultiWriter,
      Some(Mode::Unknown) | None => AccessMode::Unknown,
    }
  }
}

impl From<AccessMode> for proto::volume_capability::AccessMode {
  fn from(value: AccessMode) -> Self {
    use proto::volume_capability::access_mode::Mode;

    let mode = match value {
      AccessMode::Unknown => Mode::Unknown,
      AccessMode::SingleNodeWriter => Mode::SingleNodeWriter,
      AccessMode::SingleNodeReaderOnly => Mode::SingleNodeReaderOnly,
      AccessMode::MultiNodeReaderOnly => Mode::MultiNodeReaderOnly,
      AccessMode::MultiNodeSingleWriter => Mode::MultiNodeSingleWriter,
      AccessMode::MultiNodeMultiWriter => Mode::MultiNodeMultiWriter,
      AccessMode::SingleNodeSingleWriter => Mode::SingleNodeSingleWriter,
      AccessMode::SingleNodeMultiWriter => Mode::SingleNodeMultiWriter,
    };

    proto::volume_capability::AccessMode { mode: mode as i32 }
  }
}

#[derive(Debug, Clone)]
pub enum AccessType {
  /// Indicate that the volume will be accessed via the block device API.
  Block,

  /// Indicate that the volume will be accessed via the filesystem API.
  Mount(MountVolume),
}

impl From<proto::volume_capability::AccessType> for AccessType {
  fn from(value: proto::volume_capability::AccessType) -> Self {
    match value {
      proto::volume_capability::AccessType::Block(_) => AccessType::Block,
      proto::volume_capability::AccessType::Mount(v) => AccessType::Mount(v.into()),
    }
  }
}

impl From<AccessType> for proto::volume_capability::AccessType {
  fn from(value: AccessType) -> Self {
    match value {
      AccessType::Block => {
        proto::volume_capability::AccessType::Block(proto::volume_capability::BlockVolume {})
      }
      AccessType::Mount(v) => proto::volume_capability::AccessType::Mount(v.into()),
    }
  }
}

#[derive(Clone, Default)]
pub struct MountVolume {
  fs_type: Option<String>,
  mount_flags: Vec<String>,
}

impl MountVolume {
  pub fn new(fs_type: Option<String>, mount_flags: Vec<String>) -> Self {
    MountVolume {
      fs_type: fs_type.filter(|v| !v.is_empty()),
      mount_flags,
    }
  }

  /// The filesystem type, if the CO asked for one.
  #[inline]
  pub fn fs_type(&self) -> Option<&str> {
    self.fs_type.as_deref()
  }

  /// The mount options that can be used for the volume. `mount_flags`
  /// MAY contain sensitive information and is never logged.
  #[inline]
  pub fn mount_flags(&self) -> &[String] {
    &self.mount_flags
  }
}

impl From<proto::volume_capability::MountVolume> for MountVolume {
  fn from(value: proto::volume_capability::MountVolume) -> Self {
    MountVolume::new(Some(value.fs_type), value.mount_flags)
  }
}

impl From<MountVolume> for proto::volume_capability::MountVolume {
  fn from(value: MountVolume) -> Self {
    proto::volume_capability::MountVolume {
      fs_type: value.fs_type.unwrap_or_default(),
      mount_flags: value.mount_flags,
      volume_mount_group: String::new(),
    }
  }
}

impl fmt::Debug for MountVolume {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MountVolume")
      .field("fs_type", &self.fs_type)
      .field(
        "mount_flags",
        &format!("REDACTED ({} items)", self.mount_flags.len()),
      )
      .finish()
  }
}

impl TryFrom<proto::VolumeCapability> for VolumeCapability {
  type Error = tonic::Status;

  fn try_from(value: proto::VolumeCapability) -> Result<Self, Self::Error> {
    let access_mode = value
      .access_mode
      .ok_or_else(|| tonic::Status::invalid_argument("VolumeCapability.access_mode is missing"))?
      .into();

    let access_type = value
      .access_type
      .ok_or_else(|| tonic::Status::invalid_argument("VolumeCapability.access_type is missing"))?
      .into();

    Ok(VolumeCapability {
      access_mode,
      access_type,
    })
  }
}

impl From<VolumeCapability> for proto::VolumeCapability {
  fn from(value: VolumeCapability) -> Self {
    proto::VolumeCapability {
      access_mode: Some(value.access_mode.into()),
      access_type: Some(value.access_type.into()),
    }
  }
}

pub(crate) fn volume_capabilities(
  value: Vec<proto::VolumeCapability>,
  field: &'static str,
) -> Result<Vec<VolumeCapability>, tonic::Status> {
  if value.is_empty() {
    return Err(tonic::Status::invalid_argument(format!(
      "{} is empty",
      field
    )));
  }

  value.into_iter().map(TryInto::try_into).collect()
}

pub(crate) fn required_capability(
  value: Option<proto::VolumeCapability>,
  field: &'static str,
) -> Result<VolumeCapability, tonic::Status> {
  value
    .ok_or_else(|| tonic::Status::invalid_argument(format!("{} is missing", field)))?
    .try_into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeUsageUnit {
  Bytes,
  Inodes,
}

impl From<VolumeUsageUnit> for proto::volume_usage::Unit {
  fn from(value: VolumeUsageUnit) -> Self {
    match value {
      VolumeUsageUnit::Bytes => proto::volume_usage::Unit::Bytes,
      VolumeUsageUnit::Inodes => proto::volume_usage::Unit::Inodes,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeUsage {
  available: Option<u64>,
  total: u64,
  used: Option<u64>,
  unit: VolumeUsageUnit,
}

impl VolumeUsage {
  pub fn bytes(total: u64, available: Option<u64>, used: Option<u64>) -> Self {
    VolumeUsage {
      available,
      total,
      used,
      unit: VolumeUsageUnit::Bytes,
    }
  }

  pub fn inodes(total: u64, available: u64, used: u64) -> Self {
    VolumeUsage {
      available: Some(available),
      total,
      used: Some(used),
      unit: VolumeUsageUnit::Inodes,
    }
  }

  #[inline]
  pub fn total(&self) -> u64 {
    self.total
  }

  #[inline]
  pub fn unit(&self) -> VolumeUsageUnit {
    self.unit
  }
}

impl From<VolumeUsage> for proto::VolumeUsage {
  fn from(value: VolumeUsage) -> Self {
    proto::VolumeUsage {
      available: value.available.unwrap_or_default() as i64,
      total: value.total as i64,
      used: value.used.unwrap_or_default() as i64,
      unit: proto::volume_usage::Unit::from(value.unit) as i32,
    }
  }
}

/// Capacity bounds for a create or expand request. At least one of the two
/// bounds is set; a request with neither is represented as `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityRange {
  required: Option<u64>,
  limit: Option<u64>,
}

impl CapacityRange {
  /// Volume MUST be at least this big.
  #[inline]
  pub fn required(&self) -> Option<u64> {
    self.required
  }

  /// Volume MUST not be bigger than this.
  #[inline]
  pub fn limit(&self) -> Option<u64> {
    self.limit
  }
}

impl TryFrom<proto::CapacityRange> for Option<CapacityRange> {
  type Error = tonic::Status;

  fn try_from(value: proto::CapacityRange) -> Result<Self, Self::Error> {
    #[inline]
    fn bound(v: i64) -> Option<u64> {
      if v == 0 {
        None
      } else {
        Some(v as u64)
      }
    }

    if value.required_bytes < 0 {
      return Err(tonic::Status::invalid_argument(
        "CapacityRange.required_bytes cannot be negative",
      ));
    }

    if value.limit_bytes < 0 {
      return Err(tonic::Status::invalid_argument(
        "CapacityRange.limit_bytes cannot be negative",
      ));
    }

    let required = bound(value.required_bytes);
    let limit = bound(value.limit_bytes);
    Ok(match (required, limit) {
      (None, None) => None,
      (required, limit) => Some(CapacityRange { required, limit }),
    })
  }
}

pub(crate) fn capacity_range(
  value: Option<proto::CapacityRange>,
) -> Result<Option<CapacityRange>, tonic::Status> {
  match value {
    None => Ok(None),
    Some(v) => v.try_into(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  fn range(required_bytes: i64, limit_bytes: i64) -> Result<Option<CapacityRange>, tonic::Status> {
    proto::CapacityRange {
      required_bytes,
      limit_bytes,
    }
    .try_into()
  }

  #[test_case(0, 0, None, None ; "empty range")]
  #[test_case(10, 0, Some(10), None ; "at least")]
  #[test_case(0, 20, None, Some(20) ; "at most")]
  #[test_case(10, 20, Some(10), Some(20) ; "between")]
  fn capacity_range_bounds(r: i64, l: i64, required: Option<u64>, limit: Option<u64>) {
    let parsed = range(r, l).unwrap();
    assert_eq!(parsed.and_then(|c| c.required()), required);
    assert_eq!(parsed.and_then(|c| c.limit()), limit);
    assert_eq!(parsed.is_none(), required.is_none() && limit.is_none());
  }

  #[test_case(-1, 0)]
  #[test_case(0, -1)]
  fn capacity_range_rejects_negative(r: i64, l: i64) {
    assert_eq!(range(r, l).unwrap_err().code(), tonic::Code::InvalidArgument);
  }

  #[test]
  fn capability_requires_access_mode() {
    let cap = proto::VolumeCapability {
      access_mode: None,
      access_type: Some(proto::volume_capability::AccessType::Block(
        proto::volume_capability::BlockVolume {},
      )),
    };

    let err = VolumeCapability::try_from(cap).unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);
  }

  #[test]
  fn mount_flags_are_redacted() {
    let mount = MountVolume::new(Some("xfs".into()), vec!["password=hunter2".into()]);
    let rendered = format!("{:?}", mount);
    assert!(!rendered.contains("hunter2"));
    assert!(rendered.contains("xfs"));
  }

  #[test]
  fn empty_fs_type_is_none() {
    let mount: MountVolume = proto::volume_capability::MountVolume::default().into();
    assert_eq!(mount.fs_type(), None);
  }

  #[test]
  fn empty_snapshot_source_is_rejected() {
    let source = proto::VolumeContentSource {
      r#type: Some(proto::volume_content_source::Type::Snapshot(
        proto::volume_content_source::SnapshotSource {
          snapshot_id: String::new(),
        },
      )),
    };

    let parsed: Result<Option<VolumeContentSource>, _> = source.try_into();
    assert!(parsed.is_err());
  }
}
