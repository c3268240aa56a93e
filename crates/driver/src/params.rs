//! Storage class parameters and secrets of a create request.
//!
//! Parsing is total: every key either maps onto [`VolumeParams`], is one of
//! the keys kept for compatibility and ignored, or fails the request.
//! Secrets are applied after the class parameters and win, except for
//! `tags` which accumulate.

use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use vpc_block_provider::{messages::*, region_of_zone, UserError, GIB};
use vpc_csi_proto::controller::{AccessMode, CapacityRange, TopologyRequirement, VolumeCapability};

pub const ZONE_TOPOLOGY_KEY: &str = "topology.kubernetes.io/zone";
pub const REGION_TOPOLOGY_KEY: &str = "topology.kubernetes.io/region";

pub const DEFAULT_PROFILE: &str = "general-purpose";
pub const DEFAULT_FS_TYPE: &str = "ext4";

const CUSTOM_PROFILE: &str = "custom";
const SDP_PROFILE: &str = "sdp";
const PROFILES: &[&str] = &[
  CUSTOM_PROFILE,
  DEFAULT_PROFILE,
  "5iops-tier",
  "10iops-tier",
  SDP_PROFILE,
];
const FS_TYPES: &[&str] = &["ext2", "ext3", "ext4", "xfs"];

const MAX_NAME_LEN: usize = 63;
const MAX_RESOURCE_GROUP_LEN: usize = 32;
const MAX_TAG_LEN: usize = 128;
const MAX_KEY_LEN: usize = 256;

const MIN_CAPACITY_GIB: u64 = 10;
const SDP_MIN_CAPACITY_GIB: u64 = 1;

/// Accepted for older storage classes, no effect.
const IGNORED_KEYS: &[&str] = &["classVersion", "generation", "billingType"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeParams {
  pub profile: String,
  pub zone: Option<String>,
  pub region: Option<String>,
  pub resource_group_id: Option<String>,
  pub tags: Vec<String>,
  pub encryption_key_crn: Option<String>,
  pub iops: Option<i64>,
  pub throughput: Option<i32>,
  encrypted: Option<bool>,
}

impl Default for VolumeParams {
  fn default() -> Self {
    VolumeParams {
      profile: DEFAULT_PROFILE.to_owned(),
      zone: None,
      region: None,
      resource_group_id: None,
      tags: Vec::new(),
      encryption_key_crn: None,
      iops: None,
      throughput: None,
      encrypted: None,
    }
  }
}

fn invalid(message: String) -> UserError {
  INVALID_PARAMETERS.error(&[&message])
}

fn bounded(key: &str, value: &str, max: usize) -> Result<Option<String>, UserError> {
  let value = value.trim();
  if value.chars().count() > max {
    return Err(invalid(format!(
      "{} must be at most {} characters, got {}",
      key,
      max,
      value.chars().count()
    )));
  }

  Ok(if value.is_empty() {
    None
  } else {
    Some(value.to_owned())
  })
}

impl VolumeParams {
  pub fn parse(
    parameters: &HashMap<String, String>,
    secrets: &HashMap<String, String>,
  ) -> Result<Self, UserError> {
    let mut params = VolumeParams::default();

    // Sorted so the first offending key is reported deterministically.
    let parameters: BTreeMap<_, _> = parameters.iter().collect();
    for (key, value) in parameters {
      params.apply(key, value)?;
    }

    let secrets: BTreeMap<_, _> = secrets.iter().collect();
    for (key, value) in secrets {
      params.apply(key, value)?;
    }

    if params.encrypted == Some(false) {
      params.encryption_key_crn = None;
    }

    if params.profile != CUSTOM_PROFILE && params.profile != SDP_PROFILE {
      if let Some(iops) = params.iops.take() {
        debug!(iops, profile = %params.profile, "Dropping iops for a tiered profile");
      }
    }

    Ok(params)
  }

  fn apply(&mut self, key: &str, value: &str) -> Result<(), UserError> {
    match key {
      "profile" => {
        let profile = value.trim();
        if !PROFILES.contains(&profile) {
          return Err(invalid(format!(
            "profile '{}' is not one of {}",
            profile,
            PROFILES.join(", ")
          )));
        }
        self.profile = profile.to_owned();
      }
      "zone" => self.zone = bounded(key, value, MAX_NAME_LEN)?,
      "region" => self.region = bounded(key, value, MAX_NAME_LEN)?,
      "resourceGroup" => {
        let group = bounded(key, value, MAX_RESOURCE_GROUP_LEN)?;
        if let Some(group) = &group {
          if !group.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid(format!(
              "resourceGroup '{}' is not a resource group id",
              group
            )));
          }
        }
        self.resource_group_id = group;
      }
      "tags" => {
        for tag in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
          if tag.chars().count() > MAX_TAG_LEN {
            return Err(invalid(format!(
              "tag '{}' is longer than {} characters",
              tag, MAX_TAG_LEN
            )));
          }
          self.tags.push(tag.to_owned());
        }
      }
      "encrypted" => {
        self.encrypted = Some(match value.trim() {
          "true" => true,
          "false" => false,
          other => {
            return Err(invalid(format!(
              "encrypted must be 'true' or 'false', got '{}'",
              other
            )))
          }
        })
      }
      "encryptionKey" => self.encryption_key_crn = bounded(key, value, MAX_KEY_LEN)?,
      "iops" => {
        self.iops = match value.trim() {
          "" => None,
          v => Some(
            v.parse()
              .map_err(|_| invalid(format!("iops '{}' is not a number", v)))?,
          ),
        }
      }
      "throughput" => {
        self.throughput = match value.trim() {
          "" => None,
          v => Some(
            v.parse()
              .map_err(|_| invalid(format!("throughput '{}' is not a 32 bit integer", v)))?,
          ),
        }
      }
      k if IGNORED_KEYS.contains(&k) => {}
      other => return Err(invalid(format!("unknown parameter '{}'", other))),
    }

    Ok(())
  }

  pub fn is_sdp(&self) -> bool {
    self.profile == SDP_PROFILE
  }
}

fn ceil_gib(bytes: u64) -> u64 {
  bytes / GIB + u64::from(bytes % GIB != 0)
}

/// Capacity in GiB for a requested range. The required bytes are rounded up
/// to whole GiB and clamped to the profile minimum.
pub fn capacity_gib(range: Option<CapacityRange>, profile: &str) -> Result<u64, UserError> {
  let minimum = if profile == SDP_PROFILE {
    SDP_MIN_CAPACITY_GIB
  } else {
    MIN_CAPACITY_GIB
  };

  let range = match range {
    Some(range) => range,
    None => return Ok(minimum),
  };

  if let (Some(required), Some(limit)) = (range.required(), range.limit()) {
    if limit < required {
      return Err(INVALID_CAPACITY_RANGE.error(&[&limit, &required]));
    }
  }

  Ok(ceil_gib(range.required().unwrap_or(0)).max(minimum))
}

/// Size a volume has to grow to, in GiB.
pub fn expansion_gib(range: CapacityRange) -> Result<u64, UserError> {
  let required = range.required().or_else(|| range.limit()).unwrap_or(0);
  if let Some(limit) = range.limit() {
    if limit < required {
      return Err(INVALID_CAPACITY_RANGE.error(&[&limit, &required]));
    }
  }

  Ok(ceil_gib(required))
}

pub fn is_supported(capability: &VolumeCapability) -> bool {
  capability.access_mode() == AccessMode::SingleNodeWriter
}

pub fn check_access_modes(capabilities: &[VolumeCapability]) -> Result<(), UserError> {
  match capabilities.iter().find(|c| !is_supported(c)) {
    Some(c) => Err(UNSUPPORTED_ACCESS_MODE.error(&[&format!("{:?}", c.access_mode())])),
    None => Ok(()),
  }
}

/// Filesystem of the first mount capability, `ext4` when none is named.
pub fn fs_type(capabilities: &[VolumeCapability]) -> Result<String, UserError> {
  let requested = capabilities
    .iter()
    .filter_map(VolumeCapability::mount)
    .find_map(|m| m.fs_type());

  match requested {
    None => Ok(DEFAULT_FS_TYPE.to_owned()),
    Some(fs) if FS_TYPES.contains(&fs) => Ok(fs.to_owned()),
    Some(fs) => Err(UNSUPPORTED_FS_TYPE.error(&[&fs])),
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
  pub zone: String,
  pub region: String,
}

/// Zone and region of a new volume. An explicit zone wins over the first
/// preferred topology segment.
pub fn placement(
  name: &str,
  params: &VolumeParams,
  topology: Option<&TopologyRequirement>,
) -> Result<Placement, UserError> {
  let preferred = topology.and_then(|t| t.preferred().first());

  let zone = match &params.zone {
    Some(zone) => zone.clone(),
    None => preferred
      .and_then(|t| t.get(ZONE_TOPOLOGY_KEY))
      .filter(|z| !z.is_empty())
      .cloned()
      .ok_or_else(|| FAILED_TO_PLACE_VOLUME.error(&[&name]))?,
  };

  let region = params
    .region
    .clone()
    .or_else(|| preferred.and_then(|t| t.get(REGION_TOPOLOGY_KEY)).cloned())
    .unwrap_or_else(|| region_of_zone(&zone).to_owned());

  Ok(Placement { zone, region })
}

pub fn check_volume_name(name: &str) -> Result<(), UserError> {
  if name.is_empty() {
    return Err(EMPTY_VOLUME_NAME.error(&[]));
  }
  if name.chars().count() > MAX_NAME_LEN {
    return Err(VOLUME_INVALID_ARGUMENTS.error(&[&format!(
      "volume name '{}' is longer than {} characters",
      name, MAX_NAME_LEN
    )]));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::convert::TryFrom;
  use test_case::test_case;
  use vpc_block_provider::Kind;
  use vpc_csi_proto::{controller::VolumeCapability, proto};

  fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  fn range(required: i64, limit: i64) -> Option<CapacityRange> {
    Option::<CapacityRange>::try_from(proto::CapacityRange {
      required_bytes: required,
      limit_bytes: limit,
    })
    .unwrap()
  }

  fn capability(mode: proto::volume_capability::access_mode::Mode, fs: &str) -> VolumeCapability {
    VolumeCapability::try_from(proto::VolumeCapability {
      access_type: Some(proto::volume_capability::AccessType::Mount(
        proto::volume_capability::MountVolume {
          fs_type: fs.into(),
          ..Default::default()
        },
      )),
      access_mode: Some(proto::volume_capability::AccessMode { mode: mode as i32 }),
    })
    .unwrap()
  }

  #[test]
  fn defaults() {
    let params = VolumeParams::parse(&HashMap::new(), &HashMap::new()).unwrap();
    assert_eq!(params.profile, DEFAULT_PROFILE);
    assert!(params.tags.is_empty());
    assert_eq!(params.zone, None);
  }

  #[test_case("custom", Some(3000) ; "custom keeps iops")]
  #[test_case("sdp", Some(3000) ; "sdp keeps iops")]
  #[test_case("general-purpose", None ; "general purpose drops iops")]
  #[test_case("10iops-tier", None ; "tier drops iops")]
  fn iops_only_for_custom_profiles(profile: &str, iops: Option<i64>) {
    let params =
      VolumeParams::parse(&map(&[("profile", profile), ("iops", "3000")]), &HashMap::new())
        .unwrap();
    assert_eq!(params.iops, iops);
  }

  #[test_case(&[("profile", "gold")] ; "unknown profile")]
  #[test_case(&[("encrypted", "yes")] ; "encrypted not a boolean")]
  #[test_case(&[("throughput", "4294967296")] ; "throughput overflows")]
  #[test_case(&[("iops", "many")] ; "iops not a number")]
  #[test_case(&[("sizeRange", "[10-2000]GiB")] ; "unknown key")]
  #[test_case(&[("resourceGroup", "not-a-group")] ; "resource group not hex")]
  fn rejected(pairs: &[(&str, &str)]) {
    let err = VolumeParams::parse(&map(pairs), &HashMap::new()).unwrap_err();
    assert_eq!(err.code(), "InvalidParameters");
    assert_eq!(err.kind(), Kind::InvalidArgument);
  }

  #[test_case("zone", 63, true)]
  #[test_case("zone", 64, false)]
  #[test_case("region", 63, true)]
  #[test_case("region", 64, false)]
  #[test_case("resourceGroup", 32, true)]
  #[test_case("resourceGroup", 33, false)]
  #[test_case("tags", 128, true)]
  #[test_case("tags", 129, false)]
  #[test_case("encryptionKey", 256, true)]
  #[test_case("encryptionKey", 257, false)]
  fn length_limits(key: &str, len: usize, accepted: bool) {
    let value = "a".repeat(len);
    let result = VolumeParams::parse(&map(&[(key, &value)]), &HashMap::new());
    assert_eq!(result.is_ok(), accepted, "{} of length {}", key, len);
  }

  #[test]
  fn ignored_keys_are_accepted() {
    let params = VolumeParams::parse(
      &map(&[
        ("classVersion", "2"),
        ("generation", "gc"),
        ("billingType", "hourly"),
      ]),
      &HashMap::new(),
    )
    .unwrap();
    assert_eq!(params, VolumeParams::default());
  }

  #[test]
  fn secrets_override_and_tags_accumulate() {
    let params = VolumeParams::parse(
      &map(&[
        ("profile", "general-purpose"),
        ("zone", "us-south-1"),
        ("tags", "team:a, env:dev"),
      ]),
      &map(&[("zone", "us-south-2"), ("tags", "owner:b")]),
    )
    .unwrap();

    assert_eq!(params.zone.as_deref(), Some("us-south-2"));
    assert_eq!(params.tags, vec!["team:a", "env:dev", "owner:b"]);
  }

  #[test]
  fn unencrypted_clears_key() {
    let params = VolumeParams::parse(
      &map(&[("encryptionKey", "crn:v1:key"), ("encrypted", "false")]),
      &HashMap::new(),
    )
    .unwrap();
    assert_eq!(params.encryption_key_crn, None);

    let params =
      VolumeParams::parse(&map(&[("encryptionKey", "crn:v1:key")]), &HashMap::new()).unwrap();
    assert_eq!(params.encryption_key_crn.as_deref(), Some("crn:v1:key"));
  }

  #[test]
  fn throughput_is_32_bit() {
    let params =
      VolumeParams::parse(&map(&[("throughput", "1000")]), &HashMap::new()).unwrap();
    assert_eq!(params.throughput, Some(1000));
  }

  #[test_case(0, 0, "general-purpose", 10 ; "no range uses minimum")]
  #[test_case(1, 0, "general-purpose", 10 ; "one byte clamps to minimum")]
  #[test_case(1, 0, "sdp", 1 ; "sdp minimum is one")]
  #[test_case(20 * (1 << 30), 0, "general-purpose", 20 ; "exact gib")]
  #[test_case(20 * (1 << 30) + 1, 0, "general-purpose", 21 ; "rounds up")]
  #[test_case(5 * (1 << 30) + 7, 0, "sdp", 6 ; "sdp rounds up")]
  #[test_case(20 * (1 << 30), 30 * (1 << 30), "custom", 20 ; "limit above required")]
  fn capacity(required: i64, limit: i64, profile: &str, gib: u64) {
    assert_eq!(capacity_gib(range(required, limit), profile).unwrap(), gib);
  }

  #[test]
  fn limit_below_required_is_rejected() {
    let err = capacity_gib(range(20 * (1 << 30), 10 * (1 << 30)), "general-purpose").unwrap_err();
    assert_eq!(err.code(), "InvalidCapacityRange");
  }

  #[test]
  fn capacity_is_never_below_request() {
    for required in (1..200u64).map(|n| n * 123_456_789) {
      let gib = capacity_gib(range(required as i64, 0), "general-purpose").unwrap();
      assert!(gib * GIB >= required);
      assert!(gib >= MIN_CAPACITY_GIB);
      assert!(gib == MIN_CAPACITY_GIB || (gib - 1) * GIB < required);
    }
  }

  #[test_case(30 * (1 << 30), 0, 30)]
  #[test_case(30 * (1 << 30) + 1, 0, 31)]
  #[test_case(0, 40 * (1 << 30), 40)]
  fn expansion(required: i64, limit: i64, gib: u64) {
    assert_eq!(expansion_gib(range(required, limit).unwrap()).unwrap(), gib);
  }

  #[test_case("", Ok("ext4") ; "default")]
  #[test_case("xfs", Ok("xfs") ; "xfs")]
  #[test_case("ext2", Ok("ext2") ; "ext2")]
  #[test_case("btrfs", Err("UnsupportedFSType") ; "btrfs")]
  fn filesystem(fs: &str, expected: Result<&str, &str>) {
    use proto::volume_capability::access_mode::Mode;

    let result = fs_type(&[capability(Mode::SingleNodeWriter, fs)]);
    match expected {
      Ok(fs) => assert_eq!(result.unwrap(), fs),
      Err(code) => assert_eq!(result.unwrap_err().code(), code),
    }
  }

  #[test]
  fn only_single_node_writer() {
    use proto::volume_capability::access_mode::Mode;

    assert!(check_access_modes(&[capability(Mode::SingleNodeWriter, "ext4")]).is_ok());
    let err = check_access_modes(&[
      capability(Mode::SingleNodeWriter, "ext4"),
      capability(Mode::MultiNodeMultiWriter, "ext4"),
    ])
    .unwrap_err();
    assert_eq!(err.code(), "UnsupportedAccessMode");
  }

  fn topology(preferred: Vec<(&str, &str)>) -> TopologyRequirement {
    let segments = preferred
      .into_iter()
      .map(|(zone, region)| proto::Topology {
        segments: map(&[(ZONE_TOPOLOGY_KEY, zone), (REGION_TOPOLOGY_KEY, region)]),
      })
      .collect();
    proto::TopologyRequirement {
      requisite: Vec::new(),
      preferred: segments,
    }
    .into()
  }

  #[test]
  fn explicit_zone_wins() {
    let params = VolumeParams {
      zone: Some("eu-de-2".into()),
      ..Default::default()
    };
    let t = topology(vec![("us-south-1", "us-south")]);
    let placed = placement("pvc-1", &params, Some(&t)).unwrap();
    assert_eq!(placed.zone, "eu-de-2");
    assert_eq!(placed.region, "us-south");
  }

  #[test]
  fn zone_from_first_preferred_segment() {
    let t = topology(vec![("us-south-3", "us-south"), ("us-south-1", "us-south")]);
    let placed = placement("pvc-1", &VolumeParams::default(), Some(&t)).unwrap();
    assert_eq!(
      placed,
      Placement {
        zone: "us-south-3".into(),
        region: "us-south".into()
      }
    );
  }

  #[test]
  fn no_zone_anywhere_fails() {
    let t = topology(Vec::new());
    let err = placement("pvc-1", &VolumeParams::default(), Some(&t)).unwrap_err();
    assert_eq!(err.code(), "FailedToPlaceVolume");

    let err = placement("pvc-1", &VolumeParams::default(), None).unwrap_err();
    assert_eq!(err.code(), "FailedToPlaceVolume");
  }

  #[test]
  fn region_derived_from_zone() {
    let params = VolumeParams {
      zone: Some("jp-tok-1".into()),
      ..Default::default()
    };
    assert_eq!(placement("v", &params, None).unwrap().region, "jp-tok");
  }

  #[test]
  fn volume_names() {
    assert_eq!(check_volume_name("").unwrap_err().code(), "EmptyVolumeName");
    assert!(check_volume_name(&"v".repeat(63)).is_ok());
    assert_eq!(
      check_volume_name(&"v".repeat(64)).unwrap_err().code(),
      "VolumeInvalidArguments"
    );
  }
}
