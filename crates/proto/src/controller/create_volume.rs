use crate::{
  proto,
  secrets::Secrets,
  utils::required,
  volume::{
    capacity_range, volume_capabilities, CapacityRange, TopologyRequirement, VolumeCapability,
    VolumeContentSource,
  },
};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
};

#[derive(Debug)]
pub struct CreateVolumeRequest {
  name: String,
  capacity_range: Option<CapacityRange>,
  volume_capabilities: Vec<VolumeCapability>,
  parameters: HashMap<String, String>,
  secrets: Secrets,
  volume_content_source: Option<VolumeContentSource>,
  accessibility_requirements: Option<TopologyRequirement>,
}

impl CreateVolumeRequest {
  /// The suggested name for the storage space. The CO uses it as the
  /// idempotency key for repeated calls.
  #[inline]
  pub fn name(&self) -> &str {
    &self.name
  }

  #[inline]
  pub fn capacity_range(&self) -> Option<CapacityRange> {
    self.capacity_range
  }

  /// At least one capability is always present.
  #[inline]
  pub fn volume_capabilities(&self) -> &[VolumeCapability] {
    &self.volume_capabilities
  }

  /// Storage class parameters.
  #[inline]
  pub fn parameters(&self) -> &HashMap<String, String> {
    &self.parameters
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }

  #[inline]
  pub fn volume_content_source(&self) -> Option<&VolumeContentSource> {
    self.volume_content_source.as_ref()
  }

  #[inline]
  pub fn accessibility_requirements(&self) -> Option<&TopologyRequirement> {
    self.accessibility_requirements.as_ref()
  }
}

impl TryFrom<proto::CreateVolumeRequest> for CreateVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::CreateVolumeRequest) -> Result<Self, Self::Error> {
    let name = required(value.name, "CreateVolumeRequest.name")?;
    let capacity_range = capacity_range(value.capacity_range)?;
    let volume_capabilities = volume_capabilities(
      value.volume_capabilities,
      "CreateVolumeRequest.volume_capabilities",
    )?;
    let volume_content_source = match value.volume_content_source {
      None => None,
      Some(v) => v.try_into()?,
    };

    Ok(CreateVolumeRequest {
      name,
      capacity_range,
      volume_capabilities,
      parameters: value.parameters,
      secrets: value.secrets.into(),
      volume_content_source,
      accessibility_requirements: value.accessibility_requirements.map(Into::into),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn mount_capability() -> proto::VolumeCapability {
    proto::VolumeCapability {
      access_type: Some(proto::volume_capability::AccessType::Mount(
        proto::volume_capability::MountVolume {
          fs_type: "ext4".into(),
          ..Default::default()
        },
      )),
      access_mode: Some(proto::volume_capability::AccessMode {
        mode: proto::volume_capability::access_mode::Mode::SingleNodeWriter as i32,
      }),
    }
  }

  #[test]
  fn name_is_required() {
    let request = proto::CreateVolumeRequest {
      volume_capabilities: vec![mount_capability()],
      ..Default::default()
    };

    let err = CreateVolumeRequest::try_from(request).unwrap_err();
    assert_eq!(err.message(), "CreateVolumeRequest.name is empty");
  }

  #[test]
  fn capabilities_are_required() {
    let request = proto::CreateVolumeRequest {
      name: "v1".into(),
      ..Default::default()
    };

    let err = CreateVolumeRequest::try_from(request).unwrap_err();
    assert_eq!(
      err.message(),
      "CreateVolumeRequest.volume_capabilities is empty"
    );
  }

  #[test]
  fn secrets_are_not_logged() {
    let mut secrets = HashMap::new();
    secrets.insert("iam_api_key".to_owned(), "s3cr3t".to_owned());

    let request = CreateVolumeRequest::try_from(proto::CreateVolumeRequest {
      name: "v1".into(),
      volume_capabilities: vec![mount_capability()],
      secrets,
      ..Default::default()
    })
    .unwrap();

    assert_eq!(request.secrets().len(), 1);
    assert!(!format!("{:?}", request).contains("s3cr3t"));
  }
}
