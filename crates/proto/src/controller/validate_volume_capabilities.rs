use crate::{
  proto,
  secrets::Secrets,
  utils::required,
  volume::{volume_capabilities, VolumeCapability},
};
use std::{collections::HashMap, convert::TryFrom};

#[derive(Debug)]
pub struct ValidateVolumeCapabilitiesRequest {
  volume_id: String,
  volume_context: HashMap<String, String>,
  volume_capabilities: Vec<VolumeCapability>,
  parameters: HashMap<String, String>,
  secrets: Secrets,
}

impl ValidateVolumeCapabilitiesRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  #[inline]
  pub fn volume_context(&self) -> &HashMap<String, String> {
    &self.volume_context
  }

  /// The capabilities the CO wants to check for. Never empty.
  #[inline]
  pub fn volume_capabilities(&self) -> &[VolumeCapability] {
    &self.volume_capabilities
  }

  #[inline]
  pub fn parameters(&self) -> &HashMap<String, String> {
    &self.parameters
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }
}

impl TryFrom<proto::ValidateVolumeCapabilitiesRequest> for ValidateVolumeCapabilitiesRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ValidateVolumeCapabilitiesRequest) -> Result<Self, Self::Error> {
    let volume_id = required(value.volume_id, "ValidateVolumeCapabilitiesRequest.volume_id")?;
    let volume_capabilities = volume_capabilities(
      value.volume_capabilities,
      "ValidateVolumeCapabilitiesRequest.volume_capabilities",
    )?;

    Ok(ValidateVolumeCapabilitiesRequest {
      volume_id,
      volume_context: value.volume_context,
      volume_capabilities,
      parameters: value.parameters,
      secrets: value.secrets.into(),
    })
  }
}

#[derive(Debug)]
pub enum ValidateVolumeCapabilitiesResponse {
  /// Every requested capability is supported. Echoes back what was
  /// validated.
  Confirmed {
    volume_context: HashMap<String, String>,
    volume_capabilities: Vec<VolumeCapability>,
    parameters: HashMap<String, String>,
  },
  /// At least one capability is not supported; the message says which.
  NotConfirmed(String),
}

impl From<ValidateVolumeCapabilitiesResponse> for proto::ValidateVolumeCapabilitiesResponse {
  fn from(value: ValidateVolumeCapabilitiesResponse) -> Self {
    match value {
      ValidateVolumeCapabilitiesResponse::Confirmed {
        volume_context,
        volume_capabilities,
        parameters,
      } => proto::ValidateVolumeCapabilitiesResponse {
        confirmed: Some(proto::validate_volume_capabilities_response::Confirmed {
          volume_context,
          volume_capabilities: volume_capabilities.into_iter().map(Into::into).collect(),
          parameters,
          mutable_parameters: HashMap::new(),
        }),
        message: String::new(),
      },
      ValidateVolumeCapabilitiesResponse::NotConfirmed(message) => {
        proto::ValidateVolumeCapabilitiesResponse {
          confirmed: None,
          message,
        }
      }
    }
  }
}
