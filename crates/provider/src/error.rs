use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
  /// The backend answered with an error envelope.
  Api,
  /// Connection level failure.
  Transport,
  /// The request did not complete within the client timeout.
  Timeout,
  /// The response body could not be decoded.
  Decode,
  /// The IAM token could not be obtained.
  Auth,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
  "{}{}{}",
  headline(.code, .message),
  suffix(" (status ", .http_status, ")"),
  suffix(" [trace ", .trace, "]")
)]
pub struct BackendError {
  pub kind: BackendErrorKind,
  pub code: String,
  pub http_status: Option<u16>,
  pub message: String,
  pub trace: Option<String>,
}

fn headline(code: &str, message: &str) -> String {
  if code.is_empty() {
    message.to_owned()
  } else {
    format!("{}: {}", code, message)
  }
}

/// Renders an optional part of an error message, or nothing.
pub(crate) fn suffix<T: fmt::Display>(open: &str, value: &Option<T>, close: &str) -> String {
  match value {
    Some(v) => format!("{}{}{}", open, v, close),
    None => String::new(),
  }
}

/// Codes that end a retry loop right away. Retrying them only repeats the
/// same answer.
const TERMINAL_CODES: &[&str] = &[
  "validation_invalid_name",
  "volume_capacity_max",
  "volume_id_invalid",
  "volume_profile_iops_invalid",
  "volume_capacity_zero_or_negative",
  "not_found",
  "volume_name_not_found",
  "volume_not_found",
  "volume_profile_capacity_invalid",
  "not_authorized",
  "snapshot_not_found",
  "snapshot_id_not_found",
];

/// Storage service codes returned in IKS mode.
const IKS_TERMINAL_CODES: &[&str] = &[
  "ST0005", "ST0008", "ST0014", "ST0015", "ST0016", "P4106", "P4107", "P4109",
];

const NOT_FOUND_CODES: &[&str] = &[
  "not_found",
  "volume_not_found",
  "volume_name_not_found",
  "snapshot_not_found",
  "snapshot_id_not_found",
  "volume_attachment_not_found",
  "ST0014",
  "P4109",
];

const START_NOT_FOUND_CODES: &[&str] = &["start_volume_id_not_found", "start_snapshot_id_not_found"];

const CAPACITY_CODES: &[&str] = &[
  "volume_capacity_max",
  "volume_capacity_zero_or_negative",
  "volume_profile_capacity_invalid",
];

const VALIDATION_CODES: &[&str] = &[
  "validation_invalid_name",
  "volume_id_invalid",
  "volume_profile_iops_invalid",
  "ST0005",
  "ST0008",
];

impl BackendError {
  pub fn api(
    http_status: u16,
    code: impl Into<String>,
    message: impl Into<String>,
    trace: Option<String>,
  ) -> Self {
    BackendError {
      kind: BackendErrorKind::Api,
      code: code.into(),
      http_status: Some(http_status),
      message: message.into(),
      trace,
    }
  }

  pub fn transport(message: impl Into<String>) -> Self {
    Self::without_code(BackendErrorKind::Transport, message)
  }

  pub fn timeout(message: impl Into<String>) -> Self {
    Self::without_code(BackendErrorKind::Timeout, message)
  }

  pub fn decode(message: impl Into<String>) -> Self {
    Self::without_code(BackendErrorKind::Decode, message)
  }

  pub fn auth(code: impl Into<String>, message: impl Into<String>) -> Self {
    BackendError {
      kind: BackendErrorKind::Auth,
      code: code.into(),
      http_status: None,
      message: message.into(),
      trace: None,
    }
  }

  fn without_code(kind: BackendErrorKind, message: impl Into<String>) -> Self {
    BackendError {
      kind,
      code: String::new(),
      http_status: None,
      message: message.into(),
      trace: None,
    }
  }

  fn code_in(&self, codes: &[&str]) -> bool {
    codes.contains(&self.code.as_str())
  }

  pub fn is_not_found(&self) -> bool {
    self.kind == BackendErrorKind::Api
      && (self.code_in(NOT_FOUND_CODES) || (self.code.is_empty() && self.http_status == Some(404)))
  }

  pub fn is_start_not_found(&self) -> bool {
    self.kind == BackendErrorKind::Api && self.code_in(START_NOT_FOUND_CODES)
  }

  pub fn is_auth(&self) -> bool {
    self.kind == BackendErrorKind::Auth || self.code == "not_authorized"
  }

  pub fn is_timeout(&self) -> bool {
    self.kind == BackendErrorKind::Timeout
  }

  pub fn is_capacity(&self) -> bool {
    self.code_in(CAPACITY_CODES)
  }

  pub fn is_validation(&self) -> bool {
    self.code_in(VALIDATION_CODES)
  }
}

/// Whether retrying `err` is pointless. IKS mode also knows the storage
/// service codes, which the VPC codes may be proxied alongside.
pub fn is_terminal(err: &BackendError, iks: bool) -> bool {
  match err.kind {
    BackendErrorKind::Auth => true,
    BackendErrorKind::Api => {
      err.code_in(TERMINAL_CODES) || (iks && err.code_in(IKS_TERMINAL_CODES))
    }
    BackendErrorKind::Transport | BackendErrorKind::Timeout | BackendErrorKind::Decode => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  fn api(code: &str) -> BackendError {
    BackendError::api(400, code, "failed", None)
  }

  #[test_case("validation_invalid_name")]
  #[test_case("volume_capacity_max")]
  #[test_case("volume_id_invalid")]
  #[test_case("volume_profile_iops_invalid")]
  #[test_case("volume_capacity_zero_or_negative")]
  #[test_case("not_found")]
  #[test_case("volume_name_not_found")]
  #[test_case("volume_not_found")]
  #[test_case("volume_profile_capacity_invalid")]
  #[test_case("not_authorized")]
  #[test_case("snapshot_not_found")]
  #[test_case("snapshot_id_not_found")]
  fn vpc_terminal_codes(code: &str) {
    assert!(is_terminal(&api(code), false));
    assert!(is_terminal(&api(code), true));
  }

  #[test_case("ST0005")]
  #[test_case("ST0008")]
  #[test_case("ST0014")]
  #[test_case("ST0015")]
  #[test_case("ST0016")]
  #[test_case("P4106")]
  #[test_case("P4107")]
  #[test_case("P4109")]
  fn iks_terminal_codes(code: &str) {
    assert!(is_terminal(&api(code), true));
    assert!(!is_terminal(&api(code), false));
  }

  #[test_case("internal_error")]
  #[test_case("invalid_route")]
  #[test_case("service_unavailable")]
  fn retryable_codes(code: &str) {
    assert!(!is_terminal(&api(code), false));
    assert!(!is_terminal(&api(code), true));
  }

  #[test]
  fn transport_failures_are_retryable() {
    assert!(!is_terminal(&BackendError::timeout("deadline"), false));
    assert!(!is_terminal(&BackendError::transport("reset"), false));
    assert!(is_terminal(&BackendError::auth("BXNIM0415E", "bad key"), false));
  }

  #[test]
  fn plain_404_is_not_found() {
    assert!(BackendError::api(404, "", "gone", None).is_not_found());
    assert!(!BackendError::api(500, "", "gone", None).is_not_found());
  }

  #[test]
  fn display() {
    let err = BackendError::api(404, "volume_not_found", "missing", Some("abc".into()));
    assert_eq!(err.to_string(), "volume_not_found: missing (status 404) [trace abc]");
    assert_eq!(BackendError::transport("reset").to_string(), "reset");
  }
}
