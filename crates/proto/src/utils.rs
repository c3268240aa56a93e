use std::{fmt, path::PathBuf};
use tracing::{field, warn, Span};

pub(crate) trait Record: Sized {
  fn record_field(self, field: &'static str) -> Self;

  #[inline]
  fn record_request(self) -> Self {
    self.record_field("request")
  }

  #[inline]
  fn record_response(self) -> Self {
    self.record_field("response")
  }
}

impl<T: fmt::Debug> Record for T {
  #[inline]
  fn record_field(self, field: &'static str) -> Self {
    Span::current().record(field, &field::debug(&self));
    self
  }
}

#[inline]
pub(crate) fn record_request<T: fmt::Debug>(request: T) -> T {
  request.record_request()
}

/// Logs a failed call inside the current span and hands the status back.
pub(crate) fn record_status(status: tonic::Status) -> tonic::Status {
  warn!(code = ?status.code(), message = %status.message(), "request failed");
  status
}

pub(crate) fn required(value: String, field: &'static str) -> Result<String, tonic::Status> {
  if value.is_empty() {
    Err(tonic::Status::invalid_argument(format!("{} is empty", field)))
  } else {
    Ok(value)
  }
}

#[inline]
pub(crate) fn optional(value: String) -> Option<String> {
  if value.is_empty() {
    None
  } else {
    Some(value)
  }
}

pub(crate) fn required_path(value: String, field: &'static str) -> Result<PathBuf, tonic::Status> {
  let path = PathBuf::from(required(value, field)?);
  if !path.is_absolute() {
    return Err(tonic::Status::invalid_argument(format!(
      "{} is not absolute",
      field
    )));
  }

  Ok(path)
}

pub(crate) fn optional_path(
  value: String,
  field: &'static str,
) -> Result<Option<PathBuf>, tonic::Status> {
  match optional(value) {
    None => Ok(None),
    Some(v) => required_path(v, field).map(Some),
  }
}

/// Zero means "no limit" on the wire.
pub(crate) fn max_entries(value: i32, field: &'static str) -> Result<Option<u32>, tonic::Status> {
  match value {
    v if v < 0 => Err(tonic::Status::invalid_argument(format!(
      "{} was less than 0",
      field
    ))),
    0 => Ok(None),
    v => Ok(Some(v as u32)),
  }
}
