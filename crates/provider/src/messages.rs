//! User facing error catalog.
//!
//! Every failure that leaves the driver is a [`UserError`] built from one of
//! the [`MessageCode`] entries below. The code string is stable and is what
//! operators search for; the description is filled from positional `{}`
//! placeholders.

use crate::error::{suffix, BackendError};
use std::fmt;
use thiserror::Error;

/// Closed set of failure kinds. The gRPC layer maps each to a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
  InvalidArgument,
  NotFound,
  AlreadyExists,
  FailedPrecondition,
  Unauthenticated,
  ResourceExhausted,
  Internal,
  Unimplemented,
  Timeout,
  Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageCode {
  pub code: &'static str,
  pub description: &'static str,
  pub kind: Kind,
  pub action: &'static str,
}

impl MessageCode {
  /// Build an error, filling the description placeholders in order.
  pub fn error(&self, args: &[&dyn fmt::Display]) -> UserError {
    UserError {
      code: self.code,
      kind: self.kind,
      description: fill(self.description, args),
      action: self.action,
      backend_error: None,
      request_id: None,
    }
  }
}

fn fill(template: &str, args: &[&dyn fmt::Display]) -> String {
  let mut out = String::with_capacity(template.len());
  let mut args = args.iter();
  let mut rest = template;

  while let Some(pos) = rest.find("{}") {
    out.push_str(&rest[..pos]);
    match args.next() {
      Some(arg) => out.push_str(&arg.to_string()),
      None => out.push_str("{}"),
    }
    rest = &rest[pos + 2..];
  }

  out.push_str(rest);
  out
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
  "{{Code:{}, Description:{}{}, Action:{}{}}}",
  .code,
  .description,
  suffix(", BackendError:", .backend_error, ""),
  .action,
  suffix(", RequestID:", .request_id, "")
)]
pub struct UserError {
  code: &'static str,
  kind: Kind,
  description: String,
  action: &'static str,
  backend_error: Option<String>,
  request_id: Option<String>,
}

impl UserError {
  #[inline]
  pub fn code(&self) -> &'static str {
    self.code
  }

  #[inline]
  pub fn kind(&self) -> Kind {
    self.kind
  }

  #[inline]
  pub fn description(&self) -> &str {
    &self.description
  }

  #[inline]
  pub fn action(&self) -> &'static str {
    self.action
  }

  #[inline]
  pub fn backend_error(&self) -> Option<&str> {
    self.backend_error.as_deref()
  }

  #[inline]
  pub fn request_id(&self) -> Option<&str> {
    self.request_id.as_deref()
  }

  pub fn is_not_found(&self) -> bool {
    self.kind == Kind::NotFound
  }

  pub fn with_backend_error(mut self, err: impl fmt::Display) -> Self {
    self.backend_error = Some(err.to_string());
    self
  }

  /// Attach the request id unless one is already set.
  pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
    if self.request_id.is_none() {
      self.request_id = Some(request_id.into());
    }
    self
  }

  /// Surface a backend failure. Well known backend conditions get their own
  /// code and kind, everything else is reported with `fallback`.
  pub fn from_backend(
    fallback: &'static MessageCode,
    args: &[&dyn fmt::Display],
    err: BackendError,
  ) -> Self {
    let code = if err.is_start_not_found() {
      &START_ID_NOT_FOUND
    } else if err.is_not_found() {
      &OBJECT_NOT_FOUND
    } else if err.is_auth() {
      &AUTHENTICATION_FAILED
    } else if err.is_timeout() {
      &ENDPOINT_NOT_REACHABLE
    } else if err.is_capacity() {
      &VOLUME_CAPACITY_INVALID
    } else if err.is_validation() {
      &BACKEND_INVALID_ARGUMENT
    } else {
      fallback
    };

    let mut user = if std::ptr::eq(code, fallback) {
      code.error(args)
    } else {
      code.error(&[&fill(fallback.description, args)])
    };
    user.backend_error = Some(err.to_string());
    user
  }
}


macro_rules! messages {
  ($($name:ident => $code:literal, $kind:ident, $description:literal, $action:literal;)*) => {
    $(
      pub static $name: MessageCode = MessageCode {
        code: $code,
        description: $description,
        kind: Kind::$kind,
        action: $action,
      };
    )*
  };
}

#[rustfmt::skip]
messages! {
  // request validation
  EMPTY_VOLUME_NAME => "EmptyVolumeName", InvalidArgument,
    "Volume name is empty", "Provide a name for the volume";
  EMPTY_VOLUME_ID => "EmptyVolumeID", InvalidArgument,
    "Volume ID is empty", "Provide the volume ID";
  EMPTY_NODE_ID => "EmptyNodeID", InvalidArgument,
    "Node ID is empty", "Provide the node ID";
  EMPTY_SNAPSHOT_NAME => "EmptySnapshotName", InvalidArgument,
    "Snapshot name is empty", "Provide a name for the snapshot";
  EMPTY_SNAPSHOT_ID => "EmptySnapshotID", InvalidArgument,
    "Snapshot ID is empty", "Provide the snapshot ID";
  NO_VOLUME_CAPABILITIES => "NoVolumeCapabilities", InvalidArgument,
    "Volume capabilities are missing", "Provide at least one volume capability";
  VOLUME_CAPABILITIES_NOT_SUPPORTED => "VolumeCapabilitiesNotSupported", InvalidArgument,
    "Volume capabilities are not supported: {}", "Only SINGLE_NODE_WRITER access is supported";
  INVALID_PARAMETERS => "InvalidParameters", InvalidArgument,
    "Failed to parse parameters: {}", "Review the storage class parameters and secrets";
  VOLUME_INVALID_ARGUMENTS => "VolumeInvalidArguments", InvalidArgument,
    "Invalid arguments: {}", "Review the request";
  INVALID_VOLUME_ID => "InvalidVolumeID", InvalidArgument,
    "Volume ID '{}' is not valid", "Provide a valid volume ID";
  INVALID_CAPACITY_RANGE => "InvalidCapacityRange", InvalidArgument,
    "Limit {} bytes is less than required {} bytes", "Fix the requested capacity range";
  UNSUPPORTED_FS_TYPE => "UnsupportedFSType", InvalidArgument,
    "Filesystem type '{}' is not supported", "Use one of ext2, ext3, ext4 or xfs";
  UNSUPPORTED_ACCESS_MODE => "UnsupportedAccessMode", InvalidArgument,
    "Access mode {} is not supported", "Only SINGLE_NODE_WRITER access is supported";
  UNSUPPORTED_CONTENT_SOURCE => "UnsupportedVolumeContentSource", InvalidArgument,
    "Volume content source is not a snapshot", "Only snapshots can be used as a volume source";
  FAILED_TO_PLACE_VOLUME => "FailedToPlaceVolume", InvalidArgument,
    "Failed to place volume '{}', no zone given and no preferred topology", "Set the zone parameter or a preferred topology";
  BACKEND_INVALID_ARGUMENT => "InvalidRequest", InvalidArgument,
    "{}", "Review the request against the VPC API limits";
  INVALID_START_TOKEN => "InvalidStartToken", Aborted,
    "Starting token '{}' is not valid", "Restart the listing without a token";

  // lookups
  OBJECT_NOT_FOUND => "ObjectNotFound", NotFound,
    "{}: object not found", "Verify the ID and retry";
  VOLUME_NOT_FOUND => "VolumeNotFound", NotFound,
    "Volume '{}' not found", "Verify the volume ID";
  SNAPSHOT_NOT_FOUND => "SnapshotNotFound", NotFound,
    "Snapshot '{}' not found", "Verify the snapshot ID";
  ATTACHMENT_NOT_FOUND => "VolumeAttachmentNotFound", NotFound,
    "No attachment of volume '{}' on instance '{}'", "Verify the volume is attached";
  START_ID_NOT_FOUND => "StartVolumeIDNotFound", Aborted,
    "{}: start token not found", "Restart the listing without a token";

  // conflicts
  VOLUME_ALREADY_EXISTS => "VolumeAlreadyExists", AlreadyExists,
    "Volume '{}' already exists with a different size of {} GiB", "Use a different name or the existing size";
  SNAPSHOT_ALREADY_EXISTS => "SnapshotAlreadyExists", AlreadyExists,
    "Snapshot '{}' already exists for another volume '{}'", "Use a different snapshot name";

  // session
  SESSION_FAILED => "FailedToGetProviderSession", FailedPrecondition,
    "Failed to get a provider session: {}", "Check the credentials and the endpoint configuration";
  AUTHENTICATION_FAILED => "AuthenticationFailed", Unauthenticated,
    "{}: authentication failed", "Check the API key or compute profile";
  ENDPOINT_NOT_REACHABLE => "EndpointNotReachable", Timeout,
    "{}: endpoint not reachable", "Check network connectivity to the cloud endpoints";
  VOLUME_CAPACITY_INVALID => "VolumeCapacityInvalid", ResourceExhausted,
    "{}: capacity out of range for the profile", "Request a capacity supported by the profile";

  // backend operations
  VOLUME_CREATION_FAILED => "VolumeCreationFailed", Internal,
    "Failed to create volume '{}'", "Retry, and check the VPC API status if the failure persists";
  VOLUME_DELETION_FAILED => "VolumeDeletionFailed", Internal,
    "Failed to delete volume '{}'", "Retry, and check the volume is not attached";
  VOLUME_NOT_AVAILABLE => "VolumeNotAvailable", Internal,
    "Volume '{}' did not become available", "Check the volume status in the VPC console";
  RETRIEVE_FAILED => "RetrieveFailed", Internal,
    "Failed to retrieve '{}'", "Retry the operation";
  LIST_VOLUMES_FAILED => "ListVolumesFailed", Internal,
    "Failed to list volumes", "Retry the operation";
  UPDATE_VOLUME_FAILED => "UpdateFailed", Internal,
    "Failed to update volume '{}'", "Retry the operation";
  EXPAND_VOLUME_FAILED => "ExpandVolumeFailed", Internal,
    "Failed to expand volume '{}' to {} GiB", "Check the profile capacity limits and retry";
  ATTACH_FAILED => "AttachFailed", Internal,
    "Failed to attach volume '{}' to instance '{}'", "Check the instance state and retry";
  DETACH_FAILED => "DetachFailed", Internal,
    "Failed to detach volume '{}' from instance '{}'", "Check the instance state and retry";
  VOLUME_ATTACH_TIMED_OUT => "VolumeAttachTimedOut", Timeout,
    "Timed out waiting for volume '{}' to attach to instance '{}'", "The orchestrator retries the attach";
  VOLUME_DETACH_TIMED_OUT => "VolumeDetachTimedOut", Timeout,
    "Timed out waiting for volume '{}' to detach from instance '{}'", "The orchestrator retries the detach";
  SNAPSHOT_CREATION_FAILED => "SnapshotSpaceOrderFailed", Internal,
    "Failed to create snapshot '{}' of volume '{}'", "Retry the operation";
  SNAPSHOT_DELETION_FAILED => "SnapshotDeletionFailed", Internal,
    "Failed to delete snapshot '{}'", "Retry the operation";
  LIST_SNAPSHOTS_FAILED => "ListSnapshotsFailed", Internal,
    "Failed to list snapshots", "Retry the operation";

  // controller
  METHOD_UNIMPLEMENTED => "MethodUnimplemented", Unimplemented,
    "{} is not implemented", "Upgrade the driver if the operation is required";
  SNAPSHOT_DISABLED => "SnapshotFeatureDisabled", Unimplemented,
    "Snapshot operations are disabled", "Set IS_SNAPSHOT_ENABLED to enable snapshots";

  // node
  EMPTY_STAGING_PATH => "EmptyStagingPath", InvalidArgument,
    "Staging target path is empty", "Provide the staging target path";
  EMPTY_TARGET_PATH => "EmptyTargetPath", InvalidArgument,
    "Target path is empty", "Provide the target path";
  DEVICE_PATH_NOT_FOUND => "NoDevicePathFound", NotFound,
    "Device path '{}' for volume '{}' not found", "Check the volume is attached to this node";
  CREATE_MOUNT_TARGET_FAILED => "CreateMountTargetFailed", Internal,
    "Failed to create mount target '{}'", "Check the node filesystem";
  FORMAT_AND_MOUNT_FAILED => "FormatAndMountFailed", Internal,
    "Failed to format and mount '{}' at '{}'", "Check the device and the node logs";
  MOUNT_FAILED => "MountFailed", Internal,
    "Failed to mount '{}' at '{}'", "Check the node logs";
  UNMOUNT_FAILED => "UnmountFailed", Internal,
    "Failed to unmount '{}'", "Check for processes holding the mount";
  VOLUME_PATH_NOT_MOUNTED => "VolumePathNotMounted", FailedPrecondition,
    "Volume path '{}' is not mounted", "Stage the volume before expanding";
  FILESYSTEM_RESIZE_FAILED => "FileSystemResizeFailed", Internal,
    "Failed to resize the filesystem on '{}'", "Check the node logs";
  BLOCK_SIZE_FAILED => "BlockDeviceSizeFailed", Internal,
    "Failed to get the size of block device '{}'", "Check the device on the node";
  FS_STATS_FAILED => "GetFSStatsFailed", Internal,
    "Failed to get filesystem stats of '{}'", "Check the mount on the node";
  VOLUME_PATH_NOT_FOUND => "VolumePathNotFound", NotFound,
    "Volume path '{}' does not exist", "Verify the volume is published";
}
