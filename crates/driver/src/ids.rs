//! Snapshot and volume identifiers as the orchestrator hands them to us.

/// A CRN has at least this many `:` separated segments.
const MIN_CRN_SEGMENTS: usize = 10;
/// VPC volume ids such as `r006-0d4b06c2-9c7e-4ba2-a7a0-fae7a4e3f3e4`.
const MIN_VOLUME_ID_SEGMENTS: usize = 5;

/// A snapshot handle, either a bare id or a CRN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotRef<'a> {
  /// The backend snapshot id.
  pub id: &'a str,
  /// Owning account, empty for bare ids.
  pub account_id: &'a str,
}

impl<'a> SnapshotRef<'a> {
  pub fn parse(handle: &'a str) -> Self {
    let segments: Vec<&str> = handle.split(':').collect();
    if segments.len() < MIN_CRN_SEGMENTS {
      return SnapshotRef {
        id: handle,
        account_id: "",
      };
    }

    let scope = segments[segments.len() - 4];
    SnapshotRef {
      id: segments[segments.len() - 1],
      account_id: scope.strip_prefix("a/").unwrap_or(scope),
    }
  }

  /// Whether the snapshot lives in an account other than `account_id`.
  /// Without a configured account nothing is foreign.
  pub fn is_foreign(&self, account_id: &str) -> bool {
    !account_id.is_empty() && !self.account_id.is_empty() && self.account_id != account_id
  }
}

pub fn is_valid_volume_id(id: &str) -> bool {
  id.split('-').count() >= MIN_VOLUME_ID_SEGMENTS
}
