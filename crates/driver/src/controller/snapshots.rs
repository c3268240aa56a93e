use crate::{
  controller::list_limit,
  driver::Driver,
  ids::{is_valid_volume_id, SnapshotRef},
};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};
use vpc_block_provider::{self as provider, messages::*, UserError};
use vpc_csi_proto::controller::{ListSnapshotsRequest, ListSnapshotsResponse, Snapshot};

/// How long a snapshot call is held when snapshots are disabled, so the
/// snapshot controller does not retry in a tight loop.
const SNAPSHOT_DISABLED_PAUSE: Duration = Duration::from_secs(600);

fn to_csi(snapshot: provider::Snapshot) -> Snapshot {
  let id = snapshot.crn.unwrap_or(snapshot.id);
  Snapshot::new(id, snapshot.source_volume_id, snapshot.size_bytes)
    .with_creation_time(snapshot.created_at.map(SystemTime::from))
    .with_ready_to_use(snapshot.ready_to_use)
}

impl Driver {
  async fn snapshots_enabled(&self) -> Result<(), UserError> {
    if self.env.snapshot_enabled {
      return Ok(());
    }

    warn!("Snapshot operations are disabled, holding the request");
    self.pause(SNAPSHOT_DISABLED_PAUSE).await;
    Err(SNAPSHOT_DISABLED.error(&[]))
  }

  pub(super) async fn take_snapshot(
    &self,
    source_volume_id: &str,
    name: &str,
    request_id: &str,
  ) -> Result<Snapshot, UserError> {
    self.snapshots_enabled().await?;

    if !is_valid_volume_id(source_volume_id) {
      return Err(INVALID_VOLUME_ID.error(&[&source_volume_id]));
    }

    let session = self.session(request_id).await?;
    match session.get_snapshot_by_name(name).await {
      Ok(existing) if existing.source_volume_id == source_volume_id => {
        info!(snapshot_id = %existing.id, "Snapshot already exists");
        return Ok(to_csi(existing));
      }
      Ok(existing) => {
        return Err(
          SNAPSHOT_ALREADY_EXISTS
            .error(&[&name, &existing.source_volume_id])
            .with_request_id(request_id),
        )
      }
      Err(e) if e.is_not_found() => {}
      Err(e) => return Err(e),
    }

    match session.create_snapshot(source_volume_id, name).await {
      Ok(snapshot) => {
        info!(snapshot_id = %snapshot.id, "Snapshot created");
        Ok(to_csi(snapshot))
      }
      Err(e) => {
        warn!(error = %e, delay = ?self.env.snapshot_create_delay, "Snapshot creation failed");
        self.pause(self.env.snapshot_create_delay).await;
        Err(e)
      }
    }
  }

  pub(super) async fn drop_snapshot(&self, handle: &str, request_id: &str) -> Result<(), UserError> {
    self.snapshots_enabled().await?;

    let snapshot = SnapshotRef::parse(handle);
    let session = self.session(request_id).await?;

    match session.get_snapshot(snapshot.id).await {
      Err(e) if e.is_not_found() => {
        info!("Snapshot already deleted");
        return Ok(());
      }
      Err(e) => return Err(e),
      Ok(_) => {}
    }

    match session.delete_snapshot(snapshot.id).await {
      Err(e) if e.is_not_found() => Ok(()),
      result => {
        result?;
        info!("Snapshot deleted");
        Ok(())
      }
    }
  }

  pub(super) async fn find_snapshots(
    &self,
    request: &ListSnapshotsRequest,
    request_id: &str,
  ) -> Result<ListSnapshotsResponse, UserError> {
    self.snapshots_enabled().await?;

    if let Some(handle) = request.snapshot_id() {
      return self.find_snapshot(handle, request_id).await;
    }

    let source = request.source_volume_id();
    if let Some(source) = source {
      if !is_valid_volume_id(source) {
        return Err(INVALID_VOLUME_ID.error(&[&source]));
      }
    }

    let session = self.session(request_id).await?;
    let list = session
      .list_snapshots(
        list_limit(request.max_entries()),
        request.starting_token(),
        source,
      )
      .await?;

    let entries = list.snapshots.into_iter().map(to_csi).collect();
    Ok(ListSnapshotsResponse::new(entries, list.next))
  }

  async fn find_snapshot(
    &self,
    handle: &str,
    request_id: &str,
  ) -> Result<ListSnapshotsResponse, UserError> {
    let snapshot = SnapshotRef::parse(handle);

    // Another account's snapshot cannot be read with our credentials; it
    // is reported as ready so restores from it can proceed.
    if snapshot.is_foreign(self.cloud()?.account_id()) {
      info!(account_id = %snapshot.account_id, "Reporting snapshot of another account");
      let entry = Snapshot::new(handle, "", 0).with_ready_to_use(true);
      return Ok(ListSnapshotsResponse::new(vec![entry], None));
    }

    let session = self.session(request_id).await?;
    match session.get_snapshot(snapshot.id).await {
      Ok(found) => Ok(ListSnapshotsResponse::new(vec![to_csi(found)], None)),
      Err(e) if e.is_not_found() => Ok(ListSnapshotsResponse::default()),
      Err(e) => Err(e),
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::testing::*;
  use std::{convert::TryFrom, time::Duration};
  use tokio::time::Instant;
  use tonic::Code;
  use vpc_csi_proto::{controller::*, proto, ControllerService};

  fn create_request(source: &str, name: &str) -> CreateSnapshotRequest {
    CreateSnapshotRequest::try_from(proto::CreateSnapshotRequest {
      source_volume_id: source.into(),
      name: name.into(),
      ..Default::default()
    })
    .unwrap()
  }

  fn delete_request(id: &str) -> DeleteSnapshotRequest {
    DeleteSnapshotRequest::try_from(proto::DeleteSnapshotRequest {
      snapshot_id: id.into(),
      ..Default::default()
    })
    .unwrap()
  }

  #[tokio::test]
  async fn create_is_idempotent_by_name() {
    let h = harness();
    let volume = h.cloud.add_volume("pvc-1", 10, "us-south-1");

    let first = h
      .driver
      .create_snapshot(create_request(&volume.id, "snap-1"))
      .await
      .unwrap();
    let second = h
      .driver
      .create_snapshot(create_request(&volume.id, "snap-1"))
      .await
      .unwrap();

    assert_eq!(first.snapshot_id(), second.snapshot_id());
    assert!(first.snapshot_id().starts_with("crn:"));
    assert_eq!(first.source_volume_id(), volume.id);
    assert_eq!(first.size_bytes(), 10 << 30);
    assert!(first.ready_to_use());
    assert_eq!(h.cloud.snapshot_count(), 1);
  }

  #[tokio::test]
  async fn same_name_for_other_volume_conflicts() {
    let h = harness();
    let v1 = h.cloud.add_volume("pvc-1", 10, "us-south-1");
    let v2 = h.cloud.add_volume("pvc-2", 10, "us-south-1");
    h.cloud.add_snapshot("snap-1", &v1.id);

    let status = h
      .driver
      .create_snapshot(create_request(&v2.id, "snap-1"))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::AlreadyExists);
  }

  #[tokio::test]
  async fn malformed_source_volume_is_rejected() {
    let h = harness();
    let status = h
      .driver
      .create_snapshot(create_request("vol-1", "snap-1"))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(h.cloud.request_ids().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn disabled_snapshots_are_held_then_unimplemented() {
    let h = harness_with(
      crate::env::DriverEnv {
        snapshot_enabled: false,
        ..env()
      },
      FakeCloud::new(),
    );
    let volume = h.cloud.add_volume("pvc-1", 10, "us-south-1");

    let start = Instant::now();
    let status = h
      .driver
      .create_snapshot(create_request(&volume.id, "snap-1"))
      .await
      .unwrap_err();

    assert_eq!(status.code(), Code::Unimplemented);
    assert!(start.elapsed() >= Duration::from_secs(600));
    assert_eq!(h.cloud.snapshot_count(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn failed_create_is_damped() {
    let h = harness_with(
      crate::env::DriverEnv {
        snapshot_create_delay: Duration::from_secs(120),
        ..env()
      },
      FakeCloud::new(),
    );
    let volume = h.cloud.add_volume("pvc-1", 10, "us-south-1");
    h.cloud.fail_snapshot_creates();

    let start = Instant::now();
    let status = h
      .driver
      .create_snapshot(create_request(&volume.id, "snap-1"))
      .await
      .unwrap_err();

    assert_eq!(status.code(), Code::Internal);
    assert!(start.elapsed() >= Duration::from_secs(120));
  }

  #[tokio::test]
  async fn delete_of_missing_snapshot_succeeds() {
    let h = harness();
    h.driver
      .delete_snapshot(delete_request("sn-404"))
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn delete_by_crn() {
    let h = harness();
    let volume = h.cloud.add_volume("pvc-1", 10, "us-south-1");
    let snapshot = h.cloud.add_snapshot("snap-1", &volume.id);

    h.driver
      .delete_snapshot(delete_request(snapshot.crn.as_deref().unwrap()))
      .await
      .unwrap();
    assert_eq!(h.cloud.snapshot_count(), 0);
  }

  #[tokio::test]
  async fn list_by_id() {
    let h = harness();
    let volume = h.cloud.add_volume("pvc-1", 10, "us-south-1");
    let snapshot = h.cloud.add_snapshot("snap-1", &volume.id);

    let found = h
      .driver
      .list_snapshots(ListSnapshotsRequest::new(
        None,
        None,
        None,
        Some(snapshot.id.clone()),
      ))
      .await
      .unwrap();
    assert_eq!(found.entries().len(), 1);
    assert_eq!(found.entries()[0].source_volume_id(), volume.id);

    let missing = h
      .driver
      .list_snapshots(ListSnapshotsRequest::new(
        None,
        None,
        None,
        Some("r006-snap-ffff".into()),
      ))
      .await
      .unwrap();
    assert!(missing.entries().is_empty());
  }

  #[tokio::test]
  async fn foreign_snapshot_is_synthesized() {
    let h = harness();
    let crn = "crn:v1:bluemix:public:is:us-south:a/other-account::snapshot:r006-abc";

    let found = h
      .driver
      .list_snapshots(ListSnapshotsRequest::new(None, None, None, Some(crn.into())))
      .await
      .unwrap();

    assert_eq!(found.entries().len(), 1);
    assert_eq!(found.entries()[0].snapshot_id(), crn);
    assert!(found.entries()[0].ready_to_use());
    assert!(h.cloud.request_ids().is_empty());
  }

  #[tokio::test]
  async fn list_by_source_volume() {
    let h = harness();
    let v1 = h.cloud.add_volume("pvc-1", 10, "us-south-1");
    let v2 = h.cloud.add_volume("pvc-2", 10, "us-south-1");
    h.cloud.add_snapshot("snap-1", &v1.id);
    h.cloud.add_snapshot("snap-2", &v2.id);
    h.cloud.add_snapshot("snap-3", &v1.id);

    let listed = h
      .driver
      .list_snapshots(ListSnapshotsRequest::new(
        None,
        None,
        Some(v1.id.clone()),
        None,
      ))
      .await
      .unwrap();
    assert_eq!(listed.entries().len(), 2);
    assert!(listed.entries().iter().all(|s| s.source_volume_id() == v1.id));

    let status = h
      .driver
      .list_snapshots(ListSnapshotsRequest::new(None, None, Some("vol-1".into()), None))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
  }

  #[tokio::test]
  async fn list_with_unknown_token_aborts() {
    let h = harness();
    let status = h
      .driver
      .list_snapshots(ListSnapshotsRequest::new(
        Some(10),
        Some("r006-snap-none".into()),
        None,
        None,
      ))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::Aborted);
  }
}
