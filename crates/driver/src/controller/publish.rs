use crate::{driver::Driver, params};
use std::collections::HashMap;
use tracing::{debug, info};
use vpc_block_provider::{messages::*, AttachStatus, AttachmentRequest, UserError};
use vpc_csi_proto::controller::{ControllerPublishVolumeRequest, ControllerPublishVolumeResponse};

pub const VOLUME_ID_KEY: &str = "volume-id";
pub const NODE_ID_KEY: &str = "node-id";
pub const ATTACH_STATUS_KEY: &str = "attach-status";
pub const DEVICE_PATH_KEY: &str = "device-path";
pub const REQUEST_ID_KEY: &str = "request-id";

impl Driver {
  pub(super) async fn publish(
    &self,
    request: &ControllerPublishVolumeRequest,
    request_id: &str,
  ) -> Result<ControllerPublishVolumeResponse, UserError> {
    let volume_id = request.volume_id();
    let node_id = request.node_id();

    let capability = request.volume_capability();
    if !params::is_supported(capability) {
      return Err(VOLUME_CAPABILITIES_NOT_SUPPORTED.error(&[&format!(
        "{:?}",
        capability.access_mode()
      )]));
    }

    let _guard = self.attach_locks.lock(node_id).await;
    let session = self.session(request_id).await?;
    session.get_volume(volume_id).await?;

    let mut attach = AttachmentRequest::new(volume_id, node_id);
    let attachment = match session.get_volume_attachment(&attach).await? {
      Some(existing)
        if existing.status != AttachStatus::Detaching
          && existing.status != AttachStatus::Detached =>
      {
        debug!(attachment_id = %existing.id, status = %existing.status, "Volume already attached");
        existing
      }
      _ => session.attach_volume(&attach).await?,
    };

    attach.attachment_id = Some(attachment.id.clone());
    let attachment = if attachment.status == AttachStatus::Attached {
      attachment
    } else {
      session.wait_for_attach(&attach).await?
    };

    let device_path = attachment.device_path().ok_or_else(|| {
      ATTACH_FAILED
        .error(&[&volume_id, &node_id])
        .with_backend_error("attachment reports no device")
        .with_request_id(request_id)
    })?;

    info!(%device_path, "Volume attached");
    let mut context = HashMap::new();
    context.insert(VOLUME_ID_KEY.to_owned(), volume_id.to_owned());
    context.insert(NODE_ID_KEY.to_owned(), node_id.to_owned());
    context.insert(ATTACH_STATUS_KEY.to_owned(), attachment.status.to_string());
    context.insert(DEVICE_PATH_KEY.to_owned(), device_path);
    context.insert(REQUEST_ID_KEY.to_owned(), request_id.to_owned());
    Ok(ControllerPublishVolumeResponse::new(context))
  }

  pub(super) async fn unpublish(
    &self,
    volume_id: &str,
    node_id: &str,
    request_id: &str,
  ) -> Result<(), UserError> {
    let _guard = self.attach_locks.lock(node_id).await;
    let session = self.session(request_id).await?;

    let mut detach = AttachmentRequest::new(volume_id, node_id);
    let attachment = match session.get_volume_attachment(&detach).await? {
      None => {
        info!("Volume is not attached");
        return Ok(());
      }
      Some(a) if a.status == AttachStatus::Detaching || a.status == AttachStatus::Detached => {
        info!(status = %a.status, "Volume is already detaching");
        return Ok(());
      }
      Some(a) => a,
    };

    detach.attachment_id = Some(attachment.id);
    match session.detach_volume(&detach).await {
      Err(e) if e.is_not_found() => return Ok(()),
      result => result?,
    }
    session.wait_for_detach(&detach).await?;

    info!("Volume detached");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::*;
  use std::{convert::TryFrom, sync::Arc, time::Duration};
  use tonic::Code;
  use vpc_csi_proto::{controller::*, proto, ControllerService};

  fn publish_request(volume_id: &str, node_id: &str) -> ControllerPublishVolumeRequest {
    ControllerPublishVolumeRequest::try_from(proto::ControllerPublishVolumeRequest {
      volume_id: volume_id.into(),
      node_id: node_id.into(),
      volume_capability: Some(mount_capability("ext4")),
      ..Default::default()
    })
    .unwrap()
  }

  fn unpublish_request(volume_id: &str, node_id: &str) -> ControllerUnpublishVolumeRequest {
    ControllerUnpublishVolumeRequest::try_from(proto::ControllerUnpublishVolumeRequest {
      volume_id: volume_id.into(),
      node_id: node_id.into(),
      ..Default::default()
    })
    .unwrap()
  }

  #[tokio::test(start_paused = true)]
  async fn publish_returns_device_context() {
    let h = harness();
    let volume = h.cloud.add_volume("pvc-1", 10, "us-south-1");

    let response = h
      .driver
      .controller_publish_volume(publish_request(&volume.id, "n1"))
      .await
      .unwrap();

    let context = response.publish_context();
    assert_eq!(context[VOLUME_ID_KEY], volume.id);
    assert_eq!(context[NODE_ID_KEY], "n1");
    assert_eq!(context[ATTACH_STATUS_KEY], "attached");
    assert!(context[DEVICE_PATH_KEY].starts_with("/dev/disk/by-id/virtio-"));
    assert_eq!(context[REQUEST_ID_KEY], h.cloud.request_ids()[0]);
  }

  #[tokio::test(start_paused = true)]
  async fn concurrent_publish_attaches_once() {
    let h = harness_with(env(), FakeCloud::new().with_attach_delay(Duration::from_secs(5)));
    let volume = h.cloud.add_volume("pvc-1", 10, "us-south-1");

    let (a, b) = tokio::join!(
      h.driver
        .controller_publish_volume(publish_request(&volume.id, "n1")),
      h.driver
        .controller_publish_volume(publish_request(&volume.id, "n1")),
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(
      a.publish_context()[DEVICE_PATH_KEY],
      b.publish_context()[DEVICE_PATH_KEY]
    );
    assert_eq!(h.cloud.attach_calls(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn attaches_to_one_node_never_overlap() {
    let h = harness_with(env(), FakeCloud::new().with_attach_delay(Duration::from_secs(5)));
    let v1 = h.cloud.add_volume("pvc-1", 10, "us-south-1");
    let v2 = h.cloud.add_volume("pvc-2", 10, "us-south-1");
    let v3 = h.cloud.add_volume("pvc-3", 10, "us-south-1");

    let driver = Arc::clone(&h.driver);
    let (a, b, c) = tokio::join!(
      driver.controller_publish_volume(publish_request(&v1.id, "n1")),
      driver.controller_publish_volume(publish_request(&v2.id, "n1")),
      driver.controller_publish_volume(publish_request(&v3.id, "n2")),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    assert_eq!(h.cloud.attach_calls(), 3);
    assert_eq!(h.cloud.max_in_flight("n1"), 1);
    assert_eq!(h.cloud.max_total_in_flight(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn detaching_attachment_is_attached_again() {
    let h = harness();
    let volume = h.cloud.add_volume("pvc-1", 10, "us-south-1");
    h.cloud
      .add_attachment(&volume.id, "n1", vpc_block_provider::AttachStatus::Detaching);

    h.driver
      .controller_publish_volume(publish_request(&volume.id, "n1"))
      .await
      .unwrap();
    assert_eq!(h.cloud.attach_calls(), 1);
  }

  #[tokio::test]
  async fn publish_of_missing_volume_is_not_found() {
    let h = harness();
    let status = h
      .driver
      .controller_publish_volume(publish_request("r006-missing", "n1"))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
    assert_eq!(h.cloud.attach_calls(), 0);
  }

  #[tokio::test]
  async fn unpublish_detaches() {
    let h = harness();
    let volume = h.cloud.add_volume("pvc-1", 10, "us-south-1");
    h.cloud
      .add_attachment(&volume.id, "n1", vpc_block_provider::AttachStatus::Attached);

    h.driver
      .controller_unpublish_volume(unpublish_request(&volume.id, "n1"))
      .await
      .unwrap();
    assert_eq!(h.cloud.detach_calls(), 1);
    assert!(h.cloud.attachment(&volume.id, "n1").is_none());
  }

  #[tokio::test]
  async fn unpublish_of_absent_or_detaching_attachment_succeeds() {
    let h = harness();
    let volume = h.cloud.add_volume("pvc-1", 10, "us-south-1");

    h.driver
      .controller_unpublish_volume(unpublish_request(&volume.id, "n1"))
      .await
      .unwrap();

    h.cloud
      .add_attachment(&volume.id, "n2", vpc_block_provider::AttachStatus::Detaching);
    h.driver
      .controller_unpublish_volume(unpublish_request(&volume.id, "n2"))
      .await
      .unwrap();

    assert_eq!(h.cloud.detach_calls(), 0);
  }
}
