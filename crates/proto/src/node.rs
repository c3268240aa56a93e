mod capabilities;
mod expand_volume;
mod get_info;
mod get_volume_stats;
mod publish_volume;
mod stage_volume;
mod unpublish_volume;
mod unstage_volume;

use crate::{
  proto,
  utils::{record_request, record_status, Record},
  IdentityService, Result,
};
use async_trait::async_trait;
use std::{convert::TryInto, sync::Arc};
use tracing::instrument;

pub use crate::volume::*;
pub use capabilities::*;
pub use expand_volume::*;
pub use get_info::*;
pub use get_volume_stats::*;
pub use publish_volume::*;
pub use stage_volume::*;
pub use unpublish_volume::*;
pub use unstage_volume::*;

#[async_trait]
pub trait NodeService: IdentityService {
  #[inline]
  fn capabilities(&self) -> NodeCapabilities {
    NodeCapabilities::empty()
  }

  /// Mount the volume at the staging path. Called once per volume and
  /// node, before any `node_publish_volume`.
  #[allow(unused_variables)]
  async fn node_stage_volume(&self, request: NodeStageVolumeRequest) -> Result<()> {
    unsupported!("NodeStageVolume")
  }

  #[allow(unused_variables)]
  async fn node_unstage_volume(&self, request: NodeUnstageVolumeRequest) -> Result<()> {
    unsupported!("NodeUnstageVolume")
  }

  /// Make the volume available at the target path, usually by bind
  /// mounting the staging path.
  async fn node_publish_volume(&self, request: NodePublishVolumeRequest) -> Result<()>;

  async fn node_unpublish_volume(&self, request: NodeUnpublishVolumeRequest) -> Result<()>;

  #[allow(unused_variables)]
  async fn node_get_volume_stats(
    &self,
    request: NodeGetVolumeStatsRequest,
  ) -> Result<NodeGetVolumeStatsResponse> {
    unsupported!("NodeGetVolumeStats")
  }

  /// Grow the filesystem on the node after the controller expanded the
  /// underlying volume.
  #[allow(unused_variables)]
  async fn node_expand_volume(
    &self,
    request: NodeExpandVolumeRequest,
  ) -> Result<NodeExpandVolumeResponse> {
    unsupported!("NodeExpandVolume")
  }

  async fn node_get_info(&self) -> Result<NodeGetInfoResponse>;
}

pub struct Node<T: NodeService>(Arc<T>);

pub fn node_server<T: NodeService>(service: Arc<T>) -> proto::node_server::NodeServer<Node<T>> {
  proto::node_server::NodeServer::new(Node(service))
}

#[async_trait]
impl<T: NodeService> proto::node_server::Node for Node<T> {
  #[instrument(name = "node.stage_volume", skip(self, request), fields(request))]
  async fn node_stage_volume(
    &self,
    request: tonic::Request<proto::NodeStageVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeStageVolumeResponse>> {
    let request = record_request(request.into_inner().try_into().map_err(record_status)?);
    self.0.node_stage_volume(request).await.map_err(record_status)?;
    Ok(tonic::Response::new(proto::NodeStageVolumeResponse {}))
  }

  #[instrument(name = "node.unstage_volume", skip(self, request), fields(request))]
  async fn node_unstage_volume(
    &self,
    request: tonic::Request<proto::NodeUnstageVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeUnstageVolumeResponse>> {
    let request = record_request(request.into_inner().try_into().map_err(record_status)?);
    self
      .0
      .node_unstage_volume(request)
      .await
      .map_err(record_status)?;
    Ok(tonic::Response::new(proto::NodeUnstageVolumeResponse {}))
  }

  #[instrument(name = "node.publish_volume", skip(self, request), fields(request))]
  async fn node_publish_volume(
    &self,
    request: tonic::Request<proto::NodePublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodePublishVolumeResponse>> {
    let request = record_request(request.into_inner().try_into().map_err(record_status)?);
    self
      .0
      .node_publish_volume(request)
      .await
      .map_err(record_status)?;
    Ok(tonic::Response::new(proto::NodePublishVolumeResponse {}))
  }

  #[instrument(name = "node.unpublish_volume", skip(self, request), fields(request))]
  async fn node_unpublish_volume(
    &self,
    request: tonic::Request<proto::NodeUnpublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeUnpublishVolumeResponse>> {
    let request = record_request(request.into_inner().try_into().map_err(record_status)?);
    self
      .0
      .node_unpublish_volume(request)
      .await
      .map_err(record_status)?;
    Ok(tonic::Response::new(proto::NodeUnpublishVolumeResponse {}))
  }

  #[instrument(
    name = "node.get_volume_stats",
    skip(self, request),
    fields(request, response)
  )]
  async fn node_get_volume_stats(
    &self,
    request: tonic::Request<proto::NodeGetVolumeStatsRequest>,
  ) -> Result<tonic::Response<proto::NodeGetVolumeStatsResponse>> {
    let request = record_request(request.into_inner().try_into().map_err(record_status)?);
    let response = self
      .0
      .node_get_volume_stats(request)
      .await
      .map_err(record_status)?
      .record_response()
      .into();
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "node.expand_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn node_expand_volume(
    &self,
    request: tonic::Request<proto::NodeExpandVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeExpandVolumeResponse>> {
    let request = record_request(request.into_inner().try_into().map_err(record_status)?);
    let response = self
      .0
      .node_expand_volume(request)
      .await
      .map_err(record_status)?
      .record_response()
      .into();
    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "node.get_capabilities", skip(self, _request), fields(response))]
  async fn node_get_capabilities(
    &self,
    _request: tonic::Request<proto::NodeGetCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::NodeGetCapabilitiesResponse>> {
    let response = self.0.capabilities().record_response().into();
    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "node.get_info", skip(self, _request), fields(response))]
  async fn node_get_info(
    &self,
    _request: tonic::Request<proto::NodeGetInfoRequest>,
  ) -> Result<tonic::Response<proto::NodeGetInfoResponse>> {
    let response = self
      .0
      .node_get_info()
      .await
      .map_err(record_status)?
      .record_response()
      .into();
    Ok(tonic::Response::new(response))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proto::node_server::Node as _;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[derive(Default)]
  struct Counting {
    publishes: AtomicUsize,
  }

  impl IdentityService for Counting {
    fn name(&self) -> &str {
      "test.csi"
    }

    fn version(&self) -> &str {
      "0.0.0"
    }
  }

  #[async_trait]
  impl NodeService for Counting {
    fn capabilities(&self) -> NodeCapabilities {
      NodeCapabilities::STAGE_UNSTAGE_VOLUME | NodeCapabilities::GET_VOLUME_STATS
    }

    async fn node_publish_volume(&self, _request: NodePublishVolumeRequest) -> Result<()> {
      self.publishes.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }

    async fn node_unpublish_volume(&self, _request: NodeUnpublishVolumeRequest) -> Result<()> {
      Ok(())
    }

    async fn node_get_info(&self) -> Result<NodeGetInfoResponse> {
      let mut topology = Topology::new();
      topology.insert("topology.kubernetes.io/zone".into(), "us-south-1".into());
      Ok(
        NodeGetInfoResponse::new("i-1")
          .with_max_volumes(12)
          .with_topology(topology),
      )
    }
  }

  #[tokio::test]
  async fn relative_target_path_is_rejected_before_service() {
    let service = Arc::new(Counting::default());
    let node = Node(service.clone());

    let status = node
      .node_publish_volume(tonic::Request::new(proto::NodePublishVolumeRequest {
        volume_id: "r006-1".into(),
        target_path: "pods/x/mount".into(),
        ..Default::default()
      }))
      .await
      .unwrap_err();

    assert_eq!(status.code(), tonic::Code::InvalidArgument);
    assert_eq!(service.publishes.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn node_info_is_forwarded() {
    let node = Node(Arc::new(Counting::default()));

    let info = node
      .node_get_info(tonic::Request::new(proto::NodeGetInfoRequest {}))
      .await
      .unwrap()
      .into_inner();

    assert_eq!(info.node_id, "i-1");
    assert_eq!(info.max_volumes_per_node, 12);
    assert_eq!(
      info
        .accessible_topology
        .unwrap()
        .segments
        .get("topology.kubernetes.io/zone")
        .map(String::as_str),
      Some("us-south-1")
    );
  }

  #[tokio::test]
  async fn capabilities_follow_flags() {
    let node = Node(Arc::new(Counting::default()));

    let caps = node
      .node_get_capabilities(tonic::Request::new(proto::NodeGetCapabilitiesRequest {}))
      .await
      .unwrap()
      .into_inner();
    assert_eq!(caps.capabilities.len(), 2);
  }
}
