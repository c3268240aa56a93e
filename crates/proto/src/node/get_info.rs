use crate::{proto, volume::Topology};

#[derive(Debug)]
pub struct NodeGetInfoResponse {
  node_id: String,
  max_volumes_per_node: Option<u64>,
  accessible_topology: Option<Topology>,
}

impl NodeGetInfoResponse {
  pub fn new(node_id: impl Into<String>) -> Self {
    NodeGetInfoResponse {
      node_id: node_id.into(),
      max_volumes_per_node: None,
      accessible_topology: None,
    }
  }

  /// Maximum number of volumes the controller can attach to this node.
  pub fn with_max_volumes(mut self, max_volumes: u64) -> Self {
    self.max_volumes_per_node = Some(max_volumes);
    self
  }

  pub fn with_topology(mut self, topology: Topology) -> Self {
    self.accessible_topology = Some(topology);
    self
  }

  #[inline]
  pub fn node_id(&self) -> &str {
    &self.node_id
  }

  #[inline]
  pub fn max_volumes_per_node(&self) -> Option<u64> {
    self.max_volumes_per_node
  }

  #[inline]
  pub fn accessible_topology(&self) -> Option<&Topology> {
    self.accessible_topology.as_ref()
  }
}

impl From<NodeGetInfoResponse> for proto::NodeGetInfoResponse {
  fn from(value: NodeGetInfoResponse) -> Self {
    proto::NodeGetInfoResponse {
      node_id: value.node_id,
      max_volumes_per_node: value.max_volumes_per_node.unwrap_or_default() as i64,
      accessible_topology: value
        .accessible_topology
        .map(|segments| proto::Topology { segments }),
    }
  }
}
