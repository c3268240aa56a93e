use bitflags::bitflags;

use crate::proto;

#[rustfmt::skip]
bitflags! {
  pub struct NodeCapabilities: u32 {
    const STAGE_UNSTAGE_VOLUME = 0b_0001;
    const GET_VOLUME_STATS     = 0b_0010;
    const EXPAND_VOLUME        = 0b_0100;
    const VOLUME_CONDITION     = 0b_1000;
  }
}

use proto::node_service_capability::rpc::Type;

const RPC_TYPES: [(NodeCapabilities, Type); 4] = [
  (NodeCapabilities::STAGE_UNSTAGE_VOLUME, Type::StageUnstageVolume),
  (NodeCapabilities::GET_VOLUME_STATS, Type::GetVolumeStats),
  (NodeCapabilities::EXPAND_VOLUME, Type::ExpandVolume),
  (NodeCapabilities::VOLUME_CONDITION, Type::VolumeCondition),
];

impl From<NodeCapabilities> for proto::NodeGetCapabilitiesResponse {
  fn from(value: NodeCapabilities) -> Self {
    let capabilities = RPC_TYPES
      .iter()
      .filter(|(flag, _)| value.contains(*flag))
      .map(|(_, ty)| proto::NodeServiceCapability {
        r#type: Some(proto::node_service_capability::Type::Rpc(
          proto::node_service_capability::Rpc { r#type: *ty as i32 },
        )),
      })
      .collect();

    proto::NodeGetCapabilitiesResponse { capabilities }
  }
}
