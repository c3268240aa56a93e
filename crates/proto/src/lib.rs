macro_rules! unsupported {
  ($name:expr) => {{
    ::tracing::error!("Unsupported method {} called", $name);
    return Err(::tonic::Status::new(
      ::tonic::Code::Unimplemented,
      format!("Unsupported method {} called", $name),
    ));
  }};
}

pub mod controller;
pub mod node;
pub mod volume;

mod identity;
pub mod proto;
mod secrets;
mod utils;

use std::collections::HashMap;

use lazy_static::lazy_static;

pub use controller::{controller_server, Controller, ControllerService};
pub use identity::{identity_server, Identity};
pub use node::{node_server, Node, NodeService};
pub use proto::{
  controller_server::ControllerServer, identity_server::IdentityServer, node_server::NodeServer,
};

/// Result type shared by every service trait in this crate.
pub type Result<T> = std::result::Result<T, tonic::Status>;

pub trait IdentityService: Send + Sync + 'static {
  /// Plugin name in domain name notation, at most 63 characters.
  fn name(&self) -> &str;

  /// Plugin version. Value of this field is opaque to the CO.
  fn version(&self) -> &str;

  /// Whether this process serves the controller service. When it does the
  /// `CONTROLLER_SERVICE` plugin capability is advertised.
  #[inline]
  fn controller_service(&self) -> bool {
    false
  }

  /// Whether volumes are only reachable from a subset of nodes.
  #[inline]
  fn volume_accessibility_constraints_support(&self) -> bool {
    false
  }

  #[inline]
  fn ready(&self) -> bool {
    true
  }

  #[inline]
  fn manifest(&self) -> &HashMap<String, String> {
    lazy_static! {
      static ref EMPTY_MANIFEST: HashMap<String, String> = HashMap::new();
    }

    &EMPTY_MANIFEST
  }
}
