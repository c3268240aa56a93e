use crate::{proto, utils::Record, IdentityService};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Identity service adapter. One instance is registered per process no
/// matter which of the controller or node services are served.
pub struct Identity<T: IdentityService>(Arc<T>);

pub fn identity_server<T: IdentityService>(
  service: Arc<T>,
) -> proto::identity_server::IdentityServer<Identity<T>> {
  proto::identity_server::IdentityServer::new(Identity(service))
}

fn service_capability(ty: proto::plugin_capability::service::Type) -> proto::PluginCapability {
  proto::PluginCapability {
    r#type: Some(proto::plugin_capability::Type::Service(
      proto::plugin_capability::Service { r#type: ty.into() },
    )),
  }
}

pub(crate) fn get_capabilities(s: &impl IdentityService) -> proto::GetPluginCapabilitiesResponse {
  use proto::plugin_capability::service::Type;

  let mut response = proto::GetPluginCapabilitiesResponse::default();

  let controller_service = s.controller_service();
  if controller_service {
    response
      .capabilities
      .push(service_capability(Type::ControllerService));
  }

  let volume_accessibility_constraints_support = s.volume_accessibility_constraints_support();
  if volume_accessibility_constraints_support {
    response
      .capabilities
      .push(service_capability(Type::VolumeAccessibilityConstraints));
  }

  debug!(
    ?controller_service,
    ?volume_accessibility_constraints_support
  );
  response
}

#[async_trait]
impl<T: IdentityService> proto::identity_server::Identity for Identity<T> {
  #[instrument(
    name = "identity.get_plugin_info",
    skip(self, _request),
    fields(name, vendor_version, manifest)
  )]
  async fn get_plugin_info(
    &self,
    _request: tonic::Request<proto::GetPluginInfoRequest>,
  ) -> Result<tonic::Response<proto::GetPluginInfoResponse>, tonic::Status> {
    let response = proto::GetPluginInfoResponse {
      name: self.0.name().record_field("name").into(),
      vendor_version: self.0.version().record_field("vendor_version").into(),
      manifest: self.0.manifest().record_field("manifest").clone(),
    };

    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "identity.get_plugin_capabilities",
    skip(self, _request),
    fields(response)
  )]
  async fn get_plugin_capabilities(
    &self,
    _request: tonic::Request<proto::GetPluginCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::GetPluginCapabilitiesResponse>, tonic::Status> {
    let response = get_capabilities(&*self.0).record_response();

    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "identity.probe", skip(self, _request), fields(ready))]
  async fn probe(
    &self,
    _request: tonic::Request<proto::ProbeRequest>,
  ) -> Result<tonic::Response<proto::ProbeResponse>, tonic::Status> {
    let response = proto::ProbeResponse {
      ready: Some(self.0.ready().record_field("ready")),
    };

    Ok(tonic::Response::new(response))
  }
}
