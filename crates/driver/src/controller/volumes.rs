use crate::{
  driver::Driver,
  ids::{is_valid_volume_id, SnapshotRef},
  params::{self, VolumeParams, REGION_TOPOLOGY_KEY, ZONE_TOPOLOGY_KEY},
};
use tracing::{debug, info};
use vpc_block_provider::{self as provider, messages::*, UserError, VolumeRequest};
use vpc_csi_proto::controller::{
  ControllerExpandVolumeRequest, ControllerExpandVolumeResponse, CreateVolumeRequest,
  ListVolumesResponse, Topology, ValidateVolumeCapabilitiesRequest,
  ValidateVolumeCapabilitiesResponse, Volume, VolumeContentSource, VolumeListEntry,
};

/// The orchestrator's view of a backend volume.
fn to_csi(volume: &provider::Volume, source: Option<VolumeContentSource>) -> Volume {
  let mut topology = Topology::new();
  topology.insert(ZONE_TOPOLOGY_KEY.to_owned(), volume.zone.clone());
  topology.insert(REGION_TOPOLOGY_KEY.to_owned(), volume.region.clone());

  let mut csi = Volume::new(&volume.id, volume.capacity_bytes())
    .with_context("zone", &volume.zone)
    .with_context("region", &volume.region)
    .with_topology(topology)
    .with_content_source(source);

  if !volume.tags.is_empty() {
    csi = csi.with_context("tags", volume.tags.join(","));
  }
  csi
}

impl Driver {
  pub(super) async fn create(
    &self,
    request: CreateVolumeRequest,
    request_id: &str,
  ) -> Result<Volume, UserError> {
    let name = request.name();
    params::check_volume_name(name)?;

    let source = request.volume_content_source().cloned();
    let snapshot_handle = match &source {
      None => None,
      Some(VolumeContentSource::Snapshot(handle)) => Some(handle.clone()),
      Some(VolumeContentSource::Volume(_)) => return Err(UNSUPPORTED_CONTENT_SOURCE.error(&[])),
    };

    params::check_access_modes(request.volume_capabilities())?;
    params::fs_type(request.volume_capabilities())?;
    let params = VolumeParams::parse(request.parameters(), request.secrets())?;
    let capacity_gib = params::capacity_gib(request.capacity_range(), &params.profile)?;
    let placement = params::placement(name, &params, request.accessibility_requirements())?;

    let cloud = self.cloud()?;
    let session = self.session(request_id).await?;

    match session.get_volume_by_name(name).await {
      Ok(existing) if existing.capacity_gib == capacity_gib => {
        info!(volume_id = %existing.id, "Volume already exists");
        return Ok(to_csi(&existing, source));
      }
      Ok(existing) => {
        return Err(
          VOLUME_ALREADY_EXISTS
            .error(&[&name, &existing.capacity_gib])
            .with_request_id(request_id),
        )
      }
      Err(e) if e.is_not_found() => {}
      Err(e) => return Err(e),
    }

    // Snapshots of other accounts are only addressable by CRN.
    let source_snapshot_id = snapshot_handle.map(|handle| {
      let snapshot = SnapshotRef::parse(&handle);
      if snapshot.is_foreign(cloud.account_id()) {
        handle.clone()
      } else {
        snapshot.id.to_owned()
      }
    });

    let volume_request = VolumeRequest {
      name: name.to_owned(),
      capacity_gib,
      iops: params.iops,
      profile: params.profile,
      zone: placement.zone,
      resource_group_id: params
        .resource_group_id
        .or_else(|| cloud.default_resource_group().map(str::to_owned)),
      encryption_key_crn: params.encryption_key_crn,
      tags: params.tags,
      bandwidth: params.throughput,
      source_snapshot_id,
    };

    let created = session.create_volume(&volume_request).await?;
    let mut volume = session.wait_for_volume_available(&created.id).await?;
    if volume.region.is_empty() {
      volume.region = placement.region;
    }

    info!(volume_id = %volume.id, capacity_gib = volume.capacity_gib, "Volume created");
    Ok(to_csi(&volume, source))
  }

  pub(super) async fn delete(&self, volume_id: &str, request_id: &str) -> Result<(), UserError> {
    if !is_valid_volume_id(volume_id) {
      return Err(INVALID_VOLUME_ID.error(&[&volume_id]));
    }

    let session = self.session(request_id).await?;

    match session.get_volume(volume_id).await {
      Err(e) if e.is_not_found() => {
        info!("Volume already deleted");
        return Ok(());
      }
      Err(e) => return Err(e),
      Ok(_) => {}
    }

    match session.delete_volume(volume_id).await {
      Err(e) if e.is_not_found() => return Ok(()),
      result => result?,
    }
    session.wait_for_volume_deletion(volume_id).await?;

    info!("Volume deleted");
    Ok(())
  }

  pub(super) async fn validate(
    &self,
    request: ValidateVolumeCapabilitiesRequest,
    request_id: &str,
  ) -> Result<ValidateVolumeCapabilitiesResponse, UserError> {
    let session = self.session(request_id).await?;
    session.get_volume(request.volume_id()).await?;

    let unsupported: Vec<String> = request
      .volume_capabilities()
      .iter()
      .filter(|c| !params::is_supported(c))
      .map(|c| format!("{:?}", c.access_mode()))
      .collect();

    Ok(if unsupported.is_empty() {
      ValidateVolumeCapabilitiesResponse::Confirmed {
        volume_context: request.volume_context().clone(),
        volume_capabilities: request.volume_capabilities().to_vec(),
        parameters: request.parameters().clone(),
      }
    } else {
      ValidateVolumeCapabilitiesResponse::NotConfirmed(format!(
        "unsupported access modes: {}",
        unsupported.join(", ")
      ))
    })
  }

  pub(super) async fn list(
    &self,
    limit: u32,
    start: Option<&str>,
    request_id: &str,
  ) -> Result<ListVolumesResponse, UserError> {
    let session = self.session(request_id).await?;
    let list = session.list_volumes(limit, start).await?;
    debug!(count = list.volumes.len(), next = ?list.next, "Listed volumes");

    let entries = list
      .volumes
      .iter()
      .map(|v| VolumeListEntry::new(to_csi(v, None)))
      .collect();
    Ok(ListVolumesResponse::new(entries, list.next))
  }

  pub(super) async fn expand(
    &self,
    request: &ControllerExpandVolumeRequest,
    request_id: &str,
  ) -> Result<ControllerExpandVolumeResponse, UserError> {
    let capacity_gib = params::expansion_gib(request.capacity_range())?;
    let session = self.session(request_id).await?;

    let volume = session.get_volume(request.volume_id()).await?;
    if volume.capacity_gib >= capacity_gib {
      info!(capacity_gib = volume.capacity_gib, "Volume is already large enough");
      return Ok(ControllerExpandVolumeResponse::new(volume.capacity_bytes(), true));
    }

    session.expand_volume(&volume.id, capacity_gib).await?;
    let volume = session.wait_for_volume_available(&volume.id).await?;

    info!(capacity_gib = volume.capacity_gib, "Volume expanded");
    Ok(ControllerExpandVolumeResponse::new(volume.capacity_bytes(), true))
  }
}
