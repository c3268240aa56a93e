//! In-memory cloud and request builders shared by the driver tests.

use crate::{cli::Mode, driver::Driver, env::DriverEnv};
use async_trait::async_trait;
use std::{
  collections::{BTreeMap, HashMap},
  sync::{Arc, Mutex, MutexGuard},
  time::Duration,
};
use tokio::sync::watch;
use vpc_block_provider::{
  messages::*, region_of_zone, AttachStatus, AttachmentRequest, BackendError, CloudProvider,
  Snapshot, SnapshotList, UserError, Volume, VolumeAttachment, VolumeList, VolumeProvider,
  VolumeRequest, VolumeTagUpdate, GIB,
};
use vpc_csi_mount_utils::{FakeMounter, Mounter};
use vpc_csi_proto::proto;

pub const ACCOUNT_ID: &str = "acc-1";

#[derive(Default)]
struct State {
  volumes: BTreeMap<String, Volume>,
  snapshots: BTreeMap<String, Snapshot>,
  attachments: HashMap<(String, String), VolumeAttachment>,
  next_id: u64,
  attach_calls: usize,
  detach_calls: usize,
  create_calls: usize,
  in_flight: HashMap<String, usize>,
  max_in_flight: HashMap<String, usize>,
  total_in_flight: usize,
  max_total_in_flight: usize,
  fail_snapshot_creates: bool,
  tag_updates: Vec<VolumeTagUpdate>,
  request_ids: Vec<String>,
}

impl State {
  fn next(&mut self) -> u64 {
    self.next_id += 1;
    self.next_id
  }
}

fn not_found(id: &str, code: &str) -> UserError {
  UserError::from_backend(
    &RETRIEVE_FAILED,
    &[&id],
    BackendError::api(404, code, format!("{} not found", id), None),
  )
}

fn start_not_found(fallback: &'static MessageCode, code: &str) -> UserError {
  UserError::from_backend(
    fallback,
    &[],
    BackendError::api(400, code, "start not found", None),
  )
}

fn page<T: Clone>(
  items: Vec<(String, T)>,
  limit: u32,
  start: Option<&str>,
) -> Option<(Vec<T>, Option<String>)> {
  let offset = match start {
    Some(start) => items.iter().position(|(id, _)| id == start)?,
    None => 0,
  };

  let rest = &items[offset..];
  let taken = rest.iter().take(limit as usize).map(|(_, v)| v.clone()).collect();
  let next = rest.get(limit as usize).map(|(id, _)| id.clone());
  Some((taken, next))
}

/// A cloud that keeps everything in memory. Attachments take
/// `attach_delay` to settle, measured on the tokio clock.
#[derive(Clone)]
pub struct FakeCloud {
  state: Arc<Mutex<State>>,
  attach_delay: Duration,
}

impl FakeCloud {
  pub fn new() -> Self {
    FakeCloud {
      state: Arc::default(),
      attach_delay: Duration::from_secs(1),
    }
  }

  pub fn with_attach_delay(mut self, delay: Duration) -> Self {
    self.attach_delay = delay;
    self
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap()
  }

  pub fn add_volume(&self, name: &str, capacity_gib: u64, zone: &str) -> Volume {
    let mut state = self.lock();
    let n = state.next();
    let volume = Volume {
      id: format!("r006-{:08x}-0000-4000-8000", n),
      crn: None,
      name: name.to_owned(),
      capacity_gib,
      iops: None,
      profile: Some("general-purpose".to_owned()),
      zone: zone.to_owned(),
      region: region_of_zone(zone).to_owned(),
      resource_group_id: None,
      encryption_key_crn: None,
      tags: Vec::new(),
      bandwidth: None,
      status: "available".to_owned(),
      created_at: None,
      source_snapshot_id: None,
    };
    state.volumes.insert(volume.id.clone(), volume.clone());
    volume
  }

  pub fn add_snapshot(&self, name: &str, source_volume_id: &str) -> Snapshot {
    let mut state = self.lock();
    let n = state.next();
    let snapshot = snapshot(n, name, source_volume_id, 10 * GIB);
    state.snapshots.insert(snapshot.id.clone(), snapshot.clone());
    snapshot
  }

  pub fn add_attachment(&self, volume_id: &str, instance_id: &str, status: AttachStatus) {
    let mut state = self.lock();
    let n = state.next();
    state.attachments.insert(
      (volume_id.to_owned(), instance_id.to_owned()),
      attachment(n, volume_id, instance_id, status),
    );
  }

  pub fn volume(&self, id: &str) -> Option<Volume> {
    self.lock().volumes.get(id).cloned()
  }

  pub fn volume_count(&self) -> usize {
    self.lock().volumes.len()
  }

  pub fn snapshot_count(&self) -> usize {
    self.lock().snapshots.len()
  }

  pub fn attachment(&self, volume_id: &str, instance_id: &str) -> Option<VolumeAttachment> {
    self
      .lock()
      .attachments
      .get(&(volume_id.to_owned(), instance_id.to_owned()))
      .cloned()
  }

  pub fn attach_calls(&self) -> usize {
    self.lock().attach_calls
  }

  pub fn detach_calls(&self) -> usize {
    self.lock().detach_calls
  }

  pub fn create_calls(&self) -> usize {
    self.lock().create_calls
  }

  /// Most attachments that were in progress at once on `instance_id`.
  pub fn max_in_flight(&self, instance_id: &str) -> usize {
    self
      .lock()
      .max_in_flight
      .get(instance_id)
      .copied()
      .unwrap_or(0)
  }

  pub fn max_total_in_flight(&self) -> usize {
    self.lock().max_total_in_flight
  }

  pub fn fail_snapshot_creates(&self) {
    self.lock().fail_snapshot_creates = true;
  }

  pub fn tag_updates(&self) -> Vec<VolumeTagUpdate> {
    self.lock().tag_updates.clone()
  }

  pub fn request_ids(&self) -> Vec<String> {
    self.lock().request_ids.clone()
  }
}

fn snapshot(n: u64, name: &str, source_volume_id: &str, size_bytes: u64) -> Snapshot {
  let id = format!("r006-snap-{:04x}", n);
  Snapshot {
    crn: Some(format!(
      "crn:v1:bluemix:public:is:us-south:a/{}::snapshot:{}",
      ACCOUNT_ID, id
    )),
    id,
    name: name.to_owned(),
    source_volume_id: source_volume_id.to_owned(),
    size_bytes,
    ready_to_use: true,
    created_at: None,
  }
}

fn attachment(n: u64, volume_id: &str, instance_id: &str, status: AttachStatus) -> VolumeAttachment {
  VolumeAttachment {
    id: format!("0727-att-{:04x}", n),
    volume_id: volume_id.to_owned(),
    instance_id: instance_id.to_owned(),
    status,
    device_id: Some(format!("0727-dev-{:04x}", n)),
  }
}

#[async_trait]
impl CloudProvider for FakeCloud {
  async fn session(&self, request_id: &str) -> Result<Arc<dyn VolumeProvider>, UserError> {
    self.lock().request_ids.push(request_id.to_owned());
    Ok(Arc::new(self.clone()))
  }

  fn account_id(&self) -> &str {
    ACCOUNT_ID
  }

  fn default_resource_group(&self) -> Option<&str> {
    Some("0123456789abcdef0123456789abcdef")
  }
}

#[async_trait]
impl VolumeProvider for FakeCloud {
  async fn create_volume(&self, request: &VolumeRequest) -> Result<Volume, UserError> {
    self.lock().create_calls += 1;
    let mut volume = self.add_volume(&request.name, request.capacity_gib, &request.zone);
    volume.profile = Some(request.profile.clone());
    volume.tags = request.tags.clone();
    volume.iops = request.iops;
    volume.source_snapshot_id = request.source_snapshot_id.clone();
    volume.resource_group_id = request.resource_group_id.clone();
    self.lock().volumes.insert(volume.id.clone(), volume.clone());
    Ok(volume)
  }

  async fn get_volume(&self, id: &str) -> Result<Volume, UserError> {
    self
      .volume(id)
      .ok_or_else(|| not_found(id, "volume_not_found"))
  }

  async fn get_volume_by_name(&self, name: &str) -> Result<Volume, UserError> {
    self
      .lock()
      .volumes
      .values()
      .find(|v| v.name == name)
      .cloned()
      .ok_or_else(|| not_found(name, "volume_name_not_found"))
  }

  async fn list_volumes(&self, limit: u32, start: Option<&str>) -> Result<VolumeList, UserError> {
    let items = self
      .lock()
      .volumes
      .iter()
      .map(|(id, v)| (id.clone(), v.clone()))
      .collect();
    let (volumes, next) = page(items, limit, start)
      .ok_or_else(|| start_not_found(&LIST_VOLUMES_FAILED, "start_volume_id_not_found"))?;
    Ok(VolumeList { volumes, next })
  }

  async fn update_volume(&self, update: &VolumeTagUpdate) -> Result<(), UserError> {
    let mut state = self.lock();
    let volume = state
      .volumes
      .get_mut(&update.volume_id)
      .ok_or_else(|| not_found(&update.volume_id, "volume_not_found"))?;
    for tag in &update.tags {
      if !volume.tags.contains(tag) {
        volume.tags.push(tag.clone());
      }
    }
    state.tag_updates.push(update.clone());
    Ok(())
  }

  async fn expand_volume(&self, id: &str, capacity_gib: u64) -> Result<Volume, UserError> {
    let mut state = self.lock();
    let volume = state
      .volumes
      .get_mut(id)
      .ok_or_else(|| not_found(id, "volume_not_found"))?;
    volume.capacity_gib = capacity_gib;
    Ok(volume.clone())
  }

  async fn delete_volume(&self, id: &str) -> Result<(), UserError> {
    self
      .lock()
      .volumes
      .remove(id)
      .map(|_| ())
      .ok_or_else(|| not_found(id, "volume_not_found"))
  }

  async fn wait_for_volume_available(&self, id: &str) -> Result<Volume, UserError> {
    self.get_volume(id).await
  }

  async fn wait_for_volume_deletion(&self, _id: &str) -> Result<(), UserError> {
    Ok(())
  }

  async fn create_snapshot(
    &self,
    source_volume_id: &str,
    name: &str,
  ) -> Result<Snapshot, UserError> {
    let mut state = self.lock();
    if state.fail_snapshot_creates {
      return Err(UserError::from_backend(
        &SNAPSHOT_CREATION_FAILED,
        &[&name, &source_volume_id],
        BackendError::api(500, "internal_error", "snapshot quota exceeded", None),
      ));
    }

    let size = match state.volumes.get(source_volume_id) {
      Some(v) => v.capacity_bytes(),
      None => return Err(not_found(source_volume_id, "volume_not_found")),
    };
    let n = state.next();
    let snapshot = snapshot(n, name, source_volume_id, size);
    state.snapshots.insert(snapshot.id.clone(), snapshot.clone());
    Ok(snapshot)
  }

  async fn get_snapshot(&self, id: &str) -> Result<Snapshot, UserError> {
    self
      .lock()
      .snapshots
      .get(id)
      .cloned()
      .ok_or_else(|| not_found(id, "snapshot_not_found"))
  }

  async fn get_snapshot_by_name(&self, name: &str) -> Result<Snapshot, UserError> {
    self
      .lock()
      .snapshots
      .values()
      .find(|s| s.name == name)
      .cloned()
      .ok_or_else(|| not_found(name, "snapshot_not_found"))
  }

  async fn list_snapshots(
    &self,
    limit: u32,
    start: Option<&str>,
    source_volume_id: Option<&str>,
  ) -> Result<SnapshotList, UserError> {
    let items = self
      .lock()
      .snapshots
      .iter()
      .filter(|(_, s)| source_volume_id.map_or(true, |v| s.source_volume_id == v))
      .map(|(id, s)| (id.clone(), s.clone()))
      .collect();
    let (snapshots, next) = page(items, limit, start)
      .ok_or_else(|| start_not_found(&LIST_SNAPSHOTS_FAILED, "start_snapshot_id_not_found"))?;
    Ok(SnapshotList { snapshots, next })
  }

  async fn delete_snapshot(&self, id: &str) -> Result<(), UserError> {
    self
      .lock()
      .snapshots
      .remove(id)
      .map(|_| ())
      .ok_or_else(|| not_found(id, "snapshot_not_found"))
  }

  async fn attach_volume(&self, request: &AttachmentRequest) -> Result<VolumeAttachment, UserError> {
    let mut state = self.lock();
    state.attach_calls += 1;

    let in_flight = state
      .in_flight
      .entry(request.instance_id.clone())
      .or_default();
    *in_flight += 1;
    let in_flight = *in_flight;
    let max = state
      .max_in_flight
      .entry(request.instance_id.clone())
      .or_default();
    *max = (*max).max(in_flight);
    state.total_in_flight += 1;
    state.max_total_in_flight = state.max_total_in_flight.max(state.total_in_flight);

    let n = state.next();
    let created = attachment(
      n,
      &request.volume_id,
      &request.instance_id,
      AttachStatus::Attaching,
    );
    state.attachments.insert(
      (request.volume_id.clone(), request.instance_id.clone()),
      created.clone(),
    );
    Ok(created)
  }

  async fn get_volume_attachment(
    &self,
    request: &AttachmentRequest,
  ) -> Result<Option<VolumeAttachment>, UserError> {
    Ok(self.attachment(&request.volume_id, &request.instance_id))
  }

  async fn detach_volume(&self, request: &AttachmentRequest) -> Result<(), UserError> {
    let mut state = self.lock();
    state.detach_calls += 1;
    let key = (request.volume_id.clone(), request.instance_id.clone());
    match state.attachments.get_mut(&key) {
      Some(a) => {
        a.status = AttachStatus::Detaching;
        Ok(())
      }
      None => Err(not_found(&request.volume_id, "volume_attachment_not_found")),
    }
  }

  async fn wait_for_attach(
    &self,
    request: &AttachmentRequest,
  ) -> Result<VolumeAttachment, UserError> {
    tokio::time::sleep(self.attach_delay).await;

    let mut state = self.lock();
    if let Some(n) = state.in_flight.get_mut(&request.instance_id) {
      *n = n.saturating_sub(1);
    }
    state.total_in_flight = state.total_in_flight.saturating_sub(1);

    let key = (request.volume_id.clone(), request.instance_id.clone());
    match state.attachments.get_mut(&key) {
      Some(a) => {
        a.status = AttachStatus::Attached;
        Ok(a.clone())
      }
      None => Err(not_found(&request.volume_id, "volume_attachment_not_found")),
    }
  }

  async fn wait_for_detach(&self, request: &AttachmentRequest) -> Result<(), UserError> {
    self
      .lock()
      .attachments
      .remove(&(request.volume_id.clone(), request.instance_id.clone()));
    Ok(())
  }
}

pub struct Harness {
  pub driver: Arc<Driver>,
  pub cloud: FakeCloud,
  pub mounter: Arc<FakeMounter>,
  pub shutdown: watch::Sender<bool>,
}

pub fn env() -> DriverEnv {
  DriverEnv {
    node_name: Some("n1".to_owned()),
    node_zone: Some("us-south-1".to_owned()),
    node_region: Some("us-south".to_owned()),
    ..Default::default()
  }
}

pub fn harness_with(env: DriverEnv, cloud: FakeCloud) -> Harness {
  let mounter = Arc::new(FakeMounter::default());
  let (shutdown, receiver) = watch::channel(false);
  let driver = Driver::new(
    "vpc.block.csi.ibm.io",
    Mode::All,
    env,
    Mounter::from(mounter.clone()),
    receiver,
  )
  .with_cloud(Arc::new(cloud.clone()));

  Harness {
    driver: Arc::new(driver),
    cloud,
    mounter,
    shutdown,
  }
}

pub fn harness() -> Harness {
  harness_with(env(), FakeCloud::new())
}

pub fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
  pairs
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub fn mount_capability(fs_type: &str) -> proto::VolumeCapability {
  proto::VolumeCapability {
    access_type: Some(proto::volume_capability::AccessType::Mount(
      proto::volume_capability::MountVolume {
        fs_type: fs_type.into(),
        ..Default::default()
      },
    )),
    access_mode: Some(proto::volume_capability::AccessMode {
      mode: proto::volume_capability::access_mode::Mode::SingleNodeWriter as i32,
    }),
  }
}

pub fn block_capability() -> proto::VolumeCapability {
  proto::VolumeCapability {
    access_type: Some(proto::volume_capability::AccessType::Block(
      proto::volume_capability::BlockVolume {},
    )),
    access_mode: Some(proto::volume_capability::AccessMode {
      mode: proto::volume_capability::access_mode::Mode::SingleNodeWriter as i32,
    }),
  }
}

pub fn capacity(required_gib: i64) -> Option<proto::CapacityRange> {
  Some(proto::CapacityRange {
    required_bytes: required_gib << 30,
    limit_bytes: 0,
  })
}
