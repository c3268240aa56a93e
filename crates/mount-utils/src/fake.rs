use crate::{runner::MounterImpl, DiskFormat, FsStats, MountError, MountPoint, PathState, Result};
use std::{
  collections::{HashMap, HashSet},
  io,
  path::{Path, PathBuf},
  sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeAction {
  Mount {
    source: PathBuf,
    target: PathBuf,
    fs_type: String,
  },
  Unmount {
    target: PathBuf,
  },
  Format {
    device: PathBuf,
    fs_type: String,
  },
  Resize {
    device: PathBuf,
  },
  Rescan,
}

#[derive(Debug, Clone)]
struct FakeDevice {
  format: DiskFormat,
  size: u64,
}

#[derive(Default)]
struct FakeMounterInner {
  mount_points: Vec<MountPoint>,
  log: Vec<FakeAction>,
  paths: HashSet<PathBuf>,
  files: HashSet<PathBuf>,
  devices: HashMap<PathBuf, FakeDevice>,
  pending_devices: HashMap<PathBuf, FakeDevice>,
  corrupted: HashSet<PathBuf>,
  stats: HashMap<PathBuf, FsStats>,
  mount_error: Option<String>,
}

impl FakeMounterInner {
  fn is_mounted(&self, path: &Path) -> bool {
    self.mount_points.iter().any(|m| m.matches(path))
  }

  fn exists(&self, path: &Path) -> bool {
    self.paths.contains(path) || self.devices.contains_key(path) || self.is_mounted(path)
  }
}

/// In-memory mounter that records every action it performs. Paths and
/// devices only exist once registered, either by the test or through
/// `make_dir`/`make_file`.
#[derive(Default)]
pub struct FakeMounter(Mutex<FakeMounterInner>);

impl FakeMounter {
  pub fn new(mps: impl IntoIterator<Item = MountPoint>) -> Self {
    let inner = FakeMounterInner {
      mount_points: mps.into_iter().collect(),
      ..Default::default()
    };

    Self(Mutex::new(inner))
  }

  fn lock(&self) -> MutexGuard<'_, FakeMounterInner> {
    self.0.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn reset_log(&self) {
    self.lock().log.clear();
  }

  pub fn get_log(&self) -> Vec<FakeAction> {
    self.lock().log.clone()
  }

  pub fn mount_points(&self) -> Vec<MountPoint> {
    self.lock().mount_points.clone()
  }

  pub fn is_mounted(&self, path: impl AsRef<Path>) -> bool {
    self.lock().is_mounted(path.as_ref())
  }

  pub fn path_exists(&self, path: impl AsRef<Path>) -> bool {
    self.lock().exists(path.as_ref())
  }

  pub fn add_path(&self, path: impl Into<PathBuf>) {
    self.lock().paths.insert(path.into());
  }

  /// Register a block device that is visible right away.
  pub fn add_device(&self, device: impl Into<PathBuf>, format: DiskFormat, size: u64) {
    self
      .lock()
      .devices
      .insert(device.into(), FakeDevice { format, size });
  }

  /// Register a block device that only shows up after a rescan.
  pub fn add_pending_device(&self, device: impl Into<PathBuf>, format: DiskFormat, size: u64) {
    self
      .lock()
      .pending_devices
      .insert(device.into(), FakeDevice { format, size });
  }

  pub fn set_device_size(&self, device: impl AsRef<Path>, size: u64) {
    if let Some(d) = self.lock().devices.get_mut(device.as_ref()) {
      d.size = size;
    }
  }

  pub fn device_format(&self, device: impl AsRef<Path>) -> Option<DiskFormat> {
    self
      .lock()
      .devices
      .get(device.as_ref())
      .map(|d| d.format.clone())
  }

  pub fn mark_corrupted(&self, path: impl Into<PathBuf>) {
    self.lock().corrupted.insert(path.into());
  }

  pub fn set_fs_stats(&self, path: impl Into<PathBuf>, stats: FsStats) {
    self.lock().stats.insert(path.into(), stats);
  }

  /// Make every following mount fail with `message`, or succeed again
  /// with `None`.
  pub fn fail_mounts(&self, message: Option<&str>) {
    self.lock().mount_error = message.map(ToOwned::to_owned);
  }
}

fn not_found(path: &Path) -> MountError {
  io::Error::new(
    io::ErrorKind::NotFound,
    format!("{} does not exist", path.display()),
  )
  .into()
}

impl MounterImpl for FakeMounter {
  fn mount(&self, source: &Path, target: &Path, fstype: &str, options: &[String]) -> Result<()> {
    let mut inner = self.lock();
    if let Some(message) = &inner.mount_error {
      return Err(MountError::new(message.clone()));
    }

    if !inner.exists(target) {
      return Err(not_found(target));
    }

    let mut device = source.to_owned();
    if options.iter().any(|o| o == "bind") {
      // Linux lists the original device for a bind mount, not the bound
      // directory.
      if let Some(mnt) = inner.mount_points.iter().find(|m| m.matches(source)) {
        device = mnt.device().to_owned();
      }
    }

    inner.mount_points.push(MountPoint::new(
      device.clone(),
      target,
      fstype,
      options.to_vec(),
    ));
    info!(
      "Fake mounter: mounted {} to {}",
      device.display(),
      target.display()
    );
    inner.log.push(FakeAction::Mount {
      source: device,
      target: target.to_owned(),
      fs_type: fstype.to_owned(),
    });

    Ok(())
  }

  fn unmount(&self, target: &Path) -> Result<()> {
    let mut inner = self.lock();

    let before = inner.mount_points.len();
    inner.mount_points.retain(|m| !m.matches(target));
    let was_corrupted = inner.corrupted.remove(target);
    if before == inner.mount_points.len() && !was_corrupted {
      return Err(MountError::NotMounted(target.display().to_string()));
    }

    info!("Fake mounter: unmounted {}", target.display());
    inner.log.push(FakeAction::Unmount {
      target: target.to_owned(),
    });

    Ok(())
  }

  fn list(&self) -> Result<Vec<MountPoint>> {
    Ok(self.lock().mount_points.clone())
  }

  fn is_likely_not_mount_point(&self, file: &Path) -> Result<bool> {
    let inner = self.lock();
    if !inner.exists(file) {
      return Err(not_found(file));
    }

    Ok(!inner.is_mounted(file))
  }

  fn disk_format(&self, device: &Path) -> Result<DiskFormat> {
    self
      .lock()
      .devices
      .get(device)
      .map(|d| d.format.clone())
      .ok_or_else(|| MountError::GetDiskFormatFailed {
        device: device.display().to_string(),
        message: "no such device".into(),
      })
  }

  fn format(&self, device: &Path, fstype: &str) -> Result<()> {
    let mut inner = self.lock();
    let dev = inner
      .devices
      .get_mut(device)
      .ok_or_else(|| MountError::FormatFailed {
        device: device.display().to_string(),
        fs_type: fstype.to_owned(),
        message: "no such device".into(),
      })?;
    dev.format = DiskFormat::Filesystem(fstype.to_owned());

    inner.log.push(FakeAction::Format {
      device: device.to_owned(),
      fs_type: fstype.to_owned(),
    });

    Ok(())
  }

  fn resize_fs(&self, device: &Path, _mount_path: &Path, _fstype: &str) -> Result<()> {
    self.lock().log.push(FakeAction::Resize {
      device: device.to_owned(),
    });
    Ok(())
  }

  fn block_size(&self, device: &Path) -> Result<u64> {
    self
      .lock()
      .devices
      .get(device)
      .map(|d| d.size)
      .ok_or_else(|| not_found(device))
  }

  fn fs_stats(&self, path: &Path) -> Result<FsStats> {
    self
      .lock()
      .stats
      .get(path)
      .copied()
      .ok_or_else(|| not_found(path))
  }

  fn rescan(&self) -> Result<()> {
    let mut inner = self.lock();
    let pending: Vec<_> = inner.pending_devices.drain().collect();
    inner.devices.extend(pending);
    inner.log.push(FakeAction::Rescan);
    Ok(())
  }

  fn path_state(&self, path: &Path) -> Result<PathState> {
    let inner = self.lock();
    Ok(if inner.corrupted.contains(path) {
      PathState::Corrupted
    } else if inner.exists(path) {
      PathState::Exists
    } else {
      PathState::NotExists
    })
  }

  fn is_block_device(&self, path: &Path) -> Result<bool> {
    let inner = self.lock();
    if inner.devices.contains_key(path) {
      return Ok(true);
    }
    if !inner.exists(path) {
      return Err(not_found(path));
    }

    // A file with a device bound over it reads as the device node.
    Ok(
      inner.files.contains(path)
        && inner
          .mount_points
          .iter()
          .any(|m| m.matches(path) && inner.devices.contains_key(m.device())),
    )
  }

  fn make_dir(&self, path: &Path) -> Result<()> {
    self.lock().paths.insert(path.to_owned());
    Ok(())
  }

  fn make_file(&self, path: &Path) -> Result<()> {
    let mut inner = self.lock();
    inner.paths.insert(path.to_owned());
    inner.files.insert(path.to_owned());
    Ok(())
  }

  fn remove_path(&self, path: &Path) -> Result<()> {
    let mut inner = self.lock();
    if inner.is_mounted(path) {
      return Err(MountError::new(format!(
        "{} is busy, still mounted",
        path.display()
      )));
    }

    inner.paths.remove(path);
    inner.files.remove(path);
    Ok(())
  }
}
