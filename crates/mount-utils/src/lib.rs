cfg_if::cfg_if! {
  if #[cfg(unix)] {
    mod unix;
    pub use unix::OsMounter;
  } else {
    compile_error!("Only cfg(unix) is supported at this time")
  }
}

mod fake;
mod runner;

pub use fake::{FakeAction, FakeMounter};
pub use runner::MounterImpl;

use runner::run_inst;
use static_assertions::assert_impl_all;
use std::{
  fmt, io,
  path::{Path, PathBuf},
  result,
  sync::Arc,
};
use thiserror::Error;

pub type Result<T> = result::Result<T, MountError>;

/// A single line in /proc/mounts.
#[derive(Clone, PartialEq)]
pub struct MountPoint {
  device: PathBuf,
  path: PathBuf,
  ty: String,
  opts: Vec<String>,
  freq: i32,
  pass: i32,
}

impl fmt::Debug for MountPoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MountPoint")
      .field("device", &self.device)
      .field("path", &self.path)
      .field("type", &self.ty)
      .field("opts", &format!("length={}", self.opts.len()))
      .field("freq", &self.freq)
      .field("pass", &self.pass)
      .finish()
  }
}

impl MountPoint {
  pub fn new(
    device: impl Into<PathBuf>,
    path: impl Into<PathBuf>,
    ty: impl Into<String>,
    opts: Vec<String>,
  ) -> Self {
    MountPoint {
      device: device.into(),
      path: path.into(),
      ty: ty.into(),
      opts,
      freq: 0,
      pass: 0,
    }
  }

  #[inline]
  pub fn device(&self) -> &Path {
    &self.device
  }

  #[inline]
  pub fn path(&self) -> &Path {
    &self.path
  }

  #[inline]
  pub fn mount_type(&self) -> &str {
    &self.ty
  }

  #[inline]
  pub fn opts(&self) -> &[String] {
    &self.opts
  }

  #[inline]
  pub fn freq(&self) -> i32 {
    self.freq
  }

  #[inline]
  pub fn pass(&self) -> i32 {
    self.pass
  }

  /// Whether this entry is mounted at `dir`, including the form the kernel
  /// reports once the mount directory has been deleted.
  pub fn matches(&self, dir: &Path) -> bool {
    if self.path == dir {
      return true;
    }

    let deleted = format!("{}\\040(deleted)", dir.display());
    self.path == Path::new(&deleted)
  }
}

/// What `blkid` found on a block device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskFormat {
  Unformatted,
  Filesystem(String),
  Partitioned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState {
  Exists,
  NotExists,
  /// stat failed with an error that points to a dead mount.
  Corrupted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsStats {
  pub total_bytes: u64,
  pub available_bytes: u64,
  pub used_bytes: u64,
  pub total_inodes: u64,
  pub free_inodes: u64,
  pub used_inodes: u64,
}

#[derive(Debug, Error)]
pub enum MountError {
  #[error("device {device} already has a {existing} filesystem, {requested} requested")]
  FilesystemMismatch {
    device: String,
    existing: String,
    requested: String,
  },
  #[error("device {0} is partitioned and will not be formatted")]
  Partitioned(String),
  #[error("device {0} is unformatted and the mount is read only")]
  UnformattedReadOnly(String),
  #[error("failed to format {device} as {fs_type}: {message}")]
  FormatFailed {
    device: String,
    fs_type: String,
    message: String,
  },
  #[error("failed to get disk format of {device}: {message}")]
  GetDiskFormatFailed { device: String, message: String },
  #[error("failed to resize {device}: {message}")]
  ResizeFailed { device: String, message: String },
  #[error("{0} is not mounted")]
  NotMounted(String),
  #[error(transparent)]
  Io(#[from] io::Error),
  #[error("{0}")]
  Other(String),
}

impl MountError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, MountError::Io(e) if e.kind() == io::ErrorKind::NotFound)
  }

  pub(crate) fn new(msg: impl Into<String>) -> Self {
    MountError::Other(msg.into())
  }
}

/// Async handle to a [`MounterImpl`]. Calls run one at a time on a shared
/// dispatcher thread.
#[derive(Clone)]
pub struct Mounter(Arc<dyn MounterImpl>);

assert_impl_all!(Mounter: Send, Sync, Clone);

impl<T: MounterImpl> From<Arc<T>> for Mounter {
  fn from(inner: Arc<T>) -> Self {
    Mounter(inner)
  }
}

impl fmt::Debug for Mounter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("Mounter").finish()
  }
}

impl Mounter {
  /// Mounter backed by the host's mount, blkid, mkfs and resize tools.
  pub fn os() -> Self {
    Arc::new(OsMounter::new()).into()
  }

  pub async fn mount(
    &self,
    source: impl Into<PathBuf>,
    target: impl Into<PathBuf>,
    fstype: impl Into<String>,
    options: Vec<String>,
  ) -> Result<()> {
    let source = source.into();
    let target = target.into();
    let fstype = fstype.into();

    run_inst(self.0.clone(), move |m| {
      m.mount(&source, &target, &fstype, &options)
    })
    .await
  }

  pub async fn unmount(&self, target: impl Into<PathBuf>) -> Result<()> {
    let target = target.into();
    run_inst(self.0.clone(), move |m| m.unmount(&target)).await
  }

  pub async fn list(&self) -> Result<Vec<MountPoint>> {
    run_inst(self.0.clone(), |m| m.list()).await
  }

  pub async fn is_likely_not_mount_point(&self, file: impl Into<PathBuf>) -> Result<bool> {
    let file = file.into();
    run_inst(self.0.clone(), move |m| m.is_likely_not_mount_point(&file)).await
  }

  /// Like [`Mounter::is_likely_not_mount_point`] with a missing path
  /// reported as not mounted.
  pub async fn is_mount_point(&self, file: impl Into<PathBuf>) -> Result<bool> {
    match self.is_likely_not_mount_point(file).await {
      Ok(not_mount) => Ok(!not_mount),
      Err(e) if e.is_not_found() => Ok(false),
      Err(e) => Err(e),
    }
  }

  pub async fn get_device_name_from_mount(
    &self,
    mount_path: impl Into<PathBuf>,
  ) -> Result<Option<(PathBuf, usize)>> {
    let mount_path = mount_path.into();
    run_inst(self.0.clone(), move |m| {
      m.get_device_name_from_mount(&mount_path)
    })
    .await
  }

  pub async fn disk_format(&self, device: impl Into<PathBuf>) -> Result<DiskFormat> {
    let device = device.into();
    run_inst(self.0.clone(), move |m| m.disk_format(&device)).await
  }

  pub async fn format_and_mount(
    &self,
    source: impl Into<PathBuf>,
    target: impl Into<PathBuf>,
    fstype: impl Into<String>,
    options: Vec<String>,
  ) -> Result<()> {
    let source = source.into();
    let target = target.into();
    let fstype = fstype.into();

    run_inst(self.0.clone(), move |m| {
      m.format_and_mount(&source, &target, &fstype, &options)
    })
    .await
  }

  pub async fn resize(
    &self,
    device: impl Into<PathBuf>,
    mount_path: impl Into<PathBuf>,
  ) -> Result<bool> {
    let device = device.into();
    let mount_path = mount_path.into();
    run_inst(self.0.clone(), move |m| m.resize(&device, &mount_path)).await
  }

  pub async fn block_size(&self, device: impl Into<PathBuf>) -> Result<u64> {
    let device = device.into();
    run_inst(self.0.clone(), move |m| m.block_size(&device)).await
  }

  pub async fn fs_stats(&self, path: impl Into<PathBuf>) -> Result<FsStats> {
    let path = path.into();
    run_inst(self.0.clone(), move |m| m.fs_stats(&path)).await
  }

  pub async fn rescan(&self) -> Result<()> {
    run_inst(self.0.clone(), |m| m.rescan()).await
  }

  pub async fn path_state(&self, path: impl Into<PathBuf>) -> Result<PathState> {
    let path = path.into();
    run_inst(self.0.clone(), move |m| m.path_state(&path)).await
  }

  pub async fn is_block_device(&self, path: impl Into<PathBuf>) -> Result<bool> {
    let path = path.into();
    run_inst(self.0.clone(), move |m| m.is_block_device(&path)).await
  }

  pub async fn make_dir(&self, path: impl Into<PathBuf>) -> Result<()> {
    let path = path.into();
    run_inst(self.0.clone(), move |m| m.make_dir(&path)).await
  }

  pub async fn make_file(&self, path: impl Into<PathBuf>) -> Result<()> {
    let path = path.into();
    run_inst(self.0.clone(), move |m| m.make_file(&path)).await
  }

  pub async fn remove_path(&self, path: impl Into<PathBuf>) -> Result<()> {
    let path = path.into();
    run_inst(self.0.clone(), move |m| m.remove_path(&path)).await
  }

  pub async fn cleanup_mount_point(&self, path: impl Into<PathBuf>) -> Result<()> {
    let path = path.into();
    run_inst(self.0.clone(), move |m| m.cleanup_mount_point(&path)).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn matches_deleted_mount_dir() {
    let mp = MountPoint::new("/dev/vdb", "/mnt/data\\040(deleted)", "ext4", vec![]);
    assert!(mp.matches(Path::new("/mnt/data")));
    assert!(!mp.matches(Path::new("/mnt/other")));
  }

  #[test]
  fn mount_options_are_not_printed() {
    let mp = MountPoint::new(
      "//server/share",
      "/mnt/share",
      "cifs",
      vec!["password=hunter2".into()],
    );
    assert!(!format!("{:?}", mp).contains("hunter2"));
  }

  #[tokio::test]
  async fn missing_path_is_not_a_mount_point() {
    let mounter: Mounter = Arc::new(FakeMounter::new(vec![])).into();
    assert!(!mounter.is_mount_point("/does/not/exist").await.unwrap());
  }
}
