use crate::{DiskFormat, FsStats, MountError, MountPoint, PathState, Result};
use futures::channel::oneshot::{channel as oneshot, Receiver};
use once_cell::sync::OnceCell;
use std::{
  fs,
  future::Future,
  panic::{catch_unwind, AssertUnwindSafe},
  path::{Path, PathBuf},
  sync::Arc,
};
use tracing::{error, info, warn, Span};

struct MounterMessage {
  span: Span,
  run: Box<dyn FnOnce() + Send>,
}

type MounterDispatcher = crossbeam::channel::Sender<MounterMessage>;

/// Host side of mounting and formatting. Every method blocks, so calls are
/// funneled through a single dispatcher thread by [`crate::Mounter`] which
/// also guarantees that only one runs at a time.
pub trait MounterImpl: Send + Sync + 'static {
  /// Mounts source to target as fstype with given options. A `bind` option
  /// turns this into a bind mount followed by a remount carrying the
  /// remaining options. Options MUST not contain sensitive material.
  fn mount(&self, source: &Path, target: &Path, fstype: &str, options: &[String]) -> Result<()>;

  fn unmount(&self, target: &Path) -> Result<()>;

  /// All mounted filesystems, read consistently.
  fn list(&self) -> Result<Vec<MountPoint>>;

  /// Fast heuristic: a directory on a different device than its parent is a
  /// mount point. Misses bind mounts of the same filesystem. Fails with
  /// `NotFound` when `file` does not exist.
  fn is_likely_not_mount_point(&self, file: &Path) -> Result<bool>;

  /// Probe what is on a block device.
  fn disk_format(&self, device: &Path) -> Result<DiskFormat>;

  /// Create a filesystem, overwriting whatever is on the device.
  fn format(&self, device: &Path, fstype: &str) -> Result<()>;

  /// Grow the filesystem on `device`, mounted at `mount_path`, to the size
  /// of the device.
  fn resize_fs(&self, device: &Path, mount_path: &Path, fstype: &str) -> Result<()>;

  /// Size of a block device in bytes.
  fn block_size(&self, device: &Path) -> Result<u64>;

  fn fs_stats(&self, path: &Path) -> Result<FsStats>;

  /// Ask udev to re-trigger device events so freshly attached disks show up.
  fn rescan(&self) -> Result<()>;

  fn path_state(&self, path: &Path) -> Result<PathState>;

  fn is_block_device(&self, path: &Path) -> Result<bool>;

  /// Create a directory and its parents.
  fn make_dir(&self, path: &Path) -> Result<()>;

  /// Create an empty file and its parent directories.
  fn make_file(&self, path: &Path) -> Result<()>;

  /// Remove a file or an empty directory. Missing paths are ignored.
  fn remove_path(&self, path: &Path) -> Result<()>;

  /// The device mounted at `mount_path` together with the number of mount
  /// points referencing that device.
  fn get_device_name_from_mount(&self, mount_path: &Path) -> Result<Option<(PathBuf, usize)>> {
    let mps = self.list()?;

    // If mount_path is a symlink the kernel lists the resolved path.
    let mount_path = fs::canonicalize(mount_path).unwrap_or_else(|_| mount_path.to_owned());

    Ok(
      mps
        .iter()
        .find(|m| m.matches(&mount_path))
        .map(|m| m.device().to_owned())
        .map(|device| {
          let ref_count = mps.iter().filter(|m| m.device() == device).count();
          (device, ref_count)
        }),
    )
  }

  /// Format `source` if it holds nothing and mount it at `target`. A device
  /// that is partitioned or carries a different filesystem is never
  /// touched.
  fn format_and_mount(
    &self,
    source: &Path,
    target: &Path,
    fstype: &str,
    options: &[String],
  ) -> Result<()> {
    match self.disk_format(source)? {
      DiskFormat::Unformatted => {
        if options.iter().any(|o| o == "ro") {
          return Err(MountError::UnformattedReadOnly(
            source.display().to_string(),
          ));
        }

        info!(
          "Disk {} appears to be unformatted, formatting as {}",
          source.display(),
          fstype
        );
        self.format(source, fstype)?;
      }
      DiskFormat::Partitioned => {
        return Err(MountError::Partitioned(source.display().to_string()));
      }
      DiskFormat::Filesystem(existing) if existing != fstype => {
        return Err(MountError::FilesystemMismatch {
          device: source.display().to_string(),
          existing,
          requested: fstype.to_owned(),
        });
      }
      DiskFormat::Filesystem(_) => (),
    }

    self.mount(source, target, fstype, options)
  }

  /// Grow the filesystem on `device` online. Returns false when the device
  /// holds no filesystem.
  fn resize(&self, device: &Path, mount_path: &Path) -> Result<bool> {
    match self.disk_format(device)? {
      DiskFormat::Filesystem(fstype) => {
        self.resize_fs(device, mount_path, &fstype)?;
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  /// Unmount `path` if it is a mount point and remove it. Missing paths are
  /// fine; corrupted mounts (stale NFS handles, disconnected fuse) are
  /// unmounted without probing.
  fn cleanup_mount_point(&self, path: &Path) -> Result<()> {
    match self.path_state(path)? {
      PathState::NotExists => {
        warn!("Cleanup of {} skipped, path does not exist", path.display());
        return Ok(());
      }
      PathState::Corrupted => {
        warn!("Corrupted mount point found at {}, unmounting", path.display());
        self.unmount(path)?;
      }
      PathState::Exists => {
        if !self.is_likely_not_mount_point(path)? {
          self.unmount(path)?;
        }
      }
    }

    self.remove_path(path)
  }
}

static DISPATCHER: OnceCell<MounterDispatcher> = OnceCell::new();

fn dispatcher() -> Result<&'static MounterDispatcher> {
  DISPATCHER
    .get_or_try_init(|| {
      let (sender, receiver) = crossbeam::channel::unbounded::<MounterMessage>();

      std::thread::Builder::new()
        .name("mount-utils:dispatch".into())
        .spawn(move || {
          while let Ok(msg) = receiver.recv() {
            let MounterMessage { span, run } = msg;
            let _enter = span.enter();
            if let Err(e) = catch_unwind(AssertUnwindSafe(run)) {
              error!("Failed to run mount function in dispatcher: {:?}", e);
            }
          }
        })
        .map(|_| sender)
    })
    .map_err(|e| MountError::new(format!("failed to spawn dispatcher: {:?}", e)))
}

/// Run `f` on the dispatcher thread inside the caller's span.
pub(crate) fn run<R, F>(f: F) -> impl Future<Output = Result<R>>
where
  F: FnOnce() -> Result<R> + Send + 'static,
  R: Send + 'static,
{
  let (sender, receiver) = oneshot();

  let sent = dispatcher().and_then(|dispatch| {
    dispatch
      .send(MounterMessage {
        span: Span::current(),
        run: Box::new(move || {
          let _ = sender.send(f());
        }),
      })
      .map_err(|_| MountError::new("mount dispatcher has stopped"))
  });

  async move {
    sent?;
    read(receiver).await
  }
}

pub(crate) fn run_inst<R, F>(mounter: Arc<dyn MounterImpl>, f: F) -> impl Future<Output = Result<R>>
where
  F: FnOnce(&dyn MounterImpl) -> Result<R> + Send + 'static,
  R: Send + 'static,
{
  run(move || f(&*mounter))
}

async fn read<R>(receiver: Receiver<Result<R>>) -> Result<R> {
  match receiver.await {
    Ok(r) => r,
    Err(_) => Err(MountError::new("request was cancelled (thread panicked?)")),
  }
}

/// Splits mount options for a bind mount. Bind mounts ignore most options,
/// so they are applied in a second `remount` pass:
///   bind:    bind [+ _netdev]
///   remount: bind, remount + options - bind
pub(crate) fn make_bind_opts(opts: &[String]) -> (bool, Vec<String>, Vec<String>) {
  let mut bind_remount_opts: Vec<String> = vec!["bind".into(), "remount".into()];
  let mut bind = false;
  let mut bind_opts: Vec<String> = vec!["bind".into()];

  for opt in opts {
    match opt.as_str() {
      "bind" => bind = true,
      // _netdev is a userspace option and is not carried over by the kernel.
      "_netdev" => {
        bind_opts.push(opt.clone());
        bind_remount_opts.push(opt.clone());
      }
      _ => bind_remount_opts.push(opt.clone()),
    }
  }

  (bind, bind_opts, bind_remount_opts)
}
