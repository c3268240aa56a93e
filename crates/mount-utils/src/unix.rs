use crate::{
  runner::{make_bind_opts, MounterImpl},
  DiskFormat, FsStats, MountError, MountPoint, PathState, Result,
};
use duct::cmd;
use smallvec::SmallVec;
use std::{
  ffi::CString,
  fmt::Write,
  fs, io,
  mem::MaybeUninit,
  num::NonZeroUsize,
  os::unix::{
    ffi::OsStrExt,
    fs::{FileTypeExt, MetadataExt},
  },
  path::{Path, PathBuf},
};
use tracing::{debug, error, info, warn};
use which::which;

const PROC_MOUNTS_PATH: &str = "/proc/mounts";
const MAX_LIST_TRIES: NonZeroUsize = unsafe { NonZeroUsize::new_unchecked(3) };
const EXPECTED_FIELDS_PER_MOUNTS_LINE: usize = 6;

/// Exit code of `blkid -p` when the device carries no recognizable
/// signature.
const BLKID_NOTHING_FOUND: i32 = 2;

pub struct OsMounter {
  mount_cmd: PathBuf,
}

impl OsMounter {
  pub fn new() -> Self {
    OsMounter {
      mount_cmd: PathBuf::from("mount"),
    }
  }

  fn do_mount(
    &self,
    source: &Path,
    target: &Path,
    fstype: &str,
    options: &[String],
  ) -> Result<()> {
    let (mount_args, log_str) = make_mount_args(source, target, fstype, options);

    info!(
      "Mounting cmd {} with arguments ({})",
      self.mount_cmd.display(),
      log_str
    );
    match cmd(&self.mount_cmd, mount_args).stderr_to_stdout().read() {
      Ok(_) => Ok(()),
      Err(e) => {
        error!("Mount failed: {:?}", e);
        Err(e.into())
      }
    }
  }
}

impl Default for OsMounter {
  fn default() -> Self {
    Self::new()
  }
}

impl MounterImpl for OsMounter {
  fn mount(&self, source: &Path, target: &Path, fstype: &str, options: &[String]) -> Result<()> {
    let (bind, bind_opts, bind_remount_opts) = make_bind_opts(options);
    if bind {
      self.do_mount(source, target, fstype, &bind_opts)?;
      return self.do_mount(source, target, fstype, &bind_remount_opts);
    }

    self.do_mount(source, target, fstype, options)
  }

  fn unmount(&self, target: &Path) -> Result<()> {
    info!("Unmounting {}", target.display());
    cmd!("umount", target).stderr_to_stdout().read()?;
    Ok(())
  }

  fn list(&self) -> Result<Vec<MountPoint>> {
    list_proc_mounts(Path::new(PROC_MOUNTS_PATH))
  }

  fn is_likely_not_mount_point(&self, file: &Path) -> Result<bool> {
    let stat = fs::metadata(file)?;
    let parent = file
      .parent()
      .ok_or_else(|| MountError::new("file does not have parent"))?;
    let parent_stat = fs::metadata(parent)?;
    // If the directory has a different device as parent, then it is a mountpoint.
    if stat.dev() != parent_stat.dev() {
      return Ok(false);
    }

    Ok(true)
  }

  fn disk_format(&self, device: &Path) -> Result<DiskFormat> {
    let output = cmd!(
      "blkid", "-p", "-s", "TYPE", "-s", "PTTYPE", "-o", "export", device
    )
    .stderr_to_stdout()
    .stdout_capture()
    .unchecked()
    .run()?;

    match output.status.code() {
      Some(0) => (),
      Some(BLKID_NOTHING_FOUND) => return Ok(DiskFormat::Unformatted),
      _ => {
        return Err(MountError::GetDiskFormatFailed {
          device: device.display().to_string(),
          message: String::from_utf8_lossy(&output.stdout).trim().to_owned(),
        })
      }
    }

    Ok(parse_blkid_export(&String::from_utf8_lossy(&output.stdout)))
  }

  fn format(&self, device: &Path, fstype: &str) -> Result<()> {
    let mkfs = which(format!("mkfs.{}", fstype)).map_err(|e| MountError::FormatFailed {
      device: device.display().to_string(),
      fs_type: fstype.to_owned(),
      message: e.to_string(),
    })?;

    let args = mkfs_args(device, fstype);
    info!("Formatting {} as {}", device.display(), fstype);
    cmd(mkfs, args)
      .stderr_to_stdout()
      .read()
      .map_err(|e| MountError::FormatFailed {
        device: device.display().to_string(),
        fs_type: fstype.to_owned(),
        message: e.to_string(),
      })?;

    Ok(())
  }

  fn resize_fs(&self, device: &Path, mount_path: &Path, fstype: &str) -> Result<()> {
    let resize = match fstype {
      "ext3" | "ext4" => cmd!("resize2fs", device),
      "xfs" => cmd!("xfs_growfs", "-d", mount_path),
      other => {
        return Err(MountError::ResizeFailed {
          device: device.display().to_string(),
          message: format!("resizing {} is not supported", other),
        })
      }
    };

    info!("Resizing {} ({}) at {}", device.display(), fstype, mount_path.display());
    resize
      .stderr_to_stdout()
      .read()
      .map_err(|e| MountError::ResizeFailed {
        device: device.display().to_string(),
        message: e.to_string(),
      })?;

    Ok(())
  }

  fn block_size(&self, device: &Path) -> Result<u64> {
    let out = cmd!("blockdev", "--getsize64", device).read()?;
    out
      .trim()
      .parse()
      .map_err(|e| MountError::new(format!("invalid block size {:?}: {}", out.trim(), e)))
  }

  fn fs_stats(&self, path: &Path) -> Result<FsStats> {
    let c_path = CString::new(path.as_os_str().as_bytes())
      .map_err(|_| MountError::new("path contains a nul byte"))?;

    let mut stat = MaybeUninit::<libc::statvfs>::uninit();
    // SAFETY: c_path is nul terminated and stat is only read on success.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
      return Err(io::Error::last_os_error().into());
    }
    let stat = unsafe { stat.assume_init() };

    let frsize = stat.f_frsize as u64;
    let total_bytes = stat.f_blocks as u64 * frsize;
    let available_bytes = stat.f_bavail as u64 * frsize;
    let used_bytes = (stat.f_blocks as u64 - stat.f_bfree as u64) * frsize;
    let total_inodes = stat.f_files as u64;
    let free_inodes = stat.f_ffree as u64;

    Ok(FsStats {
      total_bytes,
      available_bytes,
      used_bytes,
      total_inodes,
      free_inodes,
      used_inodes: total_inodes.saturating_sub(free_inodes),
    })
  }

  fn rescan(&self) -> Result<()> {
    debug!("Triggering udev rescan");
    cmd!("udevadm", "trigger").stderr_to_stdout().read()?;
    Ok(())
  }

  fn path_state(&self, path: &Path) -> Result<PathState> {
    Ok(path_state(path)?)
  }

  fn is_block_device(&self, path: &Path) -> Result<bool> {
    Ok(fs::metadata(path)?.file_type().is_block_device())
  }

  fn make_dir(&self, path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
  }

  fn make_file(&self, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }

    fs::OpenOptions::new()
      .create(true)
      .write(true)
      .open(path)?;
    Ok(())
  }

  fn remove_path(&self, path: &Path) -> Result<()> {
    let result = match fs::symlink_metadata(path) {
      Ok(meta) if meta.is_dir() => fs::remove_dir(path),
      Ok(_) => fs::remove_file(path),
      Err(e) => Err(e),
    };

    match result {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        warn!("{} already removed", path.display());
        Ok(())
      }
      Err(e) => Err(e.into()),
    }
  }
}

/// Arguments for mount(8):
///   mount [-t $fstype] [-o $options] $source $target
fn make_mount_args(
  source: &Path,
  target: &Path,
  fstype: &str,
  options: &[String],
) -> (Vec<String>, String) {
  let mut mount_args: Vec<String> = Vec::new();
  let mut log_str = String::new();

  if !fstype.is_empty() {
    mount_args.push("-t".into());
    mount_args.push(fstype.to_owned());
    let _ = write!(log_str, "-t {}", fstype);
  }

  if !options.is_empty() {
    let arg = options.join(",");
    mount_args.push("-o".into());
    let _ = write!(log_str, " -o {}", arg);
    mount_args.push(arg);
  }

  mount_args.push(source.display().to_string());
  let _ = write!(log_str, " {}", source.display());

  mount_args.push(target.display().to_string());
  let _ = write!(log_str, " {}", target.display());

  (mount_args, log_str)
}

fn mkfs_args(device: &Path, fstype: &str) -> Vec<String> {
  let device = device.display().to_string();
  match fstype {
    // -F forces on a whole device, -m0 reserves no blocks for root.
    "ext3" | "ext4" => vec!["-F".into(), "-m0".into(), device],
    "xfs" => vec!["-f".into(), device],
    _ => vec![device],
  }
}

fn parse_blkid_export(output: &str) -> DiskFormat {
  let mut fs_type = None;
  let mut pt_type = None;

  for line in output.lines() {
    let mut parts = line.splitn(2, '=');
    match (parts.next(), parts.next()) {
      (Some("TYPE"), Some(v)) if !v.is_empty() => fs_type = Some(v.to_owned()),
      (Some("PTTYPE"), Some(v)) if !v.is_empty() => pt_type = Some(v.to_owned()),
      _ => (),
    }
  }

  match (fs_type, pt_type) {
    (Some(fs), _) => DiskFormat::Filesystem(fs),
    (None, Some(_)) => DiskFormat::Partitioned,
    (None, None) => DiskFormat::Unformatted,
  }
}

fn list_proc_mounts(mount_file_path: &Path) -> Result<Vec<MountPoint>> {
  let content = consistent_read(mount_file_path, MAX_LIST_TRIES)?;

  parse_proc_mounts(&content)
}

/// Repeatedly reads a file until it gets the same content twice. Files in
/// /proc larger than a page may change between read() calls.
fn consistent_read(path: &Path, attempts: NonZeroUsize) -> io::Result<Vec<u8>> {
  let mut old_content = fs::read(path)?;

  for _ in 0..attempts.get() {
    let new_content = fs::read(path)?;
    if new_content == old_content {
      return Ok(new_content);
    }

    old_content = new_content;
  }

  Err(io::Error::new(
    io::ErrorKind::Other,
    format!(
      "could not get consistent content of '{}' after {} attempts",
      path.display(),
      attempts.get()
    ),
  ))
}

fn parse_proc_mounts(content: &[u8]) -> Result<Vec<MountPoint>> {
  let mut out = Vec::new();
  let s = std::str::from_utf8(content)
    .map_err(|_| MountError::new("proc mounts contain invalid UTF8"))?;
  for line in s.lines() {
    if line.is_empty() {
      continue;
    }

    let fields = line
      .split_whitespace()
      .collect::<SmallVec<[&str; EXPECTED_FIELDS_PER_MOUNTS_LINE]>>();
    if fields.len() != EXPECTED_FIELDS_PER_MOUNTS_LINE {
      return Err(MountError::new(format!(
        "wrong number of fields (expected {}, got {})",
        EXPECTED_FIELDS_PER_MOUNTS_LINE,
        fields.len()
      )));
    }

    let opts = fields[3].split(',').map(ToOwned::to_owned).collect();
    let freq = fields[4]
      .parse()
      .map_err(|e| MountError::new(format!("invalid freq: {:?}", e)))?;
    let pass = fields[5]
      .parse()
      .map_err(|e| MountError::new(format!("invalid pass: {:?}", e)))?;

    out.push(MountPoint {
      device: fields[0].into(),
      path: fields[1].into(),
      ty: fields[2].to_owned(),
      opts,
      freq,
      pass,
    })
  }

  Ok(out)
}

fn path_state(path: &Path) -> io::Result<PathState> {
  match path.metadata() {
    Ok(_) => Ok(PathState::Exists),
    Err(e) => match e.raw_os_error() {
      None => Err(e),
      Some(code) => match code {
        libc::ENOENT => Ok(PathState::NotExists),
        libc::ENOTCONN | libc::ESTALE | libc::EIO | libc::EACCES => Ok(PathState::Corrupted),
        _ => Err(e),
      },
    },
  }
}
