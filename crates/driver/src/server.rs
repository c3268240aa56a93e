use crate::{
  cli::{Endpoint, Mode},
  driver::Driver,
};
use futures::TryStreamExt;
use nix::unistd::{chown, Gid};
use std::{
  fs::{self, Permissions},
  future::Future,
  io,
  os::unix::fs::PermissionsExt,
  path::{Path, PathBuf},
  pin::Pin,
  sync::Arc,
  task::{Context, Poll},
};
use thiserror::Error;
use tokio::{
  io::{AsyncRead, AsyncWrite, ReadBuf},
  net::{TcpListener, UnixListener, UnixStream},
  signal::unix::{signal, SignalKind},
  sync::watch,
};
use tokio_stream::wrappers::{TcpListenerStream, UnixListenerStream};
use tonic::transport::{server::Connected, Server};
use tracing::{debug, info, warn};
use vpc_csi_proto::{controller_server, identity_server, node_server};

/// Root of the kubelet state directory.
pub const KUBELET_ROOT: &str = "/var/lib/kubelet";

const SOCKET_MODE: u32 = 0o660;

#[derive(Debug, Error)]
pub enum ServerError {
  #[error("failed to prepare socket {}: {source}", .path.display())]
  Socket {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("failed to bind {endpoint}: {source}")]
  Bind {
    endpoint: String,
    #[source]
    source: io::Error,
  },
  #[error(transparent)]
  Transport(#[from] tonic::transport::Error),
}

/// Unix socket connection tonic can serve on.
#[derive(Debug)]
struct UdsStream(UnixStream);

impl Connected for UdsStream {}

impl AsyncRead for UdsStream {
  fn poll_read(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
  ) -> Poll<io::Result<()>> {
    Pin::new(&mut self.0).poll_read(cx, buf)
  }
}

impl AsyncWrite for UdsStream {
  fn poll_write(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &[u8],
  ) -> Poll<io::Result<usize>> {
    Pin::new(&mut self.0).poll_write(cx, buf)
  }

  fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut self.0).poll_flush(cx)
  }

  fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut self.0).poll_shutdown(cx)
  }
}

/// Bind the CSI socket, replacing a stale one left by a previous run. The
/// socket is made group accessible so sidecars running under `group` can
/// connect.
pub fn bind_unix(path: &Path, group: Option<u32>) -> Result<UnixListener, ServerError> {
  let socket_err = |source| ServerError::Socket {
    path: path.to_owned(),
    source,
  };

  match fs::remove_file(path) {
    Ok(()) => debug!(path = %path.display(), "Removed stale socket"),
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(e) => return Err(socket_err(e)),
  }
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(socket_err)?;
  }

  let listener = UnixListener::bind(path).map_err(socket_err)?;
  fs::set_permissions(path, Permissions::from_mode(SOCKET_MODE)).map_err(socket_err)?;

  if let Some(gid) = group {
    if let Err(e) = chown(path, None, Some(Gid::from_raw(gid))) {
      warn!(path = %path.display(), gid, error = %e, "Failed to hand the socket to the sidecar group");
    }
  }

  Ok(listener)
}

/// Resolves once shutdown has been requested.
pub async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
  while !*shutdown.borrow() {
    if shutdown.changed().await.is_err() {
      return;
    }
  }
}

/// Resolves on SIGTERM or SIGINT.
pub async fn shutdown_signal() -> io::Result<()> {
  let mut sigterm = signal(SignalKind::terminate())?;
  tokio::select! {
    _ = sigterm.recv() => info!("SIGTERM received"),
    result = tokio::signal::ctrl_c() => {
      result?;
      info!("SIGINT received");
    }
  }
  Ok(())
}

async fn serve_on<I, IO, IE, F>(driver: Arc<Driver>, incoming: I, signal: F) -> Result<(), ServerError>
where
  I: futures::Stream<Item = Result<IO, IE>>,
  IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
  IE: Into<Box<dyn std::error::Error + Send + Sync>>,
  F: Future<Output = ()>,
{
  let identity = identity_server(driver.clone());
  let mut server = Server::builder();

  match driver.mode() {
    Mode::Controller => {
      server
        .add_service(identity)
        .add_service(controller_server(driver.clone()))
        .serve_with_incoming_shutdown(incoming, signal)
        .await?
    }
    Mode::Node => {
      server
        .add_service(identity)
        .add_service(node_server(driver.clone()))
        .serve_with_incoming_shutdown(incoming, signal)
        .await?
    }
    Mode::All => {
      server
        .add_service(identity)
        .add_service(controller_server(driver.clone()))
        .add_service(node_server(driver.clone()))
        .serve_with_incoming_shutdown(incoming, signal)
        .await?
    }
  }

  Ok(())
}

/// Serve the services of the driver's mode on `endpoint` until shutdown.
pub async fn serve(
  driver: Arc<Driver>,
  endpoint: &Endpoint,
  socket_group: Option<u32>,
  shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
  info!(%endpoint, mode = ?driver.mode(), "Serving CSI");

  match endpoint {
    Endpoint::Unix(path) => {
      let listener = bind_unix(path, socket_group)?;
      let incoming = UnixListenerStream::new(listener).map_ok(UdsStream);
      serve_on(driver, incoming, wait_for_shutdown(shutdown)).await?;
    }
    Endpoint::Tcp(addr) => {
      let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
          endpoint: endpoint.to_string(),
          source,
        })?;
      let incoming = TcpListenerStream::new(listener);
      serve_on(driver, incoming, wait_for_shutdown(shutdown)).await?;
    }
  }

  info!("CSI server stopped");
  Ok(())
}

/// Remove the socket and the plugin directories kubelet knows the driver
/// by. Failures are logged.
pub fn cleanup(endpoint: &Endpoint, driver_name: &str, kubelet_root: &Path) {
  if let Endpoint::Unix(path) = endpoint {
    remove(path, fs::remove_file(path));
  }

  let plugins = kubelet_root.join("plugins");
  let dirs = [
    plugins.join(driver_name),
    plugins.join("kubernetes.io").join("csi").join(driver_name),
  ];
  for dir in &dirs {
    remove(dir, fs::remove_dir_all(dir));
  }
}

fn remove(path: &Path, result: io::Result<()>) {
  match result {
    Ok(()) => info!(path = %path.display(), "Removed"),
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove"),
  }
}
