use clap::{Parser, ValueEnum};
use std::{fmt, net::SocketAddr, path::PathBuf, str::FromStr};

pub const DEFAULT_DRIVER_NAME: &str = "vpc.block.csi.ibm.io";

/// Which gRPC services this process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
  Controller,
  Node,
  All,
}

impl Mode {
  pub fn serves_controller(self) -> bool {
    matches!(self, Mode::Controller | Mode::All)
  }

  pub fn serves_node(self) -> bool {
    matches!(self, Mode::Node | Mode::All)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
  Text,
  Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
  Unix(PathBuf),
  Tcp(SocketAddr),
}

impl FromStr for Endpoint {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    if let Some(path) = s.strip_prefix("unix://").or_else(|| s.strip_prefix("unix:")) {
      if path.is_empty() {
        return Err(format!("endpoint {:?} has no socket path", s));
      }
      return Ok(Endpoint::Unix(PathBuf::from(path)));
    }

    if let Some(addr) = s.strip_prefix("tcp://").or_else(|| s.strip_prefix("tcp:")) {
      return addr
        .parse()
        .map(Endpoint::Tcp)
        .map_err(|e| format!("endpoint {:?}: {}", s, e));
    }

    Err(format!(
      "endpoint {:?} must start with unix: or tcp:",
      s
    ))
  }
}

impl fmt::Display for Endpoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
      Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
    }
  }
}

/// VPC block storage CSI driver.
#[derive(Debug, Parser)]
#[command(name = "vpc-block-csi-driver", version)]
pub struct Cli {
  /// gRPC endpoint, `unix:/path/to/csi.sock` or `tcp:host:port`.
  #[arg(long, env = "CSI_ENDPOINT", default_value = "unix:/tmp/csi.sock")]
  pub endpoint: Endpoint,

  /// Address the metrics listener binds to.
  #[arg(long, env = "METRICS_ADDRESS", default_value = "0.0.0.0:9080")]
  pub metrics_address: SocketAddr,

  #[arg(long, env = "CSI_MODE", value_enum, default_value_t = Mode::All)]
  pub mode: Mode,

  #[arg(long, env = "CSI_DRIVER_NAME", default_value = DEFAULT_DRIVER_NAME)]
  pub driver_name: String,

  /// Provider configuration file.
  #[arg(
    long,
    env = "SECRET_CONFIG_PATH",
    default_value = "/etc/storage_ibmc/slclient.toml"
  )]
  pub config: PathBuf,

  /// Credentials file overriding the api keys of the configuration.
  #[arg(long, env = "IBM_CREDENTIALS_FILE")]
  pub credentials: Option<PathBuf>,

  #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
  pub log_format: LogFormat,
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  #[test_case("unix:/csi/csi.sock", Endpoint::Unix("/csi/csi.sock".into()))]
  #[test_case("unix:///csi/csi.sock", Endpoint::Unix("/csi/csi.sock".into()) ; "unix_triple_slash")]
  #[test_case("tcp:127.0.0.1:10000", Endpoint::Tcp("127.0.0.1:10000".parse().unwrap()))]
  #[test_case("tcp://0.0.0.0:9000", Endpoint::Tcp("0.0.0.0:9000".parse().unwrap()))]
  fn endpoints(value: &str, expected: Endpoint) {
    assert_eq!(value.parse::<Endpoint>().unwrap(), expected);
  }

  #[test_case("unix:")]
  #[test_case("tcp:localhost")]
  #[test_case("/csi/csi.sock")]
  fn bad_endpoints(value: &str) {
    assert!(value.parse::<Endpoint>().is_err());
  }

  #[test]
  fn parses_flags() {
    let cli = Cli::try_parse_from(&[
      "vpc-block-csi-driver",
      "--endpoint",
      "tcp:127.0.0.1:10000",
      "--mode",
      "node",
      "--metrics-address",
      "127.0.0.1:9080",
      "--log-format",
      "json",
    ])
    .unwrap();

    assert_eq!(cli.endpoint, Endpoint::Tcp("127.0.0.1:10000".parse().unwrap()));
    assert_eq!(cli.mode, Mode::Node);
    assert_eq!(cli.log_format, LogFormat::Json);
    assert!(cli.mode.serves_node());
    assert!(!cli.mode.serves_controller());
  }

  #[test]
  fn metrics_address_must_be_a_socket_address() {
    let err = Cli::try_parse_from(&[
      "vpc-block-csi-driver",
      "--metrics-address",
      "localhost",
    ]);
    assert!(err.is_err());
  }
}
