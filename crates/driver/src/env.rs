use std::{path::PathBuf, time::Duration};
use tracing::warn;
use vpc_block_provider::config::DEFAULT_TOKEN_PATH;

const DEFAULT_SNAPSHOT_CREATE_DELAY: u64 = 300;
const MAX_SNAPSHOT_CREATE_DELAY: u64 = 900;

/// Process environment the driver reads once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverEnv {
  /// `KUBE_NODE_NAME`, the node id reported by `NodeGetInfo`.
  pub node_name: Option<String>,
  pub node_region: Option<String>,
  pub node_zone: Option<String>,
  pub pod_name: Option<String>,
  pub iks_enabled: bool,
  pub snapshot_enabled: bool,
  /// Pause after a failed snapshot creation.
  pub snapshot_create_delay: Duration,
  /// Group owning the gRPC socket.
  pub sidecar_group_id: Option<u32>,
  pub vault_token_path: PathBuf,
  pub cluster_id: Option<String>,
}

impl Default for DriverEnv {
  fn default() -> Self {
    DriverEnv {
      node_name: None,
      node_region: None,
      node_zone: None,
      pod_name: None,
      iks_enabled: false,
      snapshot_enabled: true,
      snapshot_create_delay: Duration::from_secs(DEFAULT_SNAPSHOT_CREATE_DELAY),
      sidecar_group_id: None,
      vault_token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
      cluster_id: None,
    }
  }
}

fn flag(value: Option<String>, default: bool) -> bool {
  match value.as_deref().map(str::trim) {
    None | Some("") => default,
    Some(v) => v.eq_ignore_ascii_case("true"),
  }
}

impl DriverEnv {
  pub fn from_env() -> Self {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
    let text = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

    let snapshot_create_delay = match text("CUSTOM_SNAPSHOT_CREATE_DELAY") {
      None => DEFAULT_SNAPSHOT_CREATE_DELAY,
      Some(v) => match v.parse::<i64>() {
        Ok(secs) => secs.max(0).min(MAX_SNAPSHOT_CREATE_DELAY as i64) as u64,
        Err(_) => {
          warn!(value = %v, "Ignoring invalid CUSTOM_SNAPSHOT_CREATE_DELAY");
          DEFAULT_SNAPSHOT_CREATE_DELAY
        }
      },
    };

    let sidecar_group_id = text("SIDECAR_GROUP_ID").and_then(|v| match v.parse() {
      Ok(gid) => Some(gid),
      Err(_) => {
        warn!(value = %v, "Ignoring invalid SIDECAR_GROUP_ID");
        None
      }
    });

    DriverEnv {
      node_name: text("KUBE_NODE_NAME"),
      node_region: text("KUBE_NODE_REGION"),
      node_zone: text("KUBE_NODE_ZONE"),
      pod_name: text("POD_NAME"),
      iks_enabled: flag(lookup("IKS_ENABLED"), false),
      snapshot_enabled: flag(lookup("IS_SNAPSHOT_ENABLED"), true),
      snapshot_create_delay: Duration::from_secs(snapshot_create_delay),
      sidecar_group_id,
      vault_token_path: text("IBMC_VAULT_TOKEN_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_PATH)),
      cluster_id: text("CLUSTER_ID"),
    }
  }

  /// The PV reconciler runs in the controller pod of managed clusters.
  pub fn reconciler_enabled(&self) -> bool {
    self.iks_enabled
      && self
        .pod_name
        .as_deref()
        .map_or(false, |pod| pod.contains("controller"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;
  use test_case::test_case;

  fn env(pairs: &[(&str, &str)]) -> DriverEnv {
    let vars: HashMap<String, String> = pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    DriverEnv::from_lookup(|k| vars.get(k).cloned())
  }

  #[test]
  fn defaults() {
    assert_eq!(env(&[]), DriverEnv::default());
  }

  #[test_case("120", 120)]
  #[test_case("0", 0)]
  #[test_case("-5", 0)]
  #[test_case("5000", 900)]
  #[test_case("soon", 300)]
  fn snapshot_delay(value: &str, secs: u64) {
    assert_eq!(
      env(&[("CUSTOM_SNAPSHOT_CREATE_DELAY", value)]).snapshot_create_delay,
      Duration::from_secs(secs)
    );
  }

  #[test_case("false", false)]
  #[test_case("FALSE", false ; "uppercase_false")]
  #[test_case("true", true)]
  #[test_case("", true)]
  fn snapshot_flag(value: &str, enabled: bool) {
    assert_eq!(
      env(&[("IS_SNAPSHOT_ENABLED", value)]).snapshot_enabled,
      enabled
    );
  }

  #[test_case("True", "ibm-vpc-block-csi-controller-0", true)]
  #[test_case("false", "ibm-vpc-block-csi-controller-0", false)]
  #[test_case("true", "ibm-vpc-block-csi-node-x7k2p", false)]
  fn reconciler(iks: &str, pod: &str, enabled: bool) {
    assert_eq!(
      env(&[("IKS_ENABLED", iks), ("POD_NAME", pod)]).reconciler_enabled(),
      enabled
    );
  }

  #[test]
  fn node_identity() {
    let e = env(&[
      ("KUBE_NODE_NAME", "10.240.0.4"),
      ("KUBE_NODE_ZONE", "us-south-1"),
      ("KUBE_NODE_REGION", "us-south"),
      ("SIDECAR_GROUP_ID", "2121"),
    ]);
    assert_eq!(e.node_name.as_deref(), Some("10.240.0.4"));
    assert_eq!(e.node_zone.as_deref(), Some("us-south-1"));
    assert_eq!(e.node_region.as_deref(), Some("us-south"));
    assert_eq!(e.sidecar_group_id, Some(2121));
  }
}
