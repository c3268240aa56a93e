//! Provider configuration.
//!
//! Settings come from the storage secret store (TOML) and, optionally, the
//! cloud credentials file of `KEY=VALUE` lines. Gen2 (`g2_`) keys of the
//! `[VPC]` section override their base counterparts.

use crate::iam::Credential;
use serde::Deserialize;
use std::{
  collections::HashMap,
  fs, io,
  path::{Path, PathBuf},
  time::Duration,
};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_API_VERSION: &str = "2021-04-20";
pub const DEFAULT_IAM_URL: &str = "https://iam.cloud.ibm.com";
pub const DEFAULT_TOKEN_PATH: &str = "/var/run/secrets/tokens/vault-token";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_MAX_RETRY_ATTEMPT: u32 = 10;
const DEFAULT_MAX_RETRY_GAP: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
  #[error("invalid value for {key}: {message}")]
  Invalid { key: &'static str, message: String },
  #[error("missing required setting {0}")]
  Missing(&'static str),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SecretStore {
  #[serde(rename = "VPC")]
  pub vpc: VpcSection,
  #[serde(rename = "Bluemix")]
  pub bluemix: BluemixSection,
  #[serde(rename = "Softlayer")]
  pub softlayer: SoftlayerSection,
  #[serde(rename = "Server")]
  pub server: ServerSection,
  #[serde(rename = "IKS")]
  pub iks: IksSection,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct VpcSection {
  pub enabled: Option<bool>,
  pub endpoint_url: String,
  pub g2_riaas_endpoint_url: String,
  pub api_key: String,
  pub g2_api_key: String,
  pub resource_group_id: String,
  pub g2_resource_group_id: String,
  pub api_version: String,
  pub g2_api_version: String,
  pub token_exchange_endpoint_url: String,
  pub g2_token_exchange_endpoint_url: String,
  pub iks_token_exchange_endpoint_private_url: String,
  pub vpc_timeout: String,
  pub max_retry_attempt: Option<u32>,
  pub max_retry_gap: Option<u64>,
  pub account_id: String,
  pub region: String,
}

impl std::fmt::Debug for VpcSection {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("VpcSection")
      .field("endpoint_url", &self.endpoint_url)
      .field("g2_riaas_endpoint_url", &self.g2_riaas_endpoint_url)
      .field("resource_group_id", &self.resource_group_id)
      .field("g2_resource_group_id", &self.g2_resource_group_id)
      .field("api_version", &self.api_version)
      .field("g2_api_version", &self.g2_api_version)
      .finish()
  }
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct BluemixSection {
  pub iam_url: String,
  pub iam_api_key: String,
  pub containers_api_route: String,
}

impl std::fmt::Debug for BluemixSection {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BluemixSection")
      .field("iam_url", &self.iam_url)
      .field("containers_api_route", &self.containers_api_route)
      .finish()
  }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SoftlayerSection {
  pub softlayer_block_enabled: bool,
  pub softlayer_endpoint_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerSection {
  pub debug_trace: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IksSection {
  pub iks_enabled: bool,
  pub cluster_id: String,
  pub endpoint_url: String,
}

/// Storage service endpoint that brokers attachments for managed clusters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IksSettings {
  pub cluster_id: String,
  pub endpoint_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
  pub endpoint_url: String,
  pub api_version: String,
  pub generation: u8,
  pub resource_group_id: String,
  /// As configured. A private endpoint fails over to its public twin.
  pub iam_url: String,
  pub credential: Credential,
  pub http_timeout: Duration,
  pub max_retry_attempt: u32,
  pub max_retry_gap: Duration,
  pub iks: Option<IksSettings>,
  pub account_id: String,
  pub region: String,
  pub debug_trace: bool,
}

fn pick(g2: &str, base: &str) -> String {
  if g2.is_empty() {
    base.to_owned()
  } else {
    g2.to_owned()
  }
}

/// Parses `120s`, `2m` or a plain number of seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
  let value = value.trim();
  let (digits, scale) = if let Some(v) = value.strip_suffix("ms") {
    return v.trim().parse().ok().map(Duration::from_millis);
  } else if let Some(v) = value.strip_suffix('s') {
    (v, 1)
  } else if let Some(v) = value.strip_suffix('m') {
    (v, 60)
  } else {
    (value, 1)
  };

  digits
    .trim()
    .parse::<u64>()
    .ok()
    .map(|n| Duration::from_secs(n * scale))
}

/// Parses the credentials file format: `KEY=VALUE` lines with `#` comments
/// and optional quotes.
pub fn parse_credentials(content: &str) -> HashMap<String, String> {
  content
    .lines()
    .map(str::trim)
    .filter(|l| !l.is_empty() && !l.starts_with('#'))
    .filter_map(|l| {
      let mut parts = l.splitn(2, '=');
      let key = parts.next()?.trim();
      let value = parts.next()?.trim().trim_matches(|c| c == '"' || c == '\'');
      Some((key.to_owned(), value.to_owned()))
    })
    .collect()
}

impl SecretStore {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_owned(),
      source,
    })?;

    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_owned(),
      source,
    })
  }

  /// Resolve session settings. `credentials` are the parsed credentials
  /// file, whose values win over the api keys of the store.
  pub fn session_settings(
    &self,
    credentials: &HashMap<String, String>,
    token_path: &Path,
  ) -> Result<SessionSettings, ConfigError> {
    let vpc = &self.vpc;

    let endpoint_url = pick(&vpc.g2_riaas_endpoint_url, &vpc.endpoint_url);
    if endpoint_url.is_empty() {
      return Err(ConfigError::Missing("VPC.g2_riaas_endpoint_url"));
    }

    let api_version = match pick(&vpc.g2_api_version, &vpc.api_version) {
      v if v.is_empty() => DEFAULT_API_VERSION.to_owned(),
      v => v,
    };

    let iam_url = [
      vpc.iks_token_exchange_endpoint_private_url.as_str(),
      vpc.g2_token_exchange_endpoint_url.as_str(),
      vpc.token_exchange_endpoint_url.as_str(),
      self.bluemix.iam_url.as_str(),
    ]
    .iter()
    .find(|u| !u.is_empty())
    .map_or_else(|| DEFAULT_IAM_URL.to_owned(), |u| (*u).to_owned());

    let credential = self.credential(credentials, token_path)?;

    let http_timeout = if vpc.vpc_timeout.is_empty() {
      DEFAULT_TIMEOUT
    } else {
      parse_duration(&vpc.vpc_timeout).ok_or_else(|| ConfigError::Invalid {
        key: "VPC.vpc_timeout",
        message: format!("'{}' is not a duration", vpc.vpc_timeout),
      })?
    };

    let iks = if self.iks.iks_enabled {
      let endpoint_url = pick(&self.iks.endpoint_url, &self.bluemix.containers_api_route);
      if endpoint_url.is_empty() {
        return Err(ConfigError::Missing("IKS.endpoint_url"));
      }
      Some(IksSettings {
        cluster_id: self.iks.cluster_id.clone(),
        endpoint_url,
      })
    } else {
      None
    };

    let settings = SessionSettings {
      endpoint_url,
      api_version,
      generation: 2,
      resource_group_id: pick(&vpc.g2_resource_group_id, &vpc.resource_group_id),
      iam_url,
      credential,
      http_timeout,
      max_retry_attempt: vpc.max_retry_attempt.unwrap_or(DEFAULT_MAX_RETRY_ATTEMPT),
      max_retry_gap: vpc
        .max_retry_gap
        .map_or(DEFAULT_MAX_RETRY_GAP, Duration::from_secs),
      iks,
      account_id: vpc.account_id.clone(),
      region: vpc.region.clone(),
      debug_trace: self.server.debug_trace,
    };

    debug!(?settings, "Resolved provider session settings");
    Ok(settings)
  }

  fn credential(
    &self,
    credentials: &HashMap<String, String>,
    token_path: &Path,
  ) -> Result<Credential, ConfigError> {
    let auth_type = credentials
      .get("IBMCLOUD_AUTHTYPE")
      .map(|s| s.to_ascii_uppercase());

    match auth_type.as_deref() {
      Some("PODIDENTITY") => {
        let profile_id = credentials
          .get("IBMCLOUD_PROFILEID")
          .filter(|p| !p.is_empty())
          .ok_or(ConfigError::Missing("IBMCLOUD_PROFILEID"))?;
        return Ok(Credential::ComputeIdentity {
          profile_id: profile_id.clone(),
          token_path: token_path.to_owned(),
        });
      }
      Some("IAM") | None => (),
      Some(other) => {
        return Err(ConfigError::Invalid {
          key: "IBMCLOUD_AUTHTYPE",
          message: format!("'{}' is not one of IAM, PODIDENTITY", other),
        })
      }
    }

    let api_key = credentials
      .get("IBMCLOUD_APIKEY")
      .filter(|k| !k.is_empty())
      .cloned()
      .unwrap_or_else(|| {
        [&self.vpc.g2_api_key, &self.vpc.api_key, &self.bluemix.iam_api_key]
          .iter()
          .find(|k| !k.is_empty())
          .map(|k| (*k).clone())
          .unwrap_or_default()
      });

    if api_key.is_empty() {
      return Err(ConfigError::Missing("VPC.g2_api_key"));
    }

    Ok(Credential::ApiKey(api_key))
  }
}

/// Load the secret store and the optional credentials file.
pub fn load(
  config_path: &Path,
  credentials_path: Option<&Path>,
  token_path: &Path,
) -> Result<SessionSettings, ConfigError> {
  let store = SecretStore::load(config_path)?;

  let credentials = match credentials_path {
    Some(path) => match fs::read_to_string(path) {
      Ok(content) => parse_credentials(&content),
      Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
      Err(source) => {
        return Err(ConfigError::Read {
          path: path.to_owned(),
          source,
        })
      }
    },
    None => HashMap::new(),
  };

  store.session_settings(&credentials, token_path)
}
