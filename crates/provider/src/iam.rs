//! IAM access tokens.

use crate::{
  error::BackendError,
  transport::{HttpRequest, HttpTransport, Method},
};
use serde::Deserialize;
use std::{fmt, path::PathBuf, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, instrument, warn};

const APIKEY_GRANT: &str = "urn:ibm:params:oauth:grant-type:apikey";
const CR_TOKEN_GRANT: &str = "urn:ibm:params:oauth:grant-type:cr-token";

/// Tokens this close to expiry are refreshed.
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
  ApiKey(String),
  /// Compute resource identity: a trusted profile id and the file holding
  /// the projected compute resource token.
  ComputeIdentity {
    profile_id: String,
    token_path: PathBuf,
  },
}

impl fmt::Debug for Credential {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Credential::ApiKey(_) => f.debug_tuple("ApiKey").field(&"<redacted>").finish(),
      Credential::ComputeIdentity {
        profile_id,
        token_path,
      } => f
        .debug_struct("ComputeIdentity")
        .field("profile_id", profile_id)
        .field("token_path", token_path)
        .finish(),
    }
  }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
  access_token: String,
  expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct IamErrorBody {
  #[serde(rename = "errorCode", default)]
  error_code: String,
  #[serde(rename = "errorMessage", default)]
  error_message: String,
}

struct CachedToken {
  access_token: String,
  expires_at: Instant,
}

/// Caches the last token and refreshes it on demand. The cache lock is held
/// while fetching so concurrent callers share one refresh.
pub struct TokenManager {
  transport: Arc<dyn HttpTransport>,
  credential: Credential,
  iam_url: String,
  cache: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for TokenManager {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TokenManager")
      .field("credential", &self.credential)
      .field("iam_url", &self.iam_url)
      .finish()
  }
}

/// `https://private.iam.cloud.ibm.com` becomes `https://iam.cloud.ibm.com`.
/// Returns `None` for an endpoint that is not private.
pub fn public_iam_url(url: &str) -> Option<String> {
  let (scheme, host) = match url.find("://") {
    Some(pos) => (&url[..pos + 3], &url[pos + 3..]),
    None => ("", url),
  };

  host
    .strip_prefix("private.")
    .map(|rest| format!("{}{}", scheme, rest))
}

impl TokenManager {
  pub fn new(transport: Arc<dyn HttpTransport>, credential: Credential, iam_url: impl Into<String>) -> Self {
    TokenManager {
      transport,
      credential,
      iam_url: iam_url.into(),
      cache: Mutex::new(None),
    }
  }

  /// A token valid for at least the refresh margin.
  #[instrument(level = "debug", skip(self))]
  pub async fn token(&self) -> Result<String, BackendError> {
    let mut cache = self.cache.lock().await;
    if let Some(cached) = &*cache {
      if cached.expires_at > Instant::now() + REFRESH_MARGIN {
        return Ok(cached.access_token.clone());
      }
      debug!("Cached IAM token is about to expire, refreshing");
    }

    let fresh = match self.fetch(&self.iam_url).await {
      Err(e) if e.is_timeout() => match public_iam_url(&self.iam_url) {
        Some(public) => {
          warn!(error = %e, %public, "Private IAM endpoint timed out, trying public endpoint");
          self.fetch(&public).await?
        }
        None => return Err(e),
      },
      other => other?,
    };

    let access_token = fresh.access_token.clone();
    *cache = Some(fresh);
    Ok(access_token)
  }

  async fn fetch(&self, base_url: &str) -> Result<CachedToken, BackendError> {
    let mut form: Vec<(String, String)> = Vec::with_capacity(3);
    match &self.credential {
      Credential::ApiKey(key) => {
        form.push(("grant_type".into(), APIKEY_GRANT.into()));
        form.push(("apikey".into(), key.clone()));
      }
      Credential::ComputeIdentity {
        profile_id,
        token_path,
      } => {
        let cr_token = tokio::fs::read_to_string(token_path).await.map_err(|e| {
          BackendError::auth(
            "",
            format!(
              "failed to read compute resource token {}: {}",
              token_path.display(),
              e
            ),
          )
        })?;
        form.push(("grant_type".into(), CR_TOKEN_GRANT.into()));
        form.push(("cr_token".into(), cr_token.trim().to_owned()));
        form.push(("profile_id".into(), profile_id.clone()));
      }
    }

    let url = format!("{}/identity/token", base_url.trim_end_matches('/'));
    let request = HttpRequest::new(Method::Post, url)
      .header("Accept", "application/json")
      .form(form);

    let response = self.transport.send(request).await?;
    if !response.is_success() {
      let body: IamErrorBody = response.json().unwrap_or(IamErrorBody {
        error_code: String::new(),
        error_message: String::from_utf8_lossy(&response.body).into_owned(),
      });
      return Err(BackendError::auth(
        body.error_code,
        format!("{} (status {})", body.error_message, response.status),
      ));
    }

    let token: TokenResponse = response.json()?;
    info!(expires_in = token.expires_in, "Obtained IAM token");
    Ok(CachedToken {
      access_token: token.access_token,
      expires_at: Instant::now() + Duration::from_secs(token.expires_in),
    })
  }
}
