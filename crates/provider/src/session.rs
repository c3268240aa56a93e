//! Per request provider sessions.
//!
//! A [`CloudProvider`] hands out one [`VolumeProvider`] per orchestrator
//! request. The session stamps every backend call with the request id, runs
//! it through the retry engine and turns the final failure into a
//! [`UserError`].

use crate::{
  api::VpcClient,
  config::SessionSettings,
  error::{is_terminal, BackendError},
  iam::TokenManager,
  messages::*,
  model::{
    AttachStatus, AttachmentRequest, Snapshot, SnapshotList, Volume, VolumeAttachment, VolumeList,
    VolumeRequest, VolumeTagUpdate,
  },
  retry::{retry, Attempt, CustomGap, Exponential, Policy, RetryError},
  transport::{HttpTransport, ReqwestTransport},
};
use async_trait::async_trait;
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tracing::{debug, info, instrument, warn};

#[async_trait]
pub trait VolumeProvider: Send + Sync {
  async fn create_volume(&self, request: &VolumeRequest) -> Result<Volume, UserError>;
  async fn get_volume(&self, id: &str) -> Result<Volume, UserError>;
  async fn get_volume_by_name(&self, name: &str) -> Result<Volume, UserError>;
  async fn list_volumes(&self, limit: u32, start: Option<&str>) -> Result<VolumeList, UserError>;
  async fn update_volume(&self, update: &VolumeTagUpdate) -> Result<(), UserError>;
  async fn expand_volume(&self, id: &str, capacity_gib: u64) -> Result<Volume, UserError>;
  async fn delete_volume(&self, id: &str) -> Result<(), UserError>;
  async fn wait_for_volume_available(&self, id: &str) -> Result<Volume, UserError>;
  async fn wait_for_volume_deletion(&self, id: &str) -> Result<(), UserError>;

  async fn create_snapshot(&self, source_volume_id: &str, name: &str)
    -> Result<Snapshot, UserError>;
  async fn get_snapshot(&self, id: &str) -> Result<Snapshot, UserError>;
  async fn get_snapshot_by_name(&self, name: &str) -> Result<Snapshot, UserError>;
  async fn list_snapshots(
    &self,
    limit: u32,
    start: Option<&str>,
    source_volume_id: Option<&str>,
  ) -> Result<SnapshotList, UserError>;
  async fn delete_snapshot(&self, id: &str) -> Result<(), UserError>;

  async fn attach_volume(&self, request: &AttachmentRequest) -> Result<VolumeAttachment, UserError>;
  /// `None` when the volume is not attached to the instance.
  async fn get_volume_attachment(
    &self,
    request: &AttachmentRequest,
  ) -> Result<Option<VolumeAttachment>, UserError>;
  async fn detach_volume(&self, request: &AttachmentRequest) -> Result<(), UserError>;
  async fn wait_for_attach(&self, request: &AttachmentRequest)
    -> Result<VolumeAttachment, UserError>;
  async fn wait_for_detach(&self, request: &AttachmentRequest) -> Result<(), UserError>;
}

#[async_trait]
pub trait CloudProvider: Send + Sync + 'static {
  /// A session whose calls are tagged with `request_id`.
  async fn session(&self, request_id: &str) -> Result<Arc<dyn VolumeProvider>, UserError>;

  /// Account owning the volumes this driver manages.
  fn account_id(&self) -> &str;

  /// Resource group used when a request names none.
  fn default_resource_group(&self) -> Option<&str>;
}

/// Why a wait loop has not finished yet.
#[derive(Debug)]
enum Pending {
  Status(String),
  Failed(BackendError),
}

impl fmt::Display for Pending {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Pending::Status(status) => write!(f, "status is {}", status),
      Pending::Failed(e) => fmt::Display::fmt(e, f),
    }
  }
}

fn pending<T>(err: BackendError, iks: bool) -> Attempt<T, Pending> {
  if is_terminal(&err, iks) {
    Attempt::Stop(Pending::Failed(err))
  } else {
    Attempt::Retry(Pending::Failed(err))
  }
}

pub struct VpcSession {
  client: Arc<VpcClient>,
  request_id: String,
  calls: Exponential,
  polling: CustomGap,
  iks: bool,
}

impl VpcSession {
  pub fn new(client: Arc<VpcClient>, request_id: impl Into<String>, calls: Exponential) -> Self {
    let iks = client.is_iks();
    VpcSession {
      client,
      request_id: request_id.into(),
      calls,
      polling: CustomGap::default(),
      iks,
    }
  }

  pub fn with_polling(mut self, polling: CustomGap) -> Self {
    self.polling = polling;
    self
  }

  /// Retry a single backend call with the short call cadence.
  async fn call<T, F, Fut>(&self, mut f: F) -> Result<T, BackendError>
  where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, BackendError>> + Send,
    T: Send,
  {
    let iks = self.iks;
    retry(&self.calls, |_| {
      let call = f();
      async move { Attempt::classify(call.await, iks) }
    })
    .await
    .map_err(RetryError::into_inner)
  }

  fn fail(&self, code: &'static MessageCode, args: &[&dyn fmt::Display], err: BackendError) -> UserError {
    UserError::from_backend(code, args, err).with_request_id(self.request_id.as_str())
  }

  fn timed_out(
    &self,
    timeout: &'static MessageCode,
    failed: &'static MessageCode,
    args: &[&dyn fmt::Display],
    err: RetryError<Pending>,
  ) -> UserError {
    let exhausted = err.is_exhausted();
    match err.into_inner() {
      Pending::Failed(e) if !exhausted => self.fail(failed, args, e),
      last => timeout
        .error(args)
        .with_backend_error(last)
        .with_request_id(self.request_id.as_str()),
    }
  }
}

#[async_trait]
impl VolumeProvider for VpcSession {
  #[instrument(level = "debug", skip(self, request), fields(request_id = %self.request_id, name = %request.name))]
  async fn create_volume(&self, request: &VolumeRequest) -> Result<Volume, UserError> {
    self
      .call(|| self.client.create_volume(request, &self.request_id))
      .await
      .map_err(|e| self.fail(&VOLUME_CREATION_FAILED, &[&request.name], e))
  }

  async fn get_volume(&self, id: &str) -> Result<Volume, UserError> {
    self
      .call(|| self.client.get_volume(id, &self.request_id))
      .await
      .map_err(|e| self.fail(&RETRIEVE_FAILED, &[&id], e))
  }

  async fn get_volume_by_name(&self, name: &str) -> Result<Volume, UserError> {
    self
      .call(|| self.client.get_volume_by_name(name, &self.request_id))
      .await
      .map_err(|e| self.fail(&RETRIEVE_FAILED, &[&name], e))
  }

  async fn list_volumes(&self, limit: u32, start: Option<&str>) -> Result<VolumeList, UserError> {
    self
      .call(|| self.client.list_volumes(limit, start, &self.request_id))
      .await
      .map_err(|e| self.fail(&LIST_VOLUMES_FAILED, &[], e))
  }

  async fn update_volume(&self, update: &VolumeTagUpdate) -> Result<(), UserError> {
    let changed = self
      .call(|| self.client.update_volume_tags(update, &self.request_id))
      .await
      .map_err(|e| self.fail(&UPDATE_VOLUME_FAILED, &[&update.volume_id], e))?;

    if changed {
      info!(volume_id = %update.volume_id, request_id = %self.request_id, "Volume tags updated");
    }
    Ok(())
  }

  async fn expand_volume(&self, id: &str, capacity_gib: u64) -> Result<Volume, UserError> {
    self
      .call(|| self.client.expand_volume(id, capacity_gib, &self.request_id))
      .await
      .map_err(|e| self.fail(&EXPAND_VOLUME_FAILED, &[&id, &capacity_gib], e))
  }

  async fn delete_volume(&self, id: &str) -> Result<(), UserError> {
    self
      .call(|| self.client.delete_volume(id, &self.request_id))
      .await
      .map_err(|e| self.fail(&VOLUME_DELETION_FAILED, &[&id], e))
  }

  #[instrument(level = "debug", skip(self), fields(request_id = %self.request_id))]
  async fn wait_for_volume_available(&self, id: &str) -> Result<Volume, UserError> {
    let iks = self.iks;
    retry(&self.calls, |attempt| async move {
      match self.client.get_volume(id, &self.request_id).await {
        Ok(volume) if volume.is_available() => Attempt::Done(volume),
        Ok(volume) => {
          debug!(attempt, status = %volume.status, "Volume not yet available");
          Attempt::Retry(Pending::Status(volume.status))
        }
        Err(e) => pending(e, iks),
      }
    })
    .await
    .map_err(|e| self.timed_out(&VOLUME_NOT_AVAILABLE, &VOLUME_NOT_AVAILABLE, &[&id], e))
  }

  #[instrument(level = "debug", skip(self), fields(request_id = %self.request_id))]
  async fn wait_for_volume_deletion(&self, id: &str) -> Result<(), UserError> {
    let iks = self.iks;
    retry(&self.calls, |attempt| async move {
      match self.client.get_volume(id, &self.request_id).await {
        Err(e) if e.is_not_found() => Attempt::Done(()),
        Ok(volume) => {
          debug!(attempt, status = %volume.status, "Volume still present");
          Attempt::Retry(Pending::Status(volume.status))
        }
        Err(e) => pending(e, iks),
      }
    })
    .await
    .map_err(|e| self.timed_out(&VOLUME_DELETION_FAILED, &VOLUME_DELETION_FAILED, &[&id], e))
  }

  async fn create_snapshot(
    &self,
    source_volume_id: &str,
    name: &str,
  ) -> Result<Snapshot, UserError> {
    self
      .call(|| self.client.create_snapshot(source_volume_id, name, &self.request_id))
      .await
      .map_err(|e| self.fail(&SNAPSHOT_CREATION_FAILED, &[&name, &source_volume_id], e))
  }

  async fn get_snapshot(&self, id: &str) -> Result<Snapshot, UserError> {
    self
      .call(|| self.client.get_snapshot(id, &self.request_id))
      .await
      .map_err(|e| self.fail(&RETRIEVE_FAILED, &[&id], e))
  }

  async fn get_snapshot_by_name(&self, name: &str) -> Result<Snapshot, UserError> {
    self
      .call(|| self.client.get_snapshot_by_name(name, &self.request_id))
      .await
      .map_err(|e| self.fail(&RETRIEVE_FAILED, &[&name], e))
  }

  async fn list_snapshots(
    &self,
    limit: u32,
    start: Option<&str>,
    source_volume_id: Option<&str>,
  ) -> Result<SnapshotList, UserError> {
    self
      .call(|| {
        self
          .client
          .list_snapshots(limit, start, source_volume_id, &self.request_id)
      })
      .await
      .map_err(|e| self.fail(&LIST_SNAPSHOTS_FAILED, &[], e))
  }

  async fn delete_snapshot(&self, id: &str) -> Result<(), UserError> {
    self
      .call(|| self.client.delete_snapshot(id, &self.request_id))
      .await
      .map_err(|e| self.fail(&SNAPSHOT_DELETION_FAILED, &[&id], e))
  }

  #[instrument(level = "debug", skip(self), fields(request_id = %self.request_id))]
  async fn attach_volume(&self, request: &AttachmentRequest) -> Result<VolumeAttachment, UserError> {
    self
      .call(|| self.client.attach_volume(request, &self.request_id))
      .await
      .map_err(|e| {
        self.fail(
          &ATTACH_FAILED,
          &[&request.volume_id, &request.instance_id],
          e,
        )
      })
  }

  async fn get_volume_attachment(
    &self,
    request: &AttachmentRequest,
  ) -> Result<Option<VolumeAttachment>, UserError> {
    match self
      .call(|| self.client.get_volume_attachment(request, &self.request_id))
      .await
    {
      Ok(attachment) => Ok(Some(attachment)),
      Err(e) if e.is_not_found() => Ok(None),
      Err(e) => Err(self.fail(&RETRIEVE_FAILED, &[&request.volume_id], e)),
    }
  }

  #[instrument(level = "debug", skip(self), fields(request_id = %self.request_id))]
  async fn detach_volume(&self, request: &AttachmentRequest) -> Result<(), UserError> {
    self
      .call(|| self.client.detach_volume(request, &self.request_id))
      .await
      .map_err(|e| {
        self.fail(
          &DETACH_FAILED,
          &[&request.volume_id, &request.instance_id],
          e,
        )
      })
  }

  #[instrument(level = "debug", skip(self), fields(request_id = %self.request_id))]
  async fn wait_for_attach(
    &self,
    request: &AttachmentRequest,
  ) -> Result<VolumeAttachment, UserError> {
    let iks = self.iks;
    retry(&self.polling, |attempt| async move {
      match self.client.get_volume_attachment(request, &self.request_id).await {
        Ok(attachment) if attachment.status == AttachStatus::Attached => Attempt::Done(attachment),
        Ok(attachment) => {
          debug!(attempt, status = %attachment.status, "Waiting for attach");
          Attempt::Retry(Pending::Status(attachment.status.to_string()))
        }
        Err(e) => pending(e, iks),
      }
    })
    .await
    .map_err(|e| {
      warn!(volume_id = %request.volume_id, instance_id = %request.instance_id, attempts = e.attempts(), "Attach did not complete");
      self.timed_out(
        &VOLUME_ATTACH_TIMED_OUT,
        &ATTACH_FAILED,
        &[&request.volume_id, &request.instance_id],
        e,
      )
    })
  }

  #[instrument(level = "debug", skip(self), fields(request_id = %self.request_id))]
  async fn wait_for_detach(&self, request: &AttachmentRequest) -> Result<(), UserError> {
    let iks = self.iks;
    retry(&self.polling, |attempt| async move {
      match self.client.get_volume_attachment(request, &self.request_id).await {
        Err(e) if e.is_not_found() => Attempt::Done(()),
        Ok(attachment) if attachment.status == AttachStatus::Detached => Attempt::Done(()),
        Ok(attachment) => {
          debug!(attempt, status = %attachment.status, "Waiting for detach");
          Attempt::Retry(Pending::Status(attachment.status.to_string()))
        }
        Err(e) => pending(e, iks),
      }
    })
    .await
    .map_err(|e| {
      self.timed_out(
        &VOLUME_DETACH_TIMED_OUT,
        &DETACH_FAILED,
        &[&request.volume_id, &request.instance_id],
        e,
      )
    })
  }
}

/// The production [`CloudProvider`]. The token manager is shared by every
/// session so the cached token outlives individual requests.
pub struct VpcCloud {
  client: Arc<VpcClient>,
  tokens: Arc<TokenManager>,
  calls: Exponential,
  iam_url: String,
  account_id: String,
  resource_group_id: String,
}

impl VpcCloud {
  pub fn new(settings: SessionSettings) -> Result<Self, BackendError> {
    let transport = Arc::new(ReqwestTransport::new(settings.http_timeout)?);
    Ok(Self::with_transport(settings, transport))
  }

  pub fn with_transport(settings: SessionSettings, transport: Arc<dyn HttpTransport>) -> Self {
    let tokens = Arc::new(TokenManager::new(
      transport.clone(),
      settings.credential,
      settings.iam_url.clone(),
    ));
    let client = Arc::new(VpcClient::new(
      transport,
      tokens.clone(),
      settings.endpoint_url,
      settings.api_version,
      settings.generation,
      settings.iks,
    ));

    VpcCloud {
      client,
      tokens,
      calls: Exponential {
        max: settings.max_retry_gap,
        cap_attempts: settings.max_retry_attempt,
        ..Exponential::default()
      },
      iam_url: settings.iam_url,
      account_id: settings.account_id,
      resource_group_id: settings.resource_group_id,
    }
  }

  /// Shorten the call cadence. Mostly useful to tests.
  pub fn with_call_policy(mut self, initial: Duration, cap_attempts: u32) -> Self {
    self.calls.initial = initial;
    self.calls.cap_attempts = cap_attempts;
    self
  }
}

#[async_trait]
impl CloudProvider for VpcCloud {
  async fn session(&self, request_id: &str) -> Result<Arc<dyn VolumeProvider>, UserError> {
    if let Err(e) = self.tokens.token().await {
      warn!(error = %e, request_id, "Failed to obtain an IAM token");
      return Err(
        UserError::from_backend(&SESSION_FAILED, &[&self.iam_url], e).with_request_id(request_id),
      );
    }

    debug!(request_id, max_attempts = self.calls.max_attempts(), "Provider session ready");
    Ok(Arc::new(VpcSession::new(
      self.client.clone(),
      request_id,
      self.calls,
    )))
  }

  fn account_id(&self) -> &str {
    &self.account_id
  }

  fn default_resource_group(&self) -> Option<&str> {
    Some(self.resource_group_id.as_str()).filter(|rg| !rg.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    iam::Credential,
    transport::{HttpRequest, HttpResponse, MemoryTransport, Method},
  };
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn settings() -> SessionSettings {
    SessionSettings {
      endpoint_url: "https://us-south.iaas.cloud.ibm.com/v1".into(),
      api_version: "2021-04-20".into(),
      generation: 2,
      resource_group_id: "rg1".into(),
      iam_url: "https://iam.cloud.ibm.com".into(),
      credential: Credential::ApiKey("key".into()),
      http_timeout: Duration::from_secs(120),
      max_retry_attempt: 3,
      max_retry_gap: Duration::from_secs(60),
      iks: None,
      account_id: "acc-1".into(),
      region: "us-south".into(),
      debug_trace: false,
    }
  }

  fn token() -> HttpResponse {
    HttpResponse::new(200, r#"{"access_token":"tok","expires_in":3600}"#)
  }

  fn cloud(
    handler: impl Fn(&HttpRequest) -> Result<HttpResponse, BackendError> + Send + Sync + 'static,
  ) -> (VpcCloud, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::new(move |req| {
      if req.url.ends_with("/identity/token") {
        Ok(token())
      } else {
        handler(req)
      }
    }));
    (VpcCloud::with_transport(settings(), transport.clone()), transport)
  }

  fn api_calls(transport: &MemoryTransport) -> usize {
    transport
      .requests()
      .iter()
      .filter(|r| !r.url.ends_with("/identity/token"))
      .count()
  }

  fn attachment(status: &str) -> HttpResponse {
    HttpResponse::new(
      200,
      format!(
        r#"{{"id":"att-1","status":"{}","volume":{{"id":"r006-1"}},"device":{{"id":"0727-aaaa"}}}}"#,
        status
      ),
    )
  }

  #[tokio::test(start_paused = true)]
  async fn not_found_is_terminal_and_tagged_with_request_id() {
    let (cloud, transport) = cloud(|_| {
      Ok(HttpResponse::new(
        404,
        r#"{"errors":[{"code":"volume_not_found","message":"Volume not found"}]}"#,
      ))
    });

    let session = cloud.session("req-7").await.unwrap();
    let err = session.get_volume("r006-1").await.unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(err.request_id(), Some("req-7"));
    assert_eq!(api_calls(&transport), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn server_errors_are_retried_then_internal() {
    let (cloud, transport) = cloud(|_| {
      Ok(HttpResponse::new(
        500,
        r#"{"errors":[{"code":"internal_error","message":"boom"}]}"#,
      ))
    });

    let session = cloud.session("req").await.unwrap();
    let err = session.delete_volume("r006-1").await.unwrap_err();

    assert_eq!(err.kind(), Kind::Internal);
    assert_eq!(err.code(), "VolumeDeletionFailed");
    assert_eq!(api_calls(&transport), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn unknown_start_token_is_aborted() {
    let (cloud, _) = cloud(|_| {
      Ok(HttpResponse::new(
        404,
        r#"{"errors":[{"code":"start_volume_id_not_found","message":"start not found"}]}"#,
      ))
    });

    let session = cloud.session("req").await.unwrap();
    let err = session.list_volumes(50, Some("nope")).await.unwrap_err();
    assert_eq!(err.kind(), Kind::Aborted);
  }

  #[tokio::test]
  async fn rejected_credentials_are_unauthenticated() {
    let transport = Arc::new(MemoryTransport::new(|_| {
      Ok(HttpResponse::new(
        400,
        r#"{"errorCode":"BXNIM0415E","errorMessage":"Provided API key could not be found"}"#,
      ))
    }));
    let cloud = VpcCloud::with_transport(settings(), transport);

    let err = match cloud.session("req").await {
      Ok(_) => panic!("session should fail"),
      Err(e) => e,
    };
    assert_eq!(err.kind(), Kind::Unauthenticated);
    assert_eq!(err.request_id(), Some("req"));
  }

  #[tokio::test(start_paused = true)]
  async fn wait_for_attach_polls_until_attached() {
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = polls.clone();
    let (cloud, _) = cloud(move |req| {
      assert_eq!(req.method, Method::Get);
      if counter.fetch_add(1, Ordering::SeqCst) < 2 {
        Ok(attachment("attaching"))
      } else {
        Ok(attachment("attached"))
      }
    });

    let session = cloud.session("req").await.unwrap();
    let mut request = AttachmentRequest::new("r006-1", "i-1");
    request.attachment_id = Some("att-1".into());

    let started = tokio::time::Instant::now();
    let attached = session.wait_for_attach(&request).await.unwrap();
    assert_eq!(attached.status, AttachStatus::Attached);
    assert_eq!(polls.load(Ordering::SeqCst), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(6));
  }

  #[tokio::test(start_paused = true)]
  async fn wait_for_attach_times_out() {
    let (cloud, _) = cloud(|_| Ok(attachment("attaching")));
    let session = VpcSession::new(cloud.client.clone(), "req", Exponential::default())
      .with_polling(CustomGap {
        min_gap: 1,
        min_gap_attempts: 1,
        max_attempts: 4,
      });

    let mut request = AttachmentRequest::new("r006-1", "i-1");
    request.attachment_id = Some("att-1".into());

    let err = session.wait_for_attach(&request).await.unwrap_err();
    assert_eq!(err.kind(), Kind::Timeout);
    assert_eq!(err.code(), "VolumeAttachTimedOut");
  }

  #[tokio::test(start_paused = true)]
  async fn wait_for_detach_finishes_on_not_found() {
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = polls.clone();
    let (cloud, _) = cloud(move |_| {
      if counter.fetch_add(1, Ordering::SeqCst) == 0 {
        Ok(attachment("detaching"))
      } else {
        Ok(HttpResponse::new(
          404,
          r#"{"errors":[{"code":"volume_attachment_not_found","message":"gone"}]}"#,
        ))
      }
    });

    let session = cloud.session("req").await.unwrap();
    let mut request = AttachmentRequest::new("r006-1", "i-1");
    request.attachment_id = Some("att-1".into());

    session.wait_for_detach(&request).await.unwrap();
    assert_eq!(polls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn missing_attachment_is_none() {
    let (cloud, _) = cloud(|_| Ok(HttpResponse::new(200, r#"{"volume_attachments":[]}"#)));

    let session = cloud.session("req").await.unwrap();
    let found = session
      .get_volume_attachment(&AttachmentRequest::new("r006-1", "i-1"))
      .await
      .unwrap();
    assert!(found.is_none());
  }

  #[test]
  fn empty_resource_group_has_no_default() {
    let transport = Arc::new(MemoryTransport::new(|_| Ok(token())));
    let mut settings = settings();
    settings.resource_group_id = String::new();
    let cloud = VpcCloud::with_transport(settings, transport);
    assert_eq!(cloud.default_resource_group(), None);
    assert_eq!(cloud.account_id(), "acc-1");
  }
}
