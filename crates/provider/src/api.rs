//! Typed client over the VPC block storage REST API. Each method is exactly
//! one HTTP call, except the ETag guarded updates which read first; retries
//! and waits live in the session.

use crate::{
  config::IksSettings,
  error::BackendError,
  iam::TokenManager,
  model::{
    region_of_zone, AttachmentRequest, Snapshot, SnapshotList, Volume, VolumeAttachment,
    VolumeList, VolumeRequest, VolumeTagUpdate, GIB,
  },
  transport::{HttpRequest, HttpResponse, HttpTransport, Method},
};
use reqwest::Url;
use serde_json::json;
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, info};

/// The backend refuses larger pages.
pub const MAX_LIMIT: u32 = 100;

mod wire {
  use chrono::{DateTime, Utc};
  use serde::Deserialize;

  #[derive(Debug, Deserialize)]
  pub struct NameRef {
    pub name: String,
  }

  #[derive(Debug, Deserialize)]
  pub struct IdRef {
    pub id: String,
  }

  #[derive(Debug, Deserialize)]
  pub struct CrnRef {
    pub crn: String,
  }

  #[derive(Debug, Deserialize)]
  pub struct Href {
    pub href: String,
  }

  #[derive(Debug, Deserialize)]
  pub struct Volume {
    pub id: String,
    pub crn: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub capacity: u64,
    pub iops: Option<i64>,
    pub profile: Option<NameRef>,
    pub zone: Option<NameRef>,
    pub resource_group: Option<IdRef>,
    pub encryption_key: Option<CrnRef>,
    #[serde(default)]
    pub user_tags: Vec<String>,
    pub bandwidth: Option<i32>,
    #[serde(default)]
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
    pub source_snapshot: Option<IdRef>,
  }

  #[derive(Debug, Deserialize)]
  pub struct VolumeList {
    #[serde(default)]
    pub volumes: Vec<Volume>,
    pub next: Option<Href>,
  }

  #[derive(Debug, Deserialize)]
  pub struct Snapshot {
    pub id: String,
    pub crn: Option<String>,
    #[serde(default)]
    pub name: String,
    pub source_volume: Option<IdRef>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub lifecycle_state: String,
    pub created_at: Option<DateTime<Utc>>,
  }

  #[derive(Debug, Deserialize)]
  pub struct SnapshotList {
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
    pub next: Option<Href>,
  }

  #[derive(Debug, Deserialize)]
  pub struct Attachment {
    pub id: String,
    #[serde(default)]
    pub status: String,
    pub device: Option<IdRef>,
    pub volume: Option<IdRef>,
  }

  #[derive(Debug, Deserialize)]
  pub struct AttachmentList {
    #[serde(default)]
    pub volume_attachments: Vec<Attachment>,
  }

  #[derive(Debug, Deserialize)]
  pub struct VpcErrorItem {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
  }

  #[derive(Debug, Deserialize)]
  pub struct VpcErrorEnvelope {
    #[serde(default)]
    pub errors: Vec<VpcErrorItem>,
    pub trace: Option<String>,
  }

  #[derive(Debug, Deserialize)]
  pub struct IksErrorEnvelope {
    pub code: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "incidentID")]
    pub incident_id: Option<String>,
  }
}

impl From<wire::Volume> for Volume {
  fn from(v: wire::Volume) -> Self {
    let zone = v.zone.map(|z| z.name).unwrap_or_default();
    let region = region_of_zone(&zone).to_owned();

    Volume {
      id: v.id,
      crn: v.crn,
      name: v.name,
      capacity_gib: v.capacity,
      iops: v.iops,
      profile: v.profile.map(|p| p.name),
      zone,
      region,
      resource_group_id: v.resource_group.map(|r| r.id),
      encryption_key_crn: v.encryption_key.map(|k| k.crn),
      tags: v.user_tags,
      bandwidth: v.bandwidth,
      status: v.status,
      created_at: v.created_at,
      source_snapshot_id: v.source_snapshot.map(|s| s.id),
    }
  }
}

impl From<wire::Snapshot> for Snapshot {
  fn from(s: wire::Snapshot) -> Self {
    Snapshot {
      id: s.id,
      crn: s.crn,
      name: s.name,
      source_volume_id: s.source_volume.map(|v| v.id).unwrap_or_default(),
      size_bytes: s.size * GIB,
      ready_to_use: s.lifecycle_state == "stable",
      created_at: s.created_at,
    }
  }
}

fn attachment(a: wire::Attachment, instance_id: &str) -> VolumeAttachment {
  VolumeAttachment {
    id: a.id,
    volume_id: a.volume.map(|v| v.id).unwrap_or_default(),
    instance_id: instance_id.to_owned(),
    status: a.status.as_str().into(),
    device_id: a.device.map(|d| d.id),
  }
}

/// Normalize either error envelope into a [`BackendError`].
pub(crate) fn parse_error(response: &HttpResponse) -> BackendError {
  if let Ok(envelope) = serde_json::from_slice::<wire::VpcErrorEnvelope>(&response.body) {
    if let Some(first) = envelope.errors.into_iter().next() {
      return BackendError::api(response.status, first.code, first.message, envelope.trace);
    }
  }

  if let Ok(envelope) = serde_json::from_slice::<wire::IksErrorEnvelope>(&response.body) {
    return BackendError::api(
      response.status,
      envelope.code,
      envelope.description,
      envelope.incident_id,
    );
  }

  BackendError::api(
    response.status,
    "",
    String::from_utf8_lossy(&response.body).into_owned(),
    None,
  )
}

/// The `start` query parameter of a `next.href` link.
pub(crate) fn start_token(href: &str) -> Option<String> {
  Url::parse(href).ok().and_then(|url| {
    url
      .query_pairs()
      .find(|(k, _)| k == "start")
      .map(|(_, v)| v.into_owned())
  })
}

fn clamp_limit(limit: u32) -> u32 {
  limit.min(MAX_LIMIT)
}

pub struct VpcClient {
  transport: Arc<dyn HttpTransport>,
  tokens: Arc<TokenManager>,
  endpoint_url: String,
  api_version: String,
  generation: u8,
  iks: Option<IksSettings>,
}

impl VpcClient {
  pub fn new(
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenManager>,
    endpoint_url: impl Into<String>,
    api_version: impl Into<String>,
    generation: u8,
    iks: Option<IksSettings>,
  ) -> Self {
    VpcClient {
      transport,
      tokens,
      endpoint_url: endpoint_url.into(),
      api_version: api_version.into(),
      generation,
      iks,
    }
  }

  #[inline]
  pub fn is_iks(&self) -> bool {
    self.iks.is_some()
  }

  fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<String, BackendError> {
    let base = format!("{}{}", self.endpoint_url.trim_end_matches('/'), path);
    let generation = self.generation.to_string();
    let params = [("version", self.api_version.as_str()), ("generation", generation.as_str())];

    Url::parse_with_params(&base, params.iter().chain(query.iter()))
      .map(String::from)
      .map_err(|e| BackendError::transport(format!("invalid url {}: {}", base, e)))
  }

  fn iks_url(iks: &IksSettings, op: &str, query: &[(&str, &str)]) -> Result<String, BackendError> {
    let base = format!(
      "{}/v2/storage/vpc/{}",
      iks.endpoint_url.trim_end_matches('/'),
      op
    );
    let cluster = [("cluster", iks.cluster_id.as_str())];

    Url::parse_with_params(&base, cluster.iter().chain(query.iter()))
      .map(String::from)
      .map_err(|e| BackendError::transport(format!("invalid url {}: {}", base, e)))
  }

  async fn send(&self, request: HttpRequest, request_id: &str) -> Result<HttpResponse, BackendError> {
    let token = self.tokens.token().await?;
    let request = request
      .header("Authorization", format!("Bearer {}", token))
      .header("Accept", "application/json")
      .header("X-Request-ID", request_id);

    debug!(method = ?request.method, url = %request.url, request_id, "Backend request");
    let response = self.transport.send(request).await?;
    if response.is_success() {
      Ok(response)
    } else {
      Err(parse_error(&response))
    }
  }

  pub async fn create_volume(
    &self,
    volume: &VolumeRequest,
    request_id: &str,
  ) -> Result<Volume, BackendError> {
    let mut body = json!({
      "name": volume.name,
      "capacity": volume.capacity_gib,
      "profile": { "name": volume.profile },
      "zone": { "name": volume.zone },
    });

    if let Some(iops) = volume.iops {
      body["iops"] = json!(iops);
    }
    if let Some(rg) = &volume.resource_group_id {
      body["resource_group"] = json!({ "id": rg });
    }
    if let Some(key) = &volume.encryption_key_crn {
      body["encryption_key"] = json!({ "crn": key });
    }
    if !volume.tags.is_empty() {
      body["user_tags"] = json!(volume.tags);
    }
    if let Some(bandwidth) = volume.bandwidth {
      body["bandwidth"] = json!(bandwidth);
    }
    if let Some(snapshot) = &volume.source_snapshot_id {
      // Snapshots owned by another account can only be referenced by CRN.
      body["source_snapshot"] = if snapshot.starts_with("crn:") {
        json!({ "crn": snapshot })
      } else {
        json!({ "id": snapshot })
      };
    }

    let request = HttpRequest::new(Method::Post, self.url("/volumes", &[])?).json(body);
    let created: wire::Volume = self.send(request, request_id).await?.json()?;
    info!(volume_id = %created.id, name = %volume.name, "Volume created");
    Ok(created.into())
  }

  async fn get_volume_with_etag(
    &self,
    id: &str,
    request_id: &str,
  ) -> Result<(Volume, Option<String>), BackendError> {
    let request = HttpRequest::new(Method::Get, self.url(&format!("/volumes/{}", id), &[])?);
    let response = self.send(request, request_id).await?;
    let etag = response.etag().map(ToOwned::to_owned);
    let volume: wire::Volume = response.json()?;
    Ok((volume.into(), etag))
  }

  pub async fn get_volume(&self, id: &str, request_id: &str) -> Result<Volume, BackendError> {
    self
      .get_volume_with_etag(id, request_id)
      .await
      .map(|(v, _)| v)
  }

  pub async fn get_volume_by_name(&self, name: &str, request_id: &str) -> Result<Volume, BackendError> {
    let request = HttpRequest::new(Method::Get, self.url("/volumes", &[("name", name)])?);
    let list: wire::VolumeList = self.send(request, request_id).await?.json()?;

    list
      .volumes
      .into_iter()
      .next()
      .map(Into::into)
      .ok_or_else(|| {
        BackendError::api(
          404,
          "volume_name_not_found",
          format!("no volume named {}", name),
          None,
        )
      })
  }

  pub async fn list_volumes(
    &self,
    limit: u32,
    start: Option<&str>,
    request_id: &str,
  ) -> Result<VolumeList, BackendError> {
    let limit = clamp_limit(limit).to_string();
    let mut query = vec![("limit", limit.as_str())];
    if let Some(start) = start {
      query.push(("start", start));
    }

    let request = HttpRequest::new(Method::Get, self.url("/volumes", &query)?);
    let list: wire::VolumeList = self.send(request, request_id).await?.json()?;

    Ok(VolumeList {
      volumes: list.volumes.into_iter().map(Into::into).collect(),
      next: list.next.and_then(|n| start_token(&n.href)),
    })
  }

  /// Merge tags into the volume. Returns false when nothing changed and the
  /// PATCH was skipped.
  pub async fn update_volume_tags(
    &self,
    update: &VolumeTagUpdate,
    request_id: &str,
  ) -> Result<bool, BackendError> {
    let (volume, etag) = self.get_volume_with_etag(&update.volume_id, request_id).await?;

    let existing: BTreeSet<&String> = volume.tags.iter().collect();
    let desired: BTreeSet<&String> = existing.iter().copied().chain(update.tags.iter()).collect();
    if desired == existing {
      debug!(volume_id = %update.volume_id, "Tags already up to date, skipping update");
      return Ok(false);
    }

    let tags: Vec<&String> = desired.into_iter().collect();
    let mut request = HttpRequest::new(
      Method::Patch,
      self.url(&format!("/volumes/{}", update.volume_id), &[])?,
    )
    .header("Content-Type", "application/merge-patch+json")
    .json(json!({ "user_tags": tags }));
    if let Some(etag) = etag {
      request = request.header("If-Match", etag);
    }

    self.send(request, request_id).await?;
    Ok(true)
  }

  pub async fn expand_volume(
    &self,
    id: &str,
    capacity_gib: u64,
    request_id: &str,
  ) -> Result<Volume, BackendError> {
    let (_, etag) = self.get_volume_with_etag(id, request_id).await?;

    let mut request = HttpRequest::new(Method::Patch, self.url(&format!("/volumes/{}", id), &[])?)
      .header("Content-Type", "application/merge-patch+json")
      .json(json!({ "capacity": capacity_gib }));
    if let Some(etag) = etag {
      request = request.header("If-Match", etag);
    }

    let volume: wire::Volume = self.send(request, request_id).await?.json()?;
    Ok(volume.into())
  }

  pub async fn delete_volume(&self, id: &str, request_id: &str) -> Result<(), BackendError> {
    let request = HttpRequest::new(Method::Delete, self.url(&format!("/volumes/{}", id), &[])?);
    self.send(request, request_id).await?;
    Ok(())
  }

  pub async fn create_snapshot(
    &self,
    source_volume_id: &str,
    name: &str,
    request_id: &str,
  ) -> Result<Snapshot, BackendError> {
    let request = HttpRequest::new(Method::Post, self.url("/snapshots", &[])?).json(json!({
      "name": name,
      "source_volume": { "id": source_volume_id },
    }));
    let snapshot: wire::Snapshot = self.send(request, request_id).await?.json()?;
    Ok(snapshot.into())
  }

  pub async fn get_snapshot(&self, id: &str, request_id: &str) -> Result<Snapshot, BackendError> {
    let request = HttpRequest::new(Method::Get, self.url(&format!("/snapshots/{}", id), &[])?);
    let snapshot: wire::Snapshot = self.send(request, request_id).await?.json()?;
    Ok(snapshot.into())
  }

  pub async fn get_snapshot_by_name(
    &self,
    name: &str,
    request_id: &str,
  ) -> Result<Snapshot, BackendError> {
    let request = HttpRequest::new(Method::Get, self.url("/snapshots", &[("name", name)])?);
    let list: wire::SnapshotList = self.send(request, request_id).await?.json()?;

    list
      .snapshots
      .into_iter()
      .next()
      .map(Into::into)
      .ok_or_else(|| {
        BackendError::api(
          404,
          "snapshot_not_found",
          format!("no snapshot named {}", name),
          None,
        )
      })
  }

  pub async fn list_snapshots(
    &self,
    limit: u32,
    start: Option<&str>,
    source_volume_id: Option<&str>,
    request_id: &str,
  ) -> Result<SnapshotList, BackendError> {
    let limit = clamp_limit(limit).to_string();
    let mut query = vec![("limit", limit.as_str())];
    if let Some(start) = start {
      query.push(("start", start));
    }
    if let Some(source) = source_volume_id {
      query.push(("source_volume.id", source));
    }

    let request = HttpRequest::new(Method::Get, self.url("/snapshots", &query)?);
    let list: wire::SnapshotList = self.send(request, request_id).await?.json()?;

    Ok(SnapshotList {
      snapshots: list.snapshots.into_iter().map(Into::into).collect(),
      next: list.next.and_then(|n| start_token(&n.href)),
    })
  }

  pub async fn delete_snapshot(&self, id: &str, request_id: &str) -> Result<(), BackendError> {
    let request = HttpRequest::new(Method::Delete, self.url(&format!("/snapshots/{}", id), &[])?);
    self.send(request, request_id).await?;
    Ok(())
  }

  pub async fn attach_volume(
    &self,
    req: &AttachmentRequest,
    request_id: &str,
  ) -> Result<VolumeAttachment, BackendError> {
    let request = match &self.iks {
      Some(iks) => HttpRequest::new(
        Method::Post,
        Self::iks_url(
          iks,
          "createAttachment",
          &[("worker", req.instance_id.as_str()), ("volumeID", req.volume_id.as_str())],
        )?,
      ),
      None => HttpRequest::new(
        Method::Post,
        self.url(
          &format!("/instances/{}/volume_attachments", req.instance_id),
          &[],
        )?,
      )
      .json(json!({
        "volume": { "id": req.volume_id },
        "delete_volume_on_instance_delete": false,
      })),
    };

    let created: wire::Attachment = self.send(request, request_id).await?.json()?;
    info!(attachment_id = %created.id, volume_id = %req.volume_id, instance_id = %req.instance_id, "Attachment created");
    Ok(attachment(created, &req.instance_id))
  }

  pub async fn list_volume_attachments(
    &self,
    instance_id: &str,
    request_id: &str,
  ) -> Result<Vec<VolumeAttachment>, BackendError> {
    let url = match &self.iks {
      Some(iks) => Self::iks_url(iks, "getAttachments", &[("worker", instance_id)])?,
      None => self.url(&format!("/instances/{}/volume_attachments", instance_id), &[])?,
    };

    let list: wire::AttachmentList = self
      .send(HttpRequest::new(Method::Get, url), request_id)
      .await?
      .json()?;

    Ok(
      list
        .volume_attachments
        .into_iter()
        .map(|a| attachment(a, instance_id))
        .collect(),
    )
  }

  /// Look up by attachment id when known, else by the (volume, instance)
  /// pair.
  pub async fn get_volume_attachment(
    &self,
    req: &AttachmentRequest,
    request_id: &str,
  ) -> Result<VolumeAttachment, BackendError> {
    let attachment_id = match &req.attachment_id {
      Some(id) => id,
      None => {
        return self
          .list_volume_attachments(&req.instance_id, request_id)
          .await?
          .into_iter()
          .find(|a| a.volume_id == req.volume_id)
          .ok_or_else(|| {
            BackendError::api(
              404,
              "volume_attachment_not_found",
              format!(
                "volume {} is not attached to instance {}",
                req.volume_id, req.instance_id
              ),
              None,
            )
          })
      }
    };

    let url = match &self.iks {
      Some(iks) => Self::iks_url(
        iks,
        "getAttachment",
        &[("worker", req.instance_id.as_str()), ("volumeAttachmentID", attachment_id.as_str())],
      )?,
      None => self.url(
        &format!(
          "/instances/{}/volume_attachments/{}",
          req.instance_id, attachment_id
        ),
        &[],
      )?,
    };

    let found: wire::Attachment = self
      .send(HttpRequest::new(Method::Get, url), request_id)
      .await?
      .json()?;
    Ok(attachment(found, &req.instance_id))
  }

  pub async fn detach_volume(
    &self,
    req: &AttachmentRequest,
    request_id: &str,
  ) -> Result<(), BackendError> {
    let attachment_id = match &req.attachment_id {
      Some(id) => id.clone(),
      None => self.get_volume_attachment(req, request_id).await?.id,
    };

    let url = match &self.iks {
      Some(iks) => Self::iks_url(
        iks,
        "deleteAttachment",
        &[("worker", req.instance_id.as_str()), ("volumeAttachmentID", attachment_id.as_str())],
      )?,
      None => self.url(
        &format!(
          "/instances/{}/volume_attachments/{}",
          req.instance_id, attachment_id
        ),
        &[],
      )?,
    };

    self
      .send(HttpRequest::new(Method::Delete, url), request_id)
      .await?;
    info!(%attachment_id, volume_id = %req.volume_id, instance_id = %req.instance_id, "Attachment deleted");
    Ok(())
  }
}
