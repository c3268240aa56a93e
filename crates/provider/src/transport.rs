use crate::error::BackendError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::{
  collections::HashMap,
  fmt,
  sync::{Mutex, PoisonError},
  time::Duration,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Patch,
  Delete,
}

#[derive(Clone, PartialEq)]
pub enum Body {
  Json(serde_json::Value),
  Form(Vec<(String, String)>),
}

impl fmt::Debug for Body {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Body::Json(v) => f.debug_tuple("Json").field(v).finish(),
      // Token requests carry credentials.
      Body::Form(fields) => f
        .debug_tuple("Form")
        .field(&format!("fields={}", fields.len()))
        .finish(),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
  pub method: Method,
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: Option<Body>,
}

impl HttpRequest {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    HttpRequest {
      method,
      url: url.into(),
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn json(mut self, body: serde_json::Value) -> Self {
    self.body = Some(Body::Json(body));
    self
  }

  pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
    self.body = Some(Body::Form(fields));
    self
  }

  pub fn header_value(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
  pub status: u16,
  /// Header names are lower case.
  pub headers: HashMap<String, String>,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    HttpResponse {
      status,
      headers: HashMap::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  #[inline]
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn etag(&self) -> Option<&str> {
    self.headers.get("etag").map(String::as_str)
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T, BackendError> {
    serde_json::from_slice(&self.body).map_err(|e| {
      BackendError::decode(format!(
        "failed to decode response (status {}): {}",
        self.status, e
      ))
    })
  }
}

/// The narrow HTTP capability the backend client and the token manager
/// depend on.
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, BackendError>;
}

pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new(timeout: Duration) -> Result<Self, BackendError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| BackendError::transport(format!("failed to build http client: {}", e)))?;

    Ok(ReqwestTransport { client })
  }
}

fn map_reqwest_error(e: reqwest::Error) -> BackendError {
  if e.is_timeout() {
    BackendError::timeout(format!("Client.Timeout exceeded: {}", e))
  } else if e.is_decode() {
    BackendError::decode(e.to_string())
  } else {
    BackendError::transport(e.to_string())
  }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, BackendError> {
    let method = match request.method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
    };

    let mut builder = self.client.request(method, &request.url);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    builder = match request.body {
      None => builder,
      Some(Body::Json(v)) => builder.json(&v),
      Some(Body::Form(fields)) => builder.form(&fields),
    };

    let response = builder.send().await.map_err(map_reqwest_error)?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| {
        v.to_str()
          .ok()
          .map(|v| (k.as_str().to_ascii_lowercase(), v.to_owned()))
      })
      .collect();
    let body = response.bytes().await.map_err(map_reqwest_error)?.to_vec();

    Ok(HttpResponse {
      status,
      headers,
      body,
    })
  }
}

type Handler = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse, BackendError> + Send + Sync>;

/// In-memory transport. Every request is recorded and answered by the
/// handler.
pub struct MemoryTransport {
  handler: Handler,
  requests: Mutex<Vec<HttpRequest>>,
}

impl MemoryTransport {
  pub fn new<F>(handler: F) -> Self
  where
    F: Fn(&HttpRequest) -> Result<HttpResponse, BackendError> + Send + Sync + 'static,
  {
    MemoryTransport {
      handler: Box::new(handler),
      requests: Mutex::new(Vec::new()),
    }
  }

  pub fn requests(&self) -> Vec<HttpRequest> {
    self
      .requests
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }
}

#[async_trait]
impl HttpTransport for MemoryTransport {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, BackendError> {
    let response = (self.handler)(&request);
    self
      .requests
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(request);
    response
  }
}
