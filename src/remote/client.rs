use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::Config;

/// Failure talking to the travel planner API.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
  /// Connection refused, DNS, timeout and friends
  #[error("network error: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("{method} {endpoint} returned {status}")]
  Status {
    method: Method,
    endpoint: String,
    status: StatusCode,
  },

  #[error("invalid endpoint {endpoint}: {reason}")]
  InvalidEndpoint { endpoint: String, reason: String },
}

impl RemoteError {
  /// 4xx responses: the server understood the request and refused it.
  pub fn is_rejection(&self) -> bool {
    matches!(self, Self::Status { status, .. } if status.is_client_error())
  }
}

/// The remote side of the sync protocol.
#[async_trait]
pub trait RemoteApi: Send + Sync {
  /// Send a JSON request. Any 2xx is success; the body is returned as JSON
  /// (`null` when empty).
  async fn send(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<&Value>,
  ) -> Result<Value, RemoteError>;

  /// GET a resource.
  async fn fetch(&self, endpoint: &str) -> Result<Value, RemoteError> {
    self.send(Method::GET, endpoint, None).await
  }
}

/// reqwest-backed API client
#[derive(Clone)]
pub struct HttpRemote {
  client: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl HttpRemote {
  pub fn new(config: &Config) -> Result<Self> {
    let base_url = config
      .api
      .base_url
      .as_deref()
      .ok_or_else(|| eyre!("No API URL configured. Set api.base_url or pass --api-url."))?;

    Self::with_base_url(
      base_url,
      Duration::from_secs(config.api.timeout_secs),
      Config::get_api_token(),
    )
  }

  pub fn with_base_url(base_url: &str, timeout: Duration, token: Option<String>) -> Result<Self> {
    let base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid API URL {}: {}", base_url, e))?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      token,
    })
  }

  /// Resolve a logical endpoint (`/trips/1`) against the base URL, keeping
  /// any path prefix the base carries.
  fn resolve(&self, endpoint: &str) -> Result<Url, RemoteError> {
    let joined = format!(
      "{}/{}",
      self.base_url.as_str().trim_end_matches('/'),
      endpoint.trim_start_matches('/')
    );

    Url::parse(&joined).map_err(|e| RemoteError::InvalidEndpoint {
      endpoint: endpoint.to_string(),
      reason: e.to_string(),
    })
  }
}

#[async_trait]
impl RemoteApi for HttpRemote {
  async fn send(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<&Value>,
  ) -> Result<Value, RemoteError> {
    let url = self.resolve(endpoint)?;
    debug!(%method, %url, "remote request");

    let mut request = self.client.request(method.clone(), url);
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }
    if let Some(body) = body {
      request = request.json(body);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
      return Err(RemoteError::Status {
        method,
        endpoint: endpoint.to_string(),
        status,
      });
    }

    let text = response.text().await?;
    if text.trim().is_empty() {
      return Ok(Value::Null);
    }

    // Non-JSON success bodies are kept as plain strings
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
  }
}
