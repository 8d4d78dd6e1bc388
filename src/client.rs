//! Outbound clients for the dispatcher and the database.
//!
//! Both collaborators sit behind traits ([`Dispatcher`], [`CacheLookup`]) so
//! the registration loop and the router can be driven by in-process fakes in
//! tests. The HTTP implementations speak JSON over `reqwest`.

use crate::types::{CacheRecord, ItemIdentifier};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Status string of a successful control-plane response.
pub const STATUS_OK: &str = "ok";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        source: reqwest::Error,
    },
    #[error("{endpoint} answered HTTP {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },
    #[error("{endpoint} rejected the request: {message}")]
    Rejected { endpoint: String, message: String },
}

/// What this worker announces to a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub instance: String,
    pub domains: Vec<String>,
    pub concurrency: u32,
    pub queue_size: u32,
    /// Capability descriptor: action → recognised parameter names.
    pub actions: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
    /// Seconds until the dispatcher wants to hear from us again. Zero means unset.
    #[serde(default)]
    pub next_call_wait: u64,
}

impl ControlResponse {
    pub fn ok(next_call_wait: u64) -> Self {
        Self {
            status: STATUS_OK.to_string(),
            message: String::new(),
            next_call_wait,
        }
    }
}

/// Control-plane calls to one dispatcher endpoint.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    fn endpoint(&self) -> &str;

    /// Register (or renew). Returns the dispatcher's next-call interval.
    async fn add_controller(&self, descriptor: &ControllerDescriptor) -> Result<Duration, ClientError>;

    async fn remove_controller(&self, descriptor: &ControllerDescriptor) -> Result<(), ClientError>;

    async fn ping(&self) -> Result<String, ClientError>;
}

/// Cache lookups against the database.
#[async_trait]
pub trait CacheLookup: Send + Sync {
    /// `Ok(None)` when the database has no record for `(item, action)`.
    async fn get_cache(&self, item: &ItemIdentifier, action: &str) -> Result<Option<CacheRecord>, ClientError>;
}

fn check_status(endpoint: &str, response: ControlResponse) -> Result<ControlResponse, ClientError> {
    if response.status.eq_ignore_ascii_case(STATUS_OK) {
        Ok(response)
    } else {
        Err(ClientError::Rejected {
            endpoint: endpoint.to_string(),
            message: format!("{}: {}", response.status, response.message),
        })
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            message,
        });
    }
    response.json().await.map_err(|source| ClientError::Transport {
        endpoint: endpoint.to_string(),
        source,
    })
}

/// Shared HTTP plumbing for both clients.
#[derive(Debug, Clone)]
struct HttpEndpoint {
    base: String,
    http: reqwest::Client,
}

impl HttpEndpoint {
    fn new(base: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base = base.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ClientError::Transport {
                endpoint: base.clone(),
                source,
            })?;
        Ok(Self { base, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ClientError> {
        request.send().await.map_err(|source| ClientError::Transport {
            endpoint: self.base.clone(),
            source,
        })
    }

    async fn ping(&self) -> Result<String, ClientError> {
        let response = self.send(self.http.get(self.url("ping"))).await?;
        let body: ControlResponse = read_json(&self.base, response).await?;
        Ok(check_status(&self.base, body)?.message)
    }
}

/// Dispatcher reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    inner: HttpEndpoint,
}

impl HttpDispatcher {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            inner: HttpEndpoint::new(base, timeout)?,
        })
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    fn endpoint(&self) -> &str {
        &self.inner.base
    }

    async fn add_controller(&self, descriptor: &ControllerDescriptor) -> Result<Duration, ClientError> {
        let request = self.inner.http.post(self.inner.url("controllers")).json(descriptor);
        let response = self.inner.send(request).await?;
        let body: ControlResponse = read_json(self.endpoint(), response).await?;
        let body = check_status(self.endpoint(), body)?;
        Ok(Duration::from_secs(body.next_call_wait))
    }

    async fn remove_controller(&self, descriptor: &ControllerDescriptor) -> Result<(), ClientError> {
        let request = self.inner.http.delete(self.inner.url("controllers")).json(descriptor);
        let response = self.inner.send(request).await?;
        let body: ControlResponse = read_json(self.endpoint(), response).await?;
        check_status(self.endpoint(), body)?;
        Ok(())
    }

    async fn ping(&self) -> Result<String, ClientError> {
        self.inner.ping().await
    }
}

/// Database reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDatabase {
    inner: HttpEndpoint,
}

impl HttpDatabase {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            inner: HttpEndpoint::new(base, timeout)?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.base
    }

    pub async fn ping(&self) -> Result<String, ClientError> {
        self.inner.ping().await
    }
}

#[async_trait]
impl CacheLookup for HttpDatabase {
    async fn get_cache(&self, item: &ItemIdentifier, action: &str) -> Result<Option<CacheRecord>, ClientError> {
        let mut url = reqwest::Url::parse(&self.inner.url("cache")).map_err(|e| ClientError::Rejected {
            endpoint: self.inner.base.clone(),
            message: format!("invalid database url: {e}"),
        })?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Rejected {
                endpoint: self.inner.base.clone(),
                message: "database url cannot carry a path".to_string(),
            })?
            .extend([item.collection.as_str(), item.signature.as_str(), action]);

        let response = self.inner.send(self.inner.http.get(url)).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json(self.endpoint(), response).await.map(Some)
    }
}
