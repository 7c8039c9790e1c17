//! Clinic REST API client
//!
//! Provides a typed HTTP client for the clinic backend. Handles the bearer
//! header, endpoint construction, request timeouts and the classification of
//! every failure into a [`RemoteError`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use medsync_api::client::RestClient;
//! use medsync_core::domain::EntityKind;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = RestClient::new("https://clinic.example.org/api")?.with_access_token("token");
//! let patients = client.list(EntityKind::Patient, None).await?;
//! println!("{} patients", patients.len());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;
use tracing::{debug, warn};

use medsync_core::config::ServerConfig;
use medsync_core::domain::{record::into_record_data, EntityKind, RecordData, RecordId};
use medsync_core::ports::RemoteError;

/// Default time budget of a push/pull request
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Query parameter carrying the lower bound of a changed-since listing
pub const CHANGED_SINCE_PARAM: &str = "updatedSince";

// ============================================================================
// Error classification
// ============================================================================

/// Maps a reqwest failure to the remote error taxonomy
pub fn classify_transport_error(err: &reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else if err.is_decode() {
        RemoteError::InvalidResponse(err.to_string())
    } else {
        RemoteError::Transport(err.to_string())
    }
}

/// Turns a response into its JSON body, classifying non-success statuses
async fn read_json(response: Response) -> Result<Value, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RemoteError::from_status(status.as_u16(), body));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| classify_transport_error(&e))?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|e| RemoteError::InvalidResponse(e.to_string()))
}

/// Extracts a record object from a response body
///
/// Accepts the bare record or a `{"data": {...}}` envelope.
fn record_from_body(body: Value) -> Result<RecordData, RemoteError> {
    let body = match body {
        Value::Object(mut map) if map.get("data").is_some_and(Value::is_object) => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };
    into_record_data(body).map_err(|e| RemoteError::InvalidResponse(e.to_string()))
}

/// Extracts a list of records from a response body
///
/// Accepts a bare array or an envelope holding it under `data` or `items`.
fn records_from_body(body: Value) -> Result<Vec<RecordData>, RemoteError> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("data").or_else(|| map.remove("items")) {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(RemoteError::InvalidResponse(
                    "list response has no data array".to_string(),
                ))
            }
        },
        other => {
            return Err(RemoteError::InvalidResponse(format!(
                "expected a list of records, got {other}"
            )))
        }
    };

    items
        .into_iter()
        .map(|item| into_record_data(item).map_err(|e| RemoteError::InvalidResponse(e.to_string())))
        .collect()
}

// ============================================================================
// RestClient
// ============================================================================

/// HTTP client for the clinic REST API
///
/// Wraps `reqwest::Client` with the bearer header and base URL
/// construction. Every call returns a [`RemoteError`] on failure.
#[derive(Debug, Clone)]
pub struct RestClient {
    /// The underlying HTTP client, carrying the request timeout
    client: Client,
    /// Base URL for API requests, without trailing slash
    base_url: String,
    /// Bearer token, if the backend requires one
    access_token: Option<String>,
}

impl RestClient {
    /// Creates a client for `base_url` with the default request timeout
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Creates a client for `base_url` with a custom request timeout
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            access_token: None,
        })
    }

    /// Creates a client from the `server` configuration section
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let client = Self::with_timeout(&config.base_url, config.request_timeout())?;
        Ok(match &config.access_token {
            Some(token) => client.with_access_token(token.clone()),
            None => client,
        })
    }

    /// Sets the bearer token sent with every request
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Replaces the bearer token (e.g. after the session layer refreshed it)
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = Some(token.into());
        debug!("Updated RestClient access token");
    }

    /// Returns the base URL for API requests
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates an authenticated request builder for the given method and path
    ///
    /// Automatically prepends the base URL and adds the Authorization header.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, &url);
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Path of one record under its collection endpoint
    pub fn record_path(entity: EntityKind, id: &RecordId) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(id.as_str().as_bytes()).collect();
        format!("{}/{}", entity.endpoint(), encoded)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Value, RemoteError> {
        let response = builder
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;
        read_json(response).await
    }

    /// `POST {endpoint}` with the full payload
    pub async fn create(
        &self,
        entity: EntityKind,
        data: &RecordData,
    ) -> Result<RecordData, RemoteError> {
        debug!(entity = %entity, "POST {}", entity.endpoint());
        let body = self
            .send(self.request(Method::POST, entity.endpoint()).json(data))
            .await?;
        record_from_body(body)
    }

    /// `PATCH {endpoint}/{id}` with the changed fields
    pub async fn update(
        &self,
        entity: EntityKind,
        id: &RecordId,
        patch: &RecordData,
    ) -> Result<RecordData, RemoteError> {
        let path = Self::record_path(entity, id);
        debug!(entity = %entity, id = %id, "PATCH {}", path);
        let body = self
            .send(self.request(Method::PATCH, &path).json(patch))
            .await?;
        record_from_body(body)
    }

    /// `DELETE {endpoint}/{id}`
    pub async fn delete(&self, entity: EntityKind, id: &RecordId) -> Result<(), RemoteError> {
        let path = Self::record_path(entity, id);
        debug!(entity = %entity, id = %id, "DELETE {}", path);
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    /// `GET {endpoint}/{id}`
    pub async fn get(&self, entity: EntityKind, id: &RecordId) -> Result<RecordData, RemoteError> {
        let path = Self::record_path(entity, id);
        debug!(entity = %entity, id = %id, "GET {}", path);
        let body = self.send(self.request(Method::GET, &path)).await?;
        record_from_body(body)
    }

    /// `GET {endpoint}[?updatedSince=...]`
    pub async fn list(
        &self,
        entity: EntityKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RecordData>, RemoteError> {
        let mut builder = self.request(Method::GET, entity.endpoint());
        if let Some(since) = since {
            builder = builder.query(&[(
                CHANGED_SINCE_PARAM,
                since.to_rfc3339_opts(SecondsFormat::Millis, true),
            )]);
        }

        let records = records_from_body(self.send(builder).await?)?;
        debug!(entity = %entity, count = records.len(), "Listed records");
        Ok(records)
    }

    /// `GET {health_path}` with its own time budget
    ///
    /// Any HTTP response, whatever its status, means the server is reachable.
    pub async fn probe(&self, health_path: &str, timeout: Duration) -> Result<(), RemoteError> {
        let response = self
            .request(Method::GET, health_path)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Health probe answered with error status");
        }
        Ok(())
    }
}
