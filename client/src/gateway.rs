use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::cookie::Jar;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use safehome_shared::{HistoryRange, HistoryResponse, SubjectId};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::config::{CSRF_HEADER, ClientConfig, USER_AGENT};
use crate::credential::{CredentialManager, token_prefix};

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// Non-success status. `message` is the raw response text.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid request URL: {0}")]
    InvalidUrl(String),
}

impl RequestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Status { status, .. } => Some(*status),
            RequestError::Transport(e) => e.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

impl From<url::ParseError> for RequestError {
    fn from(e: url::ParseError) -> Self {
        RequestError::InvalidUrl(e.to_string())
    }
}

/// Request payloads. Only `Json` is serialized by the gateway; the others go
/// out untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Text(String),
    Bytes(Bytes),
    Form(Vec<(String, String)>),
}

impl RequestBody {
    pub fn json<T: Serialize>(value: &T) -> Result<Self, RequestError> {
        Ok(RequestBody::Json(serde_json::to_value(value)?))
    }
}

#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<RequestBody>,
    /// Defaults to true for every method except GET, HEAD and OPTIONS.
    pub needs_credential: Option<bool>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            body: None,
            needs_credential: None,
        }
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Option<RequestBody>) -> Self {
        Self {
            method: Method::POST,
            body,
            needs_credential: None,
        }
    }

    pub fn with_credential(mut self, needs_credential: bool) -> Self {
        self.needs_credential = Some(needs_credential);
        self
    }

    fn wants_credential(&self) -> bool {
        self.needs_credential
            .unwrap_or_else(|| !matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS))
    }
}

/// Content-negotiated response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    Text(String),
}

impl Payload {
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T, RequestError> {
        match self {
            Payload::Json(value) => Ok(serde_json::from_value(value)?),
            Payload::Text(text) => Ok(serde_json::from_str(&text)?),
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Payload::Json(value) => value.to_string(),
            Payload::Text(text) => text,
        }
    }
}

/// Single chokepoint for backend calls. Cheap to clone; clones share the
/// cookie jar and the credential cache.
#[derive(Clone)]
pub struct Gateway {
    http: Client,
    jar: Arc<Jar>,
    backend: Url,
    credentials: CredentialManager,
}

impl Gateway {
    pub fn new(config: &ClientConfig) -> Result<Self, RequestError> {
        let jar = Arc::new(Jar::default());
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_provider(jar.clone())
            .timeout(config.http_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .or_else(|e| {
                warn!(
                    error = %e,
                    "failed to build configured HTTP client, retrying without custom user-agent"
                );
                Client::builder()
                    .cookie_provider(jar.clone())
                    .timeout(config.http_timeout)
                    .connect_timeout(config.connect_timeout)
                    .build()
            })?;
        let credentials = CredentialManager::new(
            http.clone(),
            jar.clone(),
            config.backend_url.clone(),
            config.credential_policy,
        );
        Ok(Self {
            http,
            jar,
            backend: config.backend_url.clone(),
            credentials,
        })
    }

    pub fn backend(&self) -> &Url {
        &self.backend
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    /// Session cookies, shared with the push transport.
    pub fn cookie_jar(&self) -> Arc<Jar> {
        self.jar.clone()
    }

    pub async fn request(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<Payload, RequestError> {
        let url = endpoint_url(&self.backend, path)?;
        self.request_url(url, options).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RequestError> {
        self.request(path, RequestOptions::get()).await?.into_json()
    }

    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<Payload, RequestError> {
        let body = RequestBody::json(body)?;
        self.request(path, RequestOptions::post(Some(body))).await
    }

    /// `GET /subjects/{id}/locations?from=<ISO8601>` for the given range.
    pub async fn history(
        &self,
        subject: &SubjectId,
        range: HistoryRange,
    ) -> Result<HistoryResponse, RequestError> {
        self.history_since(subject, range.horizon(Utc::now())).await
    }

    pub async fn history_since(
        &self,
        subject: &SubjectId,
        from: DateTime<Utc>,
    ) -> Result<HistoryResponse, RequestError> {
        let mut url = endpoint_url(&self.backend, "/subjects")?;
        url.path_segments_mut()
            .map_err(|()| RequestError::InvalidUrl(format!("{} cannot be a base", self.backend)))?
            .push(subject.as_str())
            .push("locations");
        url.query_pairs_mut()
            .append_pair("from", &from.to_rfc3339_opts(SecondsFormat::Millis, true));
        self.request_url(url, RequestOptions::get()).await?.into_json()
    }

    async fn request_url(
        &self,
        url: Url,
        options: RequestOptions,
    ) -> Result<Payload, RequestError> {
        let needs_credential = options.wants_credential();
        let mut response = self.send_once(&url, &options, needs_credential).await?;

        if response.status() == StatusCode::FORBIDDEN
            && needs_credential
            && self.credentials.policy().caches()
        {
            debug!(%url, "403 with a cached anti-forgery token; refreshing and retrying once");
            self.credentials.invalidate();
            response = self.send_once(&url, &options, needs_credential).await?;
        }

        read_payload(response).await
    }

    async fn send_once(
        &self,
        url: &Url,
        options: &RequestOptions,
        needs_credential: bool,
    ) -> Result<Response, RequestError> {
        let mut builder = self.http.request(options.method.clone(), url.clone());
        if let Some(body) = &options.body {
            builder = apply_body(builder, body)?;
        }
        if needs_credential {
            self.credentials.ensure_credential().await;
            match self.credentials.token() {
                Some(token) => {
                    debug!(token = %token_prefix(&token), "attaching anti-forgery token");
                    builder = builder.header(CSRF_HEADER, token);
                }
                None => warn!(%url, "no anti-forgery token available; sending without it"),
            }
        }
        Ok(builder.send().await?)
    }
}

fn apply_body(builder: RequestBuilder, body: &RequestBody) -> Result<RequestBuilder, RequestError> {
    Ok(match body {
        RequestBody::Json(value) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_string(value)?),
        RequestBody::Text(text) => builder.body(text.clone()),
        RequestBody::Bytes(bytes) => builder.body(bytes.clone()),
        RequestBody::Form(pairs) => builder.form(pairs),
    })
}

async fn read_payload(response: Response) -> Result<Payload, RequestError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        let message = if message.is_empty() {
            "Request failed".to_owned()
        } else {
            message
        };
        return Err(RequestError::Status {
            status: status.as_u16(),
            message,
        });
    }

    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| content_type.contains("application/json"));
    let text = response.text().await?;
    if is_json && !text.trim().is_empty() {
        Ok(Payload::Json(serde_json::from_str(&text)?))
    } else {
        Ok(Payload::Text(text))
    }
}

/// Join `path` onto the backend base, keeping any base path prefix.
pub(crate) fn endpoint_url(backend: &Url, path: &str) -> Result<Url, url::ParseError> {
    let base = backend.as_str().trim_end_matches('/');
    let path = path.trim_start_matches('/');
    Url::parse(&format!("{base}/{path}"))
}
