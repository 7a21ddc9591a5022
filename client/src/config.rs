use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::credential::CredentialPolicy;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";
pub const USER_AGENT: &str = "safehome-client/0.1";

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_COOKIE: &str = "safehome_csrf";
pub const CSRF_PATH: &str = "/auth/csrf";

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_HISTORY_REFRESH_SECS: u64 = 60;

pub const RECONNECT_BASE_MS: u64 = 500;
pub const RECONNECT_MAX_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub backend_url: Url,
    pub socket_url: Url,
    pub http_timeout: Duration,
    pub connect_timeout: Duration,
    pub history_refresh: Duration,
    pub credential_policy: CredentialPolicy,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, url::ParseError> {
        let backend_url = backend_url()?;
        Ok(Self {
            socket_url: socket_url(&backend_url),
            backend_url,
            http_timeout: http_timeout(),
            connect_timeout: connect_timeout(),
            history_refresh: history_refresh_interval(),
            credential_policy: credential_policy(),
        })
    }

    /// Defaults pointed at an explicit backend, ignoring the environment.
    pub fn for_backend(backend_url: Url) -> Self {
        Self {
            socket_url: socket_url_for(&backend_url),
            backend_url,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            history_refresh: Duration::from_secs(DEFAULT_HISTORY_REFRESH_SECS),
            credential_policy: CredentialPolicy::default(),
        }
    }
}

pub fn backend_url() -> Result<Url, url::ParseError> {
    if let Ok(raw) = std::env::var("SAFEHOME_BACKEND_URL") {
        match Url::parse(raw.trim()) {
            Ok(url) => return Ok(url),
            Err(e) => warn!(error = %e, value = %raw, "ignoring invalid SAFEHOME_BACKEND_URL"),
        }
    }
    Url::parse(DEFAULT_BACKEND_URL)
}

pub fn socket_url(backend: &Url) -> Url {
    if let Ok(raw) = std::env::var("SAFEHOME_SOCKET_URL") {
        match Url::parse(raw.trim()) {
            Ok(url) => return url,
            Err(e) => warn!(error = %e, value = %raw, "ignoring invalid SAFEHOME_SOCKET_URL"),
        }
    }
    socket_url_for(backend)
}

/// The push channel lives on the backend origin, upgraded to ws/wss.
pub fn socket_url_for(backend: &Url) -> Url {
    let mut url = backend.clone();
    let scheme = match backend.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => other,
    };
    if url.set_scheme(scheme).is_err() {
        warn!(scheme, url = %backend, "could not derive websocket scheme; using backend URL as-is");
    }
    url
}

pub fn http_timeout() -> Duration {
    env_secs("SAFEHOME_HTTP_TIMEOUT_SECS")
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
}

pub fn connect_timeout() -> Duration {
    env_secs("SAFEHOME_CONNECT_TIMEOUT_SECS")
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
}

pub fn history_refresh_interval() -> Duration {
    env_secs("SAFEHOME_HISTORY_REFRESH_SECS")
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_HISTORY_REFRESH_SECS))
}

/// Unset keeps the refresh-before-use default; a TTL trusts the cached token
/// for that many seconds.
pub fn credential_policy() -> CredentialPolicy {
    env_secs("SAFEHOME_CSRF_TTL_SECS")
        .map(|secs| CredentialPolicy::Ttl(Duration::from_secs(secs)))
        .unwrap_or_default()
}

fn env_secs(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
}
