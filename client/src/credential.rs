use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use reqwest::Client;
use reqwest::cookie::{CookieStore, Jar};
use safehome_shared::CsrfTokenResponse;
use tracing::{debug, warn};
use url::Url;

use crate::config::{CSRF_COOKIE, CSRF_PATH};
use crate::gateway::endpoint_url;

/// When the manager goes back to the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialPolicy {
    /// Fetch a fresh token before every mutating request.
    #[default]
    RefreshBeforeUse,
    /// Reuse a cached token younger than the TTL. The gateway forces a
    /// refresh and retries once when the backend answers 403.
    Ttl(Duration),
}

impl CredentialPolicy {
    pub fn caches(self) -> bool {
        matches!(self, CredentialPolicy::Ttl(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("token endpoint responded with HTTP {0}")]
    Endpoint(u16),
    #[error("token request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("token endpoint returned neither a cookie nor a csrfToken")]
    Unavailable,
    #[error("invalid token endpoint: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Cookie,
    Body,
    Cached,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    fetched_at: Instant,
}

/// Acquires the anti-forgery token used on every mutating request.
///
/// The token is read from the `safehome_csrf` cookie when the jar holds one
/// for the backend, otherwise from the JSON body of the token endpoint. The
/// body copy is kept in memory for cross-site setups where the cookie is
/// never readable.
#[derive(Clone)]
pub struct CredentialManager {
    inner: Arc<Inner>,
}

struct Inner {
    http: Client,
    jar: Arc<Jar>,
    backend: Url,
    policy: CredentialPolicy,
    cache: Mutex<Option<CachedToken>>,
}

impl CredentialManager {
    pub fn new(http: Client, jar: Arc<Jar>, backend: Url, policy: CredentialPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                jar,
                backend,
                policy,
                cache: Mutex::new(None),
            }),
        }
    }

    pub fn policy(&self) -> CredentialPolicy {
        self.inner.policy
    }

    /// Make sure a token is available before a mutating request. Never fails:
    /// when no token can be obtained the request goes out without one and
    /// the backend's rejection surfaces through the gateway.
    pub async fn ensure_credential(&self) {
        match self.refresh().await {
            Ok(source) => debug!(?source, "anti-forgery token ready"),
            Err(e) => warn!(error = %e, "anti-forgery token unavailable; continuing without it"),
        }
    }

    /// Token to attach: the cookie when readable, else the in-memory copy.
    pub fn token(&self) -> Option<String> {
        self.cookie_token()
            .or_else(|| self.cache().as_ref().map(|cached| cached.value.clone()))
    }

    /// Drop the in-memory token so the next `ensure_credential` refetches.
    pub fn invalidate(&self) {
        self.cache().take();
    }

    async fn refresh(&self) -> Result<TokenSource, CredentialError> {
        if let CredentialPolicy::Ttl(ttl) = self.inner.policy
            && self.cached_within(ttl)
        {
            return Ok(TokenSource::Cached);
        }

        let endpoint = endpoint_url(&self.inner.backend, CSRF_PATH)?;
        let response = self.inner.http.get(endpoint).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CredentialError::Endpoint(status.as_u16()));
        }

        // The jar has already absorbed any Set-Cookie from this response.
        if let Some(token) = self.cookie_token() {
            debug!(token = %token_prefix(&token), "anti-forgery token from cookie");
            self.store(token);
            return Ok(TokenSource::Cookie);
        }

        let body: CsrfTokenResponse = response.json().await?;
        match body.csrf_token.filter(|token| !token.is_empty()) {
            Some(token) => {
                debug!(token = %token_prefix(&token), "anti-forgery token from response body");
                self.store(token);
                Ok(TokenSource::Body)
            }
            None => Err(CredentialError::Unavailable),
        }
    }

    fn cookie_token(&self) -> Option<String> {
        let header = self.inner.jar.cookies(&self.inner.backend)?;
        let cookies = header.to_str().ok()?;
        find_cookie(cookies, CSRF_COOKIE).map(str::to_owned)
    }

    fn cached_within(&self, ttl: Duration) -> bool {
        self.cache()
            .as_ref()
            .is_some_and(|cached| cached.fetched_at.elapsed() < ttl)
    }

    fn store(&self, value: String) {
        *self.cache() = Some(CachedToken {
            value,
            fetched_at: Instant::now(),
        });
    }

    fn cache(&self) -> MutexGuard<'_, Option<CachedToken>> {
        self.inner
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn find_cookie<'a>(cookies: &'a str, name: &str) -> Option<&'a str> {
    cookies
        .split(';')
        .map(str::trim)
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value)
}

/// Log-safe prefix of a token.
pub(crate) fn token_prefix(token: &str) -> String {
    let prefix: String = token.chars().take(10).collect();
    format!("{prefix}...")
}
