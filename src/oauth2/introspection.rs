use dashmap::DashMap;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

/// Errors from [`IntrospectionCache::is_active`]. None of them are cached.
#[derive(Debug, Error)]
pub enum IntrospectionError {
    /// The endpoint answered with a status other than 200.
    #[error("introspection endpoint returned HTTP {status}")]
    UpstreamFailure { status: u16 },

    /// Connection, TLS or timeout failure.
    #[error("introspection request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The 200 body was not an introspection response.
    #[error("invalid introspection response: {0}")]
    Decode(String),

    #[error("invalid introspection endpoint '{0}'")]
    InvalidEndpoint(String),
}

/// RFC 7662 introspection response. Only `active` drives the cache; the
/// remaining members are decoded when present.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

/// Introspection settings loaded from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntrospectionConfig {
    pub url: String,
    pub cache_ttl: Duration,
    pub timeout_ms: u64,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl IntrospectionConfig {
    /// Load configuration from environment variables
    ///
    /// - `SERVICE_INTROSPECTION_URL`: endpoint URL (required; `None` when unset)
    /// - `SERVICE_INTROSPECTION_TTL_SECS`: verdict cache TTL (default: 60)
    /// - `SERVICE_INTROSPECTION_TIMEOUT_MS`: request timeout (default: 500)
    /// - `SERVICE_INTROSPECTION_CLIENT_ID` / `SERVICE_INTROSPECTION_CLIENT_SECRET`:
    ///   HTTP Basic credentials for the endpoint
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("SERVICE_INTROSPECTION_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())?;

        let ttl_secs = std::env::var("SERVICE_INTROSPECTION_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        let timeout_ms = std::env::var("SERVICE_INTROSPECTION_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(500);

        Some(Self {
            url,
            cache_ttl: Duration::from_secs(ttl_secs),
            timeout_ms,
            client_id: std::env::var("SERVICE_INTROSPECTION_CLIENT_ID").ok(),
            client_secret: std::env::var("SERVICE_INTROSPECTION_CLIENT_SECRET").ok(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedVerdict {
    active: bool,
    expires_at: Instant,
}

/// TTL cache in front of an OAuth2 token introspection endpoint (RFC 7662).
///
/// # Flow
///
/// 1. Cached verdict younger than the TTL → returned without a request
/// 2. Otherwise `POST` the token as `application/x-www-form-urlencoded`
/// 3. HTTP 200 → decode `{"active": bool}`, cache it for the TTL
/// 4. Anything else → error, nothing cached
///
/// Inactive verdicts are cached like active ones. Concurrent misses for the
/// same token may each call the endpoint; the last answer is kept.
///
/// ```rust
/// use service_common::oauth2::IntrospectionCache;
/// use std::time::Duration;
///
/// let cache = IntrospectionCache::new("https://auth.example.com/oauth2/introspect")
///     .timeout_ms(1000)
///     .cache_ttl(Duration::from_secs(30))
///     .client_credentials("resource-server", "s3cret");
/// assert!(cache.is_empty());
/// ```
pub struct IntrospectionCache {
    endpoint: String,
    timeout_ms: u64,
    cache_ttl: Duration,
    credentials: Option<(String, String)>,
    client: OnceCell<reqwest::Client>,
    cache: DashMap<String, CachedVerdict>,
}

impl IntrospectionCache {
    /// Create a cache for `endpoint`.
    ///
    /// The URL is validated on first use; an unusable URL surfaces as
    /// [`IntrospectionError::InvalidEndpoint`].
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout_ms: 500,
            cache_ttl: Duration::from_secs(60),
            credentials: None,
            client: OnceCell::new(),
            cache: DashMap::new(),
        }
    }

    pub fn from_config(config: &IntrospectionConfig) -> Self {
        let cache = Self::new(config.url.clone())
            .timeout_ms(config.timeout_ms)
            .cache_ttl(config.cache_ttl);
        match (&config.client_id, &config.client_secret) {
            (Some(id), Some(secret)) => cache.client_credentials(id.clone(), secret.clone()),
            _ => cache,
        }
    }

    /// Configure the HTTP request timeout in milliseconds
    ///
    /// Default: 500ms
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Configure the TTL for cached verdicts
    ///
    /// Default: 60 seconds
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Authenticate introspection calls with HTTP Basic credentials.
    pub fn client_credentials(mut self, id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.credentials = Some((id.into(), secret.into()));
        self
    }

    /// Use a preconfigured HTTP client (proxies, custom roots).
    pub fn client(self, client: reqwest::Client) -> Self {
        Self {
            client: OnceCell::new_with(Some(client)),
            ..self
        }
    }

    /// Whether `token` is currently active.
    ///
    /// # Errors
    ///
    /// See [`IntrospectionError`]. Failed lookups leave the cache untouched,
    /// so the next call retries the endpoint.
    pub async fn is_active(&self, token: &str) -> Result<bool, IntrospectionError> {
        if let Some(active) = self.cached(token) {
            debug!(active, "Introspection cache hit");
            return Ok(active);
        }

        let response = self.introspect(token).await?;
        self.cache.insert(
            token.to_string(),
            CachedVerdict {
                active: response.active,
                expires_at: Instant::now() + self.cache_ttl,
            },
        );
        debug!(
            active = response.active,
            ttl_secs = self.cache_ttl.as_secs(),
            "Cached introspection verdict"
        );
        Ok(response.active)
    }

    /// Call the endpoint without consulting or updating the cache.
    pub async fn introspect(
        &self,
        token: &str,
    ) -> Result<IntrospectionResponse, IntrospectionError> {
        let url = self.endpoint_url()?;
        let client = self
            .client
            .get_or_try_init(|| async { reqwest::Client::builder().build() })
            .await?;

        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("token", token)
            .finish();

        let mut request = client
            .post(url)
            .timeout(Duration::from_millis(self.timeout_ms))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ACCEPT, "application/json")
            .body(body);
        if let Some((id, secret)) = &self.credentials {
            request = request.basic_auth(id, Some(secret));
        }

        let response = request.send().await.map_err(|e| {
            warn!(endpoint = %self.endpoint, error = %e, "Introspection request failed");
            IntrospectionError::Request(e)
        })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            warn!(
                endpoint = %self.endpoint,
                status = status.as_u16(),
                "Introspection endpoint rejected request"
            );
            return Err(IntrospectionError::UpstreamFailure {
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice::<IntrospectionResponse>(&bytes)
            .map_err(|e| IntrospectionError::Decode(e.to_string()))
    }

    fn cached(&self, token: &str) -> Option<bool> {
        let entry = self.cache.get(token)?;
        if Instant::now() < entry.expires_at {
            Some(entry.active)
        } else {
            None
        }
    }

    fn endpoint_url(&self) -> Result<Url, IntrospectionError> {
        let url = Url::parse(&self.endpoint)
            .map_err(|_| IntrospectionError::InvalidEndpoint(self.endpoint.clone()))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            _ => Err(IntrospectionError::InvalidEndpoint(self.endpoint.clone())),
        }
    }

    /// Drop the cached verdict for `token`, e.g. after a revocation.
    pub fn invalidate(&self, token: &str) -> bool {
        self.cache.remove(token).is_some()
    }

    /// Remove expired verdicts; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.cache.len();
        self.cache.retain(|_, verdict| now < verdict.expires_at);
        before.saturating_sub(self.cache.len())
    }

    /// Number of cached verdicts, expired ones included.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
