use std::sync::Arc;
use std::time::Instant;

use reqwest::StatusCode;
use tokio::time::sleep;

use crate::credentials::Credentials;
use crate::env::EnvVars;
use crate::errors::{
    Error, Result, RetryMetadata, TransportError, TransportErrorKind,
};
use crate::http::{parse_api_error_parts, HeaderList, HttpOptions, RetryPolicy};
use crate::identity::ClientIdentity;
use crate::request::{self, OutboundRequest};
use crate::{
    DEFAULT_CLIENT_HEADER, DEFAULT_GEMINI_API_VERSION, DEFAULT_GEMINI_BASE_URL,
    DEFAULT_VERTEX_API_VERSION, DEFAULT_VERTEX_BASE_URL,
};

/// Construction-time configuration.
///
/// Everything is optional except the choice of endpoint family: identity
/// fields left unset fall back to the process environment, per-field defaults
/// apply afterwards.
#[derive(Clone, Default)]
pub struct Config {
    /// Target the Vertex AI endpoint family instead of the Gemini
    /// Developer API.
    pub vertex: bool,
    pub api_key: Option<String>,
    /// Project ID for credential mode (Vertex AI only).
    pub project: Option<String>,
    /// Location/region for credential mode (Vertex AI only).
    pub location: Option<String>,
    /// Explicit credentials; when unset and a project is in play,
    /// application-default credentials are resolved.
    pub credentials: Option<Arc<dyn Credentials>>,
    /// Client-level HTTP options, merged over the computed defaults.
    pub http_options: Option<HttpOptions>,
    /// Overrides the default key-mode base URL (beats `GOOGLE_GEMINI_BASE_URL`).
    pub gemini_base_url: Option<String>,
    /// Overrides the default credential-mode base URL (beats `GOOGLE_VERTEX_BASE_URL`).
    pub vertex_base_url: Option<String>,
    /// Custom transport; a default client is built when unset.
    pub http_client: Option<reqwest::Client>,
}

/// Client for the Gemini Developer API and Vertex AI.
///
/// Identity and default options are fixed at construction; the client is
/// cheap to clone and safe for concurrent use.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    identity: ClientIdentity,
    options: HttpOptions,
    retry: RetryPolicy,
    http: reqwest::Client,
}

impl Client {
    pub fn new(cfg: Config) -> Result<Self> {
        Self::with_env(cfg, EnvVars::from_process())
    }

    pub(crate) fn with_env(cfg: Config, env: EnvVars) -> Result<Self> {
        if let Some(flag) = &env.use_vertexai {
            tracing::debug!(
                flag = %flag,
                "GOOGLE_GENAI_USE_VERTEXAI is advisory; the endpoint family is \
                 selected by Config::vertex"
            );
        }

        let identity = if cfg.vertex {
            ClientIdentity::resolve_vertex(
                cfg.api_key,
                cfg.project,
                cfg.location,
                cfg.credentials,
                &env,
            )?
        } else {
            ClientIdentity::resolve_gemini(cfg.api_key, &env)?
        };

        let defaults = default_http_options(
            &identity,
            &env,
            cfg.gemini_base_url.as_deref(),
            cfg.vertex_base_url.as_deref(),
        );
        let options = defaults.merged_with(cfg.http_options.as_ref());
        let retry = options.retry.clone().unwrap_or_default();

        let http = match cfg.http_client {
            Some(client) => client,
            None => reqwest::Client::builder().build().map_err(|err| TransportError {
                kind: TransportErrorKind::Connect,
                message: "failed to build http client".to_string(),
                source: Some(err),
                retries: None,
            })?,
        };

        Ok(Self {
            inner: Arc::new(ClientInner {
                identity,
                options,
                retry,
                http,
            }),
        })
    }

    /// Whether the client targets the Vertex AI endpoint family.
    pub fn vertex(&self) -> bool {
        self.inner.identity.vertex()
    }

    pub fn api_key(&self) -> Option<&str> {
        self.inner.identity.api_key()
    }

    pub fn project(&self) -> Option<&str> {
        self.inner.identity.project()
    }

    pub fn location(&self) -> Option<&str> {
        self.inner.identity.location()
    }

    /// The resolved client-level options (defaults plus configured overrides).
    pub fn http_options(&self) -> &HttpOptions {
        &self.inner.options
    }

    /// Sends an API request for the given method and path-relative endpoint.
    ///
    /// `body_json` is the serialized JSON request body for body-carrying
    /// methods; `per_call` options are merged over the client-level options.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        body_json: Option<&str>,
        per_call: Option<&HttpOptions>,
    ) -> Result<reqwest::Response> {
        let mut outbound = request::assemble(
            &self.inner.identity,
            &self.inner.options,
            method,
            path,
            body_json,
            per_call,
        )?;
        self.inner.identity.apply_auth(&mut outbound.headers).await?;
        self.inner.send_with_retry(outbound).await
    }

    /// Sends raw bytes to a fully-qualified URL. Only `POST` is supported.
    pub async fn upload(
        &self,
        method: &str,
        url: &str,
        bytes: Vec<u8>,
        per_call: Option<&HttpOptions>,
    ) -> Result<reqwest::Response> {
        let mut outbound =
            request::assemble_upload(&self.inner.options, method, url, bytes, per_call)?;
        self.inner.identity.apply_auth(&mut outbound.headers).await?;
        self.inner.send_with_retry(outbound).await
    }
}

/// Computes the default options for the resolved identity: default headers,
/// endpoint-family base URL and API version.
///
/// Base URL precedence per family: explicit config override, then the
/// environment variable, then the computed default.
pub(crate) fn default_http_options(
    identity: &ClientIdentity,
    env: &EnvVars,
    gemini_base_url: Option<&str>,
    vertex_base_url: Option<&str>,
) -> HttpOptions {
    let mut headers = HeaderList::new();
    headers.set("Content-Type", "application/json");
    headers.set("user-agent", DEFAULT_CLIENT_HEADER);
    headers.set("x-goog-api-client", DEFAULT_CLIENT_HEADER);

    let (base_url, api_version) = if identity.vertex() {
        let base_url = vertex_base_url
            .map(str::to_string)
            .or_else(|| env.vertex_base_url.clone())
            .unwrap_or_else(|| match (identity.api_key(), identity.location()) {
                (Some(_), _) => DEFAULT_VERTEX_BASE_URL.to_string(),
                (None, Some(location)) if location.eq_ignore_ascii_case("global") => {
                    DEFAULT_VERTEX_BASE_URL.to_string()
                }
                (None, Some(location)) => {
                    format!("https://{location}-aiplatform.googleapis.com")
                }
                (None, None) => DEFAULT_VERTEX_BASE_URL.to_string(),
            });
        (base_url, DEFAULT_VERTEX_API_VERSION)
    } else {
        let base_url = gemini_base_url
            .map(str::to_string)
            .or_else(|| env.gemini_base_url.clone())
            .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string());
        (base_url, DEFAULT_GEMINI_API_VERSION)
    };

    HttpOptions {
        base_url: Some(base_url),
        api_version: Some(api_version.to_string()),
        headers: Some(headers),
        timeout: None,
        extra_body: None,
        retry: None,
    }
}

impl ClientInner {
    async fn send_with_retry(&self, request: OutboundRequest) -> Result<reqwest::Response> {
        let retry = request.retry.clone().unwrap_or_else(|| self.retry.clone());
        let max_attempts = retry.max_attempts.max(1);
        let mut state = RetryState::new();
        let start = Instant::now();

        for attempt in 1..=max_attempts {
            let mut builder = self
                .http
                .request(request.method.clone(), request.url.clone())
                .headers(request.headers.clone());
            if let Some(timeout) = request.timeout {
                builder = builder.timeout(timeout);
            }
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            match builder.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        tracing::debug!(
                            method = %request.method,
                            url = %request.url,
                            status = %status,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            attempt,
                            "request completed"
                        );
                        return Ok(resp);
                    }
                    state.record_attempt(attempt);
                    state.record_status(status);

                    if retry.should_retry_status(status) && attempt < max_attempts {
                        sleep(retry.backoff_delay(attempt)).await;
                        continue;
                    }

                    tracing::warn!(
                        method = %request.method,
                        url = %request.url,
                        status = %status,
                        attempt,
                        "request failed; returning error"
                    );
                    let body = resp.text().await.unwrap_or_default();
                    return Err(parse_api_error_parts(status, body, state.metadata()));
                }
                Err(err) => {
                    state.record_attempt(attempt);
                    state.record_error(&err);
                    if retry.should_retry_error(&err) && attempt < max_attempts {
                        sleep(retry.backoff_delay(attempt)).await;
                        continue;
                    }

                    tracing::warn!(
                        method = %request.method,
                        url = %request.url,
                        attempt,
                        error = %err,
                        "transport error"
                    );
                    return Err(to_transport_error(err, state.metadata()));
                }
            }
        }

        Err(Error::Transport(TransportError {
            kind: TransportErrorKind::Other,
            message: "request failed".to_string(),
            source: None,
            retries: state.metadata(),
        }))
    }
}

fn to_transport_error(err: reqwest::Error, retries: Option<RetryMetadata>) -> Error {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else if err.is_request() {
        TransportErrorKind::Request
    } else {
        TransportErrorKind::Other
    };

    TransportError {
        kind,
        message: err.to_string(),
        source: Some(err),
        retries,
    }
    .into()
}

/// Tracks retry state across attempts.
#[derive(Default)]
struct RetryState {
    attempts: u32,
    last_status: Option<u16>,
    last_error: Option<String>,
}

impl RetryState {
    fn new() -> Self {
        Self::default()
    }

    fn record_attempt(&mut self, attempt: u32) {
        self.attempts = attempt;
    }

    fn record_status(&mut self, status: StatusCode) {
        self.last_status = Some(status.as_u16());
    }

    fn record_error(&mut self, err: &reqwest::Error) {
        self.last_error = Some(err.to_string());
    }

    fn metadata(&self) -> Option<RetryMetadata> {
        if self.attempts <= 1 {
            None
        } else {
            Some(RetryMetadata {
                attempts: self.attempts,
                last_status: self.last_status,
                last_error: self.last_error.clone(),
            })
        }
    }
}
