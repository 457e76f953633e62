//! Identity resolution: which authentication mode and endpoint family apply.
//!
//! Resolution runs once at client construction and fixes an immutable
//! [`ClientIdentity`]. Explicit constructor arguments always beat environment
//! values for the same field; conflicting sources are reconciled by the
//! ordered rule list in [`resolve_vertex_fields`], preserved literally so
//! each rule stays independently auditable.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

use crate::credentials::{Credentials, ServiceAccountCredentials};
use crate::env::EnvVars;
use crate::errors::{ConfigError, Error, Result};
use crate::{API_KEY_HEADER, USER_PROJECT_HEADER};

/// Immutable client identity, decided once at construction.
///
/// Invariant: exactly one of `api_key` / `project` is present, and
/// `credentials` is present iff `project` is.
#[derive(Clone)]
pub struct ClientIdentity {
    vertex: bool,
    api_key: Option<String>,
    project: Option<String>,
    location: Option<String>,
    credentials: Option<Arc<dyn Credentials>>,
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("vertex", &self.vertex)
            .field("api_key", &self.api_key)
            .field("project", &self.project)
            .field("location", &self.location)
            .field("credentials", &self.credentials.as_ref().map(|_| "<credentials>"))
            .finish()
    }
}

impl ClientIdentity {
    /// Whether the client targets the Vertex AI endpoint family.
    pub fn vertex(&self) -> bool {
        self.vertex
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Whether requests are scoped to a cloud project (credential mode).
    pub fn uses_project(&self) -> bool {
        self.project.is_some()
    }

    pub(crate) fn credentials(&self) -> Option<&Arc<dyn Credentials>> {
        self.credentials.as_ref()
    }

    /// Resolves a Gemini Developer API (key mode) identity.
    pub(crate) fn resolve_gemini(api_key: Option<String>, env: &EnvVars) -> Result<Self> {
        let api_key = api_key
            .or_else(|| env.api_key().map(str::to_string))
            .ok_or_else(|| {
                ConfigError::new(
                    "API key must either be provided or set in the environment variable \
                     GOOGLE_API_KEY or GEMINI_API_KEY. If both are set, GOOGLE_API_KEY \
                     will be used.",
                )
            })?;
        Ok(Self {
            vertex: false,
            api_key: Some(api_key),
            project: None,
            location: None,
            credentials: None,
        })
    }

    /// Resolves a Vertex AI identity: either project/location + credentials,
    /// or an API key (express mode).
    ///
    /// When a project is in play and no explicit credentials were supplied,
    /// application-default credentials are obtained, scoped to the
    /// cloud-platform scope; failure to obtain them is fatal.
    pub(crate) fn resolve_vertex(
        api_key: Option<String>,
        project: Option<String>,
        location: Option<String>,
        credentials: Option<Arc<dyn Credentials>>,
        env: &EnvVars,
    ) -> Result<Self> {
        let (api_key, project, location) = resolve_vertex_fields(
            api_key,
            project,
            location,
            credentials.is_some(),
            env,
        )?;

        // Only attach credentials when a project is in play; an explicit
        // credential handle without a usable project is discarded above.
        let credentials = match &project {
            Some(_) => Some(match credentials {
                Some(credentials) => credentials,
                None => Arc::new(ServiceAccountCredentials::application_default()?)
                    as Arc<dyn Credentials>,
            }),
            None => None,
        };

        Ok(Self {
            vertex: true,
            api_key,
            project,
            location,
            credentials,
        })
    }

    /// Injects the authentication headers, always applied after configured
    /// headers so they cannot be overridden.
    ///
    /// API-key identities (key mode and Vertex express mode alike) get
    /// `x-goog-api-key`; credential identities get `Authorization: Bearer`
    /// plus `x-goog-user-project` when the credential carries a quota
    /// project. Token refresh may perform network I/O.
    pub(crate) async fn apply_auth(&self, headers: &mut HeaderMap) -> Result<()> {
        if let Some(api_key) = &self.api_key {
            let mut value = HeaderValue::from_str(api_key)
                .map_err(|_| Error::Config(ConfigError::new("API key is not a valid header value")))?;
            value.set_sensitive(true);
            headers.insert(API_KEY_HEADER, value);
            return Ok(());
        }

        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| ConfigError::new("credentials are required"))?;
        let token = credentials.token().await?;
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| Error::Config(ConfigError::new("access token is not a valid header value")))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);

        if let Some(quota_project) = credentials.quota_project_id() {
            headers.insert(
                USER_PROJECT_HEADER,
                HeaderValue::from_str(quota_project).map_err(|_| {
                    Error::Config(ConfigError::new(
                        "quota project id is not a valid header value",
                    ))
                })?,
            );
        }
        Ok(())
    }
}

/// The ordered precedence rule list for Vertex AI identity fields.
///
/// Returns the resolved `(api_key, project, location)` triple. Every firing
/// override rule emits one warning; the rule order is load-bearing and must
/// not be reordered.
fn resolve_vertex_fields(
    api_key: Option<String>,
    project: Option<String>,
    location: Option<String>,
    has_credentials: bool,
    env: &EnvVars,
) -> Result<(Option<String>, Option<String>, Option<String>)> {
    let has_api_key = api_key.is_some();
    let has_project = project.is_some();
    let has_location = location.is_some();

    // Explicit argument combinations that can never be reconciled.
    if has_project && has_api_key {
        return Err(ConfigError::new(
            "project and API key are mutually exclusive in the client initializer. \
             Please provide only one of them.",
        )
        .into());
    }
    if has_location && has_api_key {
        return Err(ConfigError::new(
            "location and API key are mutually exclusive in the client initializer. \
             Please provide only one of them.",
        )
        .into());
    }
    if has_credentials && has_api_key {
        return Err(ConfigError::new(
            "API key cannot be set together with credentials. Please provide only one of them.",
        )
        .into());
    }

    let env_api_key = env.api_key().map(str::to_string);
    let has_env_api_key = env_api_key.is_some();
    let has_env_project = env.project.is_some();
    let has_env_location = env.location.is_some();

    // Explicit arguments take priority over environment variables.
    let mut api_key = api_key.or(env_api_key);
    let mut project = project.or_else(|| env.project.clone());
    let mut location = location.or_else(|| env.location.clone());

    if has_credentials && has_env_api_key {
        tracing::warn!(
            "The user provided Google Cloud credentials will take precedence over the \
             API key from the environment variable."
        );
        api_key = None;
    }
    if has_api_key && (has_env_project || has_env_location) {
        tracing::warn!(
            "The user provided Vertex AI API key will take precedence over the \
             project/location from the environment variables."
        );
        project = None;
        location = None;
    } else if (has_project || has_location) && has_env_api_key {
        tracing::warn!(
            "The user provided project/location will take precedence over the API key \
             from the environment variable."
        );
        api_key = None;
    } else if (has_env_project || has_env_location) && has_env_api_key {
        tracing::warn!(
            "The project/location from the environment variables will take precedence \
             over the API key from the environment variable."
        );
        api_key = None;
    }

    if location.is_none() && api_key.is_none() {
        location = Some("global".to_string());
    }

    if project.is_none() && api_key.is_none() {
        return Err(ConfigError::new("either project or API key must be set.").into());
    }

    Ok((api_key, project, location))
}
