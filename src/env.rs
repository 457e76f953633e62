//! Snapshot of the environment variables recognized by the client.
//!
//! Read once at construction; empty values are treated as unset.

/// Environment snapshot consulted by identity resolution and default options.
#[derive(Debug, Clone, Default)]
pub(crate) struct EnvVars {
    /// `GOOGLE_API_KEY` — wins over `GEMINI_API_KEY` when both are set.
    pub(crate) google_api_key: Option<String>,
    /// `GEMINI_API_KEY` — fallback API key.
    pub(crate) gemini_api_key: Option<String>,
    /// `GOOGLE_CLOUD_PROJECT` — project ID for credential mode.
    pub(crate) project: Option<String>,
    /// `GOOGLE_CLOUD_LOCATION` — location/region for credential mode.
    pub(crate) location: Option<String>,
    /// `GOOGLE_GENAI_USE_VERTEXAI` — advisory flag; never branched on here.
    pub(crate) use_vertexai: Option<String>,
    /// `GOOGLE_GEMINI_BASE_URL` — overrides the key-mode base URL.
    pub(crate) gemini_base_url: Option<String>,
    /// `GOOGLE_VERTEX_BASE_URL` — overrides the credential-mode base URL.
    pub(crate) vertex_base_url: Option<String>,
}

impl EnvVars {
    pub(crate) fn from_process() -> Self {
        Self {
            google_api_key: non_empty("GOOGLE_API_KEY"),
            gemini_api_key: non_empty("GEMINI_API_KEY"),
            project: non_empty("GOOGLE_CLOUD_PROJECT"),
            location: non_empty("GOOGLE_CLOUD_LOCATION"),
            use_vertexai: non_empty("GOOGLE_GENAI_USE_VERTEXAI"),
            gemini_base_url: non_empty("GOOGLE_GEMINI_BASE_URL"),
            vertex_base_url: non_empty("GOOGLE_VERTEX_BASE_URL"),
        }
    }

    /// The environment-sourced API key, `GOOGLE_API_KEY` taking precedence.
    pub(crate) fn api_key(&self) -> Option<&str> {
        if self.google_api_key.is_some() && self.gemini_api_key.is_some() {
            tracing::warn!("Both GOOGLE_API_KEY and GEMINI_API_KEY are set. Using GOOGLE_API_KEY.");
        }
        self.google_api_key
            .as_deref()
            .or(self.gemini_api_key.as_deref())
    }
}

fn non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}
