//! Request-construction and configuration-resolution core for the Gemini
//! Developer API and Vertex AI.
//!
//! A [`Client`] is built once from a [`Config`]: explicit constructor
//! arguments are reconciled with process environment variables into an
//! immutable [`ClientIdentity`] (API-key mode or project/location credential
//! mode), and client-level [`HttpOptions`] defaults are fixed. Each call then
//! merges per-call options over the defaults and assembles one outbound
//! request (URL, headers, body), with authentication injected last.

/// Default base URL for the Gemini Developer API.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default API version for the Gemini Developer API.
pub const DEFAULT_GEMINI_API_VERSION: &str = "v1beta";

/// Default base URL for Vertex AI (express mode or the `global` location).
pub const DEFAULT_VERTEX_BASE_URL: &str = "https://aiplatform.googleapis.com";

/// Default API version for Vertex AI.
pub const DEFAULT_VERTEX_API_VERSION: &str = "v1beta1";

/// Library identifier sent as `user-agent` and `x-goog-api-client`.
pub(crate) const DEFAULT_CLIENT_HEADER: &str =
    concat!("genai-client-rust/", env!("CARGO_PKG_VERSION"));

/// HTTP header name for API key authentication.
pub(crate) const API_KEY_HEADER: &str = "x-goog-api-key";

/// HTTP header name for the billing/quota project of a credential.
pub(crate) const USER_PROJECT_HEADER: &str = "x-goog-user-project";

/// HTTP header telling the server how long the client is willing to wait.
pub(crate) const SERVER_TIMEOUT_HEADER: &str = "X-Server-Timeout";

/// OAuth scope requested for application-default credentials.
pub(crate) const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

mod client;
mod credentials;
mod env;
mod errors;
mod http;
mod identity;
mod request;

pub use client::{Client, Config};
pub use credentials::{Credentials, ServiceAccountCredentials, StaticCredentials};
pub use errors::{
    ApiError, ConfigError, CredentialError, Error, Result, RetryMetadata, TransportError,
    TransportErrorKind,
};
pub use http::{HeaderEntry, HeaderList, HttpOptions, RetryPolicy};
pub use identity::ClientIdentity;
pub use request::OutboundRequest;
