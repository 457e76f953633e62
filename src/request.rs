//! Per-call request assembly: method validation, Vertex path rewriting, URL
//! construction, extra-body merging and ordered header application.
//!
//! Assembly is synchronous and pure; authentication headers are injected
//! afterwards by the client so they are always applied last.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde_json::{Map, Value};

use crate::errors::{ConfigError, Result};
use crate::http::{HeaderList, HttpOptions, RetryPolicy};
use crate::identity::ClientIdentity;

/// One outbound request, created per call and consumed by the transport.
#[derive(Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    /// Resolved per-request timeout for the transport.
    pub timeout: Option<Duration>,
    /// Resolved retry policy for the execution layer.
    pub retry: Option<RetryPolicy>,
}

fn parse_method(method: &str) -> Result<Method> {
    match method.to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PATCH" => Ok(Method::PATCH),
        "PUT" => Ok(Method::PUT),
        "DELETE" => Ok(Method::DELETE),
        other => Err(ConfigError::new(format!("Unsupported HTTP method: {other}")).into()),
    }
}

fn method_has_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PATCH || *method == Method::PUT
}

/// Builds an [`OutboundRequest`] for a path-relative API call.
pub(crate) fn assemble(
    identity: &ClientIdentity,
    client_options: &HttpOptions,
    method: &str,
    path: &str,
    body_json: Option<&str>,
    per_call: Option<&HttpOptions>,
) -> Result<OutboundRequest> {
    let method = parse_method(method)?;
    let effective = client_options.merged_with(per_call);

    // Base models are queried outside any project scope.
    let query_base_model = method == Method::GET && path.starts_with("publishers/google/models");
    let mut path = path.to_string();
    if identity.api_key().is_none() && !path.starts_with("projects/") && !query_base_model {
        if let (Some(project), Some(location)) = (identity.project(), identity.location()) {
            path = format!("projects/{project}/locations/{location}/{path}");
        }
    }

    let url = build_url(&effective, &path)?;

    let body = if method_has_body(&method) {
        body_json.map(|json| apply_extra_body(json, effective.extra_body.as_ref()))
    } else {
        if effective.extra_body.is_some() {
            tracing::warn!(
                "extra_body is set, but the HTTP method does not support a request body; \
                 it will be ignored"
            );
        }
        None
    };

    let mut headers = HeaderMap::new();
    if let Some(list) = &effective.headers {
        apply_header_list(&mut headers, list)?;
    }

    Ok(OutboundRequest {
        method,
        url,
        headers,
        body,
        timeout: effective.timeout,
        retry: effective.retry,
    })
}

/// Builds an [`OutboundRequest`] for a binary upload to a fully-qualified
/// URL. Only `POST` is supported on this path.
pub(crate) fn assemble_upload(
    client_options: &HttpOptions,
    method: &str,
    url: &str,
    bytes: Vec<u8>,
    per_call: Option<&HttpOptions>,
) -> Result<OutboundRequest> {
    if !method.eq_ignore_ascii_case("POST") {
        return Err(ConfigError::new(format!(
            "the request method with bytes is only supported for POST. \
             Unsupported HTTP method: {method}"
        ))
        .into());
    }
    let effective = client_options.merged_with(per_call);

    let url = Url::parse(url)
        .map_err(|err| ConfigError::new(format!("invalid upload URL: {err}")))?;

    let mut headers = HeaderMap::new();
    if let Some(list) = &effective.headers {
        apply_header_list(&mut headers, list)?;
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));

    Ok(OutboundRequest {
        method: Method::POST,
        url,
        headers,
        body: Some(bytes),
        timeout: effective.timeout,
        retry: effective.retry,
    })
}

fn build_url(effective: &HttpOptions, path: &str) -> Result<Url> {
    let base_url = effective
        .base_url
        .as_deref()
        .ok_or_else(|| ConfigError::new("base URL is required").with_field("base_url"))?;
    // Users sometimes configure the base URL with a trailing slash.
    let base_url = base_url.strip_suffix('/').unwrap_or(base_url);
    let api_version = effective
        .api_version
        .as_deref()
        .ok_or_else(|| ConfigError::new("API version is required").with_field("api_version"))?;

    let url = if api_version.is_empty() {
        format!("{base_url}/{path}")
    } else {
        format!("{base_url}/{api_version}/{path}")
    };
    Url::parse(&url).map_err(|err| ConfigError::new(format!("invalid request URL: {err}")).into())
}

/// Serializes the request body, merging the configured extra-body fragment
/// into it. Merge failures are non-fatal: the original body is kept.
fn apply_extra_body(body_json: &str, extra_body: Option<&Map<String, Value>>) -> Vec<u8> {
    let Some(extra_body) = extra_body else {
        return body_json.as_bytes().to_vec();
    };
    match serde_json::from_str::<Map<String, Value>>(body_json) {
        Ok(mut body) => {
            merge_into(&mut body, extra_body);
            match serde_json::to_vec(&body) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to re-serialize merged request body");
                    body_json.as_bytes().to_vec()
                }
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to merge extra_body into request body");
            body_json.as_bytes().to_vec()
        }
    }
}

/// Merges `source` into `target` recursively, key by key.
///
/// Nested objects merge; sequences are wholly replaced; anything else is
/// overwritten, with a warning when the two values differ in JSON kind.
pub(crate) fn merge_into(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, source_value) in source {
        match target.get_mut(key) {
            Some(target_value) => match (target_value, source_value) {
                (Value::Object(target_map), Value::Object(source_map)) => {
                    merge_into(target_map, source_map);
                }
                (target_value @ Value::Array(_), source_value @ Value::Array(_)) => {
                    *target_value = source_value.clone();
                }
                (target_value, source_value) => {
                    if json_kind(target_value) != json_kind(source_value) {
                        tracing::warn!(
                            key = %key,
                            original = json_kind(target_value),
                            new = json_kind(source_value),
                            "type mismatch while merging request body; overwriting with the new value"
                        );
                    }
                    *target_value = source_value.clone();
                }
            },
            None => {
                target.insert(key.clone(), source_value.clone());
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn apply_header_list(headers: &mut HeaderMap, list: &HeaderList) -> Result<()> {
    for entry in list.iter() {
        let name = HeaderName::from_bytes(entry.key.trim().as_bytes())
            .map_err(|err| ConfigError::new(format!("invalid header name: {err}")))?;
        let value = HeaderValue::from_str(entry.value.trim())
            .map_err(|err| ConfigError::new(format!("invalid header value: {err}")))?;
        headers.insert(name, value);
    }
    Ok(())
}
