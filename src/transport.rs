//! Transport boundary
//!
//! Thin axum glue: build a `RawRequest` from request parts and emit a
//! pipeline `Response` as an axum response. The server, routing and
//! body collection stay outside the pipeline.

use std::collections::HashMap;

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::StatusCode;
use serde_json::Value;
use tracing::warn;

use crate::connection::{RawRequest, Response};

/// Snapshot request parts into a `RawRequest`.
///
/// Route parameters are resolved by the router, so the caller passes
/// them in; the body has already been collected and parsed by an
/// extractor.
pub fn raw_request_from_parts(
    parts: &Parts,
    params: HashMap<String, String>,
    body: Option<Value>,
) -> RawRequest {
    let mut headers = HashMap::new();
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), value.to_string());
        }
    }

    let mut query = HashMap::new();
    if let Some(raw_query) = parts.uri.query() {
        for pair in raw_query.split('&') {
            let mut kv = pair.splitn(2, '=');
            if let Some(key) = kv.next() {
                if !key.is_empty() {
                    query.insert(key.to_string(), kv.next().unwrap_or("").to_string());
                }
            }
        }
    }

    RawRequest {
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        params,
        query,
        headers,
        body,
    }
}

/// Emit a pipeline response as an axum response.
pub fn into_axum_response(resp: Response) -> axum::response::Response {
    let mut builder = axum::http::Response::builder().status(resp.status_code);
    for (key, value) in &resp.headers {
        builder = builder.header(key, value);
    }
    builder.body(Body::from(resp.body)).unwrap_or_else(|err| {
        warn!(error = %err, "response could not be emitted as-is");
        axum::http::Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from("an error occurred"))
            .expect("static fallback response")
    })
}
