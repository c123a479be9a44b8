//! Outbound response assembly.

use crate::classify::ContentKind;
use crate::error::ProxyError;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue,
};
use hyper::{Response, StatusCode};
use log::error;
use url::Url;

/// Headers that describe the upstream connection or body framing.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
    "te",
    "trailer",
    "upgrade",
    "content-encoding",
];

/// Headers that would keep the page from rendering where it is embedded.
const EMBEDDING_RESTRICTIONS: &[&str] = &[
    "content-security-policy",
    "content-security-policy-report-only",
    "x-frame-options",
    "cross-origin-opener-policy",
    "cross-origin-embedder-policy",
    "cross-origin-resource-policy",
];

const DENIAL_SNIPPET_CHARS: usize = 512;

fn is_stripped(name: &HeaderName) -> bool {
    let name = name.as_str();
    HOP_BY_HOP.contains(&name)
        || EMBEDDING_RESTRICTIONS.contains(&name)
        || name == "set-cookie"
        || name.starts_with("proxy-")
        || name.starts_with("access-control-")
}

/// Copy of `upstream` without hop-by-hop, cookie and embedding headers.
pub fn forwardable_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if !is_stripped(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Build the response for a successfully fetched and (maybe) rewritten body.
pub fn assemble(
    status: StatusCode,
    upstream: &HeaderMap,
    body: Bytes,
    kind: ContentKind,
    final_url: &Url,
) -> Response<Full<Bytes>> {
    let mut headers = forwardable_headers(upstream);

    match kind.rewritten_content_type() {
        Some(content_type) => {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        None if !headers.contains_key(CONTENT_TYPE) => {
            let guess = mime_guess::from_path(final_url.path()).first_or_octet_stream();
            if let Ok(value) = HeaderValue::from_str(guess.essence_str()) {
                headers.insert(CONTENT_TYPE, value);
            }
        }
        None => {}
    }

    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Plain-text response for a failed request.
pub fn error_response(err: &ProxyError) -> Response<Full<Bytes>> {
    text_response(err.status_code(), err.diagnostic())
}

pub fn not_found(path: &str) -> Response<Full<Bytes>> {
    text_response(StatusCode::NOT_FOUND, format!("Not Found: {}", path))
}

/// Answer to a CORS preflight.
pub fn preflight() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, HEAD, POST, PUT, PATCH, DELETE, OPTIONS"),
    );
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    response
}

fn text_response(status: StatusCode, message: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Full::new(Bytes::from(message)))
        .unwrap_or_else(|e| {
            error!("Failed to build {} response: {}", status, e);
            let mut fallback = Response::new(Full::new(Bytes::from("Internal Server Error")));
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}

/// Leading text of a denial page with whitespace runs collapsed.
pub fn denial_snippet(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(DENIAL_SNIPPET_CHARS)
        .collect()
}
