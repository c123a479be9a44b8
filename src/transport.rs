use crate::error::ProxyError;
use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use http_body_util::{BodyExt, Full, Limited};
use hyper::header::{CONTENT_ENCODING, CONTENT_LENGTH, HeaderMap};
use hyper::{Method, Request, StatusCode};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use log::debug;
use std::io::Read;
use tokio::time::{timeout, Duration};
use url::Url;

/// A single outbound request. Redirects are never followed at this level.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, ProxyError>;
}

pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    request_timeout: Duration,
    max_body_bytes: usize,
}

impl HyperTransport {
    pub fn new(
        connect_timeout_secs: u64,
        request_timeout_secs: u64,
        pool_max_idle_per_host: usize,
        pool_idle_timeout_secs: u64,
        max_body_bytes: usize,
    ) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(connect_timeout_secs)));

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(pool_idle_timeout_secs))
            .build(HttpsConnector::new_with_connector(http));

        Self {
            client,
            request_timeout: Duration::from_secs(request_timeout_secs),
            max_body_bytes,
        }
    }

    async fn exchange(&self, request: UpstreamRequest) -> Result<UpstreamResponse, ProxyError> {
        let mut builder = Request::builder()
            .method(request.method)
            .uri(request.url.as_str());
        if let Some(headers) = builder.headers_mut() {
            *headers = request.headers;
        }
        let outbound = builder
            .body(Full::new(request.body))
            .map_err(|e| ProxyError::Http(e.to_string()))?;

        let response = self.client.request(outbound).await
            .map_err(|e| ProxyError::UpstreamUnreachable(format!("{}: {}", request.url, e)))?;

        let (parts, body) = response.into_parts();
        let body = Limited::new(body, self.max_body_bytes)
            .collect()
            .await
            .map_err(|e| ProxyError::UpstreamUnreachable(format!("Failed to read body from {}: {}", request.url, e)))?
            .to_bytes();

        let mut headers = parts.headers;
        let body = decode_body(&mut headers, body, self.max_body_bytes)?;

        Ok(UpstreamResponse {
            status: parts.status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, ProxyError> {
        debug!("Upstream {} {}", request.method, request.url);
        let url = request.url.clone();
        timeout(self.request_timeout, self.exchange(request))
            .await
            .map_err(|_| {
                ProxyError::UpstreamUnreachable(format!(
                    "Request to {} timed out after {}s",
                    url,
                    self.request_timeout.as_secs()
                ))
            })?
    }
}

/// Undo `gzip`/`deflate` content-encoding so the body can be rewritten.
/// Unknown encodings are left as they are. A decoded body larger than
/// `limit` bytes is an upstream error.
pub fn decode_body(headers: &mut HeaderMap, body: Bytes, limit: usize) -> Result<Bytes, ProxyError> {
    let encoding = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase());

    let decoded = match encoding.as_deref() {
        Some("gzip") | Some("x-gzip") => inflate(GzDecoder::new(body.as_ref()), "gzip", body.len(), limit)?,
        Some("deflate") => inflate(ZlibDecoder::new(body.as_ref()), "deflate", body.len(), limit)?,
        Some("identity") => {
            headers.remove(CONTENT_ENCODING);
            return Ok(body);
        }
        _ => return Ok(body),
    };

    headers.remove(CONTENT_ENCODING);
    headers.remove(CONTENT_LENGTH);
    Ok(Bytes::from(decoded))
}

fn inflate(decoder: impl Read, encoding: &str, encoded_len: usize, limit: usize) -> Result<Vec<u8>, ProxyError> {
    let mut out = Vec::with_capacity(encoded_len.saturating_mul(2).min(limit));
    decoder
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| ProxyError::UpstreamUnreachable(format!("Corrupt {} body: {}", encoding, e)))?;
    if out.len() > limit {
        return Err(ProxyError::UpstreamUnreachable(format!(
            "Decoded {} body exceeds {} bytes",
            encoding, limit
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use hyper::header::HeaderValue;
    use std::io::Write;

    #[test]
    fn test_decode_gzip_body() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"<html>hello</html>").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(compressed.len()));

        let body = decode_body(&mut headers, Bytes::from(compressed), 1024).unwrap();
        assert_eq!(body.as_ref(), b"<html>hello</html>");
        assert!(headers.get(CONTENT_ENCODING).is_none());
        assert!(headers.get(CONTENT_LENGTH).is_none());
    }

    #[test]
    fn test_unknown_encoding_passes_through() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("br"));
        let body = decode_body(&mut headers, Bytes::from_static(b"\x1b\x00"), 1024).unwrap();
        assert_eq!(body.as_ref(), b"\x1b\x00");
        assert_eq!(headers.get(CONTENT_ENCODING).unwrap(), "br");
    }

    #[test]
    fn test_corrupt_gzip_is_an_upstream_error() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        let result = decode_body(&mut headers, Bytes::from_static(b"not gzip"), 1024);
        assert!(matches!(result, Err(ProxyError::UpstreamUnreachable(_))));
    }

    #[test]
    fn test_decoded_body_is_bounded() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&vec![0u8; 64 * 1024]).unwrap();
        let compressed = encoder.finish().unwrap();
        assert!(compressed.len() < 4096);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        let result = decode_body(&mut headers, Bytes::from(compressed.clone()), 4096);
        match result {
            Err(ProxyError::UpstreamUnreachable(message)) => assert!(message.contains("exceeds 4096 bytes")),
            other => panic!("expected oversize error, got {:?}", other.map(|b| b.len())),
        }

        let body = decode_body(&mut headers, Bytes::from(compressed), 64 * 1024).unwrap();
        assert_eq!(body.len(), 64 * 1024);
    }

    #[tokio::test]
    async fn test_unreachable_host_maps_to_upstream_error() {
        let transport = HyperTransport::new(1, 2, 0, 1, 1024);
        let request = UpstreamRequest {
            method: Method::GET,
            url: Url::parse("http://127.0.0.1:1/").unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        let result = transport.send(request).await;
        assert!(matches!(result, Err(ProxyError::UpstreamUnreachable(_))));
    }
}
