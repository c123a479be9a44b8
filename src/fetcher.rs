//! Redirect-resolving fetcher.
//!
//! Issues one upstream request per hop and follows `3xx` + `Location` by hand
//! so every hop can feed the cookie store and the hop chain can be reported.

use crate::cookies::CookieStore;
use crate::error::ProxyError;
use crate::transport::{Transport, UpstreamRequest};
use bytes::Bytes;
use hyper::header::{CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue, LOCATION};
use hyper::{Method, StatusCode};
use log::{debug, warn};
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectHop {
    pub url: Url,
    pub status: StatusCode,
    /// `Location` resolved against `url`.
    pub location: Url,
}

/// Upstream result after redirect resolution.
#[derive(Debug, Clone)]
pub struct ContentEnvelope {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub envelope: ContentEnvelope,
    pub final_url: Url,
    pub chain: Vec<RedirectHop>,
}

#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

pub struct RedirectFetcher {
    transport: Arc<dyn Transport>,
    cookies: Arc<dyn CookieStore>,
    max_redirects: usize,
}

impl RedirectFetcher {
    pub fn new(transport: Arc<dyn Transport>, cookies: Arc<dyn CookieStore>, max_redirects: usize) -> Self {
        Self {
            transport,
            cookies,
            max_redirects,
        }
    }

    pub async fn fetch(&self, target: &Url, options: &RequestOptions) -> Result<FetchOutcome, ProxyError> {
        let mut current = target.clone();
        let mut method = options.method.clone();
        let mut body = options.body.clone();
        let mut forward_content_type = true;
        let mut chain: Vec<RedirectHop> = Vec::new();

        loop {
            let host = current.host_str().unwrap_or_default().to_string();
            let mut headers = options.headers.clone();
            if !forward_content_type {
                headers.remove(CONTENT_TYPE);
            }
            headers.remove(COOKIE);
            if let Some(cookie) = self.cookies.cookie_header(&host) {
                if let Ok(value) = HeaderValue::from_str(&cookie) {
                    headers.insert(COOKIE, value);
                }
            }

            let response = self
                .transport
                .send(UpstreamRequest {
                    method: method.clone(),
                    url: current.clone(),
                    headers,
                    body: body.clone(),
                })
                .await?;

            self.cookies.merge(&host, &response.headers);

            let location = if response.status.is_redirection() {
                redirect_target(&current, &response.headers)
            } else {
                None
            };

            let Some(location) = location else {
                let content_type = response
                    .headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                return Ok(FetchOutcome {
                    envelope: ContentEnvelope {
                        status: response.status,
                        headers: response.headers,
                        body: response.body,
                        content_type,
                    },
                    final_url: current,
                    chain,
                });
            };

            debug!("Redirect {} {} -> {}", response.status.as_u16(), current, location);
            chain.push(RedirectHop {
                url: current.clone(),
                status: response.status,
                location: location.clone(),
            });

            if chain.len() > self.max_redirects {
                warn!("Redirect limit {} exceeded for {}", self.max_redirects, target);
                return Err(ProxyError::RedirectLimitExceeded {
                    limit: self.max_redirects,
                    chain,
                });
            }

            if switches_to_get(response.status, &method) {
                method = Method::GET;
                body = Bytes::new();
                forward_content_type = false;
            }
            current = location;
        }
    }
}

/// Resolve `Location` against the hop that produced it. Anything that is not an
/// http(s) URL is unusable and ends the chain.
fn redirect_target(current: &Url, headers: &HeaderMap) -> Option<Url> {
    let raw = headers.get(LOCATION)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    let resolved = current.join(raw).ok()?;
    matches!(resolved.scheme(), "http" | "https").then_some(resolved)
}

fn switches_to_get(status: StatusCode, method: &Method) -> bool {
    let rewrites_method = matches!(
        status,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
    );
    rewrites_method && *method != Method::GET && *method != Method::HEAD
}
