//! In-memory upstream for driving the fetch pipeline without a network.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use hyper::StatusCode;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, LOCATION};
use std::sync::Mutex;
use yubikiri_proxy::ProxyError;
use yubikiri_proxy::transport::{Transport, UpstreamRequest, UpstreamResponse};

type Responder = dyn Fn(&UpstreamRequest, usize) -> Result<UpstreamResponse, ProxyError> + Send + Sync;

/// Answers each request with `responder(request, index)` and records it.
pub struct ScriptedTransport {
    responder: Box<Responder>,
    requests: Mutex<Vec<UpstreamRequest>>,
}

impl ScriptedTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&UpstreamRequest, usize) -> Result<UpstreamResponse, ProxyError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, ProxyError> {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };
        (self.responder)(&request, index)
    }
}

pub fn respond(status: u16, headers: &[(&str, &str)], body: impl Into<Bytes>) -> UpstreamResponse {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.append(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    UpstreamResponse {
        status: StatusCode::from_u16(status).unwrap(),
        headers: map,
        body: body.into(),
    }
}

pub fn redirect(status: u16, location: &str) -> UpstreamResponse {
    respond(status, &[(LOCATION.as_str(), location)], Bytes::new())
}

pub fn html(body: &'static str) -> UpstreamResponse {
    respond(200, &[("content-type", "text/html; charset=utf-8")], body)
}

pub fn header<'a>(request: &'a UpstreamRequest, name: &str) -> Option<&'a str> {
    request.headers.get(name).and_then(|v| v.to_str().ok())
}
