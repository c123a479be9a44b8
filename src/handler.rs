//! Request handling for the `/proxy` and `/r` endpoints.

use crate::classify::{ContentKind, classify};
use crate::config::Config;
use crate::cookies::{CookieStore, MemoryCookieStore};
use crate::css::rewrite_stylesheet;
use crate::error::ProxyError;
use crate::fetcher::{RedirectFetcher, RequestOptions};
use crate::html::rewrite_html;
use crate::profiles::ProfileSelector;
use crate::response::{assemble, denial_snippet, error_response, not_found, preflight};
use crate::script::rewrite_script;
use crate::transport::{HyperTransport, Transport};
use crate::url_policy::{RewriteContext, UrlPolicy, target_from_query};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{CONTENT_TYPE, HOST, HeaderMap};
use hyper::{Method, Request, Response};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Instant;
use url::Url;

/// Which inbound route a request came in on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Proxy,
    Resource,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Proxy => write!(f, "proxy"),
            Endpoint::Resource => write!(f, "resource"),
        }
    }
}

/// Per-request facts for the access log line.
struct Served {
    status: u16,
    kind: ContentKind,
    hops: usize,
}

pub struct RewritingProxy {
    config: Config,
    fetcher: RedirectFetcher,
    selector: ProfileSelector,
    scheme: &'static str,
}

impl RewritingProxy {
    /// Build a proxy with a pooled HTTPS client and an in-memory cookie store.
    pub fn from_config(config: &Config) -> Self {
        let transport = HyperTransport::new(
            config.connect_timeout_secs,
            config.request_timeout_secs,
            config.pool_max_idle_per_host,
            config.pool_idle_timeout_secs,
            config.max_body_bytes,
        );
        Self::with_transport(
            config.clone(),
            Arc::new(transport),
            Arc::new(MemoryCookieStore::new()),
        )
    }

    pub fn with_transport(config: Config, transport: Arc<dyn Transport>, cookies: Arc<dyn CookieStore>) -> Self {
        let fetcher = RedirectFetcher::new(transport, cookies, config.max_redirects);
        let scheme = if config.tls_enabled() { "https" } else { "http" };
        Self {
            config,
            fetcher,
            selector: ProfileSelector::default(),
            scheme,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn endpoint(&self, path: &str) -> Option<Endpoint> {
        if path == self.config.proxy_path {
            Some(Endpoint::Proxy)
        } else if path == self.config.resource_path {
            Some(Endpoint::Resource)
        } else {
            None
        }
    }

    /// Origin placed in front of proxy references so they survive the
    /// injected `<base>`. Falls back to relative references without a `Host`.
    fn origin(&self, headers: &HeaderMap) -> String {
        if let Some(origin) = &self.config.public_origin {
            return origin.trim_end_matches('/').to_string();
        }
        headers
            .get(HOST)
            .and_then(|host| host.to_str().ok())
            .map(|host| format!("{}://{}", self.scheme, host))
            .unwrap_or_default()
    }

    fn policy(&self, origin: &str) -> UrlPolicy {
        let proxy = format!("{}{}", origin, self.config.proxy_path);
        if self.config.split_endpoints {
            UrlPolicy::split(proxy, format!("{}{}", origin, self.config.resource_path))
        } else {
            UrlPolicy::single(proxy)
        }
    }

    fn rewrite_context(&self, final_url: Url, policy: UrlPolicy) -> RewriteContext {
        let scope = self.config.scope_css.then(|| self.config.scope_selector.clone());
        let mut ctx = RewriteContext::new(final_url, policy).with_scope(scope);
        ctx.inject_base = self.config.inject_base;
        ctx.rewrite_scripts = self.config.rewrite_inline_scripts;
        ctx
    }

    /// Handle one inbound request. Failures become plain-text responses with
    /// the status their error maps to.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: std::fmt::Display,
    {
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let Some(endpoint) = self.endpoint(&path) else {
            debug!("No route for {} {}", method, path);
            return not_found(&path);
        };
        if method == Method::OPTIONS {
            return preflight();
        }

        let query = req.uri().query().map(str::to_string);
        let target = match target_from_query(query.as_deref()) {
            Ok(target) => target,
            Err(e) => {
                warn!("{} {} rejected: {}", method, endpoint, e);
                return error_response(&e);
            }
        };

        match self.serve(req, &target).await {
            Ok((response, served)) => {
                info!(
                    "{} {} {} -> {} {} hops={} {}ms",
                    method,
                    endpoint,
                    target,
                    served.status,
                    served.kind,
                    served.hops,
                    started.elapsed().as_millis()
                );
                response
            }
            Err(e) => {
                warn!(
                    "{} {} {} failed after {}ms: {}",
                    method,
                    endpoint,
                    target,
                    started.elapsed().as_millis(),
                    e
                );
                error_response(&e)
            }
        }
    }

    async fn serve<B>(&self, req: Request<B>, target: &Url) -> Result<(Response<Full<Bytes>>, Served), ProxyError>
    where
        B: Body<Data = Bytes>,
        B::Error: std::fmt::Display,
    {
        let (parts, body) = req.into_parts();
        let origin = self.origin(&parts.headers);

        let mut options = RequestOptions {
            method: parts.method.clone(),
            ..RequestOptions::default()
        };
        if parts.method != Method::GET && parts.method != Method::HEAD {
            options.body = body
                .collect()
                .await
                .map_err(|e| ProxyError::Http(format!("Failed to read request body: {}", e)))?
                .to_bytes();
            if let Some(content_type) = parts.headers.get(CONTENT_TYPE) {
                options.headers.insert(CONTENT_TYPE, content_type.clone());
            }
        }

        let outcome = self.selector.fetch(&self.fetcher, target, &options).await?;
        let envelope = outcome.envelope;
        let hops = outcome.chain.len();

        if envelope.status.as_u16() >= 400 {
            return Err(ProxyError::UpstreamDenied {
                status: envelope.status,
                url: outcome.final_url.to_string(),
                snippet: denial_snippet(&envelope.body),
            });
        }

        let kind = classify(envelope.content_type.as_deref(), &outcome.final_url);
        let ctx = self.rewrite_context(outcome.final_url.clone(), self.policy(&origin));
        let body = match kind {
            ContentKind::Html => Bytes::from(rewrite_html(&envelope.body, &ctx)?),
            ContentKind::Css => {
                let css = String::from_utf8_lossy(&envelope.body);
                Bytes::from(rewrite_stylesheet(&css, &ctx))
            }
            ContentKind::Script if ctx.rewrite_scripts => {
                let source = String::from_utf8_lossy(&envelope.body);
                Bytes::from(rewrite_script(&source, &ctx.base_url, &ctx.policy))
            }
            ContentKind::Script | ContentKind::Opaque => envelope.body,
        };

        let response = assemble(envelope.status, &envelope.headers, body, kind, &outcome.final_url);
        Ok((
            response,
            Served {
                status: envelope.status.as_u16(),
                kind,
                hops,
            },
        ))
    }
}
