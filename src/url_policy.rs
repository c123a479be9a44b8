//! The one place that decides whether and how a discovered reference is routed
//! back through the proxy. The HTML and CSS rewriters only ever call
//! [`UrlPolicy::rewrite`] and never look at schemes or encodings themselves.

use crate::error::ProxyError;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use url::Url;
use url::form_urlencoded;

/// Everything except RFC 3986 unreserved characters is escaped, so the
/// encoded value is safe inside quoted CSS, HTML attributes and JS literals.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Prefixes that are never proxied.
pub const EXCLUDED_PREFIXES: &[&str] = &["data:", "javascript:", "mailto:", "blob:", "about:", "#"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Top-level documents: links, form targets, frames, meta refresh.
    Navigation,
    /// Everything a page loads to render itself.
    Resource,
}

pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

pub fn is_excluded(raw: &str) -> bool {
    let trimmed = raw.trim_start();
    EXCLUDED_PREFIXES.iter().any(|prefix| {
        trimmed
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    })
}

#[derive(Debug, Clone)]
pub struct UrlPolicy {
    navigation_prefix: String,
    resource_prefix: String,
}

impl UrlPolicy {
    /// Both kinds of reference use the same endpoint.
    pub fn single(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            navigation_prefix: prefix.clone(),
            resource_prefix: prefix,
        }
    }

    pub fn split(navigation_prefix: impl Into<String>, resource_prefix: impl Into<String>) -> Self {
        Self {
            navigation_prefix: navigation_prefix.into(),
            resource_prefix: resource_prefix.into(),
        }
    }

    pub fn prefix(&self, kind: ReferenceKind) -> &str {
        match kind {
            ReferenceKind::Navigation => &self.navigation_prefix,
            ReferenceKind::Resource => &self.resource_prefix,
        }
    }

    /// Rewrite a sub-resource reference.
    pub fn rewrite(&self, raw: &str, base: &Url) -> String {
        self.rewrite_as(raw, base, ReferenceKind::Resource)
    }

    /// Returns `raw` untouched when it is empty, excluded, already proxied or
    /// does not resolve against `base`.
    pub fn rewrite_as(&self, raw: &str, base: &Url, kind: ReferenceKind) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() || is_excluded(trimmed) || self.is_proxied(trimmed) {
            return raw.to_string();
        }
        match base.join(trimmed) {
            Ok(absolute) if matches!(absolute.scheme(), "http" | "https") => {
                self.proxy_reference(&absolute, kind)
            }
            _ => raw.to_string(),
        }
    }

    pub fn proxy_reference(&self, absolute: &Url, kind: ReferenceKind) -> String {
        format!("{}?url={}", self.prefix(kind), encode_component(absolute.as_str()))
    }

    fn is_proxied(&self, raw: &str) -> bool {
        [&self.navigation_prefix, &self.resource_prefix]
            .iter()
            .any(|prefix| raw.strip_prefix(prefix.as_str()).is_some_and(|rest| rest.starts_with("?url=")))
    }
}

/// Immutable inputs shared by the HTML and CSS rewriters for one document.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    pub base_url: Url,
    pub policy: UrlPolicy,
    pub scope_selector: Option<String>,
    pub inject_base: bool,
    pub rewrite_scripts: bool,
}

impl RewriteContext {
    pub fn new(base_url: Url, policy: UrlPolicy) -> Self {
        Self {
            base_url,
            policy,
            scope_selector: None,
            inject_base: true,
            rewrite_scripts: true,
        }
    }

    pub fn with_scope(mut self, scope_selector: Option<String>) -> Self {
        self.scope_selector = scope_selector;
        self
    }
}

/// Extract and coerce the `url` query parameter of an inbound request.
pub fn target_from_query(query: Option<&str>) -> Result<Url, ProxyError> {
    let raw = query
        .and_then(|q| {
            form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == "url")
                .map(|(_, value)| value.into_owned())
        })
        .filter(|value| !value.trim().is_empty())
        .ok_or(ProxyError::MissingParameter("url"))?;
    coerce_target(&raw)
}

/// Turn user input into an absolute http(s) URL, defaulting to `https://`.
pub fn coerce_target(raw: &str) -> Result<Url, ProxyError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProxyError::MissingParameter("url"));
    }

    let lower = trimmed.to_ascii_lowercase();
    let candidate = if trimmed.starts_with("//") {
        format!("https:{}", trimmed)
    } else if lower.starts_with("http://") || lower.starts_with("https://") || trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let invalid = |reason: String| ProxyError::InvalidUrl {
        input: raw.to_string(),
        reason,
    };
    let url = Url::parse(&candidate).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}
