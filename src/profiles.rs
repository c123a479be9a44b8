//! Browser-like request header presets and the 403 rotation around them.

use crate::error::ProxyError;
use crate::fetcher::{FetchOutcome, RedirectFetcher, RequestOptions};
use hyper::StatusCode;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, REFERER};
use log::debug;
use url::Url;

#[derive(Debug, Clone, Copy)]
pub struct HeaderProfile {
    pub name: &'static str,
    pub headers: &'static [(&'static str, &'static str)],
}

impl HeaderProfile {
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for &(name, value) in self.headers {
            map.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        map
    }
}

pub const CHROME: HeaderProfile = HeaderProfile {
    name: "chrome",
    headers: &[
        ("user-agent", "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"),
        ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8"),
        ("accept-language", "en-US,en;q=0.9,ja;q=0.8"),
        ("accept-encoding", "gzip, deflate"),
        ("upgrade-insecure-requests", "1"),
        ("sec-fetch-dest", "document"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-site", "none"),
    ],
};

pub const SAFARI: HeaderProfile = HeaderProfile {
    name: "safari",
    headers: &[
        ("user-agent", "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15"),
        ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        ("accept-language", "en-US,en;q=0.9"),
        ("accept-encoding", "gzip, deflate"),
    ],
};

pub const FIREFOX: HeaderProfile = HeaderProfile {
    name: "firefox",
    headers: &[
        ("user-agent", "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0"),
        ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        ("accept-language", "en-US,en;q=0.5"),
        ("accept-encoding", "gzip, deflate"),
        ("upgrade-insecure-requests", "1"),
    ],
};

pub const MINIMAL: HeaderProfile = HeaderProfile {
    name: "minimal",
    headers: &[
        ("user-agent", "Mozilla/5.0"),
        ("accept", "*/*"),
    ],
};

pub const BROWSER_PROFILES: &[HeaderProfile] = &[CHROME, SAFARI, FIREFOX, MINIMAL];

/// Tries each profile in order until the upstream stops answering `403`.
pub struct ProfileSelector {
    profiles: Vec<HeaderProfile>,
}

impl Default for ProfileSelector {
    fn default() -> Self {
        Self::new(BROWSER_PROFILES.to_vec())
    }
}

impl ProfileSelector {
    pub fn new(profiles: Vec<HeaderProfile>) -> Self {
        Self { profiles }
    }

    pub fn profiles(&self) -> &[HeaderProfile] {
        &self.profiles
    }

    /// Fetch `target`, rotating profiles on `403`. After every profile is
    /// denied a bare attempt is made; if that fails too the last response
    /// obtained is returned rather than an error.
    pub async fn fetch(
        &self,
        fetcher: &RedirectFetcher,
        target: &Url,
        request: &RequestOptions,
    ) -> Result<FetchOutcome, ProxyError> {
        let referer = referer_for(target);
        let mut last: Option<FetchOutcome> = None;

        for profile in &self.profiles {
            let options = options_with(request, profile.header_map(), referer.as_ref());
            let outcome = fetcher.fetch(target, &options).await?;
            if outcome.envelope.status != StatusCode::FORBIDDEN {
                debug!("Profile '{}' accepted by {}", profile.name, target);
                return Ok(outcome);
            }
            debug!("Profile '{}' denied by {}, rotating", profile.name, target);
            last = Some(outcome);
        }

        let bare = options_with(request, HeaderMap::new(), referer.as_ref());
        match (fetcher.fetch(target, &bare).await, last) {
            (Ok(outcome), _) => Ok(outcome),
            (Err(e), Some(previous)) => {
                debug!("Bare attempt for {} failed ({}), keeping last denial", target, e);
                Ok(previous)
            }
            (Err(e), None) => Err(e),
        }
    }
}

fn referer_for(target: &Url) -> Option<HeaderValue> {
    let origin = target.origin();
    if !origin.is_tuple() {
        return None;
    }
    HeaderValue::from_str(&format!("{}/", origin.ascii_serialization())).ok()
}

/// Profile headers first, then whatever the inbound request forwards on top.
fn options_with(request: &RequestOptions, mut headers: HeaderMap, referer: Option<&HeaderValue>) -> RequestOptions {
    for (name, value) in &request.headers {
        headers.insert(name.clone(), value.clone());
    }
    if let Some(referer) = referer {
        headers.insert(REFERER, referer.clone());
    }
    RequestOptions {
        method: request.method.clone(),
        headers,
        body: request.body.clone(),
    }
}
