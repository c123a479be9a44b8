//! Per-host cookie replay.
//!
//! Upstream `Set-Cookie` headers are captured here instead of being handed to
//! the browser, and replayed as a `Cookie` header on later requests to the
//! same host.

use hyper::header::{HeaderMap, SET_COOKIE};
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

pub trait CookieStore: Send + Sync {
    /// Serialized `Cookie` header value for `host`, if any cookies are held.
    fn cookie_header(&self, host: &str) -> Option<String>;

    /// Merge every `Set-Cookie` header in `headers` into the entry for `host`.
    fn merge(&self, host: &str, headers: &HeaderMap);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieUpdate {
    Set { name: String, value: String },
    Remove { name: String },
}

/// Parses one `Set-Cookie` value. Attributes other than `Max-Age` are ignored.
pub fn parse_set_cookie(raw: &str) -> Option<CookieUpdate> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"').to_string();

    let expired = parts.any(|attr| {
        attr.split_once('=')
            .filter(|(key, _)| key.trim().eq_ignore_ascii_case("max-age"))
            .and_then(|(_, age)| age.trim().parse::<i64>().ok())
            .is_some_and(|age| age <= 0)
    });

    Some(if expired {
        CookieUpdate::Remove { name: name.to_string() }
    } else {
        CookieUpdate::Set { name: name.to_string(), value }
    })
}

/// Process-lifetime store behind one coarse lock.
#[derive(Default)]
pub struct MemoryCookieStore {
    jar: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryCookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host_count(&self) -> usize {
        match self.jar.read() {
            Ok(jar) => jar.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl CookieStore for MemoryCookieStore {
    fn cookie_header(&self, host: &str) -> Option<String> {
        let jar = match self.jar.read() {
            Ok(jar) => jar,
            Err(poisoned) => poisoned.into_inner(),
        };
        let cookies = jar.get(&host.to_ascii_lowercase())?;
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    fn merge(&self, host: &str, headers: &HeaderMap) {
        let updates: Vec<CookieUpdate> = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(parse_set_cookie)
            .collect();
        if updates.is_empty() {
            return;
        }

        let mut jar = match self.jar.write() {
            Ok(jar) => jar,
            Err(poisoned) => poisoned.into_inner(),
        };
        let cookies = jar.entry(host.to_ascii_lowercase()).or_default();
        for update in updates {
            match update {
                CookieUpdate::Set { name, value } => {
                    debug!("Storing cookie {} for {}", name, host);
                    cookies.insert(name, value);
                }
                CookieUpdate::Remove { name } => {
                    debug!("Removing cookie {} for {}", name, host);
                    cookies.remove(&name);
                }
            }
        }
    }
}
