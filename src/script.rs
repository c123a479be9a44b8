//! Literal-pattern rewriting of network calls in script text.
//!
//! Only `fetch("…")`, `import("…")` and `xhr.open("METHOD", "…")` with an
//! absolute http(s) string literal are recognised. URLs assembled at runtime
//! stay as they are.

use crate::url_policy::UrlPolicy;
use regex::{Captures, Regex};
use std::sync::LazyLock;
use url::Url;

static FETCH_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bfetch\(\s*(["'`])((?i:https?)://[^"'`\s$]+)(["'`])"#).expect("valid fetch regex")
});

static DYNAMIC_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bimport\(\s*(["'`])((?i:https?)://[^"'`\s$]+)(["'`])"#).expect("valid import regex")
});

static XHR_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\.open\(\s*["'`][A-Za-z]+["'`]\s*,\s*(["'`])((?i:https?)://[^"'`\s$]+)(["'`])"#).expect("valid xhr regex")
});

/// `true` when a `<script type=...>` holds JavaScript.
pub fn is_javascript_type(type_attr: Option<&str>) -> bool {
    let Some(value) = type_attr.map(|t| t.trim().to_ascii_lowercase()) else {
        return true;
    };
    value.is_empty()
        || value == "module"
        || value.contains("javascript")
        || value.contains("ecmascript")
}

pub fn rewrite_script(source: &str, base: &Url, policy: &UrlPolicy) -> String {
    let mut text = source.to_string();
    for pattern in [&*FETCH_CALL, &*DYNAMIC_IMPORT, &*XHR_OPEN] {
        text = pattern
            .replace_all(&text, |caps: &Captures| replace_literal(caps, base, policy))
            .into_owned();
    }
    text
}

/// Swap the URL (group 2) inside the matched call, keeping everything else.
fn replace_literal(caps: &Captures, base: &Url, policy: &UrlPolicy) -> String {
    let whole = &caps[0];
    let (Some(call), Some(url)) = (caps.get(0), caps.get(2)) else {
        return whole.to_string();
    };
    if caps[1] != caps[3] {
        return whole.to_string();
    }
    let start = url.start() - call.start();
    let end = url.end() - call.start();
    format!("{}{}{}", &whole[..start], policy.rewrite(url.as_str(), base), &whole[end..])
}
