//! Stylesheet rewriting: `url(...)` / `@import` targets and optional selector
//! scoping.
//!
//! Both passes walk the text with a small scanner that understands comments,
//! strings, escapes and brace nesting. Every structural character is ASCII, so
//! slicing the source at scanner positions always lands on a char boundary.

use crate::url_policy::{RewriteContext, UrlPolicy};
use url::Url;

/// Conditional group rules whose body is itself a list of rules.
const GROUPING_AT_RULES: &[&str] = &["media", "supports", "container", "layer", "document"];

/// Rewrite references and, when the context carries a scope selector, confine
/// every rule to it.
pub fn rewrite_stylesheet(css: &str, ctx: &RewriteContext) -> String {
    let rewritten = rewrite_css_urls(css, &ctx.base_url, &ctx.policy);
    match ctx.scope_selector.as_deref() {
        Some(scope) => scope_css(&rewritten, scope),
        None => rewritten,
    }
}

/// Route every `url(...)` and `@import "..."` target through the proxy.
pub fn rewrite_css_urls(css: &str, base: &Url, policy: &UrlPolicy) -> String {
    let bytes = css.as_bytes();
    let len = bytes.len();
    let mut out = String::with_capacity(len + len / 4);
    let mut copied = 0;
    let mut i = 0;

    while i < len {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_comment(bytes, i),
            b'"' | b'\'' => i = skip_string(bytes, i),
            b'\\' => i += 2,
            b'@' if starts_with_ignore_case(bytes, i, b"@import") => {
                let j = skip_whitespace(bytes, i + 7);
                if j < len && (bytes[j] == b'"' || bytes[j] == b'\'') {
                    let quote = bytes[j] as char;
                    let end = skip_string(bytes, j);
                    if end >= j + 2 && bytes[end - 1] == bytes[j] {
                        let target = &css[j + 1..end - 1];
                        out.push_str(&css[copied..j]);
                        out.push(quote);
                        out.push_str(&policy.rewrite(target, base));
                        out.push(quote);
                        copied = end;
                    }
                    i = end;
                } else {
                    i = j;
                }
            }
            b'u' | b'U' if starts_with_ignore_case(bytes, i, b"url(") && (i == 0 || !is_ident_byte(bytes[i - 1])) => {
                let open = i + 4;
                let Some(close) = find_url_close(bytes, open) else {
                    break;
                };
                let value = unquote(css[open..close].trim());
                let rewritten = policy.rewrite(value, base);
                if rewritten != value {
                    out.push_str(&css[copied..i]);
                    out.push_str("url(\"");
                    out.push_str(&rewritten);
                    out.push_str("\")");
                    copied = close + 1;
                }
                i = close + 1;
            }
            _ => i += 1,
        }
    }

    out.push_str(&css[copied.min(len)..]);
    out
}

/// Prefix every selector with `scope`, recursing into grouping at-rules so that
/// rules nested in `@media` blocks are scoped as well.
pub fn scope_css(css: &str, scope: &str) -> String {
    let scope = scope.trim();
    if scope.is_empty() {
        return css.to_string();
    }
    scope_rules(css, scope)
}

fn scope_rules(css: &str, scope: &str) -> String {
    let bytes = css.as_bytes();
    let len = bytes.len();
    let mut out = String::with_capacity(len + len / 2);
    let mut i = 0;

    while i < len {
        let start = i;
        i = skip_trivia(bytes, i);
        out.push_str(&css[start..i]);
        if i >= len {
            break;
        }

        if bytes[i] == b'}' || bytes[i] == b';' {
            out.push(bytes[i] as char);
            i += 1;
            continue;
        }

        let Some((end, terminator)) = find_prelude_end(bytes, i) else {
            out.push_str(&css[i..]);
            break;
        };

        match terminator {
            b';' => {
                out.push_str(&css[i..=end]);
                i = end + 1;
            }
            b'}' => {
                out.push_str(&css[i..end]);
                i = end;
            }
            _ => {
                let close = matching_brace(bytes, end);
                let prelude = &css[i..end];
                let body = &css[end + 1..close.min(len)];

                if bytes[i] == b'@' {
                    out.push_str(prelude);
                    out.push('{');
                    if GROUPING_AT_RULES.contains(&at_rule_name(prelude).as_str()) {
                        out.push_str(&scope_rules(body, scope));
                    } else {
                        out.push_str(body);
                    }
                } else {
                    out.push_str(&scope_selector_list(prelude, scope));
                    out.push_str(" {");
                    out.push_str(body);
                }

                if close < len {
                    out.push('}');
                }
                i = close + 1;
            }
        }
    }

    out
}

/// Scope one comma-separated selector list.
pub fn scope_selector_list(selectors: &str, scope: &str) -> String {
    split_top_level_commas(selectors)
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|selector| {
            if selector.starts_with(scope) {
                selector.to_string()
            } else if ["html", ":root", "body"].iter().any(|root| selector.eq_ignore_ascii_case(root)) {
                scope.to_string()
            } else {
                format!("{} {}", scope, selector)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn split_top_level_commas(list: &str) -> Vec<&str> {
    let bytes = list.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'\\' => {
                i += 2;
                continue;
            }
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                parts.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&list[start.min(list.len())..]);
    parts
}

fn at_rule_name(prelude: &str) -> String {
    prelude
        .trim_start()
        .trim_start_matches('@')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Position and byte of the first `{`, `;` or `}` outside strings, comments
/// and parentheses.
fn find_prelude_end(bytes: &[u8], from: usize) -> Option<(usize, u8)> {
    let mut depth = 0usize;
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_comment(bytes, i);
                continue;
            }
            b'"' | b'\'' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'\\' => {
                i += 2;
                continue;
            }
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            c @ (b'{' | b';' | b'}') if depth == 0 => return Some((i, c)),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Index of the `}` closing the block opened at `open`, or `bytes.len()` when
/// the block is never closed.
fn matching_brace(bytes: &[u8], open: usize) -> usize {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_comment(bytes, i);
                continue;
            }
            b'"' | b'\'' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'\\' => {
                i += 2;
                continue;
            }
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return i;
                }
            }
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

/// Index of the `)` ending a `url(` token whose contents start at `from`.
fn find_url_close(bytes: &[u8], from: usize) -> Option<usize> {
    let mut i = skip_whitespace(bytes, from);
    if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
        i = skip_string(bytes, i);
    }
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b')' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 && (bytes[0] == b'"' || bytes[0] == b'\'') && bytes[bytes.len() - 1] == bytes[0] {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn skip_comment(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

/// Returns the index just past the closing quote. An unescaped newline ends a
/// bad string without consuming it.
fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return i,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

fn skip_trivia(bytes: &[u8], mut i: usize) -> usize {
    loop {
        i = skip_whitespace(bytes, i);
        if i + 1 < bytes.len() && bytes[i] == b'/' && bytes[i + 1] == b'*' {
            i = skip_comment(bytes, i);
        } else {
            return i;
        }
    }
}

fn starts_with_ignore_case(bytes: &[u8], at: usize, needle: &[u8]) -> bool {
    bytes
        .get(at..at + needle.len())
        .is_some_and(|window| window.eq_ignore_ascii_case(needle))
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}
