//! Streaming HTML rewriting on top of `lol_html`.

use crate::css::{rewrite_css_urls, rewrite_stylesheet};
use crate::error::ProxyError;
use crate::script::{is_javascript_type, rewrite_script};
use crate::url_policy::{ReferenceKind, RewriteContext, UrlPolicy};
use lol_html::html_content::ContentType;
use lol_html::{HtmlRewriter, Settings, element, end, text};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use url::Url;

/// Meta names that would stop the page rendering inside a frame.
const BLOCKING_META: &[&str] = &["content-security-policy", "x-frame-options"];

/// Elements whose reference loads a new top-level document.
fn reference_kind(tag: &str, attribute: &str) -> ReferenceKind {
    match (tag, attribute) {
        ("a" | "area", "href") | ("form", "action") | ("iframe" | "frame", "src") => ReferenceKind::Navigation,
        _ => ReferenceKind::Resource,
    }
}

/// The id the scope wrapper carries, taken from an `#id` scope selector.
pub fn container_id(scope_selector: &str) -> Option<&str> {
    let id = scope_selector.trim().strip_prefix('#')?;
    (!id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')).then_some(id)
}

/// Elements that belong in `<head>`. The scope wrapper never opens before one.
const HEAD_CONTENT: &[&str] = &[
    "base", "head", "html", "link", "meta", "noscript", "script", "style", "template", "title",
];

/// Whether any parsed element already carries `id`. Text inside scripts,
/// comments and attribute values does not count.
fn contains_element_id(source: &str, id: &str) -> Result<bool, ProxyError> {
    let found = Rc::new(Cell::new(false));
    let mut scanner = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![element!("[id]", {
                let found = found.clone();
                move |el| {
                    if el.get_attribute("id").is_some_and(|value| value.trim() == id) {
                        found.set(true);
                    }
                    Ok(())
                }
            })],
            ..Settings::default()
        },
        |_: &[u8]| {},
    );

    scanner
        .write(source.as_bytes())
        .map_err(|e| ProxyError::Rewrite(e.to_string()))?;
    scanner.end().map_err(|e| ProxyError::Rewrite(e.to_string()))?;
    Ok(found.get())
}

/// Rewrite every `url=` portion of a `meta refresh` value, keeping the delay.
pub fn rewrite_refresh(content: &str, base: &Url, policy: &UrlPolicy) -> String {
    let Some((delay, rest)) = content.split_once([';', ',']) else {
        return content.to_string();
    };
    let rest = rest.trim();
    let target = match rest.split_once('=') {
        Some((key, value)) if key.trim().eq_ignore_ascii_case("url") => value.trim(),
        _ => rest,
    };
    let target = target.trim_matches(|c| c == '\'' || c == '"');
    if target.is_empty() {
        return content.to_string();
    }
    format!(
        "{}; url={}",
        delay.trim(),
        policy.rewrite_as(target, base, ReferenceKind::Navigation)
    )
}

/// Rewrite the URL of each image candidate, keeping descriptors verbatim.
pub fn rewrite_srcset(srcset: &str, base: &Url, policy: &UrlPolicy) -> String {
    let mut candidates = Vec::new();
    let mut rest = srcset;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }
        let url_end = rest.find(|c: char| c.is_ascii_whitespace()).unwrap_or(rest.len());
        let mut url = &rest[..url_end];
        rest = &rest[url_end..];

        let mut descriptor = "";
        if url.ends_with(',') {
            url = url.trim_end_matches(',');
        } else {
            let descriptor_end = rest.find(',').unwrap_or(rest.len());
            descriptor = rest[..descriptor_end].trim();
            rest = &rest[descriptor_end..];
        }

        let rewritten = policy.rewrite(url, base);
        candidates.push(if descriptor.is_empty() {
            rewritten
        } else {
            format!("{} {}", rewritten, descriptor)
        });
    }

    candidates.join(", ")
}

fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

/// Rewrite a whole document. The input is decoded as UTF-8 (lossily) and the
/// output is always UTF-8.
///
/// Placement of the injected `<base>` and of the scope wrapper follows the
/// parsed element stream: a `<head>` is synthesized in front of the first
/// element that is neither `html` nor `head`, and without a `<body>` the
/// wrapper opens in front of the first body-level element and closes at
/// `</html>` or at the end of the document.
pub fn rewrite_html(input: &[u8], ctx: &RewriteContext) -> Result<Vec<u8>, ProxyError> {
    let source = String::from_utf8_lossy(input);
    let wrapper = match ctx.scope_selector.as_deref().and_then(container_id) {
        Some(id) if !contains_element_id(&source, id)? => Some(format!(r#"<div id="{}">"#, id)),
        _ => None,
    };

    let base = Rc::new(RefCell::new(ctx.base_url.clone()));
    let base_placed = Rc::new(Cell::new(!ctx.inject_base));
    let head_seen = Rc::new(Cell::new(false));
    let body_seen = Rc::new(Cell::new(false));
    let wrapped = Rc::new(Cell::new(false));
    let wrapper_open = Rc::new(Cell::new(false));
    let style_buffer = Rc::new(RefCell::new(String::new()));
    let script_buffer = Rc::new(RefCell::new(String::new()));
    let script_rewritable = Rc::new(Cell::new(false));

    let base_markup = format!(r#"<base href="{}">"#, escape_attribute(ctx.base_url.as_str()));

    let mut output = Vec::with_capacity(input.len() + input.len() / 4);
    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                // Base and wrapper placement
                element!("*", {
                    let base_placed = base_placed.clone();
                    let head_seen = head_seen.clone();
                    let body_seen = body_seen.clone();
                    let wrapped = wrapped.clone();
                    let wrapper_open = wrapper_open.clone();
                    let base_markup = base_markup.clone();
                    let wrapper = wrapper.clone();
                    move |el| {
                        let tag = el.tag_name();
                        match tag.as_str() {
                            "html" => {
                                if let Some(handlers) = el.end_tag_handlers() {
                                    let wrapper_open = wrapper_open.clone();
                                    handlers.push(Box::new(move |end| {
                                        if wrapper_open.replace(false) {
                                            end.before("</div>", ContentType::Html);
                                        }
                                        Ok(())
                                    }));
                                }
                            }
                            "head" => {
                                head_seen.set(true);
                                if !base_placed.replace(true) {
                                    el.prepend(&base_markup, ContentType::Html);
                                }
                            }
                            _ => {
                                if !base_placed.get() && !head_seen.get() {
                                    el.before(&format!("<head>{}</head>", base_markup), ContentType::Html);
                                    base_placed.set(true);
                                }
                                let Some(open_tag) = wrapper.as_deref() else {
                                    return Ok(());
                                };
                                if tag == "body" {
                                    body_seen.set(true);
                                    if wrapped.replace(true) {
                                        return Ok(());
                                    }
                                    el.prepend(open_tag, ContentType::Html);
                                    wrapper_open.set(true);
                                    if let Some(handlers) = el.end_tag_handlers() {
                                        let wrapper_open = wrapper_open.clone();
                                        handlers.push(Box::new(move |end| {
                                            if wrapper_open.replace(false) {
                                                end.before("</div>", ContentType::Html);
                                            }
                                            Ok(())
                                        }));
                                    }
                                } else if !body_seen.get() && !wrapped.get() && !HEAD_CONTENT.contains(&tag.as_str()) {
                                    el.before(open_tag, ContentType::Html);
                                    wrapped.set(true);
                                    wrapper_open.set(true);
                                }
                            }
                        }
                        Ok(())
                    }
                }),
                element!("base[href]", {
                    let base = base.clone();
                    move |el| {
                        if let Some(href) = el.get_attribute("href") {
                            let resolved = ctx.base_url.join(href.trim()).ok();
                            if let Some(resolved) = resolved {
                                *base.borrow_mut() = resolved;
                            }
                        }
                        if ctx.inject_base {
                            el.remove();
                        }
                        Ok(())
                    }
                }),
                element!("meta", {
                    let base = base.clone();
                    move |el| {
                        let equiv = el.get_attribute("http-equiv").unwrap_or_default();
                        let name = el.get_attribute("name").unwrap_or_default();
                        let blocking = BLOCKING_META.iter().any(|blocked| {
                            equiv.trim().eq_ignore_ascii_case(blocked) || name.trim().eq_ignore_ascii_case(blocked)
                        });
                        if blocking {
                            el.remove();
                            return Ok(());
                        }
                        if equiv.trim().eq_ignore_ascii_case("refresh") {
                            if let Some(content) = el.get_attribute("content") {
                                let rewritten = rewrite_refresh(&content, &base.borrow(), &ctx.policy);
                                el.set_attribute("content", &rewritten)?;
                            }
                        }
                        Ok(())
                    }
                }),
                element!("*[href]", {
                    let base = base.clone();
                    move |el| {
                        let tag = el.tag_name();
                        if tag == "base" || el.removed() {
                            return Ok(());
                        }
                        if let Some(href) = el.get_attribute("href") {
                            let kind = reference_kind(&tag, "href");
                            let rewritten = ctx.policy.rewrite_as(&href, &base.borrow(), kind);
                            el.set_attribute("href", &rewritten)?;
                        }
                        Ok(())
                    }
                }),
                element!("*[src]", {
                    let base = base.clone();
                    move |el| {
                        if let Some(src) = el.get_attribute("src") {
                            let kind = reference_kind(&el.tag_name(), "src");
                            let rewritten = ctx.policy.rewrite_as(&src, &base.borrow(), kind);
                            el.set_attribute("src", &rewritten)?;
                        }
                        Ok(())
                    }
                }),
                element!("*[action]", {
                    let base = base.clone();
                    move |el| {
                        if let Some(action) = el.get_attribute("action") {
                            let kind = reference_kind(&el.tag_name(), "action");
                            let rewritten = ctx.policy.rewrite_as(&action, &base.borrow(), kind);
                            el.set_attribute("action", &rewritten)?;
                        }
                        Ok(())
                    }
                }),
                element!("*[srcset]", {
                    let base = base.clone();
                    move |el| {
                        if let Some(srcset) = el.get_attribute("srcset") {
                            let rewritten = rewrite_srcset(&srcset, &base.borrow(), &ctx.policy);
                            el.set_attribute("srcset", &rewritten)?;
                        }
                        Ok(())
                    }
                }),
                element!("*[style]", {
                    let base = base.clone();
                    move |el| {
                        if let Some(style) = el.get_attribute("style") {
                            let rewritten = rewrite_css_urls(&style, &base.borrow(), &ctx.policy);
                            el.set_attribute("style", &rewritten)?;
                        }
                        Ok(())
                    }
                }),
                text!("style", {
                    let base = base.clone();
                    let style_buffer = style_buffer.clone();
                    move |chunk| {
                        style_buffer.borrow_mut().push_str(chunk.as_str());
                        if chunk.last_in_text_node() {
                            let css = std::mem::take(&mut *style_buffer.borrow_mut());
                            let mut style_ctx = ctx.clone();
                            style_ctx.base_url = base.borrow().clone();
                            chunk.replace(&rewrite_stylesheet(&css, &style_ctx), ContentType::Html);
                        } else {
                            chunk.remove();
                        }
                        Ok(())
                    }
                }),
                element!("script", {
                    let script_rewritable = script_rewritable.clone();
                    move |el| {
                        let inline = el.get_attribute("src").is_none();
                        let javascript = is_javascript_type(el.get_attribute("type").as_deref());
                        script_rewritable.set(ctx.rewrite_scripts && inline && javascript);
                        Ok(())
                    }
                }),
                text!("script", {
                    let base = base.clone();
                    let script_buffer = script_buffer.clone();
                    let script_rewritable = script_rewritable.clone();
                    move |chunk| {
                        if !script_rewritable.get() {
                            return Ok(());
                        }
                        script_buffer.borrow_mut().push_str(chunk.as_str());
                        if chunk.last_in_text_node() {
                            let source = std::mem::take(&mut *script_buffer.borrow_mut());
                            let rewritten = rewrite_script(&source, &base.borrow(), &ctx.policy);
                            chunk.replace(&rewritten, ContentType::Html);
                        } else {
                            chunk.remove();
                        }
                        Ok(())
                    }
                }),
            ],
            document_content_handlers: vec![end!({
                let wrapper_open = wrapper_open.clone();
                let base_placed = base_placed.clone();
                move |end| {
                    if wrapper_open.replace(false) {
                        end.append("</div>", ContentType::Html);
                    }
                    // A document without a single element
                    if !base_placed.replace(true) {
                        end.append(&base_markup, ContentType::Html);
                    }
                    Ok(())
                }
            })],
            ..Settings::default()
        },
        |c: &[u8]| output.extend_from_slice(c),
    );

    rewriter
        .write(source.as_bytes())
        .map_err(|e| ProxyError::Rewrite(e.to_string()))?;
    rewriter
        .end()
        .map_err(|e| ProxyError::Rewrite(e.to_string()))?;

    Ok(output)
}
