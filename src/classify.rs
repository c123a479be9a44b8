use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Css,
    Script,
    Opaque,
}

impl ContentKind {
    /// Content-type sent after rewriting. `None` keeps the upstream value.
    pub fn rewritten_content_type(self) -> Option<&'static str> {
        match self {
            ContentKind::Html => Some("text/html; charset=utf-8"),
            ContentKind::Css => Some("text/css; charset=utf-8"),
            ContentKind::Script => Some("application/javascript; charset=utf-8"),
            ContentKind::Opaque => None,
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentKind::Html => write!(f, "html"),
            ContentKind::Css => write!(f, "css"),
            ContentKind::Script => write!(f, "script"),
            ContentKind::Opaque => write!(f, "opaque"),
        }
    }
}

/// Content-types that say nothing about the payload.
fn is_generic(mime: &str) -> bool {
    mime.is_empty()
        || mime == "application/octet-stream"
        || mime == "text/plain"
        || mime == "binary/octet-stream"
}

/// Classify by content-type first, falling back to the URL path suffix when
/// the header is missing or generic.
pub fn classify(content_type: Option<&str>, url: &Url) -> ContentKind {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if mime == "text/html" || mime == "application/xhtml+xml" {
        return ContentKind::Html;
    }
    if mime == "text/css" {
        return ContentKind::Css;
    }
    if mime.contains("javascript") || mime.contains("ecmascript") {
        return ContentKind::Script;
    }
    if !is_generic(&mime) {
        return ContentKind::Opaque;
    }

    let path = url.path().to_ascii_lowercase();
    let extension = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match extension {
        "css" => ContentKind::Css,
        "js" | "mjs" => ContentKind::Script,
        "html" | "htm" if mime.is_empty() => ContentKind::Html,
        _ => ContentKind::Opaque,
    }
}
