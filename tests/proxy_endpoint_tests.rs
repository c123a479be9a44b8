//! End-to-end tests of the `/proxy` and `/r` endpoints against a scripted
//! upstream.

mod support;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, HOST};
use hyper::{Method, Request, Response, StatusCode};
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use support::{ScriptedTransport, header, html, redirect, respond};
use yubikiri_proxy::cookies::MemoryCookieStore;
use yubikiri_proxy::{Config, RewritingProxy};

fn proxy_with(config: Config, transport: &Arc<ScriptedTransport>) -> RewritingProxy {
    RewritingProxy::with_transport(config, transport.clone(), Arc::new(MemoryCookieStore::new()))
}

fn request(method: Method, uri: &str, body: &'static str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(HOST, "localhost:3000")
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap()
}

async fn body_text(response: Response<Full<Bytes>>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Value of the first `attr="..."` in `markup`.
fn attribute<'a>(markup: &'a str, attr: &str) -> &'a str {
    let needle = format!("{}=\"", attr);
    let start = markup.find(&needle).unwrap() + needle.len();
    let end = start + markup[start..].find('"').unwrap();
    &markup[start..end]
}

#[tokio::test]
async fn test_redirected_page_references_route_through_proxy() {
    let transport = Arc::new(ScriptedTransport::new(|request, index| {
        assert_eq!(request.url.as_str(), "https://example.com/");
        Ok(if index == 0 {
            redirect(301, "https://example.com/")
        } else {
            html(r#"<html><body><img src="/a.png"></body></html>"#)
        })
    }));
    let proxy = proxy_with(Config::default(), &transport);

    let response = proxy.handle(request(Method::GET, "/proxy?url=example.com", "")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "text/html; charset=utf-8");
    assert_eq!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");

    let body = body_text(response).await;
    let src = attribute(&body, "src");
    let encoded = src.strip_prefix("http://localhost:3000/r?url=").unwrap();
    assert_eq!(percent_decode_str(encoded).decode_utf8().unwrap(), "https://example.com/a.png");
    assert!(body.contains(r#"<base href="https://example.com/">"#));
    assert_eq!(transport.request_count(), 2);
}

#[tokio::test]
async fn test_missing_url_parameter() {
    let transport = Arc::new(ScriptedTransport::new(|_, _| Ok(html("unused"))));
    let response = proxy_with(Config::default(), &transport)
        .handle(request(Method::GET, "/proxy?other=1", ""))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("url"));
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn test_upstream_status_is_forwarded_with_snippet() {
    let transport = Arc::new(ScriptedTransport::new(|_, _| {
        Ok(respond(404, &[("content-type", "text/html")], "<h1>Not   Found</h1>\n<p>gone</p>"))
    }));
    let response = proxy_with(Config::default(), &transport)
        .handle(request(Method::GET, "/proxy?url=https%3A%2F%2Fx.test%2Fmissing", ""))
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_text(response).await;
    assert!(body.contains("https://x.test/missing"));
    assert!(body.contains("<h1>Not Found</h1> <p>gone</p>"));
}

#[tokio::test]
async fn test_redirect_loop_reports_chain() {
    let transport = Arc::new(ScriptedTransport::new(|_, _| Ok(redirect(302, "/again"))));
    let config = Config {
        max_redirects: 2,
        ..Config::default()
    };
    let response = proxy_with(config, &transport)
        .handle(request(Method::GET, "/proxy?url=x.test/again", ""))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_text(response).await;
    assert!(body.contains("1. 302 https://x.test/again -> https://x.test/again"));
    assert!(body.contains("3. 302"));
    assert_eq!(transport.request_count(), 3);
}

#[tokio::test]
async fn test_stylesheet_is_rewritten_and_sanitized() {
    let transport = Arc::new(ScriptedTransport::new(|_, _| {
        Ok(respond(
            200,
            &[
                ("content-type", "text/css; charset=iso-8859-1"),
                ("content-security-policy", "default-src 'none'"),
                ("x-frame-options", "DENY"),
                ("set-cookie", "theme=dark"),
            ],
            "@import 'base.css';\n.logo { background: url(img/logo.png) }",
        ))
    }));
    let response = proxy_with(Config::default(), &transport)
        .handle(request(Method::GET, "/r?url=https%3A%2F%2Fcdn.test%2Fcss%2Fsite.css", ""))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "text/css; charset=utf-8");
    assert!(!headers.contains_key("content-security-policy"));
    assert!(!headers.contains_key("x-frame-options"));
    assert!(!headers.contains_key("set-cookie"));

    let body = body_text(response).await;
    assert!(body.contains("@import 'http://localhost:3000/r?url=https%3A%2F%2Fcdn.test%2Fcss%2Fbase.css';"));
    assert!(body.contains(r#"url("http://localhost:3000/r?url=https%3A%2F%2Fcdn.test%2Fcss%2Fimg%2Flogo.png")"#));
}

#[tokio::test]
async fn test_opaque_bodies_pass_through_untouched() {
    let png: &'static [u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0x00];
    let transport = Arc::new(ScriptedTransport::new(move |_, _| {
        Ok(respond(200, &[("content-type", "image/png")], Bytes::from_static(png)))
    }));
    let response = proxy_with(Config::default(), &transport)
        .handle(request(Method::GET, "/r?url=https%3A%2F%2Fx.test%2Fa.png", ""))
        .await;

    assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "image/png");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.as_ref(), png);
}

#[tokio::test]
async fn test_form_post_is_forwarded() {
    let transport = Arc::new(ScriptedTransport::new(|_, _| Ok(html("<p>thanks</p>"))));
    let mut post = request(Method::POST, "/proxy?url=https%3A%2F%2Fx.test%2Fsubmit", "q=rust&page=2");
    post.headers_mut()
        .insert(CONTENT_TYPE, "application/x-www-form-urlencoded".parse().unwrap());

    let response = proxy_with(Config::default(), &transport).handle(post).await;
    assert_eq!(response.status(), StatusCode::OK);

    let sent = &transport.requests()[0];
    assert_eq!(sent.method, Method::POST);
    assert_eq!(sent.body, Bytes::from_static(b"q=rust&page=2"));
    assert_eq!(header(sent, "content-type"), Some("application/x-www-form-urlencoded"));
    assert_eq!(header(sent, "referer"), Some("https://x.test/"));
}

#[tokio::test]
async fn test_scoped_document() {
    let transport = Arc::new(ScriptedTransport::new(|_, _| {
        Ok(html(
            "<html><head><style>body { margin: 0 } @media (max-width: 600px) { h1, h2 { font-size: 1em } }</style></head><body><h1>t</h1></body></html>",
        ))
    }));
    let config = Config {
        scope_css: true,
        public_origin: Some("https://proxy.example.org".to_string()),
        ..Config::default()
    };
    let body = body_text(
        proxy_with(config, &transport)
            .handle(request(Method::GET, "/proxy?url=x.test", ""))
            .await,
    )
    .await;

    assert!(body.contains("#proxy-root { margin: 0 }"));
    assert!(body.contains("@media (max-width: 600px) {"));
    assert!(body.contains("#proxy-root h1, #proxy-root h2 {"));
    assert!(body.contains(r#"<body><div id="proxy-root"><h1>t</h1></div></body>"#));
}

#[tokio::test]
async fn test_navigation_links_use_proxy_endpoint() {
    let transport = Arc::new(ScriptedTransport::new(|_, _| {
        Ok(html(r#"<html><head></head><body><a href="/next">n</a><script src="app.js"></script></body></html>"#))
    }));
    let config = Config {
        public_origin: Some("https://proxy.example.org/".to_string()),
        ..Config::default()
    };
    let body = body_text(
        proxy_with(config, &transport)
            .handle(request(Method::GET, "/proxy?url=x.test/dir/", ""))
            .await,
    )
    .await;

    assert!(body.contains(r#"href="https://proxy.example.org/proxy?url=https%3A%2F%2Fx.test%2Fnext""#));
    assert!(body.contains(r#"src="https://proxy.example.org/r?url=https%3A%2F%2Fx.test%2Fdir%2Fapp.js""#));
}
