//! Integration tests for redirect resolution, header profile rotation and
//! per-host cookie replay.

mod support;

use bytes::Bytes;
use hyper::{Method, StatusCode};
use std::sync::Arc;
use support::{ScriptedTransport, header, html, redirect, respond};
use url::Url;
use yubikiri_proxy::ProxyError;
use yubikiri_proxy::cookies::{CookieStore, MemoryCookieStore};
use yubikiri_proxy::fetcher::{RedirectFetcher, RequestOptions};
use yubikiri_proxy::profiles::ProfileSelector;

fn fetcher(transport: &Arc<ScriptedTransport>, max_redirects: usize) -> RedirectFetcher {
    RedirectFetcher::new(transport.clone(), Arc::new(MemoryCookieStore::new()), max_redirects)
}

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

#[tokio::test]
async fn test_chain_of_n_hops_resolves_to_last_location() {
    const HOPS: usize = 5;
    let transport = Arc::new(ScriptedTransport::new(|request, _| {
        let step: usize = request.url.path().trim_start_matches("/hop/").parse().unwrap();
        Ok(if step < HOPS {
            redirect(302, &format!("/hop/{}", step + 1))
        } else {
            html("<p>done</p>")
        })
    }));

    let outcome = fetcher(&transport, 20)
        .fetch(&url("https://a.test/hop/0"), &RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.chain.len(), HOPS);
    assert_eq!(outcome.final_url.as_str(), "https://a.test/hop/5");
    assert_eq!(outcome.chain.last().unwrap().location, outcome.final_url);
    assert_eq!(outcome.envelope.status, StatusCode::OK);
    assert_eq!(transport.request_count(), HOPS + 1);
}

#[tokio::test]
async fn test_redirect_loop_is_bounded() {
    let transport = Arc::new(ScriptedTransport::new(|_, _| Ok(redirect(302, "/loop"))));

    let result = fetcher(&transport, 3)
        .fetch(&url("https://a.test/loop"), &RequestOptions::default())
        .await;

    match result {
        Err(ProxyError::RedirectLimitExceeded { limit, chain }) => {
            assert_eq!(limit, 3);
            assert_eq!(chain.len(), 4);
        }
        other => panic!("expected redirect limit error, got {:?}", other.map(|o| o.final_url)),
    }
    assert_eq!(transport.request_count(), 4);
}

#[tokio::test]
async fn test_locations_resolve_against_the_current_hop() {
    let transport = Arc::new(ScriptedTransport::new(|request, _| {
        Ok(match request.url.as_str() {
            "https://a.test/x/y" => redirect(301, "../z"),
            "https://a.test/z" => redirect(302, "//b.test/c"),
            _ => html("ok"),
        })
    }));

    let outcome = fetcher(&transport, 20)
        .fetch(&url("https://a.test/x/y"), &RequestOptions::default())
        .await
        .unwrap();

    let visited: Vec<String> = transport.requests().iter().map(|r| r.url.to_string()).collect();
    assert_eq!(visited, ["https://a.test/x/y", "https://a.test/z", "https://b.test/c"]);
    assert_eq!(outcome.final_url.as_str(), "https://b.test/c");
}

#[tokio::test]
async fn test_unusable_location_ends_the_chain() {
    let transport = Arc::new(ScriptedTransport::new(|_, _| Ok(redirect(302, "ftp://files.test/a"))));

    let outcome = fetcher(&transport, 20)
        .fetch(&url("https://a.test/"), &RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.envelope.status, StatusCode::FOUND);
    assert!(outcome.chain.is_empty());
}

#[tokio::test]
async fn test_see_other_switches_post_to_get() {
    let transport = Arc::new(ScriptedTransport::new(|request, _| {
        Ok(match request.url.path() {
            "/submit" => redirect(303, "/result"),
            "/keep" => redirect(307, "/result"),
            _ => html("ok"),
        })
    }));
    let mut options = RequestOptions {
        method: Method::POST,
        body: Bytes::from_static(b"a=1"),
        ..RequestOptions::default()
    };
    options
        .headers
        .insert("content-type", "application/x-www-form-urlencoded".parse().unwrap());

    let fetcher = fetcher(&transport, 20);
    fetcher.fetch(&url("https://a.test/submit"), &options).await.unwrap();
    fetcher.fetch(&url("https://a.test/keep"), &options).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests[1].method, Method::GET);
    assert!(requests[1].body.is_empty());
    assert!(header(&requests[1], "content-type").is_none());

    assert_eq!(requests[3].method, Method::POST);
    assert_eq!(requests[3].body, Bytes::from_static(b"a=1"));
    assert_eq!(header(&requests[3], "content-type"), Some("application/x-www-form-urlencoded"));
}

#[tokio::test]
async fn test_cookies_are_replayed_per_host() {
    let transport = Arc::new(ScriptedTransport::new(|request, _| {
        Ok(match request.url.host_str() {
            Some("a.test") => respond(
                302,
                &[("location", "https://b.test/"), ("set-cookie", "sid=abc; Path=/; HttpOnly")],
                Bytes::new(),
            ),
            _ => html("ok"),
        })
    }));
    let cookies = Arc::new(MemoryCookieStore::new());
    let fetcher = RedirectFetcher::new(transport.clone(), cookies.clone(), 20);

    fetcher.fetch(&url("https://a.test/"), &RequestOptions::default()).await.unwrap();
    fetcher.fetch(&url("https://a.test/"), &RequestOptions::default()).await.unwrap();

    let requests = transport.requests();
    assert_eq!(header(&requests[0], "cookie"), None);
    assert_eq!(header(&requests[1], "cookie"), None, "b.test must not see a.test cookies");
    assert_eq!(header(&requests[2], "cookie"), Some("sid=abc"));
    assert_eq!(cookies.cookie_header("a.test").as_deref(), Some("sid=abc"));
}

#[tokio::test]
async fn test_profiles_rotate_on_forbidden() {
    let transport = Arc::new(ScriptedTransport::new(|request, _| {
        let accepted = header(request, "user-agent").is_some_and(|ua| ua.contains("Firefox"));
        Ok(if accepted { html("welcome") } else { respond(403, &[], "denied") })
    }));

    let outcome = ProfileSelector::default()
        .fetch(&fetcher(&transport, 20), &url("https://a.test/page?q=1"), &RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.envelope.status, StatusCode::OK);
    let requests = transport.requests();
    assert_eq!(requests.len(), 3);
    for request in &requests {
        assert_eq!(header(request, "referer"), Some("https://a.test/"));
    }
}

#[tokio::test]
async fn test_every_profile_denied_returns_last_response() {
    let transport = Arc::new(ScriptedTransport::new(|_, index| {
        Ok(respond(403, &[], format!("denied #{}", index)))
    }));
    let selector = ProfileSelector::default();

    let outcome = selector
        .fetch(&fetcher(&transport, 20), &url("https://a.test/"), &RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.envelope.status, StatusCode::FORBIDDEN);
    let requests = transport.requests();
    assert_eq!(requests.len(), selector.profiles().len() + 1);
    assert!(header(requests.last().unwrap(), "user-agent").is_none());
}

#[tokio::test]
async fn test_failed_bare_attempt_keeps_last_denial() {
    let transport = Arc::new(ScriptedTransport::new(|request, index| {
        if header(request, "user-agent").is_none() {
            return Err(ProxyError::UpstreamUnreachable("reset".to_string()));
        }
        Ok(respond(403, &[], format!("denied #{}", index)))
    }));

    let outcome = ProfileSelector::default()
        .fetch(&fetcher(&transport, 20), &url("https://a.test/"), &RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.envelope.status, StatusCode::FORBIDDEN);
    assert_eq!(outcome.envelope.body, Bytes::from("denied #3"));
}

#[tokio::test]
async fn test_other_errors_are_not_rotated() {
    let not_found = Arc::new(ScriptedTransport::new(|_, _| Ok(respond(404, &[], "missing"))));
    let outcome = ProfileSelector::default()
        .fetch(&fetcher(&not_found, 20), &url("https://a.test/"), &RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.envelope.status, StatusCode::NOT_FOUND);
    assert_eq!(not_found.request_count(), 1);

    let unreachable = Arc::new(ScriptedTransport::new(|_, _| {
        Err(ProxyError::UpstreamUnreachable("dns failure".to_string()))
    }));
    let result = ProfileSelector::default()
        .fetch(&fetcher(&unreachable, 20), &url("https://a.test/"), &RequestOptions::default())
        .await;
    assert!(matches!(result, Err(ProxyError::UpstreamUnreachable(_))));
    assert_eq!(unreachable.request_count(), 1);
}
