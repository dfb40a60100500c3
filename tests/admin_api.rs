//! Admin listener: bearer auth and the `/api/v1/cache/*` endpoints.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use advanced_cache::cache::{CacheAdmin, CacheStore, MemoryBackend};
use advanced_cache::infra::http::{ApiState, build_admin_router};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;

const TOKEN: &str = "admin-secret";

fn router(token: Option<&str>) -> Router {
    let store = CacheStore::new(
        Arc::new(MemoryBackend::new(NonZeroUsize::new(64).expect("non-zero"))),
        Duration::from_secs(1),
    );
    build_admin_router(ApiState::new(CacheAdmin::new(store), token), 1024 * 1024)
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request")
}

async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

const ENTRY: &str = "/api/v1/cache/entry?url=https%3A%2F%2Fexample.com%2Fpost&variant=lang%3Dde";

#[tokio::test]
async fn health_needs_no_token() {
    let router = router(Some(TOKEN));
    let response = router
        .oneshot(
            Request::builder()
                .uri("/_health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn missing_or_wrong_token_is_rejected() {
    let router = router(Some(TOKEN));

    let anonymous = Request::builder()
        .uri(ENTRY)
        .body(Body::empty())
        .expect("request");
    let (status, body) = call(&router, anonymous).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let wrong = Request::builder()
        .uri(ENTRY)
        .header(header::AUTHORIZATION, "Bearer nope")
        .body(Body::empty())
        .expect("request");
    let (status, _) = call(&router, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn api_is_disabled_without_configured_token() {
    let router = router(None);
    let (status, body) = call(&router, request(Method::GET, ENTRY, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"]["hint"].as_str().is_some());
}

#[tokio::test]
async fn entry_lifecycle() {
    let router = router(Some(TOKEN));

    let (status, stored) = call(
        &router,
        request(
            Method::PUT,
            "/api/v1/cache/entry",
            Some(json!({
                "url": "https://Example.com/post",
                "variant_key": "lang=de",
                "headers": [["content-type", "text/html"], ["content-length", "9"]],
                "body": "<p>hallo</p>",
                "ttl_secs": 120
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["url"], "example.com/post");
    assert_eq!(stored["status"], 200);
    assert_eq!(stored["ttl_secs"], 120);
    assert_eq!(stored["headers"], json!([["content-type", "text/html"]]));

    let (status, fetched) = call(&router, request(Method::GET, ENTRY, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["body"], "<p>hallo</p>");
    assert_eq!(fetched["body_encoding"], "utf8");

    let (status, info) = call(
        &router,
        request(
            Method::GET,
            "/api/v1/cache/info?url=https%3A%2F%2Fexample.com%2Fpost&variant=lang%3Dde",
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["body_bytes"], 12);
    assert_eq!(info["body_size"], "12 B");
    assert_eq!(info["variants"], json!(["lang=de"]));

    let (status, deleted) = call(&router, request(Method::DELETE, ENTRY, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["deleted"], true);

    let (status, missing) = call(&router, request(Method::GET, ENTRY, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(missing["error"]["code"], "not_found");

    let (status, _) = call(&router, request(Method::DELETE, ENTRY, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn flush_removes_every_variant() {
    let router = router(Some(TOKEN));
    for variant in ["", "lang=de", "lang=fr"] {
        let (status, _) = call(
            &router,
            request(
                Method::PUT,
                "/api/v1/cache/entry",
                Some(json!({
                    "url": "https://example.com/",
                    "variant_key": variant,
                    "body": "page"
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, flushed) = call(
        &router,
        request(
            Method::POST,
            "/api/v1/cache/flush",
            Some(json!({ "url": "https://example.com/" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(flushed["url"], "example.com/");
    assert_eq!(flushed["removed"], 3);

    let (status, _) = call(
        &router,
        request(
            Method::GET,
            "/api/v1/cache/entry?url=https%3A%2F%2Fexample.com%2F",
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_input_uses_error_envelope() {
    let router = router(Some(TOKEN));

    let (status, body) = call(
        &router,
        request(Method::GET, "/api/v1/cache/entry?url=ftp%3A%2F%2Fexample.com%2F", None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_url");

    let (status, body) = call(&router, request(Method::GET, "/api/v1/cache/entry", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = call(
        &router,
        request(
            Method::PUT,
            "/api/v1/cache/entry",
            Some(json!({ "url": "https://example.com/", "status": 42 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_input");

    let (status, body) = call(
        &router,
        request(
            Method::PUT,
            "/api/v1/cache/entry",
            Some(json!({
                "url": "https://example.com/",
                "body": "%%%",
                "body_encoding": "base64"
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_input");
}
