mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::HashingEmbedder;
use kb_harness::config::Config;
use kb_harness::embedding::Embedder;
use kb_harness::fetch::StaticFetcher;
use kb_harness::kb::KnowledgeBase;
use kb_harness::server::router;
use kb_harness::store::{EmbeddingFunction, InMemoryStore, VectorStore};
use serde_json::{json, Value};
use tower::ServiceExt;

const TOKEN: &str = "s3cret";

fn app_with_store(store: Arc<InMemoryStore>) -> Router {
    let mut config = Config::default();
    config.crawl.min_delay = 0.0;
    config.crawl.max_delay = 0.0;
    let fetcher = StaticFetcher::new()
        .with_html(
            "https://site.test/",
            "<html><body><p>Index page about borrow checking.</p>\
             <a href=\"/lifetimes\">next</a></body></html>",
        )
        .with_html(
            "https://site.test/lifetimes",
            "<html><body><p>Lifetimes describe how long references live.</p></body></html>",
        );
    let embedder = Embedder::Bulk(Arc::new(HashingEmbedder::new(64)));
    let kb = KnowledgeBase::new(config, Arc::new(fetcher), store, embedder);
    router(Arc::new(kb), Some(TOKEN.to_string()))
}

fn app() -> Router {
    let embedder = Embedder::Bulk(Arc::new(HashingEmbedder::new(64)));
    app_with_store(Arc::new(InMemoryStore::new(EmbeddingFunction::new(
        embedder, 8,
    ))))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(app(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_crawl_then_query() {
    let app = app();
    let (status, body) = send(
        app.clone(),
        post_json("/kb/crawl", json!({ "urls": ["https://site.test/"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let collection = body["collection"].as_str().unwrap().to_string();
    assert!(collection.starts_with("crawl_site_test_"));
    assert_eq!(body["urls"].as_array().unwrap().len(), 2);

    let (status, body) = send(
        app.clone(),
        post_json(
            "/kb/query",
            json!({ "collection": collection, "query": "lifetimes references" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hits"][0]["source_location"], "https://site.test/lifetimes");

    let req = Request::builder()
        .uri("/kb/collections")
        .body(Body::empty())
        .unwrap();
    let (_, body) = send(app, req).await;
    assert_eq!(body["collections"], json!([collection]));
}

#[tokio::test]
async fn test_input_errors_map_to_400() {
    let (status, body) = send(app(), post_json("/kb/crawl", json!({ "urls": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "no_locations");

    let (status, body) = send(
        app(),
        post_json(
            "/kb/crawl",
            json!({ "urls": ["https://site.test/"], "keywords": ["haskell"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "no_documents");

    let (status, body) = send(
        app(),
        post_json(
            "/kb/crawl",
            json!({ "urls": ["https://site.test/"], "min_delay": 3.0, "max_delay": 1.0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = send(
        app(),
        post_json(
            "/kb/crawl",
            json!({ "urls": ["https://site.test/"], "min_delay": 1.0, "max_delay": 1e300 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_unknown_collection_is_404() {
    let (status, body) = send(
        app(),
        post_json("/kb/query", json!({ "collection": "missing", "query": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_cleanup_requires_token() {
    let store = Arc::new(InMemoryStore::default());
    for i in 0..4 {
        store.create_collection(&format!("kb_{i}")).await.unwrap();
    }
    let app = app_with_store(store.clone());

    let (status, body) = send(
        app.clone(),
        post_json("/admin/cleanup", json!({ "max_collections": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let mut req = post_json("/admin/cleanup", json!({ "max_collections": 2 }));
    req.headers_mut()
        .insert("x-admin-token", "wrong".parse().unwrap());
    let (status, _) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(store.list_collections().await.unwrap().len(), 4);

    let mut req = post_json("/admin/cleanup", json!({ "max_collections": 2 }));
    req.headers_mut().insert("x-admin-token", TOKEN.parse().unwrap());
    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], json!(["kb_0", "kb_1"]));
    assert_eq!(body["remaining"], 2);
}
