mod common;

use std::fs;
use std::sync::Arc;

use common::HashingEmbedder;
use kb_harness::config::Config;
use kb_harness::embedding::Embedder;
use kb_harness::error::KbError;
use kb_harness::fetch::StaticFetcher;
use kb_harness::kb::{CrawlKbRequest, KnowledgeBase, LocalKbRequest};
use kb_harness::naming::is_valid_name;
use kb_harness::store::{Collection, EmbeddingFunction, SqliteStore, VectorStore};
use tempfile::TempDir;

fn site() -> StaticFetcher {
    StaticFetcher::new()
        .with_html(
            "https://docs.example.com/",
            r#"<html><head><title>Home</title></head><body>
               <p>Welcome to the tokio runtime guide.</p>
               <a href="/spawning">Spawning</a> <a href="/channels">Channels</a>
               </body></html>"#,
        )
        .with_html(
            "https://docs.example.com/spawning",
            "<html><head><title>Spawning</title></head><body>\
             <p>Use tokio::spawn to run tasks concurrently on the runtime.</p></body></html>",
        )
        .with_html(
            "https://docs.example.com/channels",
            "<html><head><title>Channels</title></head><body>\
             <p>An mpsc channel sends messages between tasks.</p></body></html>",
        )
}

fn hashing() -> Embedder {
    Embedder::Bulk(Arc::new(HashingEmbedder::new(128)))
}

async fn knowledge_base(tmp: &TempDir, embedder: Embedder) -> KnowledgeBase {
    let mut config = Config::default();
    config.store.path = tmp.path().join("store");
    config.crawl.min_delay = 0.0;
    config.crawl.max_delay = 0.0;
    let store = SqliteStore::open(
        &config.store.db_file(),
        EmbeddingFunction::new(embedder.clone(), 8),
    )
    .await
    .unwrap();
    KnowledgeBase::new(config, Arc::new(site()), Arc::new(store), embedder)
}

async fn count(kb: &KnowledgeBase, name: &str) -> usize {
    kb.store()
        .get_collection(name)
        .await
        .unwrap()
        .unwrap()
        .count()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_crawl_build_and_query() {
    let tmp = TempDir::new().unwrap();
    let kb = knowledge_base(&tmp, hashing()).await;

    let build = kb
        .crawl_and_create_kb(CrawlKbRequest::new(vec!["https://docs.example.com/".into()]))
        .await
        .unwrap();
    assert!(build.collection.starts_with("crawl_docs_example_com_"));
    assert!(is_valid_name(&build.collection));
    assert_eq!(build.locations.len(), 3);
    assert_eq!(build.chunks, 3);

    let hits = build.retriever.retrieve("mpsc channel").await.unwrap();
    assert_eq!(hits[0].source_location, "https://docs.example.com/channels");

    let hits = kb
        .query(&build.collection, "spawn tasks", Some(2))
        .await
        .unwrap();
    assert_eq!(hits[0].source_location, "https://docs.example.com/spawning");
    assert_eq!(
        hits[0].metadata.get("title").and_then(|v| v.as_str()),
        Some("Spawning")
    );
}

#[tokio::test]
async fn test_rebuild_reuses_collection_without_duplicates() {
    let tmp = TempDir::new().unwrap();
    let kb = knowledge_base(&tmp, hashing()).await;
    let req = CrawlKbRequest::new(vec!["https://docs.example.com/".into()]);

    let first = kb.crawl_and_create_kb(req.clone()).await.unwrap();
    let after_first = count(&kb, &first.collection).await;
    let second = kb.crawl_and_create_kb(req.clone()).await.unwrap();
    assert_eq!(first.collection, second.collection);
    assert_eq!(count(&kb, &second.collection).await, after_first);

    let third = kb
        .crawl_and_create_kb(CrawlKbRequest { reindex: true, ..req })
        .await
        .unwrap();
    assert_eq!(count(&kb, &third.collection).await, after_first);
    assert_eq!(kb.list_collections().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_direct_mode_name_ignores_url_order() {
    let tmp = TempDir::new().unwrap();
    let kb = knowledge_base(&tmp, hashing()).await;
    let a = "https://docs.example.com/spawning".to_string();
    let b = "https://docs.example.com/channels".to_string();

    let first = kb
        .crawl_and_create_kb(CrawlKbRequest {
            crawl: false,
            ..CrawlKbRequest::new(vec![a.clone(), b.clone()])
        })
        .await
        .unwrap();
    let second = kb
        .crawl_and_create_kb(CrawlKbRequest {
            crawl: false,
            ..CrawlKbRequest::new(vec![b, a])
        })
        .await
        .unwrap();
    assert!(first.collection.starts_with("direct_url_list_"));
    assert_eq!(first.collection, second.collection);
    assert_eq!(first.locations.len(), 2);
}

#[tokio::test]
async fn test_keywords_filter_documents_and_name() {
    let tmp = TempDir::new().unwrap();
    let kb = knowledge_base(&tmp, hashing()).await;
    let build = kb
        .crawl_and_create_kb(CrawlKbRequest {
            keywords: vec!["MPSC".into()],
            ..CrawlKbRequest::new(vec!["https://docs.example.com/".into()])
        })
        .await
        .unwrap();
    assert!(build.collection.contains("_keywords_MPSC_"));
    assert_eq!(build.chunks, 1);
}

#[tokio::test]
async fn test_no_matching_documents_is_distinct_error() {
    let tmp = TempDir::new().unwrap();
    let kb = knowledge_base(&tmp, hashing()).await;
    let err = kb
        .crawl_and_create_kb(CrawlKbRequest {
            keywords: vec!["kubernetes".into()],
            ..CrawlKbRequest::new(vec!["https://docs.example.com/".into()])
        })
        .await
        .err()
        .unwrap();
    assert!(matches!(err, KbError::NoDocuments(_)));
    assert!(kb.list_collections().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_no_locations_errors() {
    let tmp = TempDir::new().unwrap();
    let kb = knowledge_base(&tmp, hashing()).await;

    let err = kb
        .crawl_and_create_kb(CrawlKbRequest::new(vec!["  ".into()]))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, KbError::NoLocations(_)));

    let err = kb
        .crawl_and_create_kb(CrawlKbRequest {
            crawl: false,
            url_keyword: Some("nowhere".into()),
            ..CrawlKbRequest::new(vec!["https://docs.example.com/".into()])
        })
        .await
        .err()
        .unwrap();
    match err {
        KbError::NoLocations(msg) => assert!(msg.contains("after filtering")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unreachable_direct_urls_yield_no_documents() {
    let tmp = TempDir::new().unwrap();
    let kb = knowledge_base(&tmp, hashing()).await;
    let err = kb
        .crawl_and_create_kb(CrawlKbRequest {
            crawl: false,
            ..CrawlKbRequest::new(vec!["https://docs.example.com/missing".into()])
        })
        .await
        .err()
        .unwrap();
    assert!(matches!(err, KbError::NoDocuments(_)));
}

#[tokio::test]
async fn test_local_knowledge_base() {
    let tmp = TempDir::new().unwrap();
    let files = tmp.path().join("files");
    fs::create_dir_all(files.join(".git")).unwrap();
    fs::write(
        files.join("alpha.md"),
        "# Alpha\n\nNotes about cargo workspaces and crates.",
    )
    .unwrap();
    fs::write(
        files.join("beta.txt"),
        "Deployment runbook: kubernetes rollout and rollback.",
    )
    .unwrap();
    fs::write(files.join(".git").join("config"), "[core] cargo").unwrap();

    let kb = knowledge_base(&tmp, hashing()).await;
    let build = kb
        .create_knowledge_base(LocalKbRequest {
            paths: vec![files.clone()],
            keywords: Vec::new(),
            reindex: false,
        })
        .await
        .unwrap();
    assert!(build.collection.starts_with("kb_"));
    assert_eq!(build.locations.len(), 2);

    let hits = kb
        .query(&build.collection, "kubernetes rollback", None)
        .await
        .unwrap();
    assert!(hits[0].source_location.ends_with("beta.txt"));

    let again = kb
        .create_knowledge_base(LocalKbRequest {
            paths: vec![files],
            keywords: Vec::new(),
            reindex: true,
        })
        .await
        .unwrap();
    assert_eq!(again.collection, build.collection);
    assert_eq!(count(&kb, &again.collection).await, 2);
}

#[tokio::test]
async fn test_local_without_files() {
    let tmp = TempDir::new().unwrap();
    let empty = tmp.path().join("empty");
    fs::create_dir_all(&empty).unwrap();
    let kb = knowledge_base(&tmp, hashing()).await;
    let err = kb
        .create_knowledge_base(LocalKbRequest {
            paths: vec![empty],
            keywords: Vec::new(),
            reindex: false,
        })
        .await
        .err()
        .unwrap();
    assert!(matches!(err, KbError::NoLocations(_)));
}

#[tokio::test]
async fn test_lexical_only_when_embeddings_disabled() {
    let tmp = TempDir::new().unwrap();
    let kb = knowledge_base(&tmp, Embedder::Disabled).await;
    let build = kb
        .crawl_and_create_kb(CrawlKbRequest::new(vec!["https://docs.example.com/".into()]))
        .await
        .unwrap();
    let hits = kb
        .query(&build.collection, "mpsc channel", None)
        .await
        .unwrap();
    assert_eq!(hits[0].source_location, "https://docs.example.com/channels");
}

#[tokio::test]
async fn test_query_unknown_collection() {
    let tmp = TempDir::new().unwrap();
    let kb = knowledge_base(&tmp, hashing()).await;
    let err = kb.query("nope_12345678", "anything", None).await.unwrap_err();
    assert!(matches!(err, KbError::CollectionNotFound(_)));
}
