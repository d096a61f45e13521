//! End-to-end behavior through the public API against the in-memory
//! workspace.

use std::sync::Arc;
use std::time::Duration;

use notion_harness::cache::PageCache;
use notion_harness::config::{CacheConfig, SearchConfig};
use notion_harness::remote::InMemoryWorkspace;
use notion_harness::scoring::ScoringPolicy;
use notion_harness::search::SearchEngine;
use tempfile::TempDir;

fn cache_config(dir: &TempDir) -> CacheConfig {
    CacheConfig {
        path: dir.path().join("page_cache.json"),
        ttl_secs: 3600,
    }
}

fn engine(ws: Arc<InMemoryWorkspace>, dir: &TempDir) -> SearchEngine {
    let cache = Arc::new(PageCache::new(ws.clone(), cache_config(dir)));
    let config = SearchConfig {
        rate_limit_ms: 0,
        ..SearchConfig::default()
    };
    SearchEngine::new(ws, cache, config, ScoringPolicy::default())
}

fn projects_workspace() -> InMemoryWorkspace {
    let ws = InMemoryWorkspace::new().with_page_size(2);
    ws.add_page("projects", "Projects", None);
    ws.add_page("q4", "Q4 Planning", Some("projects"));
    ws.add_page("notes", "Meeting Notes", Some("q4"));
    ws.add_page("eng", "Engineering", None);
    ws.add_page("acappella", "Acappella DB Credentials", Some("eng"));
    ws.set_content("acappella", "Host: db.internal\nUser: acappella_app");
    ws.add_page("unrelated", "Unrelated Notes", Some("eng"));
    ws.set_content("unrelated", "Lunch order for Friday");
    ws
}

#[tokio::test]
async fn find_by_path_walks_segments() {
    let dir = TempDir::new().unwrap();
    let ws = Arc::new(projects_workspace());
    let cache = PageCache::new(ws.clone(), cache_config(&dir));

    let segments: Vec<String> = ["Projects", "Q4 Planning", "Meeting Notes"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let record = cache.find_by_path(&segments).await.unwrap().unwrap();
    assert_eq!(record.id, "notes");
    assert_eq!(record.display_path(), "Projects > Q4 Planning > Meeting Notes");
    assert_eq!(ws.enumeration_count(), 1);
}

#[tokio::test]
async fn title_match_surfaces_page_without_keyword_hits() {
    let dir = TempDir::new().unwrap();
    let ws = Arc::new(projects_workspace());
    let engine = engine(ws.clone(), &dir);

    let hits = engine
        .search("acappella database password", 5, true)
        .await
        .unwrap();
    assert_eq!(hits[0].page.id, "acappella");
    let unrelated = hits.iter().position(|h| h.page.id == "unrelated");
    assert!(unrelated.map_or(true, |i| i > 0));
}

#[tokio::test]
async fn one_failing_strategy_still_returns_results() {
    let dir = TempDir::new().unwrap();
    let ws = Arc::new(projects_workspace());
    ws.fail_search(true);
    let engine = engine(ws.clone(), &dir);

    let hits = engine.search("planning", 5, true).await.unwrap();
    assert_eq!(hits[0].page.id, "q4");
}

#[tokio::test]
async fn all_strategies_failing_is_an_error() {
    let dir = TempDir::new().unwrap();
    let ws = Arc::new(projects_workspace());
    ws.fail_search(true);
    ws.fail_listing_from(Some(0));
    ws.fail_all_content(true);
    let engine = engine(ws.clone(), &dir);

    let err = engine
        .search("acappella database password", 5, true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "no_strategy_available");
}

#[tokio::test]
async fn persisted_cache_survives_restart() {
    let dir = TempDir::new().unwrap();
    let ws = Arc::new(projects_workspace());
    let before = {
        let cache = PageCache::new(ws.clone(), cache_config(&dir));
        cache.force_refresh().await.unwrap();
        cache.find_by_title("notes", true).await.unwrap()
    };

    // The restarted process cannot reach the remote; the file must suffice.
    let offline = Arc::new(projects_workspace());
    offline.fail_listing_from(Some(0));
    let cache = PageCache::new(offline.clone(), cache_config(&dir));
    assert!(cache.load_persisted());
    let after = cache.find_by_title("notes", true).await.unwrap();

    assert_eq!(before, after);
    assert_eq!(offline.enumeration_count(), 0);
}

#[tokio::test]
async fn concurrent_readers_share_one_rebuild() {
    let dir = TempDir::new().unwrap();
    let ws = Arc::new(projects_workspace().with_latency(Duration::from_millis(20)));
    let cache = Arc::new(PageCache::new(ws.clone(), cache_config(&dir)));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move { cache.get_or_refresh().await.map(|s| s.len()) }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 6);
    }
    assert_eq!(ws.enumeration_count(), 1);
}
