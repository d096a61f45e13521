//! Multi-strategy search engine.
//!
//! Combines three independent retrieval strategies into one ranked list:
//!
//! | Strategy | Source | Runs when |
//! |----------|--------|-----------|
//! | `Api` | remote keyword search | always |
//! | `TitlePath` | cached titles and derived paths | enhanced search, cache available |
//! | `Content` | fetched page bodies | enhanced search and [`should_search_content`] |
//!
//! The remote keyword search and the cache lookup run concurrently. The
//! content strategy then scans a bounded candidate set: pages already hit
//! by the other strategies first, then the rest of the cache, up to
//! `content_candidate_cap`. Fetches run under a semaphore
//! (`content_concurrency`), share one [`RateLimiter`] and each have a
//! timeout. Hit lists are combined by [`merge_hits`].
//!
//! A failing strategy is logged and skipped. Only when every attempted
//! strategy fails does `search` return
//! [`HarnessError::NoStrategyAvailable`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::blocks;
use crate::cache::PageCache;
use crate::classify::should_search_content;
use crate::config::SearchConfig;
use crate::error::{HarnessError, RemoteError};
use crate::hierarchy::HierarchySnapshot;
use crate::models::{PageRecord, SearchHit, Strategy};
use crate::remote::Workspace;
use crate::scoring::{merge_hits, preview, ScoringPolicy};

/// Spaces out request starts by at least `interval`, across all callers.
pub struct RateLimiter {
    interval: Duration,
    next: tokio::sync::Mutex<tokio::time::Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: tokio::sync::Mutex::new(tokio::time::Instant::now()),
        }
    }

    /// Wait for the next free slot and reserve the one after it.
    pub async fn acquire(&self) {
        let mut next = self.next.lock().await;
        let now = tokio::time::Instant::now();
        if *next > now {
            tokio::time::sleep_until(*next).await;
        }
        *next = (*next).max(now) + self.interval;
    }
}

pub struct SearchEngine {
    workspace: Arc<dyn Workspace>,
    cache: Arc<PageCache>,
    config: SearchConfig,
    policy: ScoringPolicy,
    limiter: Arc<RateLimiter>,
}

impl SearchEngine {
    pub fn new(
        workspace: Arc<dyn Workspace>,
        cache: Arc<PageCache>,
        config: SearchConfig,
        policy: ScoringPolicy,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(config.rate_limit_ms)));
        Self {
            workspace,
            cache,
            config,
            policy,
            limiter,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Ranked search over the workspace.
    ///
    /// With `use_enhanced` false only the remote keyword search runs and its
    /// failure is [`HarnessError::NoStrategyAvailable`]. An empty query
    /// returns no hits without touching the remote.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        use_enhanced: bool,
    ) -> Result<Vec<SearchHit>, HarnessError> {
        let query = query.trim();
        if query.is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }
        let cap = self.policy.combined_score_cap;
        let start = Instant::now();

        if !use_enhanced {
            return match self.api_strategy(query).await {
                Ok(hits) => Ok(merge_hits(vec![hits], cap, max_results)),
                Err(e) => {
                    tracing::warn!(strategy = "api", error = %e, "keyword search failed");
                    Err(HarnessError::NoStrategyAvailable(query.to_string()))
                }
            };
        }

        let (api, snapshot) = tokio::join!(self.api_strategy(query), self.cache.get_or_refresh());

        let snapshot = match snapshot {
            Ok(snap) => Some(snap),
            Err(e) => {
                tracing::warn!(strategy = "title_path", error = %e, "hierarchy cache unavailable");
                None
            }
        };

        let api_ok = api.is_ok();
        let mut api_hits = api.unwrap_or_else(|e| {
            tracing::warn!(strategy = "api", error = %e, "keyword search failed");
            Vec::new()
        });
        if let Some(snap) = &snapshot {
            for hit in &mut api_hits {
                if let Some(full) = snap.get(&hit.page.id) {
                    hit.page = full.clone();
                }
            }
        }

        let title_hits = snapshot
            .as_deref()
            .map(|snap| self.title_path_strategy(query, snap))
            .unwrap_or_default();

        let mut content_ran = false;
        let mut content_hits = Vec::new();
        if should_search_content(query) {
            let candidates = self.content_candidates(&api_hits, &title_hits, snapshot.as_deref());
            if !candidates.is_empty() {
                let (hits, fetched) = self.content_strategy(query, candidates).await;
                content_ran = fetched > 0;
                content_hits = hits;
            }
        }

        if !api_ok && snapshot.is_none() && !content_ran {
            return Err(HarnessError::NoStrategyAvailable(query.to_string()));
        }

        tracing::debug!(
            api = api_hits.len(),
            title_path = title_hits.len(),
            content = content_hits.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "search strategies finished"
        );

        Ok(merge_hits(
            vec![api_hits, title_hits, content_hits],
            cap,
            max_results,
        ))
    }

    async fn api_strategy(&self, query: &str) -> Result<Vec<SearchHit>, RemoteError> {
        let objects = self
            .workspace
            .keyword_search(query, self.config.api_result_limit)
            .await?;
        Ok(objects
            .into_iter()
            .map(PageRecord::from)
            .filter(|record| !record.archived)
            .enumerate()
            .map(|(rank, record)| {
                let score = self.policy.api_rank_score(rank);
                SearchHit::new(record, score, Strategy::Api, format!("keyword search rank {}", rank + 1))
            })
            .collect())
    }

    fn title_path_strategy(&self, query: &str, snapshot: &HierarchySnapshot) -> Vec<SearchHit> {
        snapshot
            .records()
            .filter(|record| !record.archived)
            .filter_map(|record| {
                self.policy
                    .title_path_score(query, record)
                    .map(|(score, reason)| SearchHit::new(record.clone(), score, Strategy::TitlePath, reason))
            })
            .collect()
    }

    /// Already-hit pages by provisional score, then the rest of the cache.
    fn content_candidates(
        &self,
        api_hits: &[SearchHit],
        title_hits: &[SearchHit],
        snapshot: Option<&HierarchySnapshot>,
    ) -> Vec<PageRecord> {
        let limit = self.config.content_candidate_cap;
        let provisional = merge_hits(
            vec![api_hits.to_vec(), title_hits.to_vec()],
            self.policy.combined_score_cap,
            usize::MAX,
        );

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let rest = snapshot.into_iter().flat_map(|snap| snap.records());
        for record in provisional.iter().map(|h| &h.page).chain(rest) {
            if candidates.len() >= limit {
                break;
            }
            if record.archived || record.is_database || !seen.insert(record.id.clone()) {
                continue;
            }
            candidates.push(record.clone());
        }
        candidates
    }

    /// Fetch and score candidates. Returns the hits and the number of
    /// successful fetches.
    async fn content_strategy(&self, query: &str, candidates: Vec<PageRecord>) -> (Vec<SearchHit>, usize) {
        let semaphore = Arc::new(Semaphore::new(self.config.content_concurrency));
        let timeout = Duration::from_secs(self.config.fetch_timeout_secs);
        let mut tasks = JoinSet::new();

        for record in candidates {
            let semaphore = semaphore.clone();
            let limiter = self.limiter.clone();
            let workspace = self.workspace.clone();
            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (record, Err("fetch pool closed".to_string())),
                };
                limiter.acquire().await;
                let fetched = match tokio::time::timeout(timeout, workspace.get_content(&record.id)).await {
                    Ok(Ok(content)) => Ok(blocks::to_plain_text(&content)),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
                };
                (record, fetched)
            });
        }

        let mut hits = Vec::new();
        let mut fetched_ok = 0usize;
        while let Some(joined) = tasks.join_next().await {
            let (record, fetched) = match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(strategy = "content", error = %e, "content task failed");
                    continue;
                }
            };
            let text = match fetched {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(strategy = "content", page_id = %record.id, error = %e, "skipping page content");
                    continue;
                }
            };
            fetched_ok += 1;

            if let Some(found) = self.policy.content_score(query, &text) {
                let excerpt = preview(&text, query, self.config.preview_chars);
                hits.push(
                    SearchHit::new(record, found.score, Strategy::Content, found.reason()).with_preview(excerpt),
                );
            }
        }

        (hits, fetched_ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::remote::InMemoryWorkspace;

    fn engine_with(ws: Arc<InMemoryWorkspace>, dir: &tempfile::TempDir, config: SearchConfig) -> SearchEngine {
        let cache = Arc::new(PageCache::new(
            ws.clone(),
            CacheConfig {
                path: dir.path().join("cache.json"),
                ttl_secs: 3600,
            },
        ));
        SearchEngine::new(ws, cache, config, ScoringPolicy::default())
    }

    fn fast_config() -> SearchConfig {
        SearchConfig {
            rate_limit_ms: 0,
            ..SearchConfig::default()
        }
    }

    fn credentials_workspace() -> Arc<InMemoryWorkspace> {
        let ws = InMemoryWorkspace::new();
        ws.add_page("eng", "Engineering", None);
        ws.add_page("creds", "Acappella DB Credentials", Some("eng"));
        ws.set_content(
            "creds",
            "Connection details for the acappella database.\n\nThe password is rotated monthly.",
        );
        ws.add_page("unrelated", "Unrelated Notes", None);
        ws.set_content("unrelated", "Lunch options and parking.");
        Arc::new(ws)
    }

    #[tokio::test]
    async fn test_credentials_ranked_first_without_remote_hits() {
        let dir = tempfile::TempDir::new().unwrap();
        let ws = credentials_workspace();
        let engine = engine_with(ws, &dir, fast_config());

        let hits = engine
            .search("acappella database password", 5, true)
            .await
            .unwrap();
        assert_eq!(hits[0].page.title, "Acappella DB Credentials");
        assert!(hits[0].strategies.contains(&Strategy::TitlePath));
        assert!(hits[0].strategies.contains(&Strategy::Content));
        assert!(hits[0].preview.as_deref().unwrap().contains("acappella database"));
        if let Some(pos) = hits.iter().position(|h| h.page.title == "Unrelated Notes") {
            assert!(pos > 0);
        }
    }

    #[tokio::test]
    async fn test_api_only_mode() {
        let dir = tempfile::TempDir::new().unwrap();
        let ws = credentials_workspace();
        let engine = engine_with(ws.clone(), &dir, fast_config());

        let hits = engine.search("notes", 10, false).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].strategies, vec![Strategy::Api]);
        assert_eq!(ws.enumeration_count(), 0);
    }

    #[tokio::test]
    async fn test_api_only_failure_is_no_strategy() {
        let dir = tempfile::TempDir::new().unwrap();
        let ws = credentials_workspace();
        ws.fail_search(true);
        let engine = engine_with(ws, &dir, fast_config());
        let err = engine.search("notes", 10, false).await.unwrap_err();
        assert_eq!(err.kind(), "no_strategy_available");
    }

    #[tokio::test]
    async fn test_api_failure_degrades_to_cache() {
        let dir = tempfile::TempDir::new().unwrap();
        let ws = credentials_workspace();
        ws.fail_search(true);
        let engine = engine_with(ws, &dir, fast_config());
        let hits = engine.search("unrelated notes", 10, true).await.unwrap();
        assert_eq!(hits[0].page.id, "unrelated");
        assert_eq!(hits[0].strategies, vec![Strategy::TitlePath]);
    }

    #[tokio::test]
    async fn test_all_strategies_failing() {
        let dir = tempfile::TempDir::new().unwrap();
        let ws = credentials_workspace();
        ws.fail_search(true);
        ws.fail_listing_from(Some(0));
        let engine = engine_with(ws, &dir, fast_config());
        let err = engine
            .search("acappella database password", 5, true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "no_strategy_available");
    }

    #[tokio::test]
    async fn test_cache_failure_uses_api_hits() {
        let dir = tempfile::TempDir::new().unwrap();
        let ws = credentials_workspace();
        ws.fail_listing_from(Some(0));
        let engine = engine_with(ws, &dir, fast_config());
        let hits = engine.search("Acappella", 5, true).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].strategies, vec![Strategy::Api]);
    }

    #[tokio::test]
    async fn test_api_hits_carry_cached_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let ws = credentials_workspace();
        let engine = engine_with(ws, &dir, fast_config());
        let hits = engine.search("credentials", 5, true).await.unwrap();
        assert_eq!(hits[0].page.display_path(), "Engineering > Acappella DB Credentials");
        assert!(hits[0].strategies.contains(&Strategy::Api));
    }

    #[tokio::test]
    async fn test_failed_content_fetch_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let ws = credentials_workspace();
        ws.fail_content_for("creds");
        let engine = engine_with(ws, &dir, fast_config());
        let hits = engine
            .search("acappella database password", 5, true)
            .await
            .unwrap();
        assert_eq!(hits[0].page.id, "creds");
        assert!(!hits[0].strategies.contains(&Strategy::Content));
    }

    #[tokio::test]
    async fn test_content_candidates_capped() {
        let dir = tempfile::TempDir::new().unwrap();
        let ws = InMemoryWorkspace::new();
        for i in 0..10 {
            ws.add_page(&format!("p{}", i), &format!("Page {}", i), None);
            ws.set_content(&format!("p{}", i), "setup steps");
        }
        let ws = Arc::new(ws);
        let config = SearchConfig {
            content_candidate_cap: 3,
            ..fast_config()
        };
        let engine = engine_with(ws.clone(), &dir, config);
        let hits = engine.search("setup", 10, true).await.unwrap();
        assert_eq!(ws.content_fetch_count(), 3);
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_slow_fetch_times_out() {
        let dir = tempfile::TempDir::new().unwrap();
        let ws = credentials_workspace();
        ws.delay_content_for("creds", Duration::from_secs(5));
        let config = SearchConfig {
            fetch_timeout_secs: 1,
            ..fast_config()
        };
        let engine = engine_with(ws, &dir, config);
        let started = Instant::now();
        let hits = engine
            .search("acappella database password", 5, true)
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!hits[0].strategies.contains(&Strategy::Content));
    }

    #[tokio::test]
    async fn test_empty_query_skips_remote() {
        let dir = tempfile::TempDir::new().unwrap();
        let ws = credentials_workspace();
        let engine = engine_with(ws.clone(), &dir, fast_config());
        assert!(engine.search("   ", 5, true).await.unwrap().is_empty());
        assert_eq!(ws.enumeration_count(), 0);
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_starts() {
        let start = Instant::now();
        let limiter = RateLimiter::new(Duration::from_millis(30));
        for _ in 0..4 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(90));
    }
}
