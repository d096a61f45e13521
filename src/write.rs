//! Page creation and update.
//!
//! Markdown is converted to blocks with [`blocks::from_markdown`]. Every
//! successful write is followed by a forced cache refresh so the new or
//! renamed page is immediately findable.

use serde::Serialize;

use crate::blocks;
use crate::cache::PageCache;
use crate::error::HarnessError;
use crate::models::{ParentTarget, UNTITLED};
use crate::remote::Workspace;

#[derive(Debug, Clone, Default)]
pub struct WriteRequest {
    /// Container for a new page. Ignored when `page_id` is set.
    pub parent_id: Option<String>,
    /// Existing page to rename and append to.
    pub page_id: Option<String>,
    pub title: Option<String>,
    pub markdown_content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub page_id: String,
    pub created: bool,
    pub blocks_written: usize,
    /// False when the follow-up cache refresh failed.
    pub cache_refreshed: bool,
}

pub async fn write_page(
    workspace: &dyn Workspace,
    cache: &PageCache,
    request: &WriteRequest,
) -> Result<WriteOutcome, HarnessError> {
    let content = blocks::from_markdown(&request.markdown_content);
    let title = request
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let (page_id, created) = match (non_blank(&request.page_id), non_blank(&request.parent_id)) {
        (Some(page_id), _) => {
            let id = workspace
                .update_page(page_id, title, &content)
                .await
                .map_err(|e| HarnessError::WriteFailed(format!("update of {} rejected: {}", page_id, e)))?;
            (id, false)
        }
        (None, Some(parent_id)) => {
            let parent = resolve_parent(cache, parent_id).await;
            let id = workspace
                .create_page(&parent, title.unwrap_or(UNTITLED), &content)
                .await
                .map_err(|e| HarnessError::WriteFailed(format!("create under {} rejected: {}", parent_id, e)))?;
            (id, true)
        }
        (None, None) => {
            return Err(HarnessError::WriteFailed(
                "either page_id (to update) or parent_id (to create) is required".to_string(),
            ))
        }
    };

    tracing::info!(page_id = %page_id, created, blocks = content.len(), "write succeeded");

    let cache_refreshed = match cache.force_refresh().await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(page_id = %page_id, error = %e, "cache refresh after write failed");
            false
        }
    };

    Ok(WriteOutcome {
        page_id,
        created,
        blocks_written: content.len(),
        cache_refreshed,
    })
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Databases need a different parent payload; the cache knows which is which.
/// Unknown parents are assumed to be pages.
async fn resolve_parent(cache: &PageCache, parent_id: &str) -> ParentTarget {
    match cache.get(parent_id).await {
        Ok(Some(record)) if record.is_database => ParentTarget::Database(parent_id.to_string()),
        Ok(_) => ParentTarget::Page(parent_id.to_string()),
        Err(e) => {
            tracing::warn!(parent_id, error = %e, "cache unavailable, assuming page parent");
            ParentTarget::Page(parent_id.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::remote::InMemoryWorkspace;
    use std::sync::Arc;

    fn setup(dir: &tempfile::TempDir) -> (Arc<InMemoryWorkspace>, PageCache) {
        let ws = InMemoryWorkspace::new();
        ws.add_page("root", "Projects", None);
        ws.add_database("tasks", "Tasks", Some("root"));
        let ws = Arc::new(ws);
        let cache = PageCache::new(
            ws.clone(),
            CacheConfig {
                path: dir.path().join("cache.json"),
                ttl_secs: 3600,
            },
        );
        (ws, cache)
    }

    #[tokio::test]
    async fn test_create_refreshes_cache() {
        let dir = tempfile::TempDir::new().unwrap();
        let (ws, cache) = setup(&dir);
        cache.get_or_refresh().await.unwrap();

        let outcome = write_page(
            ws.as_ref(),
            &cache,
            &WriteRequest {
                parent_id: Some("root".into()),
                title: Some("Retro".into()),
                markdown_content: "## Wins\n- shipped".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.blocks_written, 2);
        assert!(outcome.cache_refreshed);
        assert_eq!(ws.enumeration_count(), 2);
        let snap = cache.current().unwrap();
        assert_eq!(snap.get(&outcome.page_id).unwrap().display_path(), "Projects > Retro");
    }

    #[tokio::test]
    async fn test_create_in_database_and_default_title() {
        let dir = tempfile::TempDir::new().unwrap();
        let (ws, cache) = setup(&dir);
        let outcome = write_page(
            ws.as_ref(),
            &cache,
            &WriteRequest {
                parent_id: Some("tasks".into()),
                markdown_content: "todo".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let record = ws.record(&outcome.page_id).unwrap();
        assert_eq!(record.title, UNTITLED);
        assert_eq!(record.parent_id.as_deref(), Some("tasks"));
    }

    #[tokio::test]
    async fn test_update_renames_and_appends() {
        let dir = tempfile::TempDir::new().unwrap();
        let (ws, cache) = setup(&dir);
        ws.set_content("root", "existing");
        let outcome = write_page(
            ws.as_ref(),
            &cache,
            &WriteRequest {
                page_id: Some("root".into()),
                title: Some("All Projects".into()),
                markdown_content: "> appended".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(!outcome.created);
        assert_eq!(ws.record("root").unwrap().title, "All Projects");
        assert_eq!(ws.content_of("root").unwrap().len(), 2);
        assert_eq!(
            cache.find_by_title("all projects", false).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_rejected_write_surfaces() {
        let dir = tempfile::TempDir::new().unwrap();
        let (ws, cache) = setup(&dir);
        ws.fail_writes(true);
        let err = write_page(
            ws.as_ref(),
            &cache,
            &WriteRequest {
                page_id: Some("root".into()),
                markdown_content: "x".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "write_failed");
        assert_eq!(ws.enumeration_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_ids() {
        let dir = tempfile::TempDir::new().unwrap();
        let (ws, cache) = setup(&dir);
        let err = write_page(ws.as_ref(), &cache, &WriteRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "write_failed");
        assert!(err.to_string().contains("parent_id"));
    }
}
