//! In-memory [`Workspace`] implementation for tests and offline demos.
//!
//! Objects live in a `Vec` behind `std::sync::RwLock`, in insertion order,
//! which is also the listing order. Listing is paginated with
//! `page_size` objects per page so cursor handling is exercised.
//!
//! Faults can be injected per capability (listing from a given page,
//! keyword search, content for one page or all pages, writes) and call
//! counters expose how often the remote was hit.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::Workspace;
use crate::blocks::{self, ContentBlock};
use crate::error::RemoteError;
use crate::models::{
    ListingPage, PageRecord, ParentTarget, RemoteDatabase, RemoteObject, RemotePage, RemoteParent,
    RichText,
};

struct StoredObject {
    object: RemoteObject,
    content: Vec<ContentBlock>,
}

#[derive(Default)]
struct Faults {
    /// Listing pages with this index or later fail.
    listing_from_page: Option<usize>,
    search: bool,
    all_content: bool,
    content: HashSet<String>,
    slow_content: HashMap<String, Duration>,
    writes: bool,
}

pub struct InMemoryWorkspace {
    objects: RwLock<Vec<StoredObject>>,
    faults: RwLock<Faults>,
    page_size: usize,
    latency: Duration,
    enumerations: AtomicUsize,
    content_fetches: AtomicUsize,
    next_id: AtomicUsize,
}

impl InMemoryWorkspace {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(Vec::new()),
            faults: RwLock::new(Faults::default()),
            page_size: 100,
            latency: Duration::ZERO,
            enumerations: AtomicUsize::new(0),
            content_fetches: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
        }
    }

    /// Objects per listing page (minimum 1).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Delay between reading a listing page and returning it, to widen
    /// race windows in tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn objects(&self) -> RwLockReadGuard<'_, Vec<StoredObject>> {
        self.objects.read().unwrap_or_else(|e| e.into_inner())
    }

    fn objects_mut(&self) -> RwLockWriteGuard<'_, Vec<StoredObject>> {
        self.objects.write().unwrap_or_else(|e| e.into_inner())
    }

    fn faults(&self) -> RwLockReadGuard<'_, Faults> {
        self.faults.read().unwrap_or_else(|e| e.into_inner())
    }

    fn faults_mut(&self) -> RwLockWriteGuard<'_, Faults> {
        self.faults.write().unwrap_or_else(|e| e.into_inner())
    }

    // ============ Seeding ============

    pub fn insert(&self, object: RemoteObject) {
        let mut objects = self.objects_mut();
        objects.retain(|o| o.object.id() != object.id());
        objects.push(StoredObject {
            object,
            content: Vec::new(),
        });
    }

    /// Add a page under another page, or at the workspace root.
    pub fn add_page(&self, id: &str, title: &str, parent: Option<&str>) {
        let parent = match parent {
            Some(p) => RemoteParent::PageId {
                page_id: p.to_string(),
            },
            None => RemoteParent::Workspace,
        };
        self.insert(RemoteObject::Page(new_page(id, title, parent)));
    }

    /// Add a row to a database.
    pub fn add_row(&self, id: &str, title: &str, database_id: &str) {
        let parent = RemoteParent::DatabaseId {
            database_id: database_id.to_string(),
        };
        self.insert(RemoteObject::Page(new_page(id, title, parent)));
    }

    pub fn add_database(&self, id: &str, title: &str, parent: Option<&str>) {
        let parent = match parent {
            Some(p) => RemoteParent::PageId {
                page_id: p.to_string(),
            },
            None => RemoteParent::Workspace,
        };
        self.insert(RemoteObject::Database(RemoteDatabase {
            id: id.to_string(),
            url: Some(page_url(id)),
            parent,
            archived: false,
            in_trash: false,
            created_time: Some(Utc::now()),
            last_edited_time: Some(Utc::now()),
            title: vec![RichText {
                plain_text: title.to_string(),
            }],
        }));
    }

    /// Replace a page's content with blocks parsed from markdown.
    pub fn set_content(&self, id: &str, markdown: &str) {
        if let Some(stored) = self.objects_mut().iter_mut().find(|o| o.object.id() == id) {
            stored.content = blocks::from_markdown(markdown);
        }
    }

    pub fn archive(&self, id: &str) {
        if let Some(stored) = self.objects_mut().iter_mut().find(|o| o.object.id() == id) {
            match &mut stored.object {
                RemoteObject::Page(p) => p.archived = true,
                RemoteObject::Database(d) => d.archived = true,
            }
        }
    }

    // ============ Fault injection ============

    /// Fail listing pages from `page_index` on; `Some(0)` fails every listing.
    pub fn fail_listing_from(&self, page_index: Option<usize>) {
        self.faults_mut().listing_from_page = page_index;
    }

    pub fn fail_search(&self, fail: bool) {
        self.faults_mut().search = fail;
    }

    pub fn fail_all_content(&self, fail: bool) {
        self.faults_mut().all_content = fail;
    }

    pub fn fail_content_for(&self, id: &str) {
        self.faults_mut().content.insert(id.to_string());
    }

    pub fn delay_content_for(&self, id: &str, delay: Duration) {
        self.faults_mut().slow_content.insert(id.to_string(), delay);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.faults_mut().writes = fail;
    }

    // ============ Inspection ============

    /// Number of listings started (calls without a cursor).
    pub fn enumeration_count(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }

    pub fn content_fetch_count(&self) -> usize {
        self.content_fetches.load(Ordering::SeqCst)
    }

    pub fn content_of(&self, id: &str) -> Option<Vec<ContentBlock>> {
        self.objects()
            .iter()
            .find(|o| o.object.id() == id)
            .map(|o| o.content.clone())
    }

    pub fn record(&self, id: &str) -> Option<PageRecord> {
        self.objects()
            .iter()
            .find(|o| o.object.id() == id)
            .map(|o| PageRecord::from(o.object.clone()))
    }
}

impl Default for InMemoryWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

fn page_url(id: &str) -> String {
    format!("https://www.notion.so/{}", id.replace('-', ""))
}

fn new_page(id: &str, title: &str, parent: RemoteParent) -> RemotePage {
    let mut properties = serde_json::Map::new();
    properties.insert(
        "title".to_string(),
        json!({ "type": "title", "title": [{ "plain_text": title }] }),
    );
    RemotePage {
        id: id.to_string(),
        url: Some(page_url(id)),
        parent,
        archived: false,
        in_trash: false,
        created_time: Some(Utc::now()),
        last_edited_time: Some(Utc::now()),
        properties,
    }
}

fn unavailable(what: &str) -> RemoteError {
    RemoteError::new(Some(503), "service_unavailable", format!("{} unavailable", what))
}

fn parse_cursor(cursor: Option<&str>) -> Result<usize, RemoteError> {
    match cursor {
        None => Ok(0),
        Some(c) => c
            .strip_prefix("offset-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| RemoteError::new(Some(400), "validation_error", "invalid start_cursor")),
    }
}

#[async_trait]
impl Workspace for InMemoryWorkspace {
    async fn list_pages(&self, cursor: Option<&str>) -> Result<ListingPage, RemoteError> {
        if cursor.is_none() {
            self.enumerations.fetch_add(1, Ordering::SeqCst);
        }

        let offset = parse_cursor(cursor)?;
        let page_index = offset / self.page_size;
        if self
            .faults()
            .listing_from_page
            .is_some_and(|from| page_index >= from)
        {
            return Err(unavailable("listing"));
        }

        // The page reflects the workspace at request time; latency delays the response.
        let (page, next_cursor) = {
            let objects = self.objects();
            let end = (offset + self.page_size).min(objects.len());
            let page: Vec<RemoteObject> = objects
                .get(offset..end)
                .unwrap_or_default()
                .iter()
                .map(|o| o.object.clone())
                .collect();
            let next_cursor = if end < objects.len() {
                Some(format!("offset-{}", end))
            } else {
                None
            };
            (page, next_cursor)
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        Ok(ListingPage {
            objects: page,
            next_cursor,
        })
    }

    async fn get_content(&self, page_id: &str) -> Result<Vec<ContentBlock>, RemoteError> {
        self.content_fetches.fetch_add(1, Ordering::SeqCst);

        let delay = {
            let faults = self.faults();
            if faults.all_content || faults.content.contains(page_id) {
                return Err(unavailable("content"));
            }
            faults.slow_content.get(page_id).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.content_of(page_id)
            .ok_or_else(|| RemoteError::not_found(format!("page {} not found", page_id)))
    }

    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RemoteObject>, RemoteError> {
        if self.faults().search {
            return Err(unavailable("search"));
        }

        let needle = query.trim().to_lowercase();
        Ok(self
            .objects()
            .iter()
            .filter(|o| {
                let record = PageRecord::from(o.object.clone());
                !record.archived && record.title.to_lowercase().contains(&needle)
            })
            .take(limit)
            .map(|o| o.object.clone())
            .collect())
    }

    async fn create_page(
        &self,
        parent: &ParentTarget,
        title: &str,
        blocks: &[ContentBlock],
    ) -> Result<String, RemoteError> {
        if self.faults().writes {
            return Err(RemoteError::new(Some(400), "validation_error", "write rejected"));
        }

        let (parent_id, remote_parent) = match parent {
            ParentTarget::Page(id) => (
                id,
                RemoteParent::PageId {
                    page_id: id.clone(),
                },
            ),
            ParentTarget::Database(id) => (
                id,
                RemoteParent::DatabaseId {
                    database_id: id.clone(),
                },
            ),
        };
        if self.record(parent_id).is_none() {
            return Err(RemoteError::not_found(format!("parent {} not found", parent_id)));
        }

        let id = format!("page-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.objects_mut().push(StoredObject {
            object: RemoteObject::Page(new_page(&id, title, remote_parent)),
            content: blocks.to_vec(),
        });
        Ok(id)
    }

    async fn update_page(
        &self,
        page_id: &str,
        title: Option<&str>,
        blocks: &[ContentBlock],
    ) -> Result<String, RemoteError> {
        if self.faults().writes {
            return Err(RemoteError::new(Some(400), "validation_error", "write rejected"));
        }

        let mut objects = self.objects_mut();
        let stored = objects
            .iter_mut()
            .find(|o| o.object.id() == page_id)
            .ok_or_else(|| RemoteError::not_found(format!("page {} not found", page_id)))?;

        if let Some(title) = title {
            match &mut stored.object {
                RemoteObject::Page(p) => {
                    p.properties.insert(
                        "title".to_string(),
                        json!({ "type": "title", "title": [{ "plain_text": title }] }),
                    );
                }
                RemoteObject::Database(d) => {
                    d.title = vec![RichText {
                        plain_text: title.to_string(),
                    }];
                }
            }
        }
        stored.content.extend_from_slice(blocks);
        Ok(page_id.to_string())
    }
}
