//! Remote workspace abstraction.
//!
//! The [`Workspace`] trait is everything the cache, search engine and tools
//! need from the remote service. Two implementations ship with the crate:
//!
//! | Implementation | Purpose |
//! |----------------|---------|
//! | [`notion::NotionClient`] | Notion REST API over reqwest |
//! | [`memory::InMemoryWorkspace`] | Scriptable fake for tests and demos |
//!
//! Implementations must be `Send + Sync`; one instance is shared behind an
//! `Arc` by every concurrent tool invocation.

pub mod memory;
pub mod notion;

use async_trait::async_trait;

use crate::blocks::ContentBlock;
use crate::error::RemoteError;
use crate::models::{ListingPage, ParentTarget, RemoteObject};

pub use memory::InMemoryWorkspace;
pub use notion::NotionClient;

/// Remote capabilities consumed by the harness.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`list_pages`](Workspace::list_pages) | One page of the full page/database enumeration |
/// | [`get_content`](Workspace::get_content) | All content blocks of one page |
/// | [`keyword_search`](Workspace::keyword_search) | Remote ranked keyword search |
/// | [`create_page`](Workspace::create_page) | Create a page under a page or database |
/// | [`update_page`](Workspace::update_page) | Rename a page and append blocks |
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Fetch one listing page. Pass the previous page's `next_cursor` to
    /// continue; `None` starts a new enumeration.
    async fn list_pages(&self, cursor: Option<&str>) -> Result<ListingPage, RemoteError>;

    async fn get_content(&self, page_id: &str) -> Result<Vec<ContentBlock>, RemoteError>;

    /// Remote relevance order, best first, at most `limit` objects.
    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RemoteObject>, RemoteError>;

    /// Returns the new page's id.
    async fn create_page(
        &self,
        parent: &ParentTarget,
        title: &str,
        blocks: &[ContentBlock],
    ) -> Result<String, RemoteError>;

    /// Rename (when `title` is set) and append `blocks`. Returns the page id.
    async fn update_page(
        &self,
        page_id: &str,
        title: Option<&str>,
        blocks: &[ContentBlock],
    ) -> Result<String, RemoteError>;
}
