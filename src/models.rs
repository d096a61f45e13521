//! Core data models.
//!
//! [`RemoteObject`] is the typed view of a Notion search result. It is
//! converted into a [`PageRecord`] immediately at the client boundary, so
//! nothing downstream of the remote client handles raw JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder title used when the remote has none.
pub const UNTITLED: &str = "Untitled";

/// One page or database in the hierarchy cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub id: String,
    pub title: String,
    /// Containing page or database. `None` is the workspace root.
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub is_database: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    /// Display only; staleness is governed by the cache TTL.
    #[serde(default)]
    pub last_edited: Option<DateTime<Utc>>,
    /// Ancestor titles plus own title, root first. Empty until derived.
    #[serde(default)]
    pub path: Vec<String>,
}

impl PageRecord {
    /// Path joined with `" > "`, falling back to the title before derivation.
    pub fn display_path(&self) -> String {
        if self.path.is_empty() {
            self.title.clone()
        } else {
            self.path.join(" > ")
        }
    }

    /// Zero for roots.
    pub fn depth(&self) -> usize {
        self.path.len().saturating_sub(1)
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

// ============ Remote representation ============

/// A search result from the remote API, discriminated by its `object` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "object", rename_all = "lowercase")]
pub enum RemoteObject {
    Page(RemotePage),
    Database(RemoteDatabase),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemotePage {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub parent: RemoteParent,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub in_trash: bool,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_edited_time: Option<DateTime<Utc>>,
    /// Property map; exactly one property has `"type": "title"`.
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteDatabase {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub parent: RemoteParent,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub in_trash: bool,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_edited_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub title: Vec<RichText>,
}

/// Where a page or database lives.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteParent {
    #[default]
    Workspace,
    PageId {
        page_id: String,
    },
    DatabaseId {
        database_id: String,
    },
    /// Pages nested inside a block; the block itself is never enumerated.
    BlockId {
        block_id: String,
    },
    #[serde(other)]
    Unknown,
}

impl RemoteParent {
    /// The parent identifier, or `None` for the workspace root.
    pub fn id(&self) -> Option<&str> {
        match self {
            RemoteParent::PageId { page_id } => Some(page_id),
            RemoteParent::DatabaseId { database_id } => Some(database_id),
            RemoteParent::BlockId { block_id } => Some(block_id),
            RemoteParent::Workspace | RemoteParent::Unknown => None,
        }
    }
}

/// One rich-text run; only the plain-text rendering is kept.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RichText {
    #[serde(default)]
    pub plain_text: String,
}

/// Concatenate rich-text runs into a trimmed title, `None` if blank.
pub fn plain_text(runs: &[RichText]) -> Option<String> {
    let text: String = runs.iter().map(|r| r.plain_text.as_str()).collect();
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn page_title(properties: &serde_json::Map<String, serde_json::Value>) -> Option<String> {
    properties
        .values()
        .find(|prop| prop.get("type").and_then(|t| t.as_str()) == Some("title"))
        .and_then(|prop| prop.get("title"))
        .and_then(|runs| serde_json::from_value::<Vec<RichText>>(runs.clone()).ok())
        .and_then(|runs| plain_text(&runs))
}

impl RemoteObject {
    pub fn id(&self) -> &str {
        match self {
            RemoteObject::Page(p) => &p.id,
            RemoteObject::Database(d) => &d.id,
        }
    }
}

impl From<RemoteObject> for PageRecord {
    fn from(obj: RemoteObject) -> Self {
        match obj {
            RemoteObject::Page(p) => PageRecord {
                title: page_title(&p.properties).unwrap_or_else(|| UNTITLED.to_string()),
                parent_id: p.parent.id().map(str::to_string),
                archived: p.archived || p.in_trash,
                is_database: false,
                url: p.url,
                created: p.created_time,
                last_edited: p.last_edited_time,
                path: Vec::new(),
                id: p.id,
            },
            RemoteObject::Database(d) => PageRecord {
                title: plain_text(&d.title).unwrap_or_else(|| UNTITLED.to_string()),
                parent_id: d.parent.id().map(str::to_string),
                archived: d.archived || d.in_trash,
                is_database: true,
                url: d.url,
                created: d.created_time,
                last_edited: d.last_edited_time,
                path: Vec::new(),
                id: d.id,
            },
        }
    }
}

/// One listing page from the remote enumeration.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub objects: Vec<RemoteObject>,
    /// Continuation cursor; `None` means the listing is complete.
    pub next_cursor: Option<String>,
}

/// Target container for a newly created page.
#[derive(Debug, Clone, PartialEq)]
pub enum ParentTarget {
    Page(String),
    Database(String),
}

// ============ Search ============

/// A retrieval strategy contributing hits to a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Api,
    TitlePath,
    Content,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strategy::Api => "api",
            Strategy::TitlePath => "title_path",
            Strategy::Content => "content",
        };
        f.write_str(s)
    }
}

/// One matched page for one query.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub page: PageRecord,
    /// Only meaningful relative to other hits of the same query.
    pub score: f64,
    /// Every strategy that produced this page, sorted and deduplicated.
    pub strategies: Vec<Strategy>,
    pub match_reasons: Vec<String>,
    pub preview: Option<String>,
}

impl SearchHit {
    pub fn new(page: PageRecord, score: f64, strategy: Strategy, reason: impl Into<String>) -> Self {
        Self {
            page,
            score,
            strategies: vec![strategy],
            match_reasons: vec![reason.into()],
            preview: None,
        }
    }

    pub fn with_preview(mut self, preview: Option<String>) -> Self {
        self.preview = preview;
        self
    }
}
