//! Notion REST client.
//!
//! Implements [`Workspace`] over the public Notion API with reqwest.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | listing | `POST /search` with `page_size` and `start_cursor` |
//! | keyword search | `POST /search` with `query` |
//! | content | `GET /blocks/{id}/children`, followed to the last cursor |
//! | create | `POST /pages`, overflow appended via `PATCH /blocks/{id}/children` |
//! | update | `PATCH /pages/{id}` then `PATCH /blocks/{id}/children` |
//! | database title property | `GET /databases/{id}` |
//!
//! # Retry Strategy
//!
//! Every request uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Other HTTP 4xx → fail immediately
//! - Network errors and timeouts → retry
//!
//! Delays are 1s, 2s, 4s, ... capped at 32s, for up to `max_retries`
//! retries after the first attempt.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::Workspace;
use crate::blocks::{self, ContentBlock};
use crate::config::NotionConfig;
use crate::error::RemoteError;
use crate::models::{ListingPage, ParentTarget, RemoteObject};

/// Largest page size the API accepts.
const PAGE_SIZE: usize = 100;
/// Maximum children per create or append request.
const CHILDREN_PER_REQUEST: usize = 100;

pub struct NotionClient {
    http: reqwest::Client,
    api_base: String,
    api_version: String,
    token: String,
    max_retries: u32,
}

/// Envelope shared by every paginated list response.
#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

impl ListResponse {
    fn cursor(&self) -> Option<String> {
        if self.has_more {
            self.next_cursor.clone()
        } else {
            None
        }
    }
}

/// Error object returned by the API on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl NotionClient {
    pub fn new(config: &NotionConfig, token: String) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RemoteError::network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            token,
            max_retries: config.max_retries,
        })
    }

    /// Send one request with retry/backoff and decode the JSON body.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, RemoteError> {
        let url = format!("{}{}", self.api_base, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(%url, attempt, delay_secs = delay.as_secs(), "retrying request");
                tokio::time::sleep(delay).await;
            }

            let mut builder = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.token)
                .header("Notion-Version", &self.api_version);
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let err = match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<Value>()
                            .await
                            .map_err(|e| RemoteError::decode(e.to_string()));
                    }
                    let text = response.text().await.unwrap_or_default();
                    error_from_body(status.as_u16(), &text)
                }
                Err(e) if e.is_timeout() => RemoteError::timeout(e.to_string()),
                Err(e) => RemoteError::network(e.to_string()),
            };

            if !err.is_retryable() {
                return Err(err);
            }
            tracing::warn!(%url, attempt, error = %err, "transient remote error");
            last_err = Some(err);
        }

        Err(last_err.unwrap_or_else(|| RemoteError::network("request failed after retries")))
    }

    async fn search_page(&self, body: Value) -> Result<(Vec<RemoteObject>, Option<String>), RemoteError> {
        let raw = self.request(Method::POST, "/search", Some(&body)).await?;
        let listing: ListResponse =
            serde_json::from_value(raw).map_err(|e| RemoteError::decode(e.to_string()))?;
        let cursor = listing.cursor();
        Ok((parse_objects(listing.results), cursor))
    }

    /// Append blocks to a page in request-sized chunks.
    async fn append_blocks(&self, page_id: &str, blocks: &[ContentBlock]) -> Result<(), RemoteError> {
        for chunk in blocks.chunks(CHILDREN_PER_REQUEST) {
            let children: Vec<Value> = chunk.iter().map(ContentBlock::to_json).collect();
            self.request(
                Method::PATCH,
                &format!("/blocks/{}/children", page_id),
                Some(&json!({ "children": children })),
            )
            .await?;
        }
        Ok(())
    }

    /// Name of the title property on a database or database row.
    async fn title_property_name(&self, path: &str) -> Result<String, RemoteError> {
        let object = self.request(Method::GET, path, None).await?;
        Ok(object
            .get("properties")
            .and_then(|props| props.as_object())
            .and_then(|props| {
                props
                    .iter()
                    .find(|(_, prop)| prop.get("type").and_then(|t| t.as_str()) == Some("title"))
                    .map(|(name, _)| name.clone())
            })
            .unwrap_or_else(|| "title".to_string()))
    }
}

fn error_from_body(status: u16, text: &str) -> RemoteError {
    match serde_json::from_str::<ApiErrorBody>(text) {
        Ok(body) if !body.code.is_empty() => RemoteError::new(Some(status), body.code, body.message),
        _ => RemoteError::new(Some(status), "http_error", text.chars().take(500).collect::<String>()),
    }
}

/// Parse results one by one; an unparseable result is logged and skipped.
fn parse_objects(results: Vec<Value>) -> Vec<RemoteObject> {
    results
        .into_iter()
        .filter_map(|value| {
            let id = value.get("id").and_then(|v| v.as_str()).unwrap_or("?").to_string();
            match serde_json::from_value::<RemoteObject>(value) {
                Ok(obj) => Some(obj),
                Err(e) => {
                    tracing::warn!(page_id = %id, error = %e, "skipping unparseable search result");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl Workspace for NotionClient {
    async fn list_pages(&self, cursor: Option<&str>) -> Result<ListingPage, RemoteError> {
        let mut body = json!({ "page_size": PAGE_SIZE });
        if let Some(cursor) = cursor {
            body["start_cursor"] = json!(cursor);
        }
        let (objects, next_cursor) = self.search_page(body).await?;
        Ok(ListingPage {
            objects,
            next_cursor,
        })
    }

    async fn get_content(&self, page_id: &str) -> Result<Vec<ContentBlock>, RemoteError> {
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut path = format!("/blocks/{}/children?page_size={}", page_id, PAGE_SIZE);
            if let Some(ref c) = cursor {
                path.push_str("&start_cursor=");
                path.push_str(c);
            }
            let raw = self.request(Method::GET, &path, None).await?;
            let listing: ListResponse =
                serde_json::from_value(raw).map_err(|e| RemoteError::decode(e.to_string()))?;
            cursor = listing.cursor();
            blocks.extend(listing.results.iter().filter_map(ContentBlock::from_json));

            if cursor.is_none() {
                break;
            }
        }

        Ok(blocks)
    }

    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RemoteObject>, RemoteError> {
        let mut found = Vec::new();
        let mut cursor: Option<String> = None;

        while found.len() < limit {
            let mut body = json!({
                "query": query,
                "page_size": (limit - found.len()).min(PAGE_SIZE),
            });
            if let Some(ref c) = cursor {
                body["start_cursor"] = json!(c);
            }
            let (objects, next) = self.search_page(body).await?;
            found.extend(objects);
            cursor = next;
            if cursor.is_none() {
                break;
            }
        }

        found.truncate(limit);
        Ok(found)
    }

    async fn create_page(
        &self,
        parent: &ParentTarget,
        title: &str,
        blocks: &[ContentBlock],
    ) -> Result<String, RemoteError> {
        let (parent_json, property_name) = match parent {
            ParentTarget::Page(id) => (json!({ "page_id": id }), "title".to_string()),
            ParentTarget::Database(id) => (
                json!({ "database_id": id }),
                self.title_property_name(&format!("/databases/{}", id)).await?,
            ),
        };

        let (first, rest) = blocks.split_at(blocks.len().min(CHILDREN_PER_REQUEST));
        let mut properties = serde_json::Map::new();
        properties.insert(property_name, blocks::title_property(title));
        let body = json!({
            "parent": parent_json,
            "properties": properties,
            "children": first.iter().map(ContentBlock::to_json).collect::<Vec<_>>(),
        });

        let created = self.request(Method::POST, "/pages", Some(&body)).await?;
        let page_id = created
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RemoteError::decode("create response has no id"))?
            .to_string();

        self.append_blocks(&page_id, rest).await?;
        tracing::info!(page_id = %page_id, blocks = blocks.len(), "created page");
        Ok(page_id)
    }

    async fn update_page(
        &self,
        page_id: &str,
        title: Option<&str>,
        blocks: &[ContentBlock],
    ) -> Result<String, RemoteError> {
        if let Some(title) = title {
            let name = self.title_property_name(&format!("/pages/{}", page_id)).await?;
            let mut properties = serde_json::Map::new();
            properties.insert(name, blocks::title_property(title));
            self.request(
                Method::PATCH,
                &format!("/pages/{}", page_id),
                Some(&json!({ "properties": properties })),
            )
            .await?;
        }

        self.append_blocks(page_id, blocks).await?;
        tracing::info!(page_id = %page_id, blocks = blocks.len(), "updated page");
        Ok(page_id.to_string())
    }
}
