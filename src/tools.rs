//! Tool registry shared by the MCP and HTTP transports.
//!
//! Every capability exposed to a tool-calling client is a [`Tool`]: a name,
//! a description, a JSON Schema for its parameters, and an async `execute`
//! that receives the parameters and a [`ToolContext`].
//!
//! # Built-in tools
//!
//! | Tool | Purpose |
//! |------|---------|
//! | `ask` | Answer a question with page content and citations |
//! | `search` | Ranked multi-strategy search |
//! | `list_pages` | Indented outline of the page hierarchy |
//! | `find_page` | Look up pages by title or path |
//! | `write_page` | Create a page or append to one |
//! | `refresh_cache` | Rebuild the hierarchy cache |
//! | `hierarchy_info` | Hierarchy statistics |
//!
//! Invalid parameters fail with [`HarnessError::InvalidInput`]; transports
//! downcast errors to [`HarnessError`] to pick a status code.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::ask::{self, MAX_CONTENT_PAGES};
use crate::cache::PageCache;
use crate::config::Config;
use crate::error::HarnessError;
use crate::models::PageRecord;
use crate::present;
use crate::remote::{NotionClient, Workspace};
use crate::search::SearchEngine;
use crate::write::{self, WriteRequest};

/// A named capability callable through the tool transports.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Route name (`POST /tools/{name}`) and MCP tool name.
    fn name(&self) -> &str;

    /// One-line description for client discovery.
    fn description(&self) -> &str;

    /// JSON Schema of the parameters object.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. `params` is always a JSON object.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

// ═══════════════════════════════════════════════════════════════════════
// ToolContext
// ═══════════════════════════════════════════════════════════════════════

/// Shared services for tool execution.
///
/// One context is built at startup and shared by every invocation; the
/// cache inside it is the only mutable state.
pub struct ToolContext {
    config: Arc<Config>,
    workspace: Arc<dyn Workspace>,
    cache: Arc<PageCache>,
    engine: SearchEngine,
}

impl ToolContext {
    pub fn new(config: Arc<Config>, workspace: Arc<dyn Workspace>) -> Self {
        let cache = Arc::new(PageCache::new(workspace.clone(), config.cache.clone()));
        let engine = SearchEngine::new(
            workspace.clone(),
            cache.clone(),
            config.search.clone(),
            config.scoring.clone(),
        );
        Self {
            config,
            workspace,
            cache,
            engine,
        }
    }

    /// Build a context talking to Notion, loading any persisted cache.
    ///
    /// Fails with [`HarnessError::CredentialMissing`] when the token
    /// variable is unset.
    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        let token = config.credential()?;
        let client = NotionClient::new(&config.notion, token)?;
        let ctx = Self::new(config, Arc::new(client));
        ctx.cache.load_persisted();
        Ok(ctx)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workspace(&self) -> &dyn Workspace {
        self.workspace.as_ref()
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn engine(&self) -> &SearchEngine {
        &self.engine
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parameter helpers
// ═══════════════════════════════════════════════════════════════════════

fn invalid(message: impl Into<String>) -> anyhow::Error {
    HarnessError::InvalidInput(message.into()).into()
}

fn opt_str<'a>(params: &'a Value, key: &str) -> Result<Option<&'a str>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(invalid(format!("{} must be a string", key))),
    }
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    match opt_str(params, key)? {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(invalid(format!("{} must not be empty", key))),
    }
}

fn opt_usize(params: &Value, key: &str) -> Result<Option<usize>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| invalid(format!("{} must be a non-negative integer", key))),
    }
}

fn opt_bool(params: &Value, key: &str, default: bool) -> Result<bool> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(invalid(format!("{} must be a boolean", key))),
    }
}

fn opt_str_list(params: &Value, key: &str) -> Result<Option<Vec<String>>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(format!("{} must contain only strings", key)))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some),
        Some(_) => Err(invalid(format!("{} must be an array of strings", key))),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in Tool Implementations
// ═══════════════════════════════════════════════════════════════════════

pub struct AskTool;

#[async_trait]
impl Tool for AskTool {
    fn name(&self) -> &str {
        "ask"
    }

    fn description(&self) -> &str {
        "Ask a question about your Notion workspace; answers with page content and sources"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string", "description": "Natural-language question" },
                "max_content_pages": {
                    "type": "integer", "minimum": 1, "maximum": MAX_CONTENT_PAGES, "default": 5,
                    "description": "Pages whose full content is included"
                },
                "use_enhanced_search": {
                    "type": "boolean", "default": true,
                    "description": "Combine keyword, title/path and content search"
                }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let question = required_str(&params, "question")?;
        let pages = opt_usize(&params, "max_content_pages")?.unwrap_or(5);
        let enhanced = opt_bool(&params, "use_enhanced_search", true)?;

        let answer = ask::ask(ctx.engine(), ctx.workspace(), question, pages, enhanced).await?;
        Ok(serde_json::to_value(&answer)?)
    }
}

pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Ranked search over page titles, paths and content"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "max_results": { "type": "integer", "minimum": 1, "description": "Max results" },
                "use_enhanced_search": { "type": "boolean", "default": true }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        let max_results = opt_usize(&params, "max_results")?
            .unwrap_or(ctx.config().search.default_max_results);
        if max_results == 0 {
            return Err(invalid("max_results must be >= 1"));
        }
        let enhanced = opt_bool(&params, "use_enhanced_search", true)?;

        let hits = ctx.engine().search(query, max_results, enhanced).await?;
        let results = present::present(&hits);
        Ok(json!({ "query": query, "count": results.len(), "results": results }))
    }
}

pub struct ListPagesTool;

#[async_trait]
impl Tool for ListPagesTool {
    fn name(&self) -> &str {
        "list_pages"
    }

    fn description(&self) -> &str {
        "List the workspace page hierarchy as an indented outline"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "max_depth": { "type": "integer", "minimum": 0, "description": "Deepest level to include (0 = top level only)" },
                "include_archived": { "type": "boolean", "default": false }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let max_depth = opt_usize(&params, "max_depth")?;
        let include_archived = opt_bool(&params, "include_archived", false)?;

        let snapshot = ctx.cache().get_or_refresh().await?;
        Ok(json!({
            "tree": snapshot.render_tree(max_depth, include_archived),
            "total_pages": snapshot.len(),
            "top_level_pages": snapshot.top_level().len(),
            "built_at": snapshot.built_at(),
        }))
    }
}

pub struct FindPageTool;

#[async_trait]
impl Tool for FindPageTool {
    fn name(&self) -> &str {
        "find_page"
    }

    fn description(&self) -> &str {
        "Find pages by title or by path segments (e.g. [\"Projects\", \"Q4 Planning\"])"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "Page title to match" },
                "path_segments": {
                    "type": "array", "items": { "type": "string" },
                    "description": "Titles from the top level down"
                },
                "fuzzy": {
                    "type": "boolean", "default": false,
                    "description": "Allow token-overlap title matches and path prefix matches"
                }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let title = opt_str(&params, "title")?.filter(|t| !t.trim().is_empty());
        let segments = opt_str_list(&params, "path_segments")?.filter(|s| !s.is_empty());
        let fuzzy = opt_bool(&params, "fuzzy", false)?;
        if title.is_none() && segments.is_none() {
            return Err(invalid("one of title or path_segments is required"));
        }

        let snapshot = ctx.cache().get_or_refresh().await?;
        let mut matches: Vec<PageRecord> = Vec::new();
        if let Some(segments) = &segments {
            match snapshot.find_by_path(segments) {
                Some(found) => matches.push(found),
                None if fuzzy => matches.extend(snapshot.find_under_path(segments)),
                None => {}
            }
        }
        if let Some(title) = title {
            for record in snapshot.find_by_title(title, fuzzy) {
                if !matches.iter().any(|m| m.id == record.id) {
                    matches.push(record);
                }
            }
        }

        Ok(json!({ "count": matches.len(), "matches": matches }))
    }
}

pub struct WritePageTool;

#[async_trait]
impl Tool for WritePageTool {
    fn name(&self) -> &str {
        "write_page"
    }

    fn description(&self) -> &str {
        "Create a page under a parent, or rename and append markdown to an existing page"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "parent_id": { "type": "string", "description": "Parent page or database for a new page" },
                "page_id": { "type": "string", "description": "Existing page to update" },
                "title": { "type": "string", "description": "New title (defaults to Untitled on create)" },
                "markdown_content": { "type": "string", "description": "Markdown body to write" }
            },
            "required": ["markdown_content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let request = WriteRequest {
            parent_id: opt_str(&params, "parent_id")?.map(str::to_string),
            page_id: opt_str(&params, "page_id")?.map(str::to_string),
            title: opt_str(&params, "title")?.map(str::to_string),
            markdown_content: opt_str(&params, "markdown_content")?
                .ok_or_else(|| invalid("markdown_content is required"))?
                .to_string(),
        };
        let outcome = write::write_page(ctx.workspace(), ctx.cache(), &request).await?;
        Ok(serde_json::to_value(&outcome)?)
    }
}

pub struct RefreshCacheTool;

#[async_trait]
impl Tool for RefreshCacheTool {
    fn name(&self) -> &str {
        "refresh_cache"
    }

    fn description(&self) -> &str {
        "Rebuild the page hierarchy cache from Notion"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let refresh = ctx.cache().force_refresh().await?;
        let stats = refresh.snapshot.stats();
        Ok(json!({
            "records": stats.total_pages,
            "duration_ms": refresh.duration.as_millis() as u64,
            "shared": refresh.shared,
            "max_depth": stats.max_depth,
            "pages_by_depth": stats.pages_by_depth,
        }))
    }
}

pub struct HierarchyInfoTool;

#[async_trait]
impl Tool for HierarchyInfoTool {
    fn name(&self) -> &str {
        "hierarchy_info"
    }

    fn description(&self) -> &str {
        "Statistics about the cached page hierarchy"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let snapshot = ctx.cache().get_or_refresh().await?;
        Ok(serde_json::to_value(snapshot.stats())?)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry of tools served by the transports.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with every built-in tool.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(AskTool));
        registry.register(Box::new(SearchTool));
        registry.register(Box::new(ListPagesTool));
        registry.register(Box::new(FindPageTool));
        registry.register(Box::new(WritePageTool));
        registry.register(Box::new(RefreshCacheTool));
        registry.register(Box::new(HierarchyInfoTool));
        registry
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryWorkspace;

    fn context(dir: &tempfile::TempDir) -> (Arc<InMemoryWorkspace>, ToolContext) {
        let ws = InMemoryWorkspace::new();
        ws.add_page("root", "Projects", None);
        ws.add_page("q4", "Q4 Planning", Some("root"));
        ws.add_page("notes", "Meeting Notes", Some("q4"));
        ws.set_content("notes", "Agenda: budget review");
        let ws = Arc::new(ws);

        let mut config = Config::default();
        config.cache.path = dir.path().join("cache.json");
        config.search.rate_limit_ms = 0;
        let ctx = ToolContext::new(Arc::new(config), ws.clone());
        (ws, ctx)
    }

    fn kind(err: &anyhow::Error) -> &'static str {
        err.downcast_ref::<HarnessError>().map(|e| e.kind()).unwrap_or("other")
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ToolRegistry::with_builtins();
        let names: Vec<&str> = registry.tools().iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec!["ask", "search", "list_pages", "find_page", "write_page", "refresh_cache", "hierarchy_info"]
        );
        for tool in registry.tools() {
            assert_eq!(tool.parameters_schema()["type"], "object");
        }
    }

    #[tokio::test]
    async fn test_find_page_by_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let (_, ctx) = context(&dir);
        let result = FindPageTool
            .execute(
                json!({ "path_segments": ["Projects", "Q4 Planning", "Meeting Notes"] }),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(result["count"], 1);
        assert_eq!(result["matches"][0]["id"], "notes");
    }

    #[tokio::test]
    async fn test_find_page_requires_criteria() {
        let dir = tempfile::TempDir::new().unwrap();
        let (_, ctx) = context(&dir);
        let err = FindPageTool.execute(json!({}), &ctx).await.unwrap_err();
        assert_eq!(kind(&err), "invalid_input");
    }

    #[tokio::test]
    async fn test_find_page_no_match_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let (_, ctx) = context(&dir);
        let result = FindPageTool
            .execute(json!({ "path_segments": ["Projects", "Missing"] }), &ctx)
            .await
            .unwrap();
        assert_eq!(result["count"], 0);
    }

    #[tokio::test]
    async fn test_search_rejects_bad_types() {
        let dir = tempfile::TempDir::new().unwrap();
        let (_, ctx) = context(&dir);
        let err = SearchTool
            .execute(json!({ "query": "notes", "max_results": "ten" }), &ctx)
            .await
            .unwrap_err();
        assert_eq!(kind(&err), "invalid_input");
    }

    #[tokio::test]
    async fn test_search_returns_presented_hits() {
        let dir = tempfile::TempDir::new().unwrap();
        let (_, ctx) = context(&dir);
        let result = SearchTool
            .execute(json!({ "query": "meeting notes" }), &ctx)
            .await
            .unwrap();
        assert_eq!(result["results"][0]["path"], "Projects > Q4 Planning > Meeting Notes");
        assert_eq!(result["results"][0]["rank"], 1);
    }

    #[tokio::test]
    async fn test_write_then_find() {
        let dir = tempfile::TempDir::new().unwrap();
        let (_, ctx) = context(&dir);
        let written = WritePageTool
            .execute(
                json!({ "parent_id": "q4", "title": "Retro", "markdown_content": "- went well" }),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(written["created"], true);

        let found = FindPageTool
            .execute(json!({ "title": "retro" }), &ctx)
            .await
            .unwrap();
        assert_eq!(found["matches"][0]["id"], written["page_id"]);
    }

    #[tokio::test]
    async fn test_refresh_and_info() {
        let dir = tempfile::TempDir::new().unwrap();
        let (ws, ctx) = context(&dir);
        let refreshed = RefreshCacheTool.execute(json!({}), &ctx).await.unwrap();
        assert_eq!(refreshed["records"], 3);
        assert_eq!(refreshed["pages_by_depth"]["2"], 1);

        let info = HierarchyInfoTool.execute(json!({}), &ctx).await.unwrap();
        assert_eq!(info["max_depth"], 2);
        assert_eq!(ws.enumeration_count(), 1);
    }

    #[tokio::test]
    async fn test_list_pages_outline() {
        let dir = tempfile::TempDir::new().unwrap();
        let (_, ctx) = context(&dir);
        let result = ListPagesTool
            .execute(json!({ "max_depth": 1 }), &ctx)
            .await
            .unwrap();
        let tree = result["tree"].as_str().unwrap();
        assert!(tree.contains("  - Q4 Planning (q4)"));
        assert!(!tree.contains("Meeting Notes"));
    }

    #[tokio::test]
    async fn test_ask_tool() {
        let dir = tempfile::TempDir::new().unwrap();
        let (_, ctx) = context(&dir);
        let result = AskTool
            .execute(json!({ "question": "meeting notes" }), &ctx)
            .await
            .unwrap();
        assert!(result["answer"].as_str().unwrap().contains("Agenda: budget review"));
        assert_eq!(result["sources"][0]["id"], "notes");
    }
}
