//! MCP JSON-RPC bridge over stdio.
//!
//! Exposes the [`ToolRegistry`] to MCP clients (Claude Desktop, Cursor) via
//! `list_tools` / `call_tool`. Tool failures are returned as error results
//! rather than protocol errors, so the client model sees the message.
//!
//! Cached pages are also listed as resources (`notion://page/{id}`). Reading
//! one fetches its blocks and renders them as markdown.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt};

use crate::blocks::{self, ContentBlock};
use crate::config::Config;
use crate::error::HarnessError;
use crate::models::PageRecord;
use crate::tools::{ToolContext, ToolRegistry};

/// Tools that change the workspace or the cache.
const MUTATING_TOOLS: &[&str] = &["write_page", "refresh_cache"];

const PAGE_URI_PREFIX: &str = "notion://page/";

#[derive(Clone)]
pub struct McpBridge {
    ctx: Arc<ToolContext>,
    tools: Arc<ToolRegistry>,
}

impl McpBridge {
    pub fn new(ctx: Arc<ToolContext>, tools: Arc<ToolRegistry>) -> Self {
        Self { ctx, tools }
    }

    fn to_mcp_tool(tool: &dyn crate::tools::Tool) -> Tool {
        let input_schema: Arc<serde_json::Map<String, serde_json::Value>> =
            match tool.parameters_schema() {
                serde_json::Value::Object(map) => Arc::new(map),
                _ => Arc::new(serde_json::Map::new()),
            };

        Tool {
            name: Cow::Owned(tool.name().to_string()),
            title: None,
            description: Some(Cow::Owned(tool.description().to_string())),
            input_schema,
            output_schema: None,
            annotations: Some(
                ToolAnnotations::new().read_only(!MUTATING_TOOLS.contains(&tool.name())),
            ),
            execution: None,
            icons: None,
            meta: None,
        }
    }

    /// Text body of an error result: `kind: message` for known failures.
    fn error_text(err: &anyhow::Error) -> String {
        match err.downcast_ref::<HarnessError>() {
            Some(harness) => format!("{}: {}", harness.kind(), harness),
            None => format!("tool_error: {:#}", err),
        }
    }

    async fn page_resources(&self) -> Result<Vec<Resource>, McpError> {
        let snapshot = self
            .ctx
            .cache()
            .get_or_refresh()
            .await
            .map_err(|e| McpError::internal_error(format!("{}: {}", e.kind(), e), None))?;
        Ok(snapshot
            .records()
            .filter(|r| !r.archived)
            .map(page_resource)
            .collect())
    }

    async fn read_page(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        let page_id = page_id_from_uri(uri)?;
        // A missing or failing cache only costs the title.
        let record = self.ctx.cache().get(page_id).await.ok().flatten();

        let content = self.ctx.workspace().get_content(page_id).await.map_err(|e| {
            if e.status == Some(404) {
                McpError::resource_not_found(format!("no page for {}", uri), None)
            } else {
                let err = HarnessError::RemoteUnavailable(e.to_string());
                McpError::internal_error(format!("{}: {}", err.kind(), err), None)
            }
        })?;

        let (title, url) = match &record {
            Some(r) => (r.title.as_str(), r.url.as_deref()),
            None => (page_id, None),
        };
        let mut contents = ResourceContents::text(page_markdown(title, url, &content), uri);
        if let ResourceContents::TextResourceContents { mime_type, .. } = &mut contents {
            *mime_type = Some("text/markdown".to_string());
        }
        Ok(ReadResourceResult {
            contents: vec![contents],
        })
    }
}

fn page_resource(record: &PageRecord) -> Resource {
    let mut raw = RawResource::new(format!("{}{}", PAGE_URI_PREFIX, record.id), record.title.clone());
    raw.description = Some(record.display_path());
    raw.mime_type = Some("text/markdown".to_string());
    raw.no_annotation()
}

fn page_id_from_uri(uri: &str) -> Result<&str, McpError> {
    match uri.strip_prefix(PAGE_URI_PREFIX).map(|id| id.trim_end_matches('/')) {
        Some(id) if !id.is_empty() && !id.contains('/') => Ok(id),
        _ => Err(McpError::invalid_params(
            format!("expected {}{{id}}, got {}", PAGE_URI_PREFIX, uri),
            None,
        )),
    }
}

/// `# title`, the blocks as markdown, then a source link when known.
fn page_markdown(title: &str, url: Option<&str>, content: &[ContentBlock]) -> String {
    let mut parts = vec![format!("# {}", title)];
    let body = blocks::to_markdown(content);
    if !body.trim().is_empty() {
        parts.push(body);
    }
    if let Some(url) = url {
        parts.push(format!("Source: {}", url));
    }
    parts.join("\n\n")
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder()
                .enable_resources()
                .enable_tools()
                .build(),
            server_info: Implementation {
                name: "notion-harness".to_string(),
                title: Some("Notion Harness".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Search and navigate a Notion workspace. Use ask for questions, search for \
                 ranked results, find_page or list_pages to navigate the hierarchy, and \
                 write_page to create or extend pages. Pages are also readable as \
                 notion://page/{id} resources."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<Tool> = self
            .tools
            .tools()
            .iter()
            .map(|t| Self::to_mcp_tool(t.as_ref()))
            .collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.tools.find(name).map(Self::to_mcp_tool)
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult::with_all_items(self.page_resources().await?))
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        self.read_page(&request.uri).await
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let tool = self.tools.find(&request.name).ok_or_else(|| {
            McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            )
        })?;

        let params = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        match tool.execute(params, &self.ctx).await {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => {
                tracing::warn!(tool = %request.name, error = %e, "tool call failed");
                Ok(CallToolResult::error(vec![Content::text(Self::error_text(&e))]))
            }
        }
    }
}

/// Serve the built-in tools over stdin/stdout until the client disconnects.
///
/// Stdout carries the protocol, so all logging must go to stderr.
pub async fn run_stdio(config: &Config) -> anyhow::Result<()> {
    let ctx = Arc::new(ToolContext::from_config(Arc::new(config.clone()))?);
    let bridge = McpBridge::new(ctx, Arc::new(ToolRegistry::with_builtins()));

    tracing::info!("MCP server ready on stdio");
    let service = bridge.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryWorkspace;

    fn bridge() -> McpBridge {
        let ctx = ToolContext::new(
            Arc::new(Config::default()),
            Arc::new(InMemoryWorkspace::new()),
        );
        McpBridge::new(Arc::new(ctx), Arc::new(ToolRegistry::with_builtins()))
    }

    fn workspace_bridge(dir: &tempfile::TempDir) -> (Arc<InMemoryWorkspace>, McpBridge) {
        let ws = InMemoryWorkspace::new();
        ws.add_page("root", "Projects", None);
        ws.add_page("q4", "Q4 Planning", Some("root"));
        ws.set_content("q4", "# Goals\n\n- Ship the importer");
        ws.add_page("old", "Old Plans", Some("root"));
        ws.archive("old");
        let ws = Arc::new(ws);

        let mut config = Config::default();
        config.cache.path = dir.path().join("cache.json");
        let ctx = ToolContext::new(Arc::new(config), ws.clone());
        (ws, McpBridge::new(Arc::new(ctx), Arc::new(ToolRegistry::with_builtins())))
    }

    fn text_of(result: &ReadResourceResult) -> &str {
        match &result.contents[0] {
            ResourceContents::TextResourceContents { text, .. } => text,
            ResourceContents::BlobResourceContents { .. } => panic!("expected text contents"),
        }
    }

    #[test]
    fn test_tool_descriptors() {
        let bridge = bridge();
        let write = bridge.get_tool("write_page").unwrap();
        assert_eq!(write.input_schema["type"], "object");
        assert_eq!(write.annotations.unwrap().read_only_hint, Some(false));
        let search = bridge.get_tool("search").unwrap();
        assert_eq!(search.annotations.unwrap().read_only_hint, Some(true));
        assert!(bridge.get_tool("missing").is_none());
    }

    #[test]
    fn test_error_text_uses_kind() {
        let err: anyhow::Error = HarnessError::InvalidInput("query must not be empty".into()).into();
        assert_eq!(
            McpBridge::error_text(&err),
            "invalid_input: invalid input: query must not be empty"
        );
        let other = anyhow::anyhow!("boom");
        assert_eq!(McpBridge::error_text(&other), "tool_error: boom");
    }

    #[test]
    fn test_capabilities_include_resources() {
        let info = bridge().get_info();
        assert!(info.capabilities.resources.is_some());
        assert!(info.capabilities.tools.is_some());
    }

    #[test]
    fn test_page_uri_parsing() {
        assert_eq!(page_id_from_uri("notion://page/abc-123").unwrap(), "abc-123");
        assert_eq!(page_id_from_uri("notion://page/abc/").unwrap(), "abc");
        for bad in ["notion://page/", "file:///tmp/x", "notion://db/abc", "notion://page/a/b"] {
            let err = page_id_from_uri(bad).unwrap_err();
            assert_eq!(err.code, ErrorCode::INVALID_PARAMS, "{}", bad);
        }
    }

    #[test]
    fn test_page_markdown_layout() {
        let content = vec![ContentBlock::Paragraph("Hello".to_string())];
        assert_eq!(
            page_markdown("Notes", Some("https://www.notion.so/abc"), &content),
            "# Notes\n\nHello\n\nSource: https://www.notion.so/abc"
        );
        assert_eq!(page_markdown("Empty", None, &[]), "# Empty");
    }

    #[tokio::test]
    async fn test_resources_list_live_pages() {
        let dir = tempfile::TempDir::new().unwrap();
        let (_ws, bridge) = workspace_bridge(&dir);

        let resources = bridge.page_resources().await.unwrap();
        let uris: Vec<&str> = resources.iter().map(|r| r.uri.as_str()).collect();
        assert_eq!(uris, vec!["notion://page/q4", "notion://page/root"]);

        let q4 = &resources[0];
        assert_eq!(q4.name, "Q4 Planning");
        assert_eq!(q4.description.as_deref(), Some("Projects > Q4 Planning"));
    }

    #[tokio::test]
    async fn test_read_resource_renders_page() {
        let dir = tempfile::TempDir::new().unwrap();
        let (_ws, bridge) = workspace_bridge(&dir);

        let result = bridge.read_page("notion://page/q4").await.unwrap();
        let text = text_of(&result);
        assert!(text.starts_with("# Q4 Planning\n\n"));
        assert!(text.contains("Ship the importer"));
        assert!(text.ends_with("Source: https://www.notion.so/q4"));
    }

    #[tokio::test]
    async fn test_read_resource_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let (ws, bridge) = workspace_bridge(&dir);

        let missing = bridge.read_page("notion://page/nope").await.unwrap_err();
        assert_eq!(missing.code, ErrorCode::RESOURCE_NOT_FOUND);

        ws.fail_content_for("q4");
        let failed = bridge.read_page("notion://page/q4").await.unwrap_err();
        assert_eq!(failed.code, ErrorCode::INTERNAL_ERROR);
        assert!(failed.message.starts_with("remote_unavailable"));

        let invalid = bridge.read_page("https://example.com").await.unwrap_err();
        assert_eq!(invalid.code, ErrorCode::INVALID_PARAMS);
    }
}
