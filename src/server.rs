//! JSON HTTP transport for the tool registry.
//!
//! Every tool in the [`ToolRegistry`] is callable as `POST /tools/{name}`
//! with its parameters object as the request body.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools/list` | List all registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call a tool by name |
//! | `GET`  | `/health` | Health check (version and cache state) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "invalid_input", "message": "query must not be empty" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `invalid_input` | 400 |
//! | `not_found` | 404 |
//! | `write_failed` | 502 |
//! | `remote_unavailable`, `no_strategy_available` | 503 |
//! | `credential_missing`, `tool_error` | 500 |

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::HarnessError;
use crate::tools::{ToolContext, ToolRegistry};

#[derive(Clone)]
struct AppState {
    ctx: Arc<ToolContext>,
    tools: Arc<ToolRegistry>,
}

/// Serve the built-in tools on `[server].bind` until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let ctx = Arc::new(ToolContext::from_config(Arc::new(config.clone()))?);
    let tools = Arc::new(ToolRegistry::with_builtins());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, tools = tools.len(), "HTTP tool server listening");
    axum::serve(listener, router(ctx, tools)).await?;
    Ok(())
}

/// Build the route table. Exposed so callers can serve on their own listener.
pub fn router(ctx: Arc<ToolContext>, tools: Arc<ToolRegistry>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { ctx, tools })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn status_for(err: &HarnessError) -> StatusCode {
    match err {
        HarnessError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        HarnessError::NotFound(_) => StatusCode::NOT_FOUND,
        HarnessError::WriteFailed(_) => StatusCode::BAD_GATEWAY,
        HarnessError::RemoteUnavailable(_) | HarnessError::NoStrategyAvailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        HarnessError::CredentialMissing(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Tools signal their failure class through [`HarnessError`]; anything
/// else is an internal tool error.
fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    match err.downcast_ref::<HarnessError>() {
        Some(harness) => AppError {
            status: status_for(harness),
            code: harness.kind().to_string(),
            message: format!("{}: {}", tool_name, harness),
        },
        None => AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "tool_error".to_string(),
            message: format!("{}: {:#}", tool_name, err),
        },
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    /// Records in the installed snapshot; absent before the first build.
    #[serde(skip_serializing_if = "Option::is_none")]
    cached_pages: Option<usize>,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cached_pages: state.ctx.cache().current().map(|s| s.len()),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolInfo {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state
        .tools
        .tools()
        .iter()
        .map(|t| ToolInfo {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        })
        .collect();
    Json(ToolListResponse { tools })
}

// ============ POST /tools/{name} ============

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let tool = state.tools.find(&name).ok_or_else(|| AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: format!("no tool registered with name: {}", name),
    })?;

    let params = match params {
        Value::Null => Value::Object(Default::default()),
        Value::Object(_) => params,
        _ => {
            return Err(AppError {
                status: StatusCode::BAD_REQUEST,
                code: "invalid_input".to_string(),
                message: "request body must be a JSON object".to_string(),
            })
        }
    };

    tracing::debug!(tool = %name, "tool call");
    let result = tool
        .execute(params, &state.ctx)
        .await
        .map_err(|e| classify_tool_error(&name, e))?;

    Ok(Json(serde_json::json!({ "result": result })))
}
