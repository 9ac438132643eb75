//! HTTP API server for integration with other systems.
//!
//! Provides REST endpoints for single tool calls and full crew runs.

use crate::cli::Output;
use crate::config::{ServerSettings, Settings};
use crate::crew::{Crew, CrewOutput};
use crate::error::DavinciError;
use crate::tools::{parse_tool_call, ToolName};
use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info_span, warn, Instrument};
use uuid::Uuid;

/// Shared application state.
struct AppState {
    crew: Crew,
    expose_plot: bool,
}

/// Run the HTTP API server.
pub async fn run_serve(host: &str, port: u16, settings: Settings) -> anyhow::Result<()> {
    let crew = Crew::from_settings(&settings)?;
    let app = router(crew, &settings.server);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("DaVinci API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("List tools", "GET  /tools");
    Output::kv("Call tool", "POST /tools/{name}");
    Output::kv("Ask crew", "POST /ask");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app).await?;

    Ok(())
}

fn router(crew: Crew, server: &ServerSettings) -> Router {
    let state = Arc::new(AppState {
        crew,
        expose_plot: server.expose_plot_tool,
    });

    let router = Router::new()
        .route("/health", get(health))
        .route("/tools", get(list_tools))
        .route("/tools/{name}", post(call_tool))
        .route("/ask", post(ask));

    let router = match cors_layer(&server.allowed_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    };
    router.with_state(state)
}

/// CORS for the configured origins only; none configured means no CORS headers.
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]),
    )
}

// === Request/Response Types ===

#[derive(Serialize)]
struct ToolInfo {
    name: &'static str,
    description: &'static str,
    parameters: serde_json::Value,
}

#[derive(Serialize)]
struct ToolsResponse {
    tools: Vec<ToolInfo>,
}

#[derive(Serialize)]
struct ToolResponse {
    name: String,
    result: String,
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    call_id: Option<String>,
}

#[derive(Serialize)]
struct AskResponse {
    call_id: String,
    #[serde(flatten)]
    output: CrewOutput,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(e: DavinciError) -> axum::response::Response {
    let status = match &e {
        DavinciError::ToolNotFound(_) => StatusCode::NOT_FOUND,
        DavinciError::ToolNotExposed(_) => StatusCode::FORBIDDEN,
        DavinciError::InvalidInput(_) | DavinciError::Agent(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Request failed: {}", e);
    }
    (status, Json(ErrorResponse { error: e.to_string() })).into_response()
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_tools(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ToolsResponse {
        tools: ToolName::exposed(state.expose_plot)
            .into_iter()
            .map(|t| ToolInfo {
                name: t.as_str(),
                description: t.description(),
                parameters: t.parameters(),
            })
            .collect(),
    })
}

async fn call_tool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(arguments): Json<serde_json::Value>,
) -> impl IntoResponse {
    let tool = match parse_tool_call(&name, &arguments.to_string()) {
        Ok(tool) => tool,
        Err(e) => return error_response(e),
    };

    match state.crew.tools().execute_exposed(&tool, state.expose_plot).await {
        Ok(result) => Json(ToolResponse { name, result }).into_response(),
        Err(e) => error_response(e),
    }
}

async fn ask(State(state): State<Arc<AppState>>, Json(req): Json<AskRequest>) -> impl IntoResponse {
    let call_id = req.call_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let span = info_span!("ask", %call_id);

    match state.crew.kickoff(&req.question).instrument(span).await {
        Ok(output) => Json(AskResponse { call_id, output }).into_response(),
        Err(e) => error_response(e),
    }
}
