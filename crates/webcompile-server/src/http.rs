//! HTTP front end.
//!
//! ## Endpoints
//!
//! - `GET /` - Submission form
//! - `POST /compile` - Run code (form fields `code`, `language`)
//! - `GET /stats` - Pool statistics (404 when disabled)

use crate::config::ServerConfig;
use axum::{
    extract::{rejection::FormRejection, DefaultBodyLimit, State},
    http::{HeaderValue, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Form, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use webcompile_core::{AppContext, CoreError, ExecutionResult};

/// Room for url-encoding overhead and the other form fields.
const FORM_OVERHEAD_BYTES: usize = 16 * 1024;

#[derive(Clone)]
struct AppState {
    ctx: AppContext,
    stats_enabled: bool,
}

/// Fields of a `POST /compile` submission.
#[derive(Debug, Deserialize)]
pub struct CompileForm {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// JSON body returned by `POST /compile`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompileResponse {
    #[serde(rename = "Output")]
    pub output: String,
    #[serde(rename = "LatencyInMS")]
    pub latency_ms: u64,
    #[serde(rename = "ErrorString")]
    pub error: String,
    #[serde(rename = "Timeout")]
    pub timeout: bool,
}

impl From<ExecutionResult> for CompileResponse {
    fn from(result: ExecutionResult) -> Self {
        Self {
            output: result.stdout,
            latency_ms: result.elapsed_ms,
            error: result.stderr,
            timeout: result.timed_out,
        }
    }
}

impl CompileResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            ..Self::default()
        }
    }
}

/// Map an execution error to a status code and client-safe message.
fn error_response(err: &CoreError) -> (StatusCode, CompileResponse) {
    match err {
        CoreError::Validation(_) | CoreError::UnsupportedLanguage(_) => {
            (StatusCode::BAD_REQUEST, CompileResponse::failure(err.to_string()))
        }
        CoreError::Overloaded(_) | CoreError::ShuttingDown => (
            StatusCode::SERVICE_UNAVAILABLE,
            CompileResponse::failure(err.to_string()),
        ),
        CoreError::Write(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            CompileResponse::failure("failed to prepare the source file"),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            CompileResponse::failure("internal error"),
        ),
    }
}

fn cors_layer(value: &str) -> Option<CorsLayer> {
    match value {
        "" => None,
        "*" => Some(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        ),
        origin => match HeaderValue::from_str(origin) {
            Ok(origin) => Some(
                CorsLayer::new()
                    .allow_origin(origin)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
            Err(e) => {
                tracing::warn!(error = %e, origin, "Ignoring invalid CORS origin");
                None
            }
        },
    }
}

/// Build the HTTP router.
pub fn build_router(ctx: AppContext, config: &ServerConfig) -> Router {
    tracing::debug!("Building HTTP router");

    let body_limit = config.max_code_size.saturating_mul(3) + FORM_OVERHEAD_BYTES;
    let state = AppState {
        ctx,
        stats_enabled: config.stats_enabled,
    };

    let mut router = Router::new()
        .route("/", get(index_handler))
        .route("/compile", post(compile_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(body_limit)),
        );

    if let Some(cors) = cors_layer(&config.cors_header) {
        router = router.layer(cors);
    }

    tracing::debug!(body_limit, "HTTP router built with routes: /, /compile, /stats");
    router
}

async fn compile_handler(
    State(state): State<AppState>,
    form: Result<Form<CompileForm>, FormRejection>,
) -> Response {
    // oversize bodies, wrong content types and malformed forms land here
    let Form(form) = match form {
        Ok(form) => form,
        Err(rejection) => {
            tracing::debug!(
                status = %rejection.status(),
                error = %rejection,
                "Compile request rejected"
            );
            let message = format!("invalid request: {}", rejection.body_text());
            let body = CompileResponse::failure(message);
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };
    let language = form.language.unwrap_or_default();
    tracing::debug!(%language, code_len = form.code.len(), "Compile request");

    match state.ctx.executor().execute(&language, &form.code).await {
        Ok(result) => Json(CompileResponse::from(result)).into_response(),
        Err(e) => {
            let (status, body) = error_response(&e);
            if status.is_server_error() {
                tracing::warn!(error = %e, %status, "Compile request failed");
            } else {
                tracing::debug!(error = %e, %status, "Compile request rejected");
            }
            (status, Json(body)).into_response()
        }
    }
}

async fn stats_handler(State(state): State<AppState>) -> Response {
    if !state.stats_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(state.ctx.pool().snapshot().await).into_response()
}

async fn index_handler(State(state): State<AppState>) -> Html<String> {
    tracing::trace!("Index page request");
    let options: String = state
        .ctx
        .executor()
        .registry()
        .languages()
        .map(|lang| format!(r#"<option value="{lang}">{lang}</option>"#))
        .collect();

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>webcompile</title>
    <style>
        body {{ font-family: system-ui; max-width: 800px; margin: 50px auto; padding: 20px; }}
        textarea {{ width: 100%; font-family: monospace; }}
    </style>
</head>
<body>
    <h1>webcompile</h1>
    <form method="post" action="/compile">
        <select name="language">{options}</select>
        <textarea name="code" rows="20"></textarea>
        <button type="submit">Run</button>
    </form>
</body>
</html>"#
    ))
}

/// Start the HTTP server.
///
/// Runs until `shutdown` resolves, then finishes in-flight requests.
pub async fn serve(
    ctx: AppContext,
    config: &ServerConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let addr = config.http_addr;
    tracing::info!(%addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::debug!(%addr, "TCP listener bound");

    serve_on(listener, ctx, config, shutdown).await
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    ctx: AppContext,
    config: &ServerConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let router = build_router(ctx, config);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
