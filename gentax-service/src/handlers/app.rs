use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::Html, Json};
use serde_json::{json, Value};
use service_core::error::AppError;

pub const SERVICE_NAME: &str = "GenTaxAI Chatbot";

const MISSING_INDEX_HTML: &str = "<h1>GenTaxAI</h1><p>static/index.html not found.</p>";

/// Chat UI entry page.
pub async fn index(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let index_path = state.static_dir.join("index.html");
    match tokio::fs::read_to_string(&index_path).await {
        Ok(html) => Ok(Html(html)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %index_path.display(), "index.html not found");
            Ok(Html(MISSING_INDEX_HTML.to_string()))
        }
        Err(e) => Err(AppError::InternalError(anyhow::Error::new(e).context(format!(
            "failed to read {}",
            index_path.display()
        )))),
    }
}

/// Liveness probe target for the container health check.
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": SERVICE_NAME,
        })),
    )
}
