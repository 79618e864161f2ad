use crate::models::{ChatQuery, ChatResponse, SessionResponse};
use crate::startup::AppState;
use crate::utils::ValidatedJson;
use axum::{extract::State, Json};
use service_core::error::AppError;

/// Answer a question, creating the session on first use.
pub async fn chat(
    State(state): State<AppState>,
    ValidatedJson(query): ValidatedJson<ChatQuery>,
) -> Result<Json<ChatResponse>, AppError> {
    let response = state.chat.ask(query).await?;
    Ok(Json(response))
}

/// Hand out a new session id.
pub async fn new_session(State(state): State<AppState>) -> Json<SessionResponse> {
    Json(state.chat.new_session())
}
