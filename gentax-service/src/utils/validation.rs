use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use service_core::error::{AppError, ErrorResponse};
use validator::Validate;

/// JSON body extractor that also runs `validator` rules.
///
/// Unparseable JSON is a 400 and a missing JSON content type a 415. A body
/// that parses but has missing or mistyped fields, or fails validation, is
/// a 422.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(json_rejection)?;

        value
            .validate()
            .map_err(|e| AppError::from(e).into_response())?;

        Ok(ValidatedJson(value))
    }
}

fn json_rejection(rejection: JsonRejection) -> Response {
    let status = rejection.status();
    let err_resp = match &rejection {
        JsonRejection::JsonDataError(_) => ErrorResponse {
            error: "Validation error".to_string(),
            details: Some(rejection.body_text()),
        },
        _ => ErrorResponse {
            error: format!("Json parse error: {}", rejection.body_text()),
            details: None,
        },
    };
    (status, Json(err_resp)).into_response()
}
