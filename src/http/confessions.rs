//! Handlers for the confessions resource.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use super::error::{AppError, AppResult};
use crate::{
    model::{Confession, Draft},
    state::AppState,
};

/// Methods advertised on the resource.
pub(crate) const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";

/// Body of a successful `GET`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    /// The stored collection, newest first.
    pub confessions: Vec<Confession>,
}

/// Body of a successful `POST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateResponse {
    /// Always `true`.
    pub success: bool,
    /// The stored confession.
    pub confession: Confession,
    /// Human readable confirmation.
    pub message: String,
}

pub async fn list(State(state): State<AppState>) -> AppResult<Json<ListResponse>> {
    let confessions = state.service.list().await?;
    Ok(Json(ListResponse { confessions }))
}

pub async fn create(
    State(state): State<AppState>,
    draft: Result<Json<Draft>, JsonRejection>,
) -> AppResult<(StatusCode, Json<CreateResponse>)> {
    let Json(draft) = draft?;
    let confession = state.service.append(draft).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateResponse {
            success: true,
            confession,
            message: "Confession added successfully".to_string(),
        }),
    ))
}

/// Answers every `OPTIONS` request, browser preflights included.
pub async fn options() -> impl IntoResponse {
    (
        [
            (
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("*"),
            ),
            (
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(ALLOWED_METHODS),
            ),
            (
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("Content-Type"),
            ),
        ],
        Json(serde_json::json!({})),
    )
}

pub async fn method_not_allowed() -> AppError {
    AppError::method_not_allowed()
}
