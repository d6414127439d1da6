//! HTTP routes.
//!
//!   - `POST /predict`           multipart `file` upload or JSON `{"url": ...}`
//!   - `GET  /api/bin-level`     fill levels from the store
//!   - `GET  /api/bin-location`  configured coordinates
//!   - `GET  /health`            liveness probe

use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use smartbin_common::{BinLevels, BinLocation, PredictResponse};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::inference::classify;
use crate::intake::{preprocess, validate_upload, InputError};
use crate::state::AppState;

/// Allowance for multipart framing and form fields on top of the file itself.
const BODY_OVERHEAD: usize = 1024 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.max_upload_bytes.saturating_add(BODY_OVERHEAD);
    Router::new()
        .route("/predict", post(predict))
        .route("/api/bin-level", get(bin_level))
        .route("/api/bin-location", get(bin_location))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct UrlRequest {
    url: Option<String>,
}

/// Classify one image and start a lid cycle for it.
///
/// Responds once the open update is acknowledged; the close happens in the
/// background after the dwell.
async fn predict(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<PredictResponse>, ApiError> {
    let bytes = read_image(&state, request).await?;

    let tensor = tokio::task::spawn_blocking(move || preprocess(&bytes))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    let label = classify(state.classifier.as_ref(), &tensor).await?;

    let cycle = state.controller.report_classification(label);
    cycle.opened().await?;

    Ok(Json(PredictResponse::opened(label)))
}

async fn read_image(state: &AppState, request: Request) -> Result<Vec<u8>, ApiError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| InputError::Malformed(e.body_text()))?;
        return read_upload(multipart, state.max_upload_bytes).await;
    }

    if content_type.starts_with("application/json") {
        let Json(body) = Json::<UrlRequest>::from_request(request, &())
            .await
            .map_err(|e| InputError::Malformed(e.body_text()))?;
        let url = body.url.filter(|u| !u.trim().is_empty()).ok_or(InputError::NoImage)?;
        tracing::info!(url = %url, "fetching image by URL");
        return Ok(state.fetcher.fetch(url.trim()).await?);
    }

    Err(InputError::NoImage.into())
}

async fn read_upload(mut multipart: Multipart, max_bytes: usize) -> Result<Vec<u8>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        validate_upload(&filename, 0, max_bytes)?;

        let bytes = field.bytes().await.map_err(multipart_error)?;
        validate_upload(&filename, bytes.len(), max_bytes)?;

        tracing::info!(filename = %filename, bytes = bytes.len(), "image uploaded");
        return Ok(bytes.to_vec());
    }
    Err(InputError::NoImage.into())
}

fn multipart_error(err: MultipartError) -> InputError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        InputError::TooLarge
    } else {
        InputError::Malformed(err.body_text())
    }
}

async fn bin_level(State(state): State<Arc<AppState>>) -> Result<Json<BinLevels>, ApiError> {
    state
        .controller
        .read_bin_levels()
        .await
        .map(Json)
        .ok_or(ApiError::LevelsUnavailable)
}

async fn bin_location(State(state): State<Arc<AppState>>) -> Json<BinLocation> {
    Json(state.location)
}

/// Health check for container and load-balancer probes.
async fn health() -> StatusCode {
    StatusCode::OK
}
