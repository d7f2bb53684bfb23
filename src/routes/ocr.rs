//! OCR operation routes
//!
//! `binarize` answers with a single JSON image; `segment` and `recognize`
//! stream NDJSON, one element per line.

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Response,
    routing::post,
    Json, Router,
};
use serde::de::DeserializeOwned;

use super::ndjson;
use crate::error::{AppError, Result};
use crate::pipeline::{BinarizeRequest, Image, RecognizeRequest, SegmentRequest};
use crate::state::AppState;

/// Create the OCR router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/binarize", post(binarize))
        .route("/segment", post(segment))
        .route("/recognize", post(recognize))
}

/// Unwrap a JSON body, reporting malformed payloads as bad requests
fn parse<T: DeserializeOwned>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(request)| request)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

async fn binarize(
    State(state): State<AppState>,
    payload: std::result::Result<Json<BinarizeRequest>, JsonRejection>,
) -> Result<Json<Image>> {
    let request = parse(payload)?;
    let image = state.pipeline().binarize(request).await?;
    Ok(Json(image))
}

async fn segment(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SegmentRequest>, JsonRejection>,
) -> Result<Response> {
    let request = parse(payload)?;
    let boxes = state.pipeline().segment(request).await?;
    Ok(ndjson(boxes))
}

async fn recognize(
    State(state): State<AppState>,
    payload: std::result::Result<Json<RecognizeRequest>, JsonRejection>,
) -> Result<Response> {
    let request = parse(payload)?;
    let model = request.model_name.clone();
    let texts = state.pipeline().recognize(request).await?;
    tracing::debug!(model = %model, "Streaming recognition results");
    Ok(ndjson(texts))
}
