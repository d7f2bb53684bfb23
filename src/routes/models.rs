//! Model inventory routes

use axum::{extract::State, response::Response, routing::get, Router};
use futures::stream;

use super::ndjson;
use crate::pipeline::PipelineError;
use crate::state::AppState;

/// Create the models router
pub fn router() -> Router<AppState> {
    Router::new().route("/models", get(list_models))
}

/// ListModels: one descriptor per line, in inventory order
async fn list_models(State(state): State<AppState>) -> Response {
    let models = state.pipeline().list_models();
    tracing::debug!(models = models.len(), "Listing models");
    ndjson(stream::iter(models.map(Ok::<_, PipelineError>)))
}
