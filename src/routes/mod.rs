//! Route modules for Mocri Server

pub mod health;
pub mod models;
pub mod ocr;

use axum::{
    body::{Body, Bytes},
    extract::DefaultBodyLimit,
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{Stream, StreamExt};
use serde::Serialize;

use crate::pipeline::PipelineError;
use crate::state::AppState;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Build the application router
pub fn router(state: AppState) -> Router {
    let body_limit = state.config().server.max_body_bytes;

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .nest("/api/v1", models::router().merge(ocr::router()))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Stream serializable items as newline-delimited JSON.
///
/// An error item aborts the body; lines already sent stay sent.
pub fn ndjson<S, T>(items: S) -> Response
where
    S: Stream<Item = Result<T, PipelineError>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let lines = items.map(|item| {
        let item = item.map_err(|e| {
            tracing::warn!("Stream terminated early: {}", e);
            e
        })?;
        let mut line = serde_json::to_vec(&item).map_err(|e| PipelineError::Encode(e.to_string()))?;
        line.push(b'\n');
        Ok::<_, PipelineError>(Bytes::from(line))
    });

    ([(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)], Body::from_stream(lines)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};
    use futures::stream;
    use tower::ServiceExt;

    type Items = Vec<Result<u32, PipelineError>>;

    async fn get_root(items: fn() -> Items) -> Response {
        let app: Router = Router::new().route("/", get(move || async move { ndjson(stream::iter(items())) }));
        app.oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ndjson_lines() {
        let response = get_root(|| vec![Ok(1), Ok(2), Ok(3)]).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], NDJSON_CONTENT_TYPE);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"1\n2\n3\n");
    }

    #[tokio::test]
    async fn test_ndjson_error_aborts_body() {
        let response = get_root(|| {
            vec![Ok(1), Err(PipelineError::Task("engine died".to_string())), Ok(3)]
        })
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await;
        assert!(body.is_err());
    }
}
