//! OCR Pipeline
//!
//! The four client-facing operations. Each call is independent; chaining
//! binarize, segment and recognize is up to the client.
//!
//! Engine work runs on the blocking thread pool, bounded by a job semaphore.
//! Streaming operations hand elements over a bounded channel, so a consumer
//! that goes away stops the producer at its next element.

mod types;

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

use crate::engine::{EngineError, OcrEngine, RecognizeOptions, SegmentParams, Segmentation};
use crate::geometry::{Corners, GeometryError, LineBox};
use crate::inventory::{Descriptors, Inventory};
use crate::models::{ModelResolver, ResolveError};

pub use types::{BinarizeRequest, Image, OcrText, RecognizeRequest, SegmentRequest, PNG_MIME_TYPE};

/// Records buffered between the recognizer and a slow client
const RECORD_BUFFER: usize = 8;

/// Pipeline errors
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Invalid line box: {0}")]
    InvalidBox(#[from] GeometryError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Failed to encode result: {0}")]
    Encode(String),

    #[error("Worker task failed: {0}")]
    Task(String),
}

/// Stream of pipeline results in engine order
pub type ResultStream<T> = BoxStream<'static, Result<T, PipelineError>>;

/// Shared pipeline state: inventory, resolver, engine and the job bound
pub struct Pipeline {
    inventory: Arc<Inventory>,
    resolver: Arc<ModelResolver>,
    engine: Arc<dyn OcrEngine>,
    jobs: Arc<Semaphore>,
}

impl Pipeline {
    pub fn new(
        inventory: Arc<Inventory>,
        resolver: Arc<ModelResolver>,
        engine: Arc<dyn OcrEngine>,
        max_jobs: usize,
    ) -> Self {
        Self {
            inventory,
            resolver,
            engine,
            jobs: Arc::new(Semaphore::new(max_jobs.max(1))),
        }
    }

    pub fn inventory(&self) -> &Arc<Inventory> {
        &self.inventory
    }

    /// ListModels: a fresh pass over the inventory, in load order
    pub fn list_models(&self) -> Descriptors {
        self.inventory.descriptors()
    }

    /// BinarizeImage: decode, binarize, re-encode as PNG
    pub async fn binarize(&self, request: BinarizeRequest) -> Result<Image, PipelineError> {
        let engine = Arc::clone(&self.engine);
        let BinarizeRequest { image, params } = request;

        self.run_blocking(move || {
            let bitmap = image.decode()?;
            tracing::debug!(
                width = bitmap.width(),
                height = bitmap.height(),
                ?params,
                "Binarizing image"
            );
            let binarized = engine.binarize(&bitmap, &params)?;
            Image::encode_png(&binarized)
        })
        .await
    }

    /// SegmentLines: decode, segment, stream boxes in engine order
    pub async fn segment(&self, request: SegmentRequest) -> Result<ResultStream<LineBox>, PipelineError> {
        let engine = Arc::clone(&self.engine);
        let SegmentRequest {
            image,
            direction,
            scale,
            max_col_seps,
            black_col_seps,
        } = request;
        let params = SegmentParams {
            text_direction: direction.engine_token().to_string(),
            scale,
            max_col_seps,
            black_col_seps,
        };

        let segmentation = self
            .run_blocking(move || {
                let bitmap = image.decode()?;
                Ok(engine.segment(&bitmap, &params)?)
            })
            .await?;
        tracing::debug!(lines = segmentation.boxes.len(), "Segmented image");

        let boxes = segmentation.boxes.into_iter().map(|corners| {
            LineBox::from_corners(corners)
                .map_err(|e| PipelineError::Engine(EngineError::InvalidOutput(e.to_string())))
        });
        Ok(stream::iter(boxes).boxed())
    }

    /// RecognizeText: decode, resolve the model, load it, stream one record per line.
    ///
    /// Anything that fails before recognition starts fails the call without
    /// producing elements.
    pub async fn recognize(
        &self,
        request: RecognizeRequest,
    ) -> Result<ResultStream<OcrText>, PipelineError> {
        let RecognizeRequest {
            image,
            model_name,
            lines,
            direction,
            padding,
            normalize,
            bidi_reorder,
        } = request;

        let boxes = lines
            .iter()
            .map(LineBox::to_corners)
            .collect::<Result<Vec<Corners>, _>>()?;

        let bitmap = self.run_blocking(move || image.decode()).await?;

        if !self.inventory.contains(&model_name) {
            tracing::debug!(model = %model_name, "Model is not listed in the inventory");
        }
        let model_path = self.resolver.resolve(&model_name).await?;

        let bounds = Segmentation {
            text_direction: direction.engine_token().to_string(),
            boxes,
        };
        let options = RecognizeOptions {
            padding,
            normalize,
            bidi_reorder,
        };

        let permit = self.acquire_job().await?;
        let engine = Arc::clone(&self.engine);
        let records = tokio::task::spawn_blocking(move || {
            let recognizer = engine.load_recognizer(&model_path)?;
            tracing::info!(
                model = %model_name,
                path = %model_path.display(),
                size_bytes = recognizer.size_bytes(),
                lines = bounds.boxes.len(),
                "Recognizing text"
            );
            engine.recognize(&recognizer, &bitmap, &bounds, &options)
        })
        .await
        .map_err(|e| PipelineError::Task(e.to_string()))??;

        let (tx, rx) = mpsc::channel(RECORD_BUFFER);
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            for record in records {
                let item = record
                    .map_err(PipelineError::from)
                    .and_then(OcrText::from_record);
                let failed = item.is_err();
                if tx.blocking_send(item).is_err() {
                    tracing::debug!("Client went away, stopping recognition");
                    break;
                }
                if failed {
                    break;
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }

    async fn acquire_job(&self) -> Result<OwnedSemaphorePermit, PipelineError> {
        Arc::clone(&self.jobs)
            .acquire_owned()
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))
    }

    /// Run `f` on the blocking pool while holding a job permit
    async fn run_blocking<T, F>(&self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self.acquire_job().await?;
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))?
    }
}
