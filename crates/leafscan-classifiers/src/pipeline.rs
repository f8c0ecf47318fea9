//! Local inference pipeline
//!
//! Orchestrates one prediction end to end:
//! - Make the runtime and model session ready (loaded once, shared)
//! - Preprocess the image on a blocking thread
//! - Run the session on a blocking thread
//! - Select the logits output, softmax, rank the top classes
//!
//! Every failure, timeout or cancellation comes back as an unsuccessful
//! [`InferenceResult`]; nothing is raised to the caller.

use crate::classifier::ImageClassifier;
use crate::config::{ClassifierConfig, ModelSource, TimeoutConfig};
use crate::postprocess::{ensure_finite, rank, softmax, ClassTable, OutputPolicy};
use crate::preprocess::{InputTensor, Preprocessor};
use crate::session::{ModelOutputs, ModelSession, ModelSessionManager, NamedInput};
use async_trait::async_trait;
use leafscan_core::{ClassPrediction, Error, InferenceResult, RawImage, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Local ONNX classification pipeline
pub struct InferencePipeline {
    sessions: Arc<ModelSessionManager>,
    source: ModelSource,
    preprocessor: Arc<Preprocessor>,
    policy: OutputPolicy,
    classes: ClassTable,
    top_k: usize,
    timeouts: TimeoutConfig,
}

impl InferencePipeline {
    /// Create a pipeline with default preprocessing, labels and timeouts
    pub fn new(sessions: Arc<ModelSessionManager>, source: ModelSource) -> Self {
        Self {
            sessions,
            source,
            preprocessor: Arc::new(Preprocessor::default()),
            policy: OutputPolicy::default(),
            classes: ClassTable::default(),
            top_k: 3,
            timeouts: TimeoutConfig::default(),
        }
    }

    /// Create a pipeline from configuration
    pub fn from_config(
        sessions: Arc<ModelSessionManager>,
        config: &ClassifierConfig,
    ) -> Result<Self> {
        Ok(Self::new(sessions, config.model.source.clone())
            .with_preprocessor(Preprocessor::new(&config.preprocessing)?)
            .with_output_policy(OutputPolicy::new(config.model.output_candidates.clone()))
            .with_classes(ClassTable::new(config.labels.clone()))
            .with_top_k(config.top_k)
            .with_timeouts(config.timeouts.clone()))
    }

    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = Arc::new(preprocessor);
        self
    }

    pub fn with_output_policy(mut self, policy: OutputPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_classes(mut self, classes: ClassTable) -> Self {
        self.classes = classes;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// The session manager backing this pipeline
    pub fn sessions(&self) -> &Arc<ModelSessionManager> {
        &self.sessions
    }

    /// Classify an image
    pub async fn predict(&self, image: &RawImage) -> InferenceResult {
        self.predict_with_cancel(image, &CancellationToken::new())
            .await
    }

    /// Classify an image, stopping at the next suspension point once `cancel` fires
    pub async fn predict_with_cancel(
        &self,
        image: &RawImage,
        cancel: &CancellationToken,
    ) -> InferenceResult {
        let start = Instant::now();
        let outcome = self.try_predict(image, cancel).await;
        let elapsed_us = start.elapsed().as_micros() as u64;

        metrics::histogram!("leafscan_inference_latency_us", "source" => "local")
            .record(elapsed_us as f64);

        match outcome {
            Ok(predictions) => {
                metrics::counter!(
                    "leafscan_predictions_total",
                    "source" => "local",
                    "outcome" => "success"
                )
                .increment(1);
                tracing::debug!(
                    elapsed_us,
                    top = ?predictions.first(),
                    "Local prediction complete"
                );
                InferenceResult::success(predictions)
            }
            Err(e) => {
                let outcome = match e {
                    Error::Cancelled => "cancelled",
                    Error::Timeout(_) => "timeout",
                    _ => "error",
                };
                metrics::counter!(
                    "leafscan_predictions_total",
                    "source" => "local",
                    "outcome" => outcome
                )
                .increment(1);
                tracing::warn!(error = %e, elapsed_us, "Local prediction failed");
                InferenceResult::failure(e.result_message())
            }
        }
    }

    /// Load the runtime and model ahead of the first prediction
    pub async fn warmup(&self, cancel: &CancellationToken) -> Result<()> {
        self.ensure_session(cancel).await.map(|_| ())
    }

    async fn try_predict(
        &self,
        image: &RawImage,
        cancel: &CancellationToken,
    ) -> Result<Vec<ClassPrediction>> {
        let session = self.ensure_session(cancel).await.map_err(|e| match e {
            Error::Cancelled | Error::RuntimeLoad(_) | Error::ModelLoad(_) => e,
            other => Error::model_load(other.to_string()),
        })?;

        let tensor = self.preprocess(image, cancel).await?;
        let outputs = self.infer(session, tensor, cancel).await?;

        let logits = self.policy.select(&outputs)?;
        ensure_finite(logits)?;
        let probabilities = softmax(logits);

        Ok(rank(&probabilities, &self.classes, self.top_k))
    }

    async fn ensure_session(&self, cancel: &CancellationToken) -> Result<Arc<dyn ModelSession>> {
        stage(
            cancel,
            "runtime_load",
            self.timeouts.runtime_load(),
            self.sessions.runtime().ensure_runtime(),
        )
        .await?;

        stage(
            cancel,
            "model_load",
            self.timeouts.model_load(),
            self.sessions.ensure_model(&self.source),
        )
        .await
    }

    async fn preprocess(
        &self,
        image: &RawImage,
        cancel: &CancellationToken,
    ) -> Result<InputTensor> {
        let preprocessor = Arc::clone(&self.preprocessor);
        let image = image.clone();
        let start = Instant::now();

        let tensor = stage(cancel, "preprocess", self.timeouts.preprocess(), async move {
            tokio::task::spawn_blocking(move || preprocessor.preprocess(&image))
                .await
                .map_err(|e| Error::preprocess(format!("preprocessing task failed: {}", e)))?
        })
        .await?;

        tracing::debug!(
            elapsed_us = start.elapsed().as_micros() as u64,
            shape = ?tensor.shape(),
            "Preprocessed image"
        );
        Ok(tensor)
    }

    async fn infer(
        &self,
        session: Arc<dyn ModelSession>,
        tensor: InputTensor,
        cancel: &CancellationToken,
    ) -> Result<ModelOutputs> {
        let input = NamedInput::new(session.input_name(), tensor);
        let start = Instant::now();

        let outputs = stage(cancel, "inference", self.timeouts.inference(), async move {
            tokio::task::spawn_blocking(move || session.run(input))
                .await
                .map_err(|e| Error::inference(format!("inference task failed: {}", e)))?
        })
        .await?;

        tracing::debug!(
            elapsed_us = start.elapsed().as_micros() as u64,
            outputs = ?outputs.names().collect::<Vec<_>>(),
            "Session run complete"
        );
        Ok(outputs)
    }
}

#[async_trait]
impl ImageClassifier for InferencePipeline {
    async fn classify(&self, image: &RawImage) -> InferenceResult {
        self.predict(image).await
    }

    async fn classify_with_cancel(
        &self,
        image: &RawImage,
        cancel: &CancellationToken,
    ) -> InferenceResult {
        self.predict_with_cancel(image, cancel).await
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Await `work` within `budget`, abandoning it if `cancel` fires first.
///
/// Blocking work already handed to a worker thread runs to completion and its
/// result is dropped.
async fn stage<T>(
    cancel: &CancellationToken,
    name: &'static str,
    budget: Duration,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        outcome = tokio::time::timeout(budget, work) => match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(name)),
        },
    }
}
