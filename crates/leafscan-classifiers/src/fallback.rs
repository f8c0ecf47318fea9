//! Local-first classification with a remote fallback

use crate::classifier::ImageClassifier;
use async_trait::async_trait;
use leafscan_core::{InferenceResult, RawImage};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Which classifier produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionSource {
    /// The on-device model
    Local,
    /// The remote classification API
    Remote,
    /// Neither stage produced predictions
    Unavailable,
}

impl std::fmt::Display for PredictionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// A result together with the stage that produced it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackOutcome {
    pub result: InferenceResult,
    pub source: PredictionSource,
}

/// Tries the primary classifier and falls back to the secondary when the
/// primary has no usable result
pub struct FallbackClassifier {
    primary: Arc<dyn ImageClassifier>,
    secondary: Option<Arc<dyn ImageClassifier>>,
}

impl FallbackClassifier {
    pub fn new(primary: Arc<dyn ImageClassifier>) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    /// Set the classifier used when the primary has nothing
    pub fn with_fallback(mut self, secondary: Arc<dyn ImageClassifier>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn has_fallback(&self) -> bool {
        self.secondary.is_some()
    }

    /// Whether `result` counts as "no result".
    ///
    /// An empty prediction list is never read as a confident "Healthy".
    pub fn needs_fallback(result: &InferenceResult) -> bool {
        !result.success || result.predictions.is_empty()
    }

    /// Classify and report which stage answered
    pub async fn classify_with_source(
        &self,
        image: &RawImage,
        cancel: &CancellationToken,
    ) -> FallbackOutcome {
        let local = self.primary.classify_with_cancel(image, cancel).await;
        if !Self::needs_fallback(&local) {
            return FallbackOutcome {
                result: local,
                source: PredictionSource::Local,
            };
        }

        let Some(secondary) = &self.secondary else {
            tracing::warn!(error = ?local.error, "No local result and no fallback configured");
            return FallbackOutcome {
                result: local,
                source: PredictionSource::Unavailable,
            };
        };

        if cancel.is_cancelled() {
            return FallbackOutcome {
                result: local,
                source: PredictionSource::Unavailable,
            };
        }

        tracing::info!(
            primary = self.primary.name(),
            fallback = secondary.name(),
            error = ?local.error,
            "Using AI fallback for analysis"
        );
        metrics::counter!("leafscan_fallbacks_total").increment(1);

        let remote = secondary.classify_with_cancel(image, cancel).await;
        let source = if Self::needs_fallback(&remote) {
            tracing::warn!(error = ?remote.error, "Fallback classifier produced no result");
            PredictionSource::Unavailable
        } else {
            PredictionSource::Remote
        };

        FallbackOutcome {
            result: remote,
            source,
        }
    }
}

#[async_trait]
impl ImageClassifier for FallbackClassifier {
    async fn classify(&self, image: &RawImage) -> InferenceResult {
        self.classify_with_source(image, &CancellationToken::new())
            .await
            .result
    }

    async fn classify_with_cancel(
        &self,
        image: &RawImage,
        cancel: &CancellationToken,
    ) -> InferenceResult {
        self.classify_with_source(image, cancel).await.result
    }

    fn name(&self) -> &str {
        "fallback"
    }
}
