//! Image classifier trait

use async_trait::async_trait;
use leafscan_core::{InferenceResult, RawImage};
use tokio_util::sync::CancellationToken;

/// Trait for all image classifiers.
///
/// Classification never fails with an error: failures are reported through
/// [`InferenceResult::success`] and [`InferenceResult::error`] so callers can
/// decide whether to try another classifier.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    /// Classify the given image
    async fn classify(&self, image: &RawImage) -> InferenceResult;

    /// Classify, giving up when `cancel` fires
    async fn classify_with_cancel(
        &self,
        image: &RawImage,
        cancel: &CancellationToken,
    ) -> InferenceResult {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                InferenceResult::failure(leafscan_core::Error::Cancelled.result_message())
            }
            result = self.classify(image) => result,
        }
    }

    /// Get the classifier name
    fn name(&self) -> &str;
}
