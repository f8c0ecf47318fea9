//! Turning raw model output into ranked predictions

use crate::session::ModelOutputs;
use leafscan_core::{ClassPrediction, Error, Result};

/// Picks which model output holds the logits
#[derive(Debug, Clone)]
pub struct OutputPolicy {
    candidates: Vec<String>,
}

impl OutputPolicy {
    /// Try `candidates` in order, then fall back to the first declared output
    pub fn new(candidates: Vec<String>) -> Self {
        Self { candidates }
    }

    /// Select the logits from `outputs`
    pub fn select<'a>(&self, outputs: &'a ModelOutputs) -> Result<&'a [f32]> {
        let (name, tensor) = self
            .candidates
            .iter()
            .find_map(|name| outputs.get(name).map(|t| (name.as_str(), t)))
            .or_else(|| outputs.first())
            .ok_or_else(|| Error::invalid_output("model produced no outputs"))?;

        let values = tensor.values.as_deref().ok_or_else(|| {
            Error::invalid_output(format!("output '{}' is not a float tensor", name))
        })?;

        if values.is_empty() {
            return Err(Error::invalid_output(format!("output '{}' is empty", name)));
        }

        Ok(values)
    }
}

impl Default for OutputPolicy {
    fn default() -> Self {
        Self::new(vec!["logits".to_string(), "output".to_string()])
    }
}

/// Class names by output index
#[derive(Debug, Clone)]
pub struct ClassTable {
    labels: Vec<String>,
}

impl ClassTable {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Name for `index`; indices past the table get a generic name
    pub fn name_for(&self, index: usize) -> String {
        self.labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("Disease {}", index))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_LABELS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }
}

/// Reject NaN and infinite logits
pub fn ensure_finite(logits: &[f32]) -> Result<()> {
    match logits.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(Error::invalid_output(format!(
            "non-finite logit {} at index {}",
            logits[index], index
        ))),
        None => Ok(()),
    }
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|&x| x / sum).collect()
}

/// Pair probabilities with class names and keep the `top_k` best
pub fn rank(probabilities: &[f32], classes: &ClassTable, top_k: usize) -> Vec<ClassPrediction> {
    let predictions = probabilities
        .iter()
        .enumerate()
        .map(|(index, &p)| ClassPrediction::new(classes.name_for(index), p))
        .collect();

    normalize_predictions(predictions, top_k)
}

/// Clamp confidences into [0, 1], sort descending and truncate.
///
/// Ties keep their original order. Non-finite confidences are dropped.
pub fn normalize_predictions(
    mut predictions: Vec<ClassPrediction>,
    top_k: usize,
) -> Vec<ClassPrediction> {
    predictions.retain(|p| p.confidence.is_finite());
    for prediction in &mut predictions {
        prediction.confidence = prediction.confidence.clamp(0.0, 1.0);
    }
    predictions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    predictions.truncate(top_k);
    predictions
}
