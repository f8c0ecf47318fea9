//! Core types for LeafScan

use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A user-supplied image: encoded bytes plus their mime type.
#[derive(Debug, Clone)]
pub struct RawImage {
    /// Encoded image bytes (JPEG, PNG, ...)
    pub bytes: Bytes,

    /// Mime type reported by the source, e.g. `image/jpeg`
    pub mime_type: String,
}

impl RawImage {
    /// Create a new image from bytes and a mime type
    pub fn new(bytes: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Read an image from disk, guessing the mime type from its extension
    pub fn from_path(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(Self::new(bytes, mime_type))
    }

    /// Size of the encoded payload in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Render as a `data:` URL, the form the remote classifier accepts
    pub fn to_data_url(&self) -> String {
        let payload = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!("data:{};base64,{}", self.mime_type, payload)
    }
}

/// A class name with its probability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassPrediction {
    /// Human-readable class name
    pub class_name: String,

    /// Probability in [0, 1]
    pub confidence: f32,
}

impl ClassPrediction {
    /// Create a new prediction
    pub fn new(class_name: impl Into<String>, confidence: f32) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
        }
    }
}

/// Terminal output of a classification attempt.
///
/// Failures are carried in `success`/`error` rather than raised, so a caller
/// decides on fallback by inspecting the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Whether classification produced predictions
    pub success: bool,

    /// Ranked predictions, highest confidence first
    #[serde(default)]
    pub predictions: Vec<ClassPrediction>,

    /// Failure description when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InferenceResult {
    /// Create a successful result
    pub fn success(predictions: Vec<ClassPrediction>) -> Self {
        Self {
            success: true,
            predictions,
            error: None,
        }
    }

    /// Create a failed result with no predictions
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            predictions: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Whether the result carries at least one prediction
    pub fn has_predictions(&self) -> bool {
        !self.predictions.is_empty()
    }

    /// Highest-ranked prediction, if any
    pub fn top(&self) -> Option<&ClassPrediction> {
        self.predictions.first()
    }
}

/// Role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// A chat message in a plant-care conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who sent the message
    pub role: ChatRole,

    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Create a new chat message
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_failure_result_serialization() {
        let result = InferenceResult::failure("Model not loaded");
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Model not loaded");
        assert_eq!(json["predictions"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_success_result_omits_error() {
        let result = InferenceResult::success(vec![ClassPrediction::new("Healthy", 0.9)]);
        let json = serde_json::to_string(&result).unwrap();

        assert!(!json.contains("error"));
        assert_eq!(result.top().unwrap().class_name, "Healthy");
    }

    #[test]
    fn test_remote_payload_without_predictions() {
        let result: InferenceResult =
            serde_json::from_str(r#"{"success": false, "error": "No image data provided"}"#)
                .unwrap();
        assert!(!result.has_predictions());
        assert_eq!(result.error.as_deref(), Some("No image data provided"));
    }

    #[test]
    fn test_data_url() {
        let image = RawImage::new(vec![0xff, 0xd8, 0xff], "image/jpeg");
        assert_eq!(image.to_data_url(), "data:image/jpeg;base64,/9j/");
    }

    #[test]
    fn test_from_path_guesses_mime() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(b"not really a png").unwrap();

        let image = RawImage::from_path(file.path()).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.len(), 16);
    }

    #[test]
    fn test_chat_role_wire_format() {
        let json = serde_json::to_string(&ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }
}
