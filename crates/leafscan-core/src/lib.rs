//! LeafScan Core
//!
//! Core types and error handling shared across LeafScan components.
//!
//! This crate provides:
//! - The image, prediction and inference-result value types
//! - Chat message types used by the plant-care assistant client
//! - The error taxonomy and result alias used by every stage of the
//!   classification pipeline

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ChatMessage, ChatRole, ClassPrediction, InferenceResult, RawImage};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{ChatMessage, ChatRole, ClassPrediction, InferenceResult, RawImage};
}
