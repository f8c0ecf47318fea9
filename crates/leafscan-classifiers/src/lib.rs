//! LeafScan Classifiers
//!
//! Plant-disease classification from leaf photos.
//!
//! The local pipeline runs a pre-trained ONNX model on the CPU:
//! - Runtime and model are loaded on first use, once, and shared
//! - Images are stretched to 224x224 and ImageNet-normalized
//! - Logits are softmaxed and the top three classes returned
//!
//! When the local pipeline has no result, [`FallbackClassifier`] hands the
//! image to the hosted classification API instead.

pub mod classifier;
pub mod config;
pub mod fallback;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;
pub mod registry;
pub mod remote;
pub mod runtime;
pub mod session;
pub mod single_flight;

pub use classifier::ImageClassifier;
pub use config::{
    ClassifierConfig, ModelSettings, ModelSource, PreprocessConfig, RemoteConfig, ResizeFilter,
    RuntimeSettings, TimeoutConfig,
};
pub use fallback::{FallbackClassifier, FallbackOutcome, PredictionSource};
pub use pipeline::InferencePipeline;
pub use postprocess::{ClassTable, OutputPolicy};
pub use preprocess::{InputTensor, Preprocessor};
pub use registry::{ClassifierRegistry, RegistryBuilder};
pub use remote::{ChatClient, ChatSession, RemoteClassifier};
pub use runtime::{InferenceRuntime, OrtRuntimeProvider, RuntimeLoader, RuntimeProvider};
pub use session::{ModelOutputs, ModelSession, ModelSessionManager, NamedInput, OutputTensor};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classifier::ImageClassifier;
    pub use crate::config::ClassifierConfig;
    pub use crate::fallback::{FallbackClassifier, PredictionSource};
    pub use crate::pipeline::InferencePipeline;
    pub use crate::registry::ClassifierRegistry;
    pub use leafscan_core::{ClassPrediction, InferenceResult, RawImage};
}
