//! Error types for LeafScan

/// Result type alias using LeafScan's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Message reported in an inference result when the model could not be made ready.
pub const MODEL_NOT_LOADED: &str = "Model not loaded";

/// Message reported in an inference result when the model output is unusable.
pub const INVALID_MODEL_OUTPUT: &str = "Invalid model output";

/// Core error type for LeafScan operations.
///
/// The type is `Clone` so one failed load can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The inference runtime could not be fetched or is missing its entry point
    #[error("runtime load error: {0}")]
    RuntimeLoad(String),

    /// The model asset is unreachable or malformed
    #[error("model load error: {0}")]
    ModelLoad(String),

    /// The input image could not be decoded
    #[error("preprocess error: {0}")]
    Preprocess(String),

    /// The model produced no usable numeric output
    #[error("invalid model output: {0}")]
    InvalidOutput(String),

    /// Session execution failed
    #[error("inference error: {0}")]
    Inference(String),

    /// A suspension point exceeded its time budget
    #[error("{0} timed out")]
    Timeout(String),

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// A remote endpoint answered with a non-success HTTP status
    #[error("remote service returned HTTP {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    /// A remote endpoint answered successfully but reported failure in its body
    #[error("remote service rejected the request: {0}")]
    RemoteRejected(String),

    /// Connection, TLS or body decoding failure talking to a remote endpoint
    #[error("transport error: {0}")]
    Transport(String),

    /// The request was rejected before anything was sent
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(String),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new runtime load error
    pub fn runtime_load(msg: impl Into<String>) -> Self {
        Self::RuntimeLoad(msg.into())
    }

    /// Create a new model load error
    pub fn model_load(msg: impl Into<String>) -> Self {
        Self::ModelLoad(msg.into())
    }

    /// Create a new preprocess error
    pub fn preprocess(msg: impl Into<String>) -> Self {
        Self::Preprocess(msg.into())
    }

    /// Create a new invalid output error
    pub fn invalid_output(msg: impl Into<String>) -> Self {
        Self::InvalidOutput(msg.into())
    }

    /// Create a new inference error
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new timeout error naming the stage that ran out of time
    pub fn timeout(stage: impl Into<String>) -> Self {
        Self::Timeout(stage.into())
    }

    /// Create a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error came from making the runtime or model ready
    pub fn is_load_failure(&self) -> bool {
        matches!(self, Self::RuntimeLoad(_) | Self::ModelLoad(_))
    }

    /// Whether a remote service answered with a 500-class status.
    ///
    /// The hosted functions answer 500 when their AI provider key is missing,
    /// so this is the "service misconfigured" signal.
    pub fn is_service_misconfigured(&self) -> bool {
        matches!(self, Self::RemoteStatus { status, .. } if *status >= 500)
    }

    /// The string placed in `InferenceResult::error` for this failure.
    pub fn result_message(&self) -> String {
        match self {
            Self::RuntimeLoad(_) | Self::ModelLoad(_) => MODEL_NOT_LOADED.to_string(),
            Self::InvalidOutput(_) => INVALID_MODEL_OUTPUT.to_string(),
            other => other.to_string(),
        }
    }

    /// A message suitable for showing to an end user.
    pub fn user_facing_message(&self) -> &'static str {
        if self.is_service_misconfigured() {
            "I'm experiencing technical difficulties. This usually means the AI service \
             needs to be configured. Please check that the AI provider is properly set up."
        } else {
            "I'm sorry, I encountered an error while processing your request. Please try \
             again, and if the problem persists, check your internet connection."
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
